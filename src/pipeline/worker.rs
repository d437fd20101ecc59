//! Per-device I/O workers.
//!
//! Each bound device gets one OS thread that moves frames between the
//! device's pipe and the device itself:
//!
//! ```text
//! input:  device.read → pipe (blocking write) → client transfer
//! output: client transfer → pipe (non-blocking read) → device.write
//! ```
//!
//! Workers stop looping as soon as the shared running flag is cleared.
//! Device errors seen after that point are expected and silenced.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::device::{DeviceId, DeviceProxy};
use crate::pipeline::{PipeReader, PipeWriter};
use crate::state::EngineState;
use crate::{PipeError, RetryPolicy, StreamEvent};

/// Everything a worker needs besides its pipe end.
pub(crate) struct WorkerConfig {
    pub device_id: DeviceId,
    pub device: Arc<dyn DeviceProxy>,
    pub state: Arc<EngineState>,
    pub retry: RetryPolicy,
    pub buffer_frames: usize,
    pub frame_size: usize,
    pub output_idle_wait: Duration,
    pub pipe_write_wait: Duration,
}

/// Handle to a running worker thread.
pub(crate) struct IoWorker {
    device_id: DeviceId,
    handle: JoinHandle<()>,
}

impl IoWorker {
    /// Spawns a capture worker that pumps `config.device` into `writer`.
    pub fn spawn_input(
        name: String,
        config: WorkerConfig,
        writer: PipeWriter,
    ) -> std::io::Result<Self> {
        let device_id = config.device_id.clone();
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || run_input(&config, writer))?;
        Ok(Self { device_id, handle })
    }

    /// Spawns a playback worker that pumps `reader` into `config.device`.
    pub fn spawn_output(
        name: String,
        config: WorkerConfig,
        reader: PipeReader,
    ) -> std::io::Result<Self> {
        let device_id = config.device_id.clone();
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || run_output(&config, reader))?;
        Ok(Self { device_id, handle })
    }

    /// Waits for the worker thread to exit.
    pub fn join(self) {
        if self.handle.join().is_err() {
            tracing::error!(device = %self.device_id, "I/O worker panicked");
        }
    }
}

fn run_input(config: &WorkerConfig, mut writer: PipeWriter) {
    let state = &config.state;
    tracing::debug!(device = %config.device_id, "input worker started");

    let mut buffer = vec![0u8; config.buffer_frames * config.frame_size];
    'pump: while state.is_running() {
        if let Err(e) = config.device.read_with_retries(&mut buffer, config.retry) {
            state.record_device_error(&config.device_id, "read", &e);
            continue;
        }

        let mut written_frames = 0;
        while written_frames < config.buffer_frames {
            if !state.is_running() {
                break 'pump;
            }
            match writer.write_blocking(
                &buffer[written_frames * config.frame_size..],
                config.pipe_write_wait,
            ) {
                Ok(frames) => written_frames += frames,
                Err(PipeError::Shutdown) => break 'pump,
            }
        }
        tracing::trace!(device = %config.device_id, frames = written_frames, "captured chunk");
    }

    finish(config);
}

fn run_output(config: &WorkerConfig, mut reader: PipeReader) {
    let state = &config.state;
    tracing::debug!(device = %config.device_id, "output worker started");

    let mut buffer = vec![0u8; config.buffer_frames * config.frame_size];
    while state.is_running() {
        let frames = reader.read(&mut buffer);
        if frames == 0 {
            reader.wait_readable(config.output_idle_wait);
            continue;
        }
        let chunk = &buffer[..frames * config.frame_size];
        if let Err(e) = config.device.write_with_retries(chunk, config.retry) {
            state.record_device_error(&config.device_id, "write", &e);
        }
    }

    finish(config);
}

fn finish(config: &WorkerConfig) {
    tracing::debug!(device = %config.device_id, "worker stopped");
    config.state.emit(StreamEvent::WorkerStopped {
        device: config.device_id.clone(),
    });
}
