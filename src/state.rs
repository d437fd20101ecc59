//! State shared between the engine and its I/O workers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::device::DeviceId;
use crate::{DeviceError, EventCallback, StreamEvent};

/// Statistics about an engine, cumulative across start/standby cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Number of completed `transfer` calls.
    pub transfers: u64,
    /// Output frames dropped because a device pipe was full, summed over devices.
    pub frames_dropped: u64,
    /// Silent frames inserted into capture buffers.
    pub silence_frames_inserted: u64,
    /// Hardware errors reported while the stream was running.
    pub device_errors: u64,
    /// Number of I/O workers spawned.
    pub workers_started: u64,
}

/// Running flag, counters and the event sink.
///
/// The running flag is the only field workers poll; everything else is
/// bookkeeping.
pub(crate) struct EngineState {
    running: AtomicBool,
    transfers: AtomicU64,
    frames_dropped: AtomicU64,
    silence_frames_inserted: AtomicU64,
    device_errors: AtomicU64,
    workers_started: AtomicU64,
    event_callback: Option<EventCallback>,
}

impl EngineState {
    pub fn new(event_callback: Option<EventCallback>) -> Self {
        Self {
            running: AtomicBool::new(false),
            transfers: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            silence_frames_inserted: AtomicU64::new(0),
            device_errors: AtomicU64::new(0),
            workers_started: AtomicU64::new(0),
            event_callback,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn emit(&self, event: StreamEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }

    pub fn record_transfer(&self) {
        self.transfers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, device: &DeviceId, frames: usize) {
        self.frames_dropped
            .fetch_add(frames as u64, Ordering::Relaxed);
        self.emit(StreamEvent::FramesDropped {
            device: device.clone(),
            frames,
        });
    }

    pub fn record_silence(&self, frames: usize) {
        self.silence_frames_inserted
            .fetch_add(frames as u64, Ordering::Relaxed);
        self.emit(StreamEvent::SilenceInserted { frames });
    }

    /// Records a device failure unless the stream is stopping, in which case
    /// the error is expected and only traced.
    pub fn record_device_error(&self, device: &DeviceId, context: &str, error: &DeviceError) {
        if !self.is_running() {
            tracing::debug!(%device, %error, "{context} failed while stopping");
            return;
        }
        tracing::warn!(%device, %error, "{context} failed");
        self.device_errors.fetch_add(1, Ordering::Relaxed);
        self.emit(StreamEvent::DeviceError {
            device: device.clone(),
            error: error.to_string(),
        });
    }

    pub fn record_worker_started(&self, device: &DeviceId) {
        self.workers_started.fetch_add(1, Ordering::Relaxed);
        self.emit(StreamEvent::WorkerStarted {
            device: device.clone(),
        });
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            transfers: self.transfers.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            silence_frames_inserted: self.silence_frames_inserted.load(Ordering::Relaxed),
            device_errors: self.device_errors.load(Ordering::Relaxed),
            workers_started: self.workers_started.load(Ordering::Relaxed),
        }
    }
}
