//! The stream engine: state machine, fan-out and teardown.

use std::sync::Arc;
use std::time::Duration;

use crate::device::{DeviceId, DeviceOpener, DeviceProfile, DeviceProxy, OpenMode};
use crate::format::{apply_gain, GainControl};
use crate::pipeline::{ring_pipe, IoWorker, PipeControl, PipeReader, PipeWriter, WorkerConfig};
use crate::state::{EngineState, EngineStats};
use crate::{EngineConfig, EngineError, PcmConfig, StreamContext, StreamEngineBuilder};

/// Whether devices are currently bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No devices open, no workers running.
    Idle,
    /// Devices open and one worker running per device.
    Active,
}

/// How the caller wants a drain to complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainMode {
    /// Return once all buffered audio has played.
    #[default]
    All,
    /// Return early so the caller can queue the next track.
    EarlyNotify,
}

/// Outcome of a [`StreamEngine::transfer`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferResult {
    /// Frames consumed or produced. Always equals the requested count.
    pub actual_frame_count: usize,
    /// Hardware latency in milliseconds (the maximum across output devices).
    pub latency_ms: i32,
}

/// Stream position in frames with the wall-clock time it was measured at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamPosition {
    /// Frames transferred since the stream started.
    pub frames: i64,
    /// Monotonic timestamp in nanoseconds.
    pub time_ns: i64,
}

struct CaptureBinding {
    id: DeviceId,
    device: Arc<dyn DeviceProxy>,
    pipe: PipeControl,
    reader: PipeReader,
}

struct PlaybackBinding {
    id: DeviceId,
    device: Arc<dyn DeviceProxy>,
    writer: PipeWriter,
}

enum Bindings {
    Idle,
    Capture(CaptureBinding),
    Playback(Vec<PlaybackBinding>),
}

impl Bindings {
    fn devices(&self) -> Vec<&Arc<dyn DeviceProxy>> {
        match self {
            Self::Idle => Vec::new(),
            Self::Capture(binding) => vec![&binding.device],
            Self::Playback(bindings) => bindings.iter().map(|b| &b.device).collect(),
        }
    }

    fn first_device(&self) -> Option<&Arc<dyn DeviceProxy>> {
        match self {
            Self::Idle => None,
            Self::Capture(binding) => Some(&binding.device),
            Self::Playback(bindings) => bindings.first().map(|b| &b.device),
        }
    }
}

/// One audio stream bound to one or more devices.
///
/// The engine is driven from a single client thread: `start`, `transfer`
/// and teardown must not run concurrently with each other. Gain may be
/// changed from anywhere through a [`GainControl`].
///
/// Output streams fan out every chunk to all bound devices; input streams
/// bind a single device. Each device gets its own pipe and worker thread,
/// so a slow or failing device never blocks `transfer` or the other
/// devices.
///
/// # Example
///
/// ```
/// use pcm_bridge::{
///     ChannelLayout, DeviceProfile, Direction, SampleFormat, StreamContext, StreamEngine,
/// };
///
/// # fn main() -> Result<(), pcm_bridge::EngineError> {
/// let context = StreamContext::new(
///     Direction::Output,
///     48000,
///     ChannelLayout::Stereo,
///     SampleFormat::I16,
///     480,
/// );
/// let mut engine = StreamEngine::builder(context)
///     .device(DeviceProfile::attached(0, 0, Direction::Output))
///     .build()?;
///
/// engine.start()?;
/// let mut chunk = vec![0u8; 480 * 4];
/// let result = engine.transfer(&mut chunk, 480)?;
/// assert_eq!(result.actual_frame_count, 480);
/// engine.standby();
/// # Ok(())
/// # }
/// ```
pub struct StreamEngine {
    context: StreamContext,
    pcm_config: Option<PcmConfig>,
    profiles: Vec<DeviceProfile>,
    opener: Arc<dyn DeviceOpener>,
    config: EngineConfig,
    state: Arc<EngineState>,
    gain: GainControl,
    bindings: Bindings,
    workers: Vec<IoWorker>,
}

impl StreamEngine {
    /// Creates a builder for a stream described by `context`.
    pub fn builder(context: StreamContext) -> StreamEngineBuilder {
        StreamEngineBuilder::new(context)
    }

    pub(crate) fn new(
        context: StreamContext,
        profiles: Vec<DeviceProfile>,
        opener: Arc<dyn DeviceOpener>,
        config: EngineConfig,
        state: EngineState,
        gain: GainControl,
    ) -> Self {
        Self {
            context,
            pcm_config: None,
            profiles,
            opener,
            config,
            state: Arc::new(state),
            gain,
            bindings: Bindings::Idle,
            workers: Vec::new(),
        }
    }

    /// Negotiates the hardware configuration from the stream context.
    ///
    /// Called by [`StreamEngineBuilder::build`]; calling it again is harmless.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotInitialized`] if the context has a zero
    /// sample rate, channel count or buffer size.
    pub fn init(&mut self) -> Result<(), EngineError> {
        let config = PcmConfig::from_context(&self.context).ok_or_else(|| {
            EngineError::not_initialized(format!(
                "unusable stream config: {} Hz, {} ch, {} frames",
                self.context.sample_rate(),
                self.context.channel_count(),
                self.context.buffer_size_frames()
            ))
        })?;
        self.pcm_config = Some(config);
        Ok(())
    }

    /// Opens the devices, creates their pipes and spawns one worker per device.
    ///
    /// Starting an active stream is a no-op. Only profiles whose direction
    /// matches the stream are used; an input stream binds the first such
    /// profile only. On failure nothing stays open.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotInitialized`] if a device fails to open or
    /// no profile matches, and [`EngineError::WorkerSpawn`] if a worker
    /// thread cannot be created.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if !matches!(self.bindings, Bindings::Idle) {
            tracing::debug!("start on active stream, resuming");
            return Ok(());
        }
        let pcm = self
            .pcm_config
            .ok_or_else(|| EngineError::not_initialized("stream config not negotiated"))?;

        let direction = self.context.direction();
        let mut candidates = self.profiles.iter().filter(|p| p.direction == direction);
        let mut opened: Vec<(DeviceId, Arc<dyn DeviceProxy>)> = Vec::new();

        if direction.is_input() {
            if let Some(profile) = candidates.next() {
                opened.push((profile.id.clone(), self.open_device(profile, &pcm)?));
            }
            for ignored in candidates {
                tracing::warn!(device = %ignored.id, "capture binds a single device, ignoring");
            }
        } else {
            for profile in candidates {
                // an early return drops everything opened so far
                opened.push((profile.id.clone(), self.open_device(profile, &pcm)?));
            }
        }

        if opened.is_empty() {
            return Err(EngineError::not_initialized(format!(
                "no {direction:?} device available"
            )));
        }

        let frame_size = pcm.frame_size();
        let mut readers = Vec::new();
        let mut writers = Vec::new();
        self.bindings = if direction.is_input() {
            let (id, device) = opened.remove(0);
            let (writer, reader) = ring_pipe(pcm.buffer_size_frames, frame_size);
            writers.push((id.clone(), device.clone(), writer));
            Bindings::Capture(CaptureBinding {
                id,
                device,
                pipe: reader.control(),
                reader,
            })
        } else {
            Bindings::Playback(
                opened
                    .into_iter()
                    .map(|(id, device)| {
                        let (writer, reader) = ring_pipe(pcm.buffer_size_frames, frame_size);
                        readers.push((id.clone(), device.clone(), reader));
                        PlaybackBinding { id, device, writer }
                    })
                    .collect(),
            )
        };

        self.state.set_running(true);
        if let Err(e) = self.spawn_workers(writers, readers, &pcm) {
            self.teardown();
            return Err(e);
        }

        tracing::info!(
            direction = ?direction,
            devices = self.workers.len(),
            rate = pcm.sample_rate,
            channels = pcm.channels,
            buffer_frames = pcm.buffer_size_frames,
            "stream started"
        );
        Ok(())
    }

    fn open_device(
        &self,
        profile: &DeviceProfile,
        pcm: &PcmConfig,
    ) -> Result<Arc<dyn DeviceProxy>, EngineError> {
        let mode = OpenMode::for_profile(profile, pcm);
        self.opener.open(profile, pcm, mode).map_err(|e| {
            tracing::warn!(device = %profile.id, error = %e, "failed to open device");
            EngineError::not_initialized(format!("device '{}': {e}", profile.id))
        })
    }

    fn spawn_workers(
        &mut self,
        writers: Vec<(DeviceId, Arc<dyn DeviceProxy>, PipeWriter)>,
        readers: Vec<(DeviceId, Arc<dyn DeviceProxy>, PipeReader)>,
        pcm: &PcmConfig,
    ) -> Result<(), EngineError> {
        let prefix = self.config.worker_name_prefix.clone();
        for (index, (id, device, writer)) in writers.into_iter().enumerate() {
            let config = self.worker_config(id.clone(), device, pcm);
            let spawned = IoWorker::spawn_input(format!("{prefix}-in-{index}"), config, writer);
            self.register_worker(id, spawned)?;
        }
        for (index, (id, device, reader)) in readers.into_iter().enumerate() {
            let config = self.worker_config(id.clone(), device, pcm);
            let spawned = IoWorker::spawn_output(format!("{prefix}-out-{index}"), config, reader);
            self.register_worker(id, spawned)?;
        }
        Ok(())
    }

    /// Counts a worker as started once its thread exists, before `start` returns.
    fn register_worker(
        &mut self,
        id: DeviceId,
        spawned: std::io::Result<IoWorker>,
    ) -> Result<(), EngineError> {
        let worker = spawned.map_err(|source| EngineError::WorkerSpawn {
            device: id.to_string(),
            source,
        })?;
        self.state.record_worker_started(&id);
        self.workers.push(worker);
        Ok(())
    }

    fn worker_config(
        &self,
        device_id: DeviceId,
        device: Arc<dyn DeviceProxy>,
        pcm: &PcmConfig,
    ) -> WorkerConfig {
        WorkerConfig {
            device_id,
            device,
            state: self.state.clone(),
            retry: self.config.retry_policy(),
            buffer_frames: pcm.buffer_size_frames,
            frame_size: pcm.frame_size(),
            output_idle_wait: self.config.output_idle_wait,
            pipe_write_wait: self.config.pipe_write_wait,
        }
    }

    /// Moves `frame_count` frames between `buffer` and the devices.
    ///
    /// For output, the current gain is applied to `buffer` in place and the
    /// result is written to every device pipe; frames a pipe cannot take are
    /// dropped for that device. For input, frames are read from the capture
    /// pipe and any shortfall is filled with silence. This call never waits
    /// on a pipe.
    ///
    /// # Errors
    ///
    /// Does not fail once devices are bound; per-device problems are reported
    /// through [`StreamEvent`](crate::StreamEvent)s and [`stats`](Self::stats).
    ///
    /// # Panics
    ///
    /// Panics if the stream has no open devices, or if `buffer` is shorter
    /// than `frame_count` frames (including a `frame_count` whose byte size
    /// overflows `usize`).
    pub fn transfer(
        &mut self,
        buffer: &mut [u8],
        frame_count: usize,
    ) -> Result<TransferResult, EngineError> {
        let frame_size = self.context.frame_size();
        let byte_count = match frame_count.checked_mul(frame_size) {
            Some(bytes) if bytes <= buffer.len() => bytes,
            _ => panic!(
                "buffer holds {} bytes, too short for {frame_count} frames of {frame_size} bytes",
                buffer.len()
            ),
        };
        let buffer = &mut buffer[..byte_count];

        let latency_ms = match &mut self.bindings {
            Bindings::Idle => panic!("transfer called with no open devices"),
            Bindings::Capture(binding) => {
                let read = binding.reader.read(buffer);
                if read < frame_count {
                    buffer[read * frame_size..].fill(0);
                    let missing = frame_count - read;
                    tracing::warn!(
                        device = %binding.id,
                        requested = frame_count,
                        available = read,
                        "capture pipe underrun, inserting silence"
                    );
                    self.state.record_silence(missing);
                }
                binding.device.latency_ms()
            }
            Bindings::Playback(bindings) => {
                apply_gain(
                    buffer,
                    self.gain.get(),
                    self.context.format(),
                    self.context.channel_count(),
                );
                let mut max_latency = 0;
                for binding in bindings.iter_mut() {
                    let written = binding.writer.write(buffer);
                    if written < frame_count {
                        let dropped = frame_count - written;
                        tracing::warn!(
                            device = %binding.id,
                            dropped,
                            "device pipe full, dropping frames"
                        );
                        self.state.record_dropped(&binding.id, dropped);
                    }
                    max_latency = max_latency.max(binding.device.latency_ms());
                }
                max_latency
            }
        };

        self.state.record_transfer();
        tracing::trace!(frames = frame_count, latency_ms, "transfer");
        Ok(TransferResult {
            actual_frame_count: frame_count,
            latency_ms: i32::try_from(latency_ms).unwrap_or(i32::MAX),
        })
    }

    /// Refines `position` with the first device's hardware position.
    ///
    /// The caller's frame count is first pushed into the device as its
    /// transferred-frames baseline. On failure `position` is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotInitialized`] if no device is open and
    /// [`EngineError::InvalidOperation`] if the device position query fails.
    pub fn refine_position(&self, position: &mut StreamPosition) -> Result<(), EngineError> {
        let Some(device) = self.bindings.first_device() else {
            tracing::warn!("position requested with no open devices");
            return Err(EngineError::not_initialized("no open devices"));
        };

        device.reset_transferred_frames(position.frames);
        if self.context.is_input() {
            let captured = device
                .capture_position()
                .map_err(|e| EngineError::invalid_operation(format!("capture position: {e}")))?;
            *position = StreamPosition {
                frames: captured.frames,
                time_ns: captured.time_ns,
            };
        } else {
            let presented = device.presentation_position().map_err(|e| {
                EngineError::invalid_operation(format!("presentation position: {e}"))
            })?;
            *position = StreamPosition {
                frames: fold_hardware_frames(presented.frames),
                time_ns: presented.time_ns,
            };
        }
        Ok(())
    }

    /// Blocks for the time needed to play one full buffer. No-op for input.
    ///
    /// The devices give no drain signal, so the wait is an estimate from the
    /// configured buffer size and rate.
    ///
    /// # Errors
    ///
    /// Infallible; returns `Result` for symmetry with the other operations.
    pub fn drain(&self, mode: DrainMode) -> Result<(), EngineError> {
        if self.context.is_input() {
            return Ok(());
        }
        let wait = drain_duration(self.context.buffer_size_frames(), self.context.sample_rate());
        tracing::debug!(?mode, wait_us = wait.as_micros() as u64, "draining");
        std::thread::sleep(wait);
        Ok(())
    }

    /// Pausing keeps devices open; nothing to do at this layer.
    ///
    /// # Errors
    ///
    /// Infallible.
    pub fn pause(&self) -> Result<(), EngineError> {
        tracing::trace!("pause");
        Ok(())
    }

    /// No host-side buffering to discard; nothing to do at this layer.
    ///
    /// # Errors
    ///
    /// Infallible.
    pub fn flush(&self) -> Result<(), EngineError> {
        tracing::trace!("flush");
        Ok(())
    }

    /// Stops workers and releases every device. The stream can be started again.
    pub fn standby(&mut self) {
        self.teardown();
    }

    /// Same as [`standby`](Self::standby); called when the stream is closed.
    pub fn shutdown(&mut self) {
        self.teardown();
    }

    /// Sets the output gain. Non-finite or negative values are ignored.
    pub fn set_gain(&self, gain: f32) {
        self.gain.set(gain);
    }

    /// Current output gain.
    pub fn gain(&self) -> f32 {
        self.gain.get()
    }

    /// Returns a handle for changing the gain from another thread.
    pub fn gain_control(&self) -> GainControl {
        self.gain.clone()
    }

    /// Whether devices are currently bound.
    pub fn state(&self) -> StreamState {
        if matches!(self.bindings, Bindings::Idle) {
            StreamState::Idle
        } else {
            StreamState::Active
        }
    }

    /// Number of devices currently bound.
    pub fn device_count(&self) -> usize {
        self.bindings.devices().len()
    }

    /// Returns counters accumulated since the engine was built.
    pub fn stats(&self) -> EngineStats {
        self.state.stats()
    }

    /// Stream description.
    pub fn context(&self) -> &StreamContext {
        &self.context
    }

    fn teardown(&mut self) {
        if matches!(self.bindings, Bindings::Idle) && self.workers.is_empty() {
            return;
        }
        self.state.set_running(false);

        let bindings = std::mem::replace(&mut self.bindings, Bindings::Idle);
        if let Bindings::Capture(binding) = &bindings {
            tracing::debug!(device = %binding.id, "shutting down capture pipe");
            binding.pipe.shutdown(true);
        }

        tracing::debug!("stopping devices");
        for device in bindings.devices() {
            device.stop();
        }

        tracing::debug!(workers = self.workers.len(), "joining workers");
        for worker in self.workers.drain(..) {
            worker.join();
        }

        tracing::debug!("releasing devices");
        drop(bindings);
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Folds an unsigned hardware frame counter into the signed position range.
///
/// Counters above `i64::MAX` have `i64::MAX` subtracted once. `u64::MAX`,
/// which would still overflow, saturates to `i64::MAX`.
pub(crate) fn fold_hardware_frames(frames: u64) -> i64 {
    let max = i64::MAX as u64;
    let folded = if frames > max { frames - max } else { frames };
    i64::try_from(folded).unwrap_or(i64::MAX)
}

/// Time to play `frames` at `sample_rate`, rounded to the nearest microsecond.
pub(crate) fn drain_duration(frames: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let rate = u128::from(sample_rate);
    let micros = (frames as u128 * 1_000_000 + rate / 2) / rate;
    Duration::from_micros(u64::try_from(micros).unwrap_or(u64::MAX))
}
