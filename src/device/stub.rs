//! Null device that keeps real-time pace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{
    CapturePosition, DeviceOpener, DeviceProfile, DeviceProxy, OpenMode, PresentationPosition,
};
use crate::context::frames_to_duration;
use crate::{DeviceError, PcmConfig};

/// A device without hardware behind it.
///
/// Output is discarded, capture produces deterministic pseudo-random noise,
/// and every transfer is paced so the stream advances at its nominal rate.
/// Useful for running a stream end-to-end on machines without audio
/// hardware.
pub struct StubDevice {
    name: String,
    config: PcmConfig,
    stopped: AtomicBool,
    started: Instant,
    state: Mutex<StubState>,
}

struct StubState {
    clock: Option<Instant>,
    frames_since_start: u64,
    transferred_frames: i64,
    seed: u32,
}

impl StubDevice {
    /// Opens a stub device with the negotiated config.
    pub fn new(name: impl Into<String>, config: PcmConfig) -> Self {
        Self {
            name: name.into(),
            config,
            stopped: AtomicBool::new(false),
            started: Instant::now(),
            state: Mutex::new(StubState {
                clock: None,
                frames_since_start: 0,
                transferred_frames: 0,
                seed: 12345,
            }),
        }
    }

    fn buffer_duration(&self) -> Duration {
        frames_to_duration(self.config.buffer_size_frames as u64, self.config.sample_rate)
    }

    fn check_running(&self) -> Result<(), DeviceError> {
        if self.stopped.load(Ordering::Acquire) {
            Err(DeviceError::Stopped)
        } else {
            Ok(())
        }
    }

    /// Sleeps until the stream clock catches up with the frames transferred
    /// so far. A single sleep never exceeds one buffer duration.
    fn pace(&self, state: &mut StubState, frames: usize) {
        let clock = *state.clock.get_or_insert_with(Instant::now);
        state.frames_since_start += frames as u64;
        state.transferred_frames += frames as i64;

        let expected = frames_to_duration(state.frames_since_start, self.config.sample_rate);
        let elapsed = clock.elapsed();
        if expected > elapsed {
            std::thread::sleep((expected - elapsed).min(self.buffer_duration()));
        }
    }

    fn now_ns(&self) -> i64 {
        i64::try_from(self.started.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }
}

impl DeviceProxy for StubDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, buf: &mut [u8]) -> Result<(), DeviceError> {
        self.check_running()?;
        let mut state = self.state.lock();
        // Simple LCG for deterministic "random" noise
        for byte in buf.iter_mut() {
            state.seed = state.seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            *byte = (state.seed >> 16) as u8;
        }
        self.pace(&mut state, buf.len() / self.config.frame_size());
        Ok(())
    }

    fn write(&self, buf: &[u8]) -> Result<(), DeviceError> {
        self.check_running()?;
        let mut state = self.state.lock();
        self.pace(&mut state, buf.len() / self.config.frame_size());
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    fn latency_ms(&self) -> u32 {
        u32::try_from(self.buffer_duration().as_millis()).unwrap_or(u32::MAX)
    }

    fn capture_position(&self) -> Result<CapturePosition, DeviceError> {
        Ok(CapturePosition {
            frames: self.state.lock().transferred_frames,
            time_ns: self.now_ns(),
        })
    }

    fn presentation_position(&self) -> Result<PresentationPosition, DeviceError> {
        Ok(PresentationPosition {
            frames: self.state.lock().transferred_frames.max(0) as u64,
            time_ns: self.now_ns(),
        })
    }

    fn reset_transferred_frames(&self, frames: i64) {
        self.state.lock().transferred_frames = frames;
    }
}

/// Opener that binds every profile to a [`StubDevice`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StubOpener;

impl DeviceOpener for StubOpener {
    fn open(
        &self,
        profile: &DeviceProfile,
        config: &PcmConfig,
        mode: OpenMode,
    ) -> Result<Arc<dyn DeviceProxy>, DeviceError> {
        tracing::debug!(device = %profile.id, ?mode, "opening stub device");
        Ok(Arc::new(StubDevice::new(profile.id.as_str(), *config)))
    }
}
