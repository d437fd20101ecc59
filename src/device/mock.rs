//! Mock device for testing without hardware.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{CapturePosition, DeviceProxy, PresentationPosition};
use crate::DeviceError;

/// How long a failing mock transfer takes, so a worker hitting it does not spin.
const FAILURE_DELAY: Duration = Duration::from_millis(1);

/// An in-memory device that records playback and replays queued capture data.
///
/// This allows testing the full engine without requiring actual audio
/// hardware, making it suitable for CI environments. Failures, latency and
/// positions can be scripted from the test while the engine is running.
///
/// # Example
///
/// ```
/// use pcm_bridge::{DeviceProxy, MockDevice};
///
/// let mock = MockDevice::new("speaker", 4);
/// mock.write(&[1, 2, 3, 4]).unwrap();
/// assert_eq!(mock.written(), vec![1, 2, 3, 4]);
/// assert_eq!(mock.written_frames(), 1);
///
/// mock.push_capture(&[9; 8]);
/// let mut buf = [0u8; 8];
/// mock.read(&mut buf).unwrap();
/// assert_eq!(buf, [9; 8]);
/// ```
pub struct MockDevice {
    name: String,
    frame_size: usize,
    created: Instant,
    state: Mutex<MockState>,
    data_ready: Condvar,
}

#[derive(Default)]
struct MockState {
    written: Vec<u8>,
    capture: VecDeque<u8>,
    stopped: bool,
    stop_calls: usize,
    fail_reads: bool,
    fail_writes: bool,
    fail_positions: bool,
    read_attempts: usize,
    write_attempts: usize,
    latency_ms: u32,
    transferred_frames: i64,
    presentation_frames: Option<u64>,
    resets: Vec<i64>,
}

impl MockDevice {
    /// Creates a mock device transferring frames of `frame_size` bytes.
    pub fn new(name: impl Into<String>, frame_size: usize) -> Self {
        Self {
            name: name.into(),
            frame_size: frame_size.max(1),
            created: Instant::now(),
            state: Mutex::new(MockState::default()),
            data_ready: Condvar::new(),
        }
    }

    /// Sets the latency reported by [`DeviceProxy::latency_ms`].
    #[must_use]
    pub fn with_latency_ms(self, latency_ms: u32) -> Self {
        self.state.lock().latency_ms = latency_ms;
        self
    }

    /// Queues bytes to be returned by subsequent reads.
    pub fn push_capture(&self, bytes: &[u8]) {
        let mut state = self.state.lock();
        state.capture.extend(bytes.iter().copied());
        self.data_ready.notify_all();
    }

    /// Returns a copy of every byte written so far.
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// Number of whole frames written so far.
    pub fn written_frames(&self) -> usize {
        self.state.lock().written.len() / self.frame_size
    }

    /// Makes every read fail with a transient error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Makes every write fail with a transient error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Makes position queries fail.
    pub fn set_fail_positions(&self, fail: bool) {
        self.state.lock().fail_positions = fail;
    }

    /// Changes the reported latency.
    pub fn set_latency_ms(&self, latency_ms: u32) {
        self.state.lock().latency_ms = latency_ms;
    }

    /// Overrides the raw presentation frame counter.
    pub fn set_presentation_frames(&self, frames: u64) {
        self.state.lock().presentation_frames = Some(frames);
    }

    /// Returns `true` once [`DeviceProxy::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Number of times the device was stopped.
    pub fn stop_calls(&self) -> usize {
        self.state.lock().stop_calls
    }

    /// Number of read attempts, including failed ones.
    pub fn read_attempts(&self) -> usize {
        self.state.lock().read_attempts
    }

    /// Number of write attempts, including failed ones.
    pub fn write_attempts(&self) -> usize {
        self.state.lock().write_attempts
    }

    /// Baselines passed to [`DeviceProxy::reset_transferred_frames`], in order.
    pub fn resets(&self) -> Vec<i64> {
        self.state.lock().resets.clone()
    }

    fn now_ns(&self) -> i64 {
        i64::try_from(self.created.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }
}

impl DeviceProxy for MockDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, buf: &mut [u8]) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.read_attempts += 1;
        if state.fail_reads {
            drop(state);
            std::thread::sleep(FAILURE_DELAY);
            return Err(DeviceError::transient("mock read failure"));
        }
        while !state.stopped && state.capture.len() < buf.len() {
            self.data_ready.wait(&mut state);
        }
        if state.stopped {
            return Err(DeviceError::Stopped);
        }
        let len = buf.len();
        for (dst, src) in buf.iter_mut().zip(state.capture.drain(..len)) {
            *dst = src;
        }
        state.transferred_frames += (buf.len() / self.frame_size) as i64;
        Ok(())
    }

    fn write(&self, buf: &[u8]) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.write_attempts += 1;
        if state.stopped {
            return Err(DeviceError::Stopped);
        }
        if state.fail_writes {
            drop(state);
            std::thread::sleep(FAILURE_DELAY);
            return Err(DeviceError::transient("mock write failure"));
        }
        state.written.extend_from_slice(buf);
        state.transferred_frames += (buf.len() / self.frame_size) as i64;
        Ok(())
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        state.stop_calls += 1;
        self.data_ready.notify_all();
    }

    fn latency_ms(&self) -> u32 {
        self.state.lock().latency_ms
    }

    fn capture_position(&self) -> Result<CapturePosition, DeviceError> {
        let state = self.state.lock();
        if state.fail_positions {
            return Err(DeviceError::position_unavailable("mock position failure"));
        }
        Ok(CapturePosition {
            frames: state.transferred_frames,
            time_ns: self.now_ns(),
        })
    }

    fn presentation_position(&self) -> Result<PresentationPosition, DeviceError> {
        let state = self.state.lock();
        if state.fail_positions {
            return Err(DeviceError::position_unavailable("mock position failure"));
        }
        let frames = state
            .presentation_frames
            .unwrap_or_else(|| state.transferred_frames.max(0) as u64);
        Ok(PresentationPosition {
            frames,
            time_ns: self.now_ns(),
        })
    }

    fn reset_transferred_frames(&self, frames: i64) {
        let mut state = self.state.lock();
        state.transferred_frames = frames;
        state.resets.push(frames);
    }
}
