//! Frame-granular ring pipe between the client thread and a device worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::PipeError;

/// Creates a pipe holding `capacity_frames` frames of `frame_size` bytes.
///
/// The pipe is single-producer/single-consumer: the [`PipeWriter`] and
/// [`PipeReader`] may live on different threads. Every transfer moves whole
/// frames; trailing bytes that do not form a frame are ignored.
///
/// # Panics
///
/// Panics if `capacity_frames` or `frame_size` is zero.
///
/// # Example
///
/// ```
/// use pcm_bridge::ring_pipe;
///
/// let (mut writer, mut reader) = ring_pipe(4, 2);
/// assert_eq!(writer.write(&[1, 0, 2, 0, 3]), 2); // odd trailing byte ignored
///
/// let mut buf = [0u8; 8];
/// assert_eq!(reader.read(&mut buf), 2);
/// assert_eq!(&buf[..4], &[1, 0, 2, 0]);
/// ```
pub fn ring_pipe(capacity_frames: usize, frame_size: usize) -> (PipeWriter, PipeReader) {
    assert!(capacity_frames > 0, "pipe capacity must be non-zero");
    assert!(frame_size > 0, "frame size must be non-zero");

    let (producer, consumer) = HeapRb::<u8>::new(capacity_frames * frame_size).split();
    let shared = Arc::new(PipeShared {
        frame_size,
        capacity_frames,
        shutdown: AtomicBool::new(false),
        drain_on_shutdown: AtomicBool::new(false),
        lock: Mutex::new(()),
        readable: Condvar::new(),
        writable: Condvar::new(),
    });

    (
        PipeWriter {
            producer,
            shared: shared.clone(),
        },
        PipeReader { consumer, shared },
    )
}

struct PipeShared {
    frame_size: usize,
    capacity_frames: usize,
    shutdown: AtomicBool,
    drain_on_shutdown: AtomicBool,
    // Guards condvar waits only; frame data goes through the lock-free ring.
    lock: Mutex<()>,
    readable: Condvar,
    writable: Condvar,
}

impl PipeShared {
    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn notify_readable(&self) {
        let _guard = self.lock.lock();
        self.readable.notify_all();
    }

    fn notify_writable(&self) {
        let _guard = self.lock.lock();
        self.writable.notify_all();
    }

    fn shutdown(&self, drain_first: bool) {
        self.drain_on_shutdown.store(drain_first, Ordering::Release);
        self.shutdown.store(true, Ordering::Release);
        let _guard = self.lock.lock();
        self.readable.notify_all();
        self.writable.notify_all();
    }
}

/// Handle that can shut a pipe down from any thread.
#[derive(Clone)]
pub struct PipeControl {
    shared: Arc<PipeShared>,
}

impl PipeControl {
    /// Shuts the pipe down and wakes every blocked reader and writer.
    ///
    /// Later writes are refused. With `drain_first`, the reader can still
    /// take what was buffered; otherwise reads return nothing.
    pub fn shutdown(&self, drain_first: bool) {
        self.shared.shutdown(drain_first);
    }

    /// Returns `true` once the pipe has been shut down.
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }
}

impl std::fmt::Debug for PipeControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeControl")
            .field("capacity_frames", &self.shared.capacity_frames)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Writing end of a pipe.
pub struct PipeWriter {
    producer: HeapProd<u8>,
    shared: Arc<PipeShared>,
}

impl PipeWriter {
    /// Writes as many whole frames of `data` as fit, without blocking.
    ///
    /// Returns the number of frames accepted; 0 after shutdown.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if self.shared.is_shutdown() {
            return 0;
        }
        let frame_size = self.shared.frame_size;
        let frames = (data.len() / frame_size).min(self.producer.vacant_len() / frame_size);
        if frames == 0 {
            return 0;
        }
        let pushed = self.producer.push_slice(&data[..frames * frame_size]);
        debug_assert_eq!(pushed, frames * frame_size);
        self.shared.notify_readable();
        frames
    }

    /// Writes at least one frame of `data`, waiting for space if the pipe is
    /// full.
    ///
    /// Each wait lasts at most `wait_slice`; space and shutdown are re-checked
    /// after every slice. Returns the number of frames accepted, which is 0
    /// only when `data` holds less than one frame.
    ///
    /// # Errors
    ///
    /// Returns [`PipeError::Shutdown`] if the pipe is (or gets) shut down.
    pub fn write_blocking(
        &mut self,
        data: &[u8],
        wait_slice: Duration,
    ) -> Result<usize, PipeError> {
        let frame_size = self.shared.frame_size;
        loop {
            if self.shared.is_shutdown() {
                return Err(PipeError::Shutdown);
            }
            let frames = self.write(data);
            if frames > 0 || data.len() < frame_size {
                return Ok(frames);
            }
            let mut guard = self.shared.lock.lock();
            if !self.shared.is_shutdown() && self.producer.vacant_len() < frame_size {
                self.shared.writable.wait_for(&mut guard, wait_slice);
            }
        }
    }

    /// Whole frames of free space.
    pub fn vacant_frames(&self) -> usize {
        self.producer.vacant_len() / self.shared.frame_size
    }

    /// Capacity in frames, fixed at creation.
    pub fn capacity_frames(&self) -> usize {
        self.shared.capacity_frames
    }

    /// Returns a shutdown handle for this pipe.
    pub fn control(&self) -> PipeControl {
        PipeControl {
            shared: self.shared.clone(),
        }
    }
}

/// Reading end of a pipe.
pub struct PipeReader {
    consumer: HeapCons<u8>,
    shared: Arc<PipeShared>,
}

impl PipeReader {
    /// Reads as many whole frames as fit in `buf`, without blocking.
    ///
    /// Returns the number of frames read. After a shutdown without draining
    /// this always returns 0.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        if self.shared.is_shutdown() && !self.shared.drain_on_shutdown.load(Ordering::Acquire) {
            return 0;
        }
        let frame_size = self.shared.frame_size;
        let frames = (buf.len() / frame_size).min(self.available_frames());
        if frames == 0 {
            return 0;
        }
        let popped = self.consumer.pop_slice(&mut buf[..frames * frame_size]);
        debug_assert_eq!(popped, frames * frame_size);
        self.shared.notify_writable();
        frames
    }

    /// Waits up to `timeout` for at least one frame to become readable.
    ///
    /// Returns `true` if a frame is available. Returns early with `false`
    /// once the pipe is shut down and empty.
    pub fn wait_readable(&self, timeout: Duration) -> bool {
        if self.available_frames() > 0 {
            return true;
        }
        let mut guard = self.shared.lock.lock();
        if self.available_frames() == 0 && !self.shared.is_shutdown() {
            self.shared.readable.wait_for(&mut guard, timeout);
        }
        self.available_frames() > 0
    }

    /// Whole frames currently buffered.
    pub fn available_frames(&self) -> usize {
        self.consumer.occupied_len() / self.shared.frame_size
    }

    /// Capacity in frames, fixed at creation.
    pub fn capacity_frames(&self) -> usize {
        self.shared.capacity_frames
    }

    /// Returns a shutdown handle for this pipe.
    pub fn control(&self) -> PipeControl {
        PipeControl {
            shared: self.shared.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_write_accepts_whole_frames_only() {
        let (mut writer, reader) = ring_pipe(4, 4);
        assert_eq!(writer.write(&[0; 10]), 2);
        assert_eq!(reader.available_frames(), 2);
        assert_eq!(writer.vacant_frames(), 2);
    }

    #[test]
    fn test_write_stops_at_capacity() {
        let (mut writer, reader) = ring_pipe(3, 2);
        assert_eq!(writer.write(&[1; 10]), 3);
        assert_eq!(writer.write(&[1; 2]), 0);
        assert_eq!(reader.available_frames(), 3);
        assert_eq!(reader.capacity_frames(), 3);
    }

    #[test]
    fn test_read_preserves_fifo_order() {
        let (mut writer, mut reader) = ring_pipe(8, 2);
        writer.write(&[1, 1, 2, 2]);
        writer.write(&[3, 3]);

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf), 2);
        assert_eq!(buf, [1, 1, 2, 2]);
        assert_eq!(reader.read(&mut buf), 1);
        assert_eq!(&buf[..2], &[3, 3]);
        assert_eq!(reader.read(&mut buf), 0);
    }

    #[test]
    fn test_shutdown_refuses_writes() {
        let (mut writer, _reader) = ring_pipe(4, 2);
        writer.control().shutdown(true);
        assert_eq!(writer.write(&[0; 4]), 0);
        assert_eq!(
            writer.write_blocking(&[0; 4], Duration::from_millis(1)),
            Err(PipeError::Shutdown)
        );
    }

    #[test]
    fn test_shutdown_drain_first() {
        let (mut writer, mut reader) = ring_pipe(4, 2);
        writer.write(&[5; 4]);
        reader.control().shutdown(true);

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf), 2);
    }

    #[test]
    fn test_shutdown_without_drain_discards() {
        let (mut writer, mut reader) = ring_pipe(4, 2);
        writer.write(&[5; 4]);
        reader.control().shutdown(false);

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf), 0);
    }

    #[test]
    fn test_write_blocking_waits_for_reader() {
        let (mut writer, mut reader) = ring_pipe(2, 2);
        writer.write(&[0; 4]);

        let handle = std::thread::spawn(move || {
            writer.write_blocking(&[9; 4], Duration::from_millis(10))
        });
        std::thread::sleep(Duration::from_millis(20));

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf), 2);
        assert!(handle.join().unwrap().unwrap() >= 1);
    }

    #[test]
    fn test_shutdown_releases_blocked_writer() {
        let (mut writer, reader) = ring_pipe(1, 2);
        writer.write(&[0; 2]);
        let control = reader.control();

        let handle = std::thread::spawn(move || {
            writer.write_blocking(&[1; 2], Duration::from_secs(5))
        });
        std::thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        control.shutdown(true);
        assert_eq!(handle.join().unwrap(), Err(PipeError::Shutdown));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wait_readable_wakes_on_write() {
        let (mut writer, reader) = ring_pipe(4, 2);
        let handle = std::thread::spawn(move || reader.wait_readable(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        writer.write(&[1; 2]);
        assert!(handle.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wait_readable_times_out() {
        let (_writer, reader) = ring_pipe(4, 2);
        assert!(!reader.wait_readable(Duration::from_millis(5)));
    }
}
