//! Device handles and the functions that open them.
//!
//! The engine only ever talks to hardware through [`DeviceProxy`]. Devices
//! are created by a [`DeviceOpener`] from a [`DeviceProfile`] and the
//! negotiated [`PcmConfig`], and are released by dropping the last handle.

#[cfg(feature = "hardware")]
mod cpal_device;
mod mock;
mod profile;
mod stub;

#[cfg(feature = "hardware")]
pub use cpal_device::{list_output_devices, CpalDevice, CpalOpener};
pub use mock::MockDevice;
pub use profile::{DeviceId, DeviceProfile};
pub use stub::{StubDevice, StubOpener};

use std::sync::Arc;

use crate::{DeviceError, PcmConfig, RetryPolicy};

/// How a device must be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Built-in device; the buffer size is a request the device should honor.
    Attached {
        /// Desired hardware buffer size in frames.
        buffer_size_frames: usize,
    },
    /// Hot-pluggable device; the opener must reject configurations the
    /// device cannot play exactly.
    External {
        /// Whether a near-match is unacceptable.
        require_exact_match: bool,
    },
}

impl OpenMode {
    /// Picks the open mode for a profile.
    pub fn for_profile(profile: &DeviceProfile, config: &PcmConfig) -> Self {
        if profile.is_external {
            Self::External {
                require_exact_match: true,
            }
        } else {
            Self::Attached {
                buffer_size_frames: config.buffer_size_frames,
            }
        }
    }
}

/// Capture position reported by an input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapturePosition {
    /// Frames captured, offset-corrected against the last reset.
    pub frames: i64,
    /// Monotonic timestamp of the measurement in nanoseconds.
    pub time_ns: i64,
}

/// Presentation position reported by an output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresentationPosition {
    /// Frames presented, in raw hardware units.
    pub frames: u64,
    /// Monotonic timestamp of the measurement in nanoseconds.
    pub time_ns: i64,
}

/// Handle to one physical playback or capture device.
///
/// All methods take `&self`: the engine shares a device between its worker
/// (transfers) and the client thread (stop, latency and position queries),
/// so implementations use interior mutability.
///
/// `read` and `write` transfer whole buffers. They must return in finite
/// time after [`stop`](Self::stop) has been called, typically with
/// [`DeviceError::Stopped`].
pub trait DeviceProxy: Send + Sync {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Fills `buf` with captured bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] if the hardware read failed.
    fn read(&self, buf: &mut [u8]) -> Result<(), DeviceError>;

    /// Plays all bytes of `buf`.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] if the hardware write failed.
    fn write(&self, buf: &[u8]) -> Result<(), DeviceError>;

    /// Stops the hardware. Pending and later transfers fail promptly.
    fn stop(&self);

    /// Most recent hardware latency in milliseconds.
    fn latency_ms(&self) -> u32;

    /// Queries the capture position.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] if the device cannot report a position.
    fn capture_position(&self) -> Result<CapturePosition, DeviceError>;

    /// Queries the presentation position.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] if the device cannot report a position.
    fn presentation_position(&self) -> Result<PresentationPosition, DeviceError>;

    /// Sets the device's "frames transferred" baseline to the caller's
    /// running total so later position queries are expressed in stream frames.
    fn reset_transferred_frames(&self, frames: i64);

    /// Reads with bounded retries on transient errors.
    ///
    /// # Errors
    ///
    /// Returns the last error once the policy is exhausted, or the first
    /// non-transient error.
    fn read_with_retries(&self, buf: &mut [u8], policy: RetryPolicy) -> Result<(), DeviceError> {
        with_retries(policy, || self.read(buf))
    }

    /// Writes with bounded retries on transient errors.
    ///
    /// # Errors
    ///
    /// Returns the last error once the policy is exhausted, or the first
    /// non-transient error.
    fn write_with_retries(&self, buf: &[u8], policy: RetryPolicy) -> Result<(), DeviceError> {
        with_retries(policy, || self.write(buf))
    }
}

fn with_retries(
    policy: RetryPolicy,
    mut op: impl FnMut() -> Result<(), DeviceError>,
) -> Result<(), DeviceError> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < policy.attempts => {
                tracing::trace!(attempt, error = %e, "retrying device transfer");
                attempt += 1;
                if !policy.delay.is_zero() {
                    std::thread::sleep(policy.delay);
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Opens devices for a stream.
///
/// Closures with the same signature implement this trait:
///
/// ```
/// use std::sync::Arc;
/// use pcm_bridge::{DeviceProfile, DeviceProxy, MockDevice, OpenMode, PcmConfig, DeviceError};
///
/// let opener = |profile: &DeviceProfile, config: &PcmConfig, _mode: OpenMode| {
///     let device: Arc<dyn DeviceProxy> =
///         Arc::new(MockDevice::new(profile.id.as_str(), config.frame_size()));
///     Ok::<_, DeviceError>(device)
/// };
/// # let _ = opener;
/// ```
pub trait DeviceOpener: Send + Sync {
    /// Opens the device described by `profile` with the negotiated config.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::OpenFailed`] (or any other error) if the device
    /// cannot be opened as requested.
    fn open(
        &self,
        profile: &DeviceProfile,
        config: &PcmConfig,
        mode: OpenMode,
    ) -> Result<Arc<dyn DeviceProxy>, DeviceError>;
}

impl<F> DeviceOpener for F
where
    F: Fn(&DeviceProfile, &PcmConfig, OpenMode) -> Result<Arc<dyn DeviceProxy>, DeviceError>
        + Send
        + Sync,
{
    fn open(
        &self,
        profile: &DeviceProfile,
        config: &PcmConfig,
        mode: OpenMode,
    ) -> Result<Arc<dyn DeviceProxy>, DeviceError> {
        self(profile, config, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Direction, SampleFormat};
    use std::cell::Cell;
    use std::time::Duration;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_retries_transient_errors() {
        let calls = Cell::new(0);
        let result = with_retries(policy(3), || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(DeviceError::transient("xrun"))
            } else {
                Ok(())
            }
        });
        assert!(result.is_ok());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_bound() {
        let calls = Cell::new(0);
        let result = with_retries(policy(3), || {
            calls.set(calls.get() + 1);
            Err(DeviceError::transient("xrun"))
        });
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_no_retry_after_stop() {
        let calls = Cell::new(0);
        let result = with_retries(policy(3), || {
            calls.set(calls.get() + 1);
            Err(DeviceError::Stopped)
        });
        assert_eq!(result, Err(DeviceError::Stopped));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_open_mode_for_profile() {
        let config = PcmConfig {
            channels: 2,
            sample_rate: 48000,
            format: SampleFormat::I16,
            buffer_size_frames: 960,
        };
        let attached = DeviceProfile::attached(0, 0, Direction::Output);
        assert_eq!(
            OpenMode::for_profile(&attached, &config),
            OpenMode::Attached {
                buffer_size_frames: 960
            }
        );
        let external = DeviceProfile::external(1, 0, Direction::Output);
        assert_eq!(
            OpenMode::for_profile(&external, &config),
            OpenMode::External {
                require_exact_match: true
            }
        );
    }

    #[test]
    fn test_closure_opener() {
        let opener = |profile: &DeviceProfile, config: &PcmConfig, _: OpenMode| {
            let device: Arc<dyn DeviceProxy> =
                Arc::new(MockDevice::new(profile.id.as_str(), config.frame_size()));
            Ok::<_, DeviceError>(device)
        };
        let config = PcmConfig {
            channels: 1,
            sample_rate: 16000,
            format: SampleFormat::I16,
            buffer_size_frames: 160,
        };
        let profile = DeviceProfile::attached(0, 0, Direction::Input);
        let device = opener
            .open(&profile, &config, OpenMode::for_profile(&profile, &config))
            .unwrap();
        assert_eq!(device.name(), "hw:0,0");
    }
}
