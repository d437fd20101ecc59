//! Engine tuning knobs.

use std::time::Duration;

/// Bounded-retry policy for hardware reads and writes.
///
/// A transfer is attempted at most `attempts` times, sleeping `delay`
/// between attempts. Only transient errors are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(1),
        }
    }
}

/// Configuration for engine behavior.
///
/// Use [`EngineConfig::default()`] for sensible defaults, or customize as needed.
///
/// # Example
///
/// ```
/// use pcm_bridge::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig {
///     output_idle_wait: Duration::from_micros(500),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of attempts for each hardware read/write.
    ///
    /// Default: 3
    pub device_retry_attempts: u32,

    /// Delay between hardware read/write attempts.
    ///
    /// Default: 1ms
    pub device_retry_delay: Duration,

    /// How long an output worker waits for data when its pipe is empty.
    ///
    /// The wait ends early as soon as the client writes into the pipe.
    /// Default: 1ms
    pub output_idle_wait: Duration,

    /// Upper bound of a single blocking-write wait slice on a full pipe.
    ///
    /// The writer re-checks for space and shutdown after every slice.
    /// Default: 10ms
    pub pipe_write_wait: Duration,

    /// Prefix for worker thread names (`<prefix>-in-<idx>`, `<prefix>-out-<idx>`).
    ///
    /// Default: `"pcm"`
    pub worker_name_prefix: String,
}

impl EngineConfig {
    /// Returns the retry policy for device transfers.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.device_retry_attempts.max(1),
            delay: self.device_retry_delay,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_retry_attempts: 3,
            device_retry_delay: Duration::from_millis(1),
            output_idle_wait: Duration::from_millis(1),
            pipe_write_wait: Duration::from_millis(10),
            worker_name_prefix: "pcm".to_string(),
        }
    }
}
