//! Error types for pcm-bridge.
//!
//! Errors are split into three layers:
//! - **Engine errors** ([`EngineError`]): returned to the client by stream operations
//! - **Device errors** ([`DeviceError`]): reported by a [`DeviceProxy`](crate::DeviceProxy);
//!   while streaming they are logged and surfaced as events, never escalated
//! - **Pipe errors** ([`PipeError`]): a pipe was shut down under a blocked reader or writer

/// Errors returned by [`StreamEngine`](crate::StreamEngine) operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No usable device could be opened, or the stream configuration is unusable.
    ///
    /// No partial state is retained when this is returned from `start`.
    #[error("stream not initialized: {reason}")]
    NotInitialized {
        /// Why the stream could not be initialized.
        reason: String,
    },

    /// A position or latency query failed against an open device.
    ///
    /// The caller's position value is left untouched.
    #[error("invalid operation: {reason}")]
    InvalidOperation {
        /// Description of the failed query.
        reason: String,
    },

    /// The OS refused to spawn an I/O worker thread.
    #[error("failed to spawn worker for device '{device}': {source}")]
    WorkerSpawn {
        /// Name of the device whose worker could not be started.
        device: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub(crate) fn not_initialized(reason: impl Into<String>) -> Self {
        Self::NotInitialized {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_operation(reason: impl Into<String>) -> Self {
        Self::InvalidOperation {
            reason: reason.into(),
        }
    }
}

/// Errors reported by a device proxy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// A hardware transfer failed but may succeed if retried.
    #[error("transient device error: {reason}")]
    Transient {
        /// Description of what went wrong.
        reason: String,
    },

    /// The device was stopped; transfers will keep failing until it is reopened.
    #[error("device stopped")]
    Stopped,

    /// The device could not be opened with the requested configuration.
    #[error("failed to open device '{device}': {reason}")]
    OpenFailed {
        /// Name of the device.
        device: String,
        /// Why the open failed.
        reason: String,
    },

    /// The device cannot report a position right now.
    #[error("position unavailable: {reason}")]
    PositionUnavailable {
        /// Why the position is unavailable.
        reason: String,
    },

    /// Custom error for user-implemented devices.
    #[error("{0}")]
    Custom(String),
}

impl DeviceError {
    /// Creates a transient error with the given reason.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    /// Creates an open failure for the given device.
    pub fn open_failed(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OpenFailed {
            device: device.into(),
            reason: reason.into(),
        }
    }

    /// Creates a position-unavailable error.
    pub fn position_unavailable(reason: impl Into<String>) -> Self {
        Self::PositionUnavailable {
            reason: reason.into(),
        }
    }

    /// Creates a custom device error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Returns `true` if retrying the same transfer may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Errors returned by blocking pipe operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PipeError {
    /// The pipe was shut down; no further frames will be accepted.
    #[error("pipe shut down")]
    Shutdown,
}
