//! Runtime events for monitoring stream health.
//!
//! Events are non-fatal notifications about stream behavior. The stream
//! keeps running after events are emitted; they're for logging/metrics,
//! not error handling.

use std::sync::Arc;

use crate::device::DeviceId;

/// Runtime events emitted while a stream is active.
///
/// Events are emitted from the client thread (`transfer`) and from the
/// per-device I/O workers, so callbacks must be cheap and thread-safe.
/// Device errors observed after the stream started tearing down are
/// expected and never reported.
///
/// # Example
///
/// ```
/// use pcm_bridge::StreamEvent;
///
/// fn handle_event(event: StreamEvent) {
///     match event {
///         StreamEvent::FramesDropped { device, frames } => {
///             eprintln!("{device}: dropped {frames} frames");
///         }
///         StreamEvent::SilenceInserted { frames } => {
///             eprintln!("capture underrun: {frames} frames of silence");
///         }
///         StreamEvent::DeviceError { device, error } => {
///             eprintln!("{device}: {error}");
///         }
///         StreamEvent::WorkerStarted { device } | StreamEvent::WorkerStopped { device } => {
///             eprintln!("worker state changed for {device}");
///         }
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A device pipe could not accept the full output chunk.
    ///
    /// The device consumer fell behind; the remainder of the chunk was
    /// dropped for this device only.
    FramesDropped {
        /// Device whose pipe was full.
        device: DeviceId,
        /// Number of frames that were dropped.
        frames: usize,
    },

    /// The capture pipe held fewer frames than requested and the tail of the
    /// client buffer was zero-filled.
    SilenceInserted {
        /// Number of silent frames inserted.
        frames: usize,
    },

    /// A hardware read or write failed after exhausting its retries.
    ///
    /// The affected chunk is lost (output) or replaced by silence (input);
    /// other devices are unaffected.
    DeviceError {
        /// Device that failed.
        device: DeviceId,
        /// Description of the error.
        error: String,
    },

    /// An I/O worker thread started pumping frames for a device.
    WorkerStarted {
        /// Device served by the worker.
        device: DeviceId,
    },

    /// An I/O worker thread exited.
    WorkerStopped {
        /// Device served by the worker.
        device: DeviceId,
    },
}

/// Callback type for receiving runtime events.
///
/// Register an event callback via [`StreamEngineBuilder::on_event()`].
///
/// [`StreamEngineBuilder::on_event()`]: crate::StreamEngineBuilder::on_event
pub type EventCallback = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use pcm_bridge::{event_callback, StreamEvent};
///
/// let callback = event_callback(|event: StreamEvent| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(StreamEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}
