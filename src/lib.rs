//! # pcm-bridge
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Decoupled PCM transport between a stream endpoint and its audio devices.
//!
//! A client thread hands audio to (or takes audio from) a [`StreamEngine`]
//! in bursts, while every physical device is fed on its own cadence by a
//! dedicated worker thread. Output is fanned out to all bound devices with
//! per-device failure isolation; input binds a single device and pads
//! underruns with silence.
//!
//! ## Quick Start
//!
//! ```rust
//! use pcm_bridge::{
//!     ChannelLayout, DeviceProfile, Direction, SampleFormat, StreamContext, StreamEngine,
//! };
//!
//! # fn main() -> Result<(), pcm_bridge::EngineError> {
//! let context = StreamContext::new(
//!     Direction::Output,
//!     48000,
//!     ChannelLayout::Stereo,
//!     SampleFormat::I16,
//!     480,
//! );
//!
//! let mut engine = StreamEngine::builder(context)
//!     .device(DeviceProfile::attached(0, 0, Direction::Output))
//!     .device(DeviceProfile::from_address("usb:CARD_1_DEV_0", Direction::Output, true))
//!     .on_event(|e| tracing::warn!(?e, "stream event"))
//!     .build()?;
//!
//! engine.start()?;
//! engine.set_gain(0.5);
//!
//! let mut chunk = vec![0u8; 480 * 4];
//! for _ in 0..3 {
//!     engine.transfer(&mut chunk, 480)?;
//! }
//!
//! engine.standby();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The crate maintains a strict thread boundary:
//!
//! - **Client thread**: calls `transfer`, which never waits on a device;
//!   full pipes drop frames, empty pipes yield silence
//! - **Ring pipes**: one lock-free SPSC frame queue per device
//! - **I/O workers**: one OS thread per device performing bounded-retry
//!   hardware reads and writes
//!
//! Devices are reached through the [`DeviceProxy`] trait. [`MockDevice`]
//! and [`StubDevice`] work without hardware; `CpalDevice` (feature
//! `hardware`) drives real devices through cpal.

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::float_cmp))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
mod config;
mod context;
pub mod device;
mod engine;
mod error;
mod event;
pub mod format;
mod pipeline;
mod state;

pub use builder::StreamEngineBuilder;
pub use config::{EngineConfig, RetryPolicy};
pub use context::{ChannelLayout, Direction, PcmConfig, SampleFormat, StreamContext};
#[cfg(feature = "hardware")]
pub use device::{CpalDevice, CpalOpener};
pub use device::{
    CapturePosition, DeviceId, DeviceOpener, DeviceProfile, DeviceProxy, MockDevice, OpenMode,
    PresentationPosition, StubDevice, StubOpener,
};
pub use engine::{DrainMode, StreamEngine, StreamPosition, StreamState, TransferResult};
pub use error::{DeviceError, EngineError, PipeError};
pub use event::{event_callback, EventCallback, StreamEvent};
pub use format::{apply_gain, GainControl};
pub use pipeline::{ring_pipe, PipeControl, PipeReader, PipeWriter};
pub use state::EngineStats;
