//! Sample processing on raw PCM buffers.
//!
//! Buffers travel through the engine as interleaved little-endian bytes in
//! the stream's [`SampleFormat`](crate::SampleFormat); the only processing
//! applied on the way is the output gain.

mod gain;

pub use gain::{apply_gain, GainControl};
