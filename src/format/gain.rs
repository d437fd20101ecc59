//! Gain applied to raw PCM buffers.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use portable_atomic::AtomicF32;

use crate::SampleFormat;

const I24_MIN: f64 = -8_388_608.0;
const I24_MAX: f64 = 8_388_607.0;

/// Scales every sample of `buffer` by `gain` in place.
///
/// Only whole frames are touched; trailing bytes that do not form a complete
/// frame are left as they are. Integer formats round to the nearest value
/// and all formats clamp to their representable range (`[-1.0, 1.0]` for
/// [`SampleFormat::F32`]). Unity gain leaves the buffer bit-for-bit intact.
///
/// # Example
///
/// ```
/// use pcm_bridge::{apply_gain, SampleFormat};
///
/// let mut buf = Vec::new();
/// for s in [1000i16, -30000] {
///     buf.extend_from_slice(&s.to_le_bytes());
/// }
/// apply_gain(&mut buf, 1.5, SampleFormat::I16, 1);
///
/// assert_eq!(i16::from_le_bytes([buf[0], buf[1]]), 1500);
/// assert_eq!(i16::from_le_bytes([buf[2], buf[3]]), i16::MIN);
/// ```
#[allow(clippy::float_cmp)]
pub fn apply_gain(buffer: &mut [u8], gain: f32, format: SampleFormat, channels: u16) {
    if gain == 1.0 {
        return;
    }
    let frame_size = usize::from(channels.max(1)) * format.bytes_per_sample();
    let whole = buffer.len() - buffer.len() % frame_size;
    let buffer = &mut buffer[..whole];
    let gain = f64::from(gain);

    match format {
        SampleFormat::I16 => {
            let (min, max) = (f64::from(i16::MIN), f64::from(i16::MAX));
            for sample in buffer.chunks_exact_mut(2) {
                let value = f64::from(i16::from_le_bytes([sample[0], sample[1]]));
                let scaled = scale(value, gain, min, max) as i16;
                sample.copy_from_slice(&scaled.to_le_bytes());
            }
        }
        // Q8.23 is scaled like any 32-bit integer and clamps to the container
        SampleFormat::I32 | SampleFormat::I24Padded => {
            let (min, max) = (f64::from(i32::MIN), f64::from(i32::MAX));
            for sample in buffer.chunks_exact_mut(4) {
                let value = f64::from(i32::from_le_bytes([
                    sample[0], sample[1], sample[2], sample[3],
                ]));
                let scaled = scale(value, gain, min, max) as i32;
                sample.copy_from_slice(&scaled.to_le_bytes());
            }
        }
        SampleFormat::I24Packed => {
            for sample in buffer.chunks_exact_mut(3) {
                let sign = if sample[2] & 0x80 == 0 { 0 } else { 0xFF };
                let value = f64::from(i32::from_le_bytes([sample[0], sample[1], sample[2], sign]));
                let scaled = scale(value, gain, I24_MIN, I24_MAX) as i32;
                sample.copy_from_slice(&scaled.to_le_bytes()[..3]);
            }
        }
        SampleFormat::F32 => {
            for sample in buffer.chunks_exact_mut(4) {
                let value = f64::from(f32::from_le_bytes([
                    sample[0], sample[1], sample[2], sample[3],
                ]));
                let scaled = (value * gain).clamp(-1.0, 1.0) as f32;
                sample.copy_from_slice(&scaled.to_le_bytes());
            }
        }
    }
}

#[inline]
fn scale(value: f64, gain: f64, min: f64, max: f64) -> f64 {
    (value * gain).round().clamp(min, max)
}

/// Output gain shared between the client and any control thread.
///
/// Latest value wins. Changes are not sample-accurate: a new value applies
/// from the next `transfer` onwards.
#[derive(Debug, Clone)]
pub struct GainControl {
    value: Arc<AtomicF32>,
}

impl GainControl {
    /// Creates a control holding `gain`.
    pub fn new(gain: f32) -> Self {
        Self {
            value: Arc::new(AtomicF32::new(gain)),
        }
    }

    /// Sets a new gain. Non-finite or negative values are ignored.
    ///
    /// Returns `true` if the value was accepted.
    pub fn set(&self, gain: f32) -> bool {
        if !gain.is_finite() || gain < 0.0 {
            tracing::warn!(gain, "ignoring invalid gain");
            return false;
        }
        self.value.store(gain, Ordering::Release);
        true
    }

    /// Current gain.
    pub fn get(&self) -> f32 {
        self.value.load(Ordering::Acquire)
    }
}

impl Default for GainControl {
    fn default() -> Self {
        Self::new(1.0)
    }
}
