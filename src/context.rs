//! Stream context and negotiated PCM configuration.

use std::time::Duration;

/// Direction of a stream or device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Capture: device → pipe → client.
    Input,
    /// Playback: client → pipe → device.
    Output,
}

impl Direction {
    /// Returns `true` for [`Direction::Input`].
    #[must_use]
    pub fn is_input(self) -> bool {
        matches!(self, Self::Input)
    }
}

/// Sample encodings supported by the transport and the gain stage.
///
/// All multi-byte formats are little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SampleFormat {
    /// Signed 16-bit integer.
    #[default]
    I16,
    /// Signed 32-bit integer.
    I32,
    /// Signed 24-bit integer packed into 3 bytes.
    I24Packed,
    /// Q8.23 fixed point in a 4-byte container (ALSA `S24_LE`).
    ///
    /// Gain treats the whole 32-bit word as the sample and clamps to the
    /// `i32` range.
    I24Padded,
    /// 32-bit float, nominal range [-1.0, 1.0].
    F32,
}

impl SampleFormat {
    /// Size of one sample in bytes.
    #[must_use]
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::I16 => 2,
            Self::I24Packed => 3,
            Self::I32 | Self::I24Padded | Self::F32 => 4,
        }
    }
}

/// Channel layout of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelLayout {
    /// One channel.
    Mono,
    /// Two channels.
    Stereo,
    /// An arbitrary number of channels addressed by index.
    Indexed(u16),
}

impl ChannelLayout {
    /// Number of channels in this layout.
    #[must_use]
    pub fn channel_count(self) -> u16 {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
            Self::Indexed(count) => count,
        }
    }
}

/// Immutable description of one audio stream.
///
/// The frame size is computed once at construction from the format and
/// channel layout; the pipe capacity is always expressed in frames.
///
/// # Example
///
/// ```
/// use pcm_bridge::{ChannelLayout, Direction, SampleFormat, StreamContext};
///
/// let context = StreamContext::new(
///     Direction::Output,
///     48000,
///     ChannelLayout::Stereo,
///     SampleFormat::I16,
///     960,
/// );
/// assert_eq!(context.frame_size(), 4);
/// assert_eq!(context.buffer_duration().as_millis(), 20);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamContext {
    direction: Direction,
    sample_rate: u32,
    channel_layout: ChannelLayout,
    format: SampleFormat,
    buffer_size_frames: usize,
    frame_size: usize,
}

impl StreamContext {
    /// Creates a new stream context.
    pub fn new(
        direction: Direction,
        sample_rate: u32,
        channel_layout: ChannelLayout,
        format: SampleFormat,
        buffer_size_frames: usize,
    ) -> Self {
        let frame_size = usize::from(channel_layout.channel_count()) * format.bytes_per_sample();
        Self {
            direction,
            sample_rate,
            channel_layout,
            format,
            buffer_size_frames,
            frame_size,
        }
    }

    /// Stream direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Returns `true` for capture streams.
    pub fn is_input(&self) -> bool {
        self.direction.is_input()
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel layout.
    pub fn channel_layout(&self) -> ChannelLayout {
        self.channel_layout
    }

    /// Number of channels.
    pub fn channel_count(&self) -> u16 {
        self.channel_layout.channel_count()
    }

    /// Sample format.
    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Configured ring buffer capacity in frames.
    pub fn buffer_size_frames(&self) -> usize {
        self.buffer_size_frames
    }

    /// Size of one frame in bytes.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Size of one full buffer in bytes.
    pub fn buffer_size_bytes(&self) -> usize {
        self.buffer_size_frames * self.frame_size
    }

    /// Time needed to play one full buffer at the stream's rate.
    pub fn buffer_duration(&self) -> Duration {
        frames_to_duration(self.buffer_size_frames as u64, self.sample_rate)
    }
}

/// Hardware configuration negotiated from a [`StreamContext`].
///
/// This is what a [`DeviceOpener`](crate::DeviceOpener) receives when opening
/// a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmConfig {
    /// Number of interleaved channels.
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Sample encoding.
    pub format: SampleFormat,
    /// Buffer size in frames.
    pub buffer_size_frames: usize,
}

impl PcmConfig {
    /// Derives the hardware configuration for a stream.
    ///
    /// Returns `None` if the context cannot be expressed as a PCM
    /// configuration (zero rate, zero channels or an empty buffer).
    #[must_use]
    pub fn from_context(context: &StreamContext) -> Option<Self> {
        if context.sample_rate() == 0
            || context.channel_count() == 0
            || context.buffer_size_frames() == 0
        {
            return None;
        }
        Some(Self {
            channels: context.channel_count(),
            sample_rate: context.sample_rate(),
            format: context.format(),
            buffer_size_frames: context.buffer_size_frames(),
        })
    }

    /// Size of one frame in bytes.
    #[must_use]
    pub fn frame_size(&self) -> usize {
        usize::from(self.channels) * self.format.bytes_per_sample()
    }
}

/// Converts a frame count to wall-clock duration at `sample_rate`.
pub(crate) fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = u128::from(frames) * 1_000_000_000 / u128::from(sample_rate);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
