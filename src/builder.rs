//! Builder pattern for `StreamEngine`.

use std::sync::Arc;

use crate::device::{DeviceOpener, DeviceProfile, StubOpener};
use crate::format::GainControl;
use crate::state::EngineState;
use crate::{
    event_callback, EngineConfig, EngineError, EventCallback, StreamContext, StreamEngine,
    StreamEvent,
};

/// Builder for configuring a [`StreamEngine`].
///
/// Use [`StreamEngine::builder()`] to create a new builder. Without an
/// explicit [`opener`](Self::opener), every profile is bound to a
/// [`StubDevice`](crate::StubDevice).
///
/// # Example
///
/// ```
/// use pcm_bridge::{
///     ChannelLayout, DeviceProfile, Direction, EngineConfig, SampleFormat, StreamContext,
///     StreamEngine, StreamEvent,
/// };
///
/// let context = StreamContext::new(
///     Direction::Output,
///     48000,
///     ChannelLayout::Stereo,
///     SampleFormat::F32,
///     960,
/// );
///
/// let engine = StreamEngine::builder(context)
///     .device(DeviceProfile::attached(0, 0, Direction::Output))
///     .device(DeviceProfile::from_address("usb:CARD_1_DEV_0", Direction::Output, true))
///     .config(EngineConfig::default())
///     .on_event(|event: StreamEvent| eprintln!("{event:?}"))
///     .gain(0.8)
///     .build()
///     .unwrap();
///
/// assert_eq!(engine.gain(), 0.8);
/// ```
#[must_use]
pub struct StreamEngineBuilder {
    context: StreamContext,
    profiles: Vec<DeviceProfile>,
    opener: Option<Arc<dyn DeviceOpener>>,
    config: EngineConfig,
    event_callback: Option<EventCallback>,
    gain: f32,
}

impl StreamEngineBuilder {
    /// Creates a builder for a stream described by `context`.
    pub fn new(context: StreamContext) -> Self {
        Self {
            context,
            profiles: Vec::new(),
            opener: None,
            config: EngineConfig::default(),
            event_callback: None,
            gain: 1.0,
        }
    }

    /// Adds a device profile.
    ///
    /// Profiles whose direction differs from the stream's are ignored at
    /// start.
    pub fn device(mut self, profile: DeviceProfile) -> Self {
        self.profiles.push(profile);
        self
    }

    /// Adds several device profiles, keeping their order.
    pub fn devices(mut self, profiles: impl IntoIterator<Item = DeviceProfile>) -> Self {
        self.profiles.extend(profiles);
        self
    }

    /// Sets the function used to open devices on every start.
    pub fn opener<O: DeviceOpener + 'static>(mut self, opener: O) -> Self {
        self.opener = Some(Arc::new(opener));
        self
    }

    /// Set custom engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set a callback to receive runtime events.
    ///
    /// Events include dropped frames, inserted silence, device errors and
    /// worker start/stop.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(StreamEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Sets the initial output gain.
    ///
    /// Default: 1.0
    pub fn gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    /// Builds the engine and negotiates its hardware configuration.
    ///
    /// No device is opened until [`StreamEngine::start`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotInitialized`] if the stream context cannot
    /// be expressed as a hardware configuration.
    pub fn build(self) -> Result<StreamEngine, EngineError> {
        let gain = GainControl::default();
        gain.set(self.gain);

        let mut engine = StreamEngine::new(
            self.context,
            self.profiles,
            self.opener.unwrap_or_else(|| Arc::new(StubOpener)),
            self.config,
            EngineState::new(self.event_callback),
            gain,
        );
        engine.init()?;
        Ok(engine)
    }
}
