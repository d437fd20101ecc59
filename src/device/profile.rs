//! Device identification and addressing.

use std::sync::Arc;

use crate::Direction;

/// Identifier of a bound device, used in logs and events.
///
/// `DeviceId` uses `Arc<str>` internally, so cloning it into every event
/// and worker is a pointer copy.
///
/// # Example
///
/// ```
/// use pcm_bridge::DeviceId;
///
/// let speaker = DeviceId::new("hw:0,0");
/// assert_eq!(speaker, DeviceId::from("hw:0,0"));
/// assert_eq!(speaker.to_string(), "hw:0,0");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(Arc<str>);

impl DeviceId {
    /// Creates a device id from a string.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where a device lives and which direction it serves.
///
/// A stream is bound to the subset of its profiles whose direction matches
/// the stream direction. Attached devices are opened with the stream's
/// buffer size; external ones must match the requested config exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Id used in logs and events.
    pub id: DeviceId,
    /// Card number.
    pub card: u32,
    /// Device number on the card.
    pub device: u32,
    /// Direction the device serves.
    pub direction: Direction,
    /// Whether the device is external (USB, HDMI, ...) rather than built in.
    pub is_external: bool,
}

impl DeviceProfile {
    /// Card/device pair used when an address cannot be parsed.
    pub const DEFAULT_ADDRESS: (u32, u32) = (0, 0);

    /// Creates a profile for a built-in device.
    pub fn attached(card: u32, device: u32, direction: Direction) -> Self {
        Self {
            id: default_id(card, device),
            card,
            device,
            direction,
            is_external: false,
        }
    }

    /// Creates a profile for an external device.
    pub fn external(card: u32, device: u32, direction: Direction) -> Self {
        Self {
            is_external: true,
            ..Self::attached(card, device, direction)
        }
    }

    /// Creates a profile from a textual device address.
    ///
    /// The card and device numbers are taken from the last `CARD_<n>_DEV_<m>`
    /// group in the address. Addresses without one resolve to
    /// [`DEFAULT_ADDRESS`](Self::DEFAULT_ADDRESS).
    ///
    /// # Example
    ///
    /// ```
    /// use pcm_bridge::{DeviceProfile, Direction};
    ///
    /// let usb = DeviceProfile::from_address("usb:CARD_2_DEV_1", Direction::Output, true);
    /// assert_eq!((usb.card, usb.device), (2, 1));
    ///
    /// let fallback = DeviceProfile::from_address("bogus", Direction::Input, false);
    /// assert_eq!((fallback.card, fallback.device), (0, 0));
    /// ```
    pub fn from_address(address: &str, direction: Direction, is_external: bool) -> Self {
        let (card, device) = parse_card_and_device(address).unwrap_or_else(|| {
            tracing::debug!(address, "no card/device in address, using default");
            Self::DEFAULT_ADDRESS
        });
        Self {
            id: default_id(card, device),
            card,
            device,
            direction,
            is_external,
        }
    }

    /// Replaces the id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<DeviceId>) -> Self {
        self.id = id.into();
        self
    }
}

fn default_id(card: u32, device: u32) -> DeviceId {
    DeviceId::new(format!("hw:{card},{device}"))
}

fn parse_card_and_device(address: &str) -> Option<(u32, u32)> {
    let start = address.rfind("CARD_")?;
    let (card, rest) = address[start + "CARD_".len()..].split_once("_DEV_")?;
    let digits = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    Some((card.parse().ok()?, rest[..digits].parse().ok()?))
}
