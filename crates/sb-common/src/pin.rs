//! Board pin identifiers and edge polarity.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A GPIO pin addressed by port and pin number, written `P<port>.<pin>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PinId {
    /// GPIO port.
    pub port: u8,
    /// Pin within the port (0-31).
    pub pin: u8,
}

impl PinId {
    /// Create a pin identifier.
    #[must_use]
    pub const fn new(port: u8, pin: u8) -> Self {
        Self { port, pin }
    }
}

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}.{}", self.port, self.pin)
    }
}

/// Error returned when a pin string is not of the form `P<port>.<pin>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid pin '{0}', expected P<port>.<pin> (e.g. P2.0)")]
pub struct ParsePinError(String);

impl FromStr for PinId {
    type Err = ParsePinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParsePinError(s.to_string());
        let rest = s
            .strip_prefix('P')
            .or_else(|| s.strip_prefix('p'))
            .ok_or_else(err)?;
        let (port, pin) = rest.split_once('.').ok_or_else(err)?;
        let port = port.parse::<u8>().map_err(|_| err())?;
        let pin = pin.parse::<u8>().map_err(|_| err())?;
        if pin > 31 {
            return Err(err());
        }
        Ok(Self { port, pin })
    }
}

impl Serialize for PinId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PinId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Edge polarity for external interrupt registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    /// Low-to-high transition.
    Rising,
    /// High-to-low transition.
    Falling,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rising => write!(f, "rising"),
            Self::Falling => write!(f, "falling"),
        }
    }
}
