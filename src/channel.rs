//! Distribution channels.

use std::fmt;
use std::str::FromStr;

use crate::errors::ActivationError;

/// How this copy was distributed; decides what the verification request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Oem,
    Retail,
    Volume,
}

impl Channel {
    /// Whether the hardware fingerprint is sent as `hwid`.
    pub fn sends_hwid(&self) -> bool {
        matches!(self, Channel::Oem | Channel::Retail)
    }

    /// Whether the product key is sent as `product_key`.
    pub fn sends_product_key(&self) -> bool {
        matches!(self, Channel::Retail | Channel::Volume)
    }
}

impl FromStr for Channel {
    type Err = ActivationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oem" => Ok(Channel::Oem),
            "retail" => Ok(Channel::Retail),
            "volume" => Ok(Channel::Volume),
            other => Err(ActivationError::UnknownChannel(other.to_string())),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Channel::Oem => "oem",
            Channel::Retail => "retail",
            Channel::Volume => "volume",
        };
        write!(f, "{}", s)
    }
}
