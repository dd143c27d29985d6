use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Deserializer};

/// Audio bitrate in kbit/s, written as `128K`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitrate(u16);

impl Bitrate {
    pub const fn kbps(value: u16) -> Self {
        Self(value)
    }
}

impl Default for Bitrate {
    fn default() -> Self {
        Self(128)
    }
}

impl FromStr for Bitrate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(num_prefix) = s.trim().to_lowercase().strip_suffix('k').map(str::to_owned)
        else {
            return Err(format!("Bitrate '{s}' does not end with 'K'"));
        };

        match num_prefix.parse::<u16>() {
            Ok(0) | Err(_) => Err(format!("Invalid bitrate '{s}'")),
            Ok(n) => Ok(Self(n)),
        }
    }
}

impl Display for Bitrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}K", self.0)
    }
}

impl<'de> Deserialize<'de> for Bitrate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bitrates() {
        assert_eq!("128K".parse(), Ok(Bitrate::kbps(128)));
        assert_eq!("192k".parse(), Ok(Bitrate::kbps(192)));
        assert!("128".parse::<Bitrate>().is_err());
        assert!("0K".parse::<Bitrate>().is_err());
        assert_eq!(Bitrate::default().to_string(), "128K");
    }
}
