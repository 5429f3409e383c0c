use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A logical data stream with its own endpoint and connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Motion,
    Touch,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Motion, Channel::Touch];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Motion => "motion",
            Channel::Touch => "touch",
        }
    }

    /// Map a navigation screen name to the channel it streams, if any.
    ///
    /// Screens without a channel (the scanner, settings) map to `None`.
    pub fn from_screen(screen: &str) -> Option<Channel> {
        match screen.trim().to_ascii_lowercase().as_str() {
            "motion" => Some(Channel::Motion),
            "touch" | "touchpad" => Some(Channel::Touch),
            _ => None,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Channel::Motion => 0,
            Channel::Touch => 1,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown channel {0:?} (expected \"motion\" or \"touch\")")]
pub struct ParseChannelError(pub String);

impl FromStr for Channel {
    type Err = ParseChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "motion" => Ok(Channel::Motion),
            "touch" => Ok(Channel::Touch),
            _ => Err(ParseChannelError(s.to_string())),
        }
    }
}
