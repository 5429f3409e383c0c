//! Error types for endpoint resolution, the wire envelope, and transports.
//!
//! None of these ever escape as a crash: transport and envelope failures
//! degrade to "channel disconnected", and endpoint failures are shown to the
//! user as a correctable validation message.

use crate::channel::Channel;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("host is empty")]
    Empty,

    #[error("invalid IPv4 address {input:?}: {reason}")]
    InvalidHost { input: String, reason: &'static str },

    #[error("port overflow: base port {base} + offset {offset}")]
    PortOverflow { base: u16, offset: u16 },
}

impl EndpointError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Empty => "empty_host",
            Self::InvalidHost { .. } => "invalid_host",
            Self::PortOverflow { .. } => "port_overflow",
        }
    }

    /// Message for the rejection dialog shown to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Empty | Self::InvalidHost { .. } => {
                "This code does not contain a valid IP address."
            }
            Self::PortOverflow { .. } => "The configured ports are out of range.",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope type {declared} does not match {actual} payload")]
    ChannelMismatch { declared: Channel, actual: Channel },

    #[error("{channel} sample field {field} is not a finite number")]
    NonFinite {
        channel: Channel,
        field: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("socket is closed")]
    Closed,

    #[error("connect failed: {0}")]
    Connect(String),
}

/// Failure loading [`Settings`](crate::Settings).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(Box<figment::Error>),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}
