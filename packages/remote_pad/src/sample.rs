//! Sample types and the JSON wire envelope.
//!
//! Wire format, one text frame per sample:
//!
//! ```text
//! { "type": "motion" | "touch", "data": <MotionSample | TouchSample> }
//! ```

use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::error::EnvelopeError;

/// Acceleration including gravity, in m/s².
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TouchAction {
    Start,
    Move,
    Scroll,
    Gesture,
    End,
}

/// Raw touch/gesture state from the gesture recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchSample {
    pub action: TouchAction,
    pub touch_count: u32,
    pub delta_x: f64,
    pub delta_y: f64,
    pub velocity: f64,
    pub scale: f64,
    pub absolute_x: f64,
    pub absolute_y: f64,
    /// Milliseconds since the Unix epoch.
    #[serde(rename = "timestamp")]
    pub timestamp_ms: u64,
}

/// A sample from one of the producers. The variant decides the channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sample {
    Motion(MotionSample),
    Touch(TouchSample),
}

impl Sample {
    pub fn channel(&self) -> Channel {
        match self {
            Sample::Motion(_) => Channel::Motion,
            Sample::Touch(_) => Channel::Touch,
        }
    }

    /// Name of the first NaN or infinite field. JSON has no spelling for
    /// those, so such a sample cannot go on the wire.
    pub fn non_finite_field(&self) -> Option<&'static str> {
        match self {
            Sample::Motion(m) => first_non_finite([("x", m.x), ("y", m.y), ("z", m.z)]),
            Sample::Touch(t) => first_non_finite([
                ("deltaX", t.delta_x),
                ("deltaY", t.delta_y),
                ("velocity", t.velocity),
                ("scale", t.scale),
                ("absoluteX", t.absolute_x),
                ("absoluteY", t.absolute_y),
            ]),
        }
    }
}

fn first_non_finite<const N: usize>(fields: [(&'static str, f64); N]) -> Option<&'static str> {
    fields
        .into_iter()
        .find(|(_, value)| !value.is_finite())
        .map(|(name, _)| name)
}

impl From<MotionSample> for Sample {
    fn from(sample: MotionSample) -> Self {
        Sample::Motion(sample)
    }
}

impl From<TouchSample> for Sample {
    fn from(sample: TouchSample) -> Self {
        Sample::Touch(sample)
    }
}

/// Wire wrapper placed around every outbound sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub channel: Channel,
    pub data: Sample,
}

impl Envelope {
    pub fn new(sample: Sample) -> Self {
        Self {
            channel: sample.channel(),
            data: sample,
        }
    }

    pub fn encode(&self) -> Result<String, EnvelopeError> {
        if let Some(field) = self.data.non_finite_field() {
            return Err(EnvelopeError::NonFinite {
                channel: self.data.channel(),
                field,
            });
        }
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a text frame, rejecting envelopes whose `type` disagrees with
    /// the shape of `data`.
    pub fn decode(text: &str) -> Result<Self, EnvelopeError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let actual = envelope.data.channel();
        if envelope.channel != actual {
            return Err(EnvelopeError::ChannelMismatch {
                declared: envelope.channel,
                actual,
            });
        }
        Ok(envelope)
    }
}
