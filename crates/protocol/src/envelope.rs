use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{CHANNEL_FIELD, HEARTBEAT_TYPE, TYPE_FIELD};

/// Errors from decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message too large ({len} bytes, max {max})")]
    TooLarge { len: usize, max: usize },
}

/// A decoded inbound message.
///
/// The body is kept as a `serde_json::Value` so that handlers can read the
/// fields they care about without the transport knowing their schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    value: Value,
}

impl Envelope {
    /// Wraps an already decoded JSON value.
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// Decodes a text frame, rejecting frames larger than `max_size` bytes.
    pub fn decode(text: &str, max_size: usize) -> Result<Self, ProtocolError> {
        if text.len() > max_size {
            return Err(ProtocolError::TooLarge {
                len: text.len(),
                max: max_size,
            });
        }
        Ok(Self::new(serde_json::from_str(text)?))
    }

    /// The `channel` field, if present and a string.
    pub fn channel(&self) -> Option<&str> {
        self.value.get(CHANNEL_FIELD).and_then(Value::as_str)
    }

    /// The `type` field, if present and a string.
    pub fn msg_type(&self) -> Option<&str> {
        self.value.get(TYPE_FIELD).and_then(Value::as_str)
    }

    /// Routing key: `channel`, falling back to `type`.
    ///
    /// `None` means the message is decodable but no subscriber can receive it.
    pub fn route(&self) -> Option<&str> {
        self.channel().or_else(|| self.msg_type())
    }

    /// Returns a top-level field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.value.get(field)
    }

    /// Deserializes the whole message into `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.value)
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// Keep-alive frame sent by the client while the socket is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Epoch milliseconds at send time.
    pub timestamp: i64,
}

impl Heartbeat {
    pub fn at(timestamp: i64) -> Self {
        Self {
            msg_type: HEARTBEAT_TYPE.to_string(),
            timestamp,
        }
    }

    pub fn now() -> Self {
        Self::at(chrono::Utc::now().timestamp_millis())
    }
}
