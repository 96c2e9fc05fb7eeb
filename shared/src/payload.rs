//! Wire envelope shared by every client/server exchange
//!
//! Every text message on the socket is a JSON object of the form
//! `{ "type": <kind>, "data": <type-specific> }`. This module owns decoding
//! the raw text into a [`Payload`], classifying it, and viewing its data as
//! one of the typed bodies from [`crate::message`] and [`crate::frame`].

use crate::frame::FrameData;
use crate::message::{ActionMessage, UpgradeRequest, UpgradeResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Errors produced while decoding an inbound payload
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("invalid {kind} data: {source}")]
    InvalidData {
        kind: PayloadType,
        #[source]
        source: serde_json::Error,
    },
}

/// Envelope kinds recognized on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadType {
    Message,
    Handshake,
    Ping,
    Upgrade,
    Frame,
}

impl PayloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadType::Message => "message",
            PayloadType::Handshake => "handshake",
            PayloadType::Ping => "ping",
            PayloadType::Upgrade => "upgrade",
            PayloadType::Frame => "frame",
        }
    }

    fn parse(kind: &str) -> Option<Self> {
        match kind {
            "message" => Some(PayloadType::Message),
            "handshake" => Some(PayloadType::Handshake),
            "ping" => Some(PayloadType::Ping),
            "upgrade" => Some(PayloadType::Upgrade),
            "frame" => Some(PayloadType::Frame),
            _ => None,
        }
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded wire envelope
///
/// Immutable once built; use the constructors for outbound payloads and
/// [`Payload::decode`] for inbound text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(rename = "type")]
    kind: PayloadType,
    #[serde(default)]
    data: Value,
}

impl Payload {
    pub fn new(kind: PayloadType, data: Value) -> Self {
        Self { kind, data }
    }

    /// Wraps an action message in a `message` envelope
    pub fn message(message: &ActionMessage) -> Result<Self, serde_json::Error> {
        Ok(Self::new(PayloadType::Message, serde_json::to_value(message)?))
    }

    /// Builds the client side of the authentication handoff
    pub fn upgrade(token: impl Into<String>) -> Result<Self, serde_json::Error> {
        let request = UpgradeRequest {
            token: token.into(),
        };
        Ok(Self::new(PayloadType::Upgrade, serde_json::to_value(request)?))
    }

    /// Decodes raw socket text into an envelope
    ///
    /// The `type` field must be present and name one of the known kinds;
    /// anything else is a [`DecodeError::MalformedEnvelope`]. A missing
    /// `data` field decodes as JSON `null`.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(raw)?;
        let Value::Object(mut object) = value else {
            return Err(DecodeError::MalformedEnvelope(
                "envelope is not an object".to_string(),
            ));
        };

        let kind = match object.get("type") {
            Some(Value::String(kind)) => PayloadType::parse(kind).ok_or_else(|| {
                DecodeError::MalformedEnvelope(format!("unknown payload type {kind:?}"))
            })?,
            Some(_) => {
                return Err(DecodeError::MalformedEnvelope(
                    "payload type is not a string".to_string(),
                ))
            }
            None => {
                return Err(DecodeError::MalformedEnvelope(
                    "missing payload type".to_string(),
                ))
            }
        };

        let data = object.remove("data").unwrap_or(Value::Null);
        Ok(Self { kind, data })
    }

    pub fn encode(&self) -> String {
        // An envelope of a unit enum and a json value always serializes
        serde_json::json!({ "type": self.kind, "data": self.data }).to_string()
    }

    pub fn kind(&self) -> PayloadType {
        self.kind
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn into_data(self) -> Value {
        self.data
    }

    pub fn is_message(&self) -> bool {
        self.kind == PayloadType::Message
    }

    pub fn is_handshake(&self) -> bool {
        self.kind == PayloadType::Handshake
    }

    pub fn is_upgrade(&self) -> bool {
        self.kind == PayloadType::Upgrade
    }

    pub fn is_frame(&self) -> bool {
        self.kind == PayloadType::Frame
    }

    pub fn is_ping(&self) -> bool {
        self.kind == PayloadType::Ping
    }

    /// Connection id carried by a handshake; empty ids do not count
    pub fn handshake_id(&self) -> Option<&str> {
        if !self.is_handshake() {
            return None;
        }
        self.data.as_str().filter(|id| !id.is_empty())
    }

    pub fn as_message(&self) -> Result<ActionMessage, DecodeError> {
        self.typed(PayloadType::Message)
    }

    pub fn as_upgrade(&self) -> Result<UpgradeResult, DecodeError> {
        self.typed(PayloadType::Upgrade)
    }

    pub fn as_frame(&self) -> Result<FrameData, DecodeError> {
        self.expect_kind(PayloadType::Frame)?;
        Ok(FrameData::from_value(self.data.clone()))
    }

    fn typed<T: serde::de::DeserializeOwned>(&self, kind: PayloadType) -> Result<T, DecodeError> {
        self.expect_kind(kind)?;
        T::deserialize(&self.data).map_err(|source| DecodeError::InvalidData { kind, source })
    }

    fn expect_kind(&self, kind: PayloadType) -> Result<(), DecodeError> {
        if self.kind == kind {
            Ok(())
        } else {
            Err(DecodeError::MalformedEnvelope(format!(
                "expected {kind} payload, got {}",
                self.kind
            )))
        }
    }
}
