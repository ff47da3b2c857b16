//! Frame definitions
//!
//! Inbound frames are decoded once into a generic JSON value and then
//! dispatched on the `type` discriminant into a closed set of variants.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────

/// Frames sent by the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Keepalive, answered by a `pong` carrying the same id
    Ping { id: u64 },
}

impl OutboundFrame {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::ProtocolMalformed {
            message: e.to_string(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────

/// Frames received from the gateway
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Keepalive acknowledgment
    Pong { reply_to: u64 },

    /// Endpoint to use for the next reconnect
    ReconnectUrl { url: String },

    /// Session established
    Hello {
        region: Option<String>,
        host_id: Option<String>,
    },

    /// Any other frame, including control types with missing fields
    Other { kind: Option<String>, payload: Value },
}

impl InboundFrame {
    /// Decode a text frame
    ///
    /// Only text that is not JSON at all is an error; well-formed JSON of an
    /// unknown shape becomes [`InboundFrame::Other`].
    pub fn parse(text: &str) -> Result<Self> {
        let payload: Value = serde_json::from_str(text).map_err(|e| Error::ProtocolMalformed {
            message: e.to_string(),
        })?;
        Ok(Self::from_value(payload))
    }

    /// Dispatch an already decoded value on its `type` field
    pub fn from_value(payload: Value) -> Self {
        let kind = payload.get("type").and_then(Value::as_str).map(str::to_owned);

        let frame = match kind.as_deref() {
            Some("pong") => payload
                .get("reply_to")
                .and_then(Value::as_u64)
                .map(|reply_to| InboundFrame::Pong { reply_to }),
            Some("reconnect_url") => payload
                .get("url")
                .and_then(Value::as_str)
                .map(|url| InboundFrame::ReconnectUrl { url: url.to_string() }),
            Some("hello") => Some(InboundFrame::Hello {
                region: string_field(&payload, "region"),
                host_id: string_field(&payload, "host_id"),
            }),
            _ => None,
        };

        frame.unwrap_or(InboundFrame::Other { kind, payload })
    }

    /// Frame type for logging
    pub fn type_name(&self) -> &str {
        match self {
            InboundFrame::Pong { .. } => "pong",
            InboundFrame::ReconnectUrl { .. } => "reconnect_url",
            InboundFrame::Hello { .. } => "hello",
            InboundFrame::Other { kind, .. } => kind.as_deref().unwrap_or("(untyped)"),
        }
    }
}

fn string_field(payload: &Value, field: &str) -> Option<String> {
    payload.get(field).and_then(Value::as_str).map(str::to_owned)
}
