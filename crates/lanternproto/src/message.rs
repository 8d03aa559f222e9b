//! Control messages exchanged between the manager and a worker.
//!
//! Wire form is a small JSON object: `{"type": <int>, "data": <payload>}`.
//! Type codes 0-3 are the standard protocol; anything else is carried
//! through as [`ServiceMessage::Custom`] and handed to the worker's
//! message hook instead of being rejected.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::settings::SettingsSnapshot;
use crate::state::ServiceState;

/// Errors produced while encoding or decoding control messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed {kind:?} payload: {detail}")]
    Payload { kind: MessageKind, detail: String },
}

/// The four standard message types, with their wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Enable,
    Kill,
    Settings,
    State,
    /// A type code outside 0-3, preserved for the extension hook.
    Other(u8),
}

impl MessageKind {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => MessageKind::Enable,
            1 => MessageKind::Kill,
            2 => MessageKind::Settings,
            3 => MessageKind::State,
            other => MessageKind::Other(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            MessageKind::Enable => 0,
            MessageKind::Kill => 1,
            MessageKind::Settings => 2,
            MessageKind::State => 3,
            MessageKind::Other(v) => *v,
        }
    }
}

/// A control message.
///
/// `Enable`, `Kill` and `Settings` flow from the manager to the worker;
/// `State` flows back. `Custom` is an escape hatch for worker-specific
/// payloads and is never interpreted by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceMessage {
    Enable(bool),
    Kill,
    Settings(SettingsSnapshot),
    State(ServiceState),
    Custom { kind: u8, data: serde_json::Value },
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    data: serde_json::Value,
}

impl ServiceMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            ServiceMessage::Enable(_) => MessageKind::Enable,
            ServiceMessage::Kill => MessageKind::Kill,
            ServiceMessage::Settings(_) => MessageKind::Settings,
            ServiceMessage::State(_) => MessageKind::State,
            ServiceMessage::Custom { kind, .. } => MessageKind::Other(*kind),
        }
    }

    /// Encode to the wire JSON string.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let wire = match self {
            ServiceMessage::Enable(enable) => WireMessage {
                kind: 0,
                data: serde_json::Value::Bool(*enable),
            },
            ServiceMessage::Kill => WireMessage {
                kind: 1,
                data: serde_json::Value::Null,
            },
            ServiceMessage::Settings(snapshot) => WireMessage {
                kind: 2,
                data: serde_json::to_value(snapshot)?,
            },
            ServiceMessage::State(state) => WireMessage {
                kind: 3,
                data: serde_json::to_value(state)?,
            },
            ServiceMessage::Custom { kind, data } => WireMessage {
                kind: *kind,
                data: data.clone(),
            },
        };
        Ok(serde_json::to_string(&wire)?)
    }

    /// Decode from the wire JSON string.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let wire: WireMessage = serde_json::from_str(raw)?;
        let kind = MessageKind::from_u8(wire.kind);
        match kind {
            MessageKind::Enable => match wire.data {
                serde_json::Value::Bool(enable) => Ok(ServiceMessage::Enable(enable)),
                other => Err(ProtocolError::Payload {
                    kind,
                    detail: format!("expected bool, got {other}"),
                }),
            },
            MessageKind::Kill => Ok(ServiceMessage::Kill),
            MessageKind::Settings => {
                let snapshot = serde_json::from_value(wire.data).map_err(|e| {
                    ProtocolError::Payload {
                        kind,
                        detail: e.to_string(),
                    }
                })?;
                Ok(ServiceMessage::Settings(snapshot))
            }
            MessageKind::State => {
                let state =
                    serde_json::from_value(wire.data).map_err(|e| ProtocolError::Payload {
                        kind,
                        detail: e.to_string(),
                    })?;
                Ok(ServiceMessage::State(state))
            }
            MessageKind::Other(code) => Ok(ServiceMessage::Custom {
                kind: code,
                data: wire.data,
            }),
        }
    }
}
