// ABOUTME: Control message shape exchanged between the supervisor and its workers.
// ABOUTME: One JSON object per line; replies reuse the request's correlation id.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Authority used by the supervisor on every message it sends.
pub const MANAGER_AUTHORITY: &str = "manager";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// Worker is ready; payload is its own deployment id.
    Running,
    /// Worker is done and may be torn down.
    Stop,
    /// Refresh the module definition once the worker is torn down.
    Update,
    /// Redeploy under the same id once the worker is torn down.
    Restart,
    /// Payload is a log line to forward.
    Log,
    /// Ask for the id -> module listing.
    List,
    /// Acknowledgement of a request.
    Ok,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Running => "running",
            Kind::Stop => "stop",
            Kind::Update => "update",
            Kind::Restart => "restart",
            Kind::Log => "log",
            Kind::List => "list",
            Kind::Ok => "ok",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Sender: a deployment id, or "manager" for the supervisor.
    pub authority: String,
    pub correlation_id: String,
    pub kind: Kind,
    #[serde(default)]
    pub payload: String,
}

impl ControlMessage {
    pub fn new(
        authority: impl Into<String>,
        correlation_id: impl Into<String>,
        kind: Kind,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            authority: authority.into(),
            correlation_id: correlation_id.into(),
            kind,
            payload: payload.into(),
        }
    }

    /// Build the "ok" acknowledgement for this message.
    pub fn reply(&self, authority: &str, payload: impl Into<String>) -> Self {
        Self::new(authority, self.correlation_id.clone(), Kind::Ok, payload)
    }

    /// Encode as a single line, without the trailing newline.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(line.trim()).map_err(ProtocolError::Malformed)
    }
}
