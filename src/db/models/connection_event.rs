use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionEventKind {
    Connected,
    Disconnected,
    Reconnecting,
    Reconnected,
}

impl ConnectionEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionEventKind::Connected => "connected",
            ConnectionEventKind::Disconnected => "disconnected",
            ConnectionEventKind::Reconnecting => "reconnecting",
            ConnectionEventKind::Reconnected => "reconnected",
        }
    }
}

/// Append-only lifecycle log entry. Never updated once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: ConnectionEventKind,
    pub endpoint: String,
    pub detail: String,
}

impl ConnectionEvent {
    pub fn now(kind: ConnectionEventKind, endpoint: &str, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            endpoint: endpoint.to_string(),
            detail: detail.into(),
        }
    }
}
