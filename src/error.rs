use thiserror::Error;

/// Failures surfaced by a session capability. Every variant is recoverable at
/// runtime; `Security` is only fatal while the collector is starting up.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },
    #[error("security handshake rejected: {0}")]
    Security(String),
}

impl SessionError {
    pub fn transport(message: impl Into<String>) -> Self {
        SessionError::Transport(message.into())
    }

    pub fn is_security(&self) -> bool {
        matches!(self, SessionError::Security(_))
    }
}

/// Faults that stop the process before collection begins. These need an
/// operator to fix something and are never retried.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("security handshake failed: {0}")]
    Security(String),
    #[error("durable store unavailable: {0:#}")]
    Store(anyhow::Error),
    #[error("start-up aborted by shutdown request")]
    Aborted,
}

impl StartupError {
    pub fn config(message: impl Into<String>) -> Self {
        StartupError::Config(message.into())
    }

    /// Whether the failure needs operator correction rather than a plain restart.
    pub fn requires_operator(&self) -> bool {
        matches!(self, StartupError::Config(_) | StartupError::Security(_))
    }
}
