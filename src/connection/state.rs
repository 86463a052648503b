use std::{fmt, sync::Arc, time::Duration};

use crate::session::SessionClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEFAULT_BACKOFF_SECS: [u64; 6] = [1, 2, 5, 10, 30, 60];

/// Ordered retry delays. Attempts past the end keep using the last step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    steps: Vec<Duration>,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::from_secs(&DEFAULT_BACKOFF_SECS)
    }
}

impl BackoffSchedule {
    /// An empty list falls back to the default schedule.
    pub fn new(steps: Vec<Duration>) -> Self {
        if steps.is_empty() {
            return Self::default();
        }
        Self { steps }
    }

    pub fn from_secs(secs: &[u64]) -> Self {
        Self::new(secs.iter().map(|s| Duration::from_secs(*s)).collect())
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = (attempt as usize).min(self.steps.len() - 1);
        self.steps[index]
    }

    pub fn max_delay(&self) -> Duration {
        self.steps.iter().copied().max().unwrap_or_default()
    }
}

/// What the supervisor publishes to readers. `handle` is only ever set while
/// `state` is `Connected`.
#[derive(Clone)]
pub(crate) struct Link {
    pub state: ConnectionState,
    pub handle: Option<Arc<dyn SessionClient>>,
    pub attempt: u32,
}

impl Link {
    pub fn disconnected() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            handle: None,
            attempt: 0,
        }
    }
}
