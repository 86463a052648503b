use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// Details of a completed connect, passed to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectNotice {
    /// Connection attempts this took, including the successful one.
    pub attempts: u32,
    /// Set when this connect ended an outage.
    pub downtime: Option<Duration>,
}

impl ConnectNotice {
    pub fn is_reconnect(&self) -> bool {
        self.downtime.is_some()
    }
}

/// Notified exactly once per lifecycle transition. Errors are logged by the
/// manager and otherwise ignored.
#[async_trait]
pub trait ConnectionObserver: Send + Sync {
    async fn on_connected(&self, _notice: &ConnectNotice) -> Result<()> {
        Ok(())
    }

    async fn on_disconnected(&self, _reason: &str) -> Result<()> {
        Ok(())
    }
}

pub struct NoopObserver;

impl ConnectionObserver for NoopObserver {}
