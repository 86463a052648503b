use chrono::Local;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::orchestrator::CollectionOrchestrator;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Polls every `interval` until `cancel_token` fires. Ticks never overlap; a
/// slow tick pushes the next one back instead of bunching them up.
pub async fn collection_loop(
    orchestrator: &mut CollectionOrchestrator,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    log_info!("Collection loop started (interval: {}s)", interval.as_secs_f64());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let summary = orchestrator.collect_once(Local::now().naive_local()).await;
                if summary.skipped {
                    log_debug!("Tick skipped: no live session");
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("Collection loop shutting down");
                break;
            }
        }
    }
}
