//! Periodic reclamation of idle and failed sessions.

use super::registry::SessionRegistry;
use std::sync::Arc;
use std::time::Duration;

/// Kill sessions idle for longer than `idle_timeout` and sessions whose
/// transcoder failed without output. Returns how many were reclaimed.
pub async fn sweep(registry: &SessionRegistry, idle_timeout: Duration) -> usize {
    let reclaimed = registry
        .pop_and_kill_matching(|session| {
            session.idle_for() > idle_timeout || session.has_failed()
        })
        .await;

    if reclaimed > 0 {
        tracing::info!(
            reclaimed,
            remaining = registry.len(),
            "Reclaimed idle or failed sessions"
        );
    }

    reclaimed
}

/// Start a background task that sweeps the registry every `interval`.
///
/// # Returns
/// A join handle for the background task.
pub fn start_sweeper(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    idle_timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            sweep(&registry, idle_timeout).await;
        }
    })
}
