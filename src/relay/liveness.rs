// Periodic heartbeat sweep over the registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use super::registry::Registry;

/// Run the heartbeat sweep until the shutdown signal flips. Owned by the
/// relay's run loop, so the timer never outlives the server.
pub(crate) async fn run(
    registry: Arc<Registry>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    // The first tick completes immediately; consume it so the first sweep
    // happens after one full period.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let evicted = registry.sweep();
                debug!(
                    "Heartbeat sweep: {} connection(s) open, {} evicted",
                    registry.len(),
                    evicted.len()
                );
            }
            _ = shutdown.changed() => break,
        }
    }
}
