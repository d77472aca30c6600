//! Background sweep that expires stale pending payments.

use std::time::Duration;

use saga::SagaCoordinator;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Runs [`SagaCoordinator::reconcile_stale_payments`] every `interval`
/// until `shutdown` flips to true.
///
/// A failed sweep is logged and retried on the next tick.
pub fn spawn(
    coordinator: SagaCoordinator,
    max_age: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(?max_age, ?interval, "payment reconciliation started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match coordinator.reconcile_stale_payments(max_age).await {
                        Ok(expired) if !expired.is_empty() => {
                            tracing::info!(count = expired.len(), "expired stale payments");
                        }
                        Ok(_) => {}
                        Err(err) => {
                            tracing::warn!(error = %err, "payment reconciliation failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("payment reconciliation stopped");
    })
}
