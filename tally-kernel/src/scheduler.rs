//! Periodic driver for the registered collectors.
//!
//! One independent worker task per enabled collector: an immediate first
//! collection, then a monotonic tick loop at the configured interval.
//! Missed ticks are skipped, never queued, and the collect + reconcile body
//! runs inline so iterations of one collector are strictly serialized.

use crate::collector::{CollectorNotFound, Registry};
use crate::config::DEFAULT_COLLECT_INTERVAL;
use crate::models::CollectorConfig;
use crate::reconciler::Reconciler;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Scheduler {
    registry: Arc<Registry>,
    reconciler: Arc<Reconciler>,
    cancel: CancellationToken,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Workers observe a child of `root`, so cancelling either the root or
    /// calling [`Scheduler::stop`] stops them.
    pub fn new(registry: Arc<Registry>, reconciler: Arc<Reconciler>, root: &CancellationToken) -> Self {
        Self {
            registry,
            reconciler,
            cancel: root.child_token(),
            workers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Spawn one worker per enabled collector.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        for name in self.registry.names() {
            let (_, config) = match self.registry.get(&name) {
                Ok(found) => found,
                Err(e) => {
                    error!(name = %name, error = %e, "collector vanished from registry");
                    continue;
                }
            };
            if !config.enabled {
                info!(name = %name, "collector disabled, skipping");
                continue;
            }

            let registry = self.registry.clone();
            let reconciler = self.reconciler.clone();
            let token = self.cancel.clone();
            workers.push(tokio::spawn(async move {
                run_worker(registry, reconciler, token, name, config).await;
            }));
        }
        info!("scheduler started");
    }

    /// Trigger an immediate run in an independent task. Does not reset the
    /// periodic tick; cancellable via the same token as the workers.
    pub fn run_now(&self, name: &str) -> Result<(), CollectorNotFound> {
        let (_, config) = self.registry.get(name)?;
        let registry = self.registry.clone();
        let reconciler = self.reconciler.clone();
        let token = self.cancel.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            run_collection(&registry, &reconciler, &token, &name, &config).await;
        });
        Ok(())
    }

    /// Cancel all workers and wait for their current iteration to finish.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "scheduler worker panicked");
            }
        }
        info!("scheduler stopped");
    }
}

async fn run_worker(
    registry: Arc<Registry>,
    reconciler: Arc<Reconciler>,
    token: CancellationToken,
    name: String,
    config: CollectorConfig,
) {
    let interval = effective_interval(config.interval);
    let mut ticker = tokio::time::interval(interval);
    // A tick that fires while a collection is still running is dropped,
    // not queued behind it.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!(name = %name, "collector worker stopping");
                return;
            }
            // First tick completes immediately, giving the immediate
            // first collection.
            _ = ticker.tick() => {
                run_collection(&registry, &reconciler, &token, &name, &config).await;
            }
        }
    }
}

async fn run_collection(
    registry: &Registry,
    reconciler: &Reconciler,
    token: &CancellationToken,
    name: &str,
    config: &CollectorConfig,
) {
    let (collector, _) = match registry.get(name) {
        Ok(found) => found,
        Err(e) => {
            error!(name = %name, error = %e, "collector not in registry");
            return;
        }
    };

    info!(name = %name, source = collector.name(), "running collector");
    registry.mark_running(name);

    let result = match collector.collect(token, config).await {
        Ok(result) => result,
        Err(e) => {
            error!(name = %name, error = %e, "collector failed");
            registry.mark_finished(name, Err(e.to_string()));
            return;
        }
    };

    info!(
        name = %name,
        assets = result.assets.len(),
        relationships = result.relationships.len(),
        "collector completed"
    );

    let asset_count = result.assets.len();
    let summary = reconciler.reconcile(collector.name(), &result).await;
    if summary.errors > 0 {
        warn!(name = %name, errors = summary.errors, "reconciliation finished with errors");
    }
    registry.mark_finished(name, Ok(asset_count));
}

/// `interval <= 0` means "use the default" (5 minutes).
fn effective_interval(interval: Duration) -> Duration {
    if interval.is_zero() {
        DEFAULT_COLLECT_INTERVAL
    } else {
        interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_falls_back_to_default() {
        assert_eq!(effective_interval(Duration::ZERO), DEFAULT_COLLECT_INTERVAL);
        assert_eq!(effective_interval(Duration::from_secs(60)), Duration::from_secs(60));
    }
}
