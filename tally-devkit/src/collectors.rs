//! Scripted collectors for scheduler and pipeline tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tally_kernel::collector::{CollectError, CollectResult, Collector};
use tally_kernel::models::CollectorConfig;
use tokio_util::sync::CancellationToken;

/// Returns a fixed snapshot on every run and counts invocations.
pub struct ScriptedCollector {
    name: &'static str,
    result: Mutex<CollectResult>,
    runs: Arc<AtomicUsize>,
}

impl ScriptedCollector {
    pub fn new(name: &'static str, result: CollectResult) -> Self {
        Self {
            name,
            result: Mutex::new(result),
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replace the snapshot returned by subsequent runs.
    pub fn set_result(&self, result: CollectResult) {
        *self.result.lock() = result;
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn run_counter(&self) -> Arc<AtomicUsize> {
        self.runs.clone()
    }
}

#[async_trait]
impl Collector for ScriptedCollector {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn collect(
        &self,
        _cancel: &CancellationToken,
        _cfg: &CollectorConfig,
    ) -> Result<CollectResult, CollectError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(self.result.lock().clone())
    }
}

/// Fails every run with an upstream error.
pub struct FailingCollector {
    pub name: &'static str,
    runs: Arc<AtomicUsize>,
}

impl FailingCollector {
    pub fn new(name: &'static str) -> Self {
        Self { name, runs: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn run_counter(&self) -> Arc<AtomicUsize> {
        self.runs.clone()
    }
}

#[async_trait]
impl Collector for FailingCollector {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn collect(
        &self,
        _cancel: &CancellationToken,
        _cfg: &CollectorConfig,
    ) -> Result<CollectResult, CollectError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Err(CollectError::Upstream("scripted failure".into()))
    }
}

/// Blocks until cancelled (or a long timeout), then reports cancellation.
/// Models a slow network collect for shutdown tests.
pub struct HangingCollector {
    name: &'static str,
    started: Arc<AtomicUsize>,
}

impl HangingCollector {
    pub fn new(name: &'static str) -> Self {
        Self { name, started: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn start_counter(&self) -> Arc<AtomicUsize> {
        self.started.clone()
    }
}

#[async_trait]
impl Collector for HangingCollector {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn collect(
        &self,
        cancel: &CancellationToken,
        _cfg: &CollectorConfig,
    ) -> Result<CollectResult, CollectError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            _ = cancel.cancelled() => Err(CollectError::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs(3600)) => {
                Err(CollectError::Upstream("hang expired".into()))
            }
        }
    }
}
