//! Collector contract and the thread-safe registry of configured sources.
//!
//! A collector produces one complete snapshot of its source's current view.
//! Relationships in the snapshot may reference run-local asset IDs; the
//! reconciler remaps them to canonical IDs after identity resolution.

use crate::models::{Asset, CollectorConfig, CollectorStatus, Relationship};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Assets and relationships discovered in one collection run.
#[derive(Debug, Default, Clone)]
pub struct CollectResult {
    pub assets: Vec<Asset>,
    pub relationships: Vec<Relationship>,
}

/// Adapter failure kinds. The scheduler records these on the collector
/// status and keeps the worker alive.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("missing required setting: {0}")]
    MissingSetting(&'static str),
    #[error("collection cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("upstream error: {0}")]
    Upstream(String),
}

/// The adapter contract: a stable name and one-shot snapshot collection.
/// `collect` may block on I/O and must honor cancellation.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Stable source identifier; collected assets carry it as `source`.
    fn name(&self) -> &'static str;

    async fn collect(
        &self,
        cancel: &CancellationToken,
        cfg: &CollectorConfig,
    ) -> Result<CollectResult, CollectError>;
}

struct Entry {
    collector: Arc<dyn Collector>,
    config: CollectorConfig,
    status: CollectorStatus,
}

/// Registry error: the only failure is an unknown name.
#[derive(Debug, thiserror::Error)]
#[error("collector not found: {0}")]
pub struct CollectorNotFound(pub String);

/// Thread-safe mapping `config name -> (collector, config, status)`.
///
/// The registry holds references and mutable status only; it does not own
/// collector lifetime. Reads take the read lock, registration the write
/// lock; guards are never held across await points.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collector under its config name. Idempotent by name;
    /// last registration wins.
    pub fn register(&self, collector: Arc<dyn Collector>, config: CollectorConfig) {
        let name = config.name.clone();
        let status = CollectorStatus::new(&name);
        self.entries
            .write()
            .insert(name.clone(), Entry { collector, config, status });
        info!(name = %name, "registered collector");
    }

    pub fn get(
        &self,
        name: &str,
    ) -> Result<(Arc<dyn Collector>, CollectorConfig), CollectorNotFound> {
        let entries = self.entries.read();
        let entry = entries.get(name).ok_or_else(|| CollectorNotFound(name.to_string()))?;
        Ok((entry.collector.clone(), entry.config.clone()))
    }

    /// Snapshot of all statuses; callers get copies, never the live map.
    pub fn list(&self) -> Vec<CollectorStatus> {
        let mut statuses: Vec<CollectorStatus> =
            self.entries.read().values().map(|e| e.status.clone()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Snapshot of registered names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Mark a collection run as started.
    pub fn mark_running(&self, name: &str) {
        if let Some(entry) = self.entries.write().get_mut(name) {
            entry.status.running = true;
            entry.status.last_run = Some(OffsetDateTime::now_utc());
        }
    }

    /// Record the outcome of a collection run.
    pub fn mark_finished(&self, name: &str, outcome: Result<usize, String>) {
        if let Some(entry) = self.entries.write().get_mut(name) {
            entry.status.running = false;
            match outcome {
                Ok(asset_count) => {
                    entry.status.last_success = Some(OffsetDateTime::now_utc());
                    entry.status.last_error = None;
                    entry.status.asset_count = asset_count;
                }
                Err(message) => {
                    entry.status.last_error = Some(message);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(&'static str);

    #[async_trait]
    impl Collector for Dummy {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn collect(
            &self,
            _cancel: &CancellationToken,
            _cfg: &CollectorConfig,
        ) -> Result<CollectResult, CollectError> {
            Ok(CollectResult::default())
        }
    }

    #[test]
    fn register_is_last_wins_by_name() {
        let registry = Registry::new();
        let mut cfg = CollectorConfig::new("lan", "nmap");
        cfg.enabled = false;
        registry.register(Arc::new(Dummy("nmap")), cfg.clone());

        cfg.enabled = true;
        registry.register(Arc::new(Dummy("nmap")), cfg);

        assert_eq!(registry.names(), vec!["lan".to_string()]);
        let (_, config) = registry.get("lan").unwrap();
        assert!(config.enabled);
    }

    #[test]
    fn get_unknown_name_errors() {
        let registry = Registry::new();
        assert!(registry.get("ghost").is_err());
    }

    #[test]
    fn list_returns_detached_snapshots() {
        let registry = Registry::new();
        registry.register(Arc::new(Dummy("nmap")), CollectorConfig::new("lan", "nmap"));

        let mut snapshot = registry.list();
        snapshot[0].asset_count = 999;

        assert_eq!(registry.list()[0].asset_count, 0);
    }

    #[test]
    fn status_tracks_run_outcomes() {
        let registry = Registry::new();
        registry.register(Arc::new(Dummy("nmap")), CollectorConfig::new("lan", "nmap"));

        registry.mark_running("lan");
        assert!(registry.list()[0].running);

        registry.mark_finished("lan", Err("boom".into()));
        let status = &registry.list()[0];
        assert!(!status.running);
        assert_eq!(status.last_error.as_deref(), Some("boom"));
        assert!(status.last_success.is_none());

        registry.mark_running("lan");
        registry.mark_finished("lan", Ok(7));
        let status = &registry.list()[0];
        assert_eq!(status.asset_count, 7);
        assert!(status.last_error.is_none());
        assert!(status.last_success.is_some());
    }
}
