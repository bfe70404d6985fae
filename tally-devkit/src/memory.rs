//! In-memory canonical store and graph store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tally_kernel::models::{
    AlertRule, Asset, AssetStatus, ChangeEvent, Relationship,
};
use tally_kernel::store::{
    normalize_depth, AlertRuleStore, AssetFilter, AssetStore, ChangeEventStore, GraphError,
    GraphNode, GraphSlice, GraphStore, StoreError,
};
use time::OffsetDateTime;
use uuid::Uuid;

/// In-memory canonical store with the same key and ordering semantics as
/// the Postgres implementation.
#[derive(Default)]
pub struct MemoryStore {
    assets: Mutex<HashMap<Uuid, Asset>>,
    events: Mutex<Vec<ChangeEvent>>,
    rules: Mutex<Vec<AlertRule>>,
    /// Harness knob: make the next N `get_by_external` calls miss, to
    /// simulate losing a first-sight insert race to another worker.
    missed_external_lookups: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn miss_next_external_lookups(&self, n: usize) {
        self.missed_external_lookups.store(n, Ordering::SeqCst);
    }

    /// Direct snapshot of every stored asset, for assertions.
    pub fn dump_assets(&self) -> Vec<Asset> {
        self.assets.lock().values().cloned().collect()
    }

    /// Direct snapshot of the change history, for assertions.
    pub fn dump_events(&self) -> Vec<ChangeEvent> {
        self.events.lock().clone()
    }

    /// Overwrite an asset in place, bypassing `updated_at` stamping. Used
    /// by tests to backdate `last_seen` for sweep scenarios.
    pub fn put_asset_raw(&self, asset: Asset) {
        self.assets.lock().insert(asset.id, asset);
    }

    fn matches(filter: &AssetFilter, asset: &Asset) -> bool {
        if let Some(source) = &filter.source {
            if &asset.source != source {
                return false;
            }
        }
        if let Some(asset_type) = &filter.asset_type {
            if &asset.asset_type != asset_type {
                return false;
            }
        }
        if let Some(status) = filter.status {
            if asset.status != status {
                return false;
            }
        }
        if let Some(search) = &filter.search {
            let needle = search.to_lowercase();
            let name_hit = asset.name.to_lowercase().contains(&needle);
            let fqdn_hit = asset
                .fqdn
                .as_deref()
                .map(|f| f.to_lowercase().contains(&needle))
                .unwrap_or(false);
            if !name_hit && !fqdn_hit {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl AssetStore for MemoryStore {
    async fn create(&self, asset: &Asset) -> Result<(), StoreError> {
        let mut assets = self.assets.lock();
        let collides = assets
            .values()
            .any(|a| a.source == asset.source && a.external_id == asset.external_id);
        if collides {
            return Err(StoreError::UniqueViolation(format!(
                "({}, {})",
                asset.source, asset.external_id
            )));
        }
        assets.insert(asset.id, asset.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Asset, StoreError> {
        self.assets.lock().get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_by_external(&self, source: &str, external_id: &str) -> Result<Asset, StoreError> {
        let missed = self.missed_external_lookups.load(Ordering::SeqCst);
        if missed > 0 {
            self.missed_external_lookups.store(missed - 1, Ordering::SeqCst);
            return Err(StoreError::NotFound);
        }
        self.assets
            .lock()
            .values()
            .find(|a| a.source == source && a.external_id == external_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self, filter: &AssetFilter) -> Result<(Vec<Asset>, i64), StoreError> {
        let assets = self.assets.lock();
        let mut hits: Vec<Asset> =
            assets.values().filter(|a| Self::matches(filter, a)).cloned().collect();
        let total = hits.len() as i64;

        hits.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));

        let offset = filter.normalized_offset() as usize;
        let limit = filter.normalized_limit() as usize;
        let page = hits.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }

    async fn update(&self, asset: &Asset) -> Result<(), StoreError> {
        let mut assets = self.assets.lock();
        if !assets.contains_key(&asset.id) {
            return Err(StoreError::NotFound);
        }
        let mut updated = asset.clone();
        updated.updated_at = OffsetDateTime::now_utc();
        assets.insert(asset.id, updated);
        Ok(())
    }

    async fn mark_seen(
        &self,
        id: Uuid,
        last_seen: OffsetDateTime,
        status: AssetStatus,
    ) -> Result<(), StoreError> {
        let mut assets = self.assets.lock();
        let asset = assets.get_mut(&id).ok_or(StoreError::NotFound)?;
        asset.last_seen = last_seen;
        asset.status = status;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let removed = self.assets.lock().remove(&id).is_some();
        if !removed {
            return Err(StoreError::NotFound);
        }
        // change_events cascade on asset delete
        self.events.lock().retain(|e| e.asset_id != id);
        Ok(())
    }

    async fn find_by_ip(&self, ip: &str) -> Result<Vec<Asset>, StoreError> {
        Ok(self
            .assets
            .lock()
            .values()
            .filter(|a| {
                a.status != AssetStatus::Removed && a.ip_addresses.iter().any(|i| i == ip)
            })
            .cloned()
            .collect())
    }

    async fn find_by_fqdn(&self, fqdn: &str) -> Result<Vec<Asset>, StoreError> {
        Ok(self
            .assets
            .lock()
            .values()
            .filter(|a| a.status != AssetStatus::Removed && a.fqdn.as_deref() == Some(fqdn))
            .cloned()
            .collect())
    }

    async fn find_unseen(
        &self,
        source: &str,
        cutoff: OffsetDateTime,
    ) -> Result<Vec<Asset>, StoreError> {
        Ok(self
            .assets
            .lock()
            .values()
            .filter(|a| {
                a.source == source && a.status != AssetStatus::Removed && a.last_seen < cutoff
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ChangeEventStore for MemoryStore {
    async fn create_change_event(&self, event: &ChangeEvent) -> Result<(), StoreError> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    async fn list_changes_by_asset(
        &self,
        asset_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ChangeEvent>, i64), StoreError> {
        let events = self.events.lock();
        let mut hits: Vec<ChangeEvent> =
            events.iter().filter(|e| e.asset_id == asset_id).cloned().collect();
        let total = hits.len() as i64;
        hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok((hits.into_iter().skip(offset as usize).take(limit as usize).collect(), total))
    }

    async fn list_recent_changes(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ChangeEvent>, i64), StoreError> {
        let events = self.events.lock();
        let total = events.len() as i64;
        let mut hits: Vec<ChangeEvent> = events.clone();
        hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok((hits.into_iter().skip(offset as usize).take(limit as usize).collect(), total))
    }
}

#[async_trait]
impl AlertRuleStore for MemoryStore {
    async fn create_alert_rule(&self, rule: &AlertRule) -> Result<(), StoreError> {
        self.rules.lock().push(rule.clone());
        Ok(())
    }

    async fn list_alert_rules(&self) -> Result<Vec<AlertRule>, StoreError> {
        Ok(self.rules.lock().clone())
    }

    async fn delete_alert_rule(&self, id: Uuid) -> Result<(), StoreError> {
        let mut rules = self.rules.lock();
        let before = rules.len();
        rules.retain(|r| r.id != id);
        if rules.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

/// In-memory graph projection with the same upsert and traversal semantics
/// as the Postgres implementation.
#[derive(Default)]
pub struct MemoryGraph {
    nodes: Mutex<HashMap<Uuid, GraphNode>>,
    edges: Mutex<HashMap<Uuid, Relationship>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.lock().len()
    }

    pub fn dump_edges(&self) -> Vec<Relationship> {
        self.edges.lock().values().cloned().collect()
    }

    pub fn node(&self, id: Uuid) -> Option<GraphNode> {
        self.nodes.lock().get(&id).cloned()
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn upsert_node(&self, asset: &Asset) -> Result<(), GraphError> {
        self.nodes.lock().insert(asset.id, GraphNode::from(asset));
        Ok(())
    }

    async fn delete_node(&self, id: Uuid) -> Result<(), GraphError> {
        self.nodes.lock().remove(&id);
        self.edges.lock().retain(|_, e| e.from_id != id && e.to_id != id);
        Ok(())
    }

    async fn upsert_relationship(&self, rel: &Relationship) -> Result<(), GraphError> {
        let nodes = self.nodes.lock();
        if !nodes.contains_key(&rel.from_id) {
            return Err(GraphError::MissingEndpoint(rel.from_id));
        }
        if !nodes.contains_key(&rel.to_id) {
            return Err(GraphError::MissingEndpoint(rel.to_id));
        }
        drop(nodes);

        let mut edges = self.edges.lock();
        // Shape key (from, to, type, source) wins over the per-run edge id.
        let existing = edges
            .values()
            .find(|e| {
                e.from_id == rel.from_id
                    && e.to_id == rel.to_id
                    && e.rel_type == rel.rel_type
                    && e.source == rel.source
            })
            .map(|e| e.id);
        match existing {
            Some(id) => {
                let edge = edges.get_mut(&id).expect("edge indexed by id");
                edge.properties = rel.properties.clone();
                edge.updated_at = rel.updated_at;
            }
            None => {
                edges.insert(rel.id, rel.clone());
            }
        }
        Ok(())
    }

    async fn delete_relationship(&self, id: Uuid) -> Result<(), GraphError> {
        self.edges.lock().remove(&id);
        Ok(())
    }

    async fn get_relationships(&self, asset_id: Uuid) -> Result<Vec<Relationship>, GraphError> {
        Ok(self
            .edges
            .lock()
            .values()
            .filter(|e| e.from_id == asset_id || e.to_id == asset_id)
            .cloned()
            .collect())
    }

    async fn get_dependency_graph(
        &self,
        asset_id: Uuid,
        depth: i64,
    ) -> Result<GraphSlice, GraphError> {
        self.traverse(asset_id, depth, true)
    }

    async fn get_impact_graph(&self, asset_id: Uuid, depth: i64) -> Result<GraphSlice, GraphError> {
        self.traverse(asset_id, depth, false)
    }
}

impl MemoryGraph {
    fn traverse(&self, start: Uuid, depth: i64, outgoing: bool) -> Result<GraphSlice, GraphError> {
        let depth = normalize_depth(depth)?;
        let edges = self.edges.lock();
        let nodes = self.nodes.lock();

        let mut visited: HashSet<Uuid> = HashSet::from([start]);
        let mut edge_ids: HashSet<Uuid> = HashSet::new();
        let mut slice_edges = Vec::new();
        let mut frontier = vec![start];

        for _ in 0..depth {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for edge in edges.values() {
                let (anchor, neighbor) = if outgoing {
                    (edge.from_id, edge.to_id)
                } else {
                    (edge.to_id, edge.from_id)
                };
                if !frontier.contains(&anchor) {
                    continue;
                }
                if edge_ids.insert(edge.id) {
                    slice_edges.push(edge.clone());
                }
                if visited.insert(neighbor) {
                    next.push(neighbor);
                }
            }
            frontier = next;
        }

        let slice_nodes =
            visited.iter().filter_map(|id| nodes.get(id).cloned()).collect();
        Ok(GraphSlice { nodes: slice_nodes, edges: slice_edges })
    }
}
