//! Data-access seams for the canonical store and the relationship graph.
//!
//! The reconciler, scheduler, and HTTP layer only ever see these traits;
//! `PgStore` and `PgGraph` are the durable implementations, and the devkit
//! ships in-memory doubles for tests.

pub mod graph;
pub mod postgres;

use crate::models::{AlertRule, Asset, AssetStatus, ChangeEvent, Relationship};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

pub use graph::PgGraph;
pub use postgres::PgStore;

/// Canonical-store failure kinds.
///
/// `NotFound` is a control-flow signal for the reconciler, never logged as
/// an error there. `UniqueViolation` means a `(source, external_id)`
/// collision on insert.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("unique constraint violation: {0}")]
    UniqueViolation(String),
    #[error("store backend error: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Graph-store failure kinds.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("relationship endpoint missing in graph: {0}")]
    MissingEndpoint(Uuid),
    #[error("traversal depth {0} exceeds maximum {MAX_TRAVERSAL_DEPTH}")]
    DepthExceeded(i64),
    #[error("graph backend error: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Query parameters for listing assets.
#[derive(Debug, Clone, Default)]
pub struct AssetFilter {
    pub source: Option<String>,
    pub asset_type: Option<String>,
    pub status: Option<AssetStatus>,
    /// Case-insensitive substring match against name and fqdn.
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl AssetFilter {
    /// Clamp the page size into `[1, 100]`; out-of-range values fall back
    /// to the default of 50.
    pub fn normalized_limit(&self) -> i64 {
        if self.limit < 1 || self.limit > 100 {
            50
        } else {
            self.limit
        }
    }

    pub fn normalized_offset(&self) -> i64 {
        self.offset.max(0)
    }
}

/// Operations on the canonical asset records.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Insert a new asset. Fails with [`StoreError::UniqueViolation`] if
    /// `(source, external_id)` already exists.
    async fn create(&self, asset: &Asset) -> Result<(), StoreError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Asset, StoreError>;

    async fn get_by_external(&self, source: &str, external_id: &str) -> Result<Asset, StoreError>;

    /// Rows ordered by `updated_at` descending (ties broken by id), plus
    /// the total count under the same predicate.
    async fn list(&self, filter: &AssetFilter) -> Result<(Vec<Asset>, i64), StoreError>;

    /// Persist all mutable fields, stamping `updated_at = now()`.
    async fn update(&self, asset: &Asset) -> Result<(), StoreError>;

    /// Persist only the sighting bump: `last_seen` and `status`. Leaves
    /// `updated_at` untouched so no-op re-sightings stay invisible.
    async fn mark_seen(
        &self,
        id: Uuid,
        last_seen: OffsetDateTime,
        status: AssetStatus,
    ) -> Result<(), StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    /// Equality lookup over the IP set. Excludes removed assets.
    async fn find_by_ip(&self, ip: &str) -> Result<Vec<Asset>, StoreError>;

    /// Equality lookup on FQDN. Excludes removed assets.
    async fn find_by_fqdn(&self, fqdn: &str) -> Result<Vec<Asset>, StoreError>;

    /// Active or stale assets of `source` not seen since `cutoff`; feeds
    /// the reconciler's lifecycle sweep.
    async fn find_unseen(
        &self,
        source: &str,
        cutoff: OffsetDateTime,
    ) -> Result<Vec<Asset>, StoreError>;
}

/// Operations on the append-only change history.
#[async_trait]
pub trait ChangeEventStore: Send + Sync {
    async fn create_change_event(&self, event: &ChangeEvent) -> Result<(), StoreError>;

    async fn list_changes_by_asset(
        &self,
        asset_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ChangeEvent>, i64), StoreError>;

    async fn list_recent_changes(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ChangeEvent>, i64), StoreError>;
}

/// Operations on durable alert rules.
#[async_trait]
pub trait AlertRuleStore: Send + Sync {
    async fn create_alert_rule(&self, rule: &AlertRule) -> Result<(), StoreError>;
    async fn list_alert_rules(&self) -> Result<Vec<AlertRule>, StoreError>;
    async fn delete_alert_rule(&self, id: Uuid) -> Result<(), StoreError>;
}

/// The full canonical-store surface the service wires together.
pub trait CanonicalStore: AssetStore + ChangeEventStore + AlertRuleStore {}

impl<T: AssetStore + ChangeEventStore + AlertRuleStore> CanonicalStore for T {}

/// Default traversal depth when the caller passes `depth <= 0`.
pub const DEFAULT_TRAVERSAL_DEPTH: i64 = 3;

/// Hard ceiling on traversal depth; deeper requests are rejected.
pub const MAX_TRAVERSAL_DEPTH: i64 = 10;

/// Normalize a requested traversal depth: `<= 0` becomes the default,
/// anything beyond the ceiling is an error.
pub fn normalize_depth(depth: i64) -> Result<u32, GraphError> {
    if depth > MAX_TRAVERSAL_DEPTH {
        return Err(GraphError::DepthExceeded(depth));
    }
    if depth <= 0 {
        Ok(DEFAULT_TRAVERSAL_DEPTH as u32)
    } else {
        Ok(depth as u32)
    }
}

/// Denormalized node projection kept in the graph store for traversal.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GraphNode {
    pub id: Uuid,
    pub name: String,
    pub asset_type: String,
    pub source: String,
    pub status: AssetStatus,
}

impl From<&Asset> for GraphNode {
    fn from(asset: &Asset) -> Self {
        Self {
            id: asset.id,
            name: asset.name.clone(),
            asset_type: asset.asset_type.clone(),
            source: asset.source.clone(),
            status: asset.status,
        }
    }
}

/// A bounded subgraph: deduplicated node and edge sets.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct GraphSlice {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<Relationship>,
}

/// Operations on the relationship graph projection.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create or update the node keyed on `asset.id`.
    async fn upsert_node(&self, asset: &Asset) -> Result<(), GraphError>;

    /// Remove the node and all incident edges atomically.
    async fn delete_node(&self, id: Uuid) -> Result<(), GraphError>;

    /// Upsert an edge; both endpoints must already exist as nodes.
    async fn upsert_relationship(&self, rel: &Relationship) -> Result<(), GraphError>;

    async fn delete_relationship(&self, id: Uuid) -> Result<(), GraphError>;

    /// All edges incident to the asset, both directions.
    async fn get_relationships(&self, asset_id: Uuid) -> Result<Vec<Relationship>, GraphError>;

    /// Nodes reachable via outgoing edges up to `depth` hops.
    async fn get_dependency_graph(&self, asset_id: Uuid, depth: i64)
        -> Result<GraphSlice, GraphError>;

    /// Nodes reaching this asset via incoming edges up to `depth` hops.
    async fn get_impact_graph(&self, asset_id: Uuid, depth: i64) -> Result<GraphSlice, GraphError>;
}
