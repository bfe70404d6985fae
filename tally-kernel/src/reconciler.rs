//! Reconciliation engine: matches collector snapshots against the canonical
//! inventory, detects changes, keeps the graph projection in step, and
//! emits change events.
//!
//! Identity resolution is a three-stage cascade per incoming asset:
//!
//! 1. exact `(source, external_id)`, authoritative when present;
//! 2. IP lookup, accepted only on exactly one candidate;
//! 3. FQDN lookup, same single-candidate rule.
//!
//! Everything here recovers locally: a bad asset or relationship is logged
//! and skipped, graph failures never taint canonical state, and publish
//! failures are warnings.

use crate::bus::EventPublisher;
use crate::collector::CollectResult;
use crate::models::{Asset, AssetStatus, ChangeAction, ChangeEvent, Relationship};
use crate::store::{CanonicalStore, GraphStore, StoreError};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome counters for one reconciled batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub marked_stale: usize,
    pub removed: usize,
    pub relationships: usize,
    pub errors: usize,
}

pub struct Reconciler {
    store: Arc<dyn CanonicalStore>,
    graph: Option<Arc<dyn GraphStore>>,
    publisher: Option<Arc<dyn EventPublisher>>,
    /// How long a stale asset survives before transitioning to removed.
    removal_grace: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn CanonicalStore>,
        graph: Option<Arc<dyn GraphStore>>,
        publisher: Option<Arc<dyn EventPublisher>>,
        removal_grace: Duration,
    ) -> Self {
        Self { store, graph, publisher, removal_grace }
    }

    /// Reconcile one collector snapshot for `source`.
    ///
    /// Per-item failures are logged and skipped; the batch always runs to
    /// completion and ends with the lifecycle sweep for the source.
    pub async fn reconcile(&self, source: &str, result: &CollectResult) -> RunSummary {
        let run_started_at = OffsetDateTime::now_utc();
        let mut summary = RunSummary::default();

        // local (per-run) asset id -> canonical id, for endpoint remapping
        let mut id_map: HashMap<Uuid, Uuid> = HashMap::new();

        for incoming in &result.assets {
            match self.reconcile_asset(incoming).await {
                Ok(outcome) => {
                    id_map.insert(incoming.id, outcome.canonical_id);
                    match outcome.kind {
                        OutcomeKind::Created => summary.created += 1,
                        OutcomeKind::Updated => summary.updated += 1,
                        OutcomeKind::Unchanged => summary.unchanged += 1,
                    }
                }
                Err(e) => {
                    summary.errors += 1;
                    warn!(
                        external_id = %incoming.external_id,
                        source = %incoming.source,
                        error = %e,
                        "failed to reconcile asset"
                    );
                }
            }
        }

        for rel in &result.relationships {
            match self.reconcile_relationship(rel, &id_map).await {
                Ok(()) => summary.relationships += 1,
                Err(e) => {
                    summary.errors += 1;
                    warn!(
                        from = %rel.from_id,
                        to = %rel.to_id,
                        rel_type = %rel.rel_type,
                        error = %e,
                        "failed to reconcile relationship"
                    );
                }
            }
        }

        self.sweep_unseen(source, run_started_at, &mut summary).await;

        info!(
            source,
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            stale = summary.marked_stale,
            removed = summary.removed,
            relationships = summary.relationships,
            errors = summary.errors,
            "reconciliation complete"
        );
        summary
    }

    async fn reconcile_asset(&self, incoming: &Asset) -> Result<AssetOutcome, StoreError> {
        // Stage 1: exact source identity. Authoritative when present.
        let existing = match self
            .store
            .get_by_external(&incoming.source, &incoming.external_id)
            .await
        {
            Ok(asset) => Some(asset),
            Err(StoreError::NotFound) => self.fuzzy_match(incoming).await,
            Err(e) => return Err(e),
        };

        match existing {
            None => self.insert_new(incoming).await,
            Some(existing) => self.apply_sighting(existing, incoming).await,
        }
    }

    /// Stages 2 and 3: single-candidate IP, then single-candidate FQDN.
    /// Multiple candidates mean the bridge is ambiguous and is skipped.
    async fn fuzzy_match(&self, incoming: &Asset) -> Option<Asset> {
        for ip in &incoming.ip_addresses {
            match self.store.find_by_ip(ip).await {
                Ok(candidates) if candidates.len() == 1 => {
                    return candidates.into_iter().next();
                }
                Ok(_) => {}
                Err(e) => warn!(ip = %ip, error = %e, "ip lookup failed"),
            }
        }

        if let Some(fqdn) = incoming.fqdn.as_deref().filter(|f| !f.is_empty()) {
            match self.store.find_by_fqdn(fqdn).await {
                Ok(candidates) if candidates.len() == 1 => {
                    return candidates.into_iter().next();
                }
                Ok(_) => {}
                Err(e) => warn!(fqdn = %fqdn, error = %e, "fqdn lookup failed"),
            }
        }

        None
    }

    async fn insert_new(&self, incoming: &Asset) -> Result<AssetOutcome, StoreError> {
        let now = OffsetDateTime::now_utc();
        let mut asset = incoming.clone();
        asset.first_seen = now;
        asset.last_seen = now;
        asset.status = AssetStatus::Active;
        asset.created_at = now;
        asset.updated_at = now;

        match self.store.create(&asset).await {
            Ok(()) => {}
            Err(StoreError::UniqueViolation(_)) => {
                // Raced another worker on first sight; the row exists now,
                // so re-read and take the update path.
                debug!(
                    external_id = %asset.external_id,
                    source = %asset.source,
                    "first-sight insert raced, falling through to update"
                );
                let existing =
                    self.store.get_by_external(&asset.source, &asset.external_id).await?;
                return self.apply_sighting(existing, incoming).await;
            }
            Err(e) => return Err(e),
        }

        self.project_node(&asset).await;
        self.emit_event(ChangeEvent::new(asset.id, ChangeAction::AssetCreated, &asset.source, None))
            .await;

        Ok(AssetOutcome { canonical_id: asset.id, kind: OutcomeKind::Created })
    }

    async fn apply_sighting(
        &self,
        mut existing: Asset,
        incoming: &Asset,
    ) -> Result<AssetOutcome, StoreError> {
        let now = OffsetDateTime::now_utc();
        let diff = detect_changes(&existing, incoming);

        existing.last_seen = now;
        existing.status = AssetStatus::Active;

        if diff.is_empty() {
            // Sighting only: bump last_seen/status without touching
            // updated_at, and emit nothing.
            self.store.mark_seen(existing.id, now, AssetStatus::Active).await?;
            return Ok(AssetOutcome { canonical_id: existing.id, kind: OutcomeKind::Unchanged });
        }

        existing.name = incoming.name.clone();
        existing.fqdn = incoming.fqdn.clone();
        existing.ip_addresses = incoming.ip_addresses.clone();
        existing.attributes = incoming.attributes.clone();
        existing.updated_at = now;

        self.store.update(&existing).await?;
        self.project_node(&existing).await;

        let diff_json = serde_json::Value::Object(diff);
        self.emit_event(ChangeEvent::new(
            existing.id,
            ChangeAction::AssetUpdated,
            &existing.source,
            Some(diff_json),
        ))
        .await;

        Ok(AssetOutcome { canonical_id: existing.id, kind: OutcomeKind::Updated })
    }

    /// Remap run-local endpoints to canonical ids and upsert the edge.
    /// Endpoints absent from the map pass through unchanged (the collector
    /// may already reference canonical ids).
    async fn reconcile_relationship(
        &self,
        rel: &Relationship,
        id_map: &HashMap<Uuid, Uuid>,
    ) -> Result<(), crate::store::GraphError> {
        let Some(graph) = &self.graph else {
            return Ok(());
        };

        let mut edge = rel.clone();
        if let Some(canonical) = id_map.get(&rel.from_id) {
            edge.from_id = *canonical;
        }
        if let Some(canonical) = id_map.get(&rel.to_id) {
            edge.to_id = *canonical;
        }
        graph.upsert_relationship(&edge).await
    }

    /// Lifecycle sweep: assets of this source not seen by this run turn
    /// stale, and past the grace period stale turns removed (with an
    /// `asset.removed` event and the graph node dropped).
    async fn sweep_unseen(
        &self,
        source: &str,
        run_started_at: OffsetDateTime,
        summary: &mut RunSummary,
    ) {
        let unseen = match self.store.find_unseen(source, run_started_at).await {
            Ok(assets) => assets,
            Err(e) => {
                warn!(source, error = %e, "lifecycle sweep lookup failed");
                summary.errors += 1;
                return;
            }
        };

        let removal_cutoff = run_started_at - self.removal_grace;

        for asset in unseen {
            let expired = asset.last_seen < removal_cutoff;
            // Transitions are monotonic and stepwise: an expired active
            // asset still passes through stale before removal.
            let next = match (asset.status, expired) {
                (AssetStatus::Active, _) => AssetStatus::Stale,
                (AssetStatus::Stale, true) => AssetStatus::Removed,
                (AssetStatus::Stale, false) => continue,
                (AssetStatus::Removed, _) => continue,
            };

            if let Err(e) = self.store.mark_seen(asset.id, asset.last_seen, next).await {
                warn!(asset_id = %asset.id, error = %e, "lifecycle transition failed");
                summary.errors += 1;
                continue;
            }

            match next {
                AssetStatus::Stale => {
                    summary.marked_stale += 1;
                    let mut projected = asset.clone();
                    projected.status = AssetStatus::Stale;
                    self.project_node(&projected).await;
                }
                AssetStatus::Removed => {
                    summary.removed += 1;
                    if let Some(graph) = &self.graph {
                        if let Err(e) = graph.delete_node(asset.id).await {
                            warn!(asset_id = %asset.id, error = %e, "graph node delete failed");
                        }
                    }
                    self.emit_event(ChangeEvent::new(
                        asset.id,
                        ChangeAction::AssetRemoved,
                        source,
                        None,
                    ))
                    .await;
                }
                AssetStatus::Active => unreachable!(),
            }
        }
    }

    /// Best-effort graph projection; canonical state stays authoritative.
    async fn project_node(&self, asset: &Asset) {
        if let Some(graph) = &self.graph {
            if let Err(e) = graph.upsert_node(asset).await {
                warn!(asset_id = %asset.id, error = %e, "graph node upsert failed");
            }
        }
    }

    /// Append to the change history first, then publish. History failure is
    /// logged and publish is still attempted; publish failure is a warning.
    async fn emit_event(&self, event: ChangeEvent) {
        if let Err(e) = self.store.create_change_event(&event).await {
            warn!(asset_id = %event.asset_id, error = %e, "failed to store change event");
        }

        let Some(publisher) = &self.publisher else {
            return;
        };
        let payload = match serde_json::to_vec(&event) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to serialize change event");
                return;
            }
        };
        let subject = event.action.subject();
        if let Err(e) = publisher.publish(&subject, &payload).await {
            warn!(subject = %subject, error = %e, "failed to publish change event");
        }
    }
}

struct AssetOutcome {
    canonical_id: Uuid,
    kind: OutcomeKind,
}

enum OutcomeKind {
    Created,
    Updated,
    Unchanged,
}

/// Compare the mutable descriptive fields and return `{field: {old, new}}`
/// entries for each difference.
///
/// IP list changes are deliberately absent: scanners reorder addresses, and
/// per-field events for that would be noise. Attributes compare as parsed
/// JSON, so key order never produces a phantom diff.
pub fn detect_changes(existing: &Asset, incoming: &Asset) -> serde_json::Map<String, serde_json::Value> {
    let mut diff = serde_json::Map::new();

    if existing.name != incoming.name {
        diff.insert("name".into(), json!({"old": existing.name, "new": incoming.name}));
    }

    let existing_fqdn = existing.fqdn.as_deref().unwrap_or("");
    let incoming_fqdn = incoming.fqdn.as_deref().unwrap_or("");
    if existing_fqdn != incoming_fqdn {
        diff.insert("fqdn".into(), json!({"old": existing_fqdn, "new": incoming_fqdn}));
    }

    if existing.attributes != incoming.attributes {
        diff.insert(
            "attributes".into(),
            json!({
                "old": existing.attributes.to_string(),
                "new": incoming.attributes.to_string(),
            }),
        );
    }

    diff
}
