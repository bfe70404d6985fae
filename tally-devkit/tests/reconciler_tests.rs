//! Pipeline tests for the reconciliation engine against the in-memory
//! doubles: identity cascade, change detection, event emission, endpoint
//! remapping, and the lifecycle sweep.

use std::sync::Arc;
use std::time::Duration;
use tally_devkit::{CapturingPublisher, MemoryGraph, MemoryStore};
use tally_kernel::collector::CollectResult;
use tally_kernel::models::{Asset, AssetStatus, ChangeAction, Relationship, RelationshipType};
use tally_kernel::reconciler::Reconciler;
use tally_kernel::store::{AssetStore, GraphStore};
use time::OffsetDateTime;

const GRACE: Duration = Duration::from_secs(24 * 3600);

struct Harness {
    store: Arc<MemoryStore>,
    graph: Arc<MemoryGraph>,
    publisher: Arc<CapturingPublisher>,
    reconciler: Reconciler,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let graph = Arc::new(MemoryGraph::new());
    let publisher = Arc::new(CapturingPublisher::new());
    let reconciler = Reconciler::new(
        store.clone(),
        Some(graph.clone()),
        Some(publisher.clone()),
        GRACE,
    );
    Harness { store, graph, publisher, reconciler }
}

fn nmap_host() -> Asset {
    let mut asset = Asset::new("10.0.0.5", "nmap", "host", "");
    asset.ip_addresses = vec!["10.0.0.5".into()];
    asset
}

fn batch(assets: Vec<Asset>) -> CollectResult {
    CollectResult { assets, relationships: Vec::new() }
}

#[tokio::test]
async fn first_sighting_creates_asset_node_and_event() {
    let h = harness();

    let summary = h.reconciler.reconcile("nmap", &batch(vec![nmap_host()])).await;

    assert_eq!(summary.created, 1);
    assert_eq!(summary.errors, 0);

    let assets = h.store.dump_assets();
    assert_eq!(assets.len(), 1);
    let stored = &assets[0];
    assert_eq!(stored.status, AssetStatus::Active);
    assert!(stored.first_seen <= stored.last_seen);
    assert!(stored.last_seen <= stored.updated_at);

    assert_eq!(h.graph.node_count(), 1);

    assert_eq!(h.publisher.subjects(), vec!["assets.asset.created".to_string()]);
    let events = h.publisher.events();
    assert_eq!(events[0].action, ChangeAction::AssetCreated);
    assert!(events[0].diff.is_none());
    assert_eq!(events[0].asset_id, stored.id);
}

#[tokio::test]
async fn replaying_the_same_snapshot_is_silent() {
    let h = harness();
    h.reconciler.reconcile("nmap", &batch(vec![nmap_host()])).await;

    let before = h.store.dump_assets()[0].clone();
    h.publisher.clear();

    let summary = h.reconciler.reconcile("nmap", &batch(vec![nmap_host()])).await;
    assert_eq!(summary.created, 0);
    assert_eq!(summary.unchanged, 1);

    assert!(h.publisher.published().is_empty(), "no events on a no-op re-sight");
    let after = h.store.dump_assets()[0].clone();
    assert!(after.last_seen > before.last_seen, "last_seen advances");
    assert_eq!(after.updated_at, before.updated_at, "updated_at untouched");
    assert_eq!(h.store.dump_events().len(), 1, "history still has only the create");
}

#[tokio::test]
async fn attribute_change_emits_updated_with_diff() {
    let h = harness();
    h.reconciler.reconcile("nmap", &batch(vec![nmap_host()])).await;
    let before = h.store.dump_assets()[0].clone();
    h.publisher.clear();

    let mut renamed = nmap_host();
    renamed.name = "web01".into();
    let summary = h.reconciler.reconcile("nmap", &batch(vec![renamed])).await;
    assert_eq!(summary.updated, 1);

    assert_eq!(h.publisher.subjects(), vec!["assets.asset.updated".to_string()]);
    let event = &h.publisher.events()[0];
    let diff = event.diff.as_ref().expect("updated events carry a diff");
    assert_eq!(diff["name"]["old"], "");
    assert_eq!(diff["name"]["new"], "web01");

    let after = h.store.dump_assets()[0].clone();
    assert_eq!(after.name, "web01");
    assert!(after.updated_at > before.updated_at);
}

#[tokio::test]
async fn single_candidate_ip_match_merges_across_sources() {
    let h = harness();

    let mut vmware = Asset::new("vm-42", "vmware", "vm", "web01");
    vmware.ip_addresses = vec!["10.0.0.5".into()];
    h.store.create(&vmware).await.unwrap();

    let mut scan = nmap_host();
    scan.name = "web01".into();
    let summary = h.reconciler.reconcile("nmap", &batch(vec![scan])).await;

    // Merged into the vmware record, not inserted as new.
    assert_eq!(summary.created, 0);
    assert_eq!(summary.unchanged, 1);
    let assets = h.store.dump_assets();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].source, "vmware");
    assert_eq!(assets[0].external_id, "vm-42");
}

#[tokio::test]
async fn ambiguous_ip_match_inserts_a_new_asset() {
    let h = harness();

    for ext in ["vm-1", "vm-2"] {
        let mut vm = Asset::new(ext, "vmware", "vm", ext);
        vm.ip_addresses = vec!["10.0.0.5".into()];
        h.store.create(&vm).await.unwrap();
    }

    let summary = h.reconciler.reconcile("nmap", &batch(vec![nmap_host()])).await;

    // Two candidates share the IP, so the bridge is not trusted.
    assert_eq!(summary.created, 1);
    assert_eq!(h.store.dump_assets().len(), 3);
}

#[tokio::test]
async fn single_candidate_fqdn_match_merges() {
    let h = harness();

    let mut ansible = Asset::new("web01.lan", "ansible", "host", "web01.lan");
    ansible.fqdn = Some("web01.lan".into());
    h.store.create(&ansible).await.unwrap();

    let mut scan = Asset::new("10.0.0.7", "nmap", "host", "web01.lan");
    scan.ip_addresses = vec!["10.0.0.7".into()]; // no IP overlap
    scan.fqdn = Some("web01.lan".into());
    let summary = h.reconciler.reconcile("nmap", &batch(vec![scan])).await;

    assert_eq!(summary.created, 0);
    assert_eq!(h.store.dump_assets().len(), 1);
    assert_eq!(h.store.dump_assets()[0].source, "ansible");
}

#[tokio::test]
async fn lost_insert_race_falls_through_to_update() {
    let h = harness();

    let existing = Asset::new("10.0.0.5", "nmap", "host", "web01");
    h.store.create(&existing).await.unwrap();

    // The next exact-identity lookup misses, as if another worker inserted
    // the row between our lookup and our create.
    h.store.miss_next_external_lookups(1);

    let mut incoming = Asset::new("10.0.0.5", "nmap", "host", "web01-renamed");
    incoming.ip_addresses = Vec::new(); // keep the fuzzy stages out of it
    let summary = h.reconciler.reconcile("nmap", &batch(vec![incoming])).await;

    assert_eq!(summary.errors, 0, "the race is recovered, not dropped");
    assert_eq!(summary.updated, 1);
    let assets = h.store.dump_assets();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].name, "web01-renamed");
    assert_eq!(assets[0].id, existing.id);
}

#[tokio::test]
async fn relationship_endpoints_are_remapped_to_canonical_ids() {
    let h = harness();

    // The canonical record for web01 predates this run.
    let mut canonical = Asset::new("web01", "ansible", "host", "web01");
    canonical.ip_addresses = vec!["10.0.0.5".into()];
    h.store.create(&canonical).await.unwrap();
    let node = canonical.clone();
    h.graph.upsert_node(&node).await.unwrap();

    // Collector snapshot minted fresh local ids for both endpoints.
    let mut host = Asset::new("web01", "ansible", "host", "web01");
    host.ip_addresses = vec!["10.0.0.5".into()];
    let group = Asset::new("group:web", "ansible", "group", "web");
    let edge = Relationship::new(host.id, group.id, RelationshipType::MemberOf, "ansible");
    let local_host_id = host.id;

    let result = CollectResult { assets: vec![host, group], relationships: vec![edge] };
    let summary = h.reconciler.reconcile("ansible", &result).await;
    assert_eq!(summary.relationships, 1);
    assert_eq!(summary.errors, 0);

    let edges = h.graph.dump_edges();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].from_id, canonical.id, "local endpoint remapped");
    assert_ne!(edges[0].from_id, local_host_id);
}

#[tokio::test]
async fn rerunning_relationships_does_not_duplicate_edges() {
    let h = harness();

    let run = || {
        let host = Asset::new("web01", "ansible", "host", "web01");
        let group = Asset::new("group:web", "ansible", "group", "web");
        let edge = Relationship::new(host.id, group.id, RelationshipType::MemberOf, "ansible");
        CollectResult { assets: vec![host, group], relationships: vec![edge] }
    };

    h.reconciler.reconcile("ansible", &run()).await;
    h.reconciler.reconcile("ansible", &run()).await;

    assert_eq!(h.graph.edge_count(), 1, "shape key dedupes re-minted edge ids");
}

#[tokio::test]
async fn unseen_assets_turn_stale_then_removed() {
    let h = harness();

    // Seen long ago: already stale and past the grace period.
    let mut gone = Asset::new("10.0.0.9", "nmap", "host", "gone");
    gone.status = AssetStatus::Stale;
    gone.last_seen = OffsetDateTime::now_utc() - (GRACE + Duration::from_secs(3600));
    h.store.put_asset_raw(gone.clone());
    h.graph.upsert_node(&gone).await.unwrap();

    // Seen recently but not by this run: goes stale, no event.
    let mut missing = Asset::new("10.0.0.8", "nmap", "host", "missing");
    missing.last_seen = OffsetDateTime::now_utc() - Duration::from_secs(60);
    h.store.put_asset_raw(missing.clone());

    // Still visible to the scanner.
    let present = nmap_host();

    let summary = h.reconciler.reconcile("nmap", &batch(vec![present])).await;
    assert_eq!(summary.marked_stale, 1);
    assert_eq!(summary.removed, 1);

    let by_ext = |ext: &str| {
        h.store
            .dump_assets()
            .into_iter()
            .find(|a| a.external_id == ext)
            .unwrap()
    };
    assert_eq!(by_ext("10.0.0.8").status, AssetStatus::Stale);
    assert_eq!(by_ext("10.0.0.9").status, AssetStatus::Removed);
    assert_eq!(by_ext("10.0.0.5").status, AssetStatus::Active);

    // Exactly one asset.removed event, for the expired asset.
    let removed: Vec<_> = h
        .publisher
        .events()
        .into_iter()
        .filter(|e| e.action == ChangeAction::AssetRemoved)
        .collect();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].asset_id, gone.id);

    // The removed node left the graph projection.
    assert!(h.graph.node(gone.id).is_none());
}

#[tokio::test]
async fn sweep_only_touches_the_reconciled_source() {
    let h = harness();

    let mut other = Asset::new("vm-7", "vmware", "vm", "vm-7");
    other.last_seen = OffsetDateTime::now_utc() - Duration::from_secs(600);
    h.store.put_asset_raw(other);

    h.reconciler.reconcile("nmap", &batch(vec![nmap_host()])).await;

    let vm = h
        .store
        .dump_assets()
        .into_iter()
        .find(|a| a.source == "vmware")
        .unwrap();
    assert_eq!(vm.status, AssetStatus::Active, "other sources are untouched");
}

#[tokio::test]
async fn stale_asset_resurrects_on_sighting() {
    let h = harness();

    let mut dormant = nmap_host();
    dormant.status = AssetStatus::Stale;
    dormant.last_seen = OffsetDateTime::now_utc() - Duration::from_secs(600);
    h.store.put_asset_raw(dormant);

    let summary = h.reconciler.reconcile("nmap", &batch(vec![nmap_host()])).await;
    assert_eq!(summary.unchanged, 1);
    assert_eq!(h.store.dump_assets()[0].status, AssetStatus::Active);
}

#[tokio::test]
async fn created_event_count_matches_first_time_inserts() {
    let h = harness();

    let mut a = Asset::new("10.0.0.5", "nmap", "host", "a");
    a.ip_addresses = vec!["10.0.0.5".into()];
    let mut b = Asset::new("10.0.0.6", "nmap", "host", "b");
    b.ip_addresses = vec!["10.0.0.6".into()];

    let summary = h.reconciler.reconcile("nmap", &batch(vec![a, b])).await;
    assert_eq!(summary.created, 2);

    let created = h
        .publisher
        .events()
        .into_iter()
        .filter(|e| e.action == ChangeAction::AssetCreated)
        .count();
    assert_eq!(created, 2);
    assert_eq!(h.store.dump_events().len(), 2, "history matches the bus");
}

#[tokio::test]
async fn graphless_reconciler_still_maintains_canonical_state() {
    let store = Arc::new(MemoryStore::new());
    let publisher = Arc::new(CapturingPublisher::new());
    let reconciler = Reconciler::new(store.clone(), None, Some(publisher.clone()), GRACE);

    let summary = reconciler.reconcile("nmap", &batch(vec![nmap_host()])).await;
    assert_eq!(summary.created, 1);
    assert_eq!(store.dump_assets().len(), 1);
    assert_eq!(publisher.events().len(), 1);
}
