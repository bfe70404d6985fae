//! Traversal contract tests over the in-memory graph projection.

use std::collections::HashSet;
use tally_devkit::MemoryGraph;
use tally_kernel::models::{Asset, Relationship, RelationshipType};
use tally_kernel::store::{GraphError, GraphStore};
use uuid::Uuid;

/// Build the chain A -> B -> C -> D with RUNS_ON edges.
async fn chain() -> (MemoryGraph, Vec<Uuid>) {
    let graph = MemoryGraph::new();
    let mut ids = Vec::new();

    for name in ["a", "b", "c", "d"] {
        let asset = Asset::new(name, "test", "host", name);
        graph.upsert_node(&asset).await.unwrap();
        ids.push(asset.id);
    }
    for pair in ids.windows(2) {
        let edge = Relationship::new(pair[0], pair[1], RelationshipType::RunsOn, "test");
        graph.upsert_relationship(&edge).await.unwrap();
    }
    (graph, ids)
}

fn node_ids(slice: &tally_kernel::store::GraphSlice) -> HashSet<Uuid> {
    slice.nodes.iter().map(|n| n.id).collect()
}

#[tokio::test]
async fn dependency_traversal_is_depth_bounded() {
    let (graph, ids) = chain().await;
    let (a, b, c, _d) = (ids[0], ids[1], ids[2], ids[3]);

    let slice = graph.get_dependency_graph(a, 2).await.unwrap();
    assert_eq!(node_ids(&slice), HashSet::from([a, b, c]));
    assert_eq!(slice.edges.len(), 2);

    let endpoints: HashSet<(Uuid, Uuid)> =
        slice.edges.iter().map(|e| (e.from_id, e.to_id)).collect();
    assert_eq!(endpoints, HashSet::from([(a, b), (b, c)]));
}

#[tokio::test]
async fn impact_traversal_walks_incoming_edges() {
    let (graph, ids) = chain().await;
    let (b, c, d) = (ids[1], ids[2], ids[3]);

    let slice = graph.get_impact_graph(d, 2).await.unwrap();
    assert_eq!(node_ids(&slice), HashSet::from([d, c, b]));

    let endpoints: HashSet<(Uuid, Uuid)> =
        slice.edges.iter().map(|e| (e.from_id, e.to_id)).collect();
    assert_eq!(endpoints, HashSet::from([(b, c), (c, d)]));
}

#[tokio::test]
async fn default_depth_applies_when_non_positive() {
    let (graph, ids) = chain().await;

    // depth 0 -> default 3, which covers the whole 3-hop chain
    let slice = graph.get_dependency_graph(ids[0], 0).await.unwrap();
    assert_eq!(slice.nodes.len(), 4);
    assert_eq!(slice.edges.len(), 3);
}

#[tokio::test]
async fn excessive_depth_is_rejected() {
    let (graph, ids) = chain().await;
    let result = graph.get_dependency_graph(ids[0], 11).await;
    assert!(matches!(result, Err(GraphError::DepthExceeded(11))));
}

#[tokio::test]
async fn cycles_are_returned_once() {
    let graph = MemoryGraph::new();
    let a = Asset::new("a", "test", "svc", "a");
    let b = Asset::new("b", "test", "svc", "b");
    graph.upsert_node(&a).await.unwrap();
    graph.upsert_node(&b).await.unwrap();
    graph
        .upsert_relationship(&Relationship::new(a.id, b.id, RelationshipType::DependsOn, "test"))
        .await
        .unwrap();
    graph
        .upsert_relationship(&Relationship::new(b.id, a.id, RelationshipType::DependsOn, "test"))
        .await
        .unwrap();

    let slice = graph.get_dependency_graph(a.id, 10).await.unwrap();
    assert_eq!(slice.nodes.len(), 2);
    assert_eq!(slice.edges.len(), 2);
}

#[tokio::test]
async fn upsert_node_is_idempotent() {
    let graph = MemoryGraph::new();
    let asset = Asset::new("a", "test", "host", "a");
    graph.upsert_node(&asset).await.unwrap();
    graph.upsert_node(&asset).await.unwrap();
    assert_eq!(graph.node_count(), 1);
}

#[tokio::test]
async fn edges_require_both_endpoints() {
    let graph = MemoryGraph::new();
    let a = Asset::new("a", "test", "host", "a");
    graph.upsert_node(&a).await.unwrap();

    let dangling = Relationship::new(a.id, Uuid::new_v4(), RelationshipType::ConnectsTo, "test");
    assert!(matches!(
        graph.upsert_relationship(&dangling).await,
        Err(GraphError::MissingEndpoint(_))
    ));
}

#[tokio::test]
async fn delete_node_drops_incident_edges() {
    let (graph, ids) = chain().await;
    graph.delete_node(ids[1]).await.unwrap();

    assert_eq!(graph.node_count(), 3);
    // a->b and b->c went with b; c->d survives
    assert_eq!(graph.edge_count(), 1);
    let slice = graph.get_dependency_graph(ids[0], 10).await.unwrap();
    assert_eq!(slice.edges.len(), 0);
}
