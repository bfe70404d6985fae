//! HTTP surface tests: envelope shape, error mapping, and the graph and
//! collector endpoints, driven through the router with in-memory stores.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use std::sync::Arc;
use tally_devkit::{MemoryGraph, MemoryStore};
use tally_kernel::collector::Registry;
use tally_kernel::http::{build_router, AppState};
use tally_kernel::models::{Asset, CollectorConfig};
use tally_kernel::store::AssetStore;
use tower::util::ServiceExt;
use uuid::Uuid;

fn router_with(store: Arc<MemoryStore>, graph: Option<Arc<MemoryGraph>>) -> Router {
    let registry = Arc::new(Registry::new());
    registry.register(
        Arc::new(tally_devkit::ScriptedCollector::new(
            "nmap",
            tally_kernel::collector::CollectResult::default(),
        )),
        CollectorConfig::new("lan", "nmap"),
    );
    let graph: Option<Arc<dyn tally_kernel::store::GraphStore>> = match graph {
        Some(g) => Some(g),
        None => None,
    };
    let state = AppState { store, graph, registry, scheduler: None };
    build_router(state)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        serde_json::json!(null)
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn healthz_answers_ok() {
    let router = router_with(Arc::new(MemoryStore::new()), None);
    let (status, body) = send(&router, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn asset_crud_round_trip() {
    let router = router_with(Arc::new(MemoryStore::new()), Some(Arc::new(MemoryGraph::new())));

    let (status, body) = send(
        &router,
        post_json(
            "/api/v1/assets",
            serde_json::json!({
                "external_id": "vm-1",
                "source": "manual",
                "asset_type": "vm",
                "name": "web01",
                "ip_addresses": ["10.0.0.5"]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&router, get(&format!("/api/v1/assets/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "web01");

    let (status, body) = send(&router, get("/api/v1/assets?search=WEB")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    // Same (source, external_id) again is a conflict.
    let (status, _) = send(
        &router,
        post_json(
            "/api/v1/assets",
            serde_json::json!({
                "external_id": "vm-1",
                "source": "manual",
                "asset_type": "vm",
                "name": "other"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn missing_asset_is_404() {
    let router = router_with(Arc::new(MemoryStore::new()), None);
    let (status, body) = send(&router, get(&format!("/api/v1/assets/{}", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn invalid_status_filter_is_400() {
    let router = router_with(Arc::new(MemoryStore::new()), None);
    let (status, _) = send(&router, get("/api/v1/assets?status=zombie")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn graph_endpoints_need_the_graph_store() {
    let router = router_with(Arc::new(MemoryStore::new()), None);
    let id = Uuid::new_v4();
    let (status, _) = send(&router, get(&format!("/api/v1/graph/dependencies/{id}"))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn traversal_depth_over_ten_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let graph = Arc::new(MemoryGraph::new());
    let router = router_with(store, Some(graph));

    let id = Uuid::new_v4();
    let (status, body) =
        send(&router, get(&format!("/api/v1/graph/dependencies/{id}?depth=11"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("depth"));
}

#[tokio::test]
async fn collectors_listing_reports_status() {
    let router = router_with(Arc::new(MemoryStore::new()), None);
    let (status, body) = send(&router, get("/api/v1/collectors")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["name"], "lan");
    assert_eq!(body["data"][0]["running"], false);
}

#[tokio::test]
async fn run_trigger_without_scheduler_is_503() {
    let router = router_with(Arc::new(MemoryStore::new()), None);
    let (status, _) = send(
        &router,
        Request::builder()
            .method("POST")
            .uri("/api/v1/collectors/lan/run")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn asset_history_pages_change_events() {
    let store = Arc::new(MemoryStore::new());
    let asset = Asset::new("vm-1", "manual", "vm", "web01");
    store.create(&asset).await.unwrap();

    let router = router_with(store, None);
    let (status, body) =
        send(&router, get(&format!("/api/v1/assets/{}/history", asset.id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn alert_rules_can_be_created_and_listed() {
    let router = router_with(Arc::new(MemoryStore::new()), None);

    let (status, _) = send(
        &router,
        post_json(
            "/api/v1/alerts",
            serde_json::json!({
                "name": "on-create",
                "actions": ["asset.created"],
                "channels": ["webhook"]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&router, get("/api/v1/alerts")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["name"], "on-create");

    let (status, _) = send(
        &router,
        post_json(
            "/api/v1/alerts",
            serde_json::json!({
                "name": "bad",
                "actions": ["asset.created"],
                "channels": ["carrier-pigeon"]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
