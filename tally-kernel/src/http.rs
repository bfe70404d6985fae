//! REST surface over the canonical store, the graph projection, and the
//! collector registry/scheduler.

use crate::collector::Registry;
use crate::models::{AlertRule, Asset, AssetStatus, NotifyChannel};
use crate::scheduler::Scheduler;
use crate::store::{AssetFilter, CanonicalStore, GraphError, GraphStore, StoreError};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CanonicalStore>,
    pub graph: Option<Arc<dyn GraphStore>>,
    pub registry: Arc<Registry>,
    pub scheduler: Option<Arc<Scheduler>>,
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/assets", get(list_assets).post(create_asset))
        .route("/assets/{id}", get(get_asset).put(update_asset).delete(delete_asset))
        .route("/assets/{id}/history", get(asset_history))
        .route("/assets/{id}/relationships", get(asset_relationships))
        .route("/graph/dependencies/{id}", get(dependency_graph))
        .route("/graph/impact/{id}", get(impact_graph))
        .route("/collectors", get(list_collectors))
        .route("/collectors/{name}/run", post(run_collector))
        .route("/changes", get(list_changes))
        .route("/alerts", get(list_alerts).post(create_alert))
        .route("/alerts/{id}", delete(delete_alert))
        .with_state(state);

    Router::new()
        .route("/healthz", get(|| async { Json(serde_json::json!({"status": "ok"})) }))
        .nest("/api/v1", api)
}

// --- response envelope ---

#[derive(Debug, Serialize)]
struct ApiResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total: Option<i64>,
}

type Reply = (StatusCode, Json<ApiResponse>);

fn ok_data<T: Serialize>(data: &T) -> Reply {
    reply(StatusCode::OK, data, None)
}

fn reply<T: Serialize>(status: StatusCode, data: &T, total: Option<i64>) -> Reply {
    match serde_json::to_value(data) {
        Ok(value) => (
            status,
            Json(ApiResponse { data: Some(value), error: None, total }),
        ),
        Err(e) => {
            error!(error = %e, "response serialization failed");
            fail(StatusCode::INTERNAL_SERVER_ERROR, "serialization error")
        }
    }
}

fn fail(status: StatusCode, message: &str) -> Reply {
    (
        status,
        Json(ApiResponse { data: None, error: Some(message.to_string()), total: None }),
    )
}

fn store_error(context: &str, e: StoreError) -> Reply {
    match e {
        StoreError::NotFound => fail(StatusCode::NOT_FOUND, "not found"),
        StoreError::UniqueViolation(_) => {
            fail(StatusCode::CONFLICT, "duplicate (source, external_id)")
        }
        StoreError::Backend(err) => {
            error!(context, error = %err, "store error");
            fail(StatusCode::INTERNAL_SERVER_ERROR, context)
        }
    }
}

fn graph_error(context: &str, e: GraphError) -> Reply {
    match e {
        GraphError::DepthExceeded(depth) => {
            fail(StatusCode::BAD_REQUEST, &format!("depth {depth} exceeds maximum 10"))
        }
        GraphError::MissingEndpoint(_) => fail(StatusCode::BAD_REQUEST, "missing edge endpoint"),
        GraphError::Backend(err) => {
            error!(context, error = %err, "graph error");
            fail(StatusCode::INTERNAL_SERVER_ERROR, context)
        }
    }
}

fn no_graph() -> Reply {
    fail(StatusCode::SERVICE_UNAVAILABLE, "graph store unavailable")
}

#[derive(Debug, Default, Deserialize)]
struct PageParams {
    limit: Option<i64>,
    offset: Option<i64>,
}

impl PageParams {
    fn resolve(&self) -> (i64, i64) {
        let limit = match self.limit {
            Some(l) if (1..=100).contains(&l) => l,
            _ => 50,
        };
        (limit, self.offset.unwrap_or(0).max(0))
    }
}

// --- assets ---

#[derive(Debug, Deserialize)]
struct ListAssetsParams {
    source: Option<String>,
    asset_type: Option<String>,
    status: Option<String>,
    search: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_assets(
    State(state): State<AppState>,
    Query(params): Query<ListAssetsParams>,
) -> Reply {
    let status = match params.status.as_deref() {
        None | Some("") => None,
        Some(s) => match AssetStatus::parse(s) {
            Some(status) => Some(status),
            None => return fail(StatusCode::BAD_REQUEST, "invalid status filter"),
        },
    };

    let (limit, offset) =
        PageParams { limit: params.limit, offset: params.offset }.resolve();
    let filter = AssetFilter {
        source: params.source.filter(|s| !s.is_empty()),
        asset_type: params.asset_type.filter(|s| !s.is_empty()),
        status,
        search: params.search.filter(|s| !s.is_empty()),
        limit,
        offset,
    };

    match state.store.list(&filter).await {
        Ok((assets, total)) => reply(StatusCode::OK, &assets, Some(total)),
        Err(e) => store_error("failed to list assets", e),
    }
}

#[derive(Debug, Deserialize)]
struct CreateAssetInput {
    external_id: String,
    source: String,
    asset_type: String,
    name: String,
    fqdn: Option<String>,
    ip_addresses: Option<Vec<String>>,
    attributes: Option<serde_json::Value>,
}

async fn create_asset(
    State(state): State<AppState>,
    Json(input): Json<CreateAssetInput>,
) -> Reply {
    if input.external_id.is_empty() || input.source.is_empty() || input.asset_type.is_empty() {
        return fail(
            StatusCode::BAD_REQUEST,
            "external_id, source and asset_type are required",
        );
    }

    let mut asset = Asset::new(&input.external_id, &input.source, &input.asset_type, &input.name);
    asset.fqdn = input.fqdn;
    if let Some(ips) = input.ip_addresses {
        asset.ip_addresses = ips;
    }
    if let Some(attributes) = input.attributes {
        asset.attributes = attributes;
    }

    if let Err(e) = state.store.create(&asset).await {
        return store_error("failed to create asset", e);
    }
    project_node(&state, &asset).await;

    reply(StatusCode::CREATED, &asset, None)
}

async fn get_asset(State(state): State<AppState>, Path(id): Path<Uuid>) -> Reply {
    match state.store.get_by_id(id).await {
        Ok(asset) => ok_data(&asset),
        Err(e) => store_error("failed to get asset", e),
    }
}

#[derive(Debug, Deserialize)]
struct UpdateAssetInput {
    name: Option<String>,
    asset_type: Option<String>,
    fqdn: Option<String>,
    ip_addresses: Option<Vec<String>>,
    attributes: Option<serde_json::Value>,
}

async fn update_asset(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateAssetInput>,
) -> Reply {
    let mut asset = match state.store.get_by_id(id).await {
        Ok(asset) => asset,
        Err(e) => return store_error("failed to get asset", e),
    };

    if let Some(name) = input.name {
        asset.name = name;
    }
    if let Some(asset_type) = input.asset_type {
        asset.asset_type = asset_type;
    }
    if input.fqdn.is_some() {
        asset.fqdn = input.fqdn;
    }
    if let Some(ips) = input.ip_addresses {
        asset.ip_addresses = ips;
    }
    if let Some(attributes) = input.attributes {
        asset.attributes = attributes;
    }

    if let Err(e) = state.store.update(&asset).await {
        return store_error("failed to update asset", e);
    }
    project_node(&state, &asset).await;

    ok_data(&asset)
}

async fn delete_asset(State(state): State<AppState>, Path(id): Path<Uuid>) -> Reply {
    if let Err(e) = state.store.delete(id).await {
        return store_error("failed to delete asset", e);
    }
    if let Some(graph) = &state.graph {
        if let Err(e) = graph.delete_node(id).await {
            warn!(asset_id = %id, error = %e, "graph node delete failed");
        }
    }
    ok_data(&serde_json::json!({"deleted": id}))
}

async fn asset_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(page): Query<PageParams>,
) -> Reply {
    let (limit, offset) = page.resolve();
    match state.store.list_changes_by_asset(id, limit, offset).await {
        Ok((events, total)) => reply(StatusCode::OK, &events, Some(total)),
        Err(e) => store_error("failed to list asset history", e),
    }
}

async fn asset_relationships(State(state): State<AppState>, Path(id): Path<Uuid>) -> Reply {
    let Some(graph) = &state.graph else {
        return no_graph();
    };
    match graph.get_relationships(id).await {
        Ok(rels) => ok_data(&rels),
        Err(e) => graph_error("failed to list relationships", e),
    }
}

// --- graph traversals ---

#[derive(Debug, Deserialize)]
struct DepthParams {
    depth: Option<i64>,
}

async fn dependency_graph(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<DepthParams>,
) -> Reply {
    let Some(graph) = &state.graph else {
        return no_graph();
    };
    match graph.get_dependency_graph(id, params.depth.unwrap_or(0)).await {
        Ok(slice) => ok_data(&slice),
        Err(e) => graph_error("failed to traverse dependencies", e),
    }
}

async fn impact_graph(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<DepthParams>,
) -> Reply {
    let Some(graph) = &state.graph else {
        return no_graph();
    };
    match graph.get_impact_graph(id, params.depth.unwrap_or(0)).await {
        Ok(slice) => ok_data(&slice),
        Err(e) => graph_error("failed to traverse impact", e),
    }
}

// --- collectors ---

async fn list_collectors(State(state): State<AppState>) -> Reply {
    ok_data(&state.registry.list())
}

async fn run_collector(State(state): State<AppState>, Path(name): Path<String>) -> Reply {
    let Some(scheduler) = &state.scheduler else {
        return fail(StatusCode::SERVICE_UNAVAILABLE, "scheduler disabled");
    };
    match scheduler.run_now(&name) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(ApiResponse {
                data: Some(serde_json::json!({"triggered": name})),
                error: None,
                total: None,
            }),
        ),
        Err(e) => fail(StatusCode::NOT_FOUND, &e.to_string()),
    }
}

// --- changes ---

async fn list_changes(State(state): State<AppState>, Query(page): Query<PageParams>) -> Reply {
    let (limit, offset) = page.resolve();
    match state.store.list_recent_changes(limit, offset).await {
        Ok((events, total)) => reply(StatusCode::OK, &events, Some(total)),
        Err(e) => store_error("failed to list changes", e),
    }
}

// --- alert rules ---

async fn list_alerts(State(state): State<AppState>) -> Reply {
    match state.store.list_alert_rules().await {
        Ok(rules) => ok_data(&rules),
        Err(e) => store_error("failed to list alert rules", e),
    }
}

#[derive(Debug, Deserialize)]
struct CreateAlertInput {
    name: String,
    actions: Vec<String>,
    #[serde(default)]
    sources: Vec<String>,
    channels: Vec<String>,
}

async fn create_alert(
    State(state): State<AppState>,
    Json(input): Json<CreateAlertInput>,
) -> Reply {
    if input.name.is_empty() || input.actions.is_empty() {
        return fail(StatusCode::BAD_REQUEST, "name and actions are required");
    }
    let channels: Vec<NotifyChannel> = match input
        .channels
        .iter()
        .map(|c| NotifyChannel::parse(c).ok_or(c))
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(channels) => channels,
        Err(bad) => return fail(StatusCode::BAD_REQUEST, &format!("unknown channel: {bad}")),
    };

    let mut rule = AlertRule::new(&input.name, input.actions, channels);
    rule.sources = input.sources;

    if let Err(e) = state.store.create_alert_rule(&rule).await {
        return store_error("failed to create alert rule", e);
    }
    reply(StatusCode::CREATED, &rule, None)
}

async fn delete_alert(State(state): State<AppState>, Path(id): Path<Uuid>) -> Reply {
    match state.store.delete_alert_rule(id).await {
        Ok(()) => ok_data(&serde_json::json!({"deleted": id})),
        Err(e) => store_error("failed to delete alert rule", e),
    }
}

/// Best-effort graph projection for API-side writes.
async fn project_node(state: &AppState, asset: &Asset) {
    if let Some(graph) = &state.graph {
        if let Err(e) = graph.upsert_node(asset).await {
            warn!(asset_id = %asset.id, error = %e, "graph node upsert failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_params_clamp() {
        let resolve = |limit, offset| PageParams { limit, offset }.resolve();
        assert_eq!(resolve(None, None), (50, 0));
        assert_eq!(resolve(Some(0), Some(-1)), (50, 0));
        assert_eq!(resolve(Some(101), None), (50, 0));
        assert_eq!(resolve(Some(25), Some(10)), (25, 10));
    }
}
