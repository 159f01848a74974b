use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::Json,
};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::logic::EngineContext;
use crate::model::{
    ActorContext, AuditEntry, HttpMethod, NewRoute, Route, RouteStatusUpdate, Version,
    VersionDraft,
};
use crate::store::DefinitionStore;

pub type AppState<S> = Arc<EngineContext<S>>;

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> ListResponse<T> {
    fn new(items: Vec<T>) -> Self {
        Self {
            total: items.len(),
            items,
        }
    }
}

/// Universal dispatch: every request under /api/ is served from the stored
/// definitions. Parameters come from the query string for GET/DELETE and the
/// JSON body otherwise; `_version` pins a specific version.
pub async fn dispatch_dynamic<S: DefinitionStore>(
    State(state): State<AppState<S>>,
    method: Method,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), EngineError> {
    let path = path.trim_matches('/').to_string();
    let http_method = HttpMethod::parse(method.as_str())
        .ok_or_else(|| EngineError::not_found("route", format!("{} /api/{}", method, path)))?;

    let pinned_version = query.get("_version").and_then(|v| v.parse::<i32>().ok());

    let raw_params = merge_request_params(http_method, &query, &body);
    let (status, response) = state
        .dispatch(&path, http_method, raw_params, pinned_version)
        .await?;

    Ok((
        StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
        Json(response),
    ))
}

fn merge_request_params(
    method: HttpMethod,
    query: &HashMap<String, String>,
    body: &Bytes,
) -> serde_json::Map<String, serde_json::Value> {
    let mut raw = serde_json::Map::new();

    if method.has_body() {
        if !body.is_empty() {
            match serde_json::from_slice::<serde_json::Value>(body) {
                Ok(serde_json::Value::Object(map)) => raw = map,
                Ok(other) => {
                    raw.insert("_body".to_string(), other);
                }
                Err(_) => {}
            }
        }
    } else {
        for (key, value) in query {
            raw.insert(key.clone(), serde_json::Value::String(value.clone()));
        }
    }

    raw
}

// ---- definition management ----

#[derive(Debug, Deserialize)]
pub struct CreateRouteRequest {
    #[serde(flatten)]
    pub route: NewRoute,
    pub version: VersionDraft,
}

#[derive(Debug, Serialize)]
pub struct RouteWithVersionResponse {
    pub route: Route,
    pub version: Version,
}

pub async fn create_route<S: DefinitionStore>(
    State(state): State<AppState<S>>,
    actor: ActorContext,
    Json(request): Json<CreateRouteRequest>,
) -> Result<(StatusCode, Json<RouteWithVersionResponse>), EngineError> {
    let (route, version) = state
        .ops
        .create_route(request.route, request.version, &actor)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(RouteWithVersionResponse { route, version }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct RouteListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

pub async fn list_routes<S: DefinitionStore>(
    State(state): State<AppState<S>>,
    Query(query): Query<RouteListQuery>,
) -> Result<Json<ListResponse<Route>>, EngineError> {
    let routes = state.store.list_routes(query.include_inactive).await?;
    Ok(Json(ListResponse::new(routes)))
}

pub async fn get_route<S: DefinitionStore>(
    State(state): State<AppState<S>>,
    Path(route_id): Path<String>,
) -> Result<Json<Route>, EngineError> {
    let route = state
        .store
        .get_route(&route_id)
        .await?
        .ok_or_else(|| EngineError::not_found("route", route_id))?;
    Ok(Json(route))
}

/// Soft delete: flags only, versions and audit history stay.
pub async fn delete_route<S: DefinitionStore>(
    State(state): State<AppState<S>>,
    actor: ActorContext,
    Path(route_id): Path<String>,
) -> Result<Json<Route>, EngineError> {
    let route = state
        .ops
        .set_route_status(
            &route_id,
            RouteStatusUpdate {
                is_active: Some(false),
                is_deleted: Some(true),
            },
            &actor,
        )
        .await?;
    Ok(Json(route))
}

pub async fn update_route_status<S: DefinitionStore>(
    State(state): State<AppState<S>>,
    actor: ActorContext,
    Path(route_id): Path<String>,
    Json(update): Json<RouteStatusUpdate>,
) -> Result<Json<Route>, EngineError> {
    let route = state.ops.set_route_status(&route_id, update, &actor).await?;
    Ok(Json(route))
}

pub async fn create_version<S: DefinitionStore>(
    State(state): State<AppState<S>>,
    actor: ActorContext,
    Path(route_id): Path<String>,
    Json(draft): Json<VersionDraft>,
) -> Result<(StatusCode, Json<Version>), EngineError> {
    let version = state.ops.create_version(&route_id, draft, &actor).await?;
    Ok((StatusCode::CREATED, Json(version)))
}

pub async fn list_versions<S: DefinitionStore>(
    State(state): State<AppState<S>>,
    Path(route_id): Path<String>,
) -> Result<Json<ListResponse<Version>>, EngineError> {
    // 404 for an unknown route rather than an empty list
    state
        .store
        .get_route(&route_id)
        .await?
        .ok_or_else(|| EngineError::not_found("route", route_id.clone()))?;
    let versions = state.store.list_versions(&route_id).await?;
    Ok(Json(ListResponse::new(versions)))
}

pub async fn activate_version<S: DefinitionStore>(
    State(state): State<AppState<S>>,
    actor: ActorContext,
    Path((route_id, version_no)): Path<(String, i32)>,
) -> Result<Json<Version>, EngineError> {
    let version = state
        .ops
        .activate_version(&route_id, version_no, &actor)
        .await?;
    Ok(Json(version))
}

pub async fn rollback_version<S: DefinitionStore>(
    State(state): State<AppState<S>>,
    actor: ActorContext,
    Path((route_id, version_no)): Path<(String, i32)>,
) -> Result<Json<Version>, EngineError> {
    let version = state.ops.rollback(&route_id, version_no, &actor).await?;
    Ok(Json(version))
}

/// Persisted versions are immutable; this handler exists so the attempt gets
/// a precise refusal instead of a 405.
pub async fn update_version<S: DefinitionStore>(
    State(state): State<AppState<S>>,
    Path((route_id, version_no)): Path<(String, i32)>,
) -> Result<Json<Version>, EngineError> {
    state.ops.update_version(&route_id, version_no).map(Json)
}

pub async fn delete_version<S: DefinitionStore>(
    State(state): State<AppState<S>>,
    Path((route_id, version_no)): Path<(String, i32)>,
) -> Result<StatusCode, EngineError> {
    state
        .ops
        .delete_version(&route_id, version_no)
        .map(|_| StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct AuditListQuery {
    pub limit: Option<usize>,
}

pub async fn list_audit<S: DefinitionStore>(
    State(state): State<AppState<S>>,
    Query(query): Query<AuditListQuery>,
) -> Result<Json<ListResponse<AuditEntry>>, EngineError> {
    let entries = state
        .store
        .list_audit_entries(query.limit.unwrap_or(100).min(1000))
        .await?;
    Ok(Json(ListResponse::new(entries)))
}
