use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    Extension, Json as RequestJson,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::api::guard::RouteDescriptor;
use crate::api::metrics;
use crate::logic::merge::{normalize, MergeEngine};
use crate::model::{
    EntityKey, EntityKind, FieldKind, FieldState, Id, MergedView, OverrideRecord, Permission,
    UpstreamSnapshot, UserContext,
};
use crate::store::traits::Store;

pub type AppState<S> = Arc<S>;

type ApiError = (StatusCode, Json<ErrorResponse>);

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 200;

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub size: Option<usize>,
}

impl PageQuery {
    /// 1-based page and a size clamped to `1..=MAX_PAGE_SIZE`
    fn resolve(&self) -> (usize, usize) {
        let page = self.page.unwrap_or(1).max(1);
        let size = self.size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        (page, size)
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub size: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
        }
    }
}

pub(crate) fn internal_error(e: anyhow::Error) -> ApiError {
    log::error!("{:#}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(&e.to_string())),
    )
}

fn not_found(message: &str) -> ApiError {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new(message)))
}

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message)))
}

fn parse_kind(kind: &str) -> Result<EntityKind, ApiError> {
    kind.parse::<EntityKind>().map_err(|e| not_found(&e))
}

/// Reject fields outside the kind's group and values that would never merge
fn validate_override_fields(kind: EntityKind, fields: &Map<String, Value>) -> Result<(), ApiError> {
    for (name, value) in fields {
        let def = kind
            .field(name)
            .ok_or_else(|| bad_request(&format!("{} has no overridable field `{}`", kind, name)))?;

        let state = FieldState::of(fields, name);
        if state != FieldState::Null && normalize(def.kind, state).is_none() {
            let expected = match def.kind {
                FieldKind::Number => "a number",
                FieldKind::Text => "a string",
                FieldKind::Flag => "a flag (0/1/true/false)",
            };
            return Err(bad_request(&format!(
                "field `{}` expects {} or null, got {}",
                name, expected, value
            )));
        }
    }
    Ok(())
}

/// GET /api/entities/{kind}
/// Merged views for every synced or overridden entity of a kind
pub async fn list_entities<S: Store>(
    Path(kind): Path<String>,
    Query(query): Query<PageQuery>,
    State(store): State<AppState<S>>,
) -> Result<Json<ListResponse<MergedView>>, ApiError> {
    let kind = parse_kind(&kind)?;
    let (page, size) = query.resolve();

    let snapshots = store.list_snapshots(kind).await.map_err(internal_error)?;
    let overrides = store.list_overrides(kind).await.map_err(internal_error)?;

    let views = MergeEngine::merge_many(kind, &snapshots, &overrides);
    let total = views.len();
    let offset = (page - 1).saturating_mul(size);
    let items: Vec<MergedView> = views.into_iter().skip(offset).take(size).collect();
    metrics::record_merged(items.len());

    Ok(Json(ListResponse {
        items,
        total,
        page,
        size,
    }))
}

/// GET /api/entities/{kind}/{id}
pub async fn get_entity<S: Store>(
    Path((kind, id)): Path<(String, Id)>,
    State(store): State<AppState<S>>,
) -> Result<Json<MergedView>, ApiError> {
    let key = EntityKey::new(parse_kind(&kind)?, id);

    let snapshot = store.get_snapshot(&key).await.map_err(internal_error)?;
    let override_record = store.get_override(&key).await.map_err(internal_error)?;
    if snapshot.is_none() && override_record.is_none() {
        return Err(not_found(&format!("Entity {} not found", key)));
    }

    metrics::record_merged(1);
    Ok(Json(MergeEngine::merge(
        &key,
        snapshot.as_ref(),
        override_record.as_ref(),
    )))
}

/// GET /api/snapshots/{kind}/{id}
pub async fn get_snapshot<S: Store>(
    Path((kind, id)): Path<(String, Id)>,
    State(store): State<AppState<S>>,
) -> Result<Json<UpstreamSnapshot>, ApiError> {
    let key = EntityKey::new(parse_kind(&kind)?, id);
    store
        .get_snapshot(&key)
        .await
        .map_err(internal_error)?
        .map(Json)
        .ok_or_else(|| not_found(&format!("No snapshot for {}", key)))
}

/// GET /api/entities/{kind}/{id}/override
pub async fn get_override<S: Store>(
    Path((kind, id)): Path<(String, Id)>,
    State(store): State<AppState<S>>,
) -> Result<Json<OverrideRecord>, ApiError> {
    let key = EntityKey::new(parse_kind(&kind)?, id);
    store
        .get_override(&key)
        .await
        .map_err(internal_error)?
        .map(Json)
        .ok_or_else(|| not_found(&format!("No override for {}", key)))
}

async fn require_snapshot<S: Store>(store: &S, key: &EntityKey) -> Result<(), ApiError> {
    match store.get_snapshot(key).await.map_err(internal_error)? {
        Some(_) => Ok(()),
        None => Err(not_found(&format!("Entity {} has not been synced", key))),
    }
}

/// PUT /api/entities/{kind}/{id}/override
/// Replace the override record with exactly the given fields
pub async fn put_override<S: Store>(
    Path((kind, id)): Path<(String, Id)>,
    State(store): State<AppState<S>>,
    caller: UserContext,
    RequestJson(fields): RequestJson<Map<String, Value>>,
) -> Result<Json<MergedView>, ApiError> {
    let key = EntityKey::new(parse_kind(&kind)?, id);
    validate_override_fields(key.kind, &fields)?;
    require_snapshot(&*store, &key).await?;

    let record = OverrideRecord::new(key.clone(), fields, caller.username.clone());
    store
        .upsert_override(record.clone())
        .await
        .map_err(internal_error)?;
    log::info!("{} replaced override for {}", caller.username, key);

    let snapshot = store.get_snapshot(&key).await.map_err(internal_error)?;
    Ok(Json(MergeEngine::merge(&key, snapshot.as_ref(), Some(&record))))
}

/// PATCH /api/entities/{kind}/{id}/override
/// Merge the given fields into the record, creating it when absent
pub async fn patch_override<S: Store>(
    Path((kind, id)): Path<(String, Id)>,
    State(store): State<AppState<S>>,
    caller: UserContext,
    RequestJson(fields): RequestJson<Map<String, Value>>,
) -> Result<Json<MergedView>, ApiError> {
    let key = EntityKey::new(parse_kind(&kind)?, id);
    validate_override_fields(key.kind, &fields)?;
    require_snapshot(&*store, &key).await?;

    let record = store
        .patch_override(&key, fields, &caller.username)
        .await
        .map_err(internal_error)?;
    log::info!("{} patched override for {}", caller.username, key);

    let snapshot = store.get_snapshot(&key).await.map_err(internal_error)?;
    Ok(Json(MergeEngine::merge(&key, snapshot.as_ref(), Some(&record))))
}

/// DELETE /api/entities/{kind}/{id}/override
pub async fn delete_override<S: Store>(
    Path((kind, id)): Path<(String, Id)>,
    State(store): State<AppState<S>>,
    caller: UserContext,
) -> Result<StatusCode, ApiError> {
    let key = EntityKey::new(parse_kind(&kind)?, id);
    if store.delete_override(&key).await.map_err(internal_error)? {
        log::info!("{} deleted override for {}", caller.username, key);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&format!("No override for {}", key)))
    }
}

/// GET /api/routes
pub async fn list_routes(
    Extension(table): Extension<Arc<Vec<RouteDescriptor>>>,
) -> Json<Vec<RouteDescriptor>> {
    Json(table.as_ref().clone())
}

#[derive(Debug, Serialize)]
pub struct PermissionsResponse {
    pub user_id: Id,
    pub username: String,
    pub permissions: BTreeSet<Permission>,
}

/// GET /api/accounts/{id}/permissions
pub async fn get_account_permissions<S: Store>(
    Path(id): Path<Id>,
    State(store): State<AppState<S>>,
) -> Result<Json<PermissionsResponse>, ApiError> {
    let account = store
        .get_account(&id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Account not found"))?;

    Ok(Json(PermissionsResponse {
        user_id: account.id,
        username: account.username,
        permissions: account.permissions,
    }))
}
