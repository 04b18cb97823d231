use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

use crate::api::handlers::{AppState, ErrorResponse};
use crate::api::metrics;
use crate::model::Permission;
use crate::store::traits::Store;

/// Per-route gate configuration: where to resolve callers and what they need
pub struct GateState<S> {
    pub store: AppState<S>,
    pub permission: Permission,
}

impl<S> GateState<S> {
    pub fn new(store: AppState<S>, permission: Permission) -> Self {
        Self { store, permission }
    }
}

impl<S> Clone for GateState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            permission: self.permission,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeniedResponse {
    pub error: String,
    pub required_permission: Permission,
}

/// Extract the bearer token from the `Authorization` header
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

pub fn unauthenticated() -> Response {
    metrics::record_unauthenticated();
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::new("authentication required")),
    )
        .into_response()
}

/// Enforce the route's permission before the handler runs.
///
/// On success the resolved `UserContext` is stored in the request extensions.
pub async fn require_permission<S: Store + 'static>(
    State(gate): State<GateState<S>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(request.headers()) else {
        return unauthenticated();
    };

    let caller = match gate.store.resolve_session(&token).await {
        Ok(Some(caller)) => caller,
        Ok(None) => return unauthenticated(),
        Err(e) => {
            log::error!("Failed to resolve session: {:#}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("failed to resolve caller")),
            )
                .into_response();
        }
    };

    if !caller.has(gate.permission) {
        log::warn!(
            "Denied {} {} for user {}: missing {}",
            request.method(),
            request.uri().path(),
            caller.username,
            gate.permission
        );
        metrics::record_denied();
        return (
            StatusCode::FORBIDDEN,
            Json(DeniedResponse {
                error: "access denied".to_string(),
                required_permission: gate.permission,
            }),
        )
            .into_response();
    }

    request.extensions_mut().insert(caller);
    next.run(request).await
}
