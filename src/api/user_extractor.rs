use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::Json,
};

use crate::api::gate::bearer_token;
use crate::api::handlers::{AppState, ErrorResponse};
use crate::model::UserContext;
use crate::store::traits::Store;

/// Axum extractor for the calling user.
///
/// Protected routes already carry a `UserContext` placed in the request
/// extensions by the permission gate. Public self-service routes resolve it
/// here from the `Authorization: Bearer <token>` header.
#[async_trait]
impl<S> FromRequestParts<AppState<S>> for UserContext
where
    S: Store + 'static,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(
        parts: &mut Parts,
        store: &AppState<S>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(ctx) = parts.extensions.get::<UserContext>() {
            return Ok(ctx.clone());
        }

        let unauthenticated = || {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new("authentication required")),
            )
        };

        let token = bearer_token(&parts.headers).ok_or_else(unauthenticated)?;
        match store.resolve_session(&token).await {
            Ok(Some(ctx)) => Ok(ctx),
            Ok(None) => Err(unauthenticated()),
            Err(e) => Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(&e.to_string())),
            )),
        }
    }
}
