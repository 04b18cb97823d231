use axum::{middleware, Router};

use crate::api::guard::{GuardedRouter, PublicRoute, RouteMethod, RouteTableError};
use crate::api::handlers::AppState;
use crate::api::{auth_handlers, handlers, metrics};
use crate::model::Permission;
use crate::store::traits::Store;

/// Every route the service exposes, each declaring its access rule.
///
/// Fails when the table contains a route that is neither gated nor allowlisted.
pub fn guarded_routes<S: Store + 'static>(store: AppState<S>) -> GuardedRouter<S> {
    GuardedRouter::new(store)
        // Public allowlist
        .public(PublicRoute::Health, handlers::health_check)
        .public(PublicRoute::Metrics, metrics::metrics_handler)
        .public(PublicRoute::Login, auth_handlers::login::<S>)
        .public(PublicRoute::Logout, auth_handlers::logout::<S>)
        .public(PublicRoute::ProfileRead, auth_handlers::get_profile::<S>)
        .public(PublicRoute::ProfileUpdate, auth_handlers::update_profile::<S>)
        .public(PublicRoute::PasswordResetRequest, auth_handlers::request_password_reset::<S>)
        .public(PublicRoute::PasswordResetConfirm, auth_handlers::confirm_password_reset::<S>)
        // Merged entity views
        .protected(
            RouteMethod::Get,
            "/api/entities/:kind",
            Permission::ReadEntities,
            handlers::list_entities::<S>,
        )
        .protected(
            RouteMethod::Get,
            "/api/entities/:kind/:id",
            Permission::ReadEntities,
            handlers::get_entity::<S>,
        )
        // Overrides
        .protected(
            RouteMethod::Get,
            "/api/entities/:kind/:id/override",
            Permission::ReadEntities,
            handlers::get_override::<S>,
        )
        .protected(
            RouteMethod::Put,
            "/api/entities/:kind/:id/override",
            Permission::WriteOverrides,
            handlers::put_override::<S>,
        )
        .protected(
            RouteMethod::Patch,
            "/api/entities/:kind/:id/override",
            Permission::WriteOverrides,
            handlers::patch_override::<S>,
        )
        .protected(
            RouteMethod::Delete,
            "/api/entities/:kind/:id/override",
            Permission::DeleteOverrides,
            handlers::delete_override::<S>,
        )
        // Raw upstream snapshots
        .protected(
            RouteMethod::Get,
            "/api/snapshots/:kind/:id",
            Permission::ReadSnapshots,
            handlers::get_snapshot::<S>,
        )
        // Introspection
        .protected(
            RouteMethod::Get,
            "/api/routes",
            Permission::ReadRoutes,
            handlers::list_routes,
        )
        .protected(
            RouteMethod::Get,
            "/api/accounts/:id/permissions",
            Permission::ReadAccounts,
            handlers::get_account_permissions::<S>,
        )
}

pub fn create_router<S: Store + 'static>(store: AppState<S>) -> Result<Router, RouteTableError> {
    let router = guarded_routes(store).build()?;
    Ok(router.layer(middleware::from_fn(metrics::track_requests)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::guard::Access;
    use crate::model::{Account, EntityKey, EntityKind, UpstreamSnapshot};
    use crate::store::{AccountStore, MemoryStore, SnapshotStore};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn session(store: &MemoryStore, username: &str, permissions: &[Permission]) -> String {
        let account = Account::new(username, "password123").with_permissions(permissions.iter().copied());
        let id = account.id.clone();
        store.upsert_account(account).await.unwrap();
        store.create_session(&id).await.unwrap()
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let fields = json!({"name": "Website", "amount": 1200, "prospective": 1});
        store
            .replace_snapshot(UpstreamSnapshot::new(
                EntityKey::new(EntityKind::Project, "7"),
                fields.as_object().cloned().unwrap(),
            ))
            .await
            .unwrap();
        store
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn route_table_is_fully_classified() {
        let store = Arc::new(MemoryStore::new());
        let table = guarded_routes(store).descriptors();

        for route in PublicRoute::ALL {
            assert!(
                table
                    .iter()
                    .any(|d| d.method == route.method() && d.path == route.path() && d.access == Some(Access::Public)),
                "allowlisted route {} {} is not registered",
                route.method(),
                route.path()
            );
        }
        for descriptor in &table {
            match descriptor.access {
                Some(Access::Public) => {
                    assert!(PublicRoute::lookup(descriptor.method, &descriptor.path).is_some())
                }
                Some(Access::Requires(_)) => {}
                None => panic!("{} {} is unclassified", descriptor.method, descriptor.path),
            }
        }
    }

    #[test]
    fn router_builds() {
        assert!(create_router(Arc::new(MemoryStore::new())).is_ok());
    }

    #[tokio::test]
    async fn public_routes_need_no_session() {
        let app = create_router(Arc::new(MemoryStore::new())).unwrap();

        let response = app.clone().oneshot(request("GET", "/health", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(request("GET", "/metrics", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_route_rejects_missing_session() {
        let app = create_router(seeded_store().await).unwrap();

        let response = app
            .oneshot(request("GET", "/api/entities/project/7", None, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_permission_is_forbidden_and_names_it() {
        let store = seeded_store().await;
        let token = session(&store, "reader", &[Permission::ReadEntities]).await;
        let app = create_router(store.clone()).unwrap();

        let response = app
            .oneshot(request(
                "DELETE",
                "/api/entities/project/7/override",
                Some(&token),
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = json_body(response).await;
        assert_eq!(body["error"], "access denied");
        assert_eq!(body["required_permission"], "overrides:delete");
    }

    #[tokio::test]
    async fn override_round_trip_through_the_gate() {
        let store = seeded_store().await;
        let token = session(
            &store,
            "editor",
            &[Permission::ReadEntities, Permission::WriteOverrides],
        )
        .await;
        let app = create_router(store.clone()).unwrap();

        let response = app
            .clone()
            .oneshot(request(
                "PATCH",
                "/api/entities/project/7/override",
                Some(&token),
                Some(json!({"prospective": 0, "amount": null})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request("GET", "/api/entities/project/7", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let view = json_body(response).await;
        assert_eq!(view["fields"]["prospective"]["value"], false);
        assert_eq!(view["fields"]["prospective"]["source"], "override");
        assert_eq!(view["fields"]["amount"]["value"], Value::Null);
        assert_eq!(view["has_override"], true);
    }

    #[tokio::test]
    async fn override_for_unsynced_entity_is_not_found() {
        let store = seeded_store().await;
        let token = session(&store, "editor", &[Permission::WriteOverrides]).await;
        let app = create_router(store).unwrap();

        let response = app
            .oneshot(request(
                "PUT",
                "/api/entities/project/999/override",
                Some(&token),
                Some(json!({"status": "closed"})),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn profile_route_is_public_but_self_scoped() {
        let store = Arc::new(MemoryStore::new());
        let token = session(&store, "nobody-special", &[]).await;
        let app = create_router(store).unwrap();

        let response = app
            .clone()
            .oneshot(request("GET", "/auth/me", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(request("GET", "/auth/me", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["username"], "nobody-special");
    }

    #[tokio::test]
    async fn route_table_endpoint_lists_access_rules() {
        let store = Arc::new(MemoryStore::new());
        let token = session(&store, "admin", &[Permission::ReadRoutes]).await;
        let app = create_router(store.clone()).unwrap();

        let response = app
            .oneshot(request("GET", "/api/routes", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let table = json_body(response).await;
        let entries = table.as_array().unwrap();
        assert_eq!(entries.len(), guarded_routes(store).descriptors().len());
        assert!(entries
            .iter()
            .any(|e| e["path"] == "/health" && e["access"]["access"] == "public"));
    }
}
