//! Route registration that forces every route to declare its access rule.
//!
//! Routes can only be added through [`GuardedRouter`], which takes either a
//! [`Permission`] or a [`PublicRoute`]. Public routes are a closed enum with
//! fixed method and path, so a new public route cannot be added by accident.
//! The full table is validated before the axum router is assembled.

use axum::handler::Handler;
use axum::middleware::from_fn_with_state;
use axum::routing::{on, MethodFilter, MethodRouter};
use axum::{Extension, Router};
use itertools::Itertools;
use serde::Serialize;
use std::sync::Arc;

use crate::api::gate::{require_permission, GateState};
use crate::api::handlers::AppState;
use crate::model::Permission;
use crate::store::traits::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RouteMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl RouteMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteMethod::Get => "GET",
            RouteMethod::Post => "POST",
            RouteMethod::Put => "PUT",
            RouteMethod::Patch => "PATCH",
            RouteMethod::Delete => "DELETE",
        }
    }

    fn filter(&self) -> MethodFilter {
        match self {
            RouteMethod::Get => MethodFilter::GET,
            RouteMethod::Post => MethodFilter::POST,
            RouteMethod::Put => MethodFilter::PUT,
            RouteMethod::Patch => MethodFilter::PATCH,
            RouteMethod::Delete => MethodFilter::DELETE,
        }
    }
}

impl std::fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The fixed allowlist of routes reachable without a permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicRoute {
    Login,
    Logout,
    ProfileRead,
    ProfileUpdate,
    PasswordResetRequest,
    PasswordResetConfirm,
    Health,
    Metrics,
}

impl PublicRoute {
    pub const ALL: [PublicRoute; 8] = [
        PublicRoute::Login,
        PublicRoute::Logout,
        PublicRoute::ProfileRead,
        PublicRoute::ProfileUpdate,
        PublicRoute::PasswordResetRequest,
        PublicRoute::PasswordResetConfirm,
        PublicRoute::Health,
        PublicRoute::Metrics,
    ];

    pub fn method(&self) -> RouteMethod {
        match self {
            PublicRoute::Login
            | PublicRoute::Logout
            | PublicRoute::PasswordResetRequest
            | PublicRoute::PasswordResetConfirm => RouteMethod::Post,
            PublicRoute::ProfileRead | PublicRoute::Health | PublicRoute::Metrics => RouteMethod::Get,
            PublicRoute::ProfileUpdate => RouteMethod::Patch,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            PublicRoute::Login => "/auth/login",
            PublicRoute::Logout => "/auth/logout",
            PublicRoute::ProfileRead | PublicRoute::ProfileUpdate => "/auth/me",
            PublicRoute::PasswordResetRequest => "/auth/password-reset",
            PublicRoute::PasswordResetConfirm => "/auth/password-reset/confirm",
            PublicRoute::Health => "/health",
            PublicRoute::Metrics => "/metrics",
        }
    }

    /// Allowlist entry for a method/path pair, if there is one
    pub fn lookup(method: RouteMethod, path: &str) -> Option<PublicRoute> {
        Self::ALL
            .into_iter()
            .find(|route| route.method() == method && route.path() == path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "access", content = "permission", rename_all = "snake_case")]
pub enum Access {
    Public,
    Requires(Permission),
}

/// One registered route and its access rule.
///
/// `access` is `None` only for descriptors assembled outside
/// [`GuardedRouter`]; validation rejects them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteDescriptor {
    pub method: RouteMethod,
    pub path: String,
    pub access: Option<Access>,
}

impl RouteDescriptor {
    pub fn protected(method: RouteMethod, path: &str, permission: Permission) -> Self {
        Self {
            method,
            path: path.to_string(),
            access: Some(Access::Requires(permission)),
        }
    }

    pub fn public(route: PublicRoute) -> Self {
        Self {
            method: route.method(),
            path: route.path().to_string(),
            access: Some(Access::Public),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RouteViolation {
    #[error("{method} {path} declares neither a permission nor public status")]
    Unclassified { method: RouteMethod, path: String },
    #[error("{method} {path} is marked public but is not on the public allowlist")]
    NotAllowlisted { method: RouteMethod, path: String },
    #[error("{method} {path} is registered more than once")]
    Duplicate { method: RouteMethod, path: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid route table: {}", .0.iter().join("; "))]
pub struct RouteTableError(pub Vec<RouteViolation>);

/// Check that every route is either allowlisted-public or permission-gated,
/// and that no method/path pair is registered twice.
pub fn validate_route_table(routes: &[RouteDescriptor]) -> Result<(), RouteTableError> {
    let mut violations: Vec<RouteViolation> = routes
        .iter()
        .filter_map(|route| match route.access {
            None => Some(RouteViolation::Unclassified {
                method: route.method,
                path: route.path.clone(),
            }),
            Some(Access::Public) if PublicRoute::lookup(route.method, &route.path).is_none() => {
                Some(RouteViolation::NotAllowlisted {
                    method: route.method,
                    path: route.path.clone(),
                })
            }
            _ => None,
        })
        .collect();

    violations.extend(
        routes
            .iter()
            .duplicates_by(|route| (route.method, route.path.clone()))
            .map(|route| RouteViolation::Duplicate {
                method: route.method,
                path: route.path.clone(),
            }),
    );

    if violations.is_empty() {
        Ok(())
    } else {
        Err(RouteTableError(violations))
    }
}

/// Builder that only accepts classified routes
pub struct GuardedRouter<S: Store + 'static> {
    store: AppState<S>,
    pending: Vec<(RouteDescriptor, MethodRouter<AppState<S>>)>,
}

impl<S: Store + 'static> GuardedRouter<S> {
    pub fn new(store: AppState<S>) -> Self {
        Self {
            store,
            pending: Vec::new(),
        }
    }

    /// Register a route that requires `permission`
    pub fn protected<H, T>(mut self, method: RouteMethod, path: &str, permission: Permission, handler: H) -> Self
    where
        H: Handler<T, AppState<S>>,
        T: 'static,
    {
        let gate = GateState::new(self.store.clone(), permission);
        let method_router =
            on(method.filter(), handler).route_layer(from_fn_with_state(gate, require_permission::<S>));
        self.pending
            .push((RouteDescriptor::protected(method, path, permission), method_router));
        self
    }

    /// Register one of the allowlisted public routes
    pub fn public<H, T>(mut self, route: PublicRoute, handler: H) -> Self
    where
        H: Handler<T, AppState<S>>,
        T: 'static,
    {
        let method_router = on(route.method().filter(), handler);
        self.pending.push((RouteDescriptor::public(route), method_router));
        self
    }

    pub fn descriptors(&self) -> Vec<RouteDescriptor> {
        self.pending.iter().map(|(d, _)| d.clone()).collect()
    }

    /// Validate the table and assemble the router. The route table is exposed
    /// to handlers as an `Extension<Arc<Vec<RouteDescriptor>>>`.
    pub fn build(self) -> Result<Router, RouteTableError> {
        let table = self.descriptors();
        validate_route_table(&table)?;

        let router = self
            .pending
            .into_iter()
            .fold(Router::<AppState<S>>::new(), |router, (descriptor, method_router)| {
                router.route(&descriptor.path, method_router)
            });

        Ok(router
            .layer(Extension(Arc::new(table)))
            .with_state(self.store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlist_lookup_requires_method_and_path() {
        assert_eq!(PublicRoute::lookup(RouteMethod::Get, "/health"), Some(PublicRoute::Health));
        assert_eq!(PublicRoute::lookup(RouteMethod::Patch, "/auth/me"), Some(PublicRoute::ProfileUpdate));
        assert_eq!(PublicRoute::lookup(RouteMethod::Delete, "/auth/me"), None);
        assert_eq!(PublicRoute::lookup(RouteMethod::Get, "/api/entities/:kind"), None);
    }

    #[test]
    fn allowlist_has_no_duplicate_entries() {
        let descriptors: Vec<_> = PublicRoute::ALL.into_iter().map(RouteDescriptor::public).collect();
        assert_eq!(validate_route_table(&descriptors), Ok(()));
    }

    #[test]
    fn unguarded_non_public_route_fails_validation() {
        let routes = vec![
            RouteDescriptor::public(PublicRoute::Health),
            RouteDescriptor::protected(RouteMethod::Get, "/api/entities/:kind", Permission::ReadEntities),
            RouteDescriptor {
                method: RouteMethod::Delete,
                path: "/api/entities/:kind/:id/override".to_string(),
                access: None,
            },
        ];

        let err = validate_route_table(&routes).unwrap_err();

        assert_eq!(
            err.0,
            vec![RouteViolation::Unclassified {
                method: RouteMethod::Delete,
                path: "/api/entities/:kind/:id/override".to_string(),
            }]
        );
    }

    #[test]
    fn public_claim_outside_allowlist_fails_validation() {
        let routes = vec![RouteDescriptor {
            method: RouteMethod::Get,
            path: "/api/routes".to_string(),
            access: Some(Access::Public),
        }];

        let err = validate_route_table(&routes).unwrap_err();

        assert!(matches!(err.0.as_slice(), [RouteViolation::NotAllowlisted { .. }]));
        assert!(err.to_string().contains("GET /api/routes"));
    }

    #[test]
    fn duplicate_registrations_fail_validation() {
        let routes = vec![
            RouteDescriptor::protected(RouteMethod::Get, "/api/routes", Permission::ReadRoutes),
            RouteDescriptor::protected(RouteMethod::Get, "/api/routes", Permission::ReadEntities),
        ];

        let err = validate_route_table(&routes).unwrap_err();

        assert!(matches!(err.0.as_slice(), [RouteViolation::Duplicate { .. }]));
    }

    #[test]
    fn descriptors_serialize_with_access_rule() {
        let json = serde_json::to_value(RouteDescriptor::protected(
            RouteMethod::Put,
            "/api/entities/:kind/:id/override",
            Permission::WriteOverrides,
        ))
        .unwrap();

        assert_eq!(json["method"], "PUT");
        assert_eq!(json["access"]["access"], "requires");
        assert_eq!(json["access"]["permission"], "overrides:write");
    }
}
