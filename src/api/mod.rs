pub mod auth_handlers;
pub mod gate;
pub mod guard;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod user_extractor;

pub use guard::{GuardedRouter, PublicRoute, RouteDescriptor, RouteMethod, RouteTableError};
pub use handlers::*;
pub use routes::*;
