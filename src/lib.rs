pub mod api;
pub mod config;
pub mod logic;
pub mod model;
pub mod store;
pub mod upstream;

// Export API types
pub use api::handlers;
pub use api::routes;

pub use logic::{CancelFlag, MergeEngine, SyncError, SyncOptions, SyncPipeline, SyncReport};

// Export all model types
pub use model::*;

// Export store types
pub use store::{MemoryStore, PostgresStore, Store};

pub use upstream::{HttpUpstream, UpstreamApi};

/// Logging setup shared by the server and the sync script
pub fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    let _ = Builder::new()
        .filter_level(LevelFilter::Info) // Default to Info for everything
        .filter_module("sqlx", LevelFilter::Warn) // Suppress sqlx Debug logs
        .parse_default_env()
        .try_init();
}

/// Build the guarded router over `store` and serve it until shutdown
pub async fn run_server<S: Store + 'static>(
    store: std::sync::Arc<S>,
    config: &config::AppConfig,
) -> anyhow::Result<()> {
    use axum::serve;
    use tokio::net::TcpListener;

    let app = api::routes::create_router(store)?;

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!("Timeboard server running on http://{}", bind_address);

    serve(listener, app).await?;

    Ok(())
}
