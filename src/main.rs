use std::sync::Arc;
use timeboard::config::{AppConfig, StoreBackend};
use timeboard::store::{MemoryStore, PostgresStore};
use timeboard::{init_logging, run_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    init_logging();

    // Load configuration
    let config = AppConfig::load()?;
    log::info!(
        "Configuration loaded: server={}:{}, backend={:?}",
        config.server.host,
        config.server.port,
        config.database.backend
    );

    match config.database.backend {
        StoreBackend::Postgres => {
            log::info!("Connecting to PostgreSQL...");
            let database_url = config.database_url()?;
            let postgres_store =
                PostgresStore::new(&database_url, config.database.max_connections.unwrap_or(10))
                    .await?;

            log::info!("Running database migrations...");
            postgres_store.migrate().await?;

            run_server(Arc::new(postgres_store), &config).await
        }
        StoreBackend::Memory => {
            log::warn!("Using the in-memory store; nothing will survive a restart");
            run_server(Arc::new(MemoryStore::new()), &config).await
        }
    }
}
