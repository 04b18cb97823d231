use anyhow::{bail, Context, Result};
use std::process::ExitCode;
use std::sync::Arc;

use timeboard::config::{AppConfig, StoreBackend};
use timeboard::logic::{provision_plan, refresh_snapshots, CancelFlag, SyncError, SyncOptions, SyncPipeline};
use timeboard::model::EntityKind;
use timeboard::store::{MemoryStore, PostgresStore, SnapshotStore};
use timeboard::upstream::HttpUpstream;

const EXIT_FAILURE: u8 = 1;
const EXIT_UNREACHABLE: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    /// Ensure the configured customer -> project -> activity (-> tag) chain exists
    Provision,
    /// Re-pull every upstream entity into the snapshot table
    Refresh,
}

fn parse_mode(arg: Option<&str>) -> Result<Mode> {
    match arg {
        None | Some("provision") => Ok(Mode::Provision),
        Some("refresh") => Ok(Mode::Refresh),
        Some(other) => bail!("unknown mode `{}` (expected `provision` or `refresh`)", other),
    }
}

async fn open_store(config: &AppConfig) -> Result<Arc<dyn SnapshotStore>> {
    match config.database.backend {
        StoreBackend::Postgres => {
            let database_url = config.database_url()?;
            let store = PostgresStore::new(&database_url, config.database.max_connections.unwrap_or(2))
                .await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            log::warn!("Using the in-memory store; snapshots are discarded when the run ends");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn run(mode: Mode, config: AppConfig, cancel: CancelFlag) -> Result<()> {
    config
        .upstream
        .validate()
        .context("Invalid upstream configuration")?;
    let stages = match mode {
        Mode::Provision => provision_plan(&config.provision).context("Invalid provision configuration")?,
        Mode::Refresh => Vec::new(),
    };

    let api = HttpUpstream::from_config(&config.upstream)?;
    let store = open_store(&config).await?;
    let options = SyncOptions::from(&config.upstream);

    match mode {
        Mode::Provision => {
            let pipeline = stages
                .into_iter()
                .fold(SyncPipeline::new(&api, store.as_ref(), options), |pipeline, stage| {
                    pipeline.stage(stage)
                });
            let report = pipeline.run(&cancel).await?;

            for outcome in &report.stages {
                log::info!(
                    "{} `{}` -> #{} ({})",
                    outcome.kind,
                    outcome.name,
                    outcome.upstream_id,
                    if outcome.created { "created" } else { "existing" }
                );
            }
            log::info!(
                "Provisioned against upstream {}: {} created, {} reused",
                report.upstream_version,
                report.created_count(),
                report.stages.len() - report.created_count()
            );
        }
        Mode::Refresh => {
            let counts = refresh_snapshots(&api, store.as_ref(), &EntityKind::ALL, &options, &cancel).await?;
            let total: usize = counts.iter().map(|(_, n)| n).sum();
            log::info!("Refreshed {} snapshot(s) across {} kinds", total, counts.len());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    timeboard::init_logging();

    let arg = std::env::args().nth(1);
    let mode = match parse_mode(arg.as_deref()) {
        Ok(mode) => mode,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load configuration: {:#}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupt received; stopping after the current stage");
                cancel.cancel();
            }
        });
    }

    match run(mode, config, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<SyncError>() {
            Some(SyncError::Connectivity(source)) => {
                log::error!("Upstream is unreachable, nothing was changed: {}", source);
                ExitCode::from(EXIT_UNREACHABLE)
            }
            Some(SyncError::Cancelled { completed }) => {
                log::warn!("Cancelled after {} completed stage(s)", completed.len());
                ExitCode::from(EXIT_CANCELLED)
            }
            _ => {
                log::error!("{:#}", e);
                ExitCode::from(EXIT_FAILURE)
            }
        },
    }
}
