use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use httpmon::{
    UserId,
    actors::{alert::AlertHandle, supervisor::SupervisorHandle},
    config::{Config, StorageConfig, read_config_file},
    error::{MonitorError, ValidationError},
    probe::HttpProber,
    service::WatchService,
    storage::{AggregateStore, MemoryBackend},
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable consulted when no config file is passed
const CONFIG_ENV: &str = "HTTPMON_CONFIG";

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn init(level: LevelFilter) {
    let filter =
        filter::Targets::new().with_targets(vec![("httpmon", level), ("sqlx", LevelFilter::WARN)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    let path = match args.file {
        Some(path) => path,
        None => std::env::var(CONFIG_ENV)
            .with_context(|| format!("no config file given (use -f or set {CONFIG_ENV})"))?,
    };
    let config = read_config_file(&path)?;

    let store = build_store(config.storage.clone().unwrap_or_default()).await?;
    let health = store.health_check().await?;
    if !health.healthy {
        bail!("storage is unhealthy: {}", health.message);
    }
    debug!("storage ready: {} ({:?})", health.message, health.metadata);

    let prober = HttpProber::new(config.monitor.probe_timeout())?;
    let (event_tx, _) = broadcast::channel(1024);

    let alerts = config
        .alert
        .clone()
        .map(|target| AlertHandle::spawn(target, event_tx.subscribe()));

    let supervisor = SupervisorHandle::spawn(
        store.clone(),
        Arc::new(prober),
        config.monitor.clone(),
        event_tx,
    );
    let service = WatchService::new(supervisor.clone(), store.clone());

    let recovered = supervisor.recover().await?;
    info!("resumed monitoring of {recovered} urls");

    register_configured_watches(&service, &config).await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");

    supervisor.shutdown().await?;
    if let Some(alerts) = alerts {
        alerts.shutdown().await;
    }
    store.close().await?;

    Ok(())
}

async fn build_store(storage: StorageConfig) -> anyhow::Result<Arc<dyn AggregateStore>> {
    let retention = storage.retention();

    match storage {
        StorageConfig::None { .. } => {
            warn!("using in-memory storage, monitoring state is lost on exit");
            Ok(Arc::new(MemoryBackend::with_retention(retention)))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => {
            let backend = httpmon::storage::sqlite::SqliteBackend::new(&path, retention)
                .await
                .with_context(|| format!("could not open database {}", path.display()))?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            bail!("sqlite storage requested but httpmon was built without the storage-sqlite feature")
        }
    }
}

async fn register_configured_watches(service: &WatchService, config: &Config) {
    for watch in &config.watches {
        let user_id = UserId::new(watch.user_id.as_str());

        match service
            .register_url(user_id, watch.url.as_str(), watch.threshold)
            .await
        {
            Ok(_) => info!("{}: watching {}", watch.user_id, watch.url),
            Err(MonitorError::Validation(ValidationError::DuplicateUrl(_))) => {
                debug!("{}: {} already watched", watch.user_id, watch.url)
            }
            Err(e) => error!("{}: could not watch {}: {e}", watch.user_id, watch.url),
        }
    }
}
