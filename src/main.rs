//! Azure Storage service broker server.
//!
//! Reads the YAML configuration, the broker credentials and the Azure
//! service principal from the environment, then serves the broker API
//! until SIGTERM/SIGINT.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use azure_storage_broker::cloud::azure::AzureCloudClient;
use azure_storage_broker::cloud::CloudClient;
use azure_storage_broker::config::{self, AzureCredentials, LoggingConfig};
use azure_storage_broker::state::local::LocalBrokerStore;
use azure_storage_broker::state::memory::MemoryBrokerStore;
use azure_storage_broker::state::store::BrokerStore;

/// Command-line arguments for the broker.
#[derive(Parser, Debug)]
#[command(
    name = "azure-storage-broker",
    version,
    about = "Open Service Broker for Azure Storage"
)]
struct Cli {
    /// Path to the YAML configuration file. A missing file means defaults.
    #[arg(short, long, default_value = "broker.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    if logging.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config_or_default(&cli.config)?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    // Broker and Azure credentials are required before anything listens.
    config.auth = config.auth.resolve(|key| std::env::var(key).ok())?;
    let credentials = AzureCredentials::from_env()?;

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        azure_storage_broker::metrics::init_metrics();
        azure_storage_broker::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let store: Arc<dyn BrokerStore> = match config.store.engine.as_str() {
        "memory" => {
            info!("In-memory state store initialized (state is lost on exit)");
            Arc::new(MemoryBrokerStore::new())
        }
        "local" => {
            let store = LocalBrokerStore::new(&config.store.local)?;
            info!(
                "JSON file state store initialized at {}",
                config.store.local.data_dir
            );
            Arc::new(store)
        }
        other => {
            return Err(anyhow::anyhow!(
                "Unknown store.engine '{other}' (expected 'local' or 'memory')"
            ))
        }
    };

    let instances = store.list_instances().await?.len();
    let bindings = store.list_bindings().await?.len();
    azure_storage_broker::metrics::update_inventory(instances, bindings);

    let cloud: Arc<dyn CloudClient> = Arc::new(AzureCloudClient::new(
        credentials,
        config.azure.clone(),
        Duration::from_secs(config.server.request_timeout),
    )?);

    let state = Arc::new(azure_storage_broker::AppState {
        config: config.clone(),
        store,
        cloud,
    });

    let app = azure_storage_broker::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Broker listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Broker shut down");

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
