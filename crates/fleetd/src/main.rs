//! fleetd — the fleetgrid daemon.
//!
//! Single binary that assembles the elastic cluster:
//! - Durable instance set (redb)
//! - Instance catalog and availability tracking
//! - Grower, reconciler, and capacity view
//! - REST API
//!
//! # Usage
//!
//! ```text
//! fleetd standalone --config fleet.toml --port 8080 --data-dir /var/lib/fleetgrid
//! fleetd validate --config fleet.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fleet_core::FleetConfig;
use fleetgrid_cluster::Cluster;
use fleetgrid_placement::{AdmissionPolicy, Catalog};
use fleetgrid_pool::LocalConnector;
use fleetgrid_provider::SimProvider;
use fleetgrid_state::StateStore;

const DEFAULT_FILTER: &str = "info,fleetd=debug,fleetgrid=debug";

#[derive(Parser)]
#[command(name = "fleetd", about = "fleetgrid elastic cluster daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the cluster against the simulated provider with in-process pools.
    Standalone {
        /// Path to fleet.toml.
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Data directory for the durable instance set.
        #[arg(long, default_value = "/var/lib/fleetgrid")]
        data_dir: PathBuf,

        /// Simulated launch duration in milliseconds.
        #[arg(long, default_value = "1000")]
        launch_delay_ms: u64,
    },

    /// Check a configuration file and list the instance types it admits.
    Validate {
        /// Path to fleet.toml.
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,
    },
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Standalone {
            config,
            port,
            data_dir,
            launch_delay_ms,
        } => run_standalone(&config, port, data_dir, launch_delay_ms).await,
        Command::Validate { config } => validate(&config),
    }
}

async fn run_standalone(
    config_path: &Path,
    port: u16,
    data_dir: PathBuf,
    launch_delay_ms: u64,
) -> anyhow::Result<()> {
    info!(config = ?config_path, "fleetd starting in standalone mode");
    let config = FleetConfig::from_file(config_path)?;

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("fleet.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // ── Cluster ────────────────────────────────────────────────

    let provider =
        Arc::new(SimProvider::new().with_launch_delay(Duration::from_millis(launch_delay_ms)));
    let cluster = Arc::new(Cluster::start(
        &config,
        &Catalog::builtin(),
        provider,
        Arc::new(LocalConnector),
        store,
    )?);

    // ── API server ─────────────────────────────────────────────

    let router = fleetgrid_api::build_router(cluster.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let on_shutdown = cluster.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
            on_shutdown.shutdown();
        })
        .await?;

    info!("fleetd stopped");
    Ok(())
}

fn validate(config_path: &Path) -> anyhow::Result<()> {
    let config = FleetConfig::from_file(config_path)?;
    config.cluster.validate()?;
    config.timing.parse()?;

    let shapes = Catalog::builtin().admissible(&AdmissionPolicy::from_config(&config.cluster));
    if shapes.is_empty() {
        anyhow::bail!(
            "no admissible instance types in region {}",
            config.cluster.region
        );
    }

    println!(
        "{}: ok ({} admissible instance types in {})",
        config_path.display(),
        shapes.len(),
        config.cluster.region
    );
    for shape in &shapes {
        println!(
            "  {:<14} {:<40} ${:.4}/h",
            shape.instance_type,
            shape.resources.to_string(),
            shape.price(&config.cluster.region).unwrap_or_default()
        );
    }
    Ok(())
}
