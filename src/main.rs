use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use fleetflow::config::FleetflowConfig;
use fleetflow::coordinator::{CoordinatorConfig, FlowCoordinator};
use fleetflow::external::{
    ApprovalService, InMemoryApproval, InMemoryCmdb, InMemoryResourcePool, InMemoryTaskGraph,
    LogNotifier, Notifier, NullNotifier, RateLimitedApproval, StaticDbaDirectory,
};
use fleetflow::services::Services;
use fleetflow::store::InMemoryStore;
use fleetflow::telemetry::{init_telemetry, shutdown_telemetry};

#[derive(Parser)]
#[command(name = "fleetflow")]
#[command(about = "Database fleet ticket orchestration")]
#[command(
    long_about = "Fleetflow drives operational database changes through a \
                  ticket pipeline: approval, resource allocation, task-graph \
                  execution, and delivery, with host pool bookkeeping on the way."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the background flow coordinator
    Run {
        /// Path to a configuration file
        #[arg(long, help = "Configuration file (defaults to ./fleetflow.*)")]
        config: Option<PathBuf>,
        /// Override the poll interval in seconds
        #[arg(long, help = "Seconds between evaluation passes")]
        interval: Option<u64>,
    },
    /// Print the effective configuration and exit
    ShowConfig {
        /// Path to a configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Wire the service bundle on in-memory collaborators. Deployments with
/// real upstreams swap their clients in here; every seam is a trait.
fn build_services(config: &FleetflowConfig) -> Services {
    let approval: Arc<dyn ApprovalService> = Arc::new(RateLimitedApproval::new(
        Arc::new(InMemoryApproval::new()),
        config.approval.requests_per_second,
        config.approval.burst_capacity,
        Duration::from_secs(config.approval.log_cache_ttl_secs),
    ));
    let notifier: Arc<dyn Notifier> = if config.notification.enabled {
        Arc::new(LogNotifier::new())
    } else {
        Arc::new(NullNotifier)
    };

    Services {
        store: Arc::new(InMemoryStore::new()),
        approval,
        taskgraph: Arc::new(InMemoryTaskGraph::new()),
        resources: Arc::new(InMemoryResourcePool::new()),
        cmdb: Arc::new(InMemoryCmdb::new()),
        notifier,
        dba: Arc::new(StaticDbaDirectory::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, interval } => {
            init_telemetry()?;
            let mut settings = FleetflowConfig::load(config.as_deref())?;
            if let Some(interval) = interval {
                settings.coordinator.poll_interval_secs = interval;
            }

            let services = build_services(&settings);
            let coordinator = Arc::new(FlowCoordinator::new(
                services,
                CoordinatorConfig {
                    poll_interval_secs: settings.coordinator.poll_interval_secs,
                    jitter_ms: settings.coordinator.jitter_ms,
                },
            ));

            let stopper = Arc::clone(&coordinator);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("shutdown signal received");
                    stopper.shutdown();
                }
            });

            let result = coordinator.run().await;
            shutdown_telemetry();
            result
        }
        Commands::ShowConfig { config } => {
            let settings = FleetflowConfig::load(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}
