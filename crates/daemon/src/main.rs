//! jobhost daemon - Main Entry Point
//! Filesystem job store + process supervisor + JSON-RPC server

mod config;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{DaemonConfig, LogFormat};
use jobhost_api_rpc::{RpcServer, RpcServerConfig};
use jobhost_core::application::{JobEventBus, JobService, ProcessSupervisor, RecoveryService};
use jobhost_core::port::id_provider::RandomIdGenerator;
use jobhost_core::port::time_provider::SystemTimeProvider;
use jobhost_core::port::JobStore;
use jobhost_infra_fs::FilesystemJobStore;
use jobhost_infra_system::SubprocessSpawner;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration
    let config = DaemonConfig::from_env().context("Invalid JOBHOST_* configuration")?;

    // 2. Initialize logging
    init_logging(config.log_format)?;

    info!("jobhost v{} starting...", VERSION);

    // 3. Durable medium
    let jobs_dir = config.jobs_dir();
    info!(jobs_dir = %jobs_dir.display(), "Opening job store...");
    tokio::fs::create_dir_all(&jobs_dir)
        .await
        .with_context(|| format!("Cannot create jobs directory {}", jobs_dir.display()))?;

    // 4. Setup dependencies (DI wiring)
    let time_provider = Arc::new(SystemTimeProvider);
    let id_generator = Arc::new(RandomIdGenerator::from_entropy());
    let store: Arc<dyn JobStore> = Arc::new(
        FilesystemJobStore::open(&jobs_dir, id_generator, time_provider)
            .await
            .map_err(|e| anyhow::anyhow!("Job store unavailable: {}", e))?,
    );
    let spawner = Arc::new(SubprocessSpawner::new(config.env_allowlist.clone()));
    let bus = JobEventBus::new(config.event_buffer);
    let supervisor = ProcessSupervisor::new(store.clone(), spawner, bus.clone());
    let service = JobService::new(store.clone(), supervisor.clone(), bus.clone());

    // 5. Run crash recovery before accepting requests
    info!("Running crash recovery...");
    match RecoveryService::new(store, bus).recover_orphaned_jobs().await {
        Ok(count) => info!(recovered_jobs = count, "Crash recovery completed"),
        Err(e) => error!(error = ?e, "Crash recovery failed"),
    }

    // 6. Start JSON-RPC server
    info!("Starting JSON-RPC server...");
    let rpc_config = RpcServerConfig {
        host: config.rpc_host.clone(),
        port: config.rpc_port,
        rate_limit: config.rate_limit(),
    };
    let (addr, rpc_handle) = RpcServer::new(rpc_config, service)
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    info!(addr = %addr, "System ready. Waiting for jobs...");
    info!("Press Ctrl+C to shutdown");

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 8. Graceful shutdown: no new requests, then abort what is still running
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;

    let terminated = supervisor.terminate_all();
    if terminated > 0 {
        info!(jobs = terminated, "Terminating running jobs...");
        let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
            while !supervisor.running_jobs().is_empty() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = supervisor.running_jobs().len(),
                "Jobs still running at shutdown; they will be recovered as orphans"
            );
        }
    }
    rpc_handle.stopped().await;

    info!("Shutdown complete.");

    Ok(())
}

fn init_logging(format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("jobhost=info"))
        .context("Failed to create env filter")?;

    match format {
        LogFormat::Json => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init()?;
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init()?;
        }
    }
    Ok(())
}
