//! reactor daemon — coordination and reaction backplane process: loads
//! config, starts the operator API, and runs leadership/cron loops until
//! shutdown.

use anyhow::{Context, Result};
use tracing::info;

mod daemon;
mod shutdown;

use daemon::Daemon;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = reactor_config::Config::load().context("failed to load configuration")?;

    reactor_telemetry::logging::init_logging("reactor-daemon", "info");

    info!(
        instance_id = %config.instance_id,
        coordination_store_url = %config.coordination_store_url.0,
        cron_leader_election = config.cluster.cron_leader_election,
        "reactor daemon starting"
    );

    let daemon = Daemon::new(config).context("failed to initialize daemon")?;
    let shutdown = daemon.shutdown_handle();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, initiating shutdown");
        shutdown.trigger();
    });

    daemon.run().await.context("daemon execution failed")?;

    info!("reactor daemon stopped");
    Ok(())
}
