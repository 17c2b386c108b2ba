#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use firelynx_api::participant::SagaParticipant;
use firelynx_api::shutdown_channel;
use firelynx_apps::DynamicAppRegistry;
use firelynx_http::HttpCluster;
use firelynx_node::loader;
use firelynx_saga::SagaOrchestrator;
use firelynx_telemetry::{init_tracing, LogFormat};
use firelynx_txn::siphon::transaction_siphon;
use firelynx_txn::store::TransactionStore;
use firelynx_txn::transaction::{ConfigTransaction, Source};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[clap(name = "firelynx", about = "Dynamically reconfigurable HTTP application server")]
struct Opts {
    #[clap(long, env = "FIRELYNX_CONFIG", help = "Path to the firelynx.toml configuration file.")]
    config: PathBuf,

    #[clap(long, help = "Render log records as JSON instead of text.")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::parse();
    let format = if opts.log_json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_tracing("info", format)?;
    tracing::info!(target: "node", event = "startup", config = ?opts.config);

    let config = Arc::new(loader::load_config(&opts.config)?);

    let registry = Arc::new(DynamicAppRegistry::new());
    registry
        .load_snapshot(&config)
        .context("instantiating applications")?;

    let cluster = Arc::new(HttpCluster::new(registry.clone()));
    let orchestrator = Arc::new(SagaOrchestrator::new(TransactionStore::default()));
    orchestrator.register_participant(cluster.clone())?;

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let (siphon_tx, siphon_rx) = transaction_siphon();
    let cluster_task = tokio::spawn(cluster.clone().run(shutdown_rx.clone()));
    let saga_task = tokio::spawn(orchestrator.clone().run(siphon_rx, shutdown_rx.clone()));

    // Offer the initial configuration as a file-sourced transaction.
    let tx = Arc::new(ConfigTransaction::new(
        Source::File,
        opts.config.display().to_string(),
        Uuid::new_v4().to_string(),
        config,
    ));
    tx.run_validation().context("validating configuration")?;
    siphon_tx
        .send(tx.clone(), shutdown_rx.clone())
        .await
        .context("offering initial configuration")?;
    let state = tx.wait_for_completion(shutdown_rx.clone()).await?;
    tracing::info!(target: "node", event = "startup_complete", tx_id = %tx.id(), state = %state);

    wait_for_signals(&orchestrator, shutdown_rx.clone()).await?;

    tracing::info!(target: "node", event = "shutdown", reason = "signal");
    // The shared shutdown signal stops the orchestrator loop and every
    // participant task.
    let _ = shutdown_tx.send(true);
    let _ = cluster_task.await;
    let _ = saga_task.await;
    tracing::info!(target: "node", event = "shutdown", reason = "complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signals(
    orchestrator: &Arc<SagaOrchestrator>,
    shutdown_rx: firelynx_api::Shutdown,
) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sighup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = sighup.recv() => {
                // SIGHUP revalidates the current snapshot and re-runs commit
                // across participants; no file is re-read.
                tracing::info!(target: "node", event = "reload", reason = "sighup");
                if let Err(e) = orchestrator.reload_current(shutdown_rx.clone()).await {
                    tracing::error!(target: "node", error = %e, "reload failed");
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signals(
    _orchestrator: &Arc<SagaOrchestrator>,
    _shutdown_rx: firelynx_api::Shutdown,
) -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
