//! powermgmt-worker: runs the trigger and all queue consumers.
//!
//! Configuration comes from the environment (and `.env`); see `Config`.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use powermgmt_core::config::{load_dotenv, Config};
use powermgmt_engine::arm::{
    self, ArmAlertSuppressor, ArmClient, ManagedIdentityToken, ResourceGraphInventory, StaticToken,
    TokenSource,
};
use powermgmt_engine::{
    AlertSuppressor, Collaborators, NoAlertSuppression, PowerEngine, TracingSink,
};
use powermgmt_queue::{DurableQueue, QueueSet};

// ── CLI ─────────────────────────────────────────────────────────────

/// Tag-driven power management worker.
#[derive(Parser, Debug)]
#[command(name = "powermgmt-worker", version, about)]
struct Cli {
    /// Publish scans for the current tick at startup instead of waiting for the next one.
    #[arg(long)]
    trigger_now: bool,

    /// Emit logs as JSON lines.
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    log_json: bool,

    /// Seconds to wait for workers to finish after shutdown is requested.
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 30)]
    shutdown_timeout: u64,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = Config::from_env();
    config.validate()?;
    config.log_summary();

    let queues = QueueSet::from_config(&config).await?;
    for queue in queues.all() {
        match queue.health_check().await {
            Ok(health) => info!(queue = queue.name(), "{health}"),
            Err(e) => warn!(queue = queue.name(), error = %e, "Queue health check failed"),
        }
    }

    let token: Arc<dyn TokenSource> = match &config.identity.access_token {
        Some(token) => Arc::new(StaticToken::new(token.clone())),
        None => Arc::new(ManagedIdentityToken::new(
            config.identity.arm_endpoint.clone(),
            config.identity.client_id.clone(),
        )),
    };
    let client = Arc::new(ArmClient::new(config.identity.arm_endpoint.clone(), token)?);
    let alerts: Arc<dyn AlertSuppressor> = match config.alerts.suppression() {
        Some(_) => Arc::new(ArmAlertSuppressor::new(client.clone())),
        None => Arc::new(NoAlertSuppression),
    };
    let collaborators = Collaborators {
        adapters: arm::registry(client.clone(), &config.scopes.enabled_kinds),
        inventory: Arc::new(ResourceGraphInventory::new(
            client,
            &config.scopes,
            config.dispatch.clone(),
        )),
        alerts,
        sink: Arc::new(TracingSink),
    };

    let shutdown_timeout = Duration::from_secs(cli.shutdown_timeout);
    let engine = PowerEngine::new(config, queues, collaborators)?;

    if cli.trigger_now {
        match engine.trigger.fire_now().await {
            Ok(n) => info!(scopes = n, "Manual trigger published"),
            Err(e) => error!(error = %e, "Manual trigger failed"),
        }
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handles = engine.spawn(shutdown_rx);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    let drain = futures::future::join_all(handles);
    if tokio::time::timeout(shutdown_timeout, drain).await.is_err() {
        warn!(timeout_secs = shutdown_timeout.as_secs(), "Workers did not stop in time");
    }
    info!("powermgmt-worker stopped");
    Ok(())
}
