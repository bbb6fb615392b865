//! copilotd - closed-loop glucose automation daemon.
//!
//! Runs `AutomationCoordinator::run_cycle` on a fixed interval against a
//! local SQLite store, or once and exit for cron-style invocation.

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use clap::Parser;
use copilot_core::config::Settings;
use copilot_core::coordinator::AutomationCoordinator;
use copilot_core::dispatch::NoopBroadcaster;
use copilot_core::storage::sqlite::SqliteStore;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "copilotd", about = "Closed-loop glucose automation daemon")]
struct Cli {
    /// Path to the SQLite database file.
    #[arg(long, env = "COPILOT_DB_PATH", default_value = "copilot.db")]
    db_path: String,

    /// Run a single automation cycle and exit, instead of looping.
    #[arg(long)]
    once: bool,

    /// Seconds between automation cycles.
    #[arg(long, default_value_t = 300)]
    interval_secs: u64,

    /// Evaluate the pipeline but never submit an action.
    #[arg(long)]
    dry_run: bool,

    /// Port for the /health status endpoint. 0 disables it.
    #[arg(long, default_value_t = 8099)]
    status_port: u16,
}

async fn health_check() -> &'static str {
    "OK"
}

async fn run_status_server(port: u16) {
    let app = Router::new().route("/health", get(health_check)).layer(TraceLayer::new_for_http());
    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, port, "failed to bind status server");
            return;
        }
    };
    if let Err(err) = axum::serve(listener, app).await {
        error!(error = %err, "status server exited");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let settings = Settings::load();

    let store = Arc::new(SqliteStore::open(&cli.db_path).context("opening copilot database")?);
    let coordinator =
        AutomationCoordinator::new(store, settings.nightscout_url.clone(), settings.cloud_url.clone())
            .with_dry_run(cli.dry_run);

    if cli.once {
        run_one_cycle(&coordinator).await;
        return Ok(());
    }

    if cli.status_port != 0 {
        tokio::spawn(run_status_server(cli.status_port));
    }

    info!(interval_secs = cli.interval_secs, "starting automation loop");
    let mut ticker = tokio::time::interval(Duration::from_secs(cli.interval_secs));
    loop {
        ticker.tick().await;
        run_one_cycle(&coordinator).await;
    }
}

async fn run_one_cycle<R: copilot_core::storage::Store + Send + Sync>(
    coordinator: &AutomationCoordinator<R>,
) {
    match coordinator.run_cycle(&NoopBroadcaster).await {
        Ok(outcome) => info!(?outcome, "automation cycle finished"),
        Err(err) => error!(error = %err, "automation cycle failed"),
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "copilot_core=info,copilotd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
