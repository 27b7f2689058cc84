// Upety Bot - Webhook Server
// Receives gateway webhooks and runs the report scheduler in the same process

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use upety_bot::app::{init_tracing, App};
use upety_bot::{router, AppState, Config};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Configuration error: {e:#}");
            std::process::exit(1);
        }
    };
    let bind_address = config.bind_address.clone();
    let app = App::build(config)?;

    match app.ledger.ensure_header().await {
        Ok(true) => info!("Spreadsheet header written"),
        Ok(false) => {}
        Err(e) => warn!(error = %e, "Could not verify spreadsheet header"),
    }

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let scheduler = tokio::spawn(app.scheduler.clone().run(async move {
        let _ = stop_rx.changed().await;
    }));

    let state = AppState::new(app.dispatcher.clone(), app.scheduler.clone(), app.journal.clone());
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;

    info!(address = %bind_address, version = upety_bot::VERSION, "🚀 Webhook server listening");
    info!("   POST /webhook  - inbound messages");
    info!("   GET  /ping     - liveness");
    info!("   GET  /status   - health summary");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let _ = stop_tx.send(true);
    if let Err(e) = scheduler.await {
        warn!(error = %e, "Scheduler task ended abnormally");
    }
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
