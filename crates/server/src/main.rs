mod bootstrap;
mod health;
mod invoke;

use std::time::Duration;

use anyhow::Result;
use operator_core::config::{AppConfig, LoadOptions};
use tokio_util::sync::CancellationToken;

fn init_logging(config: &AppConfig) {
    use operator_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    let stop_accepting = CancellationToken::new();
    let turns = CancellationToken::new();
    let router = app.router(turns.clone());
    let stopped = stop_accepting.clone().cancelled_owned();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router).with_graceful_shutdown(stopped).await
    });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        bind_address = %address,
        "operator-server listening"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        thread_id = "unknown",
        grace_secs = app.config.server.graceful_shutdown_secs,
        "operator-server stopping"
    );

    stop_accepting.cancel();
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let served = match tokio::time::timeout(grace, &mut server).await {
        Ok(joined) => joined,
        Err(_) => {
            tracing::warn!(
                event_name = "system.server.turns_cancelled",
                correlation_id = "shutdown",
                thread_id = "unknown",
                "grace period elapsed; cancelling in-flight turns"
            );
            turns.cancel();
            server.await
        }
    };
    served??;

    app.db_pool.close().await;
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
