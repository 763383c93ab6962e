use std::sync::Arc;

use operator_agent::{AgentServices, GraphCache};
use operator_core::config::AppConfig;
use operator_core::InboundMessage;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use crate::commands::{open_database, prepare, CommandResult};

/// Runs one inbound message through the configured agent and prints the turn result.
///
/// Ctrl-C cancels the turn; the last saved checkpoint stays resumable.
pub fn run(channel_type: &str, from: &str, message: &str) -> CommandResult {
    let (config, runtime) = match prepare("turn") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };
    init_stderr_logging(&config);

    let inbound = InboundMessage::new(channel_type, from, message);
    let result = runtime.block_on(async {
        let pool = open_database("turn", &config).await?;
        let graphs = Arc::new(GraphCache::new());
        let services =
            AgentServices::from_config(&config, pool.clone(), &graphs).map_err(|error| {
                CommandResult::failure("turn", error.error_kind(), error.to_string(), 2)
            })?;

        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.cancel();
            }
        });

        let outcome = services.handler.handle(&inbound, &cancel).await;
        watcher.abort();
        pool.close().await;

        outcome.map_err(|error| {
            let failure = error.into_failure();
            CommandResult::failure("turn", &failure.error, failure.cause, 8)
        })
    });

    match result {
        Ok(turn) => CommandResult::success_with_data(
            "turn",
            turn.message.clone(),
            serde_json::to_value(&turn).ok(),
        ),
        Err(failure) => failure,
    }
}

fn init_stderr_logging(config: &AppConfig) {
    let level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
