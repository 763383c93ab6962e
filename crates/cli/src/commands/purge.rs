use chrono::Utc;
use operator_db::repositories::SqlCheckpointStore;
use operator_db::CheckpointStore;
use serde_json::json;

use crate::commands::{open_database, prepare, CommandResult};

/// Deletes checkpoints whose TTL has elapsed.
pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("purge") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_database("purge", &config).await?;
        let store = SqlCheckpointStore::new(pool.clone(), config.checkpoint.ttl_secs);
        let purged = store.purge_expired(Utc::now()).await.map_err(|error| {
            CommandResult::failure("purge", "checkpoint_store", error.to_string(), 6)
        })?;
        pool.close().await;
        Ok::<u64, CommandResult>(purged)
    });

    match result {
        Ok(purged) => CommandResult::success_with_data(
            "purge",
            format!("purged {purged} expired checkpoints"),
            Some(json!({ "purged": purged })),
        ),
        Err(failure) => failure,
    }
}
