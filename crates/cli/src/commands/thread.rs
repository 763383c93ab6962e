use operator_core::ThreadId;
use operator_db::repositories::SqlCheckpointStore;
use operator_db::CheckpointStore;
use serde_json::json;

use crate::commands::{open_database, prepare, CommandResult};

/// Prints the stored checkpoint of one thread.
pub fn run(thread_id: &str) -> CommandResult {
    let (config, runtime) = match prepare("thread") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };
    let thread_id = ThreadId::from(thread_id);

    let result = runtime.block_on(async {
        let pool = open_database("thread", &config).await?;
        let store = SqlCheckpointStore::new(pool.clone(), config.checkpoint.ttl_secs);
        let checkpoint = store.load(&thread_id).await.map_err(|error| {
            CommandResult::failure("thread", "checkpoint_store", error.to_string(), 6)
        })?;
        pool.close().await;
        Ok::<_, CommandResult>(checkpoint)
    });

    match result {
        Ok(Some(checkpoint)) => {
            let messages = checkpoint
                .state
                .current_messages()
                .iter()
                .map(|message| {
                    json!({
                        "role": message.role().as_str(),
                        "content": message.content(),
                        "tool_calls": message
                            .tool_calls()
                            .iter()
                            .map(|call| call.name.as_str())
                            .collect::<Vec<_>>(),
                        "tool_call_id": message.tool_call_id().map(|id| id.as_str()),
                    })
                })
                .collect::<Vec<_>>();
            CommandResult::success_with_data(
                "thread",
                format!("thread {thread_id} is at step {}", checkpoint.step),
                Some(json!({
                    "thread_id": thread_id.as_str(),
                    "step": checkpoint.step,
                    "expires_at": checkpoint.expires_at.to_rfc3339(),
                    "updated_at": checkpoint.updated_at.to_rfc3339(),
                    "unresolved_tool_calls": checkpoint.state.unresolved_tool_calls().len(),
                    "messages": messages,
                })),
            )
        }
        Ok(None) => CommandResult::failure(
            "thread",
            "not_found",
            format!("no checkpoint stored for thread {thread_id}"),
            7,
        ),
        Err(failure) => failure,
    }
}
