use operator_db::repositories::SqlProfileDirectory;
use operator_db::{ProfileDirectory, UserProfile};
use serde_json::json;

use crate::commands::{open_database, prepare, CommandResult};

/// Binds `user_id` on `channel` to `profile_id`, replacing any earlier binding of that address.
pub fn add(profile_id: &str, user_id: &str, channel: &str) -> CommandResult {
    if [profile_id, user_id, channel].iter().any(|value| value.trim().is_empty()) {
        return CommandResult::failure(
            "profile add",
            "invalid_input",
            "profile id, user id and channel must be non-empty",
            2,
        );
    }

    let (config, runtime) = match prepare("profile add") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let profile = UserProfile::new(profile_id.trim(), user_id.trim(), channel.trim());
    let result = runtime.block_on(async {
        let pool = open_database("profile add", &config).await?;
        SqlProfileDirectory::new(pool.clone()).save(profile).await.map_err(|error| {
            CommandResult::failure("profile add", "profile_directory", error.to_string(), 6)
        })?;
        pool.close().await;
        Ok::<(), CommandResult>(())
    });

    match result {
        Ok(()) => CommandResult::success(
            "profile add",
            format!(
                "{} on {} now resolves to profile {}",
                user_id.trim(),
                channel.trim(),
                profile_id.trim()
            ),
        ),
        Err(failure) => failure,
    }
}

pub fn list() -> CommandResult {
    let (config, runtime) = match prepare("profile list") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_database("profile list", &config).await?;
        let profiles = SqlProfileDirectory::new(pool.clone()).list().await.map_err(|error| {
            CommandResult::failure("profile list", "profile_directory", error.to_string(), 6)
        })?;
        pool.close().await;
        Ok::<_, CommandResult>(profiles)
    });

    match result {
        Ok(profiles) => {
            let rows = profiles
                .iter()
                .map(|profile| {
                    json!({
                        "profile_id": profile.profile_id,
                        "user_id": profile.user_id,
                        "channel": profile.channel,
                    })
                })
                .collect::<Vec<_>>();
            CommandResult::success_with_data(
                "profile list",
                format!("{} channel bindings", rows.len()),
                Some(json!(rows)),
            )
        }
        Err(failure) => failure,
    }
}
