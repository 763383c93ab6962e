use chrono::{DateTime, Duration, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use tracing::debug;

use operator_core::domain::conversation::{ConversationState, ThreadId};

use super::{Checkpoint, CheckpointError, CheckpointStore};
use crate::DbPool;

const MAX_TTL_SECS: u64 = 10 * 365 * 86_400;

pub struct SqlCheckpointStore {
    pool: DbPool,
    ttl: Duration,
}

impl SqlCheckpointStore {
    pub fn new(pool: DbPool, ttl_secs: u64) -> Self {
        Self { pool, ttl: ttl_duration(ttl_secs) }
    }

    async fn current_step(&self, thread_id: &ThreadId) -> Result<Option<u64>, CheckpointError> {
        let step: Option<i64> =
            sqlx::query_scalar("SELECT step FROM checkpoints WHERE thread_id = ?")
                .bind(thread_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        step.map(parse_step).transpose()
    }
}

#[async_trait::async_trait]
impl CheckpointStore for SqlCheckpointStore {
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, CheckpointError> {
        let row = sqlx::query(
            "SELECT thread_id, step, state_json, expires_at, updated_at
             FROM checkpoints
             WHERE thread_id = ?",
        )
        .bind(thread_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(checkpoint_from_row).transpose()
    }

    async fn save(
        &self,
        thread_id: &ThreadId,
        state: &ConversationState,
        expected_step: u64,
    ) -> Result<u64, CheckpointError> {
        let next_step = expected_step + 1;
        let stored = ConversationState::from_parts(
            thread_id.clone(),
            state.current_messages().to_vec(),
            next_step,
        );
        let state_json = serde_json::to_string(&stored)
            .map_err(|error| CheckpointError::Decode(error.to_string()))?;
        let now = Utc::now();
        let expires_at = now + self.ttl;
        let next_step_db = to_db_step(next_step)?;

        let affected = if expected_step == 0 {
            sqlx::query(
                "INSERT INTO checkpoints (thread_id, step, state_json, expires_at, updated_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(thread_id) DO NOTHING",
            )
            .bind(thread_id.as_str())
            .bind(next_step_db)
            .bind(&state_json)
            .bind(expires_at.to_rfc3339())
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?
            .rows_affected()
        } else {
            sqlx::query(
                "UPDATE checkpoints
                 SET step = ?, state_json = ?, expires_at = ?, updated_at = ?
                 WHERE thread_id = ? AND step = ?",
            )
            .bind(next_step_db)
            .bind(&state_json)
            .bind(expires_at.to_rfc3339())
            .bind(now.to_rfc3339())
            .bind(thread_id.as_str())
            .bind(to_db_step(expected_step)?)
            .execute(&self.pool)
            .await?
            .rows_affected()
        };

        if affected == 0 {
            let actual_step = self.current_step(thread_id).await?;
            return Err(CheckpointError::Conflict {
                thread_id: thread_id.to_string(),
                expected_step,
                actual_step,
            });
        }

        debug!(
            event_name = "checkpoint.saved",
            thread_id = %thread_id,
            step = next_step,
            bytes = state_json.len(),
            "checkpoint saved"
        );
        Ok(next_step)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, CheckpointError> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE expires_at < ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

pub(crate) fn ttl_duration(ttl_secs: u64) -> Duration {
    Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64)
}

fn checkpoint_from_row(row: SqliteRow) -> Result<Checkpoint, CheckpointError> {
    let thread_id = ThreadId(row.try_get("thread_id")?);
    let step = parse_step(row.try_get("step")?)?;
    let state_json: String = row.try_get("state_json")?;
    let decoded: ConversationState = serde_json::from_str(&state_json).map_err(|error| {
        CheckpointError::Decode(format!("invalid state_json for thread `{thread_id}`: {error}"))
    })?;
    let state =
        ConversationState::from_parts(thread_id, decoded.current_messages().to_vec(), step);

    Ok(Checkpoint {
        state,
        step,
        expires_at: parse_timestamp("expires_at", row.try_get("expires_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn parse_step(value: i64) -> Result<u64, CheckpointError> {
    u64::try_from(value)
        .map_err(|_| CheckpointError::Decode(format!("invalid value for `step`: {value}")))
}

fn to_db_step(step: u64) -> Result<i64, CheckpointError> {
    i64::try_from(step).map_err(|_| CheckpointError::Decode(format!("step {step} out of range")))
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, CheckpointError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            CheckpointError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
