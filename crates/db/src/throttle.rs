//! Fixed-window read/write capacity accounting in front of any [`CheckpointStore`].

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::warn;

use operator_core::config::CheckpointConfig;
use operator_core::domain::conversation::{ConversationState, ThreadId};

use crate::repositories::{CapacityKind, Checkpoint, CheckpointError, CheckpointStore};

/// Size of one write unit in bytes of serialized state.
pub const WRITE_UNIT_BYTES: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapacityBudget {
    pub read_units: u32,
    pub write_units: u32,
    pub window: Duration,
}

impl CapacityBudget {
    pub fn from_config(config: &CheckpointConfig) -> Self {
        Self {
            read_units: config.max_read_units,
            write_units: config.max_write_units,
            window: Duration::from_secs(config.capacity_window_secs),
        }
    }
}

#[derive(Debug)]
struct Window {
    started_at: Instant,
    reads: u32,
    writes: u32,
}

pub struct ThrottledCheckpointStore<S> {
    inner: S,
    budget: CapacityBudget,
    window: Mutex<Window>,
}

impl<S> ThrottledCheckpointStore<S> {
    pub fn new(inner: S, budget: CapacityBudget) -> Self {
        Self {
            inner,
            budget,
            window: Mutex::new(Window { started_at: Instant::now(), reads: 0, writes: 0 }),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn consume(&self, kind: CapacityKind, units: u32) -> Result<(), CheckpointError> {
        let mut window = match self.window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if window.started_at.elapsed() >= self.budget.window {
            window.started_at = Instant::now();
            window.reads = 0;
            window.writes = 0;
        }

        let (used, limit) = match kind {
            CapacityKind::Read => (&mut window.reads, self.budget.read_units),
            CapacityKind::Write => (&mut window.writes, self.budget.write_units),
        };
        let remaining = limit.saturating_sub(*used);
        if units > remaining {
            warn!(
                event_name = "checkpoint.capacity_exceeded",
                kind = %kind,
                requested = units,
                remaining,
                "checkpoint capacity exceeded for current window"
            );
            return Err(CheckpointError::CapacityExceeded { kind, requested: units, remaining });
        }

        *used += units;
        Ok(())
    }
}

/// Write units a save of `state` consumes: one per started kilobyte, at least one.
pub fn write_units_for(state: &ConversationState) -> Result<u32, CheckpointError> {
    let bytes = serde_json::to_vec(state)
        .map_err(|error| CheckpointError::Decode(error.to_string()))?
        .len();
    let units = bytes.div_ceil(WRITE_UNIT_BYTES).max(1);
    Ok(u32::try_from(units).unwrap_or(u32::MAX))
}

#[async_trait::async_trait]
impl<S: CheckpointStore> CheckpointStore for ThrottledCheckpointStore<S> {
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, CheckpointError> {
        self.consume(CapacityKind::Read, 1)?;
        self.inner.load(thread_id).await
    }

    async fn save(
        &self,
        thread_id: &ThreadId,
        state: &ConversationState,
        expected_step: u64,
    ) -> Result<u64, CheckpointError> {
        self.consume(CapacityKind::Write, write_units_for(state)?)?;
        self.inner.save(thread_id, state, expected_step).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, CheckpointError> {
        self.inner.purge_expired(now).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use operator_core::domain::conversation::{ConversationState, ThreadId};
    use operator_core::domain::message::Message;

    use super::{write_units_for, CapacityBudget, ThrottledCheckpointStore};
    use crate::repositories::{
        CapacityKind, CheckpointError, CheckpointStore, InMemoryCheckpointStore,
    };

    fn budget(read_units: u32, write_units: u32) -> CapacityBudget {
        CapacityBudget { read_units, write_units, window: Duration::from_secs(1) }
    }

    #[tokio::test(start_paused = true)]
    async fn reads_beyond_budget_are_rejected_until_window_resets() {
        let store =
            ThrottledCheckpointStore::new(InMemoryCheckpointStore::default(), budget(2, 10));
        let thread_id = ThreadId::from("P1");

        store.load(&thread_id).await.expect("first read");
        store.load(&thread_id).await.expect("second read");
        let error = store.load(&thread_id).await.expect_err("third read throttled");
        assert!(matches!(
            error,
            CheckpointError::CapacityExceeded { kind: CapacityKind::Read, remaining: 0, .. }
        ));

        tokio::time::advance(Duration::from_secs(1)).await;
        store.load(&thread_id).await.expect("read after window reset");
    }

    #[tokio::test(start_paused = true)]
    async fn large_states_consume_proportional_write_units() {
        let thread_id = ThreadId::from("P1");
        let mut state = ConversationState::new(thread_id.clone());
        state.append(Message::user("x".repeat(3 * 1024)));
        let units = write_units_for(&state).expect("units");
        assert_eq!(units, 4);

        let store =
            ThrottledCheckpointStore::new(InMemoryCheckpointStore::default(), budget(10, units - 1));
        let error = store.save(&thread_id, &state, 0).await.expect_err("throttled");
        assert!(error.is_capacity_exceeded());
        assert!(store.inner().load(&thread_id).await.expect("load").is_none());
    }

    #[test]
    fn empty_state_costs_one_write_unit() {
        let state = ConversationState::new(ThreadId::from("P1"));
        assert_eq!(write_units_for(&state).expect("units"), 1);
    }
}
