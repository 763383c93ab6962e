use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use operator_core::domain::conversation::{ConversationState, ThreadId};
use operator_core::domain::profile::ChannelBinding;

pub mod checkpoint;
pub mod memory;
pub mod profile;

pub use checkpoint::SqlCheckpointStore;
pub use memory::{
    InMemoryCheckpointStore, InMemoryProfileDirectory, InMemorySalesforceCredentialStore,
};
pub use profile::{SqlProfileDirectory, SqlSalesforceCredentialStore};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Failure modes of the checkpoint store.
///
/// `Conflict` and `CapacityExceeded` are expected under load and carry enough context for the
/// caller to pick a retry policy. `Unavailable` means the backend itself is unreachable.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint conflict for thread `{thread_id}`: expected step {expected_step}, found {actual_step:?}")]
    Conflict { thread_id: String, expected_step: u64, actual_step: Option<u64> },
    #[error("checkpoint capacity exceeded ({kind} units: requested {requested}, remaining {remaining})")]
    CapacityExceeded { kind: CapacityKind, requested: u32, remaining: u32 },
    #[error("checkpoint store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
    #[error("checkpoint decode error: {0}")]
    Decode(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapacityKind {
    Read,
    Write,
}

impl std::fmt::Display for CapacityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
        })
    }
}

impl CheckpointError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}

/// Durable projection of a conversation, tagged with its logical step and expiry.
#[derive(Clone, Debug, PartialEq)]
pub struct Checkpoint {
    pub state: ConversationState,
    pub step: u64,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Persists `state` only when the stored step still equals `expected_step`.
    ///
    /// `expected_step == 0` means the thread must not have a checkpoint yet. Returns the new step.
    async fn save(
        &self,
        thread_id: &ThreadId,
        state: &ConversationState,
        expected_step: u64,
    ) -> Result<u64, CheckpointError>;

    /// Removes checkpoints whose TTL elapsed before `now`. Returns the number removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, CheckpointError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub profile_id: String,
    pub user_id: String,
    pub channel: String,
}

impl UserProfile {
    pub fn new(
        profile_id: impl Into<String>,
        user_id: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self { profile_id: profile_id.into(), user_id: user_id.into(), channel: channel.into() }
    }
}

#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// Maps an inbound sender to the profile whose id doubles as the thread id.
    async fn resolve_thread_id(&self, user_id: &str) -> Result<Option<ThreadId>, RepositoryError>;

    /// Every channel binding of the profile, ordered by channel then user id.
    async fn list_channels_for_thread(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Vec<ChannelBinding>, RepositoryError>;

    async fn save(&self, profile: UserProfile) -> Result<(), RepositoryError>;

    async fn list(&self) -> Result<Vec<UserProfile>, RepositoryError>;
}

#[derive(Clone, PartialEq, Eq)]
pub struct SalesforceCredential {
    pub profile_id: String,
    pub access_token: String,
    pub instance_url: String,
    pub refresh_token: Option<String>,
    pub issued_at: Option<i64>,
}

impl std::fmt::Debug for SalesforceCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesforceCredential")
            .field("profile_id", &self.profile_id)
            .field("access_token", &"[REDACTED]")
            .field("instance_url", &self.instance_url)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

#[async_trait]
pub trait SalesforceCredentialStore: Send + Sync {
    async fn find(&self, profile_id: &str)
        -> Result<Option<SalesforceCredential>, RepositoryError>;
    async fn save(&self, credential: SalesforceCredential) -> Result<(), RepositoryError>;
}
