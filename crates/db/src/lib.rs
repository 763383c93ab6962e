pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod throttle;

pub use connection::{connect, connect_from_config, connect_with_settings, DbPool};
pub use repositories::{
    CapacityKind, Checkpoint, CheckpointError, CheckpointStore, ProfileDirectory, RepositoryError,
    SalesforceCredential, SalesforceCredentialStore, UserProfile,
};
pub use throttle::{CapacityBudget, ThrottledCheckpointStore};
