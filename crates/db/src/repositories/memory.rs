use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use operator_core::domain::conversation::{ConversationState, ThreadId};
use operator_core::domain::profile::ChannelBinding;

use super::checkpoint::ttl_duration;
use super::{
    Checkpoint, CheckpointError, CheckpointStore, ProfileDirectory, RepositoryError,
    SalesforceCredential, SalesforceCredentialStore, UserProfile,
};

pub struct InMemoryCheckpointStore {
    ttl_secs: u64,
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self { ttl_secs, checkpoints: RwLock::new(HashMap::new()) }
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new(86_400)
    }
}

#[async_trait::async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, CheckpointError> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints.get(thread_id.as_str()).cloned())
    }

    async fn save(
        &self,
        thread_id: &ThreadId,
        state: &ConversationState,
        expected_step: u64,
    ) -> Result<u64, CheckpointError> {
        let mut checkpoints = self.checkpoints.write().await;
        let actual_step = checkpoints.get(thread_id.as_str()).map(|checkpoint| checkpoint.step);
        if actual_step.unwrap_or(0) != expected_step {
            return Err(CheckpointError::Conflict {
                thread_id: thread_id.to_string(),
                expected_step,
                actual_step,
            });
        }

        let next_step = expected_step + 1;
        let now = Utc::now();
        checkpoints.insert(
            thread_id.as_str().to_owned(),
            Checkpoint {
                state: ConversationState::from_parts(
                    thread_id.clone(),
                    state.current_messages().to_vec(),
                    next_step,
                ),
                step: next_step,
                expires_at: now + ttl_duration(self.ttl_secs),
                updated_at: now,
            },
        );
        Ok(next_step)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, CheckpointError> {
        let mut checkpoints = self.checkpoints.write().await;
        let before = checkpoints.len();
        checkpoints.retain(|_, checkpoint| checkpoint.expires_at >= now);
        Ok((before - checkpoints.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryProfileDirectory {
    profiles: RwLock<Vec<UserProfile>>,
}

impl InMemoryProfileDirectory {
    pub fn with_profiles(profiles: impl IntoIterator<Item = UserProfile>) -> Self {
        Self { profiles: RwLock::new(profiles.into_iter().collect()) }
    }
}

#[async_trait::async_trait]
impl ProfileDirectory for InMemoryProfileDirectory {
    async fn resolve_thread_id(&self, user_id: &str) -> Result<Option<ThreadId>, RepositoryError> {
        let profiles = self.profiles.read().await;
        Ok(profiles
            .iter()
            .find(|profile| profile.user_id == user_id)
            .map(|profile| ThreadId(profile.profile_id.clone())))
    }

    async fn list_channels_for_thread(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Vec<ChannelBinding>, RepositoryError> {
        let profiles = self.profiles.read().await;
        let mut bindings: Vec<ChannelBinding> = profiles
            .iter()
            .filter(|profile| profile.profile_id == thread_id.as_str())
            .map(|profile| ChannelBinding::new(profile.user_id.clone(), profile.channel.clone()))
            .collect();
        bindings.sort_by(|left, right| {
            (&left.channel, &left.user_id).cmp(&(&right.channel, &right.user_id))
        });
        Ok(bindings)
    }

    async fn save(&self, profile: UserProfile) -> Result<(), RepositoryError> {
        let mut profiles = self.profiles.write().await;
        match profiles.iter_mut().find(|existing| {
            existing.user_id == profile.user_id && existing.channel == profile.channel
        }) {
            Some(existing) => existing.profile_id = profile.profile_id,
            None => profiles.push(profile),
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<UserProfile>, RepositoryError> {
        let mut profiles = self.profiles.read().await.clone();
        profiles.sort_by(|left, right| {
            (&left.profile_id, &left.channel, &left.user_id).cmp(&(
                &right.profile_id,
                &right.channel,
                &right.user_id,
            ))
        });
        Ok(profiles)
    }
}

#[derive(Default)]
pub struct InMemorySalesforceCredentialStore {
    credentials: RwLock<HashMap<String, SalesforceCredential>>,
}

#[async_trait::async_trait]
impl SalesforceCredentialStore for InMemorySalesforceCredentialStore {
    async fn find(
        &self,
        profile_id: &str,
    ) -> Result<Option<SalesforceCredential>, RepositoryError> {
        let credentials = self.credentials.read().await;
        Ok(credentials.get(profile_id).cloned())
    }

    async fn save(&self, credential: SalesforceCredential) -> Result<(), RepositoryError> {
        let mut credentials = self.credentials.write().await;
        credentials.insert(credential.profile_id.clone(), credential);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use operator_core::domain::conversation::{ConversationState, ThreadId};
    use operator_core::domain::message::Message;

    use crate::repositories::{
        CheckpointStore, InMemoryCheckpointStore, InMemoryProfileDirectory, ProfileDirectory,
        UserProfile,
    };

    #[tokio::test]
    async fn in_memory_checkpoint_round_trip_advances_step() {
        let store = InMemoryCheckpointStore::default();
        let thread_id = ThreadId::from("P1");
        let mut state = ConversationState::new(thread_id.clone());
        state.append(Message::user("hi"));

        let step = store.save(&thread_id, &state, 0).await.expect("create");
        state.append(Message::assistant("hello"));
        let step = store.save(&thread_id, &state, step).await.expect("advance");

        let checkpoint = store.load(&thread_id).await.expect("load").expect("exists");
        assert_eq!(step, 2);
        assert_eq!(checkpoint.state.current_messages().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_saves_at_same_step_yield_one_conflict() {
        let store = Arc::new(InMemoryCheckpointStore::default());
        let thread_id = ThreadId::from("P1");
        let state = ConversationState::new(thread_id.clone());
        store.save(&thread_id, &state, 0).await.expect("create");

        let first = {
            let (store, thread_id, state) = (store.clone(), thread_id.clone(), state.clone());
            tokio::spawn(async move { store.save(&thread_id, &state, 1).await })
        };
        let second = {
            let (store, thread_id, state) = (store.clone(), thread_id.clone(), state.clone());
            tokio::spawn(async move { store.save(&thread_id, &state, 1).await })
        };

        let outcomes = [first.await.expect("join"), second.await.expect("join")];
        let ok = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        let conflicts = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, Err(error) if error.is_conflict()))
            .count();

        assert_eq!((ok, conflicts), (1, 1));
    }

    #[tokio::test]
    async fn purge_expired_drops_elapsed_entries() {
        let store = InMemoryCheckpointStore::new(10);
        let thread_id = ThreadId::from("P1");
        store.save(&thread_id, &ConversationState::new(thread_id.clone()), 0).await.expect("save");

        assert_eq!(store.purge_expired(Utc::now()).await.expect("purge"), 0);
        assert_eq!(
            store.purge_expired(Utc::now() + Duration::seconds(11)).await.expect("purge"),
            1
        );
    }

    #[tokio::test]
    async fn in_memory_directory_orders_bindings_by_channel() {
        let directory = InMemoryProfileDirectory::with_profiles([
            UserProfile::new("P1", "+1555", "whatsapp"),
            UserProfile::new("P1", "ana@example.com", "email"),
        ]);

        let bindings =
            directory.list_channels_for_thread(&ThreadId::from("P1")).await.expect("bindings");

        assert_eq!(bindings[0].channel, "email");
        assert_eq!(bindings[1].channel, "whatsapp");
        assert_eq!(directory.resolve_thread_id("nobody").await.expect("resolve"), None);
    }
}
