use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use operator_core::domain::conversation::ThreadId;
use operator_core::domain::profile::ChannelBinding;

use super::{
    ProfileDirectory, RepositoryError, SalesforceCredential, SalesforceCredentialStore,
    UserProfile,
};
use crate::DbPool;

pub struct SqlProfileDirectory {
    pool: DbPool,
}

impl SqlProfileDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProfileDirectory for SqlProfileDirectory {
    async fn resolve_thread_id(&self, user_id: &str) -> Result<Option<ThreadId>, RepositoryError> {
        let profile_id: Option<String> = sqlx::query_scalar(
            "SELECT profile_id FROM user_profiles
             WHERE user_id = ?
             ORDER BY created_at ASC, channel ASC
             LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(profile_id.map(ThreadId))
    }

    async fn list_channels_for_thread(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Vec<ChannelBinding>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT user_id, channel FROM user_profiles
             WHERE profile_id = ?
             ORDER BY channel ASC, user_id ASC",
        )
        .bind(thread_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let user_id: String = row.try_get("user_id")?;
                let channel: String = row.try_get("channel")?;
                Ok(ChannelBinding::new(user_id, channel))
            })
            .collect()
    }

    async fn save(&self, profile: UserProfile) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO user_profiles (profile_id, user_id, channel, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id, channel) DO UPDATE SET profile_id = excluded.profile_id",
        )
        .bind(&profile.profile_id)
        .bind(&profile.user_id)
        .bind(&profile.channel)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<UserProfile>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT profile_id, user_id, channel FROM user_profiles
             ORDER BY profile_id ASC, channel ASC, user_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(profile_from_row).collect()
    }
}

fn profile_from_row(row: SqliteRow) -> Result<UserProfile, RepositoryError> {
    Ok(UserProfile {
        profile_id: row.try_get("profile_id")?,
        user_id: row.try_get("user_id")?,
        channel: row.try_get("channel")?,
    })
}

pub struct SqlSalesforceCredentialStore {
    pool: DbPool,
}

impl SqlSalesforceCredentialStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SalesforceCredentialStore for SqlSalesforceCredentialStore {
    async fn find(
        &self,
        profile_id: &str,
    ) -> Result<Option<SalesforceCredential>, RepositoryError> {
        let row = sqlx::query(
            "SELECT profile_id, access_token, instance_url, refresh_token, issued_at
             FROM salesforce_credentials
             WHERE profile_id = ?",
        )
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(SalesforceCredential {
                profile_id: row.try_get("profile_id")?,
                access_token: row.try_get("access_token")?,
                instance_url: row.try_get("instance_url")?,
                refresh_token: row.try_get("refresh_token")?,
                issued_at: row.try_get("issued_at")?,
            })
        })
        .transpose()
    }

    async fn save(&self, credential: SalesforceCredential) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO salesforce_credentials (
                profile_id,
                access_token,
                instance_url,
                refresh_token,
                issued_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(profile_id) DO UPDATE SET
                access_token = excluded.access_token,
                instance_url = excluded.instance_url,
                refresh_token = excluded.refresh_token,
                issued_at = excluded.issued_at,
                updated_at = excluded.updated_at",
        )
        .bind(&credential.profile_id)
        .bind(&credential.access_token)
        .bind(&credential.instance_url)
        .bind(&credential.refresh_token)
        .bind(credential.issued_at)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use operator_core::domain::conversation::ThreadId;
    use operator_core::domain::profile::ChannelBinding;

    use super::{SqlProfileDirectory, SqlSalesforceCredentialStore};
    use crate::migrations;
    use crate::repositories::{
        ProfileDirectory, SalesforceCredential, SalesforceCredentialStore, UserProfile,
    };
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn resolves_sender_to_profile_and_lists_bindings() {
        let pool = setup_pool().await;
        let directory = SqlProfileDirectory::new(pool.clone());

        directory.save(UserProfile::new("P1", "+15550001111", "whatsapp")).await.expect("save");
        directory.save(UserProfile::new("P1", "ana@example.com", "email")).await.expect("save");
        directory.save(UserProfile::new("P2", "+15550002222", "whatsapp")).await.expect("save");

        let thread_id = directory.resolve_thread_id("+15550001111").await.expect("resolve");
        assert_eq!(thread_id, Some(ThreadId::from("P1")));

        let bindings =
            directory.list_channels_for_thread(&ThreadId::from("P1")).await.expect("bindings");
        assert_eq!(
            bindings,
            vec![
                ChannelBinding::new("ana@example.com", "email"),
                ChannelBinding::new("+15550001111", "whatsapp"),
            ]
        );

        assert_eq!(directory.list().await.expect("list").len(), 3);
        pool.close().await;
    }

    #[tokio::test]
    async fn unknown_sender_resolves_to_none() {
        let pool = setup_pool().await;
        let directory = SqlProfileDirectory::new(pool.clone());

        assert_eq!(directory.resolve_thread_id("+19999999999").await.expect("resolve"), None);
        pool.close().await;
    }

    #[tokio::test]
    async fn credential_upsert_replaces_tokens() {
        let pool = setup_pool().await;
        let store = SqlSalesforceCredentialStore::new(pool.clone());
        let mut credential = SalesforceCredential {
            profile_id: "P1".to_string(),
            access_token: "token-1".to_string(),
            instance_url: "https://example.my.salesforce.com".to_string(),
            refresh_token: None,
            issued_at: Some(1_700_000_000),
        };

        store.save(credential.clone()).await.expect("save");
        credential.access_token = "token-2".to_string();
        store.save(credential.clone()).await.expect("update");

        assert_eq!(store.find("P1").await.expect("find"), Some(credential));
        assert_eq!(store.find("P9").await.expect("find"), None);
        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }
}
