use std::sync::Arc;

use axum::Router;
use operator_agent::{AgentError, AgentServices, GraphCache};
use operator_core::config::{AppConfig, ConfigError, LoadOptions};
use operator_db::{connect_from_config, migrations, DbPool};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{health, invoke};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub services: AgentServices,
}

impl Application {
    /// Health and inbound-event routes. `turns` cancels in-flight turns when fired.
    pub fn router(&self, turns: CancellationToken) -> Router {
        health::router(self.db_pool.clone(), self.services.handler.clone())
            .merge(invoke::router(self.services.handler.clone(), turns))
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("agent wiring failed: {0}")]
    Agent(#[source] AgentError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        provider = %config.llm.provider,
        model = %config.llm.model,
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        "database migrations applied"
    );

    let graphs = Arc::new(GraphCache::new());
    let services = AgentServices::from_config(&config, db_pool.clone(), &graphs)
        .map_err(BootstrapError::Agent)?;
    info!(
        event_name = "system.bootstrap.agent_ready",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        agent = %config.agent.name,
        "agent runtime assembled"
    );

    Ok(Application { config, db_pool, services })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use operator_core::config::{ConfigOverrides, LoadOptions};

    use tempfile::TempDir;

    use crate::bootstrap::{bootstrap, BootstrapError};

    fn overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_the_agent() {
        let app = bootstrap(overrides("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed with defaults");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' \
             AND name IN ('checkpoints', 'user_profiles', 'salesforce_credentials')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("baseline tables should exist after bootstrap");
        assert_eq!(table_count, 3);
        assert_eq!(app.services.handler.agent_name(), "sf-agent");

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_rejects_a_non_sqlite_database_url() {
        let result = bootstrap(overrides("postgres://localhost/operator")).await;

        assert!(matches!(result, Err(BootstrapError::Config(_))));
    }

    #[tokio::test]
    async fn bootstrap_fails_when_the_system_prompt_file_is_missing() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("operator.toml");
        fs::write(
            &path,
            r#"
[database]
url = "sqlite::memory:"

[agent]
system_prompt_path = "/nonexistent/operator/prompt.txt"
"#,
        )
        .expect("write config");

        let result = bootstrap(LoadOptions {
            config_path: Some(path),
            require_file: true,
            ..LoadOptions::default()
        })
        .await;

        assert!(matches!(result, Err(BootstrapError::Agent(_))));
    }
}
