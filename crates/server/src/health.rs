use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use operator_agent::AgentTurnHandler;
use operator_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    handler: Arc<AgentTurnHandler>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AgentSummary {
    pub name: String,
    pub graph: String,
    pub tools: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub checkpoints: HealthCheck,
    pub agent: AgentSummary,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, handler: Arc<AgentTurnHandler>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, handler })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let checkpoints = checkpoint_check(&state.db_pool).await;
    let ready = database.status == "ready" && checkpoints.status == "ready";

    let graph = state.handler.runtime().graph();
    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        checkpoints,
        agent: AgentSummary {
            name: state.handler.agent_name().to_string(),
            graph: graph.fingerprint().to_string(),
            tools: graph.tool_schemas().iter().map(|schema| schema.name.clone()).collect(),
        },
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

async fn checkpoint_check(pool: &DbPool) -> HealthCheck {
    let live = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM checkpoints WHERE expires_at > ?",
    )
    .bind(Utc::now().to_rfc3339())
    .fetch_one(pool)
    .await;

    match live {
        Ok(count) => HealthCheck { status: "ready", detail: format!("{count} live threads") },
        Err(error) => HealthCheck {
            status: "degraded",
            detail: format!("checkpoint table unavailable: {error}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};
    use operator_agent::{
        AgentRuntime, AgentTurnHandler, CompiledGraph, ModelNode, RuntimeSettings,
        ScriptedLlmClient, ToolDispatcher, ToolRegistry,
    };
    use operator_core::audit::InMemoryAuditSink;
    use operator_core::PruningPolicy;
    use operator_db::repositories::{InMemoryCheckpointStore, InMemoryProfileDirectory};
    use operator_db::{connect_with_settings, migrations, DbPool};

    use crate::health::{health, HealthState};

    fn handler() -> Arc<AgentTurnHandler> {
        let registry = Arc::new(ToolRegistry::new());
        let audit = Arc::new(InMemoryAuditSink::default());
        let runtime = AgentRuntime::new(
            Arc::new(InMemoryCheckpointStore::default()),
            ModelNode::new(
                Arc::new(ScriptedLlmClient::default()),
                "test-model",
                "prompt",
                PruningPolicy::default(),
            ),
            ToolDispatcher::new(registry.clone(), audit.clone()),
            Arc::new(CompiledGraph::compile(&registry)),
            audit,
            RuntimeSettings::default(),
        );
        Arc::new(AgentTurnHandler::new(
            "sf-agent",
            Arc::new(InMemoryProfileDirectory::default()),
            Arc::new(runtime),
            0,
        ))
    }

    async fn migrated_pool() -> DbPool {
        let pool =
            connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        migrations::run_pending(&pool).await.expect("migrations should apply");
        pool
    }

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let pool = migrated_pool().await;

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool.clone(), handler: handler() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.checkpoints.detail, "0 live threads");
        assert_eq!(payload.agent.name, "sf-agent");
        assert!(payload.agent.tools.is_empty());
        assert_eq!(payload.agent.graph.len(), 64);

        pool.close().await;
    }

    #[tokio::test]
    async fn health_is_degraded_before_migrations_run() {
        let pool =
            connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool.clone(), handler: handler() })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.checkpoints.status, "degraded");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let pool = migrated_pool().await;
        pool.close().await;

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool, handler: handler() })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
    }
}
