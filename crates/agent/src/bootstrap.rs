//! Wiring from configuration to a ready [`AgentTurnHandler`].

use std::sync::Arc;
use std::time::Duration;

use operator_core::audit::AuditSink;
use operator_core::config::{AppConfig, ToolsConfig};
use operator_db::repositories::{
    SqlCheckpointStore, SqlProfileDirectory, SqlSalesforceCredentialStore,
};
use operator_db::{
    CapacityBudget, CheckpointStore, DbPool, ProfileDirectory, SalesforceCredentialStore,
    ThrottledCheckpointStore,
};

use crate::audit::TracingAuditSink;
use crate::error::AgentError;
use crate::graph::GraphCache;
use crate::llm::LlmClient;
use crate::model::ModelNode;
use crate::openai::OpenAiCompatibleClient;
use crate::runtime::{AgentRuntime, RuntimeSettings};
use crate::tools::{
    ExecuteSoqlTool, McpToolSource, SalesforceOAuthUrlTool, SendEmailTool,
    SendWhatsAppMessageTool, SmtpMailer, ToolDispatcher, ToolRegistry,
};
use crate::turn::AgentTurnHandler;

pub struct AgentServices {
    pub store: Arc<dyn CheckpointStore>,
    pub profiles: Arc<dyn ProfileDirectory>,
    pub credentials: Arc<dyn SalesforceCredentialStore>,
    pub runtime: Arc<AgentRuntime>,
    pub handler: Arc<AgentTurnHandler>,
}

impl AgentServices {
    /// Builds the SQLite-backed services with the provider named in `config.llm`.
    pub fn from_config(
        config: &AppConfig,
        pool: DbPool,
        graphs: &Arc<GraphCache>,
    ) -> Result<Self, AgentError> {
        let llm: Arc<dyn LlmClient> = Arc::new(
            OpenAiCompatibleClient::from_config(&config.llm)
                .map_err(|error| AgentError::Configuration(error.to_string()))?,
        );
        let store = ThrottledCheckpointStore::new(
            SqlCheckpointStore::new(pool.clone(), config.checkpoint.ttl_secs),
            CapacityBudget::from_config(&config.checkpoint),
        );

        Self::assemble(
            config,
            Arc::new(store),
            Arc::new(SqlProfileDirectory::new(pool.clone())),
            Arc::new(SqlSalesforceCredentialStore::new(pool)),
            llm,
            graphs,
        )
    }

    pub fn assemble(
        config: &AppConfig,
        store: Arc<dyn CheckpointStore>,
        profiles: Arc<dyn ProfileDirectory>,
        credentials: Arc<dyn SalesforceCredentialStore>,
        llm: Arc<dyn LlmClient>,
        graphs: &Arc<GraphCache>,
    ) -> Result<Self, AgentError> {
        let system_prompt = config
            .agent
            .load_system_prompt()
            .map_err(|error| AgentError::Configuration(error.to_string()))?;
        let tool_timeout = Duration::from_secs(config.tools.timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(tool_timeout)
            .build()
            .map_err(|error| AgentError::Configuration(format!("http client: {error}")))?;

        let registry =
            Arc::new(builtin_registry(&config.tools, credentials.clone(), http, tool_timeout)?);
        let graph = graphs.get_or_compile(&registry);
        let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);

        let model =
            ModelNode::new(llm, config.llm.model.clone(), system_prompt, config.pruning.policy());
        let dispatcher = ToolDispatcher::new(registry, audit.clone())
            .with_parallel(config.agent.parallel_tools)
            .with_timeout(tool_timeout);
        let runtime = Arc::new(
            AgentRuntime::new(
                store.clone(),
                model,
                dispatcher,
                graph,
                audit,
                RuntimeSettings::from_config(config),
            )
            .with_actor(config.agent.name.clone()),
        );
        let mut handler = AgentTurnHandler::new(
            config.agent.name.clone(),
            profiles.clone(),
            runtime.clone(),
            config.agent.conflict_retries,
        );
        if let Some(url) = &config.tools.mcp_server_url {
            let source = McpToolSource::new(url.clone(), tool_timeout);
            handler = handler.with_remote_tools(Arc::new(source), graphs.clone());
        }
        let handler = Arc::new(handler);

        Ok(Self { store, profiles, credentials, runtime, handler })
    }
}

/// Registers each built-in tool whose settings are present.
pub fn builtin_registry(
    tools: &ToolsConfig,
    credentials: Arc<dyn SalesforceCredentialStore>,
    http: reqwest::Client,
    timeout: Duration,
) -> Result<ToolRegistry, AgentError> {
    let mut registry = ToolRegistry::new();

    if let (Some(domain), Some(client_id), Some(redirect_uri)) = (
        tools.salesforce_domain.as_ref(),
        tools.salesforce_client_id.as_ref(),
        tools.salesforce_redirect_uri.as_ref(),
    ) {
        registry.register(SalesforceOAuthUrlTool::new(domain, client_id, redirect_uri));
    }

    registry.register(ExecuteSoqlTool::new(
        http.clone(),
        credentials,
        tools.salesforce_api_version.clone(),
    ));

    if let (Some(token), Some(number_id)) =
        (tools.whatsapp_token.as_ref(), tools.whatsapp_number_id.as_ref())
    {
        registry.register(SendWhatsAppMessageTool::new(
            http,
            token.clone(),
            number_id,
            tools.whatsapp_api_base.clone(),
        ));
    }

    let mailer = SmtpMailer::from_config(&tools.email, timeout)
        .map_err(|error| AgentError::Configuration(format!("email: {error:#}")))?;
    if let Some(mailer) = mailer {
        registry.register(SendEmailTool::new(Arc::new(mailer)));
    }

    Ok(registry)
}
