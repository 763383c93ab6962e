use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use operator_core::domain::profile::InboundMessage;
use operator_core::{AgentTurnResult, FinalPayload, ThreadId};
use operator_db::ProfileDirectory;

use crate::error::AgentError;
use crate::graph::GraphCache;
use crate::runtime::AgentRuntime;
use crate::tools::RemoteToolSource;

/// Entry point for one inbound message: `(channel_type, from, text) -> AgentTurnResult`.
pub struct AgentTurnHandler {
    agent_name: String,
    profiles: Arc<dyn ProfileDirectory>,
    runtime: Arc<AgentRuntime>,
    conflict_retries: u32,
    remote_tools: Option<RemoteTools>,
}

struct RemoteTools {
    source: Arc<dyn RemoteToolSource>,
    graphs: Arc<GraphCache>,
}

impl AgentTurnHandler {
    pub fn new(
        agent_name: impl Into<String>,
        profiles: Arc<dyn ProfileDirectory>,
        runtime: Arc<AgentRuntime>,
        conflict_retries: u32,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            profiles,
            runtime,
            conflict_retries,
            remote_tools: None,
        }
    }

    /// Resolves the tool set from `source` at the start of every turn instead of using the
    /// runtime's built-in tools.
    pub fn with_remote_tools(
        mut self,
        source: Arc<dyn RemoteToolSource>,
        graphs: Arc<GraphCache>,
    ) -> Self {
        self.remote_tools = Some(RemoteTools { source, graphs });
        self
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn runtime(&self) -> &Arc<AgentRuntime> {
        &self.runtime
    }

    pub async fn handle(
        &self,
        inbound: &InboundMessage,
        cancel: &CancellationToken,
    ) -> Result<AgentTurnResult, AgentError> {
        let thread_id = self
            .profiles
            .resolve_thread_id(&inbound.from)
            .await?
            .ok_or_else(|| AgentError::ProfileNotFound { user_id: inbound.from.clone() })?;
        let bindings = self.profiles.list_channels_for_thread(&thread_id).await?;
        let prompt = inbound.render_prompt(&thread_id, &bindings);

        info!(
            event_name = "agent.turn.received",
            thread_id = %thread_id,
            channel_type = %inbound.channel_type,
            bindings = bindings.len(),
            "handling inbound message"
        );

        let runtime = self.runtime_for_turn(&thread_id).await?;
        let mut attempt = 0;
        let outcome = loop {
            match runtime.run(&thread_id, &prompt, cancel).await {
                Ok(outcome) => break outcome,
                Err(error) if error.is_conflict() && attempt < self.conflict_retries => {
                    attempt += 1;
                    warn!(
                        event_name = "agent.turn.conflict_retry",
                        thread_id = %thread_id,
                        attempt,
                        error = %error,
                        "checkpoint advanced concurrently; retrying turn from reloaded state"
                    );
                }
                Err(error) => return Err(error),
            }
        };

        let payload = FinalPayload::parse(&outcome.final_content)?;
        Ok(payload.into_turn_result(&self.agent_name, &thread_id, inbound))
    }

    async fn runtime_for_turn(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Arc<AgentRuntime>, AgentError> {
        let Some(remote) = &self.remote_tools else {
            return Ok(self.runtime.clone());
        };

        let toolset = remote
            .source
            .connect()
            .await
            .map_err(|error| AgentError::ToolSource(format!("{error:#}")))?;
        let registry = Arc::new(toolset.registry());
        let graph = remote.graphs.get_or_compile(&registry);
        info!(
            event_name = "agent.turn.remote_tools",
            thread_id = %thread_id,
            tools = registry.len(),
            graph = %graph.fingerprint(),
            "resolved remote tool set"
        );
        Ok(Arc::new(self.runtime.with_toolset(registry, graph)))
    }
}
