//! The run loop: alternate agent and tools nodes over a persisted conversation.
//!
//! Every transition into a node first saves the state with an optimistic write, then runs the
//! node, appends what it produced and asks the router where to go next. A save therefore always
//! precedes the work it guards, and a cancelled or failed node leaves the previous checkpoint as
//! the resumable state.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use operator_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink,
};
use operator_core::config::AppConfig;
use operator_core::domain::conversation::{ConversationState, ThreadId};
use operator_core::domain::message::Message;
use operator_core::flows::{GraphNode, RouteContext};
use operator_db::{CheckpointError, CheckpointStore};

use crate::error::AgentError;
use crate::graph::CompiledGraph;
use crate::model::ModelNode;
use crate::retry::Backoff;
use crate::tools::{ToolDispatcher, ToolRegistry};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Maximum agent -> tools round trips in one run.
    pub max_iterations: u32,
    pub checkpoint_backoff: Backoff,
    pub model_backoff: Backoff,
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_iterations: config.agent.max_iterations,
            checkpoint_backoff: Backoff::new(
                config.checkpoint.save_retries,
                Duration::from_millis(config.checkpoint.retry_base_delay_ms),
            ),
            model_backoff: Backoff::new(
                config.llm.max_retries,
                Duration::from_millis(config.llm.retry_base_delay_ms),
            ),
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            checkpoint_backoff: Backoff::new(3, Duration::from_millis(200)),
            model_backoff: Backoff::new(2, Duration::from_millis(500)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunOutcome {
    /// Content of the final assistant message.
    pub final_content: String,
    pub state: ConversationState,
    pub model_calls: u32,
    pub tool_rounds: u32,
}

pub struct AgentRuntime {
    store: Arc<dyn CheckpointStore>,
    model: ModelNode,
    dispatcher: ToolDispatcher,
    graph: Arc<CompiledGraph>,
    audit: Arc<dyn AuditSink>,
    settings: RuntimeSettings,
    actor: String,
}

struct RunCounters {
    model_calls: u32,
    tool_rounds: u32,
}

impl AgentRuntime {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        model: ModelNode,
        dispatcher: ToolDispatcher,
        graph: Arc<CompiledGraph>,
        audit: Arc<dyn AuditSink>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            store,
            model,
            dispatcher,
            graph,
            audit,
            settings,
            actor: "agent-runtime".to_string(),
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    pub fn graph(&self) -> &Arc<CompiledGraph> {
        &self.graph
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    /// A runtime over the same store and model that offers a different tool set.
    pub fn with_toolset(&self, registry: Arc<ToolRegistry>, graph: Arc<CompiledGraph>) -> Self {
        Self {
            store: self.store.clone(),
            model: self.model.clone(),
            dispatcher: self.dispatcher.with_registry(registry),
            graph,
            audit: self.audit.clone(),
            settings: self.settings,
            actor: self.actor.clone(),
        }
    }

    /// Handles one user message on `thread_id` and returns the final assistant reply.
    pub async fn run(
        &self,
        thread_id: &ThreadId,
        user_message: &str,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, AgentError> {
        let correlation_id = Uuid::new_v4().to_string();
        let audit = AuditContext::new(
            Some(thread_id.to_string()),
            correlation_id.clone(),
            self.actor.clone(),
        );
        let mut counters = RunCounters { model_calls: 0, tool_rounds: 0 };

        let mut state = self.load_state(thread_id).await?;
        info!(
            event_name = "agent.run.started",
            correlation_id = %correlation_id,
            thread_id = %thread_id,
            step = state.step,
            messages = state.len(),
            graph = %self.graph.fingerprint(),
            "agent run started"
        );

        if !state.unresolved_tool_calls().is_empty() {
            self.resume_pending_tools(&mut state, &audit, cancel).await?;
        }
        state.append(Message::user(user_message));

        let router = self.graph.router();
        let sink: &dyn AuditSink = &*self.audit;
        let mut next = router
            .apply_with_audit(router.entry(), &RouteContext::from_state(&state), sink, &audit)?
            .to;

        while !next.is_terminal() {
            if cancel.is_cancelled() {
                return Err(self.cancelled(&state, &audit));
            }
            if next == GraphNode::Tools {
                if counters.tool_rounds >= self.settings.max_iterations {
                    warn!(
                        event_name = "agent.run.iteration_limit",
                        correlation_id = %audit.correlation_id,
                        thread_id = %thread_id,
                        limit = self.settings.max_iterations,
                        "iteration limit exceeded"
                    );
                    let limit = self.settings.max_iterations;
                    return Err(AgentError::IterationLimit { limit });
                }
                counters.tool_rounds += 1;
            }

            if next == GraphNode::Agent {
                self.model.prepare(&mut state)?;
            }
            self.persist(&mut state).await?;

            let produced = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(&state, &audit)),
                produced = self.run_node(next, &state, &audit, &mut counters) => produced?,
            };
            state.extend(produced);

            let context = RouteContext::from_state(&state);
            next = router.apply_with_audit(next, &context, sink, &audit)?.to;
        }

        self.persist(&mut state).await?;

        let final_content =
            state.latest().map(|message| message.content().to_string()).unwrap_or_default();
        info!(
            event_name = "agent.run.completed",
            correlation_id = %audit.correlation_id,
            thread_id = %thread_id,
            step = state.step,
            model_calls = counters.model_calls,
            tool_rounds = counters.tool_rounds,
            "agent run completed"
        );

        Ok(RunOutcome {
            final_content,
            state,
            model_calls: counters.model_calls,
            tool_rounds: counters.tool_rounds,
        })
    }

    /// Runs one node against the persisted `state` and returns the messages it produced.
    ///
    /// The agent node expects `state` to be prepared already, so the prompt is exactly the
    /// history that was just saved.
    async fn run_node(
        &self,
        node: GraphNode,
        state: &ConversationState,
        audit: &AuditContext,
        counters: &mut RunCounters,
    ) -> Result<Vec<Message>, AgentError> {
        match node {
            GraphNode::Agent => {
                let calls_before = counters.model_calls;
                let result = self
                    .settings
                    .model_backoff
                    .retry(
                        "model.invoke",
                        |error: &AgentError| {
                            matches!(error, AgentError::Llm(llm) if llm.is_transient())
                        },
                        || {
                            counters.model_calls += 1;
                            self.model.invoke(state, self.graph.tool_schemas())
                        },
                    )
                    .await;
                self.audit_model_call(audit, state, counters.model_calls - calls_before, &result);
                Ok(vec![result?])
            }
            GraphNode::Tools => {
                let pending: Vec<_> = state.unresolved_tool_calls().into_iter().cloned().collect();
                Ok(self.dispatcher.dispatch_all(&pending, audit).await)
            }
            GraphNode::Start | GraphNode::End => Ok(Vec::new()),
        }
    }

    fn audit_model_call(
        &self,
        audit: &AuditContext,
        state: &ConversationState,
        attempts: u32,
        result: &Result<Message, AgentError>,
    ) {
        let (outcome, detail) = match result {
            Ok(reply) => {
                (AuditOutcome::Success, format!("tool_calls={}", reply.tool_calls().len()))
            }
            Err(error) => (AuditOutcome::Failed, error.to_string()),
        };
        self.audit.emit(
            AuditEvent::new(
                audit.thread_id.clone(),
                audit.correlation_id.clone(),
                "model.invoked",
                AuditCategory::Model,
                audit.actor.clone(),
                outcome,
            )
            .with_metadata("model", self.model.model())
            .with_metadata("attempts", attempts.to_string())
            .with_metadata("prompt_messages", state.len().to_string())
            .with_metadata("detail", detail),
        );
    }

    async fn resume_pending_tools(
        &self,
        state: &mut ConversationState,
        audit: &AuditContext,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        let pending: Vec<_> = state.unresolved_tool_calls().into_iter().cloned().collect();
        info!(
            event_name = "agent.run.resuming_tools",
            correlation_id = %audit.correlation_id,
            thread_id = %state.thread_id,
            pending = pending.len(),
            "resuming tool calls left by an interrupted run"
        );

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(self.cancelled(state, audit)),
            results = self.dispatcher.dispatch_all(&pending, audit) => results,
        };
        state.extend(results);
        Ok(())
    }

    async fn load_state(&self, thread_id: &ThreadId) -> Result<ConversationState, AgentError> {
        let checkpoint = self
            .settings
            .checkpoint_backoff
            .retry("checkpoint.load", CheckpointError::is_capacity_exceeded, || {
                self.store.load(thread_id)
            })
            .await?;

        Ok(match checkpoint {
            Some(checkpoint) => checkpoint.state,
            None => ConversationState::new(thread_id.clone()),
        })
    }

    /// Saves `state` against its current step and advances the step on success.
    async fn persist(&self, state: &mut ConversationState) -> Result<(), AgentError> {
        let snapshot: &ConversationState = state;
        let step = self
            .settings
            .checkpoint_backoff
            .retry("checkpoint.save", CheckpointError::is_capacity_exceeded, || {
                self.store.save(&snapshot.thread_id, snapshot, snapshot.step)
            })
            .await?;
        state.step = step;
        Ok(())
    }

    fn cancelled(&self, state: &ConversationState, audit: &AuditContext) -> AgentError {
        warn!(
            event_name = "agent.run.cancelled",
            correlation_id = %audit.correlation_id,
            thread_id = %state.thread_id,
            step = state.step,
            "agent run cancelled; last saved checkpoint is the resumable state"
        );
        AgentError::Cancelled
    }
}
