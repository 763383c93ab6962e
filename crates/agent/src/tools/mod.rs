//! Tool registry and dispatcher.
//!
//! Every dispatched call yields exactly one tool message answering its call id. Unknown tools,
//! tool failures and timeouts are reported to the model as error content rather than aborting
//! the turn.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tracing::{info, warn};

use operator_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use operator_core::domain::message::{Message, ToolCallRequest};

use crate::llm::ToolSchema;

pub mod email;
pub mod mcp;
pub mod salesforce;
pub mod whatsapp;

pub use email::{Mailer, SendEmailTool, SmtpMailer};
pub use mcp::{McpToolSource, RemoteToolSource, RemoteToolset};
pub use salesforce::{ExecuteSoqlTool, SalesforceOAuthUrlTool};
pub use whatsapp::SendWhatsAppMessageTool;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema of the argument object.
    fn parameters(&self) -> Value;

    /// Whether concurrent execution alongside other calls is safe.
    fn side_effect_free(&self) -> bool {
        false
    }

    async fn execute(&self, arguments: Value) -> Result<Value>;
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Schemas in name order, which keeps the advertised tool list stable across calls.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .values()
            .map(|tool| ToolSchema {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    parallel: bool,
    timeout: Duration,
    audit: Arc<dyn AuditSink>,
}

impl ToolDispatcher {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(registry: Arc<ToolRegistry>, audit: Arc<dyn AuditSink>) -> Self {
        Self { registry, parallel: true, timeout: Self::DEFAULT_TIMEOUT, audit }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Same audit sink and execution settings over a different tool set.
    pub fn with_registry(&self, registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            parallel: self.parallel,
            timeout: self.timeout,
            audit: self.audit.clone(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs one call. Never fails: every outcome becomes a tool message for `request.id`.
    pub async fn dispatch(&self, request: &ToolCallRequest, audit: &AuditContext) -> Message {
        let outcome = match self.registry.get(&request.name) {
            None => Err(format!("unknown tool `{}`", request.name)),
            Some(tool) => {
                match tokio::time::timeout(self.timeout, tool.execute(request.arguments.clone()))
                    .await
                {
                    Ok(Ok(value)) => Ok(render_value(value)),
                    Ok(Err(error)) => Err(format!("{error:#}")),
                    Err(_) => Err(format!(
                        "tool `{}` timed out after {}s",
                        request.name,
                        self.timeout.as_secs()
                    )),
                }
            }
        };

        let (content, audit_outcome) = match outcome {
            Ok(content) => {
                info!(
                    event_name = "agent.tool.completed",
                    correlation_id = %audit.correlation_id,
                    tool = %request.name,
                    call_id = %request.id,
                    "tool call completed"
                );
                (content, AuditOutcome::Success)
            }
            Err(message) => {
                warn!(
                    event_name = "agent.tool.failed",
                    correlation_id = %audit.correlation_id,
                    tool = %request.name,
                    call_id = %request.id,
                    error = %message,
                    "tool call failed"
                );
                (format!("Error: {message}"), AuditOutcome::Failed)
            }
        };

        self.audit.emit(
            AuditEvent::new(
                audit.thread_id.clone(),
                audit.correlation_id.clone(),
                "tool.dispatched",
                AuditCategory::Tool,
                audit.actor.clone(),
                audit_outcome,
            )
            .with_metadata("tool", request.name.clone())
            .with_metadata("call_id", request.id.0.clone()),
        );

        Message::tool_result(request.id.clone(), content)
    }

    /// Runs every call and returns results in request order.
    pub async fn dispatch_all(
        &self,
        requests: &[ToolCallRequest],
        audit: &AuditContext,
    ) -> Vec<Message> {
        if self.can_run_concurrently(requests) {
            join_all(requests.iter().map(|request| self.dispatch(request, audit))).await
        } else {
            let mut results = Vec::with_capacity(requests.len());
            for request in requests {
                results.push(self.dispatch(request, audit).await);
            }
            results
        }
    }

    fn can_run_concurrently(&self, requests: &[ToolCallRequest]) -> bool {
        self.parallel
            && requests.len() > 1
            && requests.iter().all(|request| {
                self.registry.get(&request.name).map(|tool| tool.side_effect_free()).unwrap_or(true)
            })
    }
}

fn render_value(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

pub(crate) fn required_str<'a>(arguments: &'a Value, key: &str) -> Result<&'a str> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("missing required string argument `{key}`"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use operator_core::audit::{AuditContext, AuditOutcome, InMemoryAuditSink};
    use operator_core::domain::message::{Role, ToolCallRequest};

    use super::{Tool, ToolDispatcher, ToolRegistry};

    struct Echo {
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes its input"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        fn side_effect_free(&self) -> bool {
            true
        }
        async fn execute(&self, arguments: Value) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(arguments["text"].clone())
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _arguments: Value) -> Result<Value> {
            bail!("upstream returned 500")
        }
    }

    fn dispatcher(calls: Arc<AtomicUsize>, sink: InMemoryAuditSink) -> ToolDispatcher {
        let mut registry = ToolRegistry::new();
        registry.register(Echo { calls, delay: Duration::from_millis(5) });
        registry.register(Broken);
        ToolDispatcher::new(Arc::new(registry), Arc::new(sink))
    }

    fn audit() -> AuditContext {
        AuditContext::new(Some("P1".to_string()), "turn-1", "test")
    }

    #[test]
    fn schemas_are_listed_in_name_order() {
        let dispatcher = dispatcher(Arc::default(), InMemoryAuditSink::default());
        let names: Vec<String> =
            dispatcher.registry().schemas().into_iter().map(|schema| schema.name).collect();
        assert_eq!(names, vec!["broken".to_string(), "echo".to_string()]);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_content() {
        let sink = InMemoryAuditSink::default();
        let dispatcher = dispatcher(Arc::default(), sink.clone());
        let request = ToolCallRequest::new("call-1", "does_not_exist", json!({}));

        let message = dispatcher.dispatch(&request, &audit()).await;

        assert_eq!(message.role(), Role::Tool);
        assert_eq!(message.tool_call_id().map(|id| id.as_str()), Some("call-1"));
        assert!(message.content().starts_with("Error: unknown tool"));
        assert_eq!(sink.events()[0].outcome, AuditOutcome::Failed);
    }

    #[tokio::test]
    async fn tool_failure_becomes_error_content() {
        let dispatcher = dispatcher(Arc::default(), InMemoryAuditSink::default());
        let request = ToolCallRequest::new("call-2", "broken", json!({}));

        let message = dispatcher.dispatch(&request, &audit()).await;

        assert_eq!(message.content(), "Error: upstream returned 500");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_results_keep_request_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(calls.clone(), InMemoryAuditSink::default());
        let requests = vec![
            ToolCallRequest::new("a", "echo", json!({"text": "first"})),
            ToolCallRequest::new("b", "echo", json!({"text": "second"})),
            ToolCallRequest::new("c", "echo", json!({"text": "third"})),
        ];

        let results = dispatcher.dispatch_all(&requests, &audit()).await;

        let answered: Vec<(&str, &str)> = results
            .iter()
            .map(|message| {
                (message.tool_call_id().map(|id| id.as_str()).unwrap_or(""), message.content())
            })
            .collect();
        assert_eq!(answered, vec![("a", "first"), ("b", "second"), ("c", "third")]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn mixed_side_effects_dispatch_sequentially() {
        let dispatcher = dispatcher(Arc::default(), InMemoryAuditSink::default());
        let requests = vec![
            ToolCallRequest::new("a", "echo", json!({"text": "ok"})),
            ToolCallRequest::new("b", "broken", json!({})),
        ];

        assert!(!dispatcher.can_run_concurrently(&requests));
        let results = dispatcher.dispatch_all(&requests, &audit()).await;
        assert_eq!(results.len(), 2);
        assert!(results[1].content().starts_with("Error:"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tools_time_out_into_error_content() {
        let mut registry = ToolRegistry::new();
        registry.register(Echo { calls: Arc::default(), delay: Duration::from_secs(60) });
        let dispatcher =
            ToolDispatcher::new(Arc::new(registry), Arc::new(InMemoryAuditSink::default()))
                .with_timeout(Duration::from_secs(1));

        let message = dispatcher
            .dispatch(&ToolCallRequest::new("slow", "echo", json!({"text": "x"})), &audit())
            .await;

        assert!(message.content().contains("timed out"));
    }
}
