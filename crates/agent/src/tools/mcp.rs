//! Tools served by a remote MCP server over streamable HTTP.
//!
//! A session is opened per turn and its tool list becomes that turn's capability set. Every
//! remote tool holds the session, so it closes when the last tool of the turn is dropped.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use rmcp::model::{CallToolRequestParam, CallToolResult, JsonObject, RawContent};
use rmcp::service::RunningService;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::{RoleClient, ServiceExt};
use serde_json::Value;
use tracing::debug;

use super::{Tool, ToolRegistry};

#[derive(Clone, Debug, PartialEq)]
pub struct RemoteToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[async_trait]
pub trait RemoteToolSession: Send + Sync {
    async fn call_tool(&self, name: &str, arguments: Option<JsonObject>) -> Result<Value>;
}

/// One open session plus the tools it advertised.
pub struct RemoteToolset {
    pub session: Arc<dyn RemoteToolSession>,
    pub tools: Vec<RemoteToolSpec>,
}

impl RemoteToolset {
    pub fn registry(&self) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for spec in &self.tools {
            registry.register(RemoteTool { spec: spec.clone(), session: self.session.clone() });
        }
        registry
    }
}

#[async_trait]
pub trait RemoteToolSource: Send + Sync {
    async fn connect(&self) -> Result<RemoteToolset>;
}

pub struct McpToolSource {
    url: String,
    timeout: Duration,
}

impl McpToolSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self { url: url.into(), timeout }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RemoteToolSource for McpToolSource {
    async fn connect(&self) -> Result<RemoteToolset> {
        let transport = StreamableHttpClientTransport::from_uri(self.url.clone());
        let service = tokio::time::timeout(self.timeout, ().serve(transport))
            .await
            .map_err(|_| anyhow!("timed out connecting to MCP server {}", self.url))?
            .with_context(|| format!("MCP handshake with {} failed", self.url))?;

        let listed = tokio::time::timeout(self.timeout, service.list_all_tools())
            .await
            .map_err(|_| anyhow!("timed out listing tools from {}", self.url))?
            .with_context(|| format!("tools/list on {} failed", self.url))?;

        let tools: Vec<RemoteToolSpec> = listed
            .into_iter()
            .map(|tool| RemoteToolSpec {
                name: tool.name.to_string(),
                description: tool.description.map(|text| text.to_string()).unwrap_or_default(),
                parameters: Value::Object((*tool.input_schema).clone()),
            })
            .collect();
        debug!(
            event_name = "agent.tools.remote_listed",
            url = %self.url,
            tools = tools.len(),
            "listed remote tools"
        );

        Ok(RemoteToolset { session: Arc::new(McpSession { service }), tools })
    }
}

struct McpSession {
    service: RunningService<RoleClient, ()>,
}

#[async_trait]
impl RemoteToolSession for McpSession {
    async fn call_tool(&self, name: &str, arguments: Option<JsonObject>) -> Result<Value> {
        let result = self
            .service
            .call_tool(CallToolRequestParam { name: name.to_string().into(), arguments })
            .await
            .with_context(|| format!("tools/call `{name}` failed"))?;
        call_result_value(result)
    }
}

/// Text blocks joined by newlines, else the structured content. Remote errors become failures.
pub(crate) fn call_result_value(result: CallToolResult) -> Result<Value> {
    let text: Vec<String> = result
        .content
        .into_iter()
        .filter_map(|content| match content.raw {
            RawContent::Text(text) => Some(text.text),
            _ => None,
        })
        .collect();

    if result.is_error.unwrap_or(false) {
        bail!("{}", text.join("\n"));
    }
    if !text.is_empty() {
        return Ok(Value::String(text.join("\n")));
    }
    Ok(result.structured_content.unwrap_or(Value::Null))
}

struct RemoteTool {
    spec: RemoteToolSpec,
    session: Arc<dyn RemoteToolSession>,
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters(&self) -> Value {
        self.spec.parameters.clone()
    }

    async fn execute(&self, arguments: Value) -> Result<Value> {
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => bail!("arguments for `{}` must be an object, got {other}", self.spec.name),
        };
        self.session.call_tool(&self.spec.name, arguments).await
    }
}
