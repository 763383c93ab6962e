use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use operator_core::domain::message::{Message, ToolCallRequest};

/// Name, description and JSON-schema parameters of one tool as advertised to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
}

/// Provider reply before it is turned into a canonical assistant [`Message`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: Option<String>,
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: Some(content.into()), tool_calls: Vec::new(), finish_reason: None }
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self { content: None, tool_calls: calls, finish_reason: Some("tool_calls".to_string()) }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    /// Timeouts, connection failures, rate limits and 5xx responses.
    #[error("provider temporarily unavailable: {0}")]
    Transient(String),
    #[error("provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("provider returned an unusable response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn provider_name(&self) -> &str;
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError>;
}

/// Replays a fixed sequence of responses and records every request it receives.
#[derive(Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<ModelResponse, LlmError>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedLlmClient {
    pub fn new(responses: impl IntoIterator<Item = ModelResponse>) -> Self {
        Self::with_results(responses.into_iter().map(Ok))
    }

    pub fn with_results(
        results: impl IntoIterator<Item = Result<ModelResponse, LlmError>>,
    ) -> Self {
        Self { responses: Mutex::new(results.into_iter().collect()), requests: Mutex::default() }
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests().len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
        match self.requests.lock() {
            Ok(mut requests) => requests.push(request.clone()),
            Err(poisoned) => poisoned.into_inner().push(request.clone()),
        }

        let next = match self.responses.lock() {
            Ok(mut responses) => responses.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.unwrap_or_else(|| {
            Err(LlmError::InvalidResponse("scripted responses exhausted".to_string()))
        })
    }
}
