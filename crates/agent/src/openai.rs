//! OpenAI-compatible chat completions client, used for both OpenAI and Ollama.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use operator_core::config::{LlmConfig, LlmProvider};
use operator_core::domain::message::{Message, Role, ToolCallRequest};

use crate::llm::{LlmClient, LlmError, ModelRequest, ModelResponse, ToolSchema};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    provider_name: &'static str,
    base_url: String,
    api_key: Option<SecretString>,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let (provider_name, default_base) = match config.provider {
            LlmProvider::OpenAi => ("openai", OPENAI_BASE_URL),
            LlmProvider::Ollama => ("ollama", "http://localhost:11434/v1"),
        };
        let base_url = config.base_url.clone().unwrap_or_else(|| default_base.to_string());
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| LlmError::InvalidResponse(format!("http client setup: {error}")))?;

        Ok(Self { http, provider_name, base_url, api_key: config.api_key.clone() })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    fn provider_name(&self) -> &str {
        self.provider_name
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
        let body = encode_request(request);
        let mut http_request = self.http.post(self.endpoint()).json(&body);
        if let Some(api_key) = &self.api_key {
            http_request = http_request.bearer_auth(api_key.expose_secret());
        }

        let response = http_request.send().await.map_err(|error| {
            error!(
                event_name = "llm.request_failed",
                provider = self.provider_name,
                error = %error,
                "model request failed"
            );
            LlmError::Transient(format!("{} request failed: {error}", self.provider_name))
        })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|error| LlmError::Transient(format!("failed to read response: {error}")))?;

        debug!(
            event_name = "llm.response_received",
            provider = self.provider_name,
            status,
            bytes = text.len(),
            "model response received"
        );
        decode_response(status, &text)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

fn function_type() -> String {
    "function".to_string()
}

fn encode_request(request: &ModelRequest) -> ChatRequest {
    let tools: Vec<WireTool> = request.tools.iter().map(encode_tool).collect();
    let tool_choice = (!tools.is_empty()).then_some("auto");

    ChatRequest {
        model: request.model.clone(),
        messages: request.messages.iter().map(encode_message).collect(),
        tools,
        tool_choice,
    }
}

fn encode_tool(schema: &ToolSchema) -> WireTool {
    WireTool {
        tool_type: "function",
        function: WireFunction {
            name: schema.name.clone(),
            description: schema.description.clone(),
            parameters: schema.parameters.clone(),
        },
    }
}

fn encode_message(message: &Message) -> WireMessage {
    WireMessage {
        role: message.role().as_str(),
        content: message.content().to_string(),
        tool_calls: message
            .tool_calls()
            .iter()
            .map(|call| WireToolCall {
                id: call.id.0.clone(),
                call_type: function_type(),
                function: WireFunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.to_string(),
                },
            })
            .collect(),
        tool_call_id: match message.role() {
            Role::Tool => message.tool_call_id().map(|id| id.0.clone()),
            _ => None,
        },
    }
}

fn decode_response(status: u16, body: &str) -> Result<ModelResponse, LlmError> {
    if !(200..300).contains(&status) {
        let message = serde_json::from_str::<ErrorEnvelope>(body)
            .map(|envelope| envelope.error.message)
            .unwrap_or_else(|_| body.chars().take(200).collect());
        return Err(match status {
            408 | 429 | 500..=599 => LlmError::Transient(format!("status {status}: {message}")),
            _ => LlmError::Rejected { status, message },
        });
    }

    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|error| LlmError::InvalidResponse(format!("malformed body: {error}")))?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("response contained no choices".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(decode_tool_call)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ModelResponse {
        content: choice.message.content,
        tool_calls,
        finish_reason: choice.finish_reason,
    })
}

fn decode_tool_call(call: WireToolCall) -> Result<ToolCallRequest, LlmError> {
    let arguments = if call.function.arguments.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(&call.function.arguments).map_err(|error| {
            LlmError::InvalidResponse(format!(
                "arguments for tool `{}` are not valid JSON: {error}",
                call.function.name
            ))
        })?
    };
    Ok(ToolCallRequest::new(call.id, call.function.name, arguments))
}
