//! `/invoke`: inbound events from the delivery pipeline.
//!
//! Two envelopes are accepted. A queue batch carries records whose `body` is a JSON string with
//! `channel_type`, `from` and `messages`; records missing any of them are skipped. A task-token
//! request carries one `input` and is answered with a success or failure signal for that token.

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use operator_agent::AgentTurnHandler;
use operator_core::errors::{ErrorClass, TurnFailure};
use operator_core::{AgentTurnResult, InboundMessage};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone)]
pub struct InvokeState {
    handler: Arc<AgentTurnHandler>,
    turns: CancellationToken,
}

pub fn router(handler: Arc<AgentTurnHandler>, turns: CancellationToken) -> Router {
    Router::new().route("/invoke", post(invoke)).with_state(InvokeState { handler, turns })
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum InboundEvent {
    Task {
        #[serde(rename = "taskToken")]
        task_token: String,
        input: TaskInput,
    },
    Queue {
        #[serde(rename = "Records")]
        records: Vec<QueueRecord>,
    },
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskInput {
    pub channel_type: Option<String>,
    pub from: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QueueRecord {
    #[serde(rename = "messageId", default)]
    pub message_id: Option<String>,
    pub body: String,
}

#[derive(Debug, Default, Deserialize)]
struct QueueBody {
    channel_type: Option<String>,
    from: Option<String>,
    messages: Option<String>,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InvokeResponse {
    Task(TaskResponse),
    Queue(QueueResponse),
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskResponse {
    Success {
        #[serde(rename = "taskToken")]
        task_token: String,
        output: AgentTurnResult,
    },
    Failure {
        #[serde(rename = "taskToken")]
        task_token: String,
        error: String,
        cause: String,
    },
}

#[derive(Debug, PartialEq, Serialize)]
pub struct QueueResponse {
    pub records: Vec<RecordOutcome>,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordOutcome {
    Processed { index: usize, output: AgentTurnResult },
    Skipped { index: usize, reason: String },
    Failed { index: usize, error: String, cause: String },
}

pub async fn invoke(
    State(state): State<InvokeState>,
    Json(event): Json<InboundEvent>,
) -> Json<InvokeResponse> {
    let response = match event {
        InboundEvent::Task { task_token, input } => {
            InvokeResponse::Task(handle_task(&state, task_token, input).await)
        }
        InboundEvent::Queue { records } => {
            InvokeResponse::Queue(handle_queue(&state, records).await)
        }
    };
    Json(response)
}

async fn handle_task(state: &InvokeState, task_token: String, input: TaskInput) -> TaskResponse {
    let inbound = match (input.channel_type, input.from, input.message) {
        (Some(channel_type), Some(from), Some(message)) if !from.is_empty() => {
            InboundMessage::new(channel_type, from, message)
        }
        _ => {
            let failure = TurnFailure::new(
                "InvalidInput",
                "task input requires channel_type, from and message",
                ErrorClass::Terminal,
            );
            warn!(
                event_name = "server.invoke.task_rejected",
                correlation_id = %task_token,
                error = %failure.error,
                "task input is incomplete"
            );
            return TaskResponse::Failure {
                task_token,
                error: failure.error,
                cause: failure.cause,
            };
        }
    };

    match state.handler.handle(&inbound, &state.turns).await {
        Ok(output) => {
            info!(
                event_name = "server.invoke.task_succeeded",
                correlation_id = %task_token,
                thread_id = %output.thread_id,
                next_agent = %output.next_agent,
                "task completed"
            );
            TaskResponse::Success { task_token, output }
        }
        Err(error) => {
            let failure = error.into_failure();
            warn!(
                event_name = "server.invoke.task_failed",
                correlation_id = %task_token,
                error = %failure.error,
                cause = %failure.cause,
                "task failed"
            );
            TaskResponse::Failure { task_token, error: failure.error, cause: failure.cause }
        }
    }
}

async fn handle_queue(state: &InvokeState, records: Vec<QueueRecord>) -> QueueResponse {
    let mut outcomes = Vec::with_capacity(records.len());

    for (index, record) in records.into_iter().enumerate() {
        let message_id = record.message_id.unwrap_or_else(|| format!("record-{index}"));
        let inbound = match parse_queue_body(&record.body) {
            Ok(inbound) => inbound,
            Err(reason) => {
                warn!(
                    event_name = "server.invoke.record_skipped",
                    correlation_id = %message_id,
                    reason = %reason,
                    "skipping queue record"
                );
                outcomes.push(RecordOutcome::Skipped { index, reason });
                continue;
            }
        };

        let outcome = match state.handler.handle(&inbound, &state.turns).await {
            Ok(output) => RecordOutcome::Processed { index, output },
            Err(error) => {
                let failure = error.into_failure();
                warn!(
                    event_name = "server.invoke.record_failed",
                    correlation_id = %message_id,
                    error = %failure.error,
                    cause = %failure.cause,
                    "queue record failed"
                );
                RecordOutcome::Failed { index, error: failure.error, cause: failure.cause }
            }
        };
        outcomes.push(outcome);
    }

    QueueResponse { records: outcomes }
}

fn parse_queue_body(body: &str) -> Result<InboundMessage, String> {
    let body: QueueBody =
        serde_json::from_str(body).map_err(|error| format!("body is not valid JSON: {error}"))?;

    match (body.channel_type, body.from, body.messages) {
        (Some(channel_type), Some(from), Some(messages))
            if !channel_type.is_empty() && !from.is_empty() && !messages.is_empty() =>
        {
            Ok(InboundMessage::new(channel_type, from, messages))
        }
        _ => Err("missing channel_type, from or messages".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use operator_agent::{
        AgentRuntime, AgentTurnHandler, CompiledGraph, ModelNode, ModelResponse, RuntimeSettings,
        ScriptedLlmClient, ToolDispatcher, ToolRegistry,
    };
    use operator_core::audit::InMemoryAuditSink;
    use operator_core::PruningPolicy;
    use operator_db::repositories::{InMemoryCheckpointStore, InMemoryProfileDirectory};
    use operator_db::UserProfile;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::{parse_queue_body, router};

    const REPLY: &str = r#"{"nextagent":"END","message":"You have 3 open opportunities."}"#;

    fn app(replies: usize) -> (axum::Router, Arc<ScriptedLlmClient>) {
        let client =
            Arc::new(ScriptedLlmClient::new((0..replies).map(|_| ModelResponse::text(REPLY))));
        let registry = Arc::new(ToolRegistry::new());
        let audit = Arc::new(InMemoryAuditSink::default());
        let runtime = AgentRuntime::new(
            Arc::new(InMemoryCheckpointStore::default()),
            ModelNode::new(client.clone(), "test-model", "prompt", PruningPolicy::default()),
            ToolDispatcher::new(registry.clone(), audit.clone()),
            Arc::new(CompiledGraph::compile(&registry)),
            audit,
            RuntimeSettings::default(),
        );
        let profiles = InMemoryProfileDirectory::with_profiles([UserProfile::new(
            "P1",
            "+15550001",
            "whatsapp",
        )]);
        let handler =
            Arc::new(AgentTurnHandler::new("sf-agent", Arc::new(profiles), Arc::new(runtime), 0));
        (router(handler, CancellationToken::new()), client)
    }

    async fn post(app: axum::Router, body: Value) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/invoke")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn task_token_request_answers_with_the_turn_result() {
        let (app, _) = app(1);

        let (status, body) = post(
            app,
            json!({
                "taskToken": "tok-1",
                "input": {"channel_type": "whatsapp", "from": "+15550001", "message": "status?"}
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["taskToken"], "tok-1");
        assert_eq!(
            body["output"],
            json!({
                "fromAgent": "sf-agent",
                "nextAgent": "END",
                "message": "You have 3 open opportunities.",
                "threadID": "P1",
                "channelType": "whatsapp",
                "from": "+15550001"
            })
        );
    }

    #[tokio::test]
    async fn unknown_sender_is_reported_as_a_task_failure() {
        let (app, client) = app(1);

        let (_, body) = post(
            app,
            json!({
                "taskToken": "tok-2",
                "input": {"channel_type": "whatsapp", "from": "+19990000", "message": "hi"}
            }),
        )
        .await;

        assert_eq!(body["status"], "failure");
        assert_eq!(body["error"], "ProfileNotFound");
        assert!(body["cause"].as_str().unwrap_or_default().contains("+19990000"));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn queue_batch_skips_incomplete_records_and_handles_the_rest() {
        let (app, client) = app(1);
        let valid = json!({"channel_type": "whatsapp", "from": "+15550001", "messages": "hi"});
        let missing = json!({"channel_type": "whatsapp", "messages": "hi"});

        let (status, body) = post(
            app,
            json!({"Records": [
                {"messageId": "m-1", "body": missing.to_string()},
                {"messageId": "m-2", "body": valid.to_string()},
                {"body": "not json"}
            ]}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let records = body["records"].as_array().cloned().unwrap_or_default();
        let statuses: Vec<&str> =
            records.iter().map(|record| record["status"].as_str().unwrap_or_default()).collect();
        assert_eq!(statuses, vec!["skipped", "processed", "skipped"]);
        assert_eq!(records[1]["output"]["threadID"], "P1");
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn unrecognised_envelope_is_rejected() {
        let (app, _) = app(0);

        let (status, _) = post(app, json!({"hello": "world"})).await;

        assert!(status.is_client_error());
    }

    #[test]
    fn queue_body_with_empty_fields_is_skipped() {
        assert!(parse_queue_body(r#"{"channel_type":"","from":"+1","messages":"hi"}"#).is_err());
        let inbound = parse_queue_body(r#"{"channel_type":"email","from":"a@b.c","messages":"x"}"#)
            .expect("valid body");
        assert_eq!(inbound.channel_type, "email");
        assert_eq!(inbound.text, "x");
    }
}
