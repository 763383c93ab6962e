use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use operator_core::domain::conversation::ConversationState;
use operator_core::domain::message::{Message, ToolCallRequest};
use operator_core::flows::GraphTransitionError;
use operator_core::pruning::PruningPolicy;

use crate::error::AgentError;
use crate::llm::{LlmClient, LlmError, ModelRequest, ModelResponse, ToolSchema};

/// The agent node: prompt assembly, one provider call, translation back to a [`Message`].
#[derive(Clone)]
pub struct ModelNode {
    client: Arc<dyn LlmClient>,
    model: String,
    system_prompt: String,
    pruning: PruningPolicy,
}

impl ModelNode {
    pub fn new(
        client: Arc<dyn LlmClient>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        pruning: PruningPolicy,
    ) -> Self {
        Self { client, model: model.into(), system_prompt: system_prompt.into(), pruning }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Applies the pruning policy to `state` and returns how many messages were discarded.
    pub fn prune(&self, state: &mut ConversationState) -> usize {
        let removed = state.apply_pruning(&self.pruning);
        if removed > 0 {
            debug!(
                event_name = "agent.history.pruned",
                thread_id = %state.thread_id,
                removed,
                retained = state.len(),
                "pruned conversation history"
            );
        }
        removed
    }

    /// Pins the system prompt at index 0 and prunes `state` in place.
    ///
    /// Both steps are idempotent, so repeating them on a retried call changes nothing.
    pub fn prepare(&self, state: &mut ConversationState) -> Result<(), AgentError> {
        state.pin_system_message(&self.system_prompt);
        self.prune(state);

        let unresolved = state.unresolved_tool_calls().len();
        if unresolved > 0 {
            return Err(GraphTransitionError::UnresolvedToolCalls { count: unresolved }.into());
        }
        Ok(())
    }

    /// Calls the provider once with the prepared history. Retrying is left to the caller.
    pub async fn invoke(
        &self,
        state: &ConversationState,
        tools: &[ToolSchema],
    ) -> Result<Message, AgentError> {
        let request = ModelRequest {
            model: self.model.clone(),
            messages: state.current_messages().to_vec(),
            tools: tools.to_vec(),
        };
        let response = self.client.complete(&request).await?;
        Ok(into_message(response)?)
    }
}

/// Converts a provider response into an assistant message with unique, non-empty call ids.
fn into_message(response: ModelResponse) -> Result<Message, LlmError> {
    let content = response.content.unwrap_or_default();
    if response.tool_calls.is_empty() {
        return Ok(Message::assistant(content));
    }

    let mut seen = HashSet::new();
    let mut calls = Vec::with_capacity(response.tool_calls.len());
    for call in response.tool_calls {
        if call.name.trim().is_empty() {
            return Err(LlmError::InvalidResponse("tool call without a name".to_string()));
        }
        let id = if call.id.0.trim().is_empty() {
            format!("call_{}", Uuid::new_v4().simple())
        } else {
            call.id.0
        };
        if !seen.insert(id.clone()) {
            return Err(LlmError::InvalidResponse(format!("duplicate tool call id `{id}`")));
        }
        calls.push(ToolCallRequest::new(id, call.name, call.arguments));
    }
    Ok(Message::assistant_with_tool_calls(content, calls))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use operator_core::domain::conversation::{ConversationState, ThreadId};
    use operator_core::domain::message::{Message, Role, ToolCallId, ToolCallRequest};
    use operator_core::pruning::PruningPolicy;

    use super::{into_message, ModelNode};
    use crate::error::AgentError;
    use crate::llm::{LlmError, ModelResponse, ScriptedLlmClient, ToolSchema};

    fn node(client: Arc<ScriptedLlmClient>) -> ModelNode {
        ModelNode::new(client, "test-model", "You are sf-agent.", PruningPolicy::new(2, 4))
    }

    #[tokio::test]
    async fn injects_exactly_one_system_message_at_the_front() {
        let client = Arc::new(ScriptedLlmClient::new([ModelResponse::text("ok")]));
        let node = node(client.clone());
        let mut state = ConversationState::new(ThreadId::from("P1"));
        state.append(Message::system("stale prompt"));
        state.append(Message::user("hi"));
        state.append(Message::system("duplicate"));

        node.prepare(&mut state).expect("prepare");
        let tools = [ToolSchema {
            name: "echo".to_string(),
            description: "echo".to_string(),
            parameters: json!({"type": "object"}),
        }];
        let reply = node.invoke(&state, &tools).await.expect("invoke");

        assert_eq!(reply.role(), Role::Assistant);
        let sent = &client.requests()[0];
        assert_eq!(sent.messages[0], Message::system("You are sf-agent."));
        assert_eq!(sent.messages.iter().filter(|message| message.is_system()).count(), 1);
        assert_eq!(sent.tools.len(), 1);
    }

    #[tokio::test]
    async fn prunes_history_before_calling_the_model() {
        let client = Arc::new(ScriptedLlmClient::new([ModelResponse::text("ok")]));
        let node = node(client.clone());
        let mut state = ConversationState::new(ThreadId::from("P1"));
        for index in 0..6 {
            state.append(Message::user(format!("message {index}")));
        }

        node.prepare(&mut state).expect("prepare");
        node.invoke(&state, &[]).await.expect("invoke");

        let sent = &client.requests()[0];
        assert_eq!(sent.messages.len(), 3);
        assert!(sent.messages[0].is_system());
        assert_eq!(sent.messages[2].content(), "message 5");
    }

    #[test]
    fn refuses_to_prepare_with_unresolved_tool_calls() {
        let node = node(Arc::new(ScriptedLlmClient::default()));
        let mut state = ConversationState::new(ThreadId::from("P1"));
        state.append(Message::assistant_with_tool_calls(
            "",
            vec![ToolCallRequest::new("call-1", "echo", json!({}))],
        ));

        assert!(matches!(node.prepare(&mut state), Err(AgentError::Graph(_))));

        state.append(Message::tool_result(ToolCallId("call-1".to_string()), "done"));
        node.prepare(&mut state).expect("resolved history is accepted");
    }

    #[test]
    fn fills_missing_call_ids_and_rejects_duplicates() {
        let message = into_message(ModelResponse::tool_calls(vec![ToolCallRequest::new(
            "",
            "echo",
            json!({}),
        )]))
        .expect("message");
        assert!(message.tool_calls()[0].id.as_str().starts_with("call_"));

        let duplicate = into_message(ModelResponse::tool_calls(vec![
            ToolCallRequest::new("same", "echo", json!({})),
            ToolCallRequest::new("same", "echo", json!({})),
        ]));
        assert!(matches!(duplicate, Err(LlmError::InvalidResponse(_))));
    }
}
