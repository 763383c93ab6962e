use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::message::{Message, ToolCallId, ToolCallRequest};
use crate::pruning::{prune_messages, PruningPolicy};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ThreadId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for ThreadId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered history of one thread plus the step of the checkpoint it was last saved as.
///
/// `step == 0` means the state has never been persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub thread_id: ThreadId,
    messages: Vec<Message>,
    pub step: u64,
}

impl ConversationState {
    pub fn new(thread_id: ThreadId) -> Self {
        Self { thread_id, messages: Vec::new(), step: 0 }
    }

    pub fn from_parts(thread_id: ThreadId, messages: Vec<Message>, step: u64) -> Self {
        Self { thread_id, messages, step }
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    pub fn current_messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn latest(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Puts `prompt` at index 0 as the only system message.
    pub fn pin_system_message(&mut self, prompt: &str) {
        self.messages.retain(|message| !message.is_system());
        self.messages.insert(0, Message::system(prompt));
    }

    /// Returns the number of messages discarded.
    pub fn apply_pruning(&mut self, policy: &PruningPolicy) -> usize {
        prune_messages(&mut self.messages, policy)
    }

    /// Tool-call requests that no later tool message answers, in request order.
    pub fn unresolved_tool_calls(&self) -> Vec<&ToolCallRequest> {
        let answered = self.answered_call_ids();
        self.messages
            .iter()
            .flat_map(Message::tool_calls)
            .filter(|request| !answered.contains(&request.id))
            .collect()
    }

    /// Tool messages whose call id was never requested in this history.
    pub fn orphaned_tool_results(&self) -> Vec<&ToolCallId> {
        let requested = self
            .messages
            .iter()
            .flat_map(Message::tool_calls)
            .map(|request| &request.id)
            .collect::<BTreeSet<_>>();
        self.messages
            .iter()
            .filter_map(Message::tool_call_id)
            .filter(|call_id| !requested.contains(call_id))
            .collect()
    }

    pub fn system_message_count(&self) -> usize {
        self.messages.iter().filter(|message| message.is_system()).count()
    }

    fn answered_call_ids(&self) -> BTreeSet<&ToolCallId> {
        self.messages.iter().filter_map(Message::tool_call_id).collect()
    }
}
