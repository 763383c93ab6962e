use serde::{Deserialize, Serialize};

use crate::domain::conversation::ConversationState;
use crate::domain::message::Role;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphNode {
    Start,
    Agent,
    Tools,
    End,
}

impl GraphNode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Agent => "agent",
            Self::Tools => "tools",
            Self::End => "end",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    Entry,
    ToolCallsRequested,
    FinalAnswer,
    ToolCallsResolved,
}

/// What the router needs to know about the state after a node ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RouteContext {
    pub latest_role: Option<Role>,
    pub unresolved_tool_calls: usize,
}

impl RouteContext {
    pub fn from_state(state: &ConversationState) -> Self {
        Self {
            latest_role: state.latest().map(|message| message.role()),
            unresolved_tool_calls: state.unresolved_tool_calls().len(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: GraphNode,
    pub to: GraphNode,
    pub reason: TransitionReason,
}
