//! Domain model for the operator agent runtime: conversation history and its pruning
//! policy, the agent/tools routing graph, audit events, configuration and the error
//! taxonomy shared by every crate in the workspace.

pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod pruning;

pub use chrono;

pub use audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
};
pub use domain::conversation::{ConversationState, ThreadId};
pub use domain::message::{Message, Role, ToolCallId, ToolCallRequest};
pub use domain::profile::{ChannelBinding, InboundMessage};
pub use domain::turn::{AgentTurnResult, FinalPayload, FinalPayloadError};
pub use errors::{DomainError, ErrorClass, TurnFailure};
pub use flows::{GraphNode, GraphRouter, GraphTransitionError, RouteContext};
pub use pruning::PruningPolicy;
