//! Agent runtime for operator.
//!
//! A turn flows through the pieces of this crate in order:
//!
//! 1. **Turn handling** (`turn`) resolves the sender to a profile, renders the prompt context
//!    block and parses the model's final JSON reply into an [`AgentTurnResult`].
//! 2. **Execution** (`runtime`) loads or creates the thread checkpoint, then alternates the
//!    agent and tools nodes of the compiled graph (`graph`), saving before every node.
//! 3. **Model invocation** (`model`, `llm`, `openai`) pins the system prompt, prunes history
//!    and calls the configured provider.
//! 4. **Tool dispatch** (`tools`) runs requested calls and folds every outcome, including
//!    failures, back into the conversation as tool messages.
//!
//! [`AgentTurnResult`]: operator_core::AgentTurnResult

pub mod audit;
pub mod bootstrap;
pub mod error;
pub mod graph;
pub mod llm;
pub mod model;
pub mod openai;
pub mod retry;
pub mod runtime;
pub mod tools;
pub mod turn;

pub use audit::TracingAuditSink;
pub use bootstrap::AgentServices;
pub use error::AgentError;
pub use graph::{CompiledGraph, GraphCache};
pub use llm::{LlmClient, LlmError, ModelRequest, ModelResponse, ScriptedLlmClient, ToolSchema};
pub use model::ModelNode;
pub use runtime::{AgentRuntime, RunOutcome, RuntimeSettings};
pub use tools::{Tool, ToolDispatcher, ToolRegistry};
pub use turn::AgentTurnHandler;
