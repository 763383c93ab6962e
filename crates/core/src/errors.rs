use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flows::GraphTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    GraphTransition(#[from] GraphTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// How a failure should be handled by whoever drives the turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// A single tool failed; folded into the conversation as a tool result.
    RecoverableTool,
    /// Retry the same step with backoff.
    Transient,
    /// Another invocation advanced the thread; reload and retry the turn.
    Conflict,
    /// The turn cannot succeed as submitted.
    Terminal,
    /// Infrastructure is unreachable; nothing was persisted for this step.
    Fatal,
    /// The caller stopped the turn; the last saved checkpoint is intact.
    Cancelled,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecoverableTool => "recoverable_tool",
            Self::Transient => "transient",
            Self::Conflict => "conflict",
            Self::Terminal => "terminal",
            Self::Fatal => "fatal",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::Conflict)
    }
}

/// Structured failure signal handed back to the caller of a turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnFailure {
    pub error: String,
    pub cause: String,
    pub class: ErrorClass,
}

impl TurnFailure {
    pub fn new(error: impl Into<String>, cause: impl Into<String>, class: ErrorClass) -> Self {
        Self { error: error.into(), cause: cause.into(), class }
    }

    pub fn user_message(&self) -> &'static str {
        match self.class {
            ErrorClass::Transient | ErrorClass::Conflict | ErrorClass::Fatal => {
                "The assistant is temporarily unavailable. Please retry shortly."
            }
            ErrorClass::Terminal => "The request could not be processed.",
            ErrorClass::Cancelled => "The request was cancelled before it completed.",
            ErrorClass::RecoverableTool => "A connected service failed while handling the request.",
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::errors::{DomainError, ErrorClass, TurnFailure};
    use crate::flows::{GraphNode, GraphTransitionError};

    #[test]
    fn graph_errors_lift_into_domain_errors() {
        let error = DomainError::from(GraphTransitionError::Terminal(GraphNode::End));
        assert!(error.to_string().contains("terminal node"));
    }

    #[test]
    fn only_transient_and_conflict_are_retryable() {
        assert!(ErrorClass::Transient.is_retryable());
        assert!(ErrorClass::Conflict.is_retryable());
        assert!(!ErrorClass::Terminal.is_retryable());
        assert!(!ErrorClass::Fatal.is_retryable());
    }

    #[test]
    fn failure_serializes_kind_and_cause() {
        let failure =
            TurnFailure::new("NotFound", "no profile for user +1555", ErrorClass::Terminal);
        let encoded = serde_json::to_value(&failure).expect("serialize");

        assert_eq!(
            encoded,
            json!({"error": "NotFound", "cause": "no profile for user +1555", "class": "terminal"})
        );
        assert_eq!(failure.user_message(), "The request could not be processed.");
    }
}
