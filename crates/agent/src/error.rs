use thiserror::Error;

use operator_core::errors::{ErrorClass, TurnFailure};
use operator_core::flows::GraphTransitionError;
use operator_core::FinalPayloadError;
use operator_db::{CheckpointError, RepositoryError};

use crate::llm::LlmError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("no profile is registered for sender `{user_id}`")]
    ProfileNotFound { user_id: String },
    #[error("profile directory error: {0}")]
    Directory(#[from] RepositoryError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("model provider error: {0}")]
    Llm(#[from] LlmError),
    #[error("routing error: {0}")]
    Graph(#[from] GraphTransitionError),
    #[error("exceeded {limit} agent/tool round trips in one turn")]
    IterationLimit { limit: u32 },
    #[error(transparent)]
    InvalidFinalPayload(#[from] FinalPayloadError),
    #[error("turn cancelled before completion")]
    Cancelled,
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("remote tool source unavailable: {0}")]
    ToolSource(String),
}

impl AgentError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ProfileNotFound { .. }
            | Self::Graph(_)
            | Self::IterationLimit { .. }
            | Self::InvalidFinalPayload(_)
            | Self::Configuration(_) => ErrorClass::Terminal,
            Self::Directory(_) => ErrorClass::Fatal,
            Self::Checkpoint(CheckpointError::Conflict { .. }) => ErrorClass::Conflict,
            Self::Checkpoint(CheckpointError::CapacityExceeded { .. }) => ErrorClass::Transient,
            Self::Checkpoint(CheckpointError::Unavailable(_) | CheckpointError::Decode(_)) => {
                ErrorClass::Fatal
            }
            Self::Llm(LlmError::Transient(_)) | Self::ToolSource(_) => ErrorClass::Transient,
            Self::Llm(_) => ErrorClass::Terminal,
            Self::Cancelled => ErrorClass::Cancelled,
        }
    }

    /// Stable identifier reported as the `error` field of a failure signal.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ProfileNotFound { .. } => "ProfileNotFound",
            Self::Directory(_) => "DirectoryUnavailable",
            Self::Checkpoint(CheckpointError::Conflict { .. }) => "CheckpointConflict",
            Self::Checkpoint(CheckpointError::CapacityExceeded { .. }) => {
                "CheckpointCapacityExceeded"
            }
            Self::Checkpoint(CheckpointError::Unavailable(_)) => "CheckpointUnavailable",
            Self::Checkpoint(CheckpointError::Decode(_)) => "CheckpointCorrupt",
            Self::Llm(LlmError::Transient(_)) => "ProviderUnavailable",
            Self::Llm(LlmError::Rejected { .. }) => "ProviderRejected",
            Self::Llm(LlmError::InvalidResponse(_)) => "ProviderInvalidResponse",
            Self::Graph(_) => "RoutingError",
            Self::IterationLimit { .. } => "IterationLimitExceeded",
            Self::InvalidFinalPayload(_) => "InvalidFinalPayload",
            Self::Cancelled => "Cancelled",
            Self::Configuration(_) => "ConfigurationError",
            Self::ToolSource(_) => "ToolSourceUnavailable",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Checkpoint(CheckpointError::Conflict { .. }))
    }

    pub fn to_failure(&self) -> TurnFailure {
        TurnFailure::new(self.error_kind(), self.to_string(), self.class())
    }

    pub fn into_failure(self) -> TurnFailure {
        self.to_failure()
    }
}

#[cfg(test)]
mod tests {
    use operator_core::errors::ErrorClass;
    use operator_core::FinalPayloadError;
    use operator_db::repositories::CapacityKind;
    use operator_db::CheckpointError;

    use super::AgentError;
    use crate::llm::LlmError;

    #[test]
    fn unknown_profile_is_terminal_not_found() {
        let failure =
            AgentError::ProfileNotFound { user_id: "+15550000000".to_string() }.into_failure();

        assert_eq!(failure.error, "ProfileNotFound");
        assert_eq!(failure.class, ErrorClass::Terminal);
        assert!(failure.cause.contains("+15550000000"));
    }

    #[test]
    fn checkpoint_errors_map_to_retry_classes() {
        let conflict = AgentError::from(CheckpointError::Conflict {
            thread_id: "P1".to_string(),
            expected_step: 1,
            actual_step: Some(2),
        });
        assert!(conflict.is_conflict());
        assert_eq!(conflict.class(), ErrorClass::Conflict);

        let throttled = AgentError::from(CheckpointError::CapacityExceeded {
            kind: CapacityKind::Write,
            requested: 2,
            remaining: 0,
        });
        assert_eq!(throttled.class(), ErrorClass::Transient);

        let corrupt = AgentError::from(CheckpointError::Decode("bad json".to_string()));
        assert_eq!(corrupt.class(), ErrorClass::Fatal);
    }

    #[test]
    fn provider_and_payload_failures_are_classified() {
        assert_eq!(
            AgentError::from(LlmError::Transient("timeout".to_string())).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            AgentError::from(LlmError::InvalidResponse("no choices".to_string())).error_kind(),
            "ProviderInvalidResponse"
        );
        assert_eq!(
            AgentError::from(FinalPayloadError::NotJson("eof".to_string())).class(),
            ErrorClass::Terminal
        );
        assert_eq!(AgentError::Cancelled.class(), ErrorClass::Cancelled);
    }
}
