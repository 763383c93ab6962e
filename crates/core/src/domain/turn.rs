use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::conversation::ThreadId;
use crate::domain::profile::InboundMessage;

/// Outcome of one handled inbound message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTurnResult {
    #[serde(rename = "fromAgent")]
    pub from_agent: String,
    #[serde(rename = "nextAgent")]
    pub next_agent: String,
    pub message: String,
    #[serde(rename = "threadID")]
    pub thread_id: String,
    #[serde(rename = "channelType")]
    pub channel_type: String,
    pub from: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FinalPayloadError {
    #[error("final reply is not valid JSON: {0}")]
    NotJson(String),
    #[error("final reply must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// The structured reply the model ends every turn with.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinalPayload {
    pub next_agent: String,
    pub message: String,
}

impl FinalPayload {
    /// Strict parse: the whole content must be one JSON object. Missing or non-string
    /// `nextagent`/`message` fields become empty strings.
    pub fn parse(content: &str) -> Result<Self, FinalPayloadError> {
        let value: Value = serde_json::from_str(content.trim())
            .map_err(|error| FinalPayloadError::NotJson(error.to_string()))?;
        let object = match &value {
            Value::Object(object) => object,
            Value::Array(_) => return Err(FinalPayloadError::NotAnObject("array")),
            Value::String(_) => return Err(FinalPayloadError::NotAnObject("string")),
            Value::Number(_) => return Err(FinalPayloadError::NotAnObject("number")),
            Value::Bool(_) => return Err(FinalPayloadError::NotAnObject("bool")),
            Value::Null => return Err(FinalPayloadError::NotAnObject("null")),
        };

        let field = |key: &str| {
            object.get(key).and_then(Value::as_str).map(str::to_owned).unwrap_or_default()
        };

        Ok(Self { next_agent: field("nextagent"), message: field("message") })
    }

    pub fn into_turn_result(
        self,
        from_agent: &str,
        thread_id: &ThreadId,
        inbound: &InboundMessage,
    ) -> AgentTurnResult {
        AgentTurnResult {
            from_agent: from_agent.to_owned(),
            next_agent: self.next_agent,
            message: self.message,
            thread_id: thread_id.0.clone(),
            channel_type: inbound.channel_type.clone(),
            from: inbound.from.clone(),
        }
    }
}
