use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentFault, KilnError};

/// Outcome tag of a non-streaming invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Error,
}

/// The single response of a non-streaming invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultResponse {
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl ResultResponse {
    pub fn success(result: Value) -> Self {
        Self {
            status: ResultStatus::Success,
            result,
            error: None,
            error_type: None,
        }
    }

    pub fn failure(fault: AgentFault) -> Self {
        Self {
            status: ResultStatus::Error,
            result: Value::Null,
            error: Some(fault.message),
            error_type: Some(fault.kind),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    /// Convert into the agent's result, surfacing a reported fault as
    /// [`KilnError::Invocation`].
    pub fn into_result(self) -> crate::Result<Value> {
        match self.status {
            ResultStatus::Success => Ok(self.result),
            ResultStatus::Error => Err(KilnError::Invocation {
                kind: self
                    .error_type
                    .unwrap_or_else(|| AgentFault::DEFAULT_KIND.to_string()),
                message: self.error.unwrap_or_default(),
            }),
        }
    }

    /// Text recorded as the assistant's turn for a successful result.
    pub fn result_text(&self) -> String {
        match &self.result {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}
