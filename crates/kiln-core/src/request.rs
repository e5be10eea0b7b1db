use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{KilnError, Result};

/// Identifier of a conversation session inside one sandbox process.
pub type SessionId = String;

/// Payload field carrying the user's turn when the payload is a JSON object.
pub const PROMPT_FIELD: &str = "prompt";

/// Default per-call deadline in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Response header echoing the session an invocation ran in.
pub const SESSION_HEADER: &str = "x-kiln-runtime-session-id";

/// A request to execute the sandbox's registered entrypoint.
///
/// Field names follow the wire format (`agentId`, `envVars`,
/// `runtimeSessionId`); the payload travels base64-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default, with = "base64_bytes")]
    pub payload: Vec<u8>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_session_id: Option<SessionId>,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl InvocationRequest {
    pub fn new(agent_id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            agent_id: agent_id.into(),
            payload: payload.into(),
            timeout: DEFAULT_TIMEOUT_SECS,
            env_vars: HashMap::new(),
            runtime_session_id: None,
        }
    }

    /// Build a request whose payload is the JSON serialization of `payload`.
    pub fn json(agent_id: impl Into<String>, payload: &Value) -> Self {
        Self::new(agent_id, payload.to_string().into_bytes())
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = secs;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<SessionId>) -> Self {
        self.runtime_session_id = Some(session_id.into());
        self
    }

    /// Check the fields every request must carry.
    pub fn validate(&self) -> Result<()> {
        if self.agent_id.trim().is_empty() {
            return Err(KilnError::Configuration(
                "invocation request is missing agentId".into(),
            ));
        }
        Ok(())
    }

    /// Decode the payload as JSON. Payloads that are not valid JSON are
    /// handed to the agent as a string.
    pub fn decode_payload(&self) -> Value {
        serde_json::from_slice(&self.payload)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&self.payload).into_owned()))
    }
}

/// The user's turn carried by a decoded payload: the `prompt` field when it
/// is a string, otherwise the payload itself as text.
pub fn user_content(payload: &Value) -> String {
    match payload {
        Value::Object(map) => match map.get(PROMPT_FIELD) {
            Some(Value::String(prompt)) => prompt.clone(),
            _ => payload.to_string(),
        },
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

mod base64_bytes {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
