//! # kiln-client
//!
//! Gateway for calling an agent hosted in a Kiln sandbox. The caller never
//! declares whether it expects a stream: the reply's shape is read from the
//! response and returned as [`InvocationBody::Result`] or
//! [`InvocationBody::Stream`].
//!
//! ```no_run
//! # async fn run() -> kiln_core::Result<()> {
//! use kiln_client::AgentRuntimeClient;
//! use kiln_core::InvocationRequest;
//! use serde_json::json;
//!
//! let client = AgentRuntimeClient::new("http://127.0.0.1:8080")?;
//! let request = InvocationRequest::json("my-agent", &json!({"prompt": "Hello"}))
//!     .with_session("session-1");
//! let text = client.invoke_text(request).await?;
//! println!("{text}");
//! # Ok(())
//! # }
//! ```

pub mod stream;

use std::time::Duration;

use kiln_config::ClientConfig;
use kiln_core::{
    HealthStatus, InvocationRequest, KilnError, Result, ResultResponse, SESSION_HEADER,
    SessionId,
};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info};

pub use stream::ChunkStream;

/// Shape of a sandbox reply.
pub enum InvocationBody {
    Result(ResultResponse),
    Stream(ChunkStream),
}

/// A sandbox reply and the session it ran in.
pub struct Invocation {
    pub session_id: Option<SessionId>,
    pub body: InvocationBody,
}

/// HTTP client for one sandbox.
#[derive(Clone)]
pub struct AgentRuntimeClient {
    client: reqwest::Client,
    base_url: String,
    agent_id: Option<String>,
}

impl AgentRuntimeClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::from_config(&ClientConfig {
            base_url: base_url.into(),
            ..Default::default()
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| KilnError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            agent_id: config.agent_id.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a request for the configured agent with a JSON payload.
    pub fn request(&self, payload: &Value) -> Result<InvocationRequest> {
        let agent_id = self.agent_id.clone().ok_or_else(|| {
            KilnError::Configuration("no agent id configured for this client".into())
        })?;
        Ok(InvocationRequest::json(agent_id, payload))
    }

    /// Send an invocation and return its reply.
    ///
    /// `request.timeout` bounds the whole exchange: if no terminal unit
    /// arrives in time the call, or the returned stream, fails with
    /// [`KilnError::Timeout`]. The sandbox is not told; an abandoned stream
    /// stops producing once its next chunk cannot be delivered.
    pub async fn invoke(&self, request: InvocationRequest) -> Result<Invocation> {
        request.validate()?;
        let secs = request.timeout;
        let deadline = deadline_after(secs);
        let url = format!("{}/invocations", self.base_url);

        debug!(
            agent_id = %request.agent_id,
            session_id = ?request.runtime_session_id,
            timeout = secs,
            "sending invocation"
        );

        let send = self
            .client
            .post(&url)
            .header("accept", "application/json, text/event-stream")
            .json(&request)
            .send();
        let response = tokio::time::timeout_at(deadline, send)
            .await
            .map_err(|_| KilnError::Timeout { secs })?
            .map_err(|e| KilnError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = tokio::time::timeout_at(deadline, response.text())
                .await
                .map_err(|_| KilnError::Timeout { secs })?
                .unwrap_or_default();
            return Err(KilnError::Transport(format!(
                "sandbox returned {status}: {body}"
            )));
        }

        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let streaming = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);

        let body = if streaming {
            info!(session_id = ?session_id, "invocation answered with a chunk stream");
            InvocationBody::Stream(ChunkStream::from_response(
                response,
                session_id.clone(),
                deadline,
                secs,
            ))
        } else {
            let bytes = tokio::time::timeout_at(deadline, response.bytes())
                .await
                .map_err(|_| KilnError::Timeout { secs })?
                .map_err(|e| KilnError::Transport(e.to_string()))?;
            let result: ResultResponse = serde_json::from_slice(&bytes)
                .map_err(|e| KilnError::Protocol(format!("invalid result response: {e}")))?;
            InvocationBody::Result(result)
        };

        Ok(Invocation { session_id, body })
    }

    /// Invoke and reduce the reply to text: the concatenated content of a
    /// stream, or the result value (strings verbatim, other JSON serialized).
    /// Agent faults surface as [`KilnError::Invocation`].
    pub async fn invoke_text(&self, request: InvocationRequest) -> Result<String> {
        match self.invoke(request).await?.body {
            InvocationBody::Result(response) => match response.into_result()? {
                Value::String(text) => Ok(text),
                Value::Null => Ok(String::new()),
                other => Ok(other.to_string()),
            },
            InvocationBody::Stream(stream) => stream.collect_text().await,
        }
    }

    /// Poll the sandbox health probe.
    pub async fn ping(&self) -> Result<HealthStatus> {
        let response = self
            .client
            .get(format!("{}/ping", self.base_url))
            .send()
            .await
            .map_err(|e| KilnError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| KilnError::Transport(e.to_string()))?;
        response
            .json::<HealthStatus>()
            .await
            .map_err(|e| KilnError::Protocol(format!("invalid health status: {e}")))
    }
}

fn deadline_after(secs: u64) -> Instant {
    let now = Instant::now();
    now.checked_add(Duration::from_secs(secs))
        .unwrap_or_else(|| now + Duration::from_secs(u32::MAX as u64))
}
