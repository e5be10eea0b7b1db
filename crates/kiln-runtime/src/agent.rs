//! The three callable shapes an entrypoint can take, plus the health probe.
//!
//! Each trait is blanket-implemented for plain closures so agents can be
//! registered without a wrapper type:
//!
//! ```
//! use kiln_runtime::{Entrypoint, RequestContext};
//! use serde_json::{Value, json};
//!
//! let echo = Entrypoint::sync(|payload: Value, _ctx: RequestContext| -> anyhow::Result<Value> {
//!     let prompt = payload["prompt"].as_str().unwrap_or_default();
//!     Ok(json!(format!("{prompt} echoed")))
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use futures::stream::BoxStream;
use kiln_core::{HealthStatus, Message, SessionId};
use serde_json::Value;
use uuid::Uuid;

/// Lazy, finite, non-restartable sequence of content values.
pub type AgentStream = BoxStream<'static, anyhow::Result<String>>;

/// An entrypoint that computes its result without suspending.
pub trait SyncAgent: Send + Sync + 'static {
    fn invoke(&self, payload: Value, ctx: RequestContext) -> anyhow::Result<Value>;
}

impl<F> SyncAgent for F
where
    F: Fn(Value, RequestContext) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    fn invoke(&self, payload: Value, ctx: RequestContext) -> anyhow::Result<Value> {
        self(payload, ctx)
    }
}

/// An entrypoint that suspends while waiting on external calls.
#[async_trait]
pub trait AsyncAgent: Send + Sync + 'static {
    async fn invoke(&self, payload: Value, ctx: RequestContext) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F, Fut> AsyncAgent for F
where
    F: Fn(Value, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn invoke(&self, payload: Value, ctx: RequestContext) -> anyhow::Result<Value> {
        self(payload, ctx).await
    }
}

/// An entrypoint that produces its answer as a sequence of chunks.
pub trait StreamingAgent: Send + Sync + 'static {
    fn invoke(&self, payload: Value, ctx: RequestContext) -> AgentStream;
}

impl<F, S> StreamingAgent for F
where
    F: Fn(Value, RequestContext) -> S + Send + Sync + 'static,
    S: Stream<Item = anyhow::Result<String>> + Send + 'static,
{
    fn invoke(&self, payload: Value, ctx: RequestContext) -> AgentStream {
        Box::pin(self(payload, ctx))
    }
}

/// Zero-argument health probe polled by the orchestrator.
pub trait HealthProbe: Send + Sync + 'static {
    fn probe(&self) -> HealthStatus;
}

impl<F> HealthProbe for F
where
    F: Fn() -> HealthStatus + Send + Sync + 'static,
{
    fn probe(&self) -> HealthStatus {
        self()
    }
}

/// Per-request context handed to the entrypoint alongside the payload.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub session_id: SessionId,
    pub request_id: Uuid,
    history: Arc<Vec<Message>>,
    env: Arc<HashMap<String, String>>,
}

impl RequestContext {
    pub fn new(
        session_id: SessionId,
        history: Vec<Message>,
        env: Arc<HashMap<String, String>>,
    ) -> Self {
        Self {
            session_id,
            request_id: Uuid::new_v4(),
            history: Arc::new(history),
            env,
        }
    }

    /// Session history as of this request, ending with the inbound user turn.
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Look up a variable in the sandbox environment, falling back to the
    /// process environment.
    pub fn env(&self, key: &str) -> Option<String> {
        self.env
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    }

    /// Variables injected through invocation requests.
    pub fn env_vars(&self) -> &HashMap<String, String> {
        &self.env
    }
}
