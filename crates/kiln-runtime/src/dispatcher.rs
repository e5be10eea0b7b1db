//! Normalizes the three entrypoint shapes into one response protocol.
//!
//! Sync and async entrypoints yield exactly one [`ResultResponse`];
//! streaming entrypoints yield a [`ChunkStream`] of content frames closed by
//! exactly one `end` or `error` frame. Agent faults, including panics, are
//! converted at this boundary and never propagate.

use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{FutureExt, Stream, StreamExt};
use kiln_core::request::user_content;
use kiln_core::{
    AgentFault, ChunkFrame, HealthStatus, InvocationRequest, Message, Result, ResultResponse,
    SessionId,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{AsyncAgent, RequestContext, StreamingAgent, SyncAgent};
use crate::env::SandboxEnv;
use crate::registry::{Entrypoint, EntrypointKind, EntrypointRegistry};
use crate::session::{SessionGuard, SessionStore};

/// What a dispatch produced.
pub enum DispatchBody {
    Result(ResultResponse),
    Stream(ChunkStream),
}

/// A dispatched invocation and the session it ran in.
pub struct DispatchOutcome {
    pub session_id: SessionId,
    pub kind: EntrypointKind,
    pub body: DispatchBody,
}

/// Routes invocation requests to the registered entrypoint.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<EntrypointRegistry>,
    sessions: SessionStore,
    env: SandboxEnv,
}

impl Dispatcher {
    pub fn new(registry: Arc<EntrypointRegistry>) -> Self {
        Self {
            registry,
            sessions: SessionStore::new(),
            env: SandboxEnv::new(),
        }
    }

    pub fn registry(&self) -> &EntrypointRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn env(&self) -> &SandboxEnv {
        &self.env
    }

    pub fn ping(&self) -> HealthStatus {
        self.registry.ping()
    }

    /// Run one invocation.
    ///
    /// Errors are returned only for configuration problems (missing
    /// `agentId`, nothing registered); agent faults are reported inside the
    /// returned body.
    pub async fn dispatch(&self, request: InvocationRequest) -> Result<DispatchOutcome> {
        request.validate()?;
        let (entrypoint, kind) = self.registry.resolve()?;

        let session_id = request
            .runtime_session_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        self.env.apply(&request.env_vars);
        let payload = request.decode_payload();

        // Held for the whole round so concurrent invocations on one session
        // append in call order.
        let mut guard = self.sessions.lock(&session_id).await;
        guard.push(Message::user(user_content(&payload)));
        let ctx = RequestContext::new(
            session_id.clone(),
            guard.messages().to_vec(),
            self.env.snapshot(),
        );

        info!(
            session_id = %session_id,
            request_id = %ctx.request_id,
            ?kind,
            "dispatching invocation"
        );

        let body = match entrypoint {
            Entrypoint::Sync(agent) => {
                DispatchBody::Result(run_sync(agent, payload, ctx, guard).await)
            }
            Entrypoint::Async(agent) => {
                DispatchBody::Result(run_async(agent, payload, ctx, guard).await)
            }
            Entrypoint::Streaming(agent) => {
                DispatchBody::Stream(run_streaming(agent, payload, ctx, guard))
            }
        };

        Ok(DispatchOutcome {
            session_id,
            kind,
            body,
        })
    }
}

/// Record the assistant turn for a successful result.
fn finish_round(guard: &mut SessionGuard, response: &ResultResponse) {
    if response.is_success() {
        guard.push(Message::assistant(response.result_text()));
    }
}

fn into_response(outcome: anyhow::Result<Value>, session_id: &str) -> ResultResponse {
    match outcome {
        Ok(result) => ResultResponse::success(result),
        Err(err) => {
            let fault = AgentFault::from_error(&err);
            warn!(
                session_id = %session_id,
                kind = %fault.kind,
                error = %fault.message,
                "agent invocation failed"
            );
            ResultResponse::failure(fault)
        }
    }
}

fn panic_response(payload: &(dyn std::any::Any + Send), session_id: &str) -> ResultResponse {
    let fault = AgentFault::from_panic(payload);
    warn!(session_id = %session_id, error = %fault.message, "agent panicked");
    ResultResponse::failure(fault)
}

// Non-streaming rounds run on their own task: if the caller goes away the
// round still completes and its session turn is recorded.

async fn run_sync(
    agent: Arc<dyn SyncAgent>,
    payload: Value,
    ctx: RequestContext,
    mut guard: SessionGuard,
) -> ResultResponse {
    let session_id = ctx.session_id.clone();
    let round = tokio::spawn(async move {
        let sid = ctx.session_id.clone();
        let blocking = tokio::task::spawn_blocking(move || agent.invoke(payload, ctx));
        let response = match blocking.await {
            Ok(outcome) => into_response(outcome, &sid),
            Err(join_err) if join_err.is_panic() => {
                panic_response(join_err.into_panic().as_ref(), &sid)
            }
            Err(join_err) => {
                ResultResponse::failure(AgentFault::new("Cancelled", join_err.to_string()))
            }
        };
        finish_round(&mut guard, &response);
        response
    });
    join_round(round, &session_id).await
}

async fn run_async(
    agent: Arc<dyn AsyncAgent>,
    payload: Value,
    ctx: RequestContext,
    mut guard: SessionGuard,
) -> ResultResponse {
    let session_id = ctx.session_id.clone();
    let round = tokio::spawn(async move {
        let sid = ctx.session_id.clone();
        let invocation = AssertUnwindSafe(agent.invoke(payload, ctx));
        let response = match invocation.catch_unwind().await {
            Ok(outcome) => into_response(outcome, &sid),
            Err(panic) => panic_response(panic.as_ref(), &sid),
        };
        finish_round(&mut guard, &response);
        response
    });
    join_round(round, &session_id).await
}

async fn join_round(
    round: tokio::task::JoinHandle<ResultResponse>,
    session_id: &str,
) -> ResultResponse {
    match round.await {
        Ok(response) => response,
        Err(join_err) if join_err.is_panic() => {
            panic_response(join_err.into_panic().as_ref(), session_id)
        }
        Err(join_err) => {
            ResultResponse::failure(AgentFault::new("Cancelled", join_err.to_string()))
        }
    }
}

fn run_streaming(
    agent: Arc<dyn StreamingAgent>,
    payload: Value,
    ctx: RequestContext,
    guard: SessionGuard,
) -> ChunkStream {
    // One slot: the producer suspends until the previous frame is taken.
    let (tx, rx) = mpsc::channel::<ChunkFrame>(1);
    tokio::spawn(produce_chunks(agent, payload, ctx, guard, tx));
    ChunkStream::new(rx)
}

async fn produce_chunks(
    agent: Arc<dyn StreamingAgent>,
    payload: Value,
    ctx: RequestContext,
    mut guard: SessionGuard,
    tx: mpsc::Sender<ChunkFrame>,
) {
    let session_id = ctx.session_id.clone();
    let started = std::panic::catch_unwind(AssertUnwindSafe(|| agent.invoke(payload, ctx)));
    let mut stream = match started {
        Ok(stream) => stream,
        Err(panic) => {
            let fault = AgentFault::from_panic(panic.as_ref());
            warn!(
                session_id = %session_id,
                error = %fault.message,
                "streaming agent panicked before its first chunk"
            );
            let _ = tx.send(ChunkFrame::error(fault.message)).await;
            return;
        }
    };

    let mut text = String::new();
    let mut produced = 0usize;
    loop {
        // A consumer can vanish while the agent is parked between chunks.
        let next = tokio::select! {
            biased;

            _ = tx.closed() => {
                debug!(
                    session_id = %session_id,
                    produced,
                    "consumer went away while the agent was idle, abandoning stream"
                );
                return;
            }
            next = AssertUnwindSafe(stream.next()).catch_unwind() => next,
        };
        match next {
            Ok(Some(Ok(chunk))) => {
                text.push_str(&chunk);
                produced += 1;
                if tx.send(ChunkFrame::content(chunk)).await.is_err() {
                    debug!(
                        session_id = %session_id,
                        produced,
                        "consumer went away, abandoning stream"
                    );
                    return;
                }
            }
            Ok(Some(Err(err))) => {
                let fault = AgentFault::from_error(&err);
                warn!(
                    session_id = %session_id,
                    kind = %fault.kind,
                    error = %fault.message,
                    produced,
                    "streaming agent failed"
                );
                let _ = tx.send(ChunkFrame::error(fault.message)).await;
                return;
            }
            Ok(None) => {
                guard.push(Message::assistant(text));
                debug!(session_id = %session_id, produced, "stream complete");
                let _ = tx.send(ChunkFrame::end()).await;
                return;
            }
            Err(panic) => {
                let fault = AgentFault::from_panic(panic.as_ref());
                warn!(
                    session_id = %session_id,
                    error = %fault.message,
                    produced,
                    "streaming agent panicked"
                );
                let _ = tx.send(ChunkFrame::error(fault.message)).await;
                return;
            }
        }
    }
}

/// Frames produced by a streaming entrypoint.
///
/// Always finite with exactly one terminal frame: if the producer vanishes
/// without one, an `error` frame is synthesized.
pub struct ChunkStream {
    rx: mpsc::Receiver<ChunkFrame>,
    terminated: bool,
}

impl ChunkStream {
    fn new(rx: mpsc::Receiver<ChunkFrame>) -> Self {
        Self {
            rx,
            terminated: false,
        }
    }
}

impl Stream for ChunkStream {
    type Item = ChunkFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.terminated {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(frame)) => {
                if frame.is_terminal() {
                    self.terminated = true;
                }
                Poll::Ready(Some(frame))
            }
            Poll::Ready(None) => {
                self.terminated = true;
                Poll::Ready(Some(ChunkFrame::error(
                    "stream closed before a terminal record",
                )))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
