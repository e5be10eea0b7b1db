//! # kiln-server
//!
//! HTTP surface of a Kiln sandbox. Provides:
//!
//! - `POST /invocations`: dispatch to the registered entrypoint, replying with
//!   a JSON result or an SSE chunk stream
//! - `GET /ping`: health probe, served without touching in-flight work
//! - `GET /metrics`: Prometheus text exposition
//! - `GET /sessions/{id}/messages`: session history, for diagnostics

pub mod metrics;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Json, Response, Sse,
        sse::{Event as SseEvent, KeepAlive},
    },
    routing::{get, post},
};
use futures::StreamExt;
use kiln_config::SandboxConfig;
use kiln_core::{ChunkType, HealthStatus, InvocationRequest, KilnError, SESSION_HEADER};
use kiln_runtime::{ChunkStream, DispatchBody, Dispatcher};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::metrics::{InFlight, Metrics};

/// Shared server state.
pub struct AppState {
    pub config: SandboxConfig,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Metrics,
}

impl AppState {
    fn reject(&self, status: StatusCode, message: impl Into<String>) -> ApiError {
        let message = message.into();
        self.metrics.inc_rejected();
        warn!(%status, error = %message, "invocation rejected");
        ApiError { status, message }
    }
}

/// A request refused before it reached the agent.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Build the Axum router.
pub fn build_router(config: SandboxConfig, dispatcher: Arc<Dispatcher>) -> Router {
    let cors = config.cors;
    let state = Arc::new(AppState {
        config,
        dispatcher,
        metrics: Metrics::new(),
    });

    let mut router = Router::new()
        .route("/invocations", post(invocations_handler))
        .route("/ping", get(ping_handler))
        .route("/metrics", get(metrics_handler))
        .route("/sessions/{id}/messages", get(session_messages_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors {
        router = router.layer(CorsLayer::permissive());
    }

    router
}

async fn invocations_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    // Parsed by hand so that malformed bodies (bad base64 included) are a 400.
    let request: InvocationRequest = serde_json::from_slice(&body).map_err(|e| {
        state.reject(
            StatusCode::BAD_REQUEST,
            format!("invalid invocation request: {e}"),
        )
    })?;
    request
        .validate()
        .map_err(|e| state.reject(StatusCode::BAD_REQUEST, e.to_string()))?;

    if let Some(ref expected) = state.config.agent_id {
        if request.agent_id != *expected {
            return Err(state.reject(
                StatusCode::NOT_FOUND,
                format!("unknown agent id '{}'", request.agent_id),
            ));
        }
    }
    if state.dispatcher.registry().kind().is_none() {
        return Err(state.reject(
            StatusCode::SERVICE_UNAVAILABLE,
            "no entrypoint registered",
        ));
    }

    let in_flight = state.metrics.track_in_flight();
    let outcome = state.dispatcher.dispatch(request).await.map_err(|e| {
        let status = match &e {
            KilnError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        state.reject(status, e.to_string())
    })?;
    state.metrics.inc_invocations();

    let mut response = match outcome.body {
        DispatchBody::Result(result) => {
            if !result.is_success() {
                state.metrics.inc_invocation_errors();
            }
            drop(in_flight);
            Json(result).into_response()
        }
        DispatchBody::Stream(frames) => {
            state.metrics.inc_stream_invocations();
            stream_response(&state, frames, in_flight)
        }
    };

    match HeaderValue::from_str(&outcome.session_id) {
        Ok(value) => {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
        Err(_) => {
            warn!(session_id = %outcome.session_id, "session id is not a valid header value");
        }
    }
    Ok(response)
}

/// Encode a chunk stream as Server-Sent Events, one `data:` line per frame.
fn stream_response(state: &AppState, mut frames: ChunkStream, in_flight: InFlight) -> Response {
    let metrics = state.metrics.clone();
    let envelope = state.config.envelope_frames;

    let stream = async_stream::stream! {
        let _in_flight = in_flight;
        while let Some(frame) = frames.next().await {
            metrics.inc_chunks_sent();
            if frame.kind == ChunkType::Error {
                metrics.inc_invocation_errors();
            }
            let data = if envelope {
                frame.to_enveloped()
            } else {
                frame.to_value()
            };
            yield Ok::<_, Infallible>(SseEvent::default().data(data.to_string()));
        }
    };

    let sse = Sse::new(stream);
    match state.config.keep_alive_secs {
        0 => sse.into_response(),
        secs => sse
            .keep_alive(KeepAlive::new().interval(Duration::from_secs(secs)))
            .into_response(),
    }
}

async fn ping_handler(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    state.metrics.inc_pings();
    debug!(in_flight = state.metrics.in_flight(), "health probe");
    Json(state.dispatcher.ping())
}

/// Prometheus-compatible metrics endpoint.
async fn metrics_handler(
    State(state): State<Arc<AppState>>,
) -> (
    StatusCode,
    [(header::HeaderName, &'static str); 1],
    String,
) {
    let sessions = state.dispatcher.sessions().len().await;
    let body = state.metrics.render_prometheus(sessions);
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}

/// Waits for any round in progress on the session before answering.
async fn session_messages_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let messages = state
        .dispatcher
        .sessions()
        .messages(&session_id)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(json!({
        "session_id": session_id,
        "messages": messages,
    })))
}

/// Serve on an already-bound listener until the process is interrupted.
pub async fn serve(
    listener: tokio::net::TcpListener,
    config: SandboxConfig,
    dispatcher: Arc<Dispatcher>,
) -> kiln_core::Result<()> {
    let router = build_router(config, dispatcher);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Start the HTTP server.
pub async fn start_server(
    config: SandboxConfig,
    dispatcher: Arc<Dispatcher>,
) -> kiln_core::Result<()> {
    let listen = config.listen.clone();
    info!(listen = %listen, "starting sandbox server");

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .map_err(|e| KilnError::Configuration(format!("failed to bind {listen}: {e}")))?;

    serve(listener, config, dispatcher).await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "cannot listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
