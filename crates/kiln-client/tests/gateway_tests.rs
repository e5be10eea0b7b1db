//! Gateway tests against real loopback sandboxes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use kiln_client::{AgentRuntimeClient, InvocationBody};
use kiln_config::SandboxConfig;
use kiln_core::{ChunkFrame, InvocationRequest, KilnError};
use kiln_runtime::{Dispatcher, Entrypoint, EntrypointRegistry, RequestContext};
use serde_json::{Value, json};

fn echo_sync() -> Entrypoint {
    Entrypoint::sync(|payload: Value, _ctx: RequestContext| -> anyhow::Result<Value> {
        match payload["prompt"].as_str() {
            Some("fail") => anyhow::bail!("asked to fail"),
            Some(prompt) => Ok(json!(format!("{prompt} echoed"))),
            None => Ok(payload),
        }
    })
}

fn echo_streaming() -> Entrypoint {
    Entrypoint::streaming(|payload: Value, _ctx: RequestContext| {
        let prompt = payload["prompt"].as_str().unwrap_or_default().to_string();
        let split = prompt.len().min(2);
        let parts = vec![prompt[..split].to_string(), prompt[split..].to_string()];
        futures::stream::iter(parts.into_iter().map(Ok::<_, anyhow::Error>))
    })
}

/// Start a sandbox server on an ephemeral port and return its base URL.
async fn spawn_sandbox_with(entrypoint: Entrypoint, config: SandboxConfig) -> String {
    let registry = EntrypointRegistry::new("gateway-test", vec!["echo".into()]);
    registry.register_entrypoint(entrypoint).unwrap();
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(registry)));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(kiln_server::serve(listener, config, dispatcher));
    format!("http://{addr}")
}

async fn spawn_sandbox(entrypoint: Entrypoint) -> String {
    spawn_sandbox_with(entrypoint, SandboxConfig::default()).await
}

/// Start a server whose `/invocations` replies with a fixed SSE body.
async fn spawn_raw_stream(body: &'static str) -> String {
    let app = axum::Router::new().route(
        "/invocations",
        axum::routing::post(move || async move {
            (
                [(axum::http::header::CONTENT_TYPE, "text/event-stream")],
                body,
            )
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    format!("http://{addr}")
}

fn prompt(text: &str) -> InvocationRequest {
    InvocationRequest::json("agent-1", &json!({ "prompt": text }))
}

async fn drain(client: &AgentRuntimeClient, req: InvocationRequest) -> Vec<kiln_core::Result<ChunkFrame>> {
    match client.invoke(req).await.unwrap().body {
        InvocationBody::Stream(stream) => stream.collect().await,
        InvocationBody::Result(_) => panic!("expected a chunk stream"),
    }
}

// ── Result replies ─────────────────────────────────────────────

#[tokio::test]
async fn test_result_reply() {
    let client = AgentRuntimeClient::new(spawn_sandbox(echo_sync()).await).unwrap();
    let invocation = client.invoke(prompt("Hello").with_session("S-1")).await.unwrap();
    assert_eq!(invocation.session_id.as_deref(), Some("S-1"));
    let InvocationBody::Result(response) = invocation.body else {
        panic!("expected a single result");
    };
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({"result": "Hello echoed", "status": "success"})
    );
}

#[tokio::test]
async fn test_invoke_text_result() {
    let client = AgentRuntimeClient::new(spawn_sandbox(echo_sync()).await).unwrap();
    let text = client.invoke_text(prompt("Hello")).await.unwrap();
    assert_eq!(text, "Hello echoed");
}

#[tokio::test]
async fn test_agent_fault_is_remote_error() {
    let client = AgentRuntimeClient::new(spawn_sandbox(echo_sync()).await).unwrap();
    let err = client.invoke_text(prompt("fail")).await.unwrap_err();
    match &err {
        KilnError::Invocation { kind, message } => {
            assert_eq!(kind, "AgentError");
            assert_eq!(message, "asked to fail");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!err.is_local());
}

// ── Stream replies ─────────────────────────────────────────────

#[tokio::test]
async fn test_stream_reply() {
    let client = AgentRuntimeClient::new(spawn_sandbox(echo_streaming()).await).unwrap();
    let frames: Vec<ChunkFrame> = drain(&client, prompt("Hello"))
        .await
        .into_iter()
        .map(|f| f.unwrap())
        .collect();
    assert_eq!(
        frames,
        vec![
            ChunkFrame::content("He"),
            ChunkFrame::content("llo"),
            ChunkFrame::end(),
        ]
    );
}

#[tokio::test]
async fn test_shared_session_across_calls() {
    let base = spawn_sandbox(echo_streaming()).await;
    let client = AgentRuntimeClient::new(base.clone()).unwrap();

    let first = client
        .invoke_text(prompt("first").with_session("S"))
        .await
        .unwrap();
    assert_eq!(first, "first");
    let second = client
        .invoke_text(prompt("second").with_session("S"))
        .await
        .unwrap();
    assert_eq!(second, "second");

    let history: Value = reqwest::Client::new()
        .get(format!("{base}/sessions/S/messages"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0]["content"], "first");
}

#[tokio::test]
async fn test_stream_error_frame() {
    let client = AgentRuntimeClient::new(
        spawn_sandbox(Entrypoint::streaming(|_p: Value, _c: RequestContext| {
            stream_of(vec![Ok("partial".into()), Err(anyhow::anyhow!("overloaded"))])
        }))
        .await,
    )
    .unwrap();

    let frames = drain(&client, prompt("hi")).await;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].as_ref().unwrap(), &ChunkFrame::content("partial"));
    assert_eq!(frames[1].as_ref().unwrap(), &ChunkFrame::error("overloaded"));

    let err = client.invoke_text(prompt("hi")).await.unwrap_err();
    assert!(matches!(err, KilnError::Invocation { ref message, .. } if message == "overloaded"));
}

fn stream_of(
    items: Vec<anyhow::Result<String>>,
) -> impl futures::Stream<Item = anyhow::Result<String>> + Send + 'static {
    futures::stream::iter(items)
}

#[tokio::test]
async fn test_enveloped_frames_are_unwrapped() {
    let config = SandboxConfig {
        envelope_frames: true,
        ..Default::default()
    };
    let client =
        AgentRuntimeClient::new(spawn_sandbox_with(echo_streaming(), config).await).unwrap();
    let text = client.invoke_text(prompt("Hello")).await.unwrap();
    assert_eq!(text, "Hello");
}

// ── Deadlines ──────────────────────────────────────────────────

#[tokio::test]
async fn test_result_timeout() {
    let client = AgentRuntimeClient::new(
        spawn_sandbox(Entrypoint::asynchronous(
            |_p: Value, _c: RequestContext| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                anyhow::Ok(Value::Null)
            },
        ))
        .await,
    )
    .unwrap();

    let started = Instant::now();
    let err = client
        .invoke(prompt("hi").with_timeout(1))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, KilnError::Timeout { secs: 1 }));
    assert!(err.is_local());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_stream_timeout_keeps_delivered_chunks() {
    let client = AgentRuntimeClient::new(
        spawn_sandbox(Entrypoint::streaming(|_p: Value, _c: RequestContext| {
            futures::stream::iter(vec![Ok::<_, anyhow::Error>("first".to_string())]).chain(
                futures::stream::pending(),
            )
        }))
        .await,
    )
    .unwrap();

    let started = Instant::now();
    let frames = drain(&client, prompt("hi").with_timeout(1)).await;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].as_ref().unwrap(), &ChunkFrame::content("first"));
    assert!(matches!(frames[1], Err(KilnError::Timeout { secs: 1 })));
    assert!(started.elapsed() < Duration::from_secs(5));
}

// ── Framing ────────────────────────────────────────────────────

#[tokio::test]
async fn test_records_after_terminal_are_ignored() {
    let base = spawn_raw_stream(concat!(
        "data: {\"chunk\":\"a\",\"type\":\"content\"}\n\n",
        "data: {\"chunk\":\"\",\"type\":\"end\"}\n\n",
        "data: {\"chunk\":\"late\",\"type\":\"content\"}\n\n",
        "data: {\"chunk\":\"\",\"type\":\"error\",\"error\":\"late\"}\n\n",
    ))
    .await;
    let client = AgentRuntimeClient::new(base).unwrap();
    let frames: Vec<ChunkFrame> = drain(&client, prompt("hi"))
        .await
        .into_iter()
        .map(|f| f.unwrap())
        .collect();
    assert_eq!(frames, vec![ChunkFrame::content("a"), ChunkFrame::end()]);
}

#[tokio::test]
async fn test_raw_and_enveloped_frames_mix() {
    let base = spawn_raw_stream(concat!(
        "data: {\"chunk\":\"{\\\"chunk\\\":\\\"x\\\",\\\"type\\\":\\\"content\\\"}\"}\n\n",
        "data: {\"chunk\":{\"chunk\":\"y\",\"type\":\"content\"}}\n\n",
        ": keep-alive\n\n",
        "data: {\"chunk\":\"\",\"type\":\"end\"}\n\n",
    ))
    .await;
    let client = AgentRuntimeClient::new(base).unwrap();
    assert_eq!(client.invoke_text(prompt("hi")).await.unwrap(), "xy");
}

#[tokio::test]
async fn test_double_envelope_is_protocol_error() {
    let base = spawn_raw_stream(concat!(
        "data: {\"chunk\":{\"chunk\":{\"chunk\":\"x\",\"type\":\"content\"}}}\n\n",
        "data: {\"chunk\":\"\",\"type\":\"end\"}\n\n",
    ))
    .await;
    let client = AgentRuntimeClient::new(base).unwrap();
    let frames = drain(&client, prompt("hi")).await;
    assert_eq!(frames.len(), 1);
    assert!(matches!(frames[0], Err(KilnError::Protocol(_))));
}

#[tokio::test]
async fn test_unknown_type_is_protocol_error() {
    let base = spawn_raw_stream("data: {\"chunk\":\"x\",\"type\":\"delta\"}\n\n").await;
    let client = AgentRuntimeClient::new(base).unwrap();
    let err = client.invoke_text(prompt("hi")).await.unwrap_err();
    assert!(matches!(err, KilnError::Protocol(_)));
    assert!(err.is_local());
}

#[tokio::test]
async fn test_missing_terminal_is_protocol_error() {
    let base = spawn_raw_stream("data: {\"chunk\":\"x\",\"type\":\"content\"}\n\n").await;
    let client = AgentRuntimeClient::new(base).unwrap();
    let frames = drain(&client, prompt("hi")).await;
    assert_eq!(frames.len(), 2);
    assert!(frames[0].is_ok());
    assert!(matches!(frames[1], Err(KilnError::Protocol(_))));
}

// ── Environment, health, transport ─────────────────────────────

#[tokio::test]
async fn test_env_vars_reach_agent() {
    let client = AgentRuntimeClient::new(
        spawn_sandbox(Entrypoint::sync(
            |_p: Value, ctx: RequestContext| -> anyhow::Result<Value> {
                Ok(json!(ctx.env("KILN_GATEWAY_TEST_KEY").unwrap_or_default()))
            },
        ))
        .await,
    )
    .unwrap();
    let text = client
        .invoke_text(prompt("hi").with_env("KILN_GATEWAY_TEST_KEY", "k-123"))
        .await
        .unwrap();
    assert_eq!(text, "k-123");
}

#[tokio::test]
async fn test_ping() {
    let client = AgentRuntimeClient::new(spawn_sandbox(echo_sync()).await).unwrap();
    let first = client.ping().await.unwrap();
    let second = client.ping().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.status, "healthy");
    assert_eq!(first.service, "gateway-test");
}

#[tokio::test]
async fn test_ping_while_invocation_blocks() {
    let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let release_rx = std::sync::Mutex::new(release_rx);

    // Blocks its thread until released, like a CPU-bound or blocking agent.
    let agent = Entrypoint::sync(move |_p: Value, _c: RequestContext| -> anyhow::Result<Value> {
        let _ = started_tx.send(());
        let _ = release_rx.lock().unwrap().recv();
        Ok(json!("done"))
    });
    let client = AgentRuntimeClient::new(spawn_sandbox(agent).await).unwrap();

    let invoking = client.clone();
    let call = tokio::spawn(async move { invoking.invoke_text(prompt("slow")).await });
    started_rx.recv().await.unwrap();

    let status = tokio::time::timeout(Duration::from_secs(2), client.ping())
        .await
        .expect("health probe should not wait on the invocation")
        .unwrap();
    assert_eq!(status.status, "healthy");
    assert!(!call.is_finished());

    release_tx.send(()).unwrap();
    assert_eq!(call.await.unwrap().unwrap(), "done");
}

#[tokio::test]
async fn test_rejected_request_is_transport_error() {
    let config = SandboxConfig {
        agent_id: Some("agent-1".into()),
        ..Default::default()
    };
    let client = AgentRuntimeClient::new(spawn_sandbox_with(echo_sync(), config).await).unwrap();
    let req = InvocationRequest::json("someone-else", &json!({"prompt": "hi"}));
    let err = client.invoke(req).await.err().unwrap();
    assert!(matches!(err, KilnError::Transport(ref m) if m.contains("404")));
}

#[tokio::test]
async fn test_missing_agent_id_fails_before_sending() {
    let client = AgentRuntimeClient::new("http://127.0.0.1:9").unwrap();
    assert!(matches!(
        client.request(&json!({"prompt": "hi"})),
        Err(KilnError::Configuration(_))
    ));
    let err = client
        .invoke(InvocationRequest::json("", &json!({})))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, KilnError::Configuration(_)));
}
