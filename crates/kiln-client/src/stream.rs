//! Decoding of a sandbox's SSE body into chunk frames.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use futures::StreamExt;
use futures::stream::BoxStream;
use kiln_core::{
    AgentFault, ChunkFrame, FrameSequence, KilnError, Result, Sequenced, SessionId,
};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Lazily decoded chunk frames of one streaming invocation.
///
/// Yields content frames followed by exactly one terminal frame, then ends.
/// A local failure (deadline, malformed frame, broken connection) is yielded
/// as a single `Err` and also ends the stream; frames delivered before it
/// remain valid.
pub struct ChunkStream {
    session_id: Option<SessionId>,
    inner: BoxStream<'static, Result<ChunkFrame>>,
}

impl ChunkStream {
    pub(crate) fn from_response(
        response: reqwest::Response,
        session_id: Option<SessionId>,
        deadline: Instant,
        timeout_secs: u64,
    ) -> Self {
        Self {
            session_id,
            inner: Box::pin(decode_frames(response, deadline, timeout_secs)),
        }
    }

    /// Session the sandbox ran this invocation in.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Drain the stream into its concatenated content.
    ///
    /// A terminal `error` frame becomes [`KilnError::Invocation`].
    pub async fn collect_text(mut self) -> Result<String> {
        let mut sequence = FrameSequence::new();
        while let Some(frame) = self.next().await {
            match sequence.accept(frame?) {
                Sequenced::End => return Ok(sequence.text().to_string()),
                Sequenced::Failed(message) => {
                    return Err(KilnError::Invocation {
                        kind: AgentFault::DEFAULT_KIND.to_string(),
                        message,
                    });
                }
                Sequenced::Content { .. } | Sequenced::Ignored => {}
            }
        }
        Err(KilnError::Protocol(
            "stream ended without a terminal record".into(),
        ))
    }
}

impl Stream for ChunkStream {
    type Item = Result<ChunkFrame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// Payload of one SSE line, if it is a `data:` line.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?;
    Some(data.strip_prefix(' ').unwrap_or(data))
}

fn decode_frames(
    response: reqwest::Response,
    deadline: Instant,
    timeout_secs: u64,
) -> impl Stream<Item = Result<ChunkFrame>> + Send + 'static {
    async_stream::stream! {
        let mut body = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut sequence = FrameSequence::new();

        loop {
            let next = match tokio::time::timeout_at(deadline, body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!(
                        secs = timeout_secs,
                        received = sequence.content_records(),
                        "stream deadline elapsed before a terminal record"
                    );
                    yield Err(KilnError::Timeout { secs: timeout_secs });
                    return;
                }
            };

            let bytes = match next {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    yield Err(KilnError::Transport(e.to_string()));
                    return;
                }
                None => {
                    yield Err(KilnError::Protocol(
                        "stream ended without a terminal record".into(),
                    ));
                    return;
                }
            };
            buffer.extend_from_slice(&bytes);

            // Process complete SSE lines
            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = buffer.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim_end_matches(['\r', '\n']);
                let Some(data) = sse_data(line) else {
                    // blank separators, keep-alive comments, event names
                    continue;
                };

                let frame = match ChunkFrame::decode_str(data) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "malformed chunk frame");
                        yield Err(e);
                        return;
                    }
                };

                match sequence.accept(frame.clone()) {
                    Sequenced::Content { .. } => yield Ok(frame),
                    Sequenced::End | Sequenced::Failed(_) => {
                        debug!(received = sequence.content_records(), "stream terminated");
                        yield Ok(frame);
                        return;
                    }
                    Sequenced::Ignored => {}
                }
            }
        }
    }
}
