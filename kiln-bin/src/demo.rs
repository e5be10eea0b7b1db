//! Built-in echo agents hosted by `kiln serve`.

use std::time::Duration;

use kiln_core::request::user_content;
use kiln_runtime::{AgentStream, Entrypoint, RequestContext};
use serde_json::{Value, json};

/// Answers with the prompt followed by " echoed".
pub fn echo() -> Entrypoint {
    Entrypoint::sync(|payload: Value, ctx: RequestContext| -> anyhow::Result<Value> {
        tracing::debug!(session_id = %ctx.session_id, turns = ctx.history().len(), "echo");
        Ok(json!(format!("{} echoed", user_content(&payload))))
    })
}

/// Streams the prompt back word by word.
pub fn streaming_echo() -> Entrypoint {
    Entrypoint::streaming(|payload: Value, _ctx: RequestContext| -> AgentStream {
        let words: Vec<String> = user_content(&payload)
            .split_inclusive(' ')
            .map(str::to_string)
            .collect();
        Box::pin(futures::stream::unfold(words.into_iter(), |mut words| async move {
            let word = words.next()?;
            tokio::time::sleep(Duration::from_millis(50)).await;
            Some((Ok(word), words))
        }))
    })
}
