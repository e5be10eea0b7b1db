//! Chunk framing for streaming responses.
//!
//! A stream is any number of `content` records followed by exactly one
//! terminal record (`end` or `error`). Frames may arrive raw or wrapped one
//! level deep under [`ENVELOPE_KEY`] by transports that nest payloads; the
//! envelope value is either the frame object or its JSON text.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{KilnError, Result};

/// Key under which nesting transports carry a frame.
pub const ENVELOPE_KEY: &str = "chunk";

/// Frame discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Content,
    End,
    Error,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Content => "content",
            ChunkType::End => "end",
            ChunkType::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "content" => Some(ChunkType::Content),
            "end" => Some(ChunkType::End),
            "error" => Some(ChunkType::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChunkType::Content)
    }
}

/// One framed unit of a streaming response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFrame {
    #[serde(default)]
    pub chunk: String,
    #[serde(rename = "type")]
    pub kind: ChunkType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChunkFrame {
    pub fn content(chunk: impl Into<String>) -> Self {
        Self {
            chunk: chunk.into(),
            kind: ChunkType::Content,
            error: None,
        }
    }

    pub fn end() -> Self {
        Self {
            chunk: String::new(),
            kind: ChunkType::End,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            chunk: String::new(),
            kind: ChunkType::Error,
            error: Some(message.into()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// The raw record as JSON.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("chunk".into(), Value::String(self.chunk.clone()));
        map.insert("type".into(), Value::String(self.kind.as_str().into()));
        if let Some(ref err) = self.error {
            map.insert("error".into(), Value::String(err.clone()));
        }
        Value::Object(map)
    }

    /// The record wrapped one level under [`ENVELOPE_KEY`], carried as JSON text.
    pub fn to_enveloped(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            ENVELOPE_KEY.into(),
            Value::String(self.to_value().to_string()),
        );
        Value::Object(map)
    }

    /// Decode a unit received from the wire.
    pub fn decode_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| KilnError::Protocol(format!("frame is not valid JSON: {e}")))?;
        Self::decode(value)
    }

    /// Decode a frame that is either raw or wrapped once in an envelope.
    pub fn decode(value: Value) -> Result<Self> {
        decode_at(value, 0)
    }
}

fn decode_at(value: Value, depth: usize) -> Result<ChunkFrame> {
    match value {
        Value::Object(map) => decode_object(map, depth),
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => decode_object(map, depth),
            _ => Err(KilnError::Protocol(format!(
                "frame text is not a JSON object: {text:?}"
            ))),
        },
        other => Err(KilnError::Protocol(format!(
            "frame must be an object, got {other}"
        ))),
    }
}

fn decode_object(mut map: Map<String, Value>, depth: usize) -> Result<ChunkFrame> {
    if map.contains_key("type") {
        return decode_raw(map);
    }
    match map.remove(ENVELOPE_KEY) {
        Some(inner) if depth == 0 => decode_at(inner, depth + 1),
        Some(_) => Err(KilnError::Protocol(
            "frame is nested more than one envelope deep".into(),
        )),
        None => Err(KilnError::Protocol("frame has no type".into())),
    }
}

fn decode_raw(map: Map<String, Value>) -> Result<ChunkFrame> {
    let kind = match map.get("type") {
        Some(Value::String(raw)) => ChunkType::parse(raw)
            .ok_or_else(|| KilnError::Protocol(format!("unrecognized frame type '{raw}'")))?,
        Some(other) => {
            return Err(KilnError::Protocol(format!(
                "frame type must be a string, got {other}"
            )));
        }
        None => return Err(KilnError::Protocol("frame has no type".into())),
    };
    let chunk = match map.get("chunk") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => {
            return Err(KilnError::Protocol(format!(
                "frame chunk must be a string, got {other}"
            )));
        }
    };
    let error = match map.get("error") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.clone()),
        Some(other) => Some(other.to_string()),
    };
    Ok(ChunkFrame { chunk, kind, error })
}

/// What a consumer should do with a frame given the stream so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sequenced {
    /// A content record at the given position (empty chunks count).
    Content { index: usize, chunk: String },
    /// Successful end of stream.
    End,
    /// The agent reported a fault; end of stream.
    Failed(String),
    /// Received after the terminal record; discard.
    Ignored,
}

/// Tracks one stream's position and enforces first-terminal-wins.
#[derive(Debug, Default, Clone)]
pub struct FrameSequence {
    content_records: usize,
    text: String,
    terminated: bool,
}

impl FrameSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, frame: ChunkFrame) -> Sequenced {
        if self.terminated {
            return Sequenced::Ignored;
        }
        match frame.kind {
            ChunkType::Content => {
                let index = self.content_records;
                self.content_records += 1;
                self.text.push_str(&frame.chunk);
                Sequenced::Content {
                    index,
                    chunk: frame.chunk,
                }
            }
            ChunkType::End => {
                self.terminated = true;
                Sequenced::End
            }
            ChunkType::Error => {
                self.terminated = true;
                Sequenced::Failed(frame.error.unwrap_or_else(|| frame.chunk.clone()))
            }
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn content_records(&self) -> usize {
        self.content_records
    }

    /// Concatenation of every content record accepted so far.
    pub fn text(&self) -> &str {
        &self.text
    }
}
