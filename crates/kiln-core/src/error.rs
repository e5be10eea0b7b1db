use thiserror::Error;

/// Unified error type for the Kiln runtime and gateway.
///
/// Variants are the error *kinds* callers match on. Local failures
/// (`Timeout`, `Protocol`, `Transport`) are never reported as agent faults
/// and vice versa.
#[derive(Error, Debug)]
pub enum KilnError {
    // ── Registration / startup ─────────────────────────────────
    #[error("configuration error: {0}")]
    Configuration(String),

    // ── Agent faults ───────────────────────────────────────────
    #[error("invocation failed: {kind}: {message}")]
    Invocation { kind: String, message: String },

    // ── Gateway-local ──────────────────────────────────────────
    #[error("no terminal response within {secs}s")]
    Timeout { secs: u64 },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl KilnError {
    /// True for failures raised on the caller's side of the wire rather than
    /// reported by the agent.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            KilnError::Timeout { .. } | KilnError::Protocol(_) | KilnError::Transport(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, KilnError>;

/// A typed fault an agent callable can raise to control the reported
/// `error_type`. Any other error is reported with kind [`AgentFault::DEFAULT_KIND`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct AgentFault {
    pub kind: String,
    pub message: String,
}

impl AgentFault {
    pub const DEFAULT_KIND: &'static str = "AgentError";
    pub const PANIC_KIND: &'static str = "Panic";

    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Classify an arbitrary callable error.
    pub fn from_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<AgentFault>() {
            Some(fault) => fault.clone(),
            None => Self::new(Self::DEFAULT_KIND, format!("{err:#}")),
        }
    }

    /// Describe a panic payload captured at the dispatch boundary.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "agent panicked".to_string()
        };
        Self::new(Self::PANIC_KIND, message)
    }
}

impl From<AgentFault> for KilnError {
    fn from(fault: AgentFault) -> Self {
        KilnError::Invocation {
            kind: fault.kind,
            message: fault.message,
        }
    }
}
