//! # kiln-core
//!
//! Core types, wire records, and error types for the Kiln sandbox runtime.
//! This crate defines the shared vocabulary used by the sandbox side
//! (registry, dispatcher, server) and the client gateway.

pub mod error;
pub mod frame;
pub mod health;
pub mod message;
pub mod request;
pub mod response;

pub use error::{AgentFault, KilnError, Result};
pub use frame::{ChunkFrame, ChunkType, ENVELOPE_KEY, FrameSequence, Sequenced};
pub use health::HealthStatus;
pub use message::{Message, Role};
pub use request::{InvocationRequest, SESSION_HEADER, SessionId};
pub use response::{ResultResponse, ResultStatus};
