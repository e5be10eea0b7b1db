//! # kiln-runtime
//!
//! The sandbox side of the invocation protocol: one registered agent
//! entrypoint, the dispatcher that normalizes its three callable shapes into
//! a uniform response, and the per-session conversation store.
//!
//! ## Flow
//!
//! ```text
//!   InvocationRequest
//!          │
//!          ▼
//!   ┌──────────────┐   resolve()   ┌────────────────────┐
//!   │  Dispatcher  │ ────────────▶ │ EntrypointRegistry │
//!   │              │               └────────────────────┘
//!   │ 1. validate  │
//!   │ 2. env merge │   lock(id)    ┌────────────────────┐
//!   │ 3. user turn │ ────────────▶ │    SessionStore    │
//!   │ 4. invoke    │               └────────────────────┘
//!   │ 5. assistant │
//!   └──────┬───────┘
//!          ▼
//!   ResultResponse  |  ChunkStream (content* → end|error)
//! ```

pub mod agent;
pub mod dispatcher;
pub mod env;
pub mod registry;
pub mod session;

pub use agent::{AgentStream, AsyncAgent, HealthProbe, RequestContext, StreamingAgent, SyncAgent};
pub use dispatcher::{ChunkStream, DispatchBody, DispatchOutcome, Dispatcher};
pub use env::SandboxEnv;
pub use registry::{Entrypoint, EntrypointKind, EntrypointRegistry};
pub use session::{Session, SessionGuard, SessionStore};
