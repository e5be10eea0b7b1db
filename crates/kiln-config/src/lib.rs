//! # kiln-config
//!
//! Configuration for the Kiln sandbox server and client gateway. Reads from
//! `kiln.toml` and environment variables, in that precedence order.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::KilnConfig;
pub use schema::{ClientConfig, ConfigWarning, LoggingConfig, SandboxConfig, WarningSeverity};
