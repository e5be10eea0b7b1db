use std::sync::{Arc, OnceLock};

use kiln_core::{HealthStatus, KilnError, Result};
use serde::Serialize;
use tracing::info;

use crate::agent::{AsyncAgent, HealthProbe, StreamingAgent, SyncAgent};

/// How the dispatcher drives an entrypoint. Fixed at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrypointKind {
    Sync,
    Async,
    StreamingGenerator,
}

/// A registered agent callable, tagged with its shape.
#[derive(Clone)]
pub enum Entrypoint {
    Sync(Arc<dyn SyncAgent>),
    Async(Arc<dyn AsyncAgent>),
    Streaming(Arc<dyn StreamingAgent>),
}

impl Entrypoint {
    pub fn sync(agent: impl SyncAgent) -> Self {
        Entrypoint::Sync(Arc::new(agent))
    }

    pub fn asynchronous(agent: impl AsyncAgent) -> Self {
        Entrypoint::Async(Arc::new(agent))
    }

    pub fn streaming(agent: impl StreamingAgent) -> Self {
        Entrypoint::Streaming(Arc::new(agent))
    }

    pub fn kind(&self) -> EntrypointKind {
        match self {
            Entrypoint::Sync(_) => EntrypointKind::Sync,
            Entrypoint::Async(_) => EntrypointKind::Async,
            Entrypoint::Streaming(_) => EntrypointKind::StreamingGenerator,
        }
    }
}

impl std::fmt::Debug for Entrypoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Entrypoint").field(&self.kind()).finish()
    }
}

/// Holds the sandbox's single entrypoint and optional health probe.
///
/// Both slots are write-once. Reads never take a lock, so health probes are
/// served independently of in-flight invocations.
pub struct EntrypointRegistry {
    entrypoint: OnceLock<Entrypoint>,
    ping: OnceLock<Arc<dyn HealthProbe>>,
    default_health: HealthStatus,
}

impl EntrypointRegistry {
    /// `service` and `features` describe the sandbox when no probe is registered.
    pub fn new(service: impl Into<String>, features: Vec<String>) -> Self {
        Self {
            entrypoint: OnceLock::new(),
            ping: OnceLock::new(),
            default_health: HealthStatus::healthy(service, features),
        }
    }

    pub fn register_entrypoint(&self, entrypoint: Entrypoint) -> Result<()> {
        let kind = entrypoint.kind();
        self.entrypoint.set(entrypoint).map_err(|_| {
            KilnError::Configuration("an entrypoint is already registered".into())
        })?;
        info!(?kind, "entrypoint registered");
        Ok(())
    }

    pub fn register_ping(&self, probe: impl HealthProbe) -> Result<()> {
        self.ping
            .set(Arc::new(probe))
            .map_err(|_| KilnError::Configuration("a health probe is already registered".into()))
    }

    pub fn resolve(&self) -> Result<(Entrypoint, EntrypointKind)> {
        let entrypoint = self
            .entrypoint
            .get()
            .ok_or_else(|| KilnError::Configuration("no entrypoint registered".into()))?;
        Ok((entrypoint.clone(), entrypoint.kind()))
    }

    pub fn kind(&self) -> Option<EntrypointKind> {
        self.entrypoint.get().map(Entrypoint::kind)
    }

    pub fn ping(&self) -> HealthStatus {
        match self.ping.get() {
            Some(probe) => probe.probe(),
            None => self.default_health.clone(),
        }
    }
}

impl Default for EntrypointRegistry {
    fn default() -> Self {
        Self::new("kiln-agent", vec![])
    }
}
