use serde::{Deserialize, Serialize};

/// Health probe response, polled out-of-band by an orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    #[serde(default)]
    pub features: Vec<String>,
}

impl HealthStatus {
    pub fn healthy(service: impl Into<String>, features: Vec<String>) -> Self {
        Self {
            status: "healthy".into(),
            service: service.into(),
            features,
        }
    }
}
