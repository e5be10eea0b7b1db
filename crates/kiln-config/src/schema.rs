use serde::{Deserialize, Serialize};

/// Root configuration, maps to `kiln.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KilnConfig {
    pub sandbox: SandboxConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

// ── Sandbox ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// HTTP listen address of the sandbox server.
    pub listen: String,
    /// When set, invocations addressed to any other agent id are rejected.
    pub agent_id: Option<String>,
    /// Service name reported by the default health probe.
    pub service_name: String,
    /// Feature list reported by the default health probe.
    pub features: Vec<String>,
    /// Wrap every streamed frame in the `chunk` envelope.
    pub envelope_frames: bool,
    /// Interval between SSE keep-alive comments. 0 disables them.
    pub keep_alive_secs: u64,
    /// Enable permissive CORS.
    pub cors: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".into(),
            agent_id: None,
            service_name: "kiln-agent".into(),
            features: vec![],
            envelope_frames: false,
            keep_alive_secs: 15,
            cors: false,
        }
    }
}

// ── Client ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the sandbox server, e.g. "http://127.0.0.1:8080".
    pub base_url: String,
    /// Agent id sent when the caller does not name one.
    pub agent_id: Option<String>,
    /// Default deadline for a terminal response, in seconds.
    pub timeout_secs: u64,
    /// TCP connect timeout, in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".into(),
            agent_id: None,
            timeout_secs: 300,
            connect_timeout_secs: 10,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "{}: {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, " ({})", h)?;
        }
        Ok(())
    }
}

impl KilnConfig {
    /// Validate the config and return a list of warnings.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Sandbox ───
        if self.sandbox.listen.is_empty() {
            warnings.push(ConfigWarning {
                field: "sandbox.listen".into(),
                message: "listen address is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. '0.0.0.0:8080'".into()),
            });
        }
        if matches!(self.sandbox.agent_id.as_deref(), Some(id) if id.trim().is_empty()) {
            warnings.push(ConfigWarning {
                field: "sandbox.agent_id".into(),
                message: "agent_id is blank, every invocation would be rejected".into(),
                severity: WarningSeverity::Error,
                hint: Some("Remove the key to accept any agent id".into()),
            });
        }
        if self.sandbox.service_name.is_empty() {
            warnings.push(ConfigWarning {
                field: "sandbox.service_name".into(),
                message: "service name is empty".into(),
                severity: WarningSeverity::Warning,
                hint: Some("The health probe reports this name to the orchestrator".into()),
            });
        }

        // ── Client ───
        let base_url = &self.client.base_url;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            warnings.push(ConfigWarning {
                field: "client.base_url".into(),
                message: format!("base_url '{}' is not an http(s) URL", base_url),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 'http://127.0.0.1:8080'".into()),
            });
        }
        if self.client.timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "client.timeout_secs".into(),
                message: "timeout is 0, every call would time out immediately".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 300".into()),
            });
        } else if self.client.timeout_secs > 3600 {
            warnings.push(ConfigWarning {
                field: "client.timeout_secs".into(),
                message: format!("timeout of {}s is very long", self.client.timeout_secs),
                severity: WarningSeverity::Info,
                hint: None,
            });
        }

        // ── Logging format ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // ── Logging level ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
