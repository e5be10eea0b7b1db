use std::path::{Path, PathBuf};
use tracing::{info, warn};

use kiln_core::{KilnError, Result};

use crate::schema::KilnConfig;

/// Loads the Kiln configuration and holds the resolved snapshot.
pub struct ConfigLoader {
    config: KilnConfig,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > KILN_CONFIG env > ~/.kiln/kiln.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("KILN_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".kiln")
            .join("kiln.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::parse_file(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            KilnConfig::default()
        };

        let config = Self::apply_env_overrides(config);
        Self::check(&config)?;

        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn get(&self) -> KilnConfig {
        self.config.clone()
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn parse_file(path: &Path) -> Result<KilnConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<KilnConfig>(&raw).map_err(|e| {
            KilnError::Configuration(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Log warnings, fail on errors.
    fn check(config: &KilnConfig) -> Result<()> {
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
                Ok(())
            }
            Err(e) => Err(KilnError::Configuration(e)),
        }
    }

    /// Apply env var overrides (KILN_LISTEN, KILN_AGENT_ID, etc.)
    fn apply_env_overrides(mut config: KilnConfig) -> KilnConfig {
        if let Ok(v) = std::env::var("KILN_LISTEN") {
            config.sandbox.listen = v;
        }
        if let Ok(v) = std::env::var("KILN_AGENT_ID") {
            config.sandbox.agent_id = Some(v.clone());
            if config.client.agent_id.is_none() {
                config.client.agent_id = Some(v);
            }
        }
        if let Ok(v) = std::env::var("KILN_BASE_URL") {
            config.client.base_url = v;
        }
        if let Ok(v) = std::env::var("KILN_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse::<u64>() {
                config.client.timeout_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("KILN_LOG_LEVEL") {
            config.logging.level = v;
        }
        config
    }
}
