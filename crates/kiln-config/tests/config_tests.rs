#[cfg(test)]
mod tests {
    use kiln_config::ConfigLoader;
    use kiln_config::schema::*;
    use kiln_core::KilnError;
    use std::io::Write;

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_sandbox_config_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.listen, "0.0.0.0:8080");
        assert!(config.agent_id.is_none());
        assert_eq!(config.service_name, "kiln-agent");
        assert!(config.features.is_empty());
        assert!(!config.envelope_frames);
        assert_eq!(config.keep_alive_secs, 15);
    }

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "http://127.0.0.1:8080");
        assert_eq!(config.timeout_secs, 300);
        assert_eq!(config.connect_timeout_secs, 10);
    }

    #[test]
    fn test_logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, "pretty");
    }

    #[test]
    fn test_default_config_is_valid() {
        let warnings = KilnConfig::default().validate().unwrap();
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    }

    // ── TOML tests ─────────────────────────────────────────────

    #[test]
    fn test_config_toml_roundtrip() {
        let config = KilnConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let restored: KilnConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(restored.sandbox.listen, config.sandbox.listen);
        assert_eq!(restored.client.base_url, config.client.base_url);
    }

    #[test]
    fn test_partial_toml_applies_defaults() {
        let toml_str = r#"
[sandbox]
service_name = "AutoGen Agent"
features = ["weather", "streaming", "multi-turn"]

[client]
timeout_secs = 60
"#;
        let config: KilnConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sandbox.service_name, "AutoGen Agent");
        assert_eq!(config.sandbox.features.len(), 3);
        assert_eq!(config.client.timeout_secs, 60);
        // Defaults should fill in
        assert_eq!(config.sandbox.listen, "0.0.0.0:8080");
        assert_eq!(config.client.base_url, "http://127.0.0.1:8080");
        assert_eq!(config.logging.level, "info");
    }

    // ── Validation tests ───────────────────────────────────────

    #[test]
    fn test_validate_rejects_empty_listen() {
        let mut config = KilnConfig::default();
        config.sandbox.listen = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.contains("sandbox.listen"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = KilnConfig::default();
        config.client.timeout_secs = 0;
        assert!(config.validate().unwrap_err().contains("client.timeout_secs"));
    }

    #[test]
    fn test_validate_rejects_non_http_base_url() {
        let mut config = KilnConfig::default();
        config.client.base_url = "ftp://sandbox".into();
        assert!(config.validate().unwrap_err().contains("client.base_url"));
    }

    #[test]
    fn test_validate_rejects_blank_agent_id() {
        let mut config = KilnConfig::default();
        config.sandbox.agent_id = Some("  ".into());
        assert!(config.validate().unwrap_err().contains("sandbox.agent_id"));
    }

    #[test]
    fn test_validate_warns_on_unknown_log_format() {
        let mut config = KilnConfig::default();
        config.logging.format = "xml".into();
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, WarningSeverity::Warning);
        assert!(warnings[0].to_string().contains("logging.format"));
    }

    // ── ConfigLoader tests ─────────────────────────────────────

    #[test]
    fn test_config_loader_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("kiln.toml");
        let mut f = std::fs::File::create(&config_path).unwrap();
        writeln!(
            f,
            r#"
[sandbox]
listen = "127.0.0.1:9090"
agent_id = "agent-42"
envelope_frames = true

[logging]
format = "json"
"#
        )
        .unwrap();

        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        let config = loader.get();
        assert_eq!(config.sandbox.listen, "127.0.0.1:9090");
        assert_eq!(config.sandbox.agent_id.as_deref(), Some("agent-42"));
        assert!(config.sandbox.envelope_frames);
        assert_eq!(config.logging.format, "json");
        assert_eq!(loader.path(), config_path.as_path());
    }

    #[test]
    fn test_config_loader_invalid_toml_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("kiln.toml");
        std::fs::write(&config_path, "[sandbox\nlisten = ").unwrap();

        let err = ConfigLoader::load(Some(config_path.as_path())).err().unwrap();
        assert!(matches!(err, KilnError::Configuration(_)));
    }

    #[test]
    fn test_config_loader_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("kiln.toml");
        std::fs::write(&config_path, "[client]\ntimeout_secs = 0\n").unwrap();

        let err = ConfigLoader::load(Some(config_path.as_path())).err().unwrap();
        assert!(matches!(err, KilnError::Configuration(_)));
    }

    // ── JSON roundtrip ─────────────────────────────────────────

    #[test]
    fn test_config_json_roundtrip() {
        let config = KilnConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let restored: KilnConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.sandbox.service_name, config.sandbox.service_name);
    }
}
