//! Engine configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.playbook/` in production)
//! and deserializes it into [`EngineConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::Path;

use playbook_types::config::EngineConfig;

/// Shortest per-attempt step timeout accepted from configuration.
const MIN_STEP_TIMEOUT_SECS: u64 = 1;

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config with the step timeout floored.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(mut config) => {
            config.default_step_timeout_secs =
                config.default_step_timeout_secs.max(MIN_STEP_TIMEOUT_SECS);
            config
        }
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

/// Resolve the SQLite URL: the configured one, else `{data_dir}/playbook.db`.
pub fn resolve_database_url(config: &EngineConfig, data_dir: &Path) -> String {
    match &config.database_url {
        Some(url) => url.clone(),
        None => format!("sqlite://{}/playbook.db", data_dir.display()),
    }
}

#[cfg(test)]
mod tests {
    use playbook_types::config::TemplateMode;
    use playbook_types::policy::Environment;
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
template_mode = "strict"
environment = "production"
default_step_timeout_secs = 30
known_connectors = ["github", "acme"]
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.template_mode, TemplateMode::Strict);
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.default_step_timeout_secs, 30);
        assert_eq!(config.known_connectors, vec!["github", "acme"]);
    }

    #[tokio::test]
    async fn invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.template_mode, TemplateMode::Lenient);
        assert_eq!(config.default_step_timeout_secs, 300);
    }

    #[tokio::test]
    async fn zero_timeout_is_floored() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "default_step_timeout_secs = 0")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.default_step_timeout_secs, MIN_STEP_TIMEOUT_SECS);
    }

    #[test]
    fn database_url_prefers_config() {
        let dir = Path::new("/var/lib/playbook");
        let mut config = EngineConfig::default();
        assert_eq!(
            resolve_database_url(&config, dir),
            "sqlite:///var/lib/playbook/playbook.db"
        );

        config.database_url = Some("sqlite::memory:".into());
        assert_eq!(resolve_database_url(&config, dir), "sqlite::memory:");
    }
}
