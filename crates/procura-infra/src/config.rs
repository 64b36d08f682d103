//! Engine configuration loader.
//!
//! Reads `{data_dir}/config.toml` into `EngineConfig`. A missing or malformed
//! file is not an error: the engine falls back to defaults and logs why.

use std::path::{Path, PathBuf};

use procura_types::config::EngineConfig;

/// Load `config.toml` from the data directory.
///
/// Returns `EngineConfig::default()` if the file is missing or cannot be parsed.
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

    let config = match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            return EngineConfig::default();
        }
    };

    if config.purchase_order.l1_limit >= config.purchase_order.l2_limit {
        tracing::warn!(
            l1_limit = config.purchase_order.l1_limit,
            l2_limit = config.purchase_order.l2_limit,
            "purchase order L1 limit is not below L2 limit; L2 tier is unreachable"
        );
    }

    config
}

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `PROCURA_DATA_DIR` environment variable
/// 2. `~/.procura`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PROCURA_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".procura");
    }

    // Last resort: current directory
    PathBuf::from(".procura")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.engine.max_steps_per_call, 64);
        assert_eq!(
            config.vendor_onboarding.departments,
            vec!["finance", "legal", "business"]
        );
        assert_eq!(config.server.port, 3000);
    }

    #[tokio::test]
    async fn load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
[engine]
node_timeout_secs = 5

[vendor_onboarding]
departments = ["finance", "security"]

[purchase_order]
l1_limit = 50000.0
l2_limit = 500000.0

[telemetry]
otel = true
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.engine.node_timeout_secs, 5);
        assert_eq!(config.engine.max_steps_per_call, 64);
        assert_eq!(config.vendor_onboarding.departments, vec!["finance", "security"]);
        assert_eq!(config.vendor_onboarding.required_fields, vec!["name", "taxId"]);
        assert_eq!(config.purchase_order.l1_limit, 50_000.0);
        assert!(config.telemetry.otel);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[tokio::test]
    async fn load_engine_config_malformed_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "[engine\nmax_steps_per_call = ")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.engine.max_steps_per_call, 64);
        assert_eq!(config.purchase_order.l2_limit, 1_000_000.0);
    }

    #[tokio::test]
    async fn load_engine_config_wrong_type_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            "[engine]\nmax_steps_per_call = \"lots\"\n",
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.engine.max_steps_per_call, 64);
    }

    #[test]
    fn resolve_data_dir_is_not_empty() {
        let dir = resolve_data_dir();
        assert!(!dir.as_os_str().is_empty());
    }
}
