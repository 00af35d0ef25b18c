use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::Config;

/// Default location of the configuration file (`~/.rustle/config.toml`).
pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Cannot determine home directory")?;
    Ok(home.join(".rustle").join("config.toml"))
}

/// Load configuration from `config_path` (or the default location).
/// A missing file yields the built-in defaults; environment variables
/// `RUSTLE_API_KEY` and `RUSTLE_MODEL` override the provider section.
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let default_path = default_config_path().unwrap_or_else(|_| PathBuf::from("config.toml"));
    let path = config_path.unwrap_or(default_path.as_path());

    let mut config = if path.exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config TOML from {}", path.display()))?
    } else {
        Config::default()
    };

    if let Ok(key) = std::env::var("RUSTLE_API_KEY")
        && !key.is_empty()
    {
        config.provider.api_key = key;
    }
    if let Ok(model) = std::env::var("RUSTLE_MODEL")
        && !model.is_empty()
    {
        config.provider.model = Some(model);
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApprovalMode;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(config.provider.name, "openai");
        assert_eq!(config.agent.approval_mode, ApprovalMode::Suggest);
    }

    #[test]
    fn parses_nested_sandbox_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[provider]
name = "openai"
model = "gpt-4o"

[agent]
approvalMode = "auto-edit"

[agent.sandbox]
allowNetwork = true
maxMemoryMb = 1024
"#,
        )
        .unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.agent.approval_mode, ApprovalMode::AutoEdit);
        assert!(config.agent.sandbox.allow_network);
        assert_eq!(config.agent.sandbox.max_memory_mb, 1024);
        // Untouched fields keep their defaults
        assert_eq!(config.agent.sandbox.max_cpu_time_secs, 30);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "provider = [[[").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
