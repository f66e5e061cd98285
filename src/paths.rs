//! Application path management.
//!
//! The configuration lives in the platform config directory
//! (`%APPDATA%\midi-remote`, `~/.config/midi-remote`, ...). Debug builds
//! prefer a `config.yaml` in the current working directory so `cargo run`
//! picks up the project's file.

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{AppConfig, MidiConfig};

/// Directory name under the platform config directory
const APP_NAME: &str = "midi-remote";

#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Path to the configuration file
    pub config: PathBuf,
}

impl AppPaths {
    /// Detect the configuration location
    pub fn detect() -> Self {
        #[cfg(debug_assertions)]
        {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            let cwd_config = cwd.join("config.yaml");
            if cwd_config.exists() {
                info!("Using config.yaml from cwd: {}", cwd.display());
                return Self { config: cwd_config };
            }
        }

        let config_dir = dirs::config_dir().unwrap_or_else(|| {
            warn!("No platform config directory, using cwd");
            PathBuf::from(".")
        });

        Self::in_dir(config_dir.join(APP_NAME))
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            config: dir.as_ref().join("config.yaml"),
        }
    }

    /// Get the base directory (for displaying in logs)
    pub fn base_dir(&self) -> PathBuf {
        self.config
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Create the config directory and write a starter config if none exists
    pub async fn ensure_config(&self) -> anyhow::Result<()> {
        let base = self.base_dir();
        if !base.exists() {
            debug!("Creating config directory: {}", base.display());
            tokio::fs::create_dir_all(&base)
                .await
                .with_context(|| format!("Failed to create {}", base.display()))?;
        }

        if !self.config.exists() {
            info!("No config found, writing starter config to {}", self.config.display());
            let starter = AppConfig {
                midi: MidiConfig::with_default_actions(),
            };
            starter.save(&self.config).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_app_paths_structure() {
        let paths = AppPaths::in_dir("test");
        assert_eq!(paths.config, PathBuf::from("test/config.yaml"));
        assert_eq!(paths.base_dir(), PathBuf::from("test"));
    }

    #[test]
    fn test_detect_names_config_file() {
        let paths = AppPaths::detect();
        assert_eq!(paths.config.file_name().and_then(|n| n.to_str()), Some("config.yaml"));
    }

    #[tokio::test]
    async fn test_ensure_config_writes_loadable_starter() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let paths = AppPaths::in_dir(temp_dir.path().join("nested"));

        paths.ensure_config().await?;
        let config = AppConfig::load(&paths.config).await?;
        assert_eq!(config.midi.actions.len(), crate::table::ACTION_CATALOGUE.len());

        // An existing config is left alone
        std::fs::write(&paths.config, "midi:\n  enabled: false\n")?;
        paths.ensure_config().await?;
        assert!(!AppConfig::load(&paths.config).await?.midi.enabled);
        Ok(())
    }
}
