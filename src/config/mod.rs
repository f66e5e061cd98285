//! Configuration management for MIDI Remote
//!
//! Handles loading, parsing, and hot-reloading of YAML configuration files.
//! Action bindings come from the `midi.actions` map and, optionally, from a
//! Java-style `.properties` file named by `midi.properties_file`.

pub mod properties;
pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::binding::{config_key, CONFIG_KEY_PREFIX};
use crate::table::{BindingSource, ACTION_CATALOGUE};

pub use properties::Properties;
pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub midi: MidiConfig,
}

/// MIDI control configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MidiConfig {
    /// Master switch for MIDI control
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Identity of the device to read actions from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,
    /// Identity of the device to send actions to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,
    /// Properties file with `midi.Action.*` entries, relative to the config file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties_file: Option<PathBuf>,
    /// Action name (or full `midi.Action.*` key) → binding string
    #[serde(default)]
    pub actions: BTreeMap<String, String>,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            input_device: None,
            output_device: None,
            properties_file: None,
            actions: BTreeMap::new(),
        }
    }
}

impl MidiConfig {
    /// Starter bindings: every catalogue action on a channel 1 note from 36 up
    pub fn with_default_actions() -> Self {
        Self {
            actions: ACTION_CATALOGUE
                .iter()
                .enumerate()
                .map(|(i, action)| (action.to_string(), format!("true,NOTE_ON,1,{}", 36 + i)))
                .collect(),
            ..Self::default()
        }
    }

    /// Catalogue action named by an `actions` key, if any
    pub fn action_for_key(key: &str) -> Option<&'static str> {
        let bare = strip_key_prefix(key).unwrap_or(key);
        ACTION_CATALOGUE
            .iter()
            .copied()
            .find(|action| action.eq_ignore_ascii_case(bare))
    }

    /// Fill actions missing from the YAML map with entries from `props`
    pub fn merge_properties(&mut self, props: &Properties) {
        for (key, value) in props.iter() {
            let Some(prefixed) = strip_key_prefix(key) else {
                continue;
            };
            let Some(action) = Self::action_for_key(prefixed) else {
                warn!("Ignoring unknown MIDI action in properties: '{}'", key);
                continue;
            };
            if self.binding_config(&config_key(action)).is_none() {
                debug!("Binding for '{}' taken from properties", action);
                self.actions.insert(action.to_string(), value.to_string());
            }
        }
    }
}

impl BindingSource for MidiConfig {
    fn binding_config(&self, key: &str) -> Option<String> {
        self.actions
            .iter()
            .find(|(k, _)| {
                let bare = strip_key_prefix(k.as_str()).unwrap_or(k.as_str());
                config_key(bare) == key
            })
            .map(|(_, v)| v.clone())
    }
}

/// Key without the `midi.Action.` prefix (prefix matched case-insensitively)
fn strip_key_prefix(key: &str) -> Option<&str> {
    let prefix_len = CONFIG_KEY_PREFIX.len();
    if key.len() > prefix_len
        && key.is_char_boundary(prefix_len)
        && key[..prefix_len].eq_ignore_ascii_case(CONFIG_KEY_PREFIX)
    {
        Some(&key[prefix_len..])
    } else {
        None
    }
}

impl AppConfig {
    /// Load configuration from file with validation.
    ///
    /// A configured properties file is resolved against the config file's
    /// directory and merged in; YAML entries take precedence.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        if let Some(props_path) = &config.midi.properties_file {
            let props_path = match path.parent() {
                Some(dir) if props_path.is_relative() => dir.join(props_path),
                _ => props_path.clone(),
            };
            let props = Properties::load(&props_path).await?;
            config.midi.merge_properties(&props);
        }

        // Validate the loaded configuration
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if let Some(device) = &self.midi.input_device {
            if device.trim().is_empty() {
                anyhow::bail!("MIDI input_device cannot be empty");
            }
        }
        if let Some(device) = &self.midi.output_device {
            if device.trim().is_empty() {
                anyhow::bail!("MIDI output_device cannot be empty");
            }
        }

        let mut seen = std::collections::HashSet::new();
        for key in self.midi.actions.keys() {
            let action = MidiConfig::action_for_key(key)
                .with_context(|| format!("Unknown MIDI action '{}' in midi.actions", key))?;
            if !seen.insert(action) {
                anyhow::bail!("MIDI action '{}' is configured more than once", action);
            }
        }

        Ok(())
    }
}

// Default value functions
fn default_true() -> bool {
    true
}
