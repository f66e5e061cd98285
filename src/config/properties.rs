//! Java-style `.properties` files
//!
//! Presentation applications persist their MIDI bindings as
//! `midi.Action.<action>=<binding>` lines in a properties file. This module
//! reads such files as a binding source and writes exported bindings back
//! without disturbing unrelated lines.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

use crate::table::BindingSource;

/// Ordered key/value entries of a properties file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: Vec<(String, String)>,
}

impl Properties {
    /// Parse `key=value` lines.
    ///
    /// Blank lines and lines starting with `#` or `!` are skipped. The first
    /// `=` splits key from value; both are trimmed. A later duplicate key
    /// overrides an earlier one.
    pub fn parse(text: &str) -> Self {
        let mut props = Self::default();
        for line in text.lines() {
            if let Some((key, value)) = split_entry(line) {
                props.set(key, value);
            }
        }
        props
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read properties file: {}", path.display()))?;
        let props = Self::parse(&text);
        debug!("Loaded {} properties from {}", props.len(), path.display());
        Ok(props)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite `existing` with `updates` applied.
    ///
    /// Lines whose key is updated are replaced in place; comments and other
    /// keys are kept verbatim. Keys not present yet are appended.
    pub fn merge_into(existing: &str, updates: &[(String, String)]) -> String {
        let mut written = HashSet::new();
        let mut out = String::with_capacity(existing.len());

        for line in existing.lines() {
            let update = split_entry(line)
                .and_then(|(key, _)| updates.iter().find(|(k, _)| k == key));
            match update {
                Some((key, value)) => {
                    out.push_str(&format!("{}={}", key, value));
                    written.insert(key.as_str());
                }
                None => out.push_str(line),
            }
            out.push('\n');
        }

        for (key, value) in updates {
            if written.insert(key.as_str()) {
                out.push_str(&format!("{}={}\n", key, value));
            }
        }
        out
    }

    /// Apply `updates` to the file at `path`, creating it if needed
    pub async fn export(path: impl AsRef<Path>, updates: &[(String, String)]) -> Result<()> {
        let path = path.as_ref();
        let existing = match fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read properties file: {}", path.display()))
            }
        };

        fs::write(path, Self::merge_into(&existing, updates))
            .await
            .with_context(|| format!("Failed to write properties file: {}", path.display()))?;

        info!("Exported {} MIDI bindings to {}", updates.len(), path.display());
        Ok(())
    }
}

impl BindingSource for Properties {
    fn binding_config(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_string)
    }
}

fn split_entry(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
        return None;
    }
    let (key, value) = trimmed.split_once('=')?;
    Some((key.trim(), value.trim()))
}
