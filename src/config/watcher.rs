//! Hot reload of the configuration file.
//!
//! The parent directory is watched rather than the file, so editors that
//! save by writing a temporary file and renaming it over the original keep
//! being picked up. Events for other files in the directory are ignored and
//! a burst of events for the config file collapses into a single reload.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Quiet period after the last event before the file is re-read
const SETTLE: Duration = Duration::from_millis(100);

/// Watches the config file and yields each successfully reloaded config
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Load the config at `config_path` and start watching it
    pub async fn new(config_path: impl Into<PathBuf>) -> Result<(Self, AppConfig)> {
        let config_path = config_path.into();
        let initial_config = AppConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;

        let file_name = config_path
            .file_name()
            .map(OsString::from)
            .with_context(|| format!("Config path has no file name: {}", config_path.display()))?;
        let dir = match config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        // notify calls back on its own thread; the unbounded sender is sync
        let (event_tx, event_rx) = mpsc::unbounded_channel::<()>();
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) if touches(&event, &file_name) => {
                    debug!("Config file event: {:?}", event.kind);
                    let _ = event_tx.send(());
                }
                Ok(_) => {}
                Err(e) => error!("Watch error: {}", e),
            }
        })?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config directory: {}", dir.display()))?;

        let (tx, rx) = mpsc::channel(10);
        tokio::spawn(reload_loop(config_path.clone(), event_rx, tx));

        info!("Config file watcher started for: {}", config_path.display());

        Ok((
            Self {
                _watcher: watcher,
                rx,
            },
            initial_config,
        ))
    }

    /// Wait for the next config update.
    /// Returns None if the watcher has been closed.
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}

fn touches(event: &Event, file_name: &OsString) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

/// Re-read the file once per burst of events. Ends when the watcher is
/// dropped or nobody listens for updates.
async fn reload_loop(
    config_path: PathBuf,
    mut events: mpsc::UnboundedReceiver<()>,
    tx: mpsc::Sender<AppConfig>,
) {
    while events.recv().await.is_some() {
        loop {
            match tokio::time::timeout(SETTLE, events.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        if let Some(config) = reload(&config_path).await {
            if tx.send(config).await.is_err() {
                debug!("Config listener gone, stopping reloads");
                return;
            }
        }
    }
}

async fn reload(config_path: &Path) -> Option<AppConfig> {
    match AppConfig::load(config_path).await {
        Ok(config) => {
            info!("Configuration reloaded successfully");
            Some(config)
        }
        Err(e) => {
            warn!("Failed to reload config (keeping old config): {:#}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config_text(device: &str, note: u8) -> String {
        format!(
            "midi:\n  input_device: \"{}\"\n  actions:\n    play: \"true,NOTE_ON,1,{}\"\n",
            device, note
        )
    }

    #[tokio::test]
    async fn test_config_watcher_reloads() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("test-config.yaml");
        fs::write(&config_path, config_text("Pad", 60))?;

        let (mut watcher, config) = ConfigWatcher::new(&config_path).await?;
        assert_eq!(config.midi.input_device.as_deref(), Some("Pad"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&config_path, config_text("Keys", 61))?;

        let new_config = tokio::time::timeout(Duration::from_secs(2), watcher.next_config())
            .await?
            .context("watcher closed")?;
        assert_eq!(new_config.midi.input_device.as_deref(), Some("Keys"));
        assert_eq!(
            new_config.midi.actions.get("play").map(String::as_str),
            Some("true,NOTE_ON,1,61")
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_burst_of_writes_reloads_once() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, config_text("Pad", 60))?;

        let (mut watcher, _config) = ConfigWatcher::new(&config_path).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;

        for note in 61..=65 {
            fs::write(&config_path, config_text("Keys", note))?;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let new_config = tokio::time::timeout(Duration::from_secs(2), watcher.next_config())
            .await?
            .context("watcher closed")?;
        assert_eq!(
            new_config.midi.actions.get("play").map(String::as_str),
            Some("true,NOTE_ON,1,65")
        );

        // Nothing further is queued for the same burst
        let again = tokio::time::timeout(Duration::from_millis(400), watcher.next_config()).await;
        assert!(again.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_rename_over_config_is_picked_up() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, config_text("Pad", 60))?;

        let (mut watcher, _config) = ConfigWatcher::new(&config_path).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let staged = temp_dir.path().join("config.yaml.tmp");
        fs::write(&staged, config_text("Surface", 70))?;
        fs::rename(&staged, &config_path)?;

        let new_config = tokio::time::timeout(Duration::from_secs(2), watcher.next_config())
            .await?
            .context("watcher closed")?;
        assert_eq!(new_config.midi.input_device.as_deref(), Some("Surface"));

        Ok(())
    }

    #[tokio::test]
    async fn test_other_files_are_ignored() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, config_text("Pad", 60))?;

        let (mut watcher, _config) = ConfigWatcher::new(&config_path).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;

        fs::write(temp_dir.path().join("notes.txt"), "unrelated")?;

        let update = tokio::time::timeout(Duration::from_millis(400), watcher.next_config()).await;
        assert!(update.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_initial_config_fails() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("bad.yaml");
        fs::write(&config_path, "midi:\n  actions:\n    rewind: \"true,NOTE_ON,1,1\"\n")?;

        assert!(ConfigWatcher::new(&config_path).await.is_err());
        Ok(())
    }
}
