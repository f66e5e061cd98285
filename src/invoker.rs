//! Action invokers
//!
//! The dispatcher hands every matched action to an [`ActionInvoker`]. It is
//! called on the MIDI transport thread, so implementations must return
//! quickly; anything slow belongs behind a [`ChannelInvoker`].

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Application hook receiving matched actions
pub trait ActionInvoker: Send + Sync {
    /// `value` is data byte 2 of the triggering message, 0 if it had none
    fn invoke_action(&self, action: &str, value: u8);
}

impl<F> ActionInvoker for F
where
    F: Fn(&str, u8) + Send + Sync,
{
    fn invoke_action(&self, action: &str, value: u8) {
        self(action, value)
    }
}

/// A matched action in flight to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionEvent {
    pub action: String,
    pub value: u8,
}

/// Forwards actions into a tokio channel without blocking the transport
pub struct ChannelInvoker {
    tx: mpsc::Sender<ActionEvent>,
}

impl ChannelInvoker {
    pub fn new(tx: mpsc::Sender<ActionEvent>) -> Self {
        Self { tx }
    }
}

impl ActionInvoker for ChannelInvoker {
    fn invoke_action(&self, action: &str, value: u8) {
        let event = ActionEvent {
            action: action.to_string(),
            value,
        };
        if let Err(e) = self.tx.try_send(event) {
            warn!("Dropped MIDI action '{}': {}", action, e);
        }
    }
}

/// Logs every action; used when no application is attached
pub struct ConsoleInvoker {
    name: String,
    execution_count: AtomicU64,
}

impl ConsoleInvoker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            execution_count: AtomicU64::new(0),
        }
    }

    pub fn execution_count(&self) -> u64 {
        self.execution_count.load(Ordering::Relaxed)
    }
}

impl ActionInvoker for ConsoleInvoker {
    fn invoke_action(&self, action: &str, value: u8) {
        let exec_num = self.execution_count.fetch_add(1, Ordering::Relaxed) + 1;

        info!(
            "🎹 [{}] '{}' → {} (value {}) [exec #{}]",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            self.name,
            action,
            value,
            exec_num
        );

        debug!(
            invoker = self.name,
            action = action,
            value = value,
            exec_count = exec_num,
            "ConsoleInvoker execution"
        );
    }
}
