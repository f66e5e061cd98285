//! MIDI control policy
//!
//! [`MidiController`] turns a [`MidiConfig`] into a running session: it
//! builds the binding table, opens the configured devices and decides when
//! MIDI control has to be switched off. Failures never propagate out of
//! here; they are logged and reported through [`MidiController::status`].

use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::MidiConfig;
use crate::device::{DeviceError, DeviceRegistry};
use crate::invoker::ActionInvoker;
use crate::session::{DeviceSession, LinkState};
use crate::table::{BindingTable, TableHandle};

/// Snapshot of the controller for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerStatus {
    pub enabled: bool,
    pub disabled_reason: Option<String>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub input_state: LinkState,
    pub output_state: LinkState,
    pub bindings: usize,
    pub rejected: usize,
}

impl fmt::Display for ControllerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.disabled_reason {
            None => writeln!(f, "MIDI control: enabled")?,
            Some(reason) => writeln!(f, "MIDI control: disabled ({})", reason)?,
        }
        writeln!(
            f,
            "Input:  {} [{}]",
            self.input_device.as_deref().unwrap_or("-"),
            self.input_state
        )?;
        writeln!(
            f,
            "Output: {} [{}]",
            self.output_device.as_deref().unwrap_or("-"),
            self.output_state
        )?;
        write!(f, "Bindings: {} ({} rejected)", self.bindings, self.rejected)
    }
}

pub struct MidiController {
    config: MidiConfig,
    session: Arc<DeviceSession>,
    disabled_reason: Option<String>,
}

impl MidiController {
    /// Build the table and open the configured devices
    pub fn start(config: &MidiConfig, registry: DeviceRegistry, invoker: Arc<dyn ActionInvoker>) -> Self {
        let session = Arc::new(DeviceSession::new(registry, TableHandle::default(), invoker));
        let mut controller = Self {
            config: config.clone(),
            session,
            disabled_reason: None,
        };
        controller.activate(None);
        controller
    }

    pub fn is_enabled(&self) -> bool {
        self.disabled_reason.is_none()
    }

    pub fn disabled_reason(&self) -> Option<&str> {
        self.disabled_reason.as_deref()
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    pub fn config(&self) -> &MidiConfig {
        &self.config
    }

    pub fn status(&self) -> ControllerStatus {
        let table = self.session.table().snapshot();
        ControllerStatus {
            enabled: self.is_enabled(),
            disabled_reason: self.disabled_reason.clone(),
            input_device: self.session.input_device().map(|d| d.identity().to_string()),
            output_device: self.session.output_device().map(|d| d.identity().to_string()),
            input_state: self.session.input_state(),
            output_state: self.session.output_state(),
            bindings: table.len(),
            rejected: table.rejected().len(),
        }
    }

    /// Apply a reloaded configuration.
    ///
    /// The table is always rebuilt and swapped. A device is re-opened only
    /// when its identity changed or it is not currently bound.
    pub fn apply_config(&mut self, config: &MidiConfig) {
        let previous = std::mem::replace(&mut self.config, config.clone());
        let was_enabled = self.is_enabled();
        self.disabled_reason = None;

        if was_enabled {
            self.activate(Some(&previous));
        } else {
            self.activate(None);
        }
    }

    /// Close both devices and keep the table
    pub fn shutdown(&mut self) {
        self.session.close_input();
        self.session.close_output();
    }

    fn activate(&mut self, previous: Option<&MidiConfig>) {
        if !self.config.enabled {
            self.disable("disabled in configuration".to_string());
            return;
        }

        let table = match BindingTable::with_default_catalogue(&self.config) {
            Ok(table) => table,
            Err(e) => {
                self.disable(e.to_string());
                return;
            }
        };
        for rejected in table.rejected() {
            warn!("Rejected MIDI binding: {}", rejected);
        }
        self.session.replace_table(table);

        let reopen_input = previous.map_or(true, |p| p.input_device != self.config.input_device)
            || !self.session.input_ready();
        if reopen_input {
            if let Err(e) = self.open_input() {
                self.disable(e.to_string());
                return;
            }
        }

        let reopen_output = previous.map_or(true, |p| p.output_device != self.config.output_device)
            || !self.session.output_ready();
        if reopen_output {
            if let Err(e) = self.open_output() {
                self.disable(e.to_string());
                return;
            }
        }

        info!(
            "MIDI control active (input: {}, output: {})",
            self.config.input_device.as_deref().unwrap_or("none"),
            self.config.output_device.as_deref().unwrap_or("none")
        );
    }

    /// `NotFound` only warns; a device that exists but fails to open is fatal
    fn open_input(&self) -> Result<(), DeviceError> {
        match &self.config.input_device {
            Some(identity) => match self.session.open_input(identity) {
                Err(DeviceError::NotFound(_)) => Ok(()),
                other => other,
            },
            None => {
                self.session.close_input();
                Ok(())
            }
        }
    }

    fn open_output(&self) -> Result<(), DeviceError> {
        match &self.config.output_device {
            Some(identity) => match self.session.open_output(identity) {
                Err(DeviceError::NotFound(_)) => Ok(()),
                other => other,
            },
            None => {
                self.session.close_output();
                Ok(())
            }
        }
    }

    fn disable(&mut self, reason: String) {
        warn!("MIDI control disabled: {}", reason);
        self.shutdown();
        self.disabled_reason = Some(reason);
    }
}
