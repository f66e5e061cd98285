//! MIDI device discovery
//!
//! A [`MidiBackend`] reports hardware endpoints and opens connections to
//! them; the [`DeviceRegistry`] turns the raw endpoint list into
//! [`DeviceHandle`]s classified as input-capable or output-capable.

pub mod midir_backend;

#[cfg(test)]
pub(crate) mod mock;

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub use midir_backend::MidirBackend;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("MIDI device not found: '{0}'")]
    NotFound(String),

    #[error("MIDI device '{identity}' unavailable: {reason}")]
    Unavailable { identity: String, reason: String },

    #[error("MIDI backend error: {0}")]
    Backend(String),
}

/// Raw endpoint description reported by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub name: String,
    pub vendor: Option<String>,
    pub version: Option<String>,
    /// Sources of inbound events (0 = cannot be used as an input)
    pub transmitters: usize,
    /// Sinks for outbound events (0 = cannot be used as an output)
    pub receivers: usize,
}

impl EndpointInfo {
    /// Identity string: name, vendor and version joined with spaces
    pub fn identity(&self) -> String {
        [Some(&self.name), self.vendor.as_ref(), self.version.as_ref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A hardware endpoint as seen by the rest of the crate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    identity: String,
    name: String,
    can_transmit: bool,
    can_receive: bool,
}

impl DeviceHandle {
    pub fn new(identity: impl Into<String>, name: impl Into<String>, can_transmit: bool, can_receive: bool) -> Self {
        Self {
            identity: identity.into(),
            name: name.into(),
            can_transmit,
            can_receive,
        }
    }

    fn from_endpoint(info: &EndpointInfo) -> Self {
        Self::new(
            info.identity(),
            info.name.clone(),
            info.transmitters > 0,
            info.receivers > 0,
        )
    }

    /// Stable lookup key across enumerations
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device emits events: usable as an application input
    pub fn can_transmit(&self) -> bool {
        self.can_transmit
    }

    /// Device accepts events: usable as an application output
    pub fn can_receive(&self) -> bool {
        self.can_receive
    }
}

/// Inbound side of an open input: called on the transport's thread
pub trait MidiReceiver: Send + Sync {
    fn on_message(&self, data: &[u8]);
    fn close(&self);
}

/// An open input connection
pub trait InputLink: Send {
    /// Stop delivery and release the hardware handle
    fn close(self: Box<Self>);
}

/// An open output connection
pub trait OutputLink: Send {
    fn transmit(&mut self, data: &[u8]) -> Result<(), DeviceError>;

    /// Release the hardware handle
    fn close(self: Box<Self>);
}

/// Hardware transport
pub trait MidiBackend: Send + Sync {
    /// One entry per endpoint; `Err` marks an endpoint that could not be queried
    fn endpoints(&self) -> Vec<Result<EndpointInfo, DeviceError>>;

    fn open_input(
        &self,
        device: &DeviceHandle,
        receiver: Arc<dyn MidiReceiver>,
    ) -> Result<Box<dyn InputLink>, DeviceError>;

    fn open_output(&self, device: &DeviceHandle) -> Result<Box<dyn OutputLink>, DeviceError>;
}

/// Result of one enumeration pass
#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    pub devices: Vec<DeviceHandle>,
    /// Endpoints that could not be queried this pass
    pub skipped: Vec<DeviceError>,
}

/// Enumerates and classifies hardware endpoints
#[derive(Clone)]
pub struct DeviceRegistry {
    backend: Arc<dyn MidiBackend>,
}

impl DeviceRegistry {
    pub fn new(backend: Arc<dyn MidiBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn MidiBackend> {
        &self.backend
    }

    /// Enumerate all endpoints.
    ///
    /// Endpoints reported under the same identity (the input and output
    /// port of one device) merge into a single handle. An endpoint that fails
    /// to answer is skipped and recorded; this never fails as a whole.
    pub fn enumerate(&self) -> Enumeration {
        let mut result = Enumeration::default();

        for entry in self.backend.endpoints() {
            match entry {
                Ok(info) => {
                    let handle = DeviceHandle::from_endpoint(&info);
                    match result
                        .devices
                        .iter_mut()
                        .find(|d| d.identity == handle.identity)
                    {
                        Some(existing) => {
                            existing.can_transmit |= handle.can_transmit;
                            existing.can_receive |= handle.can_receive;
                        }
                        None => result.devices.push(handle),
                    }
                }
                Err(e) => {
                    warn!("MIDI device unavailable: {}", e);
                    result.skipped.push(e);
                }
            }
        }

        debug!(
            "Enumerated {} MIDI devices ({} skipped)",
            result.devices.len(),
            result.skipped.len()
        );
        result
    }

    /// Devices that can feed events into the application
    pub fn list_inputs(&self) -> Vec<DeviceHandle> {
        self.enumerate()
            .devices
            .into_iter()
            .filter(|d| d.can_transmit)
            .collect()
    }

    /// Devices the application can send events to
    pub fn list_outputs(&self) -> Vec<DeviceHandle> {
        self.enumerate()
            .devices
            .into_iter()
            .filter(|d| d.can_receive)
            .collect()
    }

    pub fn find_input(&self, identity: &str) -> Option<DeviceHandle> {
        self.list_inputs().into_iter().find(|d| d.identity == identity)
    }

    pub fn find_output(&self, identity: &str) -> Option<DeviceHandle> {
        self.list_outputs().into_iter().find(|d| d.identity == identity)
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockBackend;
    use super::*;

    #[test]
    fn test_identity_joins_descriptive_fields() {
        let info = EndpointInfo {
            name: "X-Touch".to_string(),
            vendor: Some("Behringer".to_string()),
            version: Some("1.0".to_string()),
            transmitters: 1,
            receivers: 1,
        };
        assert_eq!(info.identity(), "X-Touch Behringer 1.0");

        let info = EndpointInfo {
            vendor: None,
            version: Some(String::new()),
            ..info
        };
        assert_eq!(info.identity(), "X-Touch");
    }

    #[test]
    fn test_classification() {
        let backend = MockBackend::new()
            .with_device("Pad", true, false)
            .with_device("Synth", false, true)
            .with_device("Surface", true, true);
        let registry = DeviceRegistry::new(Arc::new(backend));

        let inputs: Vec<String> = registry
            .list_inputs()
            .iter()
            .map(|d| d.identity().to_string())
            .collect();
        let outputs: Vec<String> = registry
            .list_outputs()
            .iter()
            .map(|d| d.identity().to_string())
            .collect();

        assert_eq!(inputs, vec!["Pad", "Surface"]);
        assert_eq!(outputs, vec!["Synth", "Surface"]);
    }

    #[test]
    fn test_split_ports_merge_into_one_device() {
        let backend = MockBackend::new()
            .with_device("Surface", true, false)
            .with_device("Surface", false, true);
        let registry = DeviceRegistry::new(Arc::new(backend));

        let devices = registry.enumerate().devices;
        assert_eq!(devices.len(), 1);
        assert!(devices[0].can_transmit());
        assert!(devices[0].can_receive());
    }

    #[test]
    fn test_unavailable_endpoint_is_skipped() {
        let backend = MockBackend::new()
            .with_device("Pad", true, false)
            .with_unavailable_endpoint("Broken")
            .with_device("Keys", true, false);
        let registry = DeviceRegistry::new(Arc::new(backend));

        let enumeration = registry.enumerate();
        assert_eq!(enumeration.devices.len(), 2);
        assert_eq!(enumeration.skipped.len(), 1);
        assert_eq!(registry.list_inputs().len(), 2);
        assert!(registry.find_input("Broken").is_none());
        assert!(registry.find_input("Keys").is_some());
        assert!(registry.find_output("Keys").is_none());
    }
}
