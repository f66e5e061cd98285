//! In-memory backend for tests

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::{DeviceError, DeviceHandle, EndpointInfo, InputLink, MidiBackend, MidiReceiver, OutputLink};

#[derive(Default)]
struct MockState {
    inputs: HashMap<String, Arc<dyn MidiReceiver>>,
    outputs: Vec<String>,
    closed_inputs: Vec<String>,
    closed_outputs: Vec<String>,
    sent: Vec<(String, Vec<u8>)>,
    opens: usize,
}

#[derive(Clone, Default)]
pub struct MockBackend {
    endpoints: Vec<Result<EndpointInfo, DeviceError>>,
    failing: Vec<String>,
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, name: &str, transmit: bool, receive: bool) -> Self {
        self.endpoints.push(Ok(EndpointInfo {
            name: name.to_string(),
            vendor: None,
            version: None,
            transmitters: transmit as usize,
            receivers: receive as usize,
        }));
        self
    }

    pub fn with_unavailable_endpoint(mut self, name: &str) -> Self {
        self.endpoints.push(Err(DeviceError::Unavailable {
            identity: name.to_string(),
            reason: "device busy".to_string(),
        }));
        self
    }

    /// Opening `identity` fails as if the device were held elsewhere
    pub fn fail_open(mut self, identity: &str) -> Self {
        self.failing.push(identity.to_string());
        self
    }

    /// Deliver raw bytes to the receiver of the open input `identity`
    pub fn inject(&self, identity: &str, data: &[u8]) -> bool {
        let receiver = self.state.lock().inputs.get(identity).cloned();
        match receiver {
            Some(receiver) => {
                receiver.on_message(data);
                true
            }
            None => false,
        }
    }

    pub fn open_inputs(&self) -> Vec<String> {
        self.state.lock().inputs.keys().cloned().collect()
    }

    pub fn closed_inputs(&self) -> Vec<String> {
        self.state.lock().closed_inputs.clone()
    }

    pub fn open_outputs(&self) -> Vec<String> {
        self.state.lock().outputs.clone()
    }

    pub fn closed_outputs(&self) -> Vec<String> {
        self.state.lock().closed_outputs.clone()
    }

    pub fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().sent.clone()
    }

    /// Successful and failed open attempts
    pub fn open_attempts(&self) -> usize {
        self.state.lock().opens
    }

    fn check_open(&self, device: &DeviceHandle) -> Result<(), DeviceError> {
        self.state.lock().opens += 1;
        if self.failing.iter().any(|f| f == device.identity()) {
            return Err(DeviceError::Unavailable {
                identity: device.identity().to_string(),
                reason: "device busy".to_string(),
            });
        }
        Ok(())
    }
}

impl MidiBackend for MockBackend {
    fn endpoints(&self) -> Vec<Result<EndpointInfo, DeviceError>> {
        self.endpoints.clone()
    }

    fn open_input(
        &self,
        device: &DeviceHandle,
        receiver: Arc<dyn MidiReceiver>,
    ) -> Result<Box<dyn InputLink>, DeviceError> {
        self.check_open(device)?;
        self.state
            .lock()
            .inputs
            .insert(device.identity().to_string(), receiver);
        Ok(Box::new(MockInputLink {
            identity: device.identity().to_string(),
            state: self.state.clone(),
        }))
    }

    fn open_output(&self, device: &DeviceHandle) -> Result<Box<dyn OutputLink>, DeviceError> {
        self.check_open(device)?;
        self.state.lock().outputs.push(device.identity().to_string());
        Ok(Box::new(MockOutputLink {
            identity: device.identity().to_string(),
            state: self.state.clone(),
        }))
    }
}

struct MockInputLink {
    identity: String,
    state: Arc<Mutex<MockState>>,
}

impl InputLink for MockInputLink {
    fn close(self: Box<Self>) {
        let mut state = self.state.lock();
        state.inputs.remove(&self.identity);
        state.closed_inputs.push(self.identity.clone());
    }
}

struct MockOutputLink {
    identity: String,
    state: Arc<Mutex<MockState>>,
}

impl OutputLink for MockOutputLink {
    fn transmit(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        self.state
            .lock()
            .sent
            .push((self.identity.clone(), data.to_vec()));
        Ok(())
    }

    fn close(self: Box<Self>) {
        let mut state = self.state.lock();
        state.outputs.retain(|o| o != &self.identity);
        state.closed_outputs.push(self.identity.clone());
    }
}
