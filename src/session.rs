//! Device session
//!
//! Owns at most one open input and one open output. Each direction moves
//! `Closed` → `Opening` → `Bound` and back to `Closed` on close or failure;
//! re-opening a direction always releases the previous device first.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::device::{DeviceError, DeviceHandle, DeviceRegistry, InputLink, MidiReceiver, OutputLink};
use crate::dispatch::InboundDispatcher;
use crate::invoker::ActionInvoker;
use crate::learn::{EventLatch, LearnError};
use crate::midi::{format_hex, InvalidMessageData, ShortMessage};
use crate::table::{BindingTable, TableHandle};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("no MIDI output is open")]
    OutputNotReady,

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("action '{0}' has no valid binding")]
    NotConfigured(String),

    #[error(transparent)]
    InvalidMessageData(#[from] InvalidMessageData),

    #[error("MIDI transmit failed: {0}")]
    Transmit(#[from] DeviceError),
}

/// Lifecycle of one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Closed,
    Opening,
    Bound,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Closed => write!(f, "closed"),
            LinkState::Opening => write!(f, "opening"),
            LinkState::Bound => write!(f, "bound"),
        }
    }
}

struct InputSlot {
    device: DeviceHandle,
    link: Box<dyn InputLink>,
    receiver: Arc<InboundDispatcher>,
}

struct OutputSlot {
    device: DeviceHandle,
    link: Box<dyn OutputLink>,
}

struct Side<S> {
    state: LinkState,
    slot: Option<S>,
}

impl<S> Default for Side<S> {
    fn default() -> Self {
        Self {
            state: LinkState::Closed,
            slot: None,
        }
    }
}

pub struct DeviceSession {
    registry: DeviceRegistry,
    table: TableHandle,
    invoker: Arc<dyn ActionInvoker>,
    latch: Arc<EventLatch>,
    input: Mutex<Side<InputSlot>>,
    output: Mutex<Side<OutputSlot>>,
    input_ready: AtomicBool,
    output_ready: AtomicBool,
}

impl DeviceSession {
    /// The table must be fully built before any device opens
    pub fn new(registry: DeviceRegistry, table: TableHandle, invoker: Arc<dyn ActionInvoker>) -> Self {
        Self {
            registry,
            table,
            invoker,
            latch: Arc::new(EventLatch::new()),
            input: Mutex::new(Side::default()),
            output: Mutex::new(Side::default()),
            input_ready: AtomicBool::new(false),
            output_ready: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn table(&self) -> &TableHandle {
        &self.table
    }

    /// Swap in a rebuilt table; the open input picks it up on its next message
    pub fn replace_table(&self, table: BindingTable) {
        self.table.replace(table);
        info!("MIDI binding table replaced");
    }

    /// Bind the input device `identity`, releasing any current input first
    pub fn open_input(&self, identity: &str) -> Result<(), DeviceError> {
        let mut side = self.input.lock();
        self.release_input(&mut side);

        let device = self.registry.find_input(identity).ok_or_else(|| {
            warn!("MIDI input device not located: '{}'", identity);
            DeviceError::NotFound(identity.to_string())
        })?;

        side.state = LinkState::Opening;
        let receiver = Arc::new(InboundDispatcher::new(
            self.table.clone(),
            self.invoker.clone(),
            self.latch.clone(),
        ));

        match self.registry.backend().open_input(&device, receiver.clone()) {
            Ok(link) => {
                side.slot = Some(InputSlot {
                    device,
                    link,
                    receiver,
                });
                side.state = LinkState::Bound;
                self.latch.open();
                self.input_ready.store(true, Ordering::Release);
                info!("MIDI input bound: '{}'", identity);
                Ok(())
            }
            Err(e) => {
                receiver.close();
                side.state = LinkState::Closed;
                warn!("MIDI input device '{}' could not open: {}", identity, e);
                Err(e)
            }
        }
    }

    /// Bind the output device `identity`, releasing any current output first
    pub fn open_output(&self, identity: &str) -> Result<(), DeviceError> {
        let mut side = self.output.lock();
        self.release_output(&mut side);

        let device = self.registry.find_output(identity).ok_or_else(|| {
            warn!("MIDI output device not located: '{}'", identity);
            DeviceError::NotFound(identity.to_string())
        })?;

        side.state = LinkState::Opening;
        match self.registry.backend().open_output(&device) {
            Ok(link) => {
                side.slot = Some(OutputSlot { device, link });
                side.state = LinkState::Bound;
                self.output_ready.store(true, Ordering::Release);
                info!("MIDI output bound: '{}'", identity);
                Ok(())
            }
            Err(e) => {
                side.state = LinkState::Closed;
                warn!("MIDI output device '{}' could not open: {}", identity, e);
                Err(e)
            }
        }
    }

    /// Release the input. No-op when nothing is bound.
    pub fn close_input(&self) {
        let mut side = self.input.lock();
        self.release_input(&mut side);
    }

    /// Release the output. No-op when nothing is bound.
    pub fn close_output(&self) {
        let mut side = self.output.lock();
        self.release_output(&mut side);
    }

    fn release_input(&self, side: &mut Side<InputSlot>) {
        self.input_ready.store(false, Ordering::Release);
        if let Some(slot) = side.slot.take() {
            self.latch.close();
            slot.link.close();
            slot.receiver.close();
            info!(
                "MIDI input closed: '{}' ({} actions dispatched)",
                slot.device.identity(),
                slot.receiver.dispatched()
            );
        }
        side.state = LinkState::Closed;
    }

    fn release_output(&self, side: &mut Side<OutputSlot>) {
        self.output_ready.store(false, Ordering::Release);
        if let Some(slot) = side.slot.take() {
            slot.link.close();
            info!("MIDI output closed: '{}'", slot.device.identity());
        }
        side.state = LinkState::Closed;
    }

    pub fn input_ready(&self) -> bool {
        self.input_ready.load(Ordering::Acquire)
    }

    pub fn output_ready(&self) -> bool {
        self.output_ready.load(Ordering::Acquire)
    }

    pub fn input_state(&self) -> LinkState {
        self.input.lock().state
    }

    pub fn output_state(&self) -> LinkState {
        self.output.lock().state
    }

    pub fn input_device(&self) -> Option<DeviceHandle> {
        self.input.lock().slot.as_ref().map(|s| s.device.clone())
    }

    pub fn output_device(&self) -> Option<DeviceHandle> {
        self.output.lock().slot.as_ref().map(|s| s.device.clone())
    }

    /// Emit the message bound to `action` with `value` as data byte 2.
    ///
    /// Disabled bindings still send; an action whose entry was rejected
    /// does not.
    pub fn send_action(&self, action: &str, value: u8) -> Result<(), SendError> {
        if !self.output_ready() {
            return Err(SendError::OutputNotReady);
        }

        let table = self.table.snapshot();
        let binding = table
            .lookup(action)
            .map_err(|_| SendError::UnknownAction(action.to_string()))?;
        if !binding.is_configured() {
            return Err(SendError::NotConfigured(action.to_string()));
        }
        let message = binding.to_message(value)?;

        debug!("Sending '{}' as {}", action, message);
        self.transmit(&message.encode())
    }

    /// Emit arbitrary bytes on the output
    pub fn send_raw(&self, data: &[u8]) -> Result<(), SendError> {
        if !self.output_ready() {
            return Err(SendError::OutputNotReady);
        }
        debug!("Sending raw [{}]", format_hex(data));
        self.transmit(data)
    }

    fn transmit(&self, data: &[u8]) -> Result<(), SendError> {
        let mut side = self.output.lock();
        let slot = side.slot.as_mut().ok_or(SendError::OutputNotReady)?;
        slot.link.transmit(data)?;
        Ok(())
    }

    /// Block until the open input delivers its next short message.
    ///
    /// The captured message is not dispatched. Closing or re-opening the
    /// input wakes the caller with [`LearnError::Closed`].
    pub fn wait_for_event(&self, timeout: Option<Duration>) -> Result<ShortMessage, LearnError> {
        if !self.input_ready() {
            return Err(LearnError::NotReady);
        }
        self.latch.wait(timeout)
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close_input();
        self.close_output();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockBackend;
    use crate::midi::MessageType;
    use crate::table::ACTION_CATALOGUE;
    use std::collections::HashMap;
    use std::thread;

    type Calls = Arc<Mutex<Vec<(String, u8)>>>;

    fn table() -> TableHandle {
        let mut source: HashMap<String, String> = ACTION_CATALOGUE
            .iter()
            .enumerate()
            .map(|(i, a)| (crate::binding::config_key(a), format!("true,NOTE_ON,2,{}", i)))
            .collect();
        source.insert("midi.Action.play".to_string(), "true,NOTE_ON,1,60".to_string());
        TableHandle::new(BindingTable::with_default_catalogue(&source).unwrap())
    }

    fn setup(backend: &MockBackend) -> (Calls, DeviceSession) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let invoker: Arc<dyn ActionInvoker> =
            Arc::new(move |action: &str, value: u8| sink.lock().push((action.to_string(), value)));
        let registry = DeviceRegistry::new(Arc::new(backend.clone()));
        (calls, DeviceSession::new(registry, table(), invoker))
    }

    fn devices() -> MockBackend {
        MockBackend::new()
            .with_device("Pad", true, false)
            .with_device("Keys", true, false)
            .with_device("Synth", false, true)
            .with_device("Surface", true, true)
    }

    #[test]
    fn test_inbound_dispatch_end_to_end() {
        let backend = devices();
        let (calls, session) = setup(&backend);

        session.open_input("Pad").unwrap();
        assert!(session.input_ready());
        assert_eq!(session.input_state(), LinkState::Bound);

        assert!(backend.inject("Pad", &[0x90, 60, 93]));
        assert!(backend.inject("Pad", &[0x90, 61, 93]));
        assert_eq!(*calls.lock(), vec![("play".to_string(), 93)]);
    }

    #[test]
    fn test_reopen_leaves_one_input() {
        let backend = devices();
        let (calls, session) = setup(&backend);

        session.open_input("Pad").unwrap();
        session.open_input("Keys").unwrap();

        assert_eq!(backend.open_inputs(), vec!["Keys".to_string()]);
        assert_eq!(backend.closed_inputs(), vec!["Pad".to_string()]);
        assert_eq!(session.input_device().unwrap().identity(), "Keys");

        // The released device no longer reaches the dispatcher
        assert!(!backend.inject("Pad", &[0x90, 60, 1]));
        assert!(backend.inject("Keys", &[0x90, 60, 2]));
        assert_eq!(*calls.lock(), vec![("play".to_string(), 2)]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let backend = devices();
        let (_calls, session) = setup(&backend);

        session.close_input();
        session.close_output();

        session.open_input("Pad").unwrap();
        session.open_output("Synth").unwrap();
        session.close_input();
        session.close_input();
        session.close_output();
        session.close_output();

        assert_eq!(backend.closed_inputs(), vec!["Pad".to_string()]);
        assert_eq!(backend.closed_outputs(), vec!["Synth".to_string()]);
        assert!(!session.input_ready());
        assert!(!session.output_ready());
        assert_eq!(session.input_state(), LinkState::Closed);
    }

    #[test]
    fn test_unknown_device_stays_closed() {
        let backend = devices();
        let (_calls, session) = setup(&backend);

        assert_eq!(
            session.open_input("Nope"),
            Err(DeviceError::NotFound("Nope".to_string()))
        );
        assert_eq!(session.input_state(), LinkState::Closed);
        assert!(!session.input_ready());

        // Output-only devices are not inputs
        assert!(matches!(session.open_input("Synth"), Err(DeviceError::NotFound(_))));
        assert_eq!(backend.open_attempts(), 0);
    }

    #[test]
    fn test_open_failure_is_unavailable() {
        let backend = devices().fail_open("Surface");
        let (_calls, session) = setup(&backend);

        session.open_input("Pad").unwrap();
        let err = session.open_input("Surface").unwrap_err();
        assert!(matches!(err, DeviceError::Unavailable { .. }));
        assert!(!session.input_ready());
        assert_eq!(session.input_state(), LinkState::Closed);
        assert_eq!(backend.closed_inputs(), vec!["Pad".to_string()]);

        assert!(matches!(
            session.open_output("Surface"),
            Err(DeviceError::Unavailable { .. })
        ));
        assert!(!session.output_ready());
    }

    #[test]
    fn test_send_without_output() {
        let backend = devices();
        let (_calls, session) = setup(&backend);

        assert_eq!(session.send_action("play", 100), Err(SendError::OutputNotReady));
        // Readiness is checked before the action name
        assert_eq!(session.send_action("rewind", 100), Err(SendError::OutputNotReady));
        assert!(backend.sent().is_empty());
    }

    #[test]
    fn test_send_action_transmits() {
        let backend = devices();
        let (_calls, session) = setup(&backend);
        session.open_output("Synth").unwrap();

        session.send_action("play", 100).unwrap();
        assert_eq!(backend.sent(), vec![("Synth".to_string(), vec![0x90, 60, 100])]);

        assert_eq!(
            session.send_action("rewind", 1),
            Err(SendError::UnknownAction("rewind".to_string()))
        );
        assert_eq!(
            session.send_action("play", 200),
            Err(SendError::InvalidMessageData(InvalidMessageData::Data2(200)))
        );
        assert_eq!(backend.sent().len(), 1);
    }

    #[test]
    fn test_send_rejected_action_is_refused() {
        let backend = devices();
        let (_calls, session) = setup(&backend);
        session.open_output("Synth").unwrap();

        let mut source: HashMap<String, String> = ACTION_CATALOGUE
            .iter()
            .enumerate()
            .map(|(i, a)| (crate::binding::config_key(a), format!("false,NOTE_ON,1,{}", i)))
            .collect();
        source.insert("midi.Action.logo".to_string(), "true,NOTE_ONN,1,61".to_string());
        session.replace_table(BindingTable::with_default_catalogue(&source).unwrap());

        assert_eq!(
            session.send_action("logo", 100),
            Err(SendError::NotConfigured("logo".to_string()))
        );
        assert!(backend.sent().is_empty());

        // A disabled but valid binding still sends
        session.send_action("clear", 100).unwrap();
        assert_eq!(backend.sent(), vec![("Synth".to_string(), vec![0x90, 0, 100])]);
    }

    #[test]
    fn test_send_raw() {
        let backend = devices();
        let (_calls, session) = setup(&backend);
        session.open_output("Surface").unwrap();

        let tone = ShortMessage::new(MessageType::NoteOn, 0, 60, 93).unwrap();
        session.send_raw(&tone.encode()).unwrap();
        assert_eq!(backend.sent(), vec![("Surface".to_string(), vec![0x90, 60, 93])]);
    }

    #[test]
    fn test_wait_for_event_requires_input() {
        let backend = devices();
        let (_calls, session) = setup(&backend);
        assert_eq!(
            session.wait_for_event(Some(Duration::from_millis(10))),
            Err(LearnError::NotReady)
        );

        session.open_input("Pad").unwrap();
        assert_eq!(
            session.wait_for_event(Some(Duration::from_millis(10))),
            Err(LearnError::Timeout)
        );
    }

    #[test]
    fn test_wait_for_event_receives_message() {
        let backend = devices();
        let (calls, session) = setup(&backend);
        let session = Arc::new(session);
        session.open_input("Pad").unwrap();

        let waiter = {
            let session = session.clone();
            thread::spawn(move || session.wait_for_event(Some(Duration::from_secs(5))))
        };
        while !session.latch.is_waiting() {
            thread::sleep(Duration::from_millis(1));
        }

        backend.inject("Pad", &[0xB3, 7, 64]);
        let message = waiter.join().unwrap().unwrap();
        assert_eq!(message.encode(), vec![0xB3, 7, 64]);
        assert!(calls.lock().is_empty());
    }

    #[test]
    fn test_close_unblocks_waiter() {
        let backend = devices();
        let (_calls, session) = setup(&backend);
        let session = Arc::new(session);
        session.open_input("Pad").unwrap();

        let waiter = {
            let session = session.clone();
            thread::spawn(move || session.wait_for_event(None))
        };
        while !session.latch.is_waiting() {
            thread::sleep(Duration::from_millis(1));
        }

        session.close_input();
        assert_eq!(waiter.join().unwrap(), Err(LearnError::Closed));
    }

    #[test]
    fn test_close_input_while_dispatch_in_flight() {
        use std::sync::Barrier;

        let backend = devices();
        let entered = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));

        let invoker: Arc<dyn ActionInvoker> = {
            let (entered, release, sink) = (entered.clone(), release.clone(), calls.clone());
            Arc::new(move |action: &str, value: u8| {
                entered.wait();
                release.wait();
                sink.lock().push((action.to_string(), value));
            })
        };
        let registry = DeviceRegistry::new(Arc::new(backend.clone()));
        let session = DeviceSession::new(registry, table(), invoker);
        session.open_input("Pad").unwrap();

        let injector = {
            let backend = backend.clone();
            thread::spawn(move || backend.inject("Pad", &[0x90, 60, 93]))
        };
        entered.wait();

        // The callback is parked inside the invoker
        session.close_input();
        assert!(!session.input_ready());
        assert_eq!(backend.closed_inputs(), vec!["Pad".to_string()]);
        assert!(calls.lock().is_empty());

        release.wait();
        assert!(injector.join().unwrap());
        assert_eq!(*calls.lock(), vec![("play".to_string(), 93)]);

        assert!(!backend.inject("Pad", &[0x90, 60, 94]));
        assert_eq!(calls.lock().len(), 1);
    }

    #[test]
    fn test_replace_table_applies_to_open_input() {
        let backend = devices();
        let (calls, session) = setup(&backend);
        session.open_input("Pad").unwrap();

        let mut source = HashMap::new();
        source.insert("midi.Action.black".to_string(), "true,NOTE_ON,1,60".to_string());
        session.replace_table(BindingTable::build(&["black"], &source).unwrap());

        backend.inject("Pad", &[0x90, 60, 5]);
        assert_eq!(*calls.lock(), vec![("black".to_string(), 5)]);
    }

    #[test]
    fn test_drop_closes_both_directions() {
        let backend = devices();
        let (_calls, session) = setup(&backend);
        session.open_input("Surface").unwrap();
        session.open_output("Surface").unwrap();

        drop(session);
        assert!(backend.open_inputs().is_empty());
        assert!(backend.open_outputs().is_empty());
        assert_eq!(backend.closed_inputs(), vec!["Surface".to_string()]);
        assert_eq!(backend.closed_outputs(), vec!["Surface".to_string()]);
    }
}
