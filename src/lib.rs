//! MIDI Remote
//!
//! Binds hardware MIDI controllers to named application actions. Inbound
//! events are matched against a table of configured bindings and dispatched
//! to an [`ActionInvoker`]; actions can also be sent back out to a device.

pub mod binding;
pub mod cli;
pub mod config;
pub mod controller;
pub mod device;
pub mod dispatch;
pub mod invoker;
pub mod learn;
pub mod midi;
pub mod paths;
pub mod session;
pub mod table;

pub use binding::{ActionBinding, BindingError};
pub use controller::{ControllerStatus, MidiController};
pub use device::{DeviceError, DeviceHandle, DeviceRegistry, MidiBackend, MidirBackend};
pub use invoker::{ActionEvent, ActionInvoker, ChannelInvoker, ConsoleInvoker};
pub use learn::LearnError;
pub use midi::{MessageType, ShortMessage};
pub use session::{DeviceSession, LinkState, SendError};
pub use table::{BindingTable, TableError, TableHandle, ACTION_CATALOGUE};
