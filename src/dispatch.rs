//! Inbound dispatch
//!
//! [`InboundDispatcher`] is the receiver installed on an open input. It runs
//! on the transport's delivery thread, matches each short message against
//! the active binding table and invokes the bound action with the message's
//! value byte.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};

use crate::device::MidiReceiver;
use crate::invoker::ActionInvoker;
use crate::learn::EventLatch;
use crate::midi::{format_hex, ShortMessage};
use crate::table::TableHandle;

pub struct InboundDispatcher {
    table: TableHandle,
    invoker: Arc<dyn ActionInvoker>,
    latch: Arc<EventLatch>,
    closed: AtomicBool,
    dispatched: AtomicU64,
}

impl InboundDispatcher {
    pub fn new(table: TableHandle, invoker: Arc<dyn ActionInvoker>, latch: Arc<EventLatch>) -> Self {
        Self {
            table,
            invoker,
            latch,
            closed: AtomicBool::new(false),
            dispatched: AtomicU64::new(0),
        }
    }

    /// Actions invoked so far through this receiver
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn dispatch(&self, message: &ShortMessage) {
        if self.latch.offer(message) {
            debug!("MIDI event captured for learn: {}", message);
            return;
        }

        // Snapshot: a concurrent reload does not affect this message
        let table = self.table.snapshot();
        let Some(action) = table.match_first(message.status(), message.data1()) else {
            trace!("No binding for {}", message);
            return;
        };

        let value = message.value();
        let invoker = &self.invoker;
        match catch_unwind(AssertUnwindSafe(|| invoker.invoke_action(action, value))) {
            Ok(()) => {
                self.dispatched.fetch_add(1, Ordering::Relaxed);
                debug!("MIDI {} → '{}' (value {})", message, action, value);
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("Action '{}' panicked while handling {}: {}", action, message, reason);
            }
        }
    }
}

impl MidiReceiver for InboundDispatcher {
    fn on_message(&self, data: &[u8]) {
        if self.is_closed() {
            return;
        }

        if !(2..=3).contains(&data.len()) {
            debug!("Ignoring {}-byte MIDI message [{}]", data.len(), format_hex(data));
            return;
        }

        match ShortMessage::from_bytes(data) {
            Some(message) => {
                debug!("MIDI in: [{}] {}", format_hex(data), message);
                self.dispatch(&message);
            }
            None => debug!("Ignoring malformed MIDI message [{}]", format_hex(data)),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
