//! Learn mode latch
//!
//! Hands the next inbound message to a thread blocked in
//! [`EventLatch::wait`]. Closing the input wakes every waiter with
//! [`LearnError::Closed`].

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::midi::ShortMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LearnError {
    #[error("no MIDI input is open")]
    NotReady,

    #[error("MIDI input closed while waiting for an event")]
    Closed,

    #[error("timed out waiting for a MIDI event")]
    Timeout,
}

#[derive(Debug, Default)]
struct LatchState {
    open: bool,
    /// Bumped on every close so waiters notice a close/reopen cycle
    epoch: u64,
    waiting: usize,
    captured: Option<ShortMessage>,
}

#[derive(Debug, Default)]
pub struct EventLatch {
    state: Mutex<LatchState>,
    cond: Condvar,
}

impl EventLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Input bound: waits may start
    pub fn open(&self) {
        let mut state = self.state.lock();
        state.open = true;
        state.captured = None;
    }

    /// Input released: wake every waiter with `Closed`
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.open = false;
        state.epoch = state.epoch.wrapping_add(1);
        state.captured = None;
        self.cond.notify_all();
    }

    pub fn is_waiting(&self) -> bool {
        self.state.lock().waiting > 0
    }

    /// Offer an inbound message. Returns true when a waiter is present and
    /// the message was handed over, in which case it must not be dispatched.
    pub fn offer(&self, message: &ShortMessage) -> bool {
        let mut state = self.state.lock();
        if !state.open || state.waiting == 0 || state.captured.is_some() {
            return false;
        }
        state.captured = Some(*message);
        self.cond.notify_all();
        true
    }

    /// Block until a message is offered, the latch closes, or `timeout`
    /// elapses. `None` waits without limit.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<ShortMessage, LearnError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        if !state.open {
            return Err(LearnError::NotReady);
        }

        let epoch = state.epoch;
        state.waiting += 1;

        let result = loop {
            if state.epoch != epoch || !state.open {
                break Err(LearnError::Closed);
            }
            if let Some(message) = state.captured.take() {
                break Ok(message);
            }
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut state, deadline).timed_out() {
                        // A message may have landed together with the timeout
                        break if state.epoch != epoch || !state.open {
                            Err(LearnError::Closed)
                        } else {
                            state.captured.take().ok_or(LearnError::Timeout)
                        };
                    }
                }
                None => self.cond.wait(&mut state),
            }
        };

        state.waiting -= 1;
        result
    }
}
