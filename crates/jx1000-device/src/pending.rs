//! Request/response correlation.
//!
//! The protocol carries no request ids, so a response is matched to the
//! outstanding request of the same command kind. Each kind gets its own
//! [`PendingSlot`]; a second request of that kind waits until the first one
//! has finished.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::response::{DeviceInfo, MemoryResponse};

/// Why a wait ended without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    TimedOut,
    Cancelled,
}

#[derive(Debug)]
struct SlotState<T> {
    armed: bool,
    cancelled: bool,
    value: Option<T>,
}

/// A single-value mailbox for one command kind.
#[derive(Debug)]
pub struct PendingSlot<T> {
    name: &'static str,
    request: Mutex<()>,
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> PendingSlot<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            request: Mutex::new(()),
            state: Mutex::new(SlotState {
                armed: false,
                cancelled: false,
                value: None,
            }),
            ready: Condvar::new(),
        }
    }

    /// Arm the slot for one request, waiting for any earlier request of
    /// the same kind to finish first.
    pub fn arm(&self) -> Armed<'_, T> {
        let turn = self.request.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut state = self.lock_state();
            state.armed = true;
            state.cancelled = false;
            state.value = None;
        }
        Armed {
            slot: self,
            _turn: turn,
        }
    }

    /// Deliver a response. Returns false when nothing was waiting for it.
    pub fn resolve(&self, value: T) -> bool {
        let mut state = self.lock_state();
        if !state.armed || state.value.is_some() {
            debug!(slot = self.name, "dropping unsolicited response");
            return false;
        }
        state.value = Some(value);
        self.ready.notify_all();
        true
    }

    /// Wake an armed waiter with [`WaitError::Cancelled`].
    pub fn cancel(&self) {
        let mut state = self.lock_state();
        if state.armed {
            state.cancelled = true;
            self.ready.notify_all();
        }
    }

    /// Whether a request is currently waiting on this slot.
    pub fn is_armed(&self) -> bool {
        self.lock_state().armed
    }

    fn lock_state(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An armed slot. Dropping it disarms the slot and lets the next request in.
pub struct Armed<'a, T> {
    slot: &'a PendingSlot<T>,
    _turn: MutexGuard<'a, ()>,
}

impl<T> Armed<'_, T> {
    /// Block until the response arrives, the deadline passes or the slot is
    /// cancelled.
    pub fn wait(self, timeout: Duration) -> Result<T, WaitError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.slot.lock_state();
        loop {
            if let Some(value) = state.value.take() {
                return Ok(value);
            }
            if state.cancelled {
                return Err(WaitError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(WaitError::TimedOut);
            }
            state = self
                .slot
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl<T> Drop for Armed<'_, T> {
    fn drop(&mut self) {
        let mut state = self.slot.lock_state();
        state.armed = false;
        state.cancelled = false;
        state.value = None;
    }
}

/// One slot per command kind that expects a response.
#[derive(Debug)]
pub struct PendingRequests {
    /// DevRead responses.
    pub read: PendingSlot<MemoryResponse>,
    /// DevWrite acknowledgments; the response is parsed when long enough.
    pub write: PendingSlot<Option<MemoryResponse>>,
    /// RuleDown chunk acknowledgments.
    pub rule_ack: PendingSlot<bool>,
    /// Info responses.
    pub info: PendingSlot<DeviceInfo>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self {
            read: PendingSlot::new("read"),
            write: PendingSlot::new("write"),
            rule_ack: PendingSlot::new("rule_ack"),
            info: PendingSlot::new("info"),
        }
    }
}

impl PendingRequests {
    /// Cancel every armed waiter.
    pub fn cancel_all(&self) {
        self.read.cancel();
        self.write.cancel();
        self.rule_ack.cancel();
        self.info.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn resolve_wakes_waiter() {
        let slot = Arc::new(PendingSlot::<u32>::new("test"));
        let armed = slot.arm();

        let resolver = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                assert!(slot.resolve(7));
            })
        };

        assert_eq!(armed.wait(Duration::from_secs(2)), Ok(7));
        resolver.join().unwrap();
        assert!(!slot.is_armed());
    }

    #[test]
    fn value_resolved_before_wait_is_kept() {
        let slot = PendingSlot::new("test");
        let armed = slot.arm();
        assert!(slot.resolve("early"));
        assert_eq!(armed.wait(Duration::from_millis(1)), Ok("early"));
    }

    #[test]
    fn unsolicited_response_dropped() {
        let slot = PendingSlot::new("test");
        assert!(!slot.resolve(1u8));

        let armed = slot.arm();
        assert_eq!(armed.wait(Duration::from_millis(10)), Err(WaitError::TimedOut));
    }

    #[test]
    fn second_response_for_one_request_dropped() {
        let slot = PendingSlot::new("test");
        let armed = slot.arm();
        assert!(slot.resolve(1u8));
        assert!(!slot.resolve(2u8));
        assert_eq!(armed.wait(Duration::from_millis(1)), Ok(1));
    }

    #[test]
    fn late_response_after_timeout_is_not_seen_by_next_request() {
        let slot = PendingSlot::new("test");
        assert_eq!(
            slot.arm().wait(Duration::from_millis(5)),
            Err(WaitError::TimedOut)
        );
        assert!(!slot.resolve(99u8));

        let armed = slot.arm();
        assert_eq!(armed.wait(Duration::from_millis(5)), Err(WaitError::TimedOut));
    }

    #[test]
    fn timeout_elapses() {
        let slot = PendingSlot::<()>::new("test");
        let started = Instant::now();
        let result = slot.arm().wait(Duration::from_millis(50));
        assert_eq!(result, Err(WaitError::TimedOut));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn cancel_wakes_waiter() {
        let slot = Arc::new(PendingSlot::<u8>::new("test"));
        let armed = slot.arm();

        let canceller = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                slot.cancel();
            })
        };

        assert_eq!(armed.wait(Duration::from_secs(5)), Err(WaitError::Cancelled));
        canceller.join().unwrap();
    }

    #[test]
    fn same_kind_requests_queue() {
        let slot = Arc::new(PendingSlot::<u8>::new("test"));
        let first = slot.arm();
        let second_armed = Arc::new(AtomicBool::new(false));

        let second = {
            let slot = Arc::clone(&slot);
            let flag = Arc::clone(&second_armed);
            thread::spawn(move || {
                let armed = slot.arm();
                flag.store(true, Ordering::SeqCst);
                armed.wait(Duration::from_secs(2))
            })
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!second_armed.load(Ordering::SeqCst));

        assert!(slot.resolve(1));
        assert_eq!(first.wait(Duration::from_secs(1)), Ok(1));

        while !second_armed.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(slot.resolve(2));
        assert_eq!(second.join().unwrap(), Ok(2));
    }

    #[test]
    fn cancel_all_reaches_every_slot() {
        let pending = Arc::new(PendingRequests::default());
        let waiter = {
            let pending = Arc::clone(&pending);
            thread::spawn(move || pending.rule_ack.arm().wait(Duration::from_secs(5)))
        };
        while !pending.rule_ack.is_armed() {
            thread::sleep(Duration::from_millis(1));
        }
        pending.cancel_all();
        assert_eq!(waiter.join().unwrap(), Err(WaitError::Cancelled));
    }
}
