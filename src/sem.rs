//! Semaphore counters, waiters and wake-handle plumbing
//!
//! A [`Semaphore`] is one counter plus a FIFO queue of parked operations.
//! Waking never re-applies an operation on the waiter's behalf: the waker
//! delivers an advisory signal through a one-slot channel and the unparked
//! caller re-enters the engine to re-evaluate its whole batch.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use log::trace;

use crate::auth::Pid;

/// One-slot notification channel between a waker and a parked caller
///
/// The slot holds at most one pending signal; signalling an already
/// signalled slot is a no-op. A pending signal means "re-check", so
/// coalescing is lossless.
#[derive(Debug, Default)]
pub(crate) struct WakeSlot {
    signaled: AtomicBool,
}

impl WakeSlot {
    fn signal(&self) {
        self.signaled.store(true, Ordering::Release);
    }
}

/// Consumer end of a waiter's notification slot
///
/// Returned by a blocking `execute_ops`. The host converts this into its
/// own sleep primitive; any delivered wake is advisory and the caller must
/// re-enter `execute_ops` afterwards. Signals may fire spuriously.
#[derive(Debug)]
pub struct WakeHandle {
    slot: Arc<WakeSlot>,
}

impl WakeHandle {
    /// Consume a pending signal, reporting whether one was delivered
    pub fn consume(&self) -> bool {
        self.slot.signaled.swap(false, Ordering::Acquire)
    }

    /// Peek at the slot without consuming the signal
    pub fn is_signaled(&self) -> bool {
        self.slot.signaled.load(Ordering::Acquire)
    }
}

/// A parked operation on one semaphore
#[derive(Debug)]
pub(crate) struct Waiter {
    /// What the waiter needs to proceed: 0 waits for zero, a negative
    /// value waits for that much resource
    pub(crate) value_needed: i16,
    slot: Arc<WakeSlot>,
}

impl Waiter {
    /// Create a waiter and the handle its caller will block on
    pub(crate) fn new(value_needed: i16) -> (Waiter, WakeHandle) {
        let slot = Arc::new(WakeSlot::default());
        let waiter = Waiter {
            value_needed,
            slot: slot.clone(),
        };
        (waiter, WakeHandle { slot })
    }

    /// Deliver the one-shot wake signal
    pub(crate) fn signal(&self) {
        self.slot.signal();
    }

    /// Whether `handle` belongs to this waiter
    pub(crate) fn matches(&self, handle: &WakeHandle) -> bool {
        Arc::ptr_eq(&self.slot, &handle.slot)
    }
}

/// A single semaphore from a set
///
/// Lives inside a `Set` and is protected by the set lock.
#[derive(Debug, Default)]
pub(crate) struct Semaphore {
    /// Current value, always within `[0, SEMVMX]`
    pub(crate) value: i16,
    /// PID of the last successful mutator
    pub(crate) pid: Pid,
    /// Parked operations, FIFO
    pub(crate) waiters: VecDeque<Waiter>,
}

impl Semaphore {
    /// Signal and unlink every waiter the current value satisfies
    ///
    /// Walks front to back, so waiters satisfied in the same pass leave
    /// the queue in enqueue order. Waiters waiting for zero are released
    /// as well whenever the value allows.
    pub(crate) fn wake_waiters(&mut self) {
        let value = self.value;
        self.waiters.retain(|w| {
            if (value as i32) < -(w.value_needed as i32) {
                // Still blocked.
                return true;
            }
            trace!("waking waiter needing {} at value {}", w.value_needed, value);
            w.signal();
            false
        });
    }
}
