//! System V semaphore core for a user-space kernel
//!
//! This crate implements the semaphore half of a SysV IPC subsystem the
//! way a sandboxed OS personality needs it: a [`Registry`] of semaphore
//! [`Set`]s plus the atomic `semop`-style engine, with blocking expressed
//! as one-shot wake handles instead of in-kernel sleeps.
//!
//! ## Design
//!
//! Following Linux semantics:
//! - Sets are found by key, ID or dense index and carry the usual
//!   owner/group/other permission word
//! - A batch of operations either applies completely or not at all
//! - A call that would block enqueues a FIFO waiter and hands back a
//!   [`WakeHandle`]; the host parks on it with its own primitive, then
//!   re-enters [`Set::execute_ops`] with the same batch
//!
//! The host supplies identity and time through [`Context`]: credentials
//! snapshotted at the syscall boundary and a wall clock. Syscall dispatch,
//! copy-in/out and SEM_UNDO bookkeeping live above this crate.
//!
//! ## Locking
//!
//! Lock ordering (outermost to innermost):
//! ```text
//! Registry.inner (Mutex) - protects the ID and index maps
//!   └─ Set.inner (Mutex) - protects values, waiters, perms, times
//! ```
//!
//! No two set locks are ever held together and nothing sleeps under a
//! lock.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod abi;
pub mod auth;
pub mod error;
pub mod registry;
pub mod sem;
pub mod set;
pub mod time;

pub use abi::{IPC_NOWAIT, SEMMNI, SEMMNS, SEMMSL, SEMOPM, SEMVMX, SemBuf, SemInfo, SemidDs};
pub use auth::{
    AccessMode, Capabilities, Credentials, FileMode, FileOwner, Gid, Pid, Uid, UserNamespace,
};
pub use error::SemError;
pub use registry::Registry;
pub use sem::WakeHandle;
pub use set::{PendingWait, Set};
pub use time::{Clock, Time};

/// Execution context of one call into the subsystem
///
/// Bundles what the host kernel knows about the caller: its credentials
/// and the clock used to stamp `otime`/`ctime`.
pub struct Context<'a> {
    pub creds: &'a Credentials,
    pub clock: &'a dyn Clock,
}

impl<'a> Context<'a> {
    pub fn new(creds: &'a Credentials, clock: &'a dyn Clock) -> Self {
        Self { creds, clock }
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicI64, Ordering};

    use crate::auth::{Credentials, UserNamespace};
    use crate::time::{Clock, Time};

    /// Settable test clock
    pub(crate) struct TestClock {
        secs: AtomicI64,
    }

    impl TestClock {
        pub(crate) fn new() -> Self {
            Self {
                secs: AtomicI64::new(1),
            }
        }

        pub(crate) fn set_secs(&self, secs: i64) {
            self.secs.store(secs, Ordering::Relaxed);
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Time {
            Time::from_secs(self.secs.load(Ordering::Relaxed))
        }
    }

    /// Plain credentials in `ns` with no groups or capabilities
    pub(crate) fn creds_for(euid: u32, egid: u32, ns: &Arc<UserNamespace>) -> Credentials {
        Credentials::new(euid, egid, ns.clone())
    }

    /// Credentials holding the IPC owner capability in `ns`
    pub(crate) fn privileged(ns: &Arc<UserNamespace>) -> Credentials {
        Credentials::root(ns.clone())
    }
}
