//! Semaphore sets and the atomic multi-operation engine
//!
//! A set is a fixed-size array of semaphores sharing permissions and
//! timestamps. `execute_ops` applies a batch of operations so that either
//! all of them take effect or none are observable: the batch is dry-run
//! against a shadow copy of the value vector and only committed to the
//! live semaphores once the whole batch clears.
//!
//! ## Locking
//!
//! One mutex per set protects everything mutable. The engine never sleeps
//! under it; a blocked call enqueues a waiter and returns a wake handle
//! for the host to park on.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::abi::{IPC_NOWAIT, IpcPerm, SEMVMX, SemBuf, SemidDs};
use crate::auth::{
    AccessMode, Capabilities, Credentials, FileMode, FileOwner, OVERFLOW_ID, Pid, UserNamespace,
};
use crate::error::SemError;
use crate::sem::{Semaphore, Waiter, WakeHandle};
use crate::time::Time;
use crate::Context;

/// A blocked `execute_ops` call
///
/// Carries the handle the caller must park on and the index of the
/// semaphore that caused the block. No part of the batch has been applied.
#[derive(Debug)]
pub struct PendingWait {
    /// One-shot wake handle; wakes are advisory and may be spurious
    pub handle: WakeHandle,
    /// Index of the semaphore the caller is waiting on
    pub sem_num: u16,
}

/// A set of semaphores that can be operated on atomically
#[derive(Debug)]
pub struct Set {
    /// User namespace of the owning registry, for capability checks
    user_ns: Arc<UserNamespace>,
    /// Handle identifying the set
    id: i32,
    /// User-provided key shared between processes
    key: i32,
    /// Number of semaphores, fixed at creation
    nsems: usize,
    /// User that created the set
    creator: FileOwner,
    /// Everything mutable, under the set lock
    inner: Mutex<SetInner>,
}

#[derive(Debug)]
struct SetInner {
    owner: FileOwner,
    perms: FileMode,
    op_time: Time,
    change_time: Time,
    sems: Box<[Semaphore]>,
    /// Set once the registry removed this set; all waiters have been
    /// signalled by then and every later operation fails with `Removed`
    dead: bool,
}

impl SetInner {
    fn sem(&self, num: i32) -> Option<&Semaphore> {
        usize::try_from(num).ok().and_then(|n| self.sems.get(n))
    }

    fn sem_mut(&mut self, num: i32) -> Option<&mut Semaphore> {
        usize::try_from(num).ok().and_then(|n| self.sems.get_mut(n))
    }
}

impl Set {
    pub(crate) fn new(
        user_ns: Arc<UserNamespace>,
        id: i32,
        key: i32,
        owner: FileOwner,
        creator: FileOwner,
        perms: FileMode,
        nsems: usize,
        change_time: Time,
    ) -> Self {
        let sems: Vec<Semaphore> = (0..nsems).map(|_| Semaphore::default()).collect();
        Self {
            user_ns,
            id,
            key,
            nsems,
            creator,
            inner: Mutex::new(SetInner {
                owner,
                perms,
                op_time: Time::ZERO,
                change_time,
                sems: sems.into_boxed_slice(),
                dead: false,
            }),
        }
    }

    /// Handle identifying the set within its registry
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Key the set was created with
    pub fn key(&self) -> i32 {
        self.key
    }

    /// Number of semaphores in the set. Immutable, needs no lock.
    pub fn size(&self) -> usize {
        self.nsems
    }

    // ========================================================================
    // Metadata operations
    // ========================================================================

    /// Change owner and permissions
    ///
    /// The caller must match the owner or creator, or hold the IPC owner
    /// capability.
    pub fn change(
        &self,
        ctx: &Context<'_>,
        owner: FileOwner,
        perms: FileMode,
    ) -> Result<(), SemError> {
        let mut inner = self.inner.lock();

        if !self.check_credentials(&inner, ctx.creds) && !self.check_capability(&inner, ctx.creds) {
            return Err(SemError::PermissionDenied);
        }

        inner.owner = owner;
        inner.perms = perms;
        inner.change_time = ctx.clock.now();
        Ok(())
    }

    /// Extract descriptor information; requires read permission
    pub fn get_stat(&self, creds: &Credentials) -> Result<SemidDs, SemError> {
        self.sem_stat(creds, AccessMode::READ)
    }

    /// Extract descriptor information without a permission check
    pub fn get_stat_any(&self, creds: &Credentials) -> Result<SemidDs, SemError> {
        self.sem_stat(creds, AccessMode::empty())
    }

    fn sem_stat(&self, creds: &Credentials, req: AccessMode) -> Result<SemidDs, SemError> {
        let inner = self.inner.lock();

        if !self.check_perms(&inner, creds, req) {
            return Err(SemError::PermissionDenied);
        }

        // IDs are rendered in the caller's namespace; unmapped IDs show as
        // the overflow ID.
        let ns = &creds.user_ns;
        let map_uid = |uid| ns.map_from_kuid(uid).unwrap_or(OVERFLOW_ID);
        let map_gid = |gid| ns.map_from_kgid(gid).unwrap_or(OVERFLOW_ID);

        Ok(SemidDs {
            sem_perm: IpcPerm {
                key: self.key,
                uid: map_uid(inner.owner.uid),
                gid: map_gid(inner.owner.gid),
                cuid: map_uid(self.creator.uid),
                cgid: map_gid(self.creator.gid),
                mode: inner.perms.bits(),
                // IPC sequence numbers are not implemented.
                seq: 0,
                ..IpcPerm::default()
            },
            sem_otime: inner.op_time.time_t(),
            sem_ctime: inner.change_time.time_t(),
            sem_nsems: self.nsems as u64,
            ..SemidDs::default()
        })
    }

    /// Override one semaphore value, waking waiters as needed
    pub fn set_val(
        &self,
        ctx: &Context<'_>,
        num: i32,
        val: i16,
        pid: Pid,
    ) -> Result<(), SemError> {
        if val < 0 || val > SEMVMX {
            return Err(SemError::Range);
        }

        let mut inner = self.inner.lock();

        if !self.check_perms(&inner, ctx.creds, AccessMode::WRITE) {
            return Err(SemError::PermissionDenied);
        }

        let Some(sem) = inner.sem_mut(num) else {
            return Err(SemError::Range);
        };
        sem.value = val;
        sem.pid = pid;
        sem.wake_waiters();
        inner.change_time = ctx.clock.now();
        Ok(())
    }

    /// Override all semaphore values, waking waiters as needed
    ///
    /// `vals.len()` must equal `size()`; a mismatch is a programming error
    /// in the caller and panics. Every value is validated before any
    /// mutation takes place.
    pub fn set_val_all(
        &self,
        ctx: &Context<'_>,
        vals: &[u16],
        pid: Pid,
    ) -> Result<(), SemError> {
        assert_eq!(
            vals.len(),
            self.nsems,
            "vals length {} differs from set size {}",
            vals.len(),
            self.nsems
        );

        for &val in vals {
            if val > SEMVMX as u16 {
                return Err(SemError::Range);
            }
        }

        let mut inner = self.inner.lock();

        if !self.check_perms(&inner, ctx.creds, AccessMode::WRITE) {
            return Err(SemError::PermissionDenied);
        }

        for (i, &val) in vals.iter().enumerate() {
            let sem = &mut inner.sems[i];
            sem.value = val as i16;
            sem.pid = pid;
            sem.wake_waiters();
        }
        inner.change_time = ctx.clock.now();
        Ok(())
    }

    /// Read one semaphore value; requires read permission
    pub fn get_val(&self, num: i32, creds: &Credentials) -> Result<i16, SemError> {
        let inner = self.inner.lock();

        if !self.check_perms(&inner, creds, AccessMode::READ) {
            return Err(SemError::PermissionDenied);
        }

        inner.sem(num).map(|s| s.value).ok_or(SemError::Range)
    }

    /// Read all semaphore values; requires read permission
    pub fn get_val_all(&self, creds: &Credentials) -> Result<Vec<u16>, SemError> {
        let inner = self.inner.lock();

        if !self.check_perms(&inner, creds, AccessMode::READ) {
            return Err(SemError::PermissionDenied);
        }

        Ok(inner.sems.iter().map(|s| s.value as u16).collect())
    }

    /// Read the PID of the last process to operate on a semaphore
    pub fn get_pid(&self, num: i32, creds: &Credentials) -> Result<Pid, SemError> {
        let inner = self.inner.lock();

        if !self.check_perms(&inner, creds, AccessMode::READ) {
            return Err(SemError::PermissionDenied);
        }

        inner.sem(num).map(|s| s.pid).ok_or(SemError::Range)
    }

    fn count_waiters(
        &self,
        num: i32,
        creds: &Credentials,
        pred: impl Fn(&Waiter) -> bool,
    ) -> Result<u16, SemError> {
        let inner = self.inner.lock();

        if !self.check_perms(&inner, creds, AccessMode::READ) {
            return Err(SemError::PermissionDenied);
        }

        let Some(sem) = inner.sem(num) else {
            return Err(SemError::Range);
        };
        Ok(sem.waiters.iter().filter(|w| pred(w)).count() as u16)
    }

    /// Number of waiters waiting for the semaphore to become zero
    pub fn count_zero_waiters(&self, num: i32, creds: &Credentials) -> Result<u16, SemError> {
        self.count_waiters(num, creds, |w| w.value_needed == 0)
    }

    /// Number of waiters waiting for the semaphore value to increase
    pub fn count_negative_waiters(&self, num: i32, creds: &Credentials) -> Result<u16, SemError> {
        self.count_waiters(num, creds, |w| w.value_needed < 0)
    }

    // ========================================================================
    // The atomic engine
    // ========================================================================

    /// Attempt to execute a batch of operations atomically
    ///
    /// Succeeds only when every operation can be applied; no live change
    /// is made otherwise. `Ok(None)` means the batch was applied.
    /// `Ok(Some(_))` means the call would block: one waiter was enqueued
    /// on the blocking semaphore and the caller must park on the returned
    /// handle, then re-enter with the same batch. Batches are bounded by
    /// `SEMOPM` at the dispatch layer.
    pub fn execute_ops(
        &self,
        ctx: &Context<'_>,
        ops: &[SemBuf],
        pid: Pid,
    ) -> Result<Option<PendingWait>, SemError> {
        let mut inner = self.inner.lock();

        // Did it race with a removal operation?
        if inner.dead {
            return Err(SemError::Removed);
        }

        // Validate the operations.
        let mut read_only = true;
        for op in ops {
            if (op.sem_num as usize) >= self.nsems {
                return Err(SemError::TooBig);
            }
            if op.sem_op != 0 {
                read_only = false;
            }
        }

        let req = if read_only {
            AccessMode::READ
        } else {
            AccessMode::WRITE
        };
        if !self.check_perms(&inner, ctx.creds, req) {
            return Err(SemError::PermissionDenied);
        }

        self.do_execute_ops(&mut inner, ctx, ops, pid)
    }

    fn do_execute_ops(
        &self,
        inner: &mut SetInner,
        ctx: &Context<'_>,
        ops: &[SemBuf],
        pid: Pid,
    ) -> Result<Option<PendingWait>, SemError> {
        // Changes go to this shadow vector until the whole batch succeeds.
        // It never escapes the call.
        let mut tmp: Vec<i16> = inner.sems.iter().map(|s| s.value).collect();

        for op in ops {
            let num = op.sem_num as usize;
            if op.sem_op == 0 {
                // Wait for zero.
                if tmp[num] != 0 {
                    if op.sem_flg & IPC_NOWAIT != 0 {
                        return Err(SemError::WouldBlock);
                    }
                    let (waiter, handle) = Waiter::new(0);
                    inner.sems[num].waiters.push_back(waiter);
                    return Ok(Some(PendingWait {
                        handle,
                        sem_num: op.sem_num,
                    }));
                }
            } else if op.sem_op < 0 {
                // Decrement, blocking while there is not enough resource.
                let need = -(op.sem_op as i32);
                if need > SEMVMX as i32 {
                    return Err(SemError::Range);
                }
                if need > tmp[num] as i32 {
                    if op.sem_flg & IPC_NOWAIT != 0 {
                        return Err(SemError::WouldBlock);
                    }
                    let (waiter, handle) = Waiter::new(op.sem_op);
                    inner.sems[num].waiters.push_back(waiter);
                    return Ok(Some(PendingWait {
                        handle,
                        sem_num: op.sem_num,
                    }));
                }
                tmp[num] = (tmp[num] as i32 - need) as i16;
            } else {
                // Increment.
                if tmp[num] as i32 > SEMVMX as i32 - op.sem_op as i32 {
                    return Err(SemError::Range);
                }
                tmp[num] += op.sem_op;
            }
        }

        // All operations succeeded, apply them. Incrementing one semaphore
        // may satisfy decrementers parked on any other, so every queue in
        // the set gets a waker pass; wakes are advisory.
        for (i, &val) in tmp.iter().enumerate() {
            let sem = &mut inner.sems[i];
            sem.value = val;
            sem.wake_waiters();
        }
        for op in ops {
            inner.sems[op.sem_num as usize].pid = pid;
        }
        inner.op_time = ctx.clock.now();
        Ok(None)
    }

    /// Notify that a waiter gave up and will not park on its handle
    ///
    /// Not finding the waiter is legal: a concurrent waker pass already
    /// unlinked it and the delivered signal sits absorbed in the slot.
    pub fn abort_wait(&self, num: u16, handle: &WakeHandle) {
        let mut inner = self.inner.lock();

        let sem = &mut inner.sems[num as usize];
        if let Some(pos) = sem.waiters.iter().position(|w| w.matches(handle)) {
            sem.waiters.remove(pos);
        }
    }

    /// Remove the set on behalf of `creds`
    ///
    /// Marks the set dead and signals every waiter on every semaphore;
    /// their re-entered calls observe `Removed`.
    pub(crate) fn remove(&self, creds: &Credentials) -> Result<(), SemError> {
        let mut inner = self.inner.lock();

        // The effective user must match the creator or owner of the set,
        // or hold the IPC owner capability.
        if !self.check_credentials(&inner, creds) && !self.check_capability(&inner, creds) {
            return Err(SemError::PermissionDenied);
        }

        inner.dead = true;
        for sem in inner.sems.iter_mut() {
            for waiter in sem.waiters.drain(..) {
                waiter.signal();
            }
        }
        Ok(())
    }

    // ========================================================================
    // Permission helpers
    // ========================================================================

    fn check_credentials(&self, inner: &SetInner, creds: &Credentials) -> bool {
        inner.owner.uid == creds.euid
            || inner.owner.gid == creds.egid
            || self.creator.uid == creds.euid
            || self.creator.gid == creds.egid
    }

    fn check_capability(&self, inner: &SetInner, creds: &Credentials) -> bool {
        creds.has_capability_in(Capabilities::IPC_OWNER, &self.user_ns)
            && creds.user_ns.map_from_kuid(inner.owner.uid).is_some()
    }

    fn check_perms(&self, inner: &SetInner, creds: &Credentials, req: AccessMode) -> bool {
        // Owner, group member or other?
        let triad = if inner.owner.uid == creds.euid {
            inner.perms.user()
        } else if creds.in_group(inner.owner.gid) {
            inner.perms.group()
        } else {
            inner.perms.other()
        };

        if triad.contains(req) {
            return true;
        }

        self.check_capability(inner, creds)
    }

    /// Permission and parameter gate for returning an existing set from a
    /// keyed lookup
    pub(crate) fn check_open(
        &self,
        creds: &Credentials,
        mode: FileMode,
        nsems: i32,
        create: bool,
        exclusive: bool,
    ) -> Result<(), SemError> {
        let inner = self.inner.lock();

        // The requested mode's owner triad states the access the caller
        // wants; exec is meaningless here.
        let req = mode.user() & (AccessMode::READ | AccessMode::WRITE);
        if !self.check_perms(&inner, creds, req) {
            return Err(SemError::PermissionDenied);
        }
        if nsems > self.nsems as i32 {
            return Err(SemError::InvalidArgument);
        }
        if create && exclusive {
            return Err(SemError::AlreadyExists);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::SEMVMX;
    use crate::test_util::{TestClock, creds_for, privileged};
    use crate::auth::UserNamespace;
    use std::thread;

    fn test_set_in(ns: &Arc<UserNamespace>, nsems: usize) -> Arc<Set> {
        Arc::new(Set::new(
            ns.clone(),
            1,
            0x1234,
            FileOwner::new(0, 0),
            FileOwner::new(0, 0),
            FileMode::new(0o600),
            nsems,
            Time::from_secs(1),
        ))
    }

    fn test_set(nsems: usize) -> Arc<Set> {
        test_set_in(&UserNamespace::new_root(), nsems)
    }

    // Drives a batch to completion the way a syscall loop would: park on
    // the handle (spinning here), then re-enter with the same batch.
    fn run_to_completion(set: &Set, ops: &[SemBuf], pid: Pid) -> Result<(), SemError> {
        let ns = UserNamespace::new_root();
        let creds = creds_for(0, 0, &ns);
        let clock = TestClock::new();
        let ctx = Context::new(&creds, &clock);
        loop {
            match set.execute_ops(&ctx, ops, pid)? {
                None => return Ok(()),
                Some(pending) => {
                    while !pending.handle.consume() {
                        thread::yield_now();
                    }
                }
            }
        }
    }

    #[test]
    fn test_basic_increment_decrement() {
        let set = test_set(1);
        let ns = UserNamespace::new_root();
        let creds = creds_for(0, 0, &ns);
        let clock = TestClock::new();
        let ctx = Context::new(&creds, &clock);

        assert!(
            set.execute_ops(&ctx, &[SemBuf::new(0, 5, 0)], 10)
                .unwrap()
                .is_none()
        );
        assert_eq!(set.get_val(0, &creds).unwrap(), 5);
        assert!(
            set.execute_ops(&ctx, &[SemBuf::new(0, -3, 0)], 11)
                .unwrap()
                .is_none()
        );
        assert_eq!(set.get_val(0, &creds).unwrap(), 2);
        assert_eq!(set.get_pid(0, &creds).unwrap(), 11);
    }

    #[test]
    fn test_atomic_failure_leaves_state_untouched() {
        let set = test_set(3);
        let ns = UserNamespace::new_root();
        let creds = creds_for(0, 0, &ns);
        let clock = TestClock::new();
        let ctx = Context::new(&creds, &clock);

        set.set_val_all(&ctx, &[1, 1, 1], 1).unwrap();
        let before = set.get_stat(&creds).unwrap();

        // The last op cannot be satisfied, so the first two must not land.
        let ops = [
            SemBuf::new(0, -1, 0),
            SemBuf::new(1, -1, 0),
            SemBuf::new(2, -2, IPC_NOWAIT),
        ];
        assert_eq!(
            set.execute_ops(&ctx, &ops, 2).unwrap_err(),
            SemError::WouldBlock
        );
        assert_eq!(set.get_val_all(&creds).unwrap(), vec![1, 1, 1]);
        assert_eq!(set.get_stat(&creds).unwrap().sem_otime, before.sem_otime);
    }

    #[test]
    fn test_nowait_batch_never_blocks() {
        let set = test_set(1);
        let ns = UserNamespace::new_root();
        let creds = creds_for(0, 0, &ns);
        let clock = TestClock::new();
        let ctx = Context::new(&creds, &clock);

        let ops = [SemBuf::new(0, -1, IPC_NOWAIT)];
        assert_eq!(
            set.execute_ops(&ctx, &ops, 1).unwrap_err(),
            SemError::WouldBlock
        );

        let ops = [SemBuf::new(0, 1, IPC_NOWAIT), SemBuf::new(0, 0, IPC_NOWAIT)];
        assert_eq!(
            set.execute_ops(&ctx, &ops, 1).unwrap_err(),
            SemError::WouldBlock
        );
    }

    #[test]
    fn test_signal_wakes_decrementer() {
        let set = test_set(1);
        let ns = UserNamespace::new_root();
        let creds = creds_for(0, 0, &ns);
        let clock = TestClock::new();
        let ctx = Context::new(&creds, &clock);

        let blocker = {
            let set = set.clone();
            thread::spawn(move || run_to_completion(&set, &[SemBuf::new(0, -1, 0)], 42))
        };

        // Wait until the decrementer is parked, then signal.
        while set.count_negative_waiters(0, &creds).unwrap() == 0 {
            thread::yield_now();
        }
        set.execute_ops(&ctx, &[SemBuf::new(0, 1, 0)], 7).unwrap();

        blocker.join().unwrap().unwrap();
        assert_eq!(set.get_val(0, &creds).unwrap(), 0);
        // The decrement landed last.
        assert_eq!(set.get_pid(0, &creds).unwrap(), 42);
    }

    #[test]
    fn test_wait_for_zero() {
        let set = test_set(1);
        let ns = UserNamespace::new_root();
        let creds = creds_for(0, 0, &ns);
        let clock = TestClock::new();
        let ctx = Context::new(&creds, &clock);

        set.set_val(&ctx, 0, 2, 1).unwrap();

        let blocker = {
            let set = set.clone();
            thread::spawn(move || run_to_completion(&set, &[SemBuf::new(0, 0, 0)], 42))
        };

        while set.count_zero_waiters(0, &creds).unwrap() == 0 {
            thread::yield_now();
        }
        set.set_val(&ctx, 0, 0, 1).unwrap();

        blocker.join().unwrap().unwrap();
        assert_eq!(set.get_val(0, &creds).unwrap(), 0);
    }

    #[test]
    fn test_abort_without_wake() {
        let set = test_set(1);
        let ns = UserNamespace::new_root();
        let creds = creds_for(0, 0, &ns);
        let clock = TestClock::new();
        let ctx = Context::new(&creds, &clock);

        let pending = set
            .execute_ops(&ctx, &[SemBuf::new(0, -1, 0)], 1)
            .unwrap()
            .expect("operation should block");
        assert_eq!(pending.sem_num, 0);
        assert_eq!(set.count_negative_waiters(0, &creds).unwrap(), 1);

        set.abort_wait(pending.sem_num, &pending.handle);
        assert_eq!(set.count_negative_waiters(0, &creds).unwrap(), 0);

        // Aborting again is a no-op.
        set.abort_wait(pending.sem_num, &pending.handle);
    }

    #[test]
    fn test_out_of_range_index_fails_batch() {
        let set = test_set(2);
        let ns = UserNamespace::new_root();
        let creds = creds_for(0, 0, &ns);
        let clock = TestClock::new();
        let ctx = Context::new(&creds, &clock);

        let ops = [SemBuf::new(0, 1, 0), SemBuf::new(2, 1, 0)];
        assert_eq!(set.execute_ops(&ctx, &ops, 1).unwrap_err(), SemError::TooBig);
        assert_eq!(set.get_val_all(&creds).unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_increment_overflow() {
        let set = test_set(1);
        let ns = UserNamespace::new_root();
        let creds = creds_for(0, 0, &ns);
        let clock = TestClock::new();
        let ctx = Context::new(&creds, &clock);

        set.set_val(&ctx, 0, SEMVMX, 1).unwrap();
        assert_eq!(
            set.execute_ops(&ctx, &[SemBuf::new(0, 1, 0)], 1).unwrap_err(),
            SemError::Range
        );
        assert_eq!(set.get_val(0, &creds).unwrap(), SEMVMX);
    }

    #[test]
    fn test_setval_validates() {
        let set = test_set(2);
        let ns = UserNamespace::new_root();
        let creds = creds_for(0, 0, &ns);
        let clock = TestClock::new();
        let ctx = Context::new(&creds, &clock);

        assert_eq!(set.set_val(&ctx, 0, -1, 1).unwrap_err(), SemError::Range);
        assert_eq!(
            set.set_val(&ctx, 0, SEMVMX.wrapping_add(1), 1).unwrap_err(),
            SemError::Range
        );
        assert_eq!(set.set_val(&ctx, 5, 1, 1).unwrap_err(), SemError::Range);
        assert_eq!(set.get_val(5, &creds).unwrap_err(), SemError::Range);
        assert_eq!(set.get_pid(-1, &creds).unwrap_err(), SemError::Range);

        set.set_val(&ctx, 1, SEMVMX, 3).unwrap();
        assert_eq!(set.get_val(1, &creds).unwrap(), SEMVMX);
        assert_eq!(set.get_pid(1, &creds).unwrap(), 3);
    }

    #[test]
    fn test_setvalall_validates_before_mutating() {
        let set = test_set(2);
        let ns = UserNamespace::new_root();
        let creds = creds_for(0, 0, &ns);
        let clock = TestClock::new();
        let ctx = Context::new(&creds, &clock);

        set.set_val_all(&ctx, &[3, 4], 1).unwrap();
        assert_eq!(
            set.set_val_all(&ctx, &[1, SEMVMX as u16 + 1], 1).unwrap_err(),
            SemError::Range
        );
        assert_eq!(set.get_val_all(&creds).unwrap(), vec![3, 4]);
    }

    #[test]
    fn test_permission_denied_without_mode_bits() {
        let ns = UserNamespace::new_root();
        let set = test_set_in(&ns, 1);
        let other = creds_for(1000, 1000, &ns);
        let clock = TestClock::new();
        let ctx = Context::new(&other, &clock);

        assert_eq!(set.get_val(0, &other).unwrap_err(), SemError::PermissionDenied);
        assert_eq!(
            set.execute_ops(&ctx, &[SemBuf::new(0, 1, 0)], 1).unwrap_err(),
            SemError::PermissionDenied
        );

        // The capability substitutes for ownership.
        let mut cap = privileged(&ns);
        cap.euid = 1000;
        cap.egid = 1000;
        assert_eq!(set.get_val(0, &cap).unwrap(), 0);
    }

    #[test]
    fn test_readonly_batch_needs_only_read() {
        let ns = UserNamespace::new_root();
        let set = Arc::new(Set::new(
            ns.clone(),
            1,
            0x1234,
            FileOwner::new(0, 0),
            FileOwner::new(0, 0),
            FileMode::new(0o644),
            1,
            Time::from_secs(1),
        ));
        let other = creds_for(1000, 1000, &ns);
        let clock = TestClock::new();
        let ctx = Context::new(&other, &clock);

        // All-zero batch is a read; value is zero so it completes.
        assert!(
            set.execute_ops(&ctx, &[SemBuf::new(0, 0, 0)], 1)
                .unwrap()
                .is_none()
        );
        // An altering batch needs write permission.
        assert_eq!(
            set.execute_ops(&ctx, &[SemBuf::new(0, 1, 0)], 1).unwrap_err(),
            SemError::PermissionDenied
        );
    }

    #[test]
    fn test_stat_contents() {
        let set = test_set(3);
        let ns = UserNamespace::new_root();
        let creds = creds_for(0, 0, &ns);
        let clock = TestClock::new();
        let ctx = Context::new(&creds, &clock);

        clock.set_secs(9);
        set.execute_ops(&ctx, &[SemBuf::new(1, 2, 0)], 5).unwrap();

        let ds = set.get_stat(&creds).unwrap();
        assert_eq!(ds.sem_perm.key, 0x1234);
        assert_eq!(ds.sem_perm.uid, 0);
        assert_eq!(ds.sem_perm.cuid, 0);
        assert_eq!(ds.sem_perm.mode, 0o600);
        assert_eq!(ds.sem_perm.seq, 0);
        assert_eq!(ds.sem_nsems, 3);
        assert_eq!(ds.sem_ctime, 1);
        assert_eq!(ds.sem_otime, 9);
    }

    #[test]
    fn test_stat_any_bypasses_permissions() {
        let set = test_set(1);
        let ns = UserNamespace::new_root();
        let other = creds_for(1000, 1000, &ns);

        assert_eq!(set.get_stat(&other).unwrap_err(), SemError::PermissionDenied);
        let ds = set.get_stat_any(&other).unwrap();
        assert_eq!(ds.sem_nsems, 1);
    }

    #[test]
    fn test_change_updates_owner_and_perms() {
        let set = test_set(1);
        let ns = UserNamespace::new_root();
        let creds = creds_for(0, 0, &ns);
        let clock = TestClock::new();
        let ctx = Context::new(&creds, &clock);

        clock.set_secs(20);
        set.change(&ctx, FileOwner::new(1000, 1000), FileMode::new(0o660))
            .unwrap();

        let ds = set.get_stat_any(&creds).unwrap();
        assert_eq!(ds.sem_perm.uid, 1000);
        assert_eq!(ds.sem_perm.mode, 0o660);
        assert_eq!(ds.sem_perm.cuid, 0);
        assert_eq!(ds.sem_ctime, 20);

        // The previous owner no longer passes the credential check but the
        // creator still does.
        set.change(&ctx, FileOwner::new(0, 0), FileMode::new(0o600))
            .unwrap();

        let stranger = creds_for(2000, 2000, &ns);
        let sctx = Context::new(&stranger, &clock);
        assert_eq!(
            set.change(&sctx, FileOwner::new(2000, 2000), FileMode::new(0o777))
                .unwrap_err(),
            SemError::PermissionDenied
        );
    }

    #[test]
    fn test_waiter_counts_by_kind() {
        let set = test_set(2);
        let ns = UserNamespace::new_root();
        let creds = creds_for(0, 0, &ns);
        let clock = TestClock::new();
        let ctx = Context::new(&creds, &clock);

        set.set_val(&ctx, 0, 1, 1).unwrap();

        let dec = set
            .execute_ops(&ctx, &[SemBuf::new(0, -2, 0)], 1)
            .unwrap()
            .expect("should block");
        let zero = set
            .execute_ops(&ctx, &[SemBuf::new(0, 0, 0)], 2)
            .unwrap()
            .expect("should block");

        assert_eq!(set.count_negative_waiters(0, &creds).unwrap(), 1);
        assert_eq!(set.count_zero_waiters(0, &creds).unwrap(), 1);
        assert_eq!(set.count_negative_waiters(1, &creds).unwrap(), 0);

        set.abort_wait(dec.sem_num, &dec.handle);
        set.abort_wait(zero.sem_num, &zero.handle);
        assert_eq!(set.count_negative_waiters(0, &creds).unwrap(), 0);
        assert_eq!(set.count_zero_waiters(0, &creds).unwrap(), 0);
    }

    #[test]
    fn test_removed_set_rejects_operations() {
        let set = test_set(1);
        let ns = UserNamespace::new_root();
        let creds = creds_for(0, 0, &ns);
        let clock = TestClock::new();
        let ctx = Context::new(&creds, &clock);

        set.remove(&creds).unwrap();
        assert_eq!(
            set.execute_ops(&ctx, &[SemBuf::new(0, 1, 0)], 1).unwrap_err(),
            SemError::Removed
        );
    }
}
