//! Registry of semaphore sets, one per IPC namespace
//!
//! Maintains the ID and index spaces and the key lookup:
//! - `sets` maps an ID to its set, `indexes` maps a dense index to an ID;
//!   the two stay bijective at all times
//! - IDs come from a cursor that wraps negative values to zero
//! - indexes are the lowest free slot in `[0, SEMMNI)`
//!
//! ## Locking
//!
//! One mutex protects both maps and the ID cursor. Where a set lock is
//! also needed the order is registry first, then set.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use log::warn;
use spin::Mutex;

use crate::abi::{
    SEMAEM, SEMMAP, SEMMNI, SEMMNS, SEMMNU, SEMMSL, SEMOPM, SEMUME, SEMUSZ, SEMVMX, SemInfo,
};
use crate::auth::{Credentials, FileMode, FileOwner, UserNamespace};
use crate::error::SemError;
use crate::set::Set;
use crate::Context;

/// Registry of semaphore sets, addressable by key, ID or index
pub struct Registry {
    /// User namespace owning the IPC namespace this registry belongs to
    user_ns: Arc<UserNamespace>,
    inner: Mutex<RegistryInner>,
}

struct RegistryInner {
    /// ID -> set; exclusively owns the sets
    sets: BTreeMap<i32, Arc<Set>>,
    /// Dense index -> ID, bijective with `sets`
    indexes: BTreeMap<i32, i32>,
    /// Cursor for the next ID search
    last_id_used: i32,
}

impl RegistryInner {
    fn find_by_key(&self, key: i32) -> Option<Arc<Set>> {
        self.sets.values().find(|s| s.key() == key).cloned()
    }

    fn find_index_by_id(&self, id: i32) -> Option<i32> {
        self.indexes
            .iter()
            .find(|&(_, &v)| v == id)
            .map(|(&k, _)| k)
    }

    fn first_available_index(&self) -> Option<i32> {
        (0..SEMMNI as i32).find(|idx| !self.indexes.contains_key(idx))
    }

    fn total_sems(&self) -> usize {
        self.sets.values().map(|s| s.size()).sum()
    }
}

impl Registry {
    /// Create an empty registry for a namespace
    pub fn new(user_ns: Arc<UserNamespace>) -> Self {
        Self {
            user_ns,
            inner: Mutex::new(RegistryInner {
                sets: BTreeMap::new(),
                indexes: BTreeMap::new(),
                last_id_used: 0,
            }),
        }
    }

    /// Search for a set matching `key`, creating one if requested
    ///
    /// If `private` is true the key is ignored and a new set is always
    /// created. If `create` is false the lookup fails when nothing
    /// matches. If `exclusive` is true the call fails when a set with the
    /// same key already exists.
    pub fn find_or_create(
        &self,
        ctx: &Context<'_>,
        key: i32,
        nsems: i32,
        mode: FileMode,
        private: bool,
        create: bool,
        exclusive: bool,
    ) -> Result<Arc<Set>, SemError> {
        if nsems < 0 || nsems > SEMMSL as i32 {
            return Err(SemError::InvalidArgument);
        }

        let mut inner = self.inner.lock();

        if !private {
            // Look up an existing semaphore set.
            if let Some(set) = inner.find_by_key(key) {
                set.check_open(ctx.creds, mode, nsems, create, exclusive)?;
                return Ok(set);
            }

            if !create {
                // Set not found and should not be created.
                return Err(SemError::NotFound);
            }
        }

        // Zero is only valid when an existing set is returned.
        if nsems == 0 {
            return Err(SemError::InvalidArgument);
        }

        // Apply system limits. The two maps are the same size, so the set
        // count check covers both.
        if inner.sets.len() >= SEMMNI as usize {
            return Err(SemError::NoSpace);
        }
        if inner.total_sems() + nsems as usize > SEMMNS as usize {
            return Err(SemError::NoSpace);
        }

        let owner = FileOwner::new(ctx.creds.euid, ctx.creds.egid);
        self.new_set(&mut inner, ctx, key, owner, mode, nsems as usize)
    }

    fn new_set(
        &self,
        inner: &mut RegistryInner,
        ctx: &Context<'_>,
        key: i32,
        owner: FileOwner,
        mode: FileMode,
        nsems: usize,
    ) -> Result<Arc<Set>, SemError> {
        // Find the next available ID, wrapping negative values to zero.
        let mut id = inner.last_id_used.wrapping_add(1);
        while id != inner.last_id_used {
            if id < 0 {
                id = 0;
                continue;
            }
            if !inner.sets.contains_key(&id) {
                let index = inner
                    .first_available_index()
                    .expect("no free index for a set within capacity");
                let set = Arc::new(Set::new(
                    self.user_ns.clone(),
                    id,
                    key,
                    owner,
                    owner,
                    mode,
                    nsems,
                    ctx.clock.now(),
                ));
                inner.indexes.insert(index, id);
                inner.sets.insert(id, set.clone());
                inner.last_id_used = id;
                return Ok(set);
            }
            id = id.wrapping_add(1);
        }

        warn!("semaphore id space exhausted, sets must be leaking");
        Err(SemError::OutOfMemory)
    }

    /// Look up a set by ID
    pub fn find_by_id(&self, id: i32) -> Option<Arc<Set>> {
        self.inner.lock().sets.get(&id).cloned()
    }

    /// Look up a set by its dense index
    pub fn find_by_index(&self, index: i32) -> Option<Arc<Set>> {
        let inner = self.inner.lock();
        let id = inner.indexes.get(&index)?;
        inner.sets.get(id).cloned()
    }

    /// Remove the set with the given ID, waking all of its waiters
    ///
    /// The caller must match the owner or creator of the set, or hold the
    /// IPC owner capability.
    pub fn remove_id(&self, id: i32, creds: &Credentials) -> Result<(), SemError> {
        let mut inner = self.inner.lock();

        let Some(set) = inner.sets.get(&id).cloned() else {
            return Err(SemError::InvalidArgument);
        };
        let Some(index) = inner.find_index_by_id(id) else {
            // Inconsistent state.
            panic!("unable to find an index for id {id}");
        };

        set.remove(creds)?;

        inner.sets.remove(&id);
        inner.indexes.remove(&index);
        Ok(())
    }

    /// System-wide semaphore limits and parameters
    pub fn ipc_info(&self) -> SemInfo {
        SemInfo {
            sem_map: SEMMAP,
            sem_mni: SEMMNI,
            sem_mns: SEMMNS,
            sem_mnu: SEMMNU,
            sem_msl: SEMMSL,
            sem_opm: SEMOPM,
            sem_ume: SEMUME,
            sem_usz: SEMUSZ,
            sem_vmx: SEMVMX as u32,
            sem_aem: SEMAEM as u32,
        }
    }

    /// As `ipc_info`, except `sem_usz` reports the number of existing
    /// sets and `sem_aem` the number of existing semaphores
    pub fn sem_info(&self) -> SemInfo {
        let inner = self.inner.lock();

        let mut info = self.ipc_info();
        info.sem_usz = inner.sets.len() as u32;
        info.sem_aem = inner.total_sems() as u32;
        info
    }

    /// Index of the highest used entry, 0 when the registry is empty
    ///
    /// An empty registry is indistinguishable from one whose only set sits
    /// at index 0; cross-check with `sem_info().sem_usz`.
    pub fn highest_index(&self) -> i32 {
        let inner = self.inner.lock();
        inner.indexes.keys().next_back().copied().unwrap_or(0)
    }
}
