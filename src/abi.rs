//! Linux ABI constants and structures for System V semaphores
//!
//! Values and layouts must match the host ABI exactly; the structs below
//! mirror `struct sembuf`, `struct ipc64_perm`, `struct semid64_ds` and
//! `struct seminfo` from the Linux uapi headers.

/// Maximum semaphore value (SEMVMX)
pub const SEMVMX: i16 = 32767;

/// Maximum number of semaphore sets per namespace (SEMMNI)
pub const SEMMNI: u32 = 32000;

/// Maximum number of semaphores per set (SEMMSL)
pub const SEMMSL: u32 = 32000;

/// Maximum number of semaphores in all sets (SEMMNS)
pub const SEMMNS: u32 = SEMMNI * SEMMSL;

/// Maximum number of operations per semop call (SEMOPM)
pub const SEMOPM: u32 = 500;

/// Maximum value recordable for semaphore adjustment (SEMAEM)
pub const SEMAEM: i16 = SEMVMX;

/// Maximum number of undo entries per process (SEMUME)
pub const SEMUME: u32 = SEMOPM;

/// Maximum number of undo structures system-wide (SEMMNU)
pub const SEMMNU: u32 = SEMMNS;

/// Size of semaphore map (SEMMAP)
pub const SEMMAP: u32 = SEMMNS;

/// Size in bytes of struct sem_undo (SEMUSZ)
pub const SEMUSZ: u32 = 20;

/// Return error instead of blocking (IPC_NOWAIT), as found in `sem_flg`
pub const IPC_NOWAIT: i16 = 0o4000;

/// A single semaphore operation, equivalent to `struct sembuf`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemBuf {
    /// Semaphore index in the set
    pub sem_num: u16,
    /// Operation: negative decrements, positive increments, zero waits for zero
    pub sem_op: i16,
    /// Operation flags (IPC_NOWAIT)
    pub sem_flg: i16,
}

impl SemBuf {
    /// Build an operation triplet
    pub const fn new(sem_num: u16, sem_op: i16, sem_flg: i16) -> Self {
        Self {
            sem_num,
            sem_op,
            sem_flg,
        }
    }
}

/// IPC permission block, equivalent to `struct ipc64_perm`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IpcPerm {
    pub key: i32,
    pub uid: u32,
    pub gid: u32,
    pub cuid: u32,
    pub cgid: u32,
    pub mode: u16,
    pub __pad1: u16,
    pub seq: u16,
    pub __pad2: u16,
    pub __unused1: u64,
    pub __unused2: u64,
}

/// Semaphore set descriptor, equivalent to `struct semid64_ds`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SemidDs {
    pub sem_perm: IpcPerm,
    pub sem_otime: i64,
    pub __unused1: u64,
    pub sem_ctime: i64,
    pub __unused2: u64,
    pub sem_nsems: u64,
    pub __unused3: u64,
    pub __unused4: u64,
}

/// System-wide semaphore limits, equivalent to `struct seminfo`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SemInfo {
    pub sem_map: u32,
    pub sem_mni: u32,
    pub sem_mns: u32,
    pub sem_mnu: u32,
    pub sem_msl: u32,
    pub sem_opm: u32,
    pub sem_ume: u32,
    pub sem_usz: u32,
    pub sem_vmx: u32,
    pub sem_aem: u32,
}
