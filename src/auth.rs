//! Identity, permission and user-namespace model
//!
//! The core consumes credentials; it never derives them. A caller hands in
//! a [`Credentials`] snapshot (effective IDs, supplementary groups,
//! capability set, owning user namespace) and the permission helpers on a
//! set evaluate requests against it.
//!
//! UID/GID mapping follows the Linux uid_map model: a namespace is a list
//! of contiguous extents translating kernel IDs into namespace-local IDs.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use bitflags::bitflags;

/// User ID type (Linux-compatible)
pub type Uid = u32;

/// Group ID type (Linux-compatible)
pub type Gid = u32;

/// Process ID type (Linux-compatible)
pub type Pid = i32;

/// ID reported when a kernel ID has no mapping in the viewer's namespace
pub const OVERFLOW_ID: u32 = 65534;

/// Owning identity of an IPC object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOwner {
    pub uid: Uid,
    pub gid: Gid,
}

impl FileOwner {
    pub const fn new(uid: Uid, gid: Gid) -> Self {
        Self { uid, gid }
    }
}

bitflags! {
    /// Access bits of a single mode triad
    ///
    /// EXEC is carried for mode fidelity but never required by this
    /// subsystem.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessMode: u16 {
        const READ = 0o4;
        const WRITE = 0o2;
        const EXEC = 0o1;
    }
}

/// A 9-bit owner/group/other mode word
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileMode(u16);

impl FileMode {
    /// Build from raw mode bits, masking to the lower 9 bits
    pub const fn new(mode: u16) -> Self {
        Self(mode & 0o777)
    }

    /// Raw 9-bit mode word
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Owner triad
    pub fn user(self) -> AccessMode {
        AccessMode::from_bits_truncate((self.0 >> 6) & 0o7)
    }

    /// Group triad
    pub fn group(self) -> AccessMode {
        AccessMode::from_bits_truncate((self.0 >> 3) & 0o7)
    }

    /// Other triad
    pub fn other(self) -> AccessMode {
        AccessMode::from_bits_truncate(self.0 & 0o7)
    }
}

bitflags! {
    /// Capability set carried by a credential
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u64 {
        /// Override IPC ownership checks (CAP_IPC_OWNER, Linux cap 15)
        const IPC_OWNER = 1 << 15;
    }
}

/// One contiguous run of mapped IDs
///
/// Kernel IDs `[lower_first, lower_first + count)` map to namespace IDs
/// `[first, first + count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UidGidExtent {
    pub first: u32,
    pub lower_first: u32,
    pub count: u32,
}

/// An ordered list of extents translating kernel IDs to namespace IDs
#[derive(Debug, Clone)]
pub struct UidGidMap {
    extents: Vec<UidGidExtent>,
}

impl UidGidMap {
    /// Build a map from explicit extents
    pub fn new(extents: Vec<UidGidExtent>) -> Self {
        Self { extents }
    }

    /// The identity map covering the whole ID space
    pub fn identity() -> Self {
        Self {
            extents: vec![UidGidExtent {
                first: 0,
                lower_first: 0,
                count: u32::MAX,
            }],
        }
    }

    /// Translate a kernel ID into this namespace, `None` if unmapped
    pub fn from_kernel(&self, id: u32) -> Option<u32> {
        for ext in &self.extents {
            if id >= ext.lower_first && id - ext.lower_first < ext.count {
                return Some(ext.first + (id - ext.lower_first));
            }
        }
        None
    }
}

/// A user namespace: the UID/GID translation domain of a registry
#[derive(Debug)]
pub struct UserNamespace {
    uid_map: UidGidMap,
    gid_map: UidGidMap,
}

impl UserNamespace {
    /// The root namespace, mapping every ID to itself
    pub fn new_root() -> Arc<Self> {
        Arc::new(Self {
            uid_map: UidGidMap::identity(),
            gid_map: UidGidMap::identity(),
        })
    }

    /// A namespace with explicit UID and GID maps
    pub fn with_maps(uid_map: UidGidMap, gid_map: UidGidMap) -> Arc<Self> {
        Arc::new(Self { uid_map, gid_map })
    }

    /// Map a kernel UID into this namespace
    pub fn map_from_kuid(&self, uid: Uid) -> Option<Uid> {
        self.uid_map.from_kernel(uid)
    }

    /// Map a kernel GID into this namespace
    pub fn map_from_kgid(&self, gid: Gid) -> Option<Gid> {
        self.gid_map.from_kernel(gid)
    }
}

/// Credentials of a caller, snapshotted at the syscall boundary
#[derive(Clone)]
pub struct Credentials {
    /// Effective user ID
    pub euid: Uid,
    /// Effective group ID
    pub egid: Gid,
    /// Supplementary group IDs
    pub groups: Vec<Gid>,
    /// Capability set
    pub caps: Capabilities,
    /// Namespace the caller lives in
    pub user_ns: Arc<UserNamespace>,
}

impl Credentials {
    /// Credentials with no supplementary groups and no capabilities
    pub fn new(euid: Uid, egid: Gid, user_ns: Arc<UserNamespace>) -> Self {
        Self {
            euid,
            egid,
            groups: Vec::new(),
            caps: Capabilities::empty(),
            user_ns,
        }
    }

    /// Root credentials holding the IPC owner capability
    pub fn root(user_ns: Arc<UserNamespace>) -> Self {
        Self {
            euid: 0,
            egid: 0,
            groups: Vec::new(),
            caps: Capabilities::IPC_OWNER,
            user_ns,
        }
    }

    /// Whether the caller's effective or supplementary groups include `gid`
    pub fn in_group(&self, gid: Gid) -> bool {
        self.egid == gid || self.groups.contains(&gid)
    }

    /// Whether the caller holds `cap` in the target namespace
    ///
    /// A capability only applies inside the namespace the credential was
    /// taken in; there is no hierarchy walk here.
    pub fn has_capability_in(&self, cap: Capabilities, ns: &Arc<UserNamespace>) -> bool {
        self.caps.contains(cap) && Arc::ptr_eq(&self.user_ns, ns)
    }
}
