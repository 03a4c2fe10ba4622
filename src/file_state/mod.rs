//! Per-path file-state cache entries (spec §3, §4.1).

mod admission;
mod cache;
pub mod listener;

pub use admission::{evaluate_admission, SecurityLevel};
pub use cache::{FileStateCache, FileStateRef};

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Sentinel meaning "this entry never expires."
pub const NO_TIMEOUT: i64 = i64::MAX;

/// Sentinel for an unassigned file id.
pub const UNKNOWN_FILE_ID: i64 = -1;

/// Current time in absolute milliseconds, as the rest of the model expects.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}

/// Existence state of the path a [`FileState`] describes (spec §3, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Unknown,
    FileExists,
    DirectoryExists,
    NotExists,
}

/// Reason a [`FileStatus`] transition occurred (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeReason {
    None,
    FileCreated,
    FolderCreated,
    FileDeleted,
    FolderDeleted,
}

/// Lifecycle state of cached file data (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataStatus {
    Unknown,
    LoadWait,
    Loading,
    Available,
    Updated,
    SaveWait,
    Saving,
    Saved,
    Deleted,
    Renamed,
    DeleteOnClose,
}

/// Sharing-mode bitmask governing concurrent opens (spec GLOSSARY, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharingMode(u32);

impl SharingMode {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(1);
    pub const WRITE: Self = Self(2);
    pub const DELETE: Self = Self(4);
    pub const ALL: Self = Self(1 | 2 | 4);
    /// Alias used by the admission rule when nothing may share the file.
    pub const NOSHARING: Self = Self::NONE;

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitAnd for SharingMode {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl std::ops::BitOr for SharingMode {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Access mask requested by an open (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessMask(u32);

impl AccessMask {
    pub const READ: Self = Self(1);
    pub const WRITE: Self = Self(2);
    pub const READ_WRITE: Self = Self(1 | 2);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn wants_write(self) -> bool {
        self.0 & Self::WRITE.0 != 0
    }

    pub const fn wants_read_only(self) -> bool {
        self.0 == Self::READ.0
    }
}

/// Open disposition, as relevant to the admission rule (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAction {
    Open,
    Create,
    OpenOrCreate,
    TruncateExisting,
}

/// Parameters describing a single open attempt, as handed to [`FileStateCache::grant_access`].
#[derive(Debug, Clone, Copy)]
pub struct OpenParams {
    pub process_id: u32,
    pub access_mask: AccessMask,
    pub shared_access: SharingMode,
    pub open_action: OpenAction,
    pub attributes_only: bool,
    pub security_level: SecurityLevel,
}

/// Handle returned by a successful [`FileStateCache::grant_access`] (spec §3 AccessToken).
///
/// Must be handed back to [`FileStateCache::release_access`] on close.
#[derive(Debug, Clone, Copy)]
pub struct AccessToken {
    pub(crate) id: u64,
    pub process_id: u32,
    pub access_mask: AccessMask,
    pub shared_access: SharingMode,
    pub attributes_only: bool,
    pub released: bool,
}

/// A single byte-range lock record (spec §3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lock {
    pub offset: u64,
    pub length: u64,
    pub owner_process_id: u32,
    pub kind: LockKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Shared,
    Exclusive,
}

impl Lock {
    /// Whether `self` and `other` cover at least one common byte.
    ///
    /// A zero-length lock covers no bytes and is always compatible (spec §8).
    pub fn overlaps(&self, other: &Lock) -> bool {
        if self.length == 0 || other.length == 0 {
            return false;
        }
        let self_end = self.offset.saturating_add(self.length);
        let other_end = other.offset.saturating_add(other.length);
        self.offset < other_end && other.offset < self_end
    }
}

/// Oplock level (spec §3, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpLockType {
    None,
    LevelIi,
    Exclusive,
    Batch,
}

/// A single deferred request held behind an in-flight oplock break (spec §4.2).
pub struct DeferredRequest {
    pub session_id: u64,
    pub packet: Vec<u8>,
    pub last_touch_ms: i64,
}

/// Oplock record attached to a [`FileState`] (spec §3).
pub struct OpLock {
    pub oplock_type: OpLockType,
    pub owner_session_id: u64,
    pub break_time_ms: Option<i64>,
    pub deferred: Vec<DeferredRequest>,
    pub break_failed: bool,
}

/// Per-path cache entry (spec §3).
pub struct FileState {
    pub path: String,
    pub file_status: FileStatus,
    pub file_id: i64,
    pub expiry_time: i64,
    pub retention_until: i64,
    pub access_list: Vec<AccessToken>,
    pub delete_on_close: bool,
    pub lock_list: Vec<Lock>,
    pub oplock: Option<OpLock>,
    pub pseudo_files: Option<Vec<String>>,
    pub attributes: Option<HashMap<String, String>>,
    pub file_size: i64,
    pub alloc_size: i64,
    pub access_time: i64,
    pub modify_time: i64,
    pub change_time: i64,
    pub data_status: DataStatus,
    pub process_id: u32,
    pub sharing_access: SharingMode,
    next_token_id: u64,
}

impl FileState {
    pub fn new(path: String) -> Self {
        Self {
            path,
            file_status: FileStatus::Unknown,
            file_id: UNKNOWN_FILE_ID,
            expiry_time: NO_TIMEOUT,
            retention_until: -1,
            access_list: Vec::new(),
            delete_on_close: false,
            lock_list: Vec::new(),
            oplock: None,
            pseudo_files: None,
            attributes: None,
            file_size: -1,
            alloc_size: -1,
            access_time: 0,
            modify_time: 0,
            change_time: 0,
            data_status: DataStatus::Unknown,
            process_id: 0,
            sharing_access: SharingMode::ALL,
            next_token_id: 0,
        }
    }

    /// Number of non-attribute-only opens (spec §3 invariant).
    pub fn open_count(&self) -> usize {
        self.access_list.iter().filter(|t| !t.attributes_only).count()
    }

    /// Effective sharing mode, per the spec §3 invariant: `ALL` when nobody
    /// holds a data open, `NOSHARING` while delete-on-close, else the first
    /// data opener's requested mode.
    pub fn effective_sharing(&self) -> SharingMode {
        if self.delete_on_close {
            return SharingMode::NOSHARING;
        }
        if self.open_count() == 0 {
            return SharingMode::ALL;
        }
        self.sharing_access
    }

    pub fn has_active_locks(&self) -> bool {
        !self.lock_list.is_empty()
    }

    pub fn has_active_oplock(&self) -> bool {
        self.oplock.as_ref().is_some_and(|o| o.oplock_type != OpLockType::None)
    }

    /// Quiescence predicate used by the expiry sweep (spec §4.1, §8).
    pub fn is_idle(&self, now: i64) -> bool {
        self.open_count() == 0
            && !self.has_active_locks()
            && !self.has_active_oplock()
            && self.retention_until <= now
    }

    fn next_token(&mut self) -> u64 {
        self.next_token_id += 1;
        self.next_token_id
    }
}
