//! Byte-range lock arbitration over a [`FileState`]'s lock list (spec §4.2).
//!
//! Pure functions over `&mut FileState`, called with the entry's monitor
//! already held via [`crate::file_state::FileStateCache::with_entry`] —
//! mirrors the teacher's pattern of keeping lock arithmetic free of any
//! lookup or I/O so it stays cheap under the entry's lock (spec §5: "no
//! blocking inside").

use crate::error::LockError;
use crate::file_state::{FileState, Lock, LockKind};

/// Appends `lock` to `state.lock_list` if it does not conflict with an
/// existing lock held by a different owner.
pub fn lock(state: &mut FileState, new_lock: Lock) -> Result<(), LockError> {
    let conflicts = state.lock_list.iter().any(|existing| {
        existing.owner_process_id != new_lock.owner_process_id
            && existing.overlaps(&new_lock)
            && forbids(existing, &new_lock)
    });
    if conflicts {
        tracing::debug!(
            path = %state.path,
            offset = new_lock.offset,
            length = new_lock.length,
            owner = new_lock.owner_process_id,
            "lock request conflicts with an existing lock"
        );
        return Err(LockError::Conflict);
    }
    state.lock_list.push(new_lock);
    Ok(())
}

/// Two locks from different owners conflict unless both are shared.
fn forbids(existing: &Lock, requested: &Lock) -> bool {
    !(existing.kind == LockKind::Shared && requested.kind == LockKind::Shared)
}

/// Removes the lock matching `target`'s owner, offset and length.
pub fn unlock(state: &mut FileState, target: &Lock) -> Result<(), LockError> {
    let idx = state.lock_list.iter().position(|l| {
        l.owner_process_id == target.owner_process_id
            && l.offset == target.offset
            && l.length == target.length
    });
    match idx {
        Some(idx) => {
            state.lock_list.remove(idx);
            Ok(())
        }
        None => Err(LockError::NotLocked),
    }
}

/// Whether `pid` may read `[offset, offset+len)`: not covered by an
/// exclusive lock owned by someone else.
pub fn can_read(state: &FileState, offset: u64, len: u64, pid: u32) -> bool {
    let probe = Lock { offset, length: len, owner_process_id: pid, kind: LockKind::Shared };
    !state.lock_list.iter().any(|l| {
        l.owner_process_id != pid && l.kind == LockKind::Exclusive && l.overlaps(&probe)
    })
}

/// Whether `pid` may write `[offset, offset+len)`: no lock owned by someone
/// else, of any kind, covers the range.
pub fn can_write(state: &FileState, offset: u64, len: u64, pid: u32) -> bool {
    let probe = Lock { offset, length: len, owner_process_id: pid, kind: LockKind::Exclusive };
    !state.lock_list.iter().any(|l| l.owner_process_id != pid && l.overlaps(&probe))
}

/// Releases every lock owned by `pid`, swallowing the case where it holds none.
pub fn release_all(state: &mut FileState, pid: u32) {
    state.lock_list.retain(|l| l.owner_process_id != pid);
}
