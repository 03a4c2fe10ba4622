//! Sharing/access admission rule (spec §4.1).
//!
//! Kept as its own sub-module per the component-share table in spec §2,
//! which calls sharing arbitration out as a distinct ~10% of the source —
//! large enough, and independently testable enough, to not bury inside
//! `cache.rs`'s map-management code.

use crate::error::{AdmissionError, SharingViolation};
use crate::file_state::{AccessMask, FileState, OpenAction, OpenParams, SharingMode};

/// Caller's authentication/impersonation level, as relevant to admission
/// (spec §4.1 steps 3b and 3f).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    Anonymous,
    Guest,
    Normal,
    /// The session is impersonating the identity that already holds the
    /// file open (e.g. a same-process reopen).
    Impersonation,
}

/// Outcome of a successful admission check: what the cache must record.
pub struct Admission {
    pub attributes_only: bool,
    pub becomes_first_open: bool,
}

/// Evaluates whether `params` may be admitted against `entry`'s current
/// state. Pure function; the caller (`FileStateCache::grant_access`) is
/// responsible for holding the entry's lock and applying the returned
/// [`Admission`] to the entry.
pub fn evaluate_admission(
    entry: &FileState,
    params: &OpenParams,
) -> Result<Admission, AdmissionError> {
    if params.attributes_only {
        return Ok(Admission { attributes_only: true, becomes_first_open: false });
    }

    if entry.open_count() == 0 {
        return Ok(Admission { attributes_only: false, becomes_first_open: true });
    }

    if params.open_action == OpenAction::Create {
        tracing::debug!(path = %entry.path, "admission rejected: CREATE against an open file");
        return Err(AdmissionError::FileExists);
    }

    if params.security_level == SecurityLevel::Impersonation
        && params.process_id == entry.process_id
    {
        return Ok(Admission { attributes_only: false, becomes_first_open: false });
    }

    let current = entry.effective_sharing();

    if params.access_mask.wants_read_only() && current.contains(SharingMode::READ) {
        return Ok(Admission { attributes_only: false, becomes_first_open: false });
    }

    if params.access_mask.wants_write() && current.contains(SharingMode::WRITE) {
        return Ok(Admission { attributes_only: false, becomes_first_open: false });
    }

    if current.is_none() || entry.delete_on_close {
        tracing::debug!(
            path = %entry.path,
            delete_on_close = entry.delete_on_close,
            "admission rejected: sharing mode exclusive"
        );
        return Err(AdmissionError::Sharing(SharingViolation::Exclusive));
    }

    if (current & params.shared_access).bits() != params.shared_access.bits() {
        tracing::debug!(path = %entry.path, "admission rejected: sharing mode mismatch");
        return Err(AdmissionError::Sharing(SharingViolation::Mismatch));
    }

    if params.shared_access.is_none() {
        tracing::debug!(path = %entry.path, "admission rejected: exclusive access requested");
        return Err(AdmissionError::Sharing(SharingViolation::Exclusive));
    }

    if params.security_level == SecurityLevel::Anonymous {
        tracing::debug!(path = %entry.path, "admission rejected: anonymous impersonation");
        return Err(AdmissionError::Sharing(SharingViolation::AnonymousImpersonation));
    }

    Ok(Admission { attributes_only: false, becomes_first_open: false })
}
