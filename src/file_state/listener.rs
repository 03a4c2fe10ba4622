//! Notification hooks for cache and entry lifecycle events (spec §4.1).

use crate::file_state::{ChangeReason, FileState};

/// Per-entry lifecycle notifications. At most one listener per cache.
pub trait FileStateListener: Send + Sync {
    fn file_state_created(&self, state: &FileState) {
        let _ = state;
    }

    fn file_state_closed(&self, state: &FileState) {
        let _ = state;
    }

    fn file_state_expired(&self, state: &FileState) {
        let _ = state;
    }

    fn file_status_changed(&self, state: &FileState, reason: ChangeReason) {
        let _ = (state, reason);
    }
}

/// Whole-cache lifecycle notifications. At most one listener per cache.
pub trait FileStateCacheListener: Send + Sync {
    fn cache_started(&self) {}

    fn cache_shutdown(&self) {}
}
