//! Process-wide session registry (spec §4.4 "Session list").
//!
//! A `HashMap` behind a single `RwLock`, matching spec §5's "the session
//! list is mutated under its own lock; enumeration yields a snapshot" —
//! `snapshot()` clones the `Arc` handles out from under the lock so
//! callers never hold it while touching an individual session.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::session::SrvSession;

/// Registry of live sessions keyed by [`SrvSession::unique_id`].
#[derive(Default)]
pub struct SessionList {
    sessions: RwLock<HashMap<u64, Arc<SrvSession>>>,
}

impl SessionList {
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()) }
    }

    pub fn add(&self, session: Arc<SrvSession>) {
        self.sessions.write().expect("lock poisoned").insert(session.unique_id(), session);
    }

    pub fn remove(&self, unique_id: u64) -> Option<Arc<SrvSession>> {
        self.sessions.write().expect("lock poisoned").remove(&unique_id)
    }

    pub fn find(&self, unique_id: u64) -> Option<Arc<SrvSession>> {
        self.sessions.read().expect("lock poisoned").get(&unique_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A stable point-in-time view; safe to iterate without holding the registry lock.
    pub fn snapshot(&self) -> Vec<Arc<SrvSession>> {
        self.sessions.read().expect("lock poisoned").values().cloned().collect()
    }
}
