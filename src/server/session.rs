//! Per-connection session state (spec §4.4 `SrvSession`).
//!
//! Grounded on the teacher's `process_socket` (one task pipeline per
//! accepted connection in `lib.rs`) generalized from "the three tasks a
//! connection owns" into the protocol-independent bundle of attributes
//! spec §3/§4.4 actually asks for. The teacher never modeled a session as
//! a value — this is new structure built in its idiom (plain struct,
//! `Mutex`-guarded mutable fields, no builder boilerplate).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::file_state::now_ms;

/// Client identity/origin, passed explicitly rather than kept in
/// thread-local "current client" storage (spec §9 design notes).
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub remote_name: Option<String>,
    pub remote_address: Option<SocketAddr>,
    pub domain: Option<String>,
}

/// Authentication progress attached to a session (spec §6
/// `get_auth_context`). Cleared once the session logs on, since the
/// intermediate NTLM material has no further use and should not linger.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub user: Option<String>,
    pub pending_challenge: Option<[u8; 8]>,
}

impl AuthContext {
    pub fn clear(&mut self) {
        self.user = None;
        self.pending_challenge = None;
    }
}

/// A unit of work deferred until after the current request finishes
/// (spec §3 "post-processor queue").
pub type PostProcessor = Box<dyn FnOnce(&SrvSession) + Send>;

static NEXT_UNIQUE_ID: AtomicU64 = AtomicU64::new(1);

/// Per-connection state (spec §4.4).
///
/// `unique_id` is a process-wide identity assigned once at construction;
/// `session_id` is the protocol-visible numeric id a decoder hands back
/// to the client (distinct so a session can be renumbered at the wire
/// layer without losing its registry identity).
pub struct SrvSession {
    unique_id: u64,
    session_id: u64,
    pub process_id: u32,
    pub protocol_name: String,
    pub client: ClientInfo,
    logged_on: AtomicBool,
    persistent: AtomicBool,
    disconnected_at_ms: AtomicI64,
    last_io_ms: AtomicI64,
    shutdown: AtomicBool,
    auth: Mutex<AuthContext>,
    dynamic_shares: Mutex<Vec<String>>,
    post_processors: Mutex<Vec<PostProcessor>>,
}

impl SrvSession {
    pub fn new(session_id: u64, process_id: u32, protocol_name: impl Into<String>, client: ClientInfo) -> Self {
        Self {
            unique_id: NEXT_UNIQUE_ID.fetch_add(1, Ordering::Relaxed),
            session_id,
            process_id,
            protocol_name: protocol_name.into(),
            client,
            logged_on: AtomicBool::new(false),
            persistent: AtomicBool::new(false),
            disconnected_at_ms: AtomicI64::new(0),
            last_io_ms: AtomicI64::new(now_ms()),
            shutdown: AtomicBool::new(false),
            auth: Mutex::new(AuthContext::default()),
            dynamic_shares: Mutex::new(Vec::new()),
            post_processors: Mutex::new(Vec::new()),
        }
    }

    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn is_logged_on(&self) -> bool {
        self.logged_on.load(Ordering::Acquire)
    }

    /// Marks the session authenticated and clears any intermediate auth
    /// material (spec §4.4: "authentication context (cleared after logon)").
    pub fn mark_logged_on(&self) {
        self.logged_on.store(true, Ordering::Release);
        self.auth.lock().expect("lock poisoned").clear();
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent.load(Ordering::Relaxed)
    }

    pub fn set_persistent(&self, persistent: bool) {
        self.persistent.store(persistent, Ordering::Relaxed);
    }

    pub fn touch(&self) {
        self.last_io_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn last_io_ms(&self) -> i64 {
        self.last_io_ms.load(Ordering::Relaxed)
    }

    pub fn mark_disconnected(&self) {
        self.disconnected_at_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn disconnected_at_ms(&self) -> Option<i64> {
        match self.disconnected_at_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn with_auth_context<R>(&self, f: impl FnOnce(&mut AuthContext) -> R) -> R {
        f(&mut self.auth.lock().expect("lock poisoned"))
    }

    pub fn register_dynamic_share(&self, share_name: impl Into<String>) {
        self.dynamic_shares.lock().expect("lock poisoned").push(share_name.into());
    }

    pub fn dynamic_shares(&self) -> Vec<String> {
        self.dynamic_shares.lock().expect("lock poisoned").clone()
    }

    pub fn enqueue_post_processor(&self, work: PostProcessor) {
        self.post_processors.lock().expect("lock poisoned").push(work);
    }

    /// Drains and runs every queued post-processor in FIFO order.
    pub fn run_post_processors(self: &std::sync::Arc<Self>) {
        let queued = std::mem::take(&mut *self.post_processors.lock().expect("lock poisoned"));
        for work in queued {
            work(self);
        }
    }

    /// Tears the session down: deletes any dynamic shares it created via
    /// the share mapper (spec §4.4 `close_session`), then flips `shutdown`.
    pub fn close_session(&self, share_mapper: &dyn crate::network_file::ShareMapper) {
        if self.shutdown.swap(true, Ordering::Relaxed) {
            return;
        }
        share_mapper.delete_shares(self.session_id);
        self.mark_disconnected();
    }
}
