//! External-collaborator interfaces the core depends on but does not
//! implement: the concrete filesystem file object, the share mapper, and
//! the remote authentication authority (spec §6 "Downward" interfaces).

use std::sync::{Mutex, Weak};
use std::time::Duration;

use crate::error::AuthError;
use crate::file_state::{FileState, Lock};

/// A filesystem-backed open file, as seen from the lock manager and oplock
/// machinery. Implementations live entirely outside this crate; the core
/// only ever needs the weak back-reference to shared state and lock
/// bookkeeping spec §6 calls out.
pub trait NetworkFile: Send + Sync {
    /// Weak back-reference to the shared cache entry backing this file.
    ///
    /// Non-owning by construction: holding a strong `Arc` here would let a
    /// `NetworkFile` keep a `FileState` alive past what the cache's expiry
    /// sweeper decides (spec §3, §6).
    fn file_state(&self) -> Option<Weak<Mutex<FileState>>>;

    fn add_lock(&self, lock: Lock);
    fn remove_lock(&self, lock: &Lock);
    fn num_locks(&self) -> usize;
    fn lock_at(&self, index: usize) -> Option<Lock>;
    fn has_locks(&self) -> bool {
        self.num_locks() > 0
    }

    fn close(&self);
}

/// Opaque handle to a share, as returned by [`ShareMapper::find_share`].
pub struct SharedDevice {
    pub name: String,
    pub device_type: ShareType,
    pub hidden: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareType {
    Disk,
    Printer,
    Ipc,
}

/// Resolves share names to share objects, and tracks per-session dynamic
/// shares (spec §6, §4.4's `SrvSession::close_session`).
pub trait ShareMapper: Send + Sync {
    fn find_share(
        &self,
        host: &str,
        name: &str,
        device_type: ShareType,
        session_id: u64,
        create: bool,
    ) -> Option<SharedDevice>;

    fn share_list(&self, host: &str, session_id: u64, include_hidden: bool) -> Vec<SharedDevice>;

    fn delete_shares(&self, session_id: u64);
}

/// Outcome of a remote session-setup call (spec §4.3 stage 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSetupOutcome {
    Authenticated,
    Guest,
    Failed,
}

/// A single remote-authenticate session opened against a [`RemoteAuthority`].
pub trait RemoteAuthoritySession: Send {
    /// The 8-byte challenge issued when the session was opened.
    fn encryption_key(&self) -> [u8; 8];

    fn do_session_setup(
        &mut self,
        user: &str,
        domain: &str,
        lm_hash: &[u8],
        ntlm_hash: &[u8],
    ) -> Result<SessionSetupOutcome, AuthError>;

    fn close(&mut self);
}

/// A configured remote server (or domain controller) that can validate
/// credentials on this server's behalf (spec §6, §4.3).
pub trait RemoteAuthority: Send + Sync {
    fn name(&self) -> &str;
    fn domain(&self) -> &str;
    fn address(&self) -> &str;

    fn open_auth_session(
        &self,
        timeout: Duration,
    ) -> Result<Box<dyn RemoteAuthoritySession>, AuthError>;
}
