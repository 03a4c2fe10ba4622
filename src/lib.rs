//! Session and shared-state engine for a multi-protocol file-sharing
//! server: the file-state cache, byte-range lock and oplock manager,
//! sharing/access arbitration, passthru authenticator, and the common
//! server runtime (session base, session list, listener plumbing, pooled
//! byte-buffer allocator) those depend on.
//!
//! Wire encoding/decoding, DCE/RPC marshalling, concrete filesystem
//! backends, and NetBIOS name resolution are external collaborators,
//! referenced only through the traits in [`network_file`].

pub mod buffer_pool;
pub mod config;
pub mod error;
pub mod file_state;
pub mod lock_manager;
pub mod network_file;
pub mod oplock;
pub mod passthru;
pub mod server;
