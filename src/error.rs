//! Error taxonomy for the session and shared-state engine.
//!
//! These are sum types, not exceptions: every fallible operation in this
//! crate returns one of the variants below rather than panicking, matching
//! the propagation policy of the system this core belongs to (admission and
//! lock errors reach the caller untransformed; authority/network errors are
//! absorbed and retried; background-thread errors are logged, not raised).

use thiserror::Error;

/// Reason a sharing-mode admission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SharingViolation {
    #[error("sharing mode disallows concurrent open (exclusive)")]
    Exclusive,
    #[error("sharing mode mismatch between requested and current access")]
    Mismatch,
    #[error("anonymous impersonation cannot share an already-open file")]
    AnonymousImpersonation,
    #[error("file is marked delete-on-close")]
    DeletePending,
}

/// Errors raised while granting or releasing file access (spec §4.1, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("file already open (CREATE disposition against an open file)")]
    FileExists,
    #[error("sharing violation: {0}")]
    Sharing(SharingViolation),
    #[error("access denied")]
    AccessDenied,
}

/// Errors raised by the byte-range lock manager (spec §4.2, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("lock range conflicts with an existing lock held by another owner")]
    Conflict,
    #[error("no matching lock to remove")]
    NotLocked,
}

/// Errors raised by the oplock state machine (spec §4.2, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OplockError {
    #[error("an oplock is already present on this entry")]
    ExistingOpLock,
    #[error("oplock break timed out waiting for client acknowledgement")]
    BreakTimeout,
    #[error("could not enqueue the deferred request")]
    DeferFailed,
}

/// Errors raised by the passthru authenticator (spec §4.3, §7).
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("logon failed: {0}")]
    LogonFailure(String),
    #[error("no authority available to service this logon")]
    NoAuthorityAvailable,
    #[error("authority request timed out")]
    AuthorityTimeout,
}

/// Errors raised by the pooled byte-buffer allocator (spec §4.4, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferPoolError {
    #[error("no pooled buffer became available before the wait timeout")]
    NoPooledMemory,
    #[error("requested size exceeds the largest configured tier")]
    RequestedSizeTooLarge,
    #[error("buffer released at a size that does not match any tier")]
    SizeMismatch,
}

/// Errors raised while constructing or validating configuration (spec §6, §7).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Error surfaced when the session registry or a resource pool is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("session limit reached")]
pub struct SessionLimitError;
