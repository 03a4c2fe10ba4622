//! Black-box end-to-end scenarios (spec §8 S1-S4), driven purely through
//! the crate's public API rather than any module internals.
//!
//! S5 (NTLMv1 passthru logon) and S6 (authority failover) are exercised
//! as unit tests inside `src/passthru/mod.rs`, where the mock
//! `RemoteAuthority`/`RemoteAuthoritySession` test doubles already live.

use std::sync::Arc;
use std::time::Duration;

use srv_core::config::FileStateCacheConfig;
use srv_core::file_state::{
    AccessMask, FileStateCache, FileStatus, OpenAction, OpenParams, SecurityLevel, SharingMode,
};
use srv_core::oplock;

fn params(pid: u32, mask: AccessMask, shared: SharingMode) -> OpenParams {
    OpenParams {
        process_id: pid,
        access_mask: mask,
        shared_access: shared,
        open_action: OpenAction::Open,
        attributes_only: false,
        security_level: SecurityLevel::Normal,
    }
}

fn cache() -> Arc<FileStateCache> {
    FileStateCache::new(FileStateCacheConfig { cache_check_seconds: 5, ..Default::default() })
}

/// S1 — two read/read-write opens are both admitted; closing both drains
/// `open_count` back to zero.
#[test]
fn s1_sharing_read_read_admits_both_openers() {
    let cache = cache();
    let entry = cache.find_or_create(r"\\srv\s\f.txt", FileStatus::Unknown);

    let first = cache
        .grant_access(&entry, params(1, AccessMask::READ, SharingMode::ALL), FileStatus::Unknown)
        .expect("first open admitted");
    let second = cache
        .grant_access(&entry, params(2, AccessMask::READ, SharingMode::ALL), FileStatus::Unknown)
        .expect("second open admitted");

    assert_eq!(entry.lock().unwrap().open_count(), 2);
    assert_eq!(entry.lock().unwrap().effective_sharing(), SharingMode::ALL);

    cache.release_access(&entry, first);
    assert_eq!(cache.release_access(&entry, second), 0);
    cache.shutdown();
}

/// S2 — a read-only opener followed by a read/write opener requesting
/// broader sharing than the first opener granted fails with a sharing
/// violation.
#[test]
fn s2_sharing_read_write_clash_rejects_second_opener() {
    let cache = cache();
    let entry = cache.find_or_create(r"\\srv\s\f.txt", FileStatus::Unknown);

    let _first = cache
        .grant_access(&entry, params(1, AccessMask::READ, SharingMode::READ), FileStatus::Unknown)
        .expect("first open admitted");

    let second = cache.grant_access(
        &entry,
        params(2, AccessMask::READ_WRITE, SharingMode::ALL),
        FileStatus::Unknown,
    );

    assert!(second.is_err(), "second opener must be rejected by the sharing mode");
    cache.shutdown();
}

/// S3 — a CREATE-disposition open against an already-open file fails
/// regardless of sharing mode.
#[test]
fn s3_create_after_open_fails_file_exists() {
    let cache = cache();
    let entry = cache.find_or_create(r"\\srv\s\f.txt", FileStatus::Unknown);

    let _first = cache
        .grant_access(&entry, params(1, AccessMask::READ_WRITE, SharingMode::ALL), FileStatus::Unknown)
        .expect("first open admitted");

    let mut create_params = params(2, AccessMask::READ_WRITE, SharingMode::ALL);
    create_params.open_action = OpenAction::Create;

    let result = cache.grant_access(&entry, create_params, FileStatus::Unknown);
    assert!(
        matches!(result, Err(srv_core::error::AdmissionError::FileExists)),
        "CREATE against an open file must fail FileExists"
    );
    cache.shutdown();
}

/// S4 — a second open against a BATCH oplock is deferred behind a break
/// request; an owner acknowledgement downgrades and releases the
/// deferred request, while an unacknowledged break times out and fails it.
#[test]
fn s4_oplock_break_downgrades_on_ack_and_times_out_otherwise() {
    let cache = cache();

    // Acknowledged downgrade path.
    let entry = cache.find_or_create(r"\\srv\s\batch.dat", FileStatus::Unknown);
    let _first = cache
        .grant_access(&entry, params(1, AccessMask::READ_WRITE, SharingMode::ALL), FileStatus::Unknown)
        .expect("sole opener admitted");
    cache.with_entry(&entry, |state| {
        oplock::request_oplock(state, srv_core::file_state::OpLockType::Batch, 1)
            .expect("oplock grantable to sole opener")
    });

    let _second = cache
        .grant_access(&entry, params(2, AccessMask::READ, SharingMode::ALL), FileStatus::Unknown)
        .expect("second open still admitted; it is just deferred at the oplock layer");
    cache.with_entry(&entry, |state| {
        oplock::begin_break(state, 2, b"deferred-open-response".to_vec()).unwrap();
    });
    assert_eq!(
        cache.with_entry(&entry, |state| state.oplock.as_ref().unwrap().deferred.len()),
        1
    );

    let released = cache.with_entry(&entry, |state| {
        oplock::acknowledge_downgrade(state, srv_core::file_state::OpLockType::LevelIi)
    });
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].session_id, 2);
    assert_eq!(
        cache.with_entry(&entry, |state| state.oplock.as_ref().unwrap().oplock_type),
        srv_core::file_state::OpLockType::LevelIi
    );

    // Timeout path: same shape, but the owner never acknowledges.
    let timeout_entry = cache.find_or_create(r"\\srv\s\timeout.dat", FileStatus::Unknown);
    let _owner = cache
        .grant_access(&timeout_entry, params(1, AccessMask::READ_WRITE, SharingMode::ALL), FileStatus::Unknown)
        .unwrap();
    cache.with_entry(&timeout_entry, |state| {
        oplock::request_oplock(state, srv_core::file_state::OpLockType::Exclusive, 1).unwrap();
    });
    let _waiter = cache
        .grant_access(&timeout_entry, params(2, AccessMask::READ, SharingMode::ALL), FileStatus::Unknown)
        .unwrap();
    cache.with_entry(&timeout_entry, |state| {
        oplock::begin_break(state, 2, b"deferred".to_vec()).unwrap();
        state.oplock.as_mut().unwrap().break_time_ms = Some(srv_core::file_state::now_ms() - 20_000);
    });

    let timed_out = cache.with_entry(&timeout_entry, |state| {
        oplock::check_break_timeout(state, Duration::from_secs(5), srv_core::file_state::now_ms())
    });
    let released = timed_out.expect("break past its deadline must time out");
    assert_eq!(released.len(), 1);
    assert!(cache.with_entry(&timeout_entry, |state| state.oplock.is_none()));

    cache.shutdown();
}
