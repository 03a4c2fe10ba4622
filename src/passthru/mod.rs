//! Passthru NTLM/SPNEGO authenticator (spec §4.3).
//!
//! NTLM/SPNEGO token parsing and re-encoding are wire-format concerns and
//! stay with the protocol decoder layer (spec §1 Out of scope); this
//! module consumes and produces already-parsed token structs rather than
//! raw bytes, and drives the four-stage state machine spec §4.3 describes
//! per session id.

pub mod servers;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::PassthruConfig;
use crate::error::AuthError;
use crate::network_file::{RemoteAuthoritySession, SessionSetupOutcome};
use servers::PassthruServers;

/// Parsed NTLMSSP type-1 (or SPNEGO NegTokenInit) negotiate message.
///
/// Empty today: the core does not inspect negotiate flags, only the fact
/// that a negotiate arrived.
pub struct Type1Token;

/// Target-info carried in the type-2 challenge the core constructs.
pub struct TargetInfo {
    pub domain: String,
    pub server: String,
    pub dns_domain: String,
    pub full_dns: String,
}

/// The type-2 challenge token handed back after negotiate (spec §4.3 stage 2).
pub struct Type2Token {
    pub challenge: [u8; 8],
    pub target_info: TargetInfo,
}

/// Parsed NTLMSSP type-3 (or SPNEGO NegTokenTarg) authenticate message.
pub struct Type3Token {
    pub user: String,
    pub domain: String,
    pub lm_hash: Vec<u8>,
    pub ntlm_hash: Vec<u8>,
    /// True for NTLMv2 (128-bit + extended-security): rejected by passthru
    /// per spec §4.3 stage 3.
    pub is_ntlm_v2: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Init,
    Negotiated,
    Done,
}

struct Session {
    stage: Stage,
    process_id: u32,
    remote: Option<Box<dyn RemoteAuthoritySession>>,
    challenge: [u8; 8],
}

/// Per-session NTLM/SPNEGO logon driver backed by a [`PassthruServers`] pool.
pub struct PassthruAuthenticator {
    servers: PassthruServers,
    config: PassthruConfig,
    sessions: Mutex<HashMap<u64, Session>>,
}

impl PassthruAuthenticator {
    pub fn new(servers: PassthruServers, config: PassthruConfig) -> Self {
        Self { servers, config, sessions: Mutex::new(HashMap::new()) }
    }

    /// Stage 1 — opens a remote auth session and records its challenge.
    pub fn begin(&self, session_id: u64, process_id: u32) -> Result<[u8; 8], AuthError> {
        let (mut remote, _authority_name) =
            self.servers.open_session(self.config.domain.as_deref(), self.config.session_timeout())?;
        let challenge = remote.encryption_key();
        self.sessions.lock().expect("lock poisoned").insert(
            session_id,
            Session { stage: Stage::Init, process_id, remote: Some(remote), challenge },
        );
        Ok(challenge)
    }

    /// Stage 2 — builds the type-2 challenge against the stored session.
    pub fn negotiate(
        &self,
        session_id: u64,
        _type1: &Type1Token,
        local_server_name: &str,
        local_domain: &str,
        dns_domain: &str,
    ) -> Result<Type2Token, AuthError> {
        let mut sessions = self.sessions.lock().expect("lock poisoned");
        let session = sessions.get_mut(&session_id).ok_or(AuthError::NoAuthorityAvailable)?;
        session.stage = Stage::Negotiated;
        Ok(Type2Token {
            challenge: session.challenge,
            target_info: TargetInfo {
                domain: local_domain.to_string(),
                server: local_server_name.to_string(),
                dns_domain: dns_domain.to_string(),
                full_dns: format!("{local_server_name}.{dns_domain}"),
            },
        })
    }

    /// Stage 3 — forwards the credentials to the remote authority.
    ///
    /// NTLMv2 is explicitly unsupported by passthru and rejected outright.
    pub fn authenticate(
        &self,
        session_id: u64,
        type3: &Type3Token,
    ) -> Result<SessionSetupOutcome, AuthError> {
        if type3.is_ntlm_v2 {
            self.cleanup(session_id);
            return Err(AuthError::LogonFailure("NTLMv2 is not supported by passthru".into()));
        }

        let mut sessions = self.sessions.lock().expect("lock poisoned");
        let session = sessions.get_mut(&session_id).ok_or(AuthError::NoAuthorityAvailable)?;
        if session.stage != Stage::Negotiated {
            return Err(AuthError::LogonFailure("authenticate received before negotiate".into()));
        }
        let remote = session.remote.as_mut().ok_or(AuthError::NoAuthorityAvailable)?;
        let outcome = remote.do_session_setup(&type3.user, &type3.domain, &type3.lm_hash, &type3.ntlm_hash)?;

        let result = match outcome {
            SessionSetupOutcome::Authenticated => Ok(SessionSetupOutcome::Authenticated),
            SessionSetupOutcome::Guest if self.config.guest_allowed => Ok(SessionSetupOutcome::Guest),
            SessionSetupOutcome::Guest => {
                Err(AuthError::LogonFailure("guest access not permitted".into()))
            }
            SessionSetupOutcome::Failed => Err(AuthError::LogonFailure("remote authority rejected credentials".into())),
        };
        session.stage = Stage::Done;
        drop(sessions);
        self.cleanup(session_id);
        result
    }

    /// Stage 4 — closes the remote session on any terminal outcome.
    ///
    /// `disable_session_cleanup` (spec §6) skips the automatic close so an
    /// operator diagnosing a remote authority can inspect the still-open
    /// back-channel session instead of racing its teardown.
    pub fn cleanup(&self, session_id: u64) {
        if self.config.disable_session_cleanup {
            return;
        }
        if let Some(mut session) = self.sessions.lock().expect("lock poisoned").remove(&session_id) {
            if let Some(remote) = session.remote.as_mut() {
                remote.close();
            }
        }
    }

    pub fn servers(&self) -> &PassthruServers {
        &self.servers
    }
}

/// Spawns the background offline-authority checker for `authenticator`.
pub fn spawn_offline_checker(
    authenticator: std::sync::Arc<PassthruAuthenticator>,
) -> (std::thread::JoinHandle<()>, std::sync::Arc<std::sync::atomic::AtomicBool>) {
    let interval = authenticator.config.offline_check_interval();
    let probe_timeout = Duration::from_millis(PassthruConfig::MIN_SESSION_TMO_MS);
    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let stop_clone = stop.clone();
    let handle = std::thread::spawn(move || {
        while !stop_clone.load(std::sync::atomic::Ordering::Relaxed) {
            std::thread::sleep(interval);
            if stop_clone.load(std::sync::atomic::Ordering::Relaxed) {
                break;
            }
            authenticator.servers.check_offline(probe_timeout);
        }
    });
    (handle, stop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network_file::RemoteAuthority;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;

    struct MockSession {
        outcome: SessionSetupOutcome,
        closed: Arc<AtomicBool>,
    }

    impl RemoteAuthoritySession for MockSession {
        fn encryption_key(&self) -> [u8; 8] {
            [1, 2, 3, 4, 5, 6, 7, 8]
        }

        fn do_session_setup(
            &mut self,
            _user: &str,
            _domain: &str,
            _lm_hash: &[u8],
            _ntlm_hash: &[u8],
        ) -> Result<SessionSetupOutcome, AuthError> {
            Ok(self.outcome)
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::Relaxed);
        }
    }

    struct MockAuthority {
        name: String,
        domain: String,
        outcome: SessionSetupOutcome,
        fail_open: bool,
        opens: AtomicU64,
        closed: Arc<AtomicBool>,
    }

    impl RemoteAuthority for MockAuthority {
        fn name(&self) -> &str {
            &self.name
        }
        fn domain(&self) -> &str {
            &self.domain
        }
        fn address(&self) -> &str {
            "10.0.0.1"
        }
        fn open_auth_session(
            &self,
            _timeout: Duration,
        ) -> Result<Box<dyn RemoteAuthoritySession>, AuthError> {
            self.opens.fetch_add(1, Ordering::Relaxed);
            if self.fail_open {
                return Err(AuthError::AuthorityTimeout);
            }
            Ok(Box::new(MockSession { outcome: self.outcome, closed: self.closed.clone() }))
        }
    }

    fn authority(outcome: SessionSetupOutcome, fail_open: bool) -> (Arc<MockAuthority>, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        (
            Arc::new(MockAuthority {
                name: "dc1".into(),
                domain: "EXAMPLE".into(),
                outcome,
                fail_open,
                opens: AtomicU64::new(0),
                closed: closed.clone(),
            }),
            closed,
        )
    }

    #[test]
    fn successful_ntlmv1_logon_closes_remote_session() {
        let (authority, closed) = authority(SessionSetupOutcome::Authenticated, false);
        let servers = PassthruServers::new(vec![authority], true);
        let auth = PassthruAuthenticator::new(servers, PassthruConfig::default());

        auth.begin(1, 100).unwrap();
        auth.negotiate(1, &Type1Token, "SRV", "EXAMPLE", "example.com").unwrap();
        let outcome = auth
            .authenticate(1, &Type3Token {
                user: "alice".into(),
                domain: "EXAMPLE".into(),
                lm_hash: vec![0; 24],
                ntlm_hash: vec![0; 24],
                is_ntlm_v2: false,
            })
            .unwrap();

        assert_eq!(outcome, SessionSetupOutcome::Authenticated);
        assert!(closed.load(Ordering::Relaxed));
    }

    #[test]
    fn ntlmv2_is_rejected_without_contacting_the_remote() {
        let (authority, closed) = authority(SessionSetupOutcome::Authenticated, false);
        let servers = PassthruServers::new(vec![authority], true);
        let auth = PassthruAuthenticator::new(servers, PassthruConfig::default());

        auth.begin(1, 100).unwrap();
        let result = auth.authenticate(1, &Type3Token {
            user: "alice".into(),
            domain: "EXAMPLE".into(),
            lm_hash: vec![],
            ntlm_hash: vec![],
            is_ntlm_v2: true,
        });
        assert!(matches!(result, Err(AuthError::LogonFailure(_))));
        assert!(closed.load(Ordering::Relaxed));
    }

    #[test]
    fn guest_outcome_rejected_when_not_permitted() {
        let (authority, _closed) = authority(SessionSetupOutcome::Guest, false);
        let servers = PassthruServers::new(vec![authority], true);
        let mut config = PassthruConfig::default();
        config.guest_allowed = false;
        let auth = PassthruAuthenticator::new(servers, config);

        auth.begin(1, 100).unwrap();
        auth.negotiate(1, &Type1Token, "SRV", "EXAMPLE", "example.com").unwrap();
        let result = auth.authenticate(1, &Type3Token {
            user: "bob".into(),
            domain: "".into(),
            lm_hash: vec![],
            ntlm_hash: vec![],
            is_ntlm_v2: false,
        });
        assert!(matches!(result, Err(AuthError::LogonFailure(_))));
    }

    #[test]
    fn failover_moves_failing_authority_offline_and_tries_next() {
        let (bad, _bad_closed) = authority(SessionSetupOutcome::Authenticated, true);
        let (good, _good_closed) = authority(SessionSetupOutcome::Authenticated, false);
        let servers = PassthruServers::new(vec![bad, good], true);

        assert!(servers.open_session(None, Duration::from_secs(1)).is_ok());
        assert_eq!(servers.online_count(), 1);
        assert_eq!(servers.offline_count(), 1);
    }
}
