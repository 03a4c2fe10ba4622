//! Remote-authority pool: online/offline tracking, round-robin selection,
//! and the background reachability checker (spec §4.3).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::AuthError;
use crate::network_file::{RemoteAuthority, RemoteAuthoritySession};

struct Authority {
    inner: Arc<dyn RemoteAuthority>,
    auth_count: u64,
    last_auth_ms: i64,
}

/// Tracks a set of configured authorities, splitting them into independent
/// online/offline lists per spec §5 ("independent `online`/`offline` locks;
/// a server moves atomically between them").
pub struct PassthruServers {
    online: Mutex<Vec<Authority>>,
    offline: Mutex<Vec<Authority>>,
    null_domain_use_any_server: bool,
    next_rr: std::sync::atomic::AtomicUsize,
}

impl PassthruServers {
    pub fn new(authorities: Vec<Arc<dyn RemoteAuthority>>, null_domain_use_any_server: bool) -> Self {
        let online = authorities
            .into_iter()
            .map(|inner| Authority { inner, auth_count: 0, last_auth_ms: 0 })
            .collect();
        Self {
            online: Mutex::new(online),
            offline: Mutex::new(Vec::new()),
            null_domain_use_any_server,
            next_rr: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Opens a session against the best-matching online authority for
    /// `domain`, falling through to any online authority when no
    /// domain-matching candidate exists and that fallback is enabled.
    pub fn open_session(
        &self,
        domain: Option<&str>,
        timeout: Duration,
    ) -> Result<(Box<dyn RemoteAuthoritySession>, String), AuthError> {
        loop {
            let name = {
                let online = self.online.lock().expect("lock poisoned");
                if online.is_empty() {
                    return Err(AuthError::NoAuthorityAvailable);
                }
                let candidate = self.pick(&online, domain);
                match candidate {
                    Some(idx) => online[idx].inner.name().to_string(),
                    None => return Err(AuthError::NoAuthorityAvailable),
                }
            };

            let authority = {
                let online = self.online.lock().expect("lock poisoned");
                online.iter().find(|a| a.inner.name() == name).map(|a| a.inner.clone())
            };
            let Some(authority) = authority else { continue };

            match authority.open_auth_session(timeout) {
                Ok(session) => {
                    let mut online = self.online.lock().expect("lock poisoned");
                    if let Some(a) = online.iter_mut().find(|a| a.inner.name() == name) {
                        a.auth_count += 1;
                        a.last_auth_ms = crate::file_state::now_ms();
                    }
                    return Ok((session, name));
                }
                Err(_) => {
                    self.mark_offline(&name);
                }
            }
        }
    }

    fn pick(&self, online: &[Authority], domain: Option<&str>) -> Option<usize> {
        if online.is_empty() {
            return None;
        }
        let matching: Vec<usize> = match domain {
            Some(d) if !d.is_empty() => online
                .iter()
                .enumerate()
                .filter(|(_, a)| a.inner.domain().eq_ignore_ascii_case(d))
                .map(|(i, _)| i)
                .collect(),
            _ => Vec::new(),
        };
        let pool = if !matching.is_empty() {
            matching
        } else if domain.is_none() || domain == Some("") {
            if self.null_domain_use_any_server {
                (0..online.len()).collect()
            } else {
                return None;
            }
        } else {
            return None;
        };
        let idx = self.next_rr.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % pool.len();
        Some(pool[idx])
    }

    fn mark_offline(&self, name: &str) {
        let moved = {
            let mut online = self.online.lock().expect("lock poisoned");
            online.iter().position(|a| a.inner.name() == name).map(|i| online.remove(i))
        };
        if let Some(authority) = moved {
            tracing::warn!(authority = name, "passthru authority unreachable; marked offline");
            self.offline.lock().expect("lock poisoned").push(authority);
        }
    }

    /// Probes every offline authority with an IPC$ auth session open,
    /// moving successful probes back to the online list.
    pub fn check_offline(&self, probe_timeout: Duration) {
        let candidates: Vec<(usize, Arc<dyn RemoteAuthority>)> = {
            let offline = self.offline.lock().expect("lock poisoned");
            offline.iter().enumerate().map(|(i, a)| (i, a.inner.clone())).collect()
        };
        let mut recovered_names = Vec::new();
        for (_, authority) in candidates {
            if let Ok(mut session) = authority.open_auth_session(probe_timeout) {
                session.close();
                recovered_names.push(authority.name().to_string());
            }
        }
        if recovered_names.is_empty() {
            return;
        }
        let mut offline = self.offline.lock().expect("lock poisoned");
        let mut online = self.online.lock().expect("lock poisoned");
        offline.retain(|a| {
            if recovered_names.contains(&a.inner.name().to_string()) {
                online.push(Authority {
                    inner: a.inner.clone(),
                    auth_count: a.auth_count,
                    last_auth_ms: a.last_auth_ms,
                });
                false
            } else {
                true
            }
        });
    }

    pub fn online_count(&self) -> usize {
        self.online.lock().expect("lock poisoned").len()
    }

    pub fn offline_count(&self) -> usize {
        self.offline.lock().expect("lock poisoned").len()
    }
}
