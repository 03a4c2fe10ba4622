//! Server lifecycle holder (spec §4.4 `NetworkServer`).
//!
//! Listener dispatch follows spec §5's ordering guarantee ("session
//! listeners are invoked in registration order; an exception from one
//! does not skip subsequent listeners") by wrapping each call in
//! `catch_unwind` — the nearest Rust analogue of the Java original
//! swallowing a listener's thrown exception — and logging with `tracing`
//! rather than propagating.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::config::NetworkServerConfig;

use super::session::SrvSession;
use super::session_list::SessionList;

/// Whole-server lifecycle notifications. At most one per server (spec §4.4).
pub trait ServerListener: Send + Sync {
    fn server_startup(&self, server: &NetworkServer) {
        let _ = server;
    }
    fn server_active(&self, server: &NetworkServer) {
        let _ = server;
    }
    fn server_shutdown(&self, server: &NetworkServer) {
        let _ = server;
    }
    fn server_error(&self, server: &NetworkServer, message: &str) {
        let _ = (server, message);
    }
}

/// Per-session lifecycle notifications; an ordered list, unlike [`ServerListener`].
pub trait SessionListener: Send + Sync {
    fn session_created(&self, session: &SrvSession) {
        let _ = session;
    }
    fn session_logged_on(&self, session: &SrvSession) {
        let _ = session;
    }
    fn session_closed(&self, session: &SrvSession) {
        let _ = session;
    }
}

/// Lifecycle holder for one protocol server: bound addresses, active/enabled
/// flags, the session registry, and the listener fan-out (spec §4.4).
pub struct NetworkServer {
    config: NetworkServerConfig,
    active: AtomicBool,
    enabled: AtomicBool,
    server_listener: RwLock<Option<Arc<dyn ServerListener>>>,
    session_listeners: RwLock<Vec<Arc<dyn SessionListener>>>,
    sessions: Arc<SessionList>,
}

impl NetworkServer {
    pub fn new(config: NetworkServerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            active: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            server_listener: RwLock::new(None),
            session_listeners: RwLock::new(Vec::new()),
            sessions: Arc::new(SessionList::new()),
        })
    }

    pub fn protocol_name(&self) -> &str {
        &self.config.protocol_name
    }

    pub fn bind_addresses(&self) -> &[String] {
        &self.config.bind_addresses
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn sessions(&self) -> &Arc<SessionList> {
        &self.sessions
    }

    pub fn set_server_listener(&self, listener: Arc<dyn ServerListener>) {
        *self.server_listener.write().expect("lock poisoned") = Some(listener);
    }

    pub fn add_session_listener(&self, listener: Arc<dyn SessionListener>) {
        self.session_listeners.write().expect("lock poisoned").push(listener);
    }

    /// Flips the server active and fires `startup` then `active` on the
    /// single [`ServerListener`] slot.
    pub fn start_server(&self) {
        self.active.store(true, Ordering::Release);
        self.notify_server(|l, s| l.server_startup(s));
        self.notify_server(|l, s| l.server_active(s));
    }

    /// Flips the server inactive. `immediate` is passed through for the
    /// caller's own connection-draining policy; the registry itself is
    /// left untouched (listener-driven close, not a forced wipe).
    pub fn shutdown_server(&self, immediate: bool) {
        let _ = immediate;
        self.active.store(false, Ordering::Release);
        self.notify_server(|l, s| l.server_shutdown(s));
    }

    pub fn notify_error(&self, message: &str) {
        self.notify_server(|l, s| l.server_error(s, message));
    }

    fn notify_server(&self, f: impl FnOnce(&Arc<dyn ServerListener>, &NetworkServer)) {
        if let Some(listener) = self.server_listener.read().expect("lock poisoned").clone() {
            if catch_unwind(AssertUnwindSafe(|| f(&listener, self))).is_err() {
                tracing::warn!(protocol = %self.protocol_name(), "server listener panicked");
            }
        }
    }

    pub fn fire_session_created(&self, session: &SrvSession) {
        self.fire(|l, s| l.session_created(s), session);
    }

    pub fn fire_session_logged_on(&self, session: &SrvSession) {
        self.fire(|l, s| l.session_logged_on(s), session);
    }

    pub fn fire_session_closed(&self, session: &SrvSession) {
        self.fire(|l, s| l.session_closed(s), session);
    }

    fn fire(&self, f: impl Fn(&Arc<dyn SessionListener>, &SrvSession), session: &SrvSession) {
        let listeners = self.session_listeners.read().expect("lock poisoned").clone();
        for listener in &listeners {
            if catch_unwind(AssertUnwindSafe(|| f(listener, session))).is_err() {
                tracing::warn!(
                    protocol = %self.protocol_name(),
                    session = session.unique_id(),
                    "session listener panicked; continuing with remaining listeners"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::session::ClientInfo;
    use std::sync::atomic::AtomicUsize;

    struct CountingServerListener {
        startups: AtomicUsize,
        actives: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    impl ServerListener for CountingServerListener {
        fn server_startup(&self, _server: &NetworkServer) {
            self.startups.fetch_add(1, Ordering::Relaxed);
        }
        fn server_active(&self, _server: &NetworkServer) {
            self.actives.fetch_add(1, Ordering::Relaxed);
        }
        fn server_shutdown(&self, _server: &NetworkServer) {
            self.shutdowns.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn start_and_shutdown_fire_lifecycle_events() {
        let server = NetworkServer::new(NetworkServerConfig::default());
        let listener = Arc::new(CountingServerListener {
            startups: AtomicUsize::new(0),
            actives: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        });
        server.set_server_listener(listener.clone());

        server.start_server();
        assert!(server.is_active());
        assert_eq!(listener.startups.load(Ordering::Relaxed), 1);
        assert_eq!(listener.actives.load(Ordering::Relaxed), 1);

        server.shutdown_server(false);
        assert!(!server.is_active());
        assert_eq!(listener.shutdowns.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn session_listeners_fire_in_order_and_survive_a_panicking_listener() {
        let server = NetworkServer::new(NetworkServerConfig::default());
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        struct Recording(Arc<std::sync::Mutex<Vec<u32>>>, u32);
        impl SessionListener for Recording {
            fn session_created(&self, _session: &SrvSession) {
                self.0.lock().unwrap().push(self.1);
            }
        }
        struct Panicking;
        impl SessionListener for Panicking {
            fn session_created(&self, _session: &SrvSession) {
                panic!("boom");
            }
        }

        server.add_session_listener(Arc::new(Recording(order.clone(), 1)));
        server.add_session_listener(Arc::new(Panicking));
        server.add_session_listener(Arc::new(Recording(order.clone(), 2)));

        let session = SrvSession::new(1, 1, "SMB", ClientInfo::default());
        server.fire_session_created(&session);

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }
}
