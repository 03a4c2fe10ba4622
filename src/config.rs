//! Per-component configuration (spec §6).
//!
//! Each struct mirrors one row of the configuration table in spec §6 and
//! carries the concrete numeric defaults the surrounding prose specifies.
//! Loaded from TOML with `serde`, the same way the teacher's top-level
//! `Cargo.toml` already depended on `serde`/`toml` for (unbuilt) config
//! parsing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for [`crate::file_state::FileStateCache`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStateCacheConfig {
    /// Seconds an idle (no opens/locks/oplock) entry survives before eviction.
    pub file_state_expire_seconds: u64,
    /// Sweep interval; clamped to a 5 s floor per spec §4.1.
    pub cache_check_seconds: u64,
    /// Whether path lookups fold case (see spec §4.1 path normalization).
    pub case_sensitive: bool,
    pub debug: bool,
    pub debug_expired: bool,
    pub dump_on_shutdown: bool,
}

impl Default for FileStateCacheConfig {
    fn default() -> Self {
        Self {
            file_state_expire_seconds: 300,
            cache_check_seconds: 60,
            case_sensitive: false,
            debug: false,
            debug_expired: false,
            dump_on_shutdown: false,
        }
    }
}

impl FileStateCacheConfig {
    const MIN_CHECK_SECONDS: u64 = 5;

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_check_seconds < Self::MIN_CHECK_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "cache_check_seconds must be >= {}",
                Self::MIN_CHECK_SECONDS
            )));
        }
        Ok(())
    }

    /// Sweep interval, floored at the configured minimum.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.cache_check_seconds.max(Self::MIN_CHECK_SECONDS))
    }

    pub fn expire_duration(&self) -> Duration {
        Duration::from_secs(self.file_state_expire_seconds)
    }
}

/// Protocol preference for a passthru back-channel leg (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportProtocol {
    NetBios,
    NativeSmb,
    None,
}

/// Configuration for [`crate::passthru::PassthruAuthenticator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PassthruConfig {
    /// Configured remote authority addresses, or a domain name to resolve.
    pub server_list: Vec<String>,
    pub domain: Option<String>,
    pub session_timeout_ms: u64,
    pub offline_check_seconds: u64,
    pub protocol_order: (TransportProtocol, TransportProtocol),
    pub disable_session_cleanup: bool,
    /// Fall through to any online authority when none match the client domain.
    pub null_domain_use_any_server: bool,
    pub guest_allowed: bool,
}

impl Default for PassthruConfig {
    fn default() -> Self {
        Self {
            server_list: Vec::new(),
            domain: None,
            session_timeout_ms: 5_000,
            offline_check_seconds: 300,
            protocol_order: (TransportProtocol::NativeSmb, TransportProtocol::NetBios),
            disable_session_cleanup: false,
            null_domain_use_any_server: true,
            guest_allowed: false,
        }
    }
}

impl PassthruConfig {
    pub const MIN_SESSION_TMO_MS: u64 = 2_000;
    pub const MAX_SESSION_TMO_MS: u64 = 30_000;
    pub const MIN_CHECK_INTERVAL_SECONDS: u64 = 10;
    pub const MAX_CHECK_INTERVAL_SECONDS: u64 = 900;

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_list.is_empty() && self.domain.is_none() {
            return Err(ConfigError::Invalid(
                "passthru config needs a server_list or a domain".into(),
            ));
        }
        Ok(())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(
            self.session_timeout_ms
                .clamp(Self::MIN_SESSION_TMO_MS, Self::MAX_SESSION_TMO_MS),
        )
    }

    pub fn offline_check_interval(&self) -> Duration {
        Duration::from_secs(self.offline_check_seconds.clamp(
            Self::MIN_CHECK_INTERVAL_SECONDS,
            Self::MAX_CHECK_INTERVAL_SECONDS,
        ))
    }
}

/// Configuration for [`crate::server::NetworkServer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkServerConfig {
    pub bind_addresses: Vec<String>,
    pub protocol_name: String,
    pub debug_flags: u32,
}

impl Default for NetworkServerConfig {
    fn default() -> Self {
        Self { bind_addresses: Vec::new(), protocol_name: String::new(), debug_flags: 0 }
    }
}

/// Root configuration, as it would be parsed from a single TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub file_state_cache: FileStateCacheConfig,
    pub passthru: PassthruConfig,
    pub server: NetworkServerConfig,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(s)?;
        cfg.file_state_cache.validate()?;
        Ok(cfg)
    }
}
