//! Thread-safe tunnel configuration store
//!
//! Owns the network identity and the ordered list of tunnel rules. Every
//! read, mutation and persistence call goes through one exclusive lock, held
//! only for the duration of that call and never across network I/O.

use crate::connectivity::{DetectionConfig, DetectionResult};
use crate::storage::identity::{LocalInfo, NetworkIdentity};
use crate::storage::tunnel::{LinkMode, RuleKey, TunnelRule, TunnelSession};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Default file name of the persisted configuration
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Log verbosity, persisted as a number (0 info, 1 warn, 2 error, 3 debug)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum LogLevel {
    /// Informational and above
    #[default]
    Info,
    /// Warnings and errors
    Warn,
    /// Errors only
    Error,
    /// Everything
    Debug,
}

impl From<u8> for LogLevel {
    fn from(level: u8) -> Self {
        match level {
            1 => LogLevel::Warn,
            2 => LogLevel::Error,
            3 => LogLevel::Debug,
            _ => LogLevel::Info,
        }
    }
}

impl From<LogLevel> for u8 {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Info => 0,
            LogLevel::Warn => 1,
            LogLevel::Error => 2,
            LogLevel::Debug => 3,
        }
    }
}

impl LogLevel {
    /// Maximum `tracing` level for this verbosity
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Debug => tracing::Level::DEBUG,
        }
    }
}

/// A rule together with its runtime session
#[derive(Debug, Clone)]
struct TunnelApp {
    rule: TunnelRule,
    session: TunnelSession,
}

impl TunnelApp {
    fn new(rule: TunnelRule) -> Self {
        Self {
            rule,
            session: TunnelSession::default(),
        }
    }
}

#[derive(Debug, Default)]
struct ConfigState {
    network: NetworkIdentity,
    apps: Vec<TunnelApp>,
    log_level: LogLevel,
}

impl ConfigState {
    fn position(&self, key: RuleKey) -> Option<usize> {
        self.apps.iter().position(|app| app.rule.key() == key)
    }

    fn app_mut(&mut self, key: RuleKey) -> Option<&mut TunnelApp> {
        self.apps.iter_mut().find(|app| app.rule.key() == key)
    }
}

/// On-disk document, serialized from borrowed state
#[derive(Serialize)]
struct PersistedConfigRef<'a> {
    network: &'a NetworkIdentity,
    apps: Vec<&'a TunnelRule>,
    log_level: LogLevel,
}

/// On-disk document, as loaded
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PersistedConfig {
    network: NetworkIdentity,
    apps: Vec<TunnelRule>,
    log_level: LogLevel,
}

/// Shared tunnel configuration store
///
/// Cloning is cheap and every clone refers to the same state.
///
/// # Example
/// ```rust,no_run
/// use peerlink::storage::{ConfigStore, Protocol, TunnelRule};
///
/// let store = ConfigStore::new("config.json");
/// store.load().ok();
///
/// let rule = TunnelRule::new(Protocol::Tcp, 23389, "officepc1", "127.0.0.1", 3389);
/// store.add(rule.clone(), true).expect("valid rule");
/// store.switch_app(&rule, false);
///
/// store.save();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigStore {
    state: Arc<Mutex<ConfigState>>,
    path: Arc<PathBuf>,
}

impl ConfigStore {
    /// Create an empty store persisted at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            state: Arc::new(Mutex::new(ConfigState::default())),
            path: Arc::new(path.as_ref().to_path_buf()),
        }
    }

    /// Path of the persisted document
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========== Rules ==========

    /// Add a rule
    ///
    /// Rules with a zero source or destination port are rejected without
    /// touching the store. With `override_existing`, a rule with the same
    /// (protocol, source port) is replaced in place; otherwise the rule is
    /// appended, even if its key is already present.
    pub fn add(&self, rule: TunnelRule, override_existing: bool) -> Result<()> {
        if !rule.is_valid() {
            warn!("invalid app rejected: {:?}", rule);
            return Err(Error::InvalidRule(format!(
                "source and destination ports must be non-zero (src {}, dst {})",
                rule.src_port, rule.dst_port
            )));
        }

        let mut state = self.state.lock();
        if override_existing {
            if let Some(app) = state.app_mut(rule.key()) {
                debug!("overriding app {}", rule.key());
                *app = TunnelApp::new(rule);
                return Ok(());
            }
        }

        debug!("adding app {}", rule.key());
        state.apps.push(TunnelApp::new(rule));
        Ok(())
    }

    /// Remove the first rule with the same key
    ///
    /// Returns whether a rule was removed. Rules with zero ports are ignored.
    pub fn delete(&self, rule: &TunnelRule) -> bool {
        if !rule.is_valid() {
            return false;
        }

        let mut state = self.state.lock();
        match state.position(rule.key()) {
            Some(index) => {
                state.apps.remove(index);
                debug!("deleted app {}", rule.key());
                true
            }
            None => false,
        }
    }

    /// Enable or disable a rule and schedule an immediate retry
    ///
    /// Returns whether the rule was found.
    pub fn switch_app(&self, rule: &TunnelRule, enabled: bool) -> bool {
        let mut state = self.state.lock();
        match state.app_mut(rule.key()) {
            Some(app) => {
                app.rule.enabled = enabled;
                app.session.reset_retry(Utc::now());
                info!(
                    "app {} {}",
                    rule.key(),
                    if enabled { "enabled" } else { "disabled" }
                );
                true
            }
            None => false,
        }
    }

    /// All rules in insertion order
    pub fn rules(&self) -> Vec<TunnelRule> {
        self.state.lock().apps.iter().map(|app| app.rule.clone()).collect()
    }

    /// First rule with the given key
    pub fn rule(&self, key: RuleKey) -> Option<TunnelRule> {
        let state = self.state.lock();
        state.position(key).map(|i| state.apps[i].rule.clone())
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.state.lock().apps.len()
    }

    /// Whether the store holds no rules
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========== Sessions ==========

    /// Runtime session of the first rule with the given key
    pub fn session(&self, key: RuleKey) -> Option<TunnelSession> {
        let state = self.state.lock();
        state.position(key).map(|i| state.apps[i].session.clone())
    }

    /// Mutate the session of the first rule with the given key
    pub fn update_session<F, R>(&self, key: RuleKey, update_fn: F) -> Option<R>
    where
        F: FnOnce(&mut TunnelSession) -> R,
    {
        let mut state = self.state.lock();
        state.app_mut(key).map(|app| update_fn(&mut app.session))
    }

    /// Enabled rules whose next attempt is due at `now`
    pub fn due_rules(&self, now: DateTime<Utc>) -> Vec<TunnelRule> {
        self.state
            .lock()
            .apps
            .iter()
            .filter(|app| app.rule.enabled && app.session.is_due(now))
            .map(|app| app.rule.clone())
            .collect()
    }

    /// Record a failed connection attempt and back off
    pub fn record_failure(&self, key: RuleKey, err: impl Into<String>) -> bool {
        let err = err.into();
        let found = self
            .update_session(key, |s| s.record_failure(err.clone(), Utc::now()))
            .is_some();
        if found {
            debug!("app {} attempt failed: {}", key, err);
        }
        found
    }

    /// Record a successful connection
    pub fn record_connected(&self, key: RuleKey, link_mode: LinkMode) -> bool {
        self.update_session(key, |s| s.record_connected(link_mode, Utc::now()))
            .is_some()
    }

    // ========== Network identity ==========

    /// Snapshot of the network identity
    pub fn network(&self) -> NetworkIdentity {
        self.state.lock().network.clone()
    }

    /// Set the authentication token
    pub fn set_token(&self, token: u64) {
        self.state.lock().network.token = token;
    }

    /// Set the user name
    pub fn set_user(&self, user: impl Into<String>) {
        self.state.lock().network.user = user.into();
    }

    /// Set the node name
    pub fn set_node(&self, node: impl Into<String>) {
        self.state.lock().network.node = node.into();
    }

    /// Set the share bandwidth limit in Mbps
    pub fn set_share_bandwidth(&self, mbps: u32) {
        self.state.lock().network.share_bandwidth = mbps;
    }

    /// Set the rendezvous server host and port
    pub fn set_server(&self, host: impl Into<String>, port: u16) {
        let mut state = self.state.lock();
        state.network.server_host = host.into();
        state.network.server_port = port;
    }

    /// Set the UDP ports used for NAT classification
    pub fn set_udp_ports(&self, port1: u16, port2: u16) {
        let mut state = self.state.lock();
        state.network.udp_port1 = port1;
        state.network.udp_port2 = port2;
    }

    /// Set the service port
    pub fn set_tcp_port(&self, port: u16) {
        self.state.lock().network.tcp_port = port;
    }

    /// Replace the host descriptors
    pub fn set_local_info(&self, local: LocalInfo) {
        self.state.lock().network.local = local;
    }

    /// Record the public IPv6 address
    pub fn set_public_ipv6(&self, ipv6: Option<Ipv6Addr>) {
        self.state.lock().network.detected.public_ipv6 = ipv6;
    }

    /// Merge one detection run into the identity
    pub fn apply_detection(&self, result: &DetectionResult) {
        self.state.lock().network.apply_detection(result);
    }

    /// Detection parameters for the current identity
    pub fn detection_config(&self) -> DetectionConfig {
        self.state.lock().network.detection_config()
    }

    /// Persisted log level
    pub fn log_level(&self) -> LogLevel {
        self.state.lock().log_level
    }

    /// Set the persisted log level
    pub fn set_log_level(&self, level: LogLevel) {
        self.state.lock().log_level = level;
    }

    // ========== Persistence ==========

    /// Save the store, logging instead of returning failures
    ///
    /// Returns whether the document was written.
    pub fn save(&self) -> bool {
        match self.try_save() {
            Ok(()) => true,
            Err(e) => {
                error!("save {} error: {}", self.path.display(), e);
                false
            }
        }
    }

    /// Save the store as one pretty-printed JSON document
    ///
    /// The document is written next to the target and renamed over it, so a
    /// failed write never leaves a truncated file behind.
    pub fn try_save(&self) -> Result<()> {
        let state = self.state.lock();
        let doc = PersistedConfigRef {
            network: &state.network,
            apps: state.apps.iter().map(|app| &app.rule).collect(),
            log_level: state.log_level,
        };
        let json = serde_json::to_string_pretty(&doc)?;

        let path = self.path.as_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;
        std::fs::rename(&tmp_path, path)
            .map_err(|e| Error::Config(format!("Failed to replace config: {}", e)))?;

        debug!("saved {} apps to {}", state.apps.len(), path.display());
        Ok(())
    }

    /// Load the persisted document into the store
    ///
    /// Returns `Ok(false)` when there is nothing to load (missing or empty
    /// file). A document that fails to parse is logged and leaves the store
    /// untouched. Host descriptors and detection results already in memory
    /// are kept; every loaded rule starts with a fresh session.
    pub fn load(&self) -> Result<bool> {
        let path = self.path.as_path();
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no config at {}, starting fresh", path.display());
                return Ok(false);
            }
            Err(e) => {
                error!("read {} error: {}", path.display(), e);
                return Err(Error::Config(format!("Failed to read config: {}", e)));
            }
        };

        if data.trim().is_empty() {
            return Ok(false);
        }

        let loaded: PersistedConfig = serde_json::from_str(&data).map_err(|e| {
            error!("parse {} error: {}", path.display(), e);
            Error::Config(format!("Failed to parse config: {}", e))
        })?;

        let mut state = self.state.lock();
        let mut network = loaded.network;
        network.local = std::mem::take(&mut state.network.local);
        network.detected = std::mem::take(&mut state.network.detected);

        state.network = network;
        state.apps = loaded.apps.into_iter().map(TunnelApp::new).collect();
        state.log_level = loaded.log_level;

        info!("loaded {} apps from {}", state.apps.len(), path.display());
        Ok(true)
    }
}
