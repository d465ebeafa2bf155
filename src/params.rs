//! Command line parameters
//!
//! Flags seed the config store. A flag given explicitly always wins over the
//! persisted value; flags left unset fall back to the persisted value, then
//! to the built-in default.

use crate::connectivity::{UDP_PORT1, UDP_PORT2};
use crate::storage::identity::{DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT};
use crate::storage::{
    default_node_name, service_port_for_node, validate_node_name, ConfigStore, LogLevel, Protocol,
    TunnelRule,
};
use crate::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name used for logs when console output is disabled
pub const LOG_FILE_NAME: &str = "peerlink.log";

/// Peerlink agent flags
#[derive(Debug, Clone, Parser)]
#[command(name = "peerlink", version, about = "Peer-to-peer tunneling agent")]
pub struct Params {
    /// Rendezvous server host
    #[arg(long = "serverhost")]
    pub server_host: Option<String>,

    /// Rendezvous server port
    #[arg(long = "serverport", default_value_t = DEFAULT_SERVER_PORT)]
    pub server_port: u16,

    /// Authentication token
    #[arg(long)]
    pub token: Option<u64>,

    /// Node name, 8-31 characters. Defaults to the host name
    #[arg(long)]
    pub node: Option<String>,

    /// Peer node to connect to
    #[arg(long = "peernode", default_value = "")]
    pub peer_node: String,

    /// Destination IP on the peer side
    #[arg(long = "dstip", default_value = "127.0.0.1")]
    pub dst_ip: String,

    /// Destination port on the peer side
    #[arg(long = "dstport", default_value_t = 0)]
    pub dst_port: u16,

    /// Local source port
    #[arg(long = "srcport", default_value_t = 0)]
    pub src_port: u16,

    /// Service port for public IP and port mapping tests
    #[arg(long = "tcpport")]
    pub tcp_port: Option<u16>,

    /// tcp or udp
    #[arg(long, default_value = "tcp")]
    pub protocol: Protocol,

    /// App name
    #[arg(long = "appname", default_value = "")]
    pub app_name: String,

    /// Share bandwidth limit in Mbps
    #[arg(long = "sharebandwidth")]
    pub share_bandwidth: Option<u32>,

    /// Daemon mode
    #[arg(short = 'd')]
    pub daemon: bool,

    /// Log to file instead of the console
    #[arg(long = "nv")]
    pub not_verbose: bool,

    /// Do not load the existing config
    #[arg(long = "newconfig")]
    pub new_config: bool,

    /// 0:info 1:warn 2:error 3:debug
    #[arg(long = "loglevel")]
    pub log_level: Option<u8>,
}

/// What the caller needs after the flags were applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    /// Daemon mode requested
    pub daemon: bool,
    /// Effective log level
    pub log_level: LogLevel,
    /// Log file when console output is disabled
    pub log_file: Option<PathBuf>,
    /// Whether a persisted config was loaded
    pub loaded: bool,
    /// Why the persisted config could not be loaded
    pub load_error: Option<String>,
    /// Why the rule given by the flags was rejected
    pub rejected_rule: Option<String>,
    /// Whether the store was written after ingest
    pub saved: bool,
}

impl Params {
    /// Rule described by the flags, if a source port was given
    pub fn rule(&self) -> Option<TunnelRule> {
        (self.src_port != 0).then(|| TunnelRule {
            app_name: self.app_name.clone(),
            protocol: self.protocol,
            src_port: self.src_port,
            peer_node: self.peer_node.clone(),
            dst_port: self.dst_port,
            dst_host: self.dst_ip.clone(),
            peer_user: String::new(),
            enabled: true,
        })
    }

    /// Log level requested on the command line, before any config is loaded
    pub fn initial_log_level(&self) -> LogLevel {
        self.log_level.map(LogLevel::from).unwrap_or_default()
    }

    /// Log file next to `config_path` when console output is disabled
    pub fn log_file(&self, config_path: &Path) -> Option<PathBuf> {
        self.not_verbose
            .then(|| config_path.with_file_name(LOG_FILE_NAME))
    }

    /// Apply the flags to `store` and save it
    ///
    /// Fails only when an explicit node name is too short; nothing is
    /// changed in that case.
    pub fn apply(&self, store: &ConfigStore) -> Result<Ingested> {
        if let Some(node) = &self.node {
            validate_node_name(node)?;
        }

        let (loaded, load_error) = if self.new_config {
            (false, None)
        } else {
            match store.load() {
                Ok(loaded) => (loaded, None),
                Err(e) => (false, Some(e.to_string())),
            }
        };

        let rejected_rule = match self.rule().map(|rule| store.add(rule, true)) {
            Some(Err(e)) => {
                warn!("rule from command line ignored: {}", e);
                Some(e.to_string())
            }
            _ => None,
        };

        if let Some(bw) = self.share_bandwidth {
            store.set_share_bandwidth(bw);
        }
        if let Some(level) = self.log_level {
            store.set_log_level(LogLevel::from(level));
        }
        if let Some(token) = self.token {
            store.set_token(token);
        }
        if let Some(port) = self.tcp_port {
            store.set_tcp_port(port);
        }

        let network = store.network();
        let server_host = match &self.server_host {
            Some(host) => host.clone(),
            None if network.server_host.is_empty() => DEFAULT_SERVER_HOST.to_string(),
            None => network.server_host.clone(),
        };
        store.set_server(server_host, self.server_port);
        store.set_udp_ports(UDP_PORT1, UDP_PORT2);

        let node = match &self.node {
            Some(node) => node.clone(),
            None if network.node.is_empty() => default_node_name(),
            None => network.node.clone(),
        };
        store.set_node(node.clone());

        if store.network().tcp_port == 0 {
            store.set_tcp_port(service_port_for_node(&node));
        }

        debug!("parameters applied for node {}", node);
        let saved = store.save();

        Ok(Ingested {
            daemon: self.daemon,
            log_level: store.log_level(),
            log_file: self.log_file(store.path()),
            loaded,
            load_error,
            rejected_rule,
            saved,
        })
    }
}
