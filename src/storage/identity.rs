//! Network identity of the running agent

use crate::connectivity::{local, DetectionConfig, DetectionResult, NatType, UDP_PORT1, UDP_PORT2};
use crate::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv6Addr};

/// Minimum node name length
pub const MIN_NODE_NAME_LEN: usize = 8;

/// Default rendezvous server host
pub const DEFAULT_SERVER_HOST: &str = "api.peerlink.dev";

/// Default rendezvous server port
pub const DEFAULT_SERVER_PORT: u16 = 27183;

/// Default share bandwidth limit in Mbps
pub const DEFAULT_SHARE_BANDWIDTH: u32 = 10;

/// First port of the derived service port range
pub const SERVICE_PORT_BASE: u16 = 50000;

/// Size of the derived service port range
pub const SERVICE_PORT_SPAN: u32 = 15000;

/// Host descriptors, discovered at startup and never persisted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalInfo {
    /// Source address of the default route
    pub local_ip: Option<IpAddr>,
    /// Hardware address
    pub mac: Option<String>,
    /// OS and architecture
    pub os: String,
}

impl LocalInfo {
    /// Collect descriptors for this host
    pub fn discover() -> Self {
        Self {
            local_ip: local::local_ipv4().map(IpAddr::V4),
            mac: local::mac_address(),
            os: local::os_name(),
        }
    }
}

/// Latest detection results, never persisted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectedInfo {
    /// Public IPv4 seen by the rendezvous server
    pub public_ip: Option<IpAddr>,
    /// Global IPv6 source address
    pub public_ipv6: Option<Ipv6Addr>,
    /// Classified NAT type
    pub nat_type: NatType,
    /// Reachable on the public IP
    pub has_ipv4: bool,
    /// Reachable through a gateway mapping
    pub has_upnp_or_natpmp: bool,
}

/// Identity and server settings of this agent
///
/// Only the plain fields are persisted; `local` and `detected` are
/// process-local.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkIdentity {
    /// Authentication token
    pub token: u64,
    /// Node name, stable for the process lifetime once resolved
    pub node: String,
    /// User name
    pub user: String,
    /// Share bandwidth limit in Mbps
    pub share_bandwidth: u32,
    /// Rendezvous server host
    pub server_host: String,
    /// Rendezvous server port
    pub server_port: u16,
    /// First UDP detection port
    pub udp_port1: u16,
    /// Second UDP detection port
    pub udp_port2: u16,
    /// Service port for public IP and port mapping (0 until resolved)
    pub tcp_port: u16,
    /// Host descriptors
    #[serde(skip)]
    pub local: LocalInfo,
    /// Detection results
    #[serde(skip)]
    pub detected: DetectedInfo,
}

impl Default for NetworkIdentity {
    fn default() -> Self {
        Self {
            token: 0,
            node: String::new(),
            user: String::new(),
            share_bandwidth: DEFAULT_SHARE_BANDWIDTH,
            server_host: DEFAULT_SERVER_HOST.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            udp_port1: UDP_PORT1,
            udp_port2: UDP_PORT2,
            tcp_port: 0,
            local: LocalInfo::default(),
            detected: DetectedInfo::default(),
        }
    }
}

impl NetworkIdentity {
    /// Detection parameters for this identity
    ///
    /// Falls back to the node-derived service port if none is set yet.
    pub fn detection_config(&self) -> DetectionConfig {
        let service_port = if self.tcp_port != 0 {
            self.tcp_port
        } else {
            service_port_for_node(&self.node)
        };
        let mut config = DetectionConfig::new(self.server_host.clone(), service_port);
        config.udp_port1 = self.udp_port1;
        config.udp_port2 = self.udp_port2;
        config
    }

    /// Merge one detection run
    pub fn apply_detection(&mut self, result: &DetectionResult) {
        if result.public_ip.is_some() {
            self.detected.public_ip = result.public_ip;
        }
        self.detected.nat_type = result.nat_type;
        self.detected.has_ipv4 = result.has_ipv4;
        self.detected.has_upnp_or_natpmp = result.has_upnp_or_natpmp;
    }
}

/// Reject node names shorter than [`MIN_NODE_NAME_LEN`]
pub fn validate_node_name(name: &str) -> Result<()> {
    if name.chars().count() < MIN_NODE_NAME_LEN {
        return Err(Error::NodeNameTooShort {
            name: name.to_string(),
            min: MIN_NODE_NAME_LEN,
        });
    }
    Ok(())
}

/// Node name derived from the host name
///
/// Short host names are padded with random digits up to the minimum length.
pub fn default_node_name() -> String {
    pad_node_name(local::host_name().unwrap_or_default())
}

pub(crate) fn pad_node_name(mut name: String) -> String {
    let mut rng = rand::thread_rng();
    while name.chars().count() < MIN_NODE_NAME_LEN {
        name.push(char::from(b'0' + rng.gen_range(0..10u8)));
    }
    name
}

/// Deterministic service port for a node name
pub fn service_port_for_node(node: &str) -> u16 {
    let offset = crc32fast::hash(node.as_bytes()) % SERVICE_PORT_SPAN;
    SERVICE_PORT_BASE + offset as u16
}
