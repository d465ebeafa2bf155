//! Tunnel rules and their runtime sessions
//!
//! A rule is what the user configured and what gets persisted. A session is
//! the reconnect loop's view of that rule (peer details, retry timers) and
//! lives in memory only. Both are addressed by [`RuleKey`].

use crate::connectivity::NatType;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;

/// First retry delay after a failed connection attempt
pub const RETRY_BASE_INTERVAL_SECS: i64 = 15;

/// Upper bound on the retry delay
pub const RETRY_MAX_INTERVAL_SECS: i64 = 600;

/// Transport protocol forwarded by a rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP forwarding
    #[default]
    Tcp,
    /// UDP forwarding
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(crate::Error::InvalidRule(format!(
                "unknown protocol {:?} (expected tcp or udp)",
                other
            ))),
        }
    }
}

/// Identity of a rule inside the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleKey {
    /// Forwarded protocol
    pub protocol: Protocol,
    /// Local listening port
    pub src_port: u16,
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.protocol, self.src_port)
    }
}

/// One forwarding rule configured by the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelRule {
    /// Display name
    pub app_name: String,
    /// Forwarded protocol
    pub protocol: Protocol,
    /// Local listening port
    pub src_port: u16,
    /// Peer node that hosts the destination
    pub peer_node: String,
    /// Destination port on the peer side
    pub dst_port: u16,
    /// Destination host on the peer side
    pub dst_host: String,
    /// Peer user
    pub peer_user: String,
    /// Whether the reconnect loop should keep this rule connected
    pub enabled: bool,
}

impl Default for TunnelRule {
    fn default() -> Self {
        Self {
            app_name: String::new(),
            protocol: Protocol::Tcp,
            src_port: 0,
            peer_node: String::new(),
            dst_port: 0,
            dst_host: String::new(),
            peer_user: String::new(),
            enabled: true,
        }
    }
}

impl TunnelRule {
    /// Create an enabled rule forwarding `src_port` to `dst_host:dst_port` on `peer_node`
    pub fn new(
        protocol: Protocol,
        src_port: u16,
        peer_node: impl Into<String>,
        dst_host: impl Into<String>,
        dst_port: u16,
    ) -> Self {
        Self {
            protocol,
            src_port,
            peer_node: peer_node.into(),
            dst_host: dst_host.into(),
            dst_port,
            ..Default::default()
        }
    }

    /// Store key of this rule
    pub fn key(&self) -> RuleKey {
        RuleKey {
            protocol: self.protocol,
            src_port: self.src_port,
        }
    }

    /// Zero ports are never valid
    pub fn is_valid(&self) -> bool {
        self.src_port != 0 && self.dst_port != 0
    }
}

/// How a session reached its peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkMode {
    /// Not connected yet
    #[default]
    None,
    /// UDP hole punching
    UdpPunch,
    /// TCP hole punching
    TcpPunch,
    /// Direct IPv6
    Ipv6,
    /// Through a relay node
    Relay,
}

/// Runtime state of a rule, owned by the reconnect loop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TunnelSession {
    /// Agent version reported by the peer
    pub peer_version: String,
    /// Token the peer authenticates with
    pub peer_token: u64,
    /// NAT type reported by the peer
    pub peer_nat_type: NatType,
    /// Peer is reachable on its public IPv4 address
    pub peer_has_ipv4: bool,
    /// Peer global IPv6 address
    pub peer_ipv6: Option<Ipv6Addr>,
    /// Peer can map ports on its gateway
    pub peer_has_upnp_or_natpmp: bool,
    /// Peer public address
    pub peer_ip: Option<IpAddr>,
    /// Mapped port when the peer sits behind a cone NAT
    pub peer_cone_nat_port: u16,
    /// Consecutive failed attempts
    pub retry_num: u32,
    /// Time of the last attempt
    pub retry_time: Option<DateTime<Utc>>,
    /// Earliest time of the next attempt; `None` means now
    pub next_retry_time: Option<DateTime<Utc>>,
    /// How the session is currently linked
    pub link_mode: LinkMode,
    /// Token to fall back to when the peer initiated the session
    pub from_token: u64,
    /// Last connection error
    pub err_msg: String,
    /// Time the session last connected
    pub connect_time: Option<DateTime<Utc>>,
    /// This side acts as the relay server of an underlay connection
    pub is_underlay_server: bool,
    /// Bandwidth the peer shares, in Mbps
    pub share_bandwidth: u32,
}

impl TunnelSession {
    /// Clear the retry counter and schedule an attempt at `now`
    pub fn reset_retry(&mut self, now: DateTime<Utc>) {
        self.retry_num = 0;
        self.next_retry_time = Some(now);
    }

    /// Whether an attempt may start at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_time.map_or(true, |t| t <= now)
    }

    /// Record a failed attempt and back off
    pub fn record_failure(&mut self, err: impl Into<String>, now: DateTime<Utc>) {
        self.retry_num = self.retry_num.saturating_add(1);
        self.retry_time = Some(now);
        self.err_msg = err.into();
        self.next_retry_time = Some(now + retry_backoff(self.retry_num));
    }

    /// Record a successful connection
    pub fn record_connected(&mut self, link_mode: LinkMode, now: DateTime<Utc>) {
        self.retry_num = 0;
        self.retry_time = Some(now);
        self.connect_time = Some(now);
        self.link_mode = link_mode;
        self.err_msg.clear();
    }
}

/// Delay before attempt number `retry_num + 1`
///
/// Doubles from 15 s per failure, capped at 10 minutes.
pub fn retry_backoff(retry_num: u32) -> Duration {
    let exp = retry_num.saturating_sub(1).min(16);
    let secs = (RETRY_BASE_INTERVAL_SECS << exp).min(RETRY_MAX_INTERVAL_SECS);
    Duration::seconds(secs)
}
