//! Common types for connectivity module

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

/// NAT classification produced by the two-port detection
///
/// `Unknown` is the default and is never conflated with a real
/// classification: a run whose second probe fails stays `Unknown`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum NatType {
    /// Detection not run or incomplete
    #[default]
    Unknown,
    /// Mapping is preserved across destinations
    Cone,
    /// Mapping depends on the destination
    Symmetric,
}

impl NatType {
    /// Classify from the public ports observed by two probes sent from the same local port
    pub fn from_observed_ports(port1: u16, port2: u16) -> Self {
        if port1 == port2 {
            NatType::Cone
        } else {
            NatType::Symmetric
        }
    }
}

impl fmt::Display for NatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NatType::Unknown => write!(f, "unknown"),
            NatType::Cone => write!(f, "cone"),
            NatType::Symmetric => write!(f, "symmetric"),
        }
    }
}

/// Outcome of one detection run
///
/// Ephemeral: merged into the network identity by the config store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionResult {
    /// Public IP observed by the rendezvous server
    pub public_ip: Option<IpAddr>,
    /// NAT classification
    pub nat_type: NatType,
    /// Directly reachable on the public IP without hole punching
    pub has_ipv4: bool,
    /// Reachable through a UPnP or NAT-PMP mapping
    pub has_upnp_or_natpmp: bool,
}

impl DetectionResult {
    /// Whether a peer can reach this host without hole punching or relay
    pub fn is_publicly_reachable(&self) -> bool {
        self.has_ipv4 || self.has_upnp_or_natpmp
    }
}

/// Observed address reported by the rendezvous server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedAddr {
    /// Caller's IP as seen by the server
    pub ip: IpAddr,
    /// Caller's port as seen by the server
    pub port: u16,
}

/// Errors from the detection probes
#[derive(Debug, Error)]
pub enum DetectionError {
    /// Read deadline expired
    #[error("Detection timed out")]
    Timeout,

    /// Host name could not be resolved
    #[error("Resolve error: {0}")]
    Resolve(String),

    /// Malformed response
    #[error("Decode error: {0}")]
    Decode(String),

    /// Worker thread or blocking task failed
    #[error("Worker error: {0}")]
    Join(String),

    /// IO error during communication
    #[error("IO error: {0}")]
    Io(#[source] std::io::Error),
}

impl From<std::io::Error> for DetectionError {
    fn from(e: std::io::Error) -> Self {
        if is_timeout(&e) {
            DetectionError::Timeout
        } else {
            DetectionError::Io(e)
        }
    }
}

/// Read deadlines surface as `WouldBlock` on Unix and `TimedOut` on Windows
pub(crate) fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

/// Protocols available for port mapping
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MappingProtocol {
    /// NAT Port Mapping Protocol (RFC 6886)
    NATPMP,
    /// Universal Plug and Play
    UPnP,
}

/// Errors that can occur during port mapping
#[derive(Debug, Error)]
pub enum MappingError {
    /// Network timeout waiting for response
    #[error("Mapping request timed out")]
    Timeout,

    /// Invalid response from gateway
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Gateway returned an error
    #[error("Gateway error: {0}")]
    GatewayError(String),

    /// No gateway found on network
    #[error("No gateway found")]
    NoGateway,

    /// IO error during communication
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol not supported by gateway
    #[error("Protocol not supported")]
    NotSupported,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// IP protocol numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IpProtocol {
    /// TCP protocol
    TCP = 6,
    /// UDP protocol
    UDP = 17,
}
