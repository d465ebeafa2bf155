//! Connectivity module for NAT detection and public reachability
//!
//! This module answers three questions about the host:
//! - What kind of NAT is it behind (cone or symmetric)?
//! - Is it directly reachable on its public IP?
//! - Can a UPnP or NAT-PMP port mapping make it reachable?
//!
//! Probes, echo listeners and mapping attempts are blocking and run on
//! short-lived worker threads with bounded deadlines. `detect_nat_type`
//! runs a whole detection on tokio's blocking pool.

// Submodules
pub mod echo;
pub mod gateway;
pub mod local;
pub mod nat;
pub mod natpmp;
pub mod portmap;
pub mod probe;
pub mod reachability;
pub mod types;
pub mod upnp;
pub mod wire;

// Re-export commonly used types
pub use types::{
    DetectionError, DetectionResult, IpProtocol, MappingError, MappingProtocol, NatType,
    ObservedAddr,
};

// Re-export main functions
pub use echo::{default_binder, echo_exchange, Binder, EchoListener};
pub use nat::{
    detect_nat_type, random_local_port, DetectionConfig, NatClassifier, UDP_PORT1, UDP_PORT2,
};
pub use portmap::{MappingGateway, NoPortMapper, PortMapper, SystemPortMapper};
pub use probe::nat_probe;
pub use reachability::{Reachability, ReachabilityTester};
