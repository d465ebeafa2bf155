//! Port mapping client seam
//!
//! The reachability tester only needs three things from a gateway: find it,
//! ask for its external address and request a mapping. `PortMapper` hides
//! whether UPnP IGD or NAT-PMP answered.

use super::natpmp::NatPmpGateway;
use super::types::{IpProtocol, MappingError, MappingProtocol};
use super::upnp::UpnpGateway;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

/// A discovered gateway able to create port mappings
pub trait MappingGateway: Send {
    /// Protocol spoken by this gateway
    fn protocol(&self) -> MappingProtocol;

    /// External address of the gateway
    fn external_address(&self) -> Result<IpAddr, MappingError>;

    /// Request a mapping and return the external port granted
    fn add_port_mapping(
        &self,
        protocol: IpProtocol,
        internal_port: u16,
        external_port: u16,
        description: &str,
        lifetime_secs: u32,
    ) -> Result<u16, MappingError>;
}

/// Gateway discovery
pub trait PortMapper: Send + Sync {
    /// Find a gateway on the local network
    fn discover(&self) -> Result<Box<dyn MappingGateway>, MappingError>;
}

/// Tries UPnP IGD first, then NAT-PMP through the default gateway
#[derive(Debug, Clone)]
pub struct SystemPortMapper {
    timeout: Duration,
}

impl SystemPortMapper {
    /// Create a mapper with the given per-protocol discovery timeout
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemPortMapper {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

impl PortMapper for SystemPortMapper {
    fn discover(&self) -> Result<Box<dyn MappingGateway>, MappingError> {
        match UpnpGateway::search(self.timeout) {
            Ok(gw) => return Ok(Box::new(gw)),
            Err(e) => debug!("UPnP discovery failed: {}", e),
        }

        match NatPmpGateway::discover(self.timeout) {
            Ok(gw) => Ok(Box::new(gw)),
            Err(e) => {
                debug!("NAT-PMP discovery failed: {}", e);
                Err(MappingError::NoGateway)
            }
        }
    }
}

/// Mapper that never finds a gateway
///
/// Used when port mapping is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPortMapper;

impl PortMapper for NoPortMapper {
    fn discover(&self) -> Result<Box<dyn MappingGateway>, MappingError> {
        Err(MappingError::NoGateway)
    }
}
