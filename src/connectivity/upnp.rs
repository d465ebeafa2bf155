//! UPnP IGD (Internet Gateway Device) port mapping
//!
//! Uses SSDP to discover an IGD on the local network, then SOAP calls
//! (through `igd-next`) for the external address and mapping requests.
//! All calls are blocking and run on the caller's worker thread.

use super::local::local_ipv4;
use super::portmap::MappingGateway;
use super::types::{IpProtocol, MappingError, MappingProtocol};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A UPnP gateway found by SSDP search
pub struct UpnpGateway {
    gateway: igd_next::Gateway,
    local_ip: Ipv4Addr,
}

impl UpnpGateway {
    /// Search for an IGD gateway
    ///
    /// Fails with `MappingError::NoGateway` when nothing answers within `timeout`.
    pub fn search(timeout: Duration) -> Result<Self, MappingError> {
        debug!("Searching for UPnP IGD gateway...");
        let gateway = igd_next::search_gateway(igd_next::SearchOptions {
            timeout: Some(timeout),
            ..Default::default()
        })
        .map_err(|e| {
            debug!("UPnP gateway search failed: {}", e);
            MappingError::NoGateway
        })?;

        // The mapping target is our address on the route toward the gateway
        let local_ip = local_ipv4().ok_or_else(|| {
            MappingError::Internal("UPnP requires a local IPv4 address".to_string())
        })?;

        debug!("Found UPnP gateway at {}", gateway.addr);
        Ok(Self { gateway, local_ip })
    }
}

fn to_igd_protocol(protocol: IpProtocol) -> igd_next::PortMappingProtocol {
    match protocol {
        IpProtocol::TCP => igd_next::PortMappingProtocol::TCP,
        IpProtocol::UDP => igd_next::PortMappingProtocol::UDP,
    }
}

impl MappingGateway for UpnpGateway {
    fn protocol(&self) -> MappingProtocol {
        MappingProtocol::UPnP
    }

    fn external_address(&self) -> Result<IpAddr, MappingError> {
        self.gateway
            .get_external_ip()
            .map_err(|e| MappingError::GatewayError(format!("GetExternalIPAddress failed: {}", e)))
    }

    fn add_port_mapping(
        &self,
        protocol: IpProtocol,
        internal_port: u16,
        external_port: u16,
        description: &str,
        lifetime_secs: u32,
    ) -> Result<u16, MappingError> {
        let local_addr = SocketAddr::new(IpAddr::V4(self.local_ip), internal_port);
        debug!(
            "Adding UPnP {:?} mapping: {} -> {} ({}s)",
            protocol, external_port, local_addr, lifetime_secs
        );

        self.gateway
            .add_port(
                to_igd_protocol(protocol),
                external_port,
                local_addr,
                lifetime_secs,
                description,
            )
            .map_err(|e| {
                warn!("UPnP AddPortMapping failed: {}", e);
                MappingError::GatewayError(format!("AddPortMapping failed: {}", e))
            })?;

        info!(
            "UPnP {:?} mapping created: {} -> {} ({}s)",
            protocol, external_port, local_addr, lifetime_secs
        );
        Ok(external_port)
    }
}
