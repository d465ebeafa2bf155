//! Public reachability tests
//!
//! Two sequential echo tests on the host's service port:
//!
//! 1. **Direct**: listen on the service port and echo through the candidate
//!    public IP. Success means peers can reach us without hole punching.
//! 2. **Port mapped**: ask the gateway (UPnP IGD or NAT-PMP) for a mapping
//!    of the service port and echo through the gateway's external address.
//!
//! Both results are plain booleans. Neither test failing is an error; it
//! only means hole punching or relay will be needed.

use super::echo::{default_binder, echo_exchange, Binder, EchoListener, ECHO_PAYLOAD};
use super::portmap::{MappingGateway, PortMapper};
use super::types::{DetectionError, IpProtocol};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Wait for an echo reply
pub const PUBLIC_IP_ECHO_TIMEOUT: Duration = Duration::from_secs(3);

/// How long a bound echo listener waits for its one datagram
pub const ECHO_LISTENER_WAIT: Duration = Duration::from_secs(5);

/// Budget for gateway discovery and mapping requests
pub const PORT_MAPPING_BUDGET: Duration = Duration::from_secs(10);

/// Lifetime of the UDP mapping used for the test
pub const UDP_MAPPING_LIFETIME_SECS: u32 = 30;

/// Lifetime of the TCP mapping kept for the service port (7 days)
pub const TCP_MAPPING_LIFETIME_SECS: u32 = 604_800;

/// Description attached to gateway mappings
pub const MAPPING_DESCRIPTION: &str = "peerlink";

/// Outcome of the two reachability tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reachability {
    /// Echo through the public IP succeeded
    pub direct: bool,
    /// Echo through a gateway mapping succeeded
    pub port_mapped: bool,
}

/// Runs the direct and port-mapped echo tests on one service port
pub struct ReachabilityTester {
    service_port: u16,
    echo_timeout: Duration,
    listener_wait: Duration,
    mapping_budget: Duration,
    mapper: Arc<dyn PortMapper>,
    binder: Binder,
}

impl ReachabilityTester {
    /// Create a tester for `service_port` using `mapper` for Test 2
    pub fn new(service_port: u16, mapper: Arc<dyn PortMapper>) -> Self {
        Self {
            service_port,
            echo_timeout: PUBLIC_IP_ECHO_TIMEOUT,
            listener_wait: ECHO_LISTENER_WAIT,
            mapping_budget: PORT_MAPPING_BUDGET,
            mapper,
            binder: default_binder(),
        }
    }

    /// Override the echo reply timeout
    pub fn with_echo_timeout(mut self, timeout: Duration) -> Self {
        self.echo_timeout = timeout;
        self
    }

    /// Override the listener wait (also bounds the readiness handshake)
    pub fn with_listener_wait(mut self, wait: Duration) -> Self {
        self.listener_wait = wait;
        self
    }

    /// Override the time allowed for gateway discovery and mapping
    pub fn with_mapping_budget(mut self, budget: Duration) -> Self {
        self.mapping_budget = budget;
        self
    }

    /// Override how the echo listener binds its socket
    pub fn with_binder(mut self, binder: Binder) -> Self {
        self.binder = binder;
        self
    }

    /// Service port under test
    pub fn service_port(&self) -> u16 {
        self.service_port
    }

    /// Run both tests against the candidate public IP
    pub fn run(&self, public_ip: IpAddr) -> Reachability {
        let direct = self.test_direct(public_ip);
        let port_mapped = self.test_port_mapped();
        Reachability {
            direct,
            port_mapped,
        }
    }

    /// Test 1: echo through `public_ip` on the service port
    pub fn test_direct(&self, public_ip: IpAddr) -> bool {
        debug!("public ip test start {}:{}", public_ip, self.service_port);
        let Some(listener) = self.start_listener(self.listener_wait) else {
            return false;
        };

        let target = SocketAddr::new(public_ip, self.service_port);
        let reachable = self.echo(target);
        listener.finish();

        if reachable {
            info!("public ip: YES ({})", target);
        } else {
            debug!("public ip: NO ({})", target);
        }
        reachable
    }

    /// Test 2: map the service port on the gateway and echo through it
    ///
    /// Skipped when the service port cannot be bound again. A missing
    /// gateway or a refused mapping ends the test quietly.
    pub fn test_port_mapped(&self) -> bool {
        debug!("upnp test start");
        let Some(listener) = self.start_listener(self.listener_wait + self.mapping_budget) else {
            return false;
        };

        let reachable = match self.map_service_port() {
            Some((gateway, target)) => {
                let reachable = self.echo(target);
                listener.finish();
                // Long-lived TCP mapping; requested after the echo so a slow
                // gateway cannot eat the listener window
                self.map_tcp(gateway.as_ref());
                reachable
            }
            None => {
                listener.finish();
                false
            }
        };

        if reachable {
            info!("UPNP or NAT-PMP: YES");
        } else {
            debug!("UPNP or NAT-PMP: NO");
        }
        reachable
    }

    fn start_listener(&self, wait: Duration) -> Option<EchoListener> {
        match EchoListener::start(self.service_port, wait, self.listener_wait, &self.binder) {
            Ok(listener) => Some(listener),
            Err(e) => {
                debug!(
                    "echo listener unavailable on port {}, skipping test: {}",
                    self.service_port, e
                );
                None
            }
        }
    }

    fn echo(&self, target: SocketAddr) -> bool {
        match echo_exchange(target, ECHO_PAYLOAD, self.echo_timeout) {
            Ok(()) => true,
            Err(DetectionError::Timeout) => false,
            Err(e) => {
                debug!("echo to {} failed: {}", target, e);
                false
            }
        }
    }

    /// Discover a gateway and map the service port over UDP; returns the external target
    fn map_service_port(&self) -> Option<(Box<dyn MappingGateway>, SocketAddr)> {
        let gateway = self
            .mapper
            .discover()
            .map_err(|e| debug!("could not perform UPNP discover: {}", e))
            .ok()?;

        let external_ip = gateway
            .external_address()
            .map_err(|e| debug!("could not get gateway external address: {}", e))
            .ok()?;
        info!(
            "gateway ({:?}) external address: {}",
            gateway.protocol(),
            external_ip
        );

        let external_port = gateway
            .add_port_mapping(
                IpProtocol::UDP,
                self.service_port,
                self.service_port,
                MAPPING_DESCRIPTION,
                UDP_MAPPING_LIFETIME_SECS,
            )
            .map_err(|e| {
                debug!(
                    "could not add udp port mapping for {}: {}",
                    self.service_port, e
                )
            })
            .ok()?;

        Some((gateway, SocketAddr::new(external_ip, external_port)))
    }

    fn map_tcp(&self, gateway: &dyn MappingGateway) {
        if let Err(e) = gateway.add_port_mapping(
            IpProtocol::TCP,
            self.service_port,
            self.service_port,
            MAPPING_DESCRIPTION,
            TCP_MAPPING_LIFETIME_SECS,
        ) {
            debug!("tcp port mapping for {} failed (ignored): {}", self.service_port, e);
        }
    }
}
