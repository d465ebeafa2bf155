//! Two-port NAT classification
//!
//! Two probes leave from the same local port toward two different server
//! ports. A NAT that reports the same public port both times keeps one
//! mapping per local endpoint (cone); a different port means the mapping
//! depends on the destination (symmetric).

use super::echo::Binder;
use super::portmap::PortMapper;
use super::probe::{nat_probe, NAT_TEST_TIMEOUT};
use super::reachability::{ReachabilityTester, ECHO_LISTENER_WAIT, PUBLIC_IP_ECHO_TIMEOUT};
use super::types::{DetectionError, DetectionResult, NatType};
use rand::Rng;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// First rendezvous UDP port used for classification
pub const UDP_PORT1: u16 = 27182;

/// Second rendezvous UDP port used for classification
pub const UDP_PORT2: u16 = 27183;

/// Range for the random local probe port, clear of well-known ports
pub const LOCAL_PORT_RANGE: Range<u16> = 50000..65000;

/// Parameters for one detection run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionConfig {
    /// Rendezvous server host
    pub server_host: String,
    /// First server-side UDP port
    pub udp_port1: u16,
    /// Second server-side UDP port
    pub udp_port2: u16,
    /// Service port used for the reachability tests
    pub service_port: u16,
    /// Read deadline of each probe
    pub probe_timeout: Duration,
    /// Echo reply timeout
    pub echo_timeout: Duration,
    /// Echo listener wait
    pub listener_wait: Duration,
}

impl DetectionConfig {
    /// Defaults for the given server and service port
    pub fn new(server_host: impl Into<String>, service_port: u16) -> Self {
        Self {
            server_host: server_host.into(),
            udp_port1: UDP_PORT1,
            udp_port2: UDP_PORT2,
            service_port,
            probe_timeout: NAT_TEST_TIMEOUT,
            echo_timeout: PUBLIC_IP_ECHO_TIMEOUT,
            listener_wait: ECHO_LISTENER_WAIT,
        }
    }
}

/// Pick a random local port for the probes
pub fn random_local_port() -> u16 {
    rand::thread_rng().gen_range(LOCAL_PORT_RANGE)
}

/// NAT classifier combining the two probes with the reachability tests
pub struct NatClassifier {
    config: DetectionConfig,
    tester: ReachabilityTester,
}

impl NatClassifier {
    /// Create a classifier; `mapper` serves the port-mapped reachability test
    pub fn new(config: DetectionConfig, mapper: Arc<dyn PortMapper>) -> Self {
        let tester = ReachabilityTester::new(config.service_port, mapper)
            .with_echo_timeout(config.echo_timeout)
            .with_listener_wait(config.listener_wait);
        Self { config, tester }
    }

    /// Override how the echo listener binds the service port
    pub fn with_binder(mut self, binder: Binder) -> Self {
        self.tester = self.tester.with_binder(binder);
        self
    }

    /// Detection parameters
    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Classify from a random local port
    pub fn detect(&self) -> Result<DetectionResult, DetectionError> {
        self.detect_from(random_local_port())
    }

    /// Classify using `local_port` for both probes
    ///
    /// Fails only if the first probe fails. A failed second probe leaves the
    /// NAT type `Unknown` but still reports the reachability flags.
    pub fn detect_from(&self, local_port: u16) -> Result<DetectionResult, DetectionError> {
        let cfg = &self.config;
        debug!("NAT detection start from local port {}", local_port);

        let first = nat_probe(&cfg.server_host, cfg.udp_port1, local_port, cfg.probe_timeout)?;
        // Must not start before the first probe has completed and released the port
        let second = nat_probe(&cfg.server_host, cfg.udp_port2, local_port, cfg.probe_timeout);

        let reach = self.tester.run(first.ip);

        let nat_type = match second {
            Ok(second) => {
                debug!(
                    "local port:{} nat port1:{} nat port2:{}",
                    local_port, first.port, second.port
                );
                NatType::from_observed_ports(first.port, second.port)
            }
            Err(e) => {
                warn!("second NAT probe failed, NAT type unknown: {}", e);
                NatType::Unknown
            }
        };

        let result = DetectionResult {
            public_ip: Some(first.ip),
            nat_type,
            has_ipv4: reach.direct,
            has_upnp_or_natpmp: reach.port_mapped,
        };

        info!(
            "local port:{}, public ip:{}, nat type:{}, hasIPv4:{}, UPNP:{}",
            local_port, first.ip, result.nat_type, result.has_ipv4, result.has_upnp_or_natpmp
        );
        Ok(result)
    }
}

/// Run a detection on tokio's blocking pool
///
/// # Example
///
/// ```no_run
/// use peerlink::connectivity::{detect_nat_type, DetectionConfig, SystemPortMapper};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = DetectionConfig::new("api.peerlink.dev", 52000);
/// let result = detect_nat_type(config, Arc::new(SystemPortMapper::default())).await?;
/// println!("NAT: {} public: {:?}", result.nat_type, result.public_ip);
/// # Ok(())
/// # }
/// ```
pub async fn detect_nat_type(
    config: DetectionConfig,
    mapper: Arc<dyn PortMapper>,
) -> Result<DetectionResult, DetectionError> {
    tokio::task::spawn_blocking(move || NatClassifier::new(config, mapper).detect())
        .await
        .map_err(|e| DetectionError::Join(format!("Task join error: {}", e)))?
}
