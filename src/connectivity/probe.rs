//! Single-shot NAT detection probe
//!
//! Sends one detection request from a fixed local port and waits for the
//! rendezvous server to report the address it observed. No retries happen
//! here; a timeout or decode failure is returned to the caller as is.

use super::types::{DetectionError, ObservedAddr};
use super::wire::{decode_nat_detect_response, encode_nat_detect_request};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket};
use std::time::Duration;
use tracing::{debug, error};

/// Default read deadline for a detection probe
pub const NAT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolve `host:port` to the first IPv4 socket address
pub(crate) fn resolve_ipv4(host: &str, port: u16) -> Result<SocketAddr, DetectionError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| DetectionError::Resolve(format!("{}:{}: {}", host, port, e)))?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| DetectionError::Resolve(format!("{}:{}: no IPv4 address", host, port)))
}

/// Send one NAT detection request and wait for the observed-address reply
///
/// # Arguments
///
/// * `server_host` - Rendezvous server host name or IP
/// * `server_port` - Server-side UDP port to probe
/// * `local_port` - Local UDP port to bind (0.0.0.0)
/// * `timeout` - Read deadline for the reply
///
/// The socket is closed on every exit path.
pub fn nat_probe(
    server_host: &str,
    server_port: u16,
    local_port: u16,
    timeout: Duration,
) -> Result<ObservedAddr, DetectionError> {
    debug!(
        "NAT probe start: {}:{} from local port {}",
        server_host, server_port, local_port
    );

    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, local_port))
        .map_err(|e| {
            error!("NAT probe failed to bind local port {}: {}", local_port, e);
            DetectionError::Io(e)
        })?;

    let dst = resolve_ipv4(server_host, server_port)?;

    socket.send_to(&encode_nat_detect_request(), dst)?;
    socket.set_read_timeout(Some(timeout))?;

    let mut buf = [0u8; 1024];
    let (n, from) = socket.recv_from(&mut buf).map_err(|e| {
        error!("NAT detect error from {}: {}", dst, e);
        DetectionError::from(e)
    })?;

    let observed = decode_nat_detect_response(&buf[..n])?;
    debug!(
        "NAT probe end: {} reports {}:{}",
        from, observed.ip, observed.port
    );

    Ok(observed)
}
