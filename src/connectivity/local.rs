//! Local address and host descriptors
//!
//! Everything here is best-effort: a missing value is `None`, never an error.

use network_interface::{NetworkInterface, NetworkInterfaceConfig};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, UdpSocket};
use tracing::debug;

/// Local IPv4 address on the default outbound route
///
/// Connecting a UDP socket selects a source address without sending anything.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// Global IPv6 source address, if the host has IPv6 connectivity
///
/// Loopback and link-local addresses are rejected.
pub fn global_ipv6() -> Option<Ipv6Addr> {
    let socket = UdpSocket::bind("[::]:0").ok()?;
    socket.connect("[2001:4860:4860::8888]:80").ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V6(ip) if is_global_ipv6(&ip) => Some(ip),
        _ => None,
    }
}

/// Check if an IPv6 address is link-local (fe80::/10)
pub(crate) fn is_ipv6_link_local(addr: &Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfe80
}

pub(crate) fn is_global_ipv6(addr: &Ipv6Addr) -> bool {
    !(addr.is_loopback() || addr.is_unspecified() || is_ipv6_link_local(addr))
}

/// Operating system descriptor reported to the rendezvous server
pub fn os_name() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

/// Hardware address of the interface carrying the outbound IPv4 address
///
/// Falls back to the first non-loopback interface with a hardware address.
pub fn mac_address() -> Option<String> {
    let interfaces = NetworkInterface::show()
        .map_err(|e| debug!("could not list network interfaces: {}", e))
        .ok()?;
    let candidates = interfaces
        .into_iter()
        .map(|iface| {
            let ips = iface.addr.iter().map(|addr| addr.ip()).collect();
            (iface.mac_addr, ips)
        })
        .collect();
    select_mac(candidates, local_ipv4().map(IpAddr::V4))
}

/// Pick a MAC from `(mac, addresses)` pairs, preferring the one owning `preferred`
pub(crate) fn select_mac(
    candidates: Vec<(Option<String>, Vec<IpAddr>)>,
    preferred: Option<IpAddr>,
) -> Option<String> {
    let usable: Vec<(String, Vec<IpAddr>)> = candidates
        .into_iter()
        .filter_map(|(mac, ips)| {
            let mac = mac?.trim().to_ascii_lowercase();
            let hardware = !mac.is_empty() && mac != "00:00:00:00:00:00";
            let loopback = !ips.is_empty() && ips.iter().all(IpAddr::is_loopback);
            (hardware && !loopback).then_some((mac, ips))
        })
        .collect();

    preferred
        .and_then(|ip| usable.iter().find(|(_, ips)| ips.contains(&ip)))
        .or_else(|| usable.first())
        .map(|(mac, _)| mac.clone())
}

/// Host name of this machine
#[cfg(unix)]
pub fn host_name() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer outlives the call and its length is passed along
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if rc != 0 {
        return None;
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8(buf[..len].to_vec())
        .ok()
        .filter(|name| !name.is_empty())
}

/// Host name of this machine
#[cfg(not(unix))]
pub fn host_name() -> Option<String> {
    std::env::var("COMPUTERNAME")
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}
