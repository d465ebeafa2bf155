//! Default gateway lookup for NAT-PMP

use crate::connectivity::types::MappingError;
use std::net::{IpAddr, Ipv4Addr};

/// Find the default IPv4 gateway
///
/// Linux reads the kernel routing table; macOS and Windows parse the output
/// of the platform route tool.
pub fn find_default_gateway() -> Result<IpAddr, MappingError> {
    default_gateway_v4()?
        .map(IpAddr::V4)
        .ok_or(MappingError::NoGateway)
}

#[cfg(target_os = "linux")]
fn default_gateway_v4() -> Result<Option<Ipv4Addr>, MappingError> {
    let table = std::fs::read_to_string("/proc/net/route")
        .map_err(|e| MappingError::Internal(format!("Failed to read route table: {}", e)))?;
    Ok(parse_proc_net_route(&table))
}

#[cfg(target_os = "macos")]
fn default_gateway_v4() -> Result<Option<Ipv4Addr>, MappingError> {
    let out = run_route_tool("netstat", &["-rn", "-f", "inet"])?;
    Ok(parse_route_tool_output(&out, "default", 1))
}

#[cfg(target_os = "windows")]
fn default_gateway_v4() -> Result<Option<Ipv4Addr>, MappingError> {
    let out = run_route_tool("route", &["print", "0.0.0.0"])?;
    Ok(parse_route_tool_output(&out, "0.0.0.0", 2))
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn default_gateway_v4() -> Result<Option<Ipv4Addr>, MappingError> {
    Err(MappingError::NotSupported)
}

/// Extract the default route's gateway from `/proc/net/route`
///
/// Addresses are printed in host byte order; the default route has destination 0.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn parse_proc_net_route(table: &str) -> Option<Ipv4Addr> {
    table.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || fields[1] != "00000000" {
            return None;
        }
        u32::from_str_radix(fields[2], 16)
            .ok()
            .map(|gw| Ipv4Addr::from(gw.to_ne_bytes()))
            .filter(|gw| !gw.is_unspecified())
    })
}

/// Extract the gateway column of the first line starting with `prefix`
#[cfg_attr(target_os = "linux", allow(dead_code))]
pub(crate) fn parse_route_tool_output(output: &str, prefix: &str, column: usize) -> Option<Ipv4Addr> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with(prefix))
        .find_map(|line| line.split_whitespace().nth(column)?.parse().ok())
}

#[cfg(any(target_os = "macos", target_os = "windows"))]
fn run_route_tool(cmd: &str, args: &[&str]) -> Result<String, MappingError> {
    let output = std::process::Command::new(cmd)
        .args(args)
        .output()
        .map_err(|e| MappingError::Internal(format!("Failed to run {}: {}", cmd, e)))?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
