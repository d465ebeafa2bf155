//! NAT-PMP (NAT Port Mapping Protocol) client - RFC 6886
//!
//! NAT-PMP talks UDP to port 5351 of the default gateway. Two requests are
//! used here: the external address request (opcode 0), which doubles as
//! gateway discovery, and the UDP/TCP MAP requests (opcodes 1 and 2).

use super::gateway::find_default_gateway;
use super::portmap::MappingGateway;
use super::types::{is_timeout, IpProtocol, MappingError, MappingProtocol};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::{debug, info};

/// NAT-PMP server port (IANA assigned)
const NATPMP_SERVER_PORT: u16 = 5351;

/// NAT-PMP protocol version
pub(crate) const NATPMP_VERSION: u8 = 0;

/// NAT-PMP opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum NatPmpOpcode {
    /// External address request
    ExternalAddress = 0,
    /// UDP port mapping
    MapUdp = 1,
    /// TCP port mapping
    MapTcp = 2,
}

/// NAT-PMP result codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub(crate) enum NatPmpResultCode {
    Success = 0,
    UnsupportedVersion = 1,
    NotAuthorized = 2,
    NetworkFailure = 3,
    OutOfResources = 4,
    UnsupportedOpcode = 5,
}

impl NatPmpResultCode {
    pub(crate) fn from_u16(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::UnsupportedVersion),
            2 => Some(Self::NotAuthorized),
            3 => Some(Self::NetworkFailure),
            4 => Some(Self::OutOfResources),
            5 => Some(Self::UnsupportedOpcode),
            _ => None,
        }
    }

    pub(crate) fn to_error_message(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::UnsupportedVersion => "Unsupported NAT-PMP version",
            Self::NotAuthorized => "Not authorized/refused",
            Self::NetworkFailure => "Network failure",
            Self::OutOfResources => "Out of resources",
            Self::UnsupportedOpcode => "Unsupported opcode",
        }
    }
}

/// Decoded MAP response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NatPmpMapping {
    pub internal_port: u16,
    pub external_port: u16,
    pub lifetime_secs: u32,
}

/// A gateway that answered a NAT-PMP external address request
#[derive(Debug, Clone)]
pub struct NatPmpGateway {
    gateway: IpAddr,
    timeout: Duration,
}

impl NatPmpGateway {
    /// Locate the default gateway and check that it speaks NAT-PMP
    pub fn discover(timeout: Duration) -> Result<Self, MappingError> {
        let gateway = find_default_gateway()?;
        debug!("Found default gateway: {}", gateway);

        let gw = Self { gateway, timeout };
        gw.external_address()?;
        Ok(gw)
    }

    fn request(&self, request: &[u8], response_buf: &mut [u8]) -> Result<usize, MappingError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_read_timeout(Some(self.timeout))?;
        socket.set_write_timeout(Some(self.timeout))?;

        let server_addr = SocketAddr::new(self.gateway, NATPMP_SERVER_PORT);
        socket.send_to(request, server_addr)?;
        debug!("Sent NAT-PMP request (opcode {}) to {}", request[1], server_addr);

        let (n, _) = socket.recv_from(response_buf).map_err(|e| {
            if is_timeout(&e) {
                MappingError::Timeout
            } else {
                MappingError::Io(e)
            }
        })?;
        Ok(n)
    }
}

impl MappingGateway for NatPmpGateway {
    fn protocol(&self) -> MappingProtocol {
        MappingProtocol::NATPMP
    }

    fn external_address(&self) -> Result<IpAddr, MappingError> {
        let request = [NATPMP_VERSION, NatPmpOpcode::ExternalAddress as u8];
        let mut response_buf = [0u8; 12];
        let n = self.request(&request, &mut response_buf)?;
        parse_natpmp_external_address_response(&response_buf[..n])
    }

    fn add_port_mapping(
        &self,
        protocol: IpProtocol,
        internal_port: u16,
        external_port: u16,
        _description: &str,
        lifetime_secs: u32,
    ) -> Result<u16, MappingError> {
        let request =
            build_natpmp_map_request(internal_port, external_port, lifetime_secs, protocol);
        let mut response_buf = [0u8; 16];
        let n = self.request(&request, &mut response_buf)?;
        let mapping = parse_natpmp_map_response(&response_buf[..n], map_opcode(protocol))?;

        info!(
            "NAT-PMP {:?} mapping created: {} -> {} ({}s)",
            protocol, mapping.external_port, mapping.internal_port, mapping.lifetime_secs
        );
        Ok(mapping.external_port)
    }
}

/// MAP opcode for a transport protocol
pub(crate) fn map_opcode(protocol: IpProtocol) -> NatPmpOpcode {
    match protocol {
        IpProtocol::UDP => NatPmpOpcode::MapUdp,
        IpProtocol::TCP => NatPmpOpcode::MapTcp,
    }
}

/// Build a NAT-PMP MAP request packet
pub(crate) fn build_natpmp_map_request(
    internal_port: u16,
    suggested_external_port: u16,
    lifetime_secs: u32,
    protocol: IpProtocol,
) -> Vec<u8> {
    let mut request = Vec::with_capacity(12);

    request.push(NATPMP_VERSION);
    request.push(map_opcode(protocol) as u8);
    // Reserved
    request.extend_from_slice(&[0u8; 2]);
    request.extend_from_slice(&internal_port.to_be_bytes());
    request.extend_from_slice(&suggested_external_port.to_be_bytes());
    request.extend_from_slice(&lifetime_secs.to_be_bytes());

    request
}

/// Check version, response opcode and result code shared by all responses
fn check_response_header(response: &[u8], expected_opcode: u8) -> Result<(), MappingError> {
    let version = response[0];
    if version != NATPMP_VERSION {
        return Err(MappingError::InvalidResponse(format!(
            "Invalid version: {} (expected {})",
            version, NATPMP_VERSION
        )));
    }

    // Responses echo the request opcode + 128
    let opcode = response[1];
    if opcode != 128 + expected_opcode {
        return Err(MappingError::InvalidResponse(format!(
            "Unexpected opcode: {}",
            opcode
        )));
    }

    let result_code = u16::from_be_bytes([response[2], response[3]]);
    let result = NatPmpResultCode::from_u16(result_code).ok_or_else(|| {
        MappingError::InvalidResponse(format!("Unknown result code: {}", result_code))
    })?;

    if result != NatPmpResultCode::Success {
        return Err(MappingError::GatewayError(
            result.to_error_message().to_string(),
        ));
    }
    Ok(())
}

/// Parse a NAT-PMP external address response (12 bytes)
pub(crate) fn parse_natpmp_external_address_response(
    response: &[u8],
) -> Result<IpAddr, MappingError> {
    if response.len() < 12 {
        return Err(MappingError::InvalidResponse(format!(
            "External IP response too short: {} bytes",
            response.len()
        )));
    }
    check_response_header(response, NatPmpOpcode::ExternalAddress as u8)?;

    Ok(IpAddr::V4(Ipv4Addr::new(
        response[8],
        response[9],
        response[10],
        response[11],
    )))
}

/// Parse a NAT-PMP MAP response (16 bytes) to a request sent with `expected`
pub(crate) fn parse_natpmp_map_response(
    response: &[u8],
    expected: NatPmpOpcode,
) -> Result<NatPmpMapping, MappingError> {
    if response.len() < 16 {
        return Err(MappingError::InvalidResponse(format!(
            "Response too short: {} bytes (expected 16)",
            response.len()
        )));
    }
    check_response_header(response, expected as u8)?;

    // Bytes 4-7 carry seconds since the gateway's epoch
    Ok(NatPmpMapping {
        internal_port: u16::from_be_bytes([response[8], response[9]]),
        external_port: u16::from_be_bytes([response[10], response[11]]),
        lifetime_secs: u32::from_be_bytes([
            response[12],
            response[13],
            response[14],
            response[15],
        ]),
    })
}
