//! Detection message framing
//!
//! Every detection datagram starts with a fixed 8-byte little-endian header:
//!
//! ```text
//! +----------------+------------------+-----------------+
//! | data_len (u32) | main_type (u16)  | sub_type (u16)  |
//! +----------------+------------------+-----------------+
//! ```
//!
//! Requests carry an empty body. The rendezvous server answers with a JSON
//! body `{"ip": "...", "port": N}` describing the address it observed.

use super::types::{DetectionError, ObservedAddr};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Size of the message header in bytes
pub const HEADER_SIZE: usize = 8;

/// Main message type for NAT detection
pub const MSG_NAT_DETECT: u16 = 2;

/// Message header preceding every detection datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Length of the body following the header
    pub data_len: u32,
    /// Message family
    pub main_type: u16,
    /// Message kind within the family
    pub sub_type: u16,
}

impl MessageHeader {
    /// Encode the header in wire order
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.data_len.to_le_bytes());
        buf[4..6].copy_from_slice(&self.main_type.to_le_bytes());
        buf[6..8].copy_from_slice(&self.sub_type.to_le_bytes());
        buf
    }

    /// Decode a header from the start of a datagram
    pub fn parse(data: &[u8]) -> Result<Self, DetectionError> {
        if data.len() < HEADER_SIZE {
            return Err(DetectionError::Decode(format!(
                "Datagram too short: {} bytes (header is {})",
                data.len(),
                HEADER_SIZE
            )));
        }

        Ok(Self {
            data_len: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            main_type: u16::from_le_bytes([data[4], data[5]]),
            sub_type: u16::from_le_bytes([data[6], data[7]]),
        })
    }
}

/// Body of the server's NAT detection reply
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NatDetectResponse {
    /// Caller's IP as seen by the server
    pub ip: String,
    /// Caller's port as seen by the server
    pub port: u16,
}

/// Build a framed message with the given type and body
pub fn encode_message(main_type: u16, sub_type: u16, body: &[u8]) -> Vec<u8> {
    let header = MessageHeader {
        data_len: body.len() as u32,
        main_type,
        sub_type,
    };
    let mut msg = Vec::with_capacity(HEADER_SIZE + body.len());
    msg.extend_from_slice(&header.to_bytes());
    msg.extend_from_slice(body);
    msg
}

/// Build the NAT detection request (header only)
pub fn encode_nat_detect_request() -> Vec<u8> {
    encode_message(MSG_NAT_DETECT, 0, &[])
}

/// Build a NAT detection reply carrying the observed address
pub fn encode_nat_detect_response(observed: &ObservedAddr) -> Result<Vec<u8>, DetectionError> {
    let body = serde_json::to_vec(&NatDetectResponse {
        ip: observed.ip.to_string(),
        port: observed.port,
    })
    .map_err(|e| DetectionError::Decode(format!("Failed to encode response: {}", e)))?;
    Ok(encode_message(MSG_NAT_DETECT, 0, &body))
}

/// Decode a NAT detection reply into the observed address
pub fn decode_nat_detect_response(datagram: &[u8]) -> Result<ObservedAddr, DetectionError> {
    let header = MessageHeader::parse(datagram)?;
    if header.main_type != MSG_NAT_DETECT {
        return Err(DetectionError::Decode(format!(
            "Unexpected message type: {}",
            header.main_type
        )));
    }

    let body = &datagram[HEADER_SIZE..];
    let rsp: NatDetectResponse = serde_json::from_slice(body)
        .map_err(|e| DetectionError::Decode(format!("Invalid response body: {}", e)))?;

    let ip: IpAddr = rsp
        .ip
        .parse()
        .map_err(|_| DetectionError::Decode(format!("Invalid observed IP: {:?}", rsp.ip)))?;

    Ok(ObservedAddr { ip, port: rsp.port })
}
