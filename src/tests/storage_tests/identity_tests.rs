// Identity Tests - Testing NetworkIdentity and node name rules

use crate::connectivity::{DetectionResult, NatType, UDP_PORT1, UDP_PORT2};
use crate::storage::identity::{
    pad_node_name, DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT, SERVICE_PORT_BASE,
};
use crate::storage::{
    service_port_for_node, validate_node_name, NetworkIdentity, MIN_NODE_NAME_LEN,
};
use crate::Error;
use std::net::{IpAddr, Ipv4Addr};

#[test]
fn test_identity_default() {
    let identity = NetworkIdentity::default();

    assert_eq!(identity.server_host, DEFAULT_SERVER_HOST);
    assert_eq!(identity.server_port, DEFAULT_SERVER_PORT);
    assert_eq!(identity.udp_port1, UDP_PORT1);
    assert_eq!(identity.udp_port2, UDP_PORT2);
    assert_eq!(identity.tcp_port, 0);
    assert_eq!(identity.detected.nat_type, NatType::Unknown);
}

#[test]
fn test_validate_node_name() {
    assert!(validate_node_name("officepc1").is_ok());
    assert!(validate_node_name("12345678").is_ok());

    match validate_node_name("short") {
        Err(Error::NodeNameTooShort { name, min }) => {
            assert_eq!(name, "short");
            assert_eq!(min, MIN_NODE_NAME_LEN);
        }
        other => panic!("Expected NodeNameTooShort, got {:?}", other),
    }
}

#[test]
fn test_pad_node_name() {
    let padded = pad_node_name("pi".to_string());

    assert_eq!(padded.len(), MIN_NODE_NAME_LEN);
    assert!(padded.starts_with("pi"));
    assert!(padded[2..].chars().all(|c| c.is_ascii_digit()));
    assert!(validate_node_name(&padded).is_ok());

    assert_eq!(pad_node_name("workstation".to_string()), "workstation");
}

#[test]
fn test_service_port_for_node() {
    let port = service_port_for_node("officepc1");

    assert_eq!(port, service_port_for_node("officepc1"), "Must be deterministic");
    assert!((SERVICE_PORT_BASE..SERVICE_PORT_BASE + 15000).contains(&port));

    for name in ["nodenode", "laptop-01", "a-much-longer-node-name"] {
        let port = service_port_for_node(name);
        assert!((50000..65000).contains(&port), "{} -> {}", name, port);
    }
}

#[test]
fn test_detection_config_uses_identity() {
    let identity = NetworkIdentity {
        server_host: "rendezvous.example.net".to_string(),
        node: "officepc1".to_string(),
        udp_port1: 1000,
        udp_port2: 1001,
        ..Default::default()
    };

    let config = identity.detection_config();
    assert_eq!(config.server_host, "rendezvous.example.net");
    assert_eq!(config.udp_port1, 1000);
    assert_eq!(config.udp_port2, 1001);
    assert_eq!(config.service_port, service_port_for_node("officepc1"));

    let explicit = NetworkIdentity {
        tcp_port: 40404,
        ..identity
    };
    assert_eq!(explicit.detection_config().service_port, 40404);
}

#[test]
fn test_apply_detection() {
    let ip = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5));
    let mut identity = NetworkIdentity::default();

    identity.apply_detection(&DetectionResult {
        public_ip: Some(ip),
        nat_type: NatType::Cone,
        has_ipv4: true,
        has_upnp_or_natpmp: false,
    });

    assert_eq!(identity.detected.public_ip, Some(ip));
    assert_eq!(identity.detected.nat_type, NatType::Cone);
    assert!(identity.detected.has_ipv4);

    // A run without a public IP keeps the last known one
    identity.apply_detection(&DetectionResult::default());
    assert_eq!(identity.detected.public_ip, Some(ip));
    assert_eq!(identity.detected.nat_type, NatType::Unknown);
    assert!(!identity.detected.has_ipv4);
}

#[test]
fn test_identity_serialization_skips_process_local_fields() {
    let mut identity = NetworkIdentity {
        node: "officepc1".to_string(),
        token: 42,
        ..Default::default()
    };
    identity.local.os = "linux-x86_64".to_string();
    identity.detected.has_ipv4 = true;

    let json = serde_json::to_string(&identity).expect("Failed to serialize");
    assert!(!json.contains("linux-x86_64"));
    assert!(!json.contains("has_ipv4"));

    let decoded: NetworkIdentity = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded.node, "officepc1");
    assert_eq!(decoded.token, 42);
    assert!(decoded.local.os.is_empty());
    assert!(!decoded.detected.has_ipv4);
}
