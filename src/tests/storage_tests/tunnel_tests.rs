// Tunnel Tests - Testing TunnelRule and TunnelSession

use crate::storage::tunnel::{retry_backoff, RETRY_MAX_INTERVAL_SECS};
use crate::storage::{LinkMode, Protocol, RuleKey, TunnelRule, TunnelSession};
use chrono::{Duration, Utc};

// TunnelRule Tests

#[test]
fn test_rule_new_is_enabled() {
    let rule = TunnelRule::new(Protocol::Tcp, 8080, "peer-node-1", "127.0.0.1", 22);

    assert!(rule.enabled);
    assert_eq!(rule.peer_node, "peer-node-1");
    assert_eq!(rule.dst_host, "127.0.0.1");
    assert!(rule.app_name.is_empty());
    assert!(rule.is_valid());
}

#[test]
fn test_rule_key() {
    let rule = TunnelRule::new(Protocol::Udp, 5353, "peer-node-1", "10.0.0.2", 53);

    assert_eq!(
        rule.key(),
        RuleKey {
            protocol: Protocol::Udp,
            src_port: 5353
        }
    );
    assert_eq!(rule.key().to_string(), "udp:5353");
}

#[test]
fn test_rule_zero_ports_invalid() {
    let no_src = TunnelRule::new(Protocol::Tcp, 0, "peer-node-1", "127.0.0.1", 22);
    let no_dst = TunnelRule::new(Protocol::Tcp, 8080, "peer-node-1", "127.0.0.1", 0);

    assert!(!no_src.is_valid());
    assert!(!no_dst.is_valid());
}

#[test]
fn test_rule_serialization() {
    let mut rule = TunnelRule::new(Protocol::Udp, 5353, "peer-node-1", "10.0.0.2", 53);
    rule.app_name = "dns".to_string();

    let json = serde_json::to_string(&rule).expect("Failed to serialize");
    assert!(json.contains("\"udp\""));

    let decoded: TunnelRule = serde_json::from_str(&json).expect("Failed to deserialize");
    assert_eq!(decoded, rule);
}

#[test]
fn test_rule_missing_fields_use_defaults() {
    let decoded: TunnelRule =
        serde_json::from_str(r#"{"src_port": 2222, "dst_port": 22}"#).unwrap();

    assert_eq!(decoded.protocol, Protocol::Tcp);
    assert!(decoded.enabled, "Rules default to enabled");
    assert!(decoded.is_valid());
}

#[test]
fn test_protocol_from_str() {
    assert_eq!("tcp".parse::<Protocol>().unwrap(), Protocol::Tcp);
    assert_eq!("UDP".parse::<Protocol>().unwrap(), Protocol::Udp);
    assert!("sctp".parse::<Protocol>().is_err());
}

// TunnelSession Tests

#[test]
fn test_retry_backoff_doubles_and_caps() {
    assert_eq!(retry_backoff(1), Duration::seconds(15));
    assert_eq!(retry_backoff(2), Duration::seconds(30));
    assert_eq!(retry_backoff(3), Duration::seconds(60));
    assert_eq!(retry_backoff(6), Duration::seconds(480));
    assert_eq!(retry_backoff(7), Duration::seconds(RETRY_MAX_INTERVAL_SECS));
    assert_eq!(retry_backoff(u32::MAX), Duration::seconds(RETRY_MAX_INTERVAL_SECS));
}

#[test]
fn test_new_session_is_due() {
    let session = TunnelSession::default();

    assert!(session.is_due(Utc::now()));
    assert_eq!(session.retry_num, 0);
    assert_eq!(session.link_mode, LinkMode::None);
}

#[test]
fn test_session_record_failure() {
    let now = Utc::now();
    let mut session = TunnelSession::default();

    session.record_failure("peer offline", now);
    session.record_failure("peer offline", now);

    assert_eq!(session.retry_num, 2);
    assert_eq!(session.err_msg, "peer offline");
    assert_eq!(session.retry_time, Some(now));
    assert_eq!(session.next_retry_time, Some(now + Duration::seconds(30)));
    assert!(!session.is_due(now));
    assert!(session.is_due(now + Duration::seconds(30)));
}

#[test]
fn test_session_reset_retry() {
    let now = Utc::now();
    let mut session = TunnelSession::default();
    session.record_failure("timeout", now);

    session.reset_retry(now);

    assert_eq!(session.retry_num, 0);
    assert!(session.next_retry_time.unwrap() <= now);
    assert!(session.is_due(now));
}

#[test]
fn test_session_record_connected() {
    let now = Utc::now();
    let mut session = TunnelSession::default();
    session.record_failure("timeout", now);

    session.record_connected(LinkMode::UdpPunch, now);

    assert_eq!(session.retry_num, 0);
    assert_eq!(session.link_mode, LinkMode::UdpPunch);
    assert_eq!(session.connect_time, Some(now));
    assert!(session.err_msg.is_empty());
}
