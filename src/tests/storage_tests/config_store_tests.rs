// ConfigStore Tests - Testing rule mutations, sessions, persistence and locking

use crate::connectivity::{DetectionResult, NatType};
use crate::storage::{
    ConfigStore, LinkMode, LocalInfo, LogLevel, Protocol, RuleKey, TunnelRule,
};
use crate::Error;
use chrono::{Duration, Utc};
use std::net::{IpAddr, Ipv4Addr};
use std::thread;
use tempfile::TempDir;

fn temp_store() -> (TempDir, ConfigStore) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = ConfigStore::new(dir.path().join("config.json"));
    (dir, store)
}

fn rdp_rule() -> TunnelRule {
    TunnelRule::new(Protocol::Tcp, 23389, "officepc1", "127.0.0.1", 3389)
}

fn key(protocol: Protocol, src_port: u16) -> RuleKey {
    RuleKey { protocol, src_port }
}

// Rule Tests

#[test]
fn test_store_starts_empty() {
    let (_dir, store) = temp_store();

    assert!(store.is_empty());
    assert_eq!(store.log_level(), LogLevel::Info);
}

#[test]
fn test_add_with_override_replaces_in_place() {
    let (_dir, store) = temp_store();
    let ssh = TunnelRule::new(Protocol::Tcp, 2222, "officepc1", "127.0.0.1", 22);
    store.add(ssh, true).unwrap();
    store.add(rdp_rule(), true).unwrap();

    let mut replacement = rdp_rule();
    replacement.dst_port = 3390;
    replacement.peer_node = "homepc01".to_string();
    store.add(replacement.clone(), true).unwrap();

    let rules = store.rules();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].src_port, 2222);
    assert_eq!(rules[1], replacement, "Replacement keeps the original position");
}

#[test]
fn test_add_without_override_appends_duplicate() {
    let (_dir, store) = temp_store();

    store.add(rdp_rule(), false).unwrap();
    store.add(rdp_rule(), false).unwrap();

    assert_eq!(store.len(), 2);
}

#[test]
fn test_same_port_different_protocol_are_distinct() {
    let (_dir, store) = temp_store();

    store.add(rdp_rule(), true).unwrap();
    store
        .add(TunnelRule::new(Protocol::Udp, 23389, "officepc1", "127.0.0.1", 3389), true)
        .unwrap();

    assert_eq!(store.len(), 2);
    assert!(store.rule(key(Protocol::Udp, 23389)).is_some());
}

#[test]
fn test_add_rejects_zero_ports() {
    let (_dir, store) = temp_store();
    store.add(rdp_rule(), true).unwrap();

    let zero_src = TunnelRule::new(Protocol::Tcp, 0, "officepc1", "127.0.0.1", 3389);
    let zero_dst = TunnelRule::new(Protocol::Tcp, 23389, "officepc1", "127.0.0.1", 0);

    assert!(matches!(store.add(zero_src, true), Err(Error::InvalidRule(_))));
    assert!(matches!(store.add(zero_dst, true), Err(Error::InvalidRule(_))));
    assert_eq!(store.rules(), vec![rdp_rule()], "Rejected rules must not change the store");
}

#[test]
fn test_delete_removes_first_match() {
    let (_dir, store) = temp_store();
    let ssh = TunnelRule::new(Protocol::Tcp, 2222, "officepc1", "127.0.0.1", 22);
    let dns = TunnelRule::new(Protocol::Udp, 5353, "officepc1", "10.0.0.2", 53);
    store.add(ssh.clone(), false).unwrap();
    store.add(rdp_rule(), false).unwrap();
    store.add(dns.clone(), false).unwrap();

    assert!(store.delete(&rdp_rule()));

    assert_eq!(store.rules(), vec![ssh, dns], "Remaining rules keep their order");
}

#[test]
fn test_delete_missing_rule_is_noop() {
    let (_dir, store) = temp_store();
    store.add(rdp_rule(), true).unwrap();

    let missing = TunnelRule::new(Protocol::Udp, 23389, "officepc1", "127.0.0.1", 3389);
    assert!(!store.delete(&missing));

    let zero = TunnelRule::new(Protocol::Tcp, 0, "", "", 0);
    assert!(!store.delete(&zero));

    assert_eq!(store.len(), 1);
}

#[test]
fn test_switch_app_resets_retry() {
    let (_dir, store) = temp_store();
    let rule = rdp_rule();
    store.add(rule.clone(), true).unwrap();
    for _ in 0..3 {
        store.record_failure(rule.key(), "peer offline");
    }
    assert_eq!(store.session(rule.key()).unwrap().retry_num, 3);

    assert!(store.switch_app(&rule, false));

    let now = Utc::now();
    let session = store.session(rule.key()).unwrap();
    assert_eq!(session.retry_num, 0);
    assert!(session.next_retry_time.unwrap() <= now);
    assert!(!store.rule(rule.key()).unwrap().enabled);
}

#[test]
fn test_switch_app_missing_rule() {
    let (_dir, store) = temp_store();

    assert!(!store.switch_app(&rdp_rule(), true));
    assert!(store.is_empty());
}

// Session Tests

#[test]
fn test_due_rules() {
    let (_dir, store) = temp_store();
    let ssh = TunnelRule::new(Protocol::Tcp, 2222, "officepc1", "127.0.0.1", 22);
    let dns = TunnelRule::new(Protocol::Udp, 5353, "officepc1", "10.0.0.2", 53);
    store.add(ssh.clone(), true).unwrap();
    store.add(rdp_rule(), true).unwrap();
    store.add(dns.clone(), true).unwrap();

    store.record_failure(rdp_rule().key(), "timeout");
    store.switch_app(&dns, false);

    let now = Utc::now();
    assert_eq!(store.due_rules(now), vec![ssh.clone()]);

    // The failed rule becomes due again after its backoff
    let later = now + Duration::seconds(16);
    assert_eq!(store.due_rules(later), vec![ssh, rdp_rule()]);
}

#[test]
fn test_record_connected() {
    let (_dir, store) = temp_store();
    store.add(rdp_rule(), true).unwrap();
    store.record_failure(rdp_rule().key(), "timeout");

    assert!(store.record_connected(rdp_rule().key(), LinkMode::Relay));

    let session = store.session(rdp_rule().key()).unwrap();
    assert_eq!(session.retry_num, 0);
    assert_eq!(session.link_mode, LinkMode::Relay);
    assert!(session.connect_time.is_some());

    assert!(!store.record_connected(key(Protocol::Udp, 1), LinkMode::Relay));
}

#[test]
fn test_update_session() {
    let (_dir, store) = temp_store();
    store.add(rdp_rule(), true).unwrap();

    let previous = store.update_session(rdp_rule().key(), |s| {
        s.peer_nat_type = NatType::Symmetric;
        s.peer_token = 7;
        s.retry_num
    });

    assert_eq!(previous, Some(0));
    let session = store.session(rdp_rule().key()).unwrap();
    assert_eq!(session.peer_nat_type, NatType::Symmetric);
    assert_eq!(session.peer_token, 7);

    assert_eq!(store.update_session(key(Protocol::Tcp, 1), |_| ()), None);
}

#[test]
fn test_override_resets_session() {
    let (_dir, store) = temp_store();
    store.add(rdp_rule(), true).unwrap();
    store.record_failure(rdp_rule().key(), "timeout");

    store.add(rdp_rule(), true).unwrap();

    assert_eq!(store.session(rdp_rule().key()).unwrap().retry_num, 0);
}

// Persistence Tests

#[test]
fn test_save_load_roundtrip() {
    let (dir, store) = temp_store();
    store.set_node("officepc1");
    store.set_token(123_456);
    store.set_user("alice");
    store.set_server("rendezvous.example.net", 28000);
    store.set_tcp_port(52000);
    store.set_share_bandwidth(75);
    store.set_udp_ports(31000, 31001);
    store.set_log_level(LogLevel::Debug);
    store.add(rdp_rule(), true).unwrap();
    let mut dns = TunnelRule::new(Protocol::Udp, 5353, "officepc1", "10.0.0.2", 53);
    dns.app_name = "office-dns".to_string();
    dns.peer_user = "bob".to_string();
    store.add(dns.clone(), true).unwrap();
    store.switch_app(&rdp_rule(), false);

    assert!(store.save());
    assert!(!dir.path().join("config.json.tmp").exists(), "Temp file must be renamed");

    let reloaded = ConfigStore::new(dir.path().join("config.json"));
    assert!(reloaded.load().expect("Failed to load"));

    assert_eq!(reloaded.rules(), store.rules());
    let reloaded_dns = reloaded.rule(dns.key()).expect("Rule should survive");
    assert_eq!(reloaded_dns.app_name, "office-dns");
    assert_eq!(reloaded_dns.peer_user, "bob");
    assert!(!reloaded.rule(rdp_rule().key()).unwrap().enabled);

    let network = reloaded.network();
    assert_eq!(network, store.network(), "Every persisted identity field survives");
    assert_eq!(network.share_bandwidth, 75);
    assert_eq!((network.udp_port1, network.udp_port2), (31000, 31001));
    assert_eq!(network.node, "officepc1");
    assert_eq!(network.token, 123_456);
    assert_eq!(network.user, "alice");
    assert_eq!(network.server_host, "rendezvous.example.net");
    assert_eq!(network.server_port, 28000);
    assert_eq!(network.tcp_port, 52000);
    assert_eq!(reloaded.log_level(), LogLevel::Debug);
}

#[test]
fn test_saved_document_layout() {
    let (dir, store) = temp_store();
    store.set_log_level(LogLevel::Error);
    store.add(rdp_rule(), true).unwrap();
    store.record_failure(rdp_rule().key(), "peer offline");
    store.set_local_info(LocalInfo {
        os: "linux-x86_64".to_string(),
        ..Default::default()
    });

    store.try_save().expect("Failed to save");

    let json = std::fs::read_to_string(dir.path().join("config.json")).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(doc["log_level"], 2);
    assert_eq!(doc["apps"][0]["protocol"], "tcp");
    assert_eq!(doc["apps"][0]["src_port"], 23389);
    assert!(!json.contains("peer offline"), "Sessions are never persisted");
    assert!(!json.contains("retry_num"));
    assert!(!json.contains("linux-x86_64"), "Host descriptors are never persisted");
}

#[test]
fn test_save_creates_parent_directory() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.json");
    let store = ConfigStore::new(&path);

    assert!(store.save());
    assert!(path.exists());
}

#[test]
fn test_load_missing_file() {
    let (_dir, store) = temp_store();

    assert!(!store.load().expect("Missing file is not an error"));
    assert!(store.is_empty());
}

#[test]
fn test_load_empty_file() {
    let (dir, store) = temp_store();
    std::fs::write(dir.path().join("config.json"), "  \n").unwrap();

    assert!(!store.load().unwrap());
}

#[test]
fn test_load_corrupt_file_leaves_store_untouched() {
    let (dir, store) = temp_store();
    store.set_node("officepc1");
    store.add(rdp_rule(), true).unwrap();
    std::fs::write(dir.path().join("config.json"), "{ not json").unwrap();

    let result = store.load();

    assert!(matches!(result, Err(Error::Config(_))));
    assert_eq!(store.rules(), vec![rdp_rule()]);
    assert_eq!(store.network().node, "officepc1");
}

#[test]
fn test_load_partial_document_uses_defaults() {
    let (dir, store) = temp_store();
    std::fs::write(
        dir.path().join("config.json"),
        r#"{"network": {"node": "officepc1"}}"#,
    )
    .unwrap();

    assert!(store.load().unwrap());

    let network = store.network();
    assert_eq!(network.node, "officepc1");
    assert_eq!(network.server_port, 27183);
    assert!(store.is_empty());
    assert_eq!(store.log_level(), LogLevel::Info);
}

#[test]
fn test_load_keeps_process_local_state() {
    let (dir, store) = temp_store();
    store.save();

    let ip = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5));
    store.set_local_info(LocalInfo {
        os: "linux-x86_64".to_string(),
        ..Default::default()
    });
    store.apply_detection(&DetectionResult {
        public_ip: Some(ip),
        nat_type: NatType::Cone,
        has_ipv4: true,
        has_upnp_or_natpmp: true,
    });

    assert!(store.load().unwrap());

    let network = store.network();
    assert_eq!(network.local.os, "linux-x86_64");
    assert_eq!(network.detected.public_ip, Some(ip));
    assert!(network.detected.has_upnp_or_natpmp);
    drop(dir);
}

#[test]
fn test_load_gives_fresh_sessions() {
    let (_dir, store) = temp_store();
    store.add(rdp_rule(), true).unwrap();
    store.save();
    store.record_failure(rdp_rule().key(), "timeout");

    store.load().unwrap();

    assert_eq!(store.session(rdp_rule().key()).unwrap().retry_num, 0);
}

// Concurrency Tests

#[test]
fn test_concurrent_mutations() {
    let (_dir, store) = temp_store();

    let handles: Vec<_> = (0..8u16)
        .map(|i| {
            let store = store.clone();
            thread::spawn(move || {
                for j in 0..25u16 {
                    let src_port = 10000 + i * 100 + j;
                    let rule = TunnelRule::new(Protocol::Tcp, src_port, "officepc1", "127.0.0.1", 22);
                    store.add(rule.clone(), true).unwrap();
                    store.switch_app(&rule, j % 2 == 0);
                    store.record_failure(rule.key(), "timeout");
                }
                assert!(store.save());
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    assert_eq!(store.len(), 200);

    let reloaded = ConfigStore::new(store.path());
    assert!(reloaded.load().unwrap());
    assert_eq!(reloaded.len(), 200, "Last save sees every completed mutation");
}

#[test]
fn test_clones_share_state() {
    let (_dir, store) = temp_store();
    let other = store.clone();

    other.add(rdp_rule(), true).unwrap();
    other.set_tcp_port(40404);

    assert_eq!(store.len(), 1);
    assert_eq!(store.network().tcp_port, 40404);
}

#[test]
fn test_log_level_numeric_mapping() {
    assert_eq!(LogLevel::from(0), LogLevel::Info);
    assert_eq!(LogLevel::from(1), LogLevel::Warn);
    assert_eq!(LogLevel::from(2), LogLevel::Error);
    assert_eq!(LogLevel::from(3), LogLevel::Debug);
    assert_eq!(LogLevel::from(42), LogLevel::Info);
    assert_eq!(u8::from(LogLevel::Debug), 3);
    assert_eq!(LogLevel::Warn.as_tracing_level(), tracing::Level::WARN);
}
