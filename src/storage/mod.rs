//! Tunnel configuration storage
//!
//! This module holds the agent's persistent configuration:
//! - `tunnel` - Tunnel rules (persisted) and their runtime sessions (in memory)
//! - `identity` - Network identity, node name rules and service port derivation
//! - `config_store` - Thread-safe store with JSON persistence

// Submodules
pub mod config_store;
pub mod identity;
pub mod tunnel;

// Re-export commonly used types
pub use config_store::{ConfigStore, LogLevel, DEFAULT_CONFIG_FILE};
pub use identity::{DetectedInfo, LocalInfo, NetworkIdentity, MIN_NODE_NAME_LEN};
pub use tunnel::{LinkMode, Protocol, RuleKey, TunnelRule, TunnelSession};

// Re-export main functions
pub use identity::{default_node_name, service_port_for_node, validate_node_name};
