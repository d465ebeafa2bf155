//! Peerlink - connectivity core of a peer-to-peer tunneling agent
//!
//! This library classifies the NAT the host sits behind, checks whether the
//! host is publicly reachable (directly or through a UPnP/NAT-PMP mapping),
//! and keeps the tunnel rule configuration that the reconnect loop drives.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connectivity;
pub mod params;
pub mod storage;


use std::path::Path;
use storage::LogLevel;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{reload, Registry};

/// Result type alias for Peerlink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Peerlink operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration could not be read or written
    #[error("Config error: {0}")]
    Config(String),

    /// Tunnel rule rejected at the store boundary
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    /// Node name below the minimum length
    #[error("Node name {name:?} is too short (minimum {min} characters)")]
    NodeNameTooShort {
        /// Rejected name
        name: String,
        /// Minimum length
        min: usize,
    },

    /// NAT detection failed
    #[error("Detection error: {0}")]
    Detection(#[from] connectivity::DetectionError),

    /// Port mapping failed
    #[error("Mapping error: {0}")]
    Mapping(#[from] connectivity::MappingError),

    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

/// Handle to the installed subscriber's level filter
#[derive(Clone)]
pub struct LogHandle {
    filter: reload::Handle<LevelFilter, Registry>,
}

impl LogHandle {
    /// Change the maximum level of the running subscriber
    pub fn set_level(&self, level: LogLevel) -> Result<()> {
        self.filter
            .reload(LevelFilter::from_level(level.as_tracing_level()))
            .map_err(|e| Error::Config(format!("Failed to change log level: {}", e)))
    }
}

/// Install the global `tracing` subscriber
///
/// Logs go to the console unless `log_file` is given, in which case they are
/// appended to that file without colours. The level can be changed later
/// through the returned handle, so logging can start before the persisted
/// level is known.
pub fn init_logging(level: LogLevel, log_file: Option<&Path>) -> Result<LogHandle> {
    let (filter, handle) = reload::Layer::new(LevelFilter::from_level(level.as_tracing_level()));

    let writer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(log_file.is_none())
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to install logger: {}", e)))?;

    Ok(LogHandle { filter: handle })
}
