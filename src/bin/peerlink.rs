//! Peerlink agent
//!
//! Applies the command line to the persisted config, detects the NAT type
//! and public reachability once, and saves the merged result.

use clap::Parser;
use peerlink::connectivity::{detect_nat_type, local, PortMapper, SystemPortMapper};
use peerlink::params::Params;
use peerlink::storage::{ConfigStore, LocalInfo, DEFAULT_CONFIG_FILE};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Exit status for an unusable node name
const EXIT_NODE_NAME: i32 = 9;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let params = Params::parse();
    let store = ConfigStore::new(DEFAULT_CONFIG_FILE);

    // Installed before ingest so rule rejections and save failures are logged;
    // the persisted level is applied once the config is loaded
    let log_file = params.log_file(store.path());
    let logging = peerlink::init_logging(params.initial_log_level(), log_file.as_deref())?;

    let ingested = match params.apply(&store) {
        Ok(ingested) => ingested,
        Err(e @ peerlink::Error::NodeNameTooShort { .. }) => {
            error!("{}", e);
            eprintln!("{}", e);
            std::process::exit(EXIT_NODE_NAME);
        }
        Err(e) => return Err(e.into()),
    };

    logging.set_level(ingested.log_level)?;
    if let Some(e) = &ingested.load_error {
        error!("existing config ignored: {}", e);
    }
    debug!(
        "daemon mode: {}, config saved: {}",
        ingested.daemon, ingested.saved
    );

    store.set_local_info(LocalInfo::discover());
    store.set_public_ipv6(local::global_ipv6());

    let network = store.network();
    info!(
        "node {} (server {}:{}, service port {}, {} apps)",
        network.node,
        network.server_host,
        network.server_port,
        network.tcp_port,
        store.len()
    );

    let mapper: Arc<dyn PortMapper> = Arc::new(SystemPortMapper::default());
    match detect_nat_type(store.detection_config(), mapper).await {
        Ok(result) => store.apply_detection(&result),
        Err(e) => warn!("NAT detection failed: {}", e),
    }

    let detected = store.network().detected;
    println!(
        "public ip: {}  ipv6: {}  nat: {}  public ipv4: {}  upnp/nat-pmp: {}",
        detected
            .public_ip
            .map_or_else(|| "-".to_string(), |ip| ip.to_string()),
        detected
            .public_ipv6
            .map_or_else(|| "-".to_string(), |ip| ip.to_string()),
        detected.nat_type,
        detected.has_ipv4,
        detected.has_upnp_or_natpmp
    );

    store.save();
    Ok(())
}
