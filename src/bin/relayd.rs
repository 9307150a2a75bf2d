//! relayd - multi-camera detection relay daemon
//!
//! This daemon:
//! 1. Loads configuration (file, RELAY_* env, command line)
//! 2. Starts one capture/detect/encode pipeline per camera index
//! 3. Serves live feeds, status and control over HTTP
//! 4. Shuts every pipeline down on Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use multicam_relay::{
    api::{ApiConfig, ApiServer},
    config::parse_indices,
    Relay, RelayConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (.toml or .json).
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,
    /// Listen address, e.g. 0.0.0.0:5050.
    #[arg(long)]
    listen: Option<String>,
    /// Comma-separated camera indices, e.g. "0,1".
    #[arg(long)]
    sources: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = RelayConfig::load_from(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(sources) = args.sources.as_deref() {
        config.capture.indices = parse_indices(sources)?;
    }
    config.validate()?;

    log::info!(
        "relayd {} starting: cameras={:?} capture={:?} detector={} target={}",
        env!("CARGO_PKG_VERSION"),
        config.capture.indices,
        config.capture.backend,
        config.detection.backend,
        config.detection.target_class
    );

    let relay = Arc::new(Relay::from_config(&config)?);
    let api_config = ApiConfig {
        addr: config.listen_addr.clone(),
    };
    let api_handle = ApiServer::new(api_config, relay.clone()).spawn()?;
    log::info!("relay api listening on {}", api_handle.addr);
    for index in relay.indices() {
        log::info!("  camera {} -> http://{}/video_feed_{}", index, api_handle.addr, index);
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("relayd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping...");
    api_handle.stop()?;
    relay.shutdown();

    Ok(())
}
