//! sidepool daemon entry point

use clap::Parser;
use sidepool::config::{Args, Config};
use sidepool::crypto::KeccakPow;
use sidepool::daemon::{Daemon, DisabledGossip, DisabledStratum};
use sidepool::{utils, VERSION};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("sidepool: {}", e);
            eprintln!("Try \"sidepool --help\".");
            return ExitCode::FAILURE;
        }
    };

    utils::init_logging(&config.log_level);
    info!("sidepool v{}", VERSION);
    info!(
        "mining to {} on {} (node {}:{})",
        config.wallet, config.network, config.host, config.rpc_port
    );

    // The Stratum server, P2P transport, and RandomX backend link in from
    // their own crates; without them the daemon still tracks both chains
    // and keeps templates and status files current.
    let hasher = Arc::new(KeccakPow::new());
    let daemon = match Daemon::new(
        config,
        hasher,
        Arc::new(DisabledStratum),
        Arc::new(DisabledGossip),
    ) {
        Ok(daemon) => Arc::new(daemon),
        Err(e) => {
            error!("startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match daemon.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}
