//! Configuration for the pool daemon

use crate::crypto::{NetworkType, WalletAddress};
use crate::error::{Error, Result};
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(
    name = "sidepool",
    about = "Decentralized PPLNS mining pool daemon",
    version
)]
pub struct Args {
    /// Main-chain node hostname or IP
    #[clap(long = "host", default_value = "127.0.0.1")]
    pub host: String,

    /// Main-chain node JSON-RPC port
    #[clap(long = "rpc-port", default_value_t = 18081)]
    pub rpc_port: u16,

    /// Main-chain node ZMQ pub port
    #[clap(long = "zmq-port", default_value_t = 18083)]
    pub zmq_port: u16,

    /// Address the Stratum server listens on
    #[clap(long = "stratum", default_value = "0.0.0.0:3333")]
    pub stratum_listen: String,

    /// Address the P2P server listens on
    #[clap(long = "p2p", default_value = "0.0.0.0:37889")]
    pub p2p_listen: String,

    /// Payout wallet as <spend_pub_hex>:<view_pub_hex>
    #[clap(long = "wallet")]
    pub wallet: Option<String>,

    /// Side-chain network
    #[clap(long = "network", value_name = "mainnet|testnet|stagenet", default_value = "mainnet")]
    pub network: String,

    /// Directory for JSON status files (disabled when absent)
    #[clap(long = "api-path")]
    pub api_path: Option<PathBuf>,

    /// Fixed outgoing bind address
    #[clap(long = "static-bind")]
    pub static_bind: Option<String>,

    /// Level at which log messages are written to the console
    #[clap(
        long = "log-level",
        value_name = "error|warn|info|debug|trace",
        default_value = "info"
    )]
    pub log_level: String,
}

/// Validated daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Main-chain node hostname
    pub host: String,
    /// JSON-RPC port
    pub rpc_port: u16,
    /// ZMQ pub port
    pub zmq_port: u16,
    /// Stratum listen address
    pub stratum_listen: String,
    /// P2P listen address
    pub p2p_listen: String,
    /// Payout wallet
    pub wallet: WalletAddress,
    /// Side-chain network
    pub network: NetworkType,
    /// Status file directory, if enabled
    pub api_path: Option<PathBuf>,
    /// Fixed outgoing bind address
    pub static_bind: Option<String>,
    /// Console log level
    pub log_level: String,
}

impl Config {
    /// Validate arguments into a configuration
    pub fn from_args(args: Args) -> Result<Self> {
        let network: NetworkType = args.network.parse()?;

        let wallet_str = args
            .wallet
            .ok_or_else(|| Error::config_missing_field("wallet"))?;
        let wallet = WalletAddress::parse(&wallet_str, network)?;

        if args.host.trim().is_empty() {
            return Err(Error::config_invalid_value("host", args.host, "a hostname"));
        }

        listen_port(&args.stratum_listen, "stratum")?;
        listen_port(&args.p2p_listen, "p2p")?;

        if args.rpc_port == args.zmq_port {
            return Err(Error::config_invalid_value(
                "zmq-port",
                args.zmq_port.to_string(),
                "a port different from rpc-port",
            ));
        }

        Ok(Config {
            host: args.host,
            rpc_port: args.rpc_port,
            zmq_port: args.zmq_port,
            stratum_listen: args.stratum_listen,
            p2p_listen: args.p2p_listen,
            wallet,
            network,
            api_path: args.api_path,
            static_bind: args.static_bind,
            log_level: args.log_level,
        })
    }

    /// Port of the Stratum listener (already validated)
    pub fn stratum_port(&self) -> u16 {
        listen_port(&self.stratum_listen, "stratum").expect("validated at startup")
    }
}

fn listen_port(addr: &str, field: &'static str) -> Result<u16> {
    addr.rsplit_once(':')
        .and_then(|(_, port)| port.parse().ok())
        .ok_or_else(|| Error::config_invalid_value(field, addr, "host:port"))
}
