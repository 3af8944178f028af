//! # sidepool
//!
//! A decentralized mining-pool daemon for Monero-family networks. Miners
//! collaborate on a low-difficulty side chain whose blocks are complete
//! main-chain candidates; rewards follow a PPLNS split encoded into each
//! block's coinbase, so there is no operator and no held balance.
//!
//! ## Architecture
//!
//! The [`daemon::Daemon`] orchestrator owns the subsystems and a single
//! event loop. The side-chain engine validates gossiped blocks and picks
//! the heaviest tip; the template builder fuses main-chain miner data, the
//! mempool view, and the side-chain tip into dual-purpose blocks for
//! Stratum miners. The Stratum server, the P2P transport, the ZMQ socket
//! reader, and the RandomX library attach from outside through the seams
//! in [`daemon`] and [`crypto`].

#![warn(missing_docs, rust_2018_idioms, unused_lifetimes, unused_qualifications)]
#![forbid(unsafe_code)]

pub mod api;
pub mod block;
pub mod config;
pub mod core;
pub mod crypto;
pub mod daemon;
pub mod error;
pub mod mainchain;
pub mod mempool;
pub mod protocol;
pub mod sidechain;
pub mod template;
pub mod utils;

pub use crate::config::Config;
pub use crate::core::{Difficulty, Hash};
pub use crate::daemon::Daemon;
pub use crate::error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export of the commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::core::{Difficulty, Hash};
    pub use crate::crypto::{NetworkType, PowHasher, WalletAddress};
    pub use crate::daemon::{Daemon, PeerGossip, StratumSink};
    pub use crate::error::{Error, Result};
    pub use crate::sidechain::SideChain;
    pub use crate::template::TemplateBuilder;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
