//! Payout wallet address

use crate::core::Hash;
use crate::error::{Error, Result};
use curve25519_dalek::edwards::CompressedEdwardsY;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Network the side chain (and the wallet) belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Production network
    Mainnet,
    /// Public test network
    Testnet,
    /// Staging network
    Stagenet,
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetworkType::Mainnet => "mainnet",
            NetworkType::Testnet => "testnet",
            NetworkType::Stagenet => "stagenet",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for NetworkType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(NetworkType::Mainnet),
            "testnet" => Ok(NetworkType::Testnet),
            "stagenet" => Ok(NetworkType::Stagenet),
            other => Err(Error::config_invalid_value(
                "network",
                other,
                "mainnet|testnet|stagenet",
            )),
        }
    }
}

/// Public half of a payout wallet.
///
/// Address decoding (base58, checksums) happens outside the daemon; the
/// core receives the two public keys directly, as
/// `<spend_pub_hex>:<view_pub_hex>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WalletAddress {
    /// Public spend key
    pub spend_pub: Hash,
    /// Public view key
    pub view_pub: Hash,
    /// Network tag the address was encoded for
    pub network: NetworkType,
}

impl WalletAddress {
    /// Build an address from its raw keys, verifying both are curve points
    pub fn new(spend_pub: Hash, view_pub: Hash, network: NetworkType) -> Result<Self> {
        let addr = Self {
            spend_pub,
            view_pub,
            network,
        };
        if !addr.valid() {
            return Err(Error::config("wallet keys are not valid curve points"));
        }
        Ok(addr)
    }

    /// Parse from `<spend_pub_hex>:<view_pub_hex>`
    pub fn parse(s: &str, network: NetworkType) -> Result<Self> {
        let (spend, view) = s.split_once(':').ok_or_else(|| {
            Error::config_invalid_value("wallet", s, "<spend_pub_hex>:<view_pub_hex>")
        })?;
        Self::new(Hash::from_hex(spend)?, Hash::from_hex(view)?, network)
    }

    /// Whether both keys decompress to curve points
    pub fn valid(&self) -> bool {
        CompressedEdwardsY(self.spend_pub.0).decompress().is_some()
            && CompressedEdwardsY(self.view_pub.0).decompress().is_some()
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // abbreviated form for logs
        let spend = self.spend_pub.to_hex();
        write!(f, "{}…{} ({})", &spend[..8], &spend[56..], self.network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_keys;
    use rand::rngs::OsRng;

    fn test_wallet() -> WalletAddress {
        let (_, spend_pub) = generate_keys(&mut OsRng);
        let (_, view_pub) = generate_keys(&mut OsRng);
        WalletAddress::new(spend_pub, view_pub, NetworkType::Mainnet).unwrap()
    }

    #[test]
    fn test_parse_round_trip() {
        let w = test_wallet();
        let s = format!("{}:{}", w.spend_pub.to_hex(), w.view_pub.to_hex());
        let parsed = WalletAddress::parse(&s, NetworkType::Mainnet).unwrap();
        assert_eq!(parsed, w);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(WalletAddress::parse("nonsense", NetworkType::Mainnet).is_err());
        // valid hex but not curve points
        let bad = format!("{}:{}", "ff".repeat(32), "ff".repeat(32));
        assert!(WalletAddress::parse(&bad, NetworkType::Mainnet).is_err());
    }

    #[test]
    fn test_network_type_from_str() {
        assert_eq!(
            "mainnet".parse::<NetworkType>().unwrap(),
            NetworkType::Mainnet
        );
        assert_eq!(
            "STAGENET".parse::<NetworkType>().unwrap(),
            NetworkType::Stagenet
        );
        assert!("regtest".parse::<NetworkType>().is_err());
    }
}
