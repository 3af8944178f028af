//! 32-byte identifier type

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 32-byte opaque identifier (block id, tx id, key image, PoW output).
///
/// Equality and ordering are bytewise, which is what tip tie-breaking
/// relies on.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// The all-zero hash
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Create a hash from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create a hash from a byte slice
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != 32 {
            return Err(Error::other(
                "hash",
                format!("expected 32 bytes, got {}", slice.len()),
            ));
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Get the hash as bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether this is the all-zero hash
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Convert to a lowercase hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes =
            hex::decode(s).map_err(|e| Error::other("hash", format!("invalid hex: {}", e)))?;
        Self::from_slice(&bytes)
    }

    /// Interpret the hash as four little-endian 64-bit limbs.
    ///
    /// Used by the difficulty target check.
    pub fn to_u64_limbs(&self) -> [u64; 4] {
        let mut limbs = [0u64; 4];
        for (i, limb) in limbs.iter_mut().enumerate() {
            let mut b = [0u8; 8];
            b.copy_from_slice(&self.0[i * 8..(i + 1) * 8]);
            *limb = u64::from_le_bytes(b);
        }
        limbs
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let h = Hash::from_bytes([0xAB; 32]);
        assert_eq!(Hash::from_hex(&h.to_hex()).unwrap(), h);
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let a = Hash::from_bytes([0x11; 32]);
        let b = Hash::from_bytes([0x22; 32]);
        assert!(a < b);

        let mut c = [0u8; 32];
        c[0] = 1;
        assert!(Hash::ZERO < Hash::from_bytes(c));
    }

    #[test]
    fn test_limbs_little_endian() {
        let mut bytes = [0u8; 32];
        bytes[0] = 1;
        bytes[8] = 2;
        let limbs = Hash::from_bytes(bytes).to_u64_limbs();
        assert_eq!(limbs[0], 1);
        assert_eq!(limbs[1], 2);
        assert_eq!(limbs[2], 0);
    }

    #[test]
    fn test_serde() {
        let h = Hash::from_bytes([0x5C; 32]);
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h.to_hex()));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn test_invalid_hex() {
        assert!(Hash::from_hex("zz").is_err());
        assert!(Hash::from_hex("00").is_err());
    }
}
