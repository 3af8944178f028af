//! Crypto primitives
//!
//! Keccak hashing, ed25519 curve operations for one-time output keys, and
//! the PoW hasher seam. The RandomX backend itself lives out of tree and
//! plugs in through [`PowHasher`].

mod address;
mod pow;

pub use address::{NetworkType, WalletAddress};
pub use pow::{seed_height, KeccakPow, PowHasher};

use crate::core::Hash;
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use rand::RngCore;
use sha3::{Digest, Keccak256};
use std::collections::HashMap;

/// Keccak-256 of a byte slice
pub fn keccak(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    Hash(hasher.finalize().into())
}

/// Keccak-256 over several slices without concatenating them
pub fn keccak_parts(parts: &[&[u8]]) -> Hash {
    let mut hasher = Keccak256::new();
    for p in parts {
        hasher.update(p);
    }
    Hash(hasher.finalize().into())
}

/// Generate a fresh scalar/public-key pair for a block template.
///
/// The scalar is stored in its canonical 32-byte form so it can travel in
/// the side-chain extension.
pub fn generate_keys(rng: &mut impl RngCore) -> (Hash, Hash) {
    let mut wide = [0u8; 64];
    rng.fill_bytes(&mut wide);
    let sec = Scalar::from_bytes_mod_order_wide(&wide);
    let pub_point = EdwardsPoint::mul_base(&sec);
    (
        Hash(sec.to_bytes()),
        Hash(pub_point.compress().to_bytes()),
    )
}

fn decompress(key: &Hash) -> Option<EdwardsPoint> {
    CompressedEdwardsY(key.0).decompress()
}

fn scalar_from_canonical(key: &Hash) -> Option<Scalar> {
    Option::from(Scalar::from_canonical_bytes(key.0))
}

/// Hs(derivation || varint(index)) reduced to a scalar
fn derivation_to_scalar(derivation: &[u8; 32], output_index: u64) -> Scalar {
    let mut buf = Vec::with_capacity(32 + 10);
    buf.extend_from_slice(derivation);
    let mut v = output_index;
    while v >= 0x80 {
        buf.push((v as u8 & 0x7F) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
    Scalar::from_bytes_mod_order(keccak(&buf).0)
}

/// Cache of key derivations, cleared whenever a block is found.
///
/// The expensive step of output-key derivation is the shared-secret point
/// `8·(s·V)`, which is identical for every output paid to the same wallet
/// from the same template secret. One explicit cache object is created at
/// startup and passed down; there is no global state.
#[derive(Default)]
pub struct DerivationCache {
    entries: HashMap<(Hash, Hash), [u8; 32]>,
}

impl DerivationCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all cached derivations
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn get_derivation(&mut self, tx_secret: &Hash, view_pub: &Hash) -> Option<[u8; 32]> {
        if let Some(d) = self.entries.get(&(*tx_secret, *view_pub)) {
            return Some(*d);
        }
        let s = scalar_from_canonical(tx_secret)?;
        let v = decompress(view_pub)?;
        let derivation = (v * s).mul_by_cofactor().compress().to_bytes();
        self.entries.insert((*tx_secret, *view_pub), derivation);
        Some(derivation)
    }

    /// Derive the one-time output key `Hs(8·s·V || idx)·G + S`.
    ///
    /// Returns `None` when any key fails to decode, which validation treats
    /// as a reward-split failure.
    pub fn derive_output_key(
        &mut self,
        tx_secret: &Hash,
        view_pub: &Hash,
        spend_pub: &Hash,
        output_index: u64,
    ) -> Option<Hash> {
        let derivation = self.get_derivation(tx_secret, view_pub)?;
        let spend = decompress(spend_pub)?;
        let scalar = derivation_to_scalar(&derivation, output_index);
        let point = EdwardsPoint::mul_base(&scalar) + spend;
        Some(Hash(point.compress().to_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_keccak_known_vector() {
        // Keccak-256("") from the reference implementation
        let h = keccak(b"");
        assert_eq!(
            h.to_hex(),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_keccak_parts_matches_concat() {
        let a = keccak(b"hello world");
        let b = keccak_parts(&[b"hello ", b"world"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_generate_keys_roundtrip() {
        let (sec, public) = generate_keys(&mut OsRng);
        let s = scalar_from_canonical(&sec).expect("canonical scalar");
        let p = EdwardsPoint::mul_base(&s);
        assert_eq!(Hash(p.compress().to_bytes()), public);
    }

    #[test]
    fn test_output_keys_differ_per_index() {
        let (tx_sec, _) = generate_keys(&mut OsRng);
        let (_, view_pub) = generate_keys(&mut OsRng);
        let (_, spend_pub) = generate_keys(&mut OsRng);

        let mut cache = DerivationCache::new();
        let k0 = cache
            .derive_output_key(&tx_sec, &view_pub, &spend_pub, 0)
            .unwrap();
        let k1 = cache
            .derive_output_key(&tx_sec, &view_pub, &spend_pub, 1)
            .unwrap();
        assert_ne!(k0, k1);

        // deterministic
        let mut fresh = DerivationCache::new();
        assert_eq!(
            fresh
                .derive_output_key(&tx_sec, &view_pub, &spend_pub, 0)
                .unwrap(),
            k0
        );
    }

    #[test]
    fn test_cache_clear() {
        let (tx_sec, _) = generate_keys(&mut OsRng);
        let (_, view_pub) = generate_keys(&mut OsRng);
        let mut cache = DerivationCache::new();
        cache.get_derivation(&tx_sec, &view_pub).unwrap();
        assert_eq!(cache.entries.len(), 1);
        cache.clear();
        assert!(cache.entries.is_empty());
    }

    #[test]
    fn test_invalid_point_rejected() {
        let mut cache = DerivationCache::new();
        // not a canonical curve point
        let bad = Hash::from_bytes([0xFF; 32]);
        let (tx_sec, _) = generate_keys(&mut OsRng);
        assert!(cache
            .derive_output_key(&tx_sec, &bad, &bad, 0)
            .is_none());
    }
}
