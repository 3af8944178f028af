//! Pool-block wire format
//!
//! A side-chain block is a complete main-chain candidate block whose miner
//! transaction carries the PPLNS side-chain extension in its extra field.
//! This module owns the canonical serialization, parsing, and the
//! side-chain id derivation; consensus rules live in [`crate::sidechain`].

pub mod codec;

use crate::core::constants::{EXTRA_NONCE_SIZE, NONCE_SIZE};
use crate::core::{Difficulty, Hash};
use crate::crypto::{keccak, keccak_parts};
use crate::error::{CodecError, Error, Result};
use codec::{varint_len, write_varint, Reader};

/// Extra tag: transaction public key
const TX_EXTRA_PUBKEY: u8 = 0x01;
/// Extra tag: extra nonce
const TX_EXTRA_NONCE: u8 = 0x02;
/// Extra tag: side-chain extension
const TX_EXTRA_SIDECHAIN: u8 = 0x03;

/// Miner input marker (coinbase)
const TXIN_GEN: u8 = 0xFF;
/// Output type marker (one-time key)
const TXOUT_KEY: u8 = 0x02;

/// Transaction format version of the miner tx
const MINER_TX_VERSION: u64 = 2;

/// Blocks a coinbase stays locked after being mined
pub const MINED_UNLOCK_WINDOW: u64 = 60;

/// Main-chain block header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHeader {
    /// Hard-fork version
    pub major_version: u8,
    /// Hard-fork vote
    pub minor_version: u8,
    /// Block timestamp
    pub timestamp: u64,
    /// Id of the previous main-chain block
    pub prev_id: Hash,
    /// PoW nonce, varied by miners
    pub nonce: u32,
}

/// One coinbase output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOutput {
    /// Amount in atomic units
    pub amount: u64,
    /// One-time output key
    pub key: Hash,
}

/// The miner (coinbase) transaction
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MinerTx {
    /// Height after which outputs unlock
    pub unlock_time: u64,
    /// Height declared in the generating input
    pub gen_height: u64,
    /// PPLNS payout outputs, window order, newest last
    pub outputs: Vec<TxOutput>,
    /// Transaction public key (`tx_secret · G`)
    pub tx_pubkey: Hash,
    /// Extra nonce, varied per Stratum connection
    pub extra_nonce: u32,
}

/// The side-chain extension carried in the miner tx extra
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SideChainInfo {
    /// Creator wallet public spend key
    pub spend_pub: Hash,
    /// Creator wallet public view key
    pub view_pub: Hash,
    /// Transaction secret key, published so peers can verify outputs
    pub tx_secret: Hash,
    /// Parent side-chain block id (zero only for genesis)
    pub parent: Hash,
    /// Uncle block ids credited by this block
    pub uncles: Vec<Hash>,
    /// Side-chain height
    pub height: u64,
    /// Cumulative side-chain work up to and including this block
    pub cumulative_difficulty: Difficulty,
    /// Difficulty this block had to meet
    pub difficulty: Difficulty,
    /// Declared side-chain id
    pub id: Hash,
}

/// A serialized block plus the offsets miners need
#[derive(Debug, Clone)]
pub struct BlobLayout {
    /// The serialized bytes
    pub bytes: Vec<u8>,
    /// Offset of the 4-byte header nonce
    pub nonce_offset: usize,
    /// Offset of the 4-byte extra nonce inside the miner tx extra
    pub extra_nonce_offset: usize,
    /// Offset of the embedded side-chain id inside the miner tx extra
    pub sidechain_id_offset: usize,
}

/// A complete pool block
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PoolBlock {
    /// Main-chain header
    pub header: BlockHeader,
    /// Coinbase transaction
    pub miner_tx: MinerTx,
    /// Ids of mempool transactions included in the block
    pub tx_ids: Vec<Hash>,
    /// PPLNS side-chain extension
    pub side: SideChainInfo,
}

impl PoolBlock {
    /// Sum of all coinbase outputs
    pub fn total_reward(&self) -> u64 {
        self.miner_tx.outputs.iter().map(|o| o.amount).sum()
    }

    /// Main-chain height this block was built for
    pub fn main_height(&self) -> u64 {
        self.miner_tx.gen_height
    }

    fn serialize_extra(&self) -> (Vec<u8>, usize, usize) {
        let mut extra = Vec::with_capacity(64 + self.side_payload_len());

        extra.push(TX_EXTRA_PUBKEY);
        extra.extend_from_slice(self.miner_tx.tx_pubkey.as_bytes());

        extra.push(TX_EXTRA_NONCE);
        write_varint(&mut extra, EXTRA_NONCE_SIZE as u64);
        let extra_nonce_offset = extra.len();
        extra.extend_from_slice(&self.miner_tx.extra_nonce.to_le_bytes());

        extra.push(TX_EXTRA_SIDECHAIN);
        write_varint(&mut extra, self.side_payload_len() as u64);
        self.write_side_payload(&mut extra, true);
        let sidechain_id_offset = extra.len() - 32;

        (extra, extra_nonce_offset, sidechain_id_offset)
    }

    fn side_payload_len(&self) -> usize {
        32 * 4
            + varint_len(self.side.uncles.len() as u64)
            + 32 * self.side.uncles.len()
            + varint_len(self.side.height)
            + varint_len(self.side.cumulative_difficulty.lo())
            + varint_len(self.side.cumulative_difficulty.hi())
            + varint_len(self.side.difficulty.lo())
            + varint_len(self.side.difficulty.hi())
            + 32
    }

    fn write_side_payload(&self, out: &mut Vec<u8>, with_id: bool) {
        out.extend_from_slice(self.side.spend_pub.as_bytes());
        out.extend_from_slice(self.side.view_pub.as_bytes());
        out.extend_from_slice(self.side.tx_secret.as_bytes());
        out.extend_from_slice(self.side.parent.as_bytes());
        write_varint(out, self.side.uncles.len() as u64);
        for u in &self.side.uncles {
            out.extend_from_slice(u.as_bytes());
        }
        write_varint(out, self.side.height);
        write_varint(out, self.side.cumulative_difficulty.lo());
        write_varint(out, self.side.cumulative_difficulty.hi());
        write_varint(out, self.side.difficulty.lo());
        write_varint(out, self.side.difficulty.hi());
        if with_id {
            out.extend_from_slice(self.side.id.as_bytes());
        }
    }

    fn serialize_miner_tx(&self) -> (Vec<u8>, usize, usize) {
        let mut tx = Vec::with_capacity(128);
        write_varint(&mut tx, MINER_TX_VERSION);
        write_varint(&mut tx, self.miner_tx.unlock_time);
        write_varint(&mut tx, 1); // one generating input
        tx.push(TXIN_GEN);
        write_varint(&mut tx, self.miner_tx.gen_height);
        write_varint(&mut tx, self.miner_tx.outputs.len() as u64);
        for out in &self.miner_tx.outputs {
            write_varint(&mut tx, out.amount);
            tx.push(TXOUT_KEY);
            tx.extend_from_slice(out.key.as_bytes());
        }
        let (extra, extra_nonce_rel, sidechain_id_rel) = self.serialize_extra();
        write_varint(&mut tx, extra.len() as u64);
        let extra_base = tx.len();
        tx.extend_from_slice(&extra);
        tx.push(0); // rct type: none
        (tx, extra_base + extra_nonce_rel, extra_base + sidechain_id_rel)
    }

    fn serialize_header(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + varint_len(self.header.timestamp) + 36);
        out.push(self.header.major_version);
        out.push(self.header.minor_version);
        write_varint(&mut out, self.header.timestamp);
        out.extend_from_slice(self.header.prev_id.as_bytes());
        out.extend_from_slice(&self.header.nonce.to_le_bytes());
        out
    }

    fn nonce_offset(&self) -> usize {
        2 + varint_len(self.header.timestamp) + 32
    }

    /// Serialize the complete block for gossip and upstream submission
    pub fn serialize(&self) -> BlobLayout {
        let header = self.serialize_header();
        let nonce_offset = self.nonce_offset();
        let (tx, extra_nonce_rel, sidechain_id_rel) = self.serialize_miner_tx();

        let mut bytes = header;
        let tx_base = bytes.len();
        bytes.extend_from_slice(&tx);
        write_varint(&mut bytes, self.tx_ids.len() as u64);
        for id in &self.tx_ids {
            bytes.extend_from_slice(id.as_bytes());
        }

        BlobLayout {
            bytes,
            nonce_offset,
            extra_nonce_offset: tx_base + extra_nonce_rel,
            sidechain_id_offset: tx_base + sidechain_id_rel,
        }
    }

    /// Serialize the PoW hashing blob: header, miner tx, and the merkle
    /// root over all transaction hashes in place of the id list.
    pub fn hashing_blob(&self) -> BlobLayout {
        let header = self.serialize_header();
        let nonce_offset = self.nonce_offset();
        let (tx, extra_nonce_rel, sidechain_id_rel) = self.serialize_miner_tx();

        let mut leaves = Vec::with_capacity(1 + self.tx_ids.len());
        leaves.push(keccak(&tx));
        leaves.extend_from_slice(&self.tx_ids);

        let mut bytes = header;
        let tx_base = bytes.len();
        bytes.extend_from_slice(&tx);
        bytes.extend_from_slice(tree_hash(&leaves).as_bytes());
        write_varint(&mut bytes, leaves.len() as u64);

        BlobLayout {
            bytes,
            nonce_offset,
            extra_nonce_offset: tx_base + extra_nonce_rel,
            sidechain_id_offset: tx_base + sidechain_id_rel,
        }
    }

    /// Recompute the side-chain id.
    ///
    /// Keccak over the side-chain extension (without its trailing id) and
    /// the full block blob with the nonce, extra nonce, and embedded id
    /// zeroed, so the id is fixed at template-build time and identical for
    /// every share mined from the template.
    pub fn compute_side_chain_id(&self) -> Hash {
        let layout = self.serialize();
        let mut blob = layout.bytes;
        blob[layout.nonce_offset..layout.nonce_offset + NONCE_SIZE].fill(0);
        blob[layout.extra_nonce_offset..layout.extra_nonce_offset + EXTRA_NONCE_SIZE].fill(0);
        blob[layout.sidechain_id_offset..layout.sidechain_id_offset + 32].fill(0);

        let mut payload = Vec::with_capacity(self.side_payload_len());
        self.write_side_payload(&mut payload, false);
        keccak_parts(&[&payload, &blob])
    }

    /// Parse a block from its full serialization
    pub fn parse(bytes: &[u8]) -> Result<PoolBlock> {
        let mut r = Reader::new(bytes);

        let major_version = r.read_u8()?;
        let minor_version = r.read_u8()?;
        let timestamp = r.read_varint()?;
        let prev_id = r.read_hash()?;
        let nonce = r.read_u32_le()?;

        let version = r.read_varint()?;
        if version != MINER_TX_VERSION {
            return Err(field_err("miner_tx.version", "unsupported version"));
        }
        let unlock_time = r.read_varint()?;
        if r.read_varint()? != 1 {
            return Err(field_err("miner_tx.inputs", "expected one input"));
        }
        if r.read_u8()? != TXIN_GEN {
            return Err(field_err("miner_tx.inputs", "expected coinbase input"));
        }
        let gen_height = r.read_varint()?;

        let out_count = r.read_varint()?;
        if out_count > bytes.len() as u64 {
            return Err(field_err("miner_tx.outputs", "implausible output count"));
        }
        let mut outputs = Vec::with_capacity(out_count as usize);
        for _ in 0..out_count {
            let amount = r.read_varint()?;
            if r.read_u8()? != TXOUT_KEY {
                return Err(field_err("miner_tx.outputs", "expected key output"));
            }
            outputs.push(TxOutput {
                amount,
                key: r.read_hash()?,
            });
        }

        let extra_len = r.read_varint()? as usize;
        let extra = r.read_bytes(extra_len)?;
        let (tx_pubkey, extra_nonce, side) = parse_extra(extra)?;

        if r.read_u8()? != 0 {
            return Err(field_err("miner_tx.rct", "expected empty rct section"));
        }

        let tx_count = r.read_varint()?;
        if tx_count > bytes.len() as u64 {
            return Err(field_err("tx_ids", "implausible transaction count"));
        }
        let mut tx_ids = Vec::with_capacity(tx_count as usize);
        for _ in 0..tx_count {
            tx_ids.push(r.read_hash()?);
        }
        r.expect_end()?;

        Ok(PoolBlock {
            header: BlockHeader {
                major_version,
                minor_version,
                timestamp,
                prev_id,
                nonce,
            },
            miner_tx: MinerTx {
                unlock_time,
                gen_height,
                outputs,
                tx_pubkey,
                extra_nonce,
            },
            tx_ids,
            side,
        })
    }
}

fn field_err(field: &str, message: &str) -> Error {
    Error::Codec(CodecError::InvalidField {
        field: field.into(),
        message: message.into(),
    })
}

/// Parse the miner tx extra; the extra nonce subfield must be present.
fn parse_extra(extra: &[u8]) -> Result<(Hash, u32, SideChainInfo)> {
    let mut r = Reader::new(extra);

    if r.read_u8()? != TX_EXTRA_PUBKEY {
        return Err(field_err("extra", "missing tx pubkey"));
    }
    let tx_pubkey = r.read_hash()?;

    if r.read_u8()? != TX_EXTRA_NONCE {
        return Err(field_err("extra", "missing extra nonce"));
    }
    if r.read_varint()? != EXTRA_NONCE_SIZE as u64 {
        return Err(field_err("extra", "bad extra nonce length"));
    }
    let extra_nonce = u32::from_le_bytes(r.read_bytes(4)?.try_into().expect("4 bytes"));

    if r.read_u8()? != TX_EXTRA_SIDECHAIN {
        return Err(field_err("extra", "missing side-chain extension"));
    }
    let payload_len = r.read_varint()? as usize;
    let payload_start = r.position();
    let side = parse_side_payload(&mut r)?;
    if r.position() - payload_start != payload_len {
        return Err(field_err("extra", "side-chain extension length mismatch"));
    }
    r.expect_end()?;

    Ok((tx_pubkey, extra_nonce, side))
}

fn parse_side_payload(r: &mut Reader<'_>) -> Result<SideChainInfo> {
    let spend_pub = r.read_hash()?;
    let view_pub = r.read_hash()?;
    let tx_secret = r.read_hash()?;
    let parent = r.read_hash()?;
    let uncle_count = r.read_varint()?;
    if uncle_count > 64 {
        return Err(field_err("side.uncles", "implausible uncle count"));
    }
    let mut uncles = Vec::with_capacity(uncle_count as usize);
    for _ in 0..uncle_count {
        uncles.push(r.read_hash()?);
    }
    let height = r.read_varint()?;
    let cumulative_difficulty = Difficulty::from_parts(r.read_varint()?, r.read_varint()?);
    let difficulty = Difficulty::from_parts(r.read_varint()?, r.read_varint()?);
    let id = r.read_hash()?;

    Ok(SideChainInfo {
        spend_pub,
        view_pub,
        tx_secret,
        parent,
        uncles,
        height,
        cumulative_difficulty,
        difficulty,
        id,
    })
}

/// Merkle root over transaction hashes, reference-chain tree shape.
pub fn tree_hash(hashes: &[Hash]) -> Hash {
    match hashes.len() {
        0 => Hash::ZERO,
        1 => hashes[0],
        2 => hash_pair(&hashes[0], &hashes[1]),
        n => {
            let mut cnt = 1usize;
            while cnt * 2 < n {
                cnt *= 2;
            }
            // fold the tail so the working set is exactly `cnt` wide
            let mut ints: Vec<Hash> = hashes[..2 * cnt - n].to_vec();
            let mut i = 2 * cnt - n;
            while i < n {
                ints.push(hash_pair(&hashes[i], &hashes[i + 1]));
                i += 2;
            }
            while cnt > 2 {
                cnt /= 2;
                for j in 0..cnt {
                    ints[j] = hash_pair(&ints[2 * j], &ints[2 * j + 1]);
                }
                ints.truncate(cnt);
            }
            hash_pair(&ints[0], &ints[1])
        }
    }
}

fn hash_pair(a: &Hash, b: &Hash) -> Hash {
    keccak_parts(&[a.as_bytes(), b.as_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_block() -> PoolBlock {
        PoolBlock {
            header: BlockHeader {
                major_version: 16,
                minor_version: 16,
                timestamp: 1_700_000_000,
                prev_id: Hash::from_bytes([7; 32]),
                nonce: 0,
            },
            miner_tx: MinerTx {
                unlock_time: 1000 + MINED_UNLOCK_WINDOW,
                gen_height: 1000,
                outputs: vec![
                    TxOutput {
                        amount: 100,
                        key: Hash::from_bytes([1; 32]),
                    },
                    TxOutput {
                        amount: 200,
                        key: Hash::from_bytes([2; 32]),
                    },
                ],
                tx_pubkey: Hash::from_bytes([3; 32]),
                extra_nonce: 42,
            },
            tx_ids: vec![Hash::from_bytes([4; 32]), Hash::from_bytes([5; 32])],
            side: SideChainInfo {
                spend_pub: Hash::from_bytes([10; 32]),
                view_pub: Hash::from_bytes([11; 32]),
                tx_secret: Hash::from_bytes([12; 32]),
                parent: Hash::from_bytes([13; 32]),
                uncles: vec![Hash::from_bytes([14; 32])],
                height: 500,
                cumulative_difficulty: Difficulty::from_parts(12345, 1),
                difficulty: Difficulty::new(6789),
                id: Hash::from_bytes([15; 32]),
            },
        }
    }

    #[test]
    fn test_round_trip() {
        let block = sample_block();
        let layout = block.serialize();
        let parsed = PoolBlock::parse(&layout.bytes).unwrap();
        assert_eq!(parsed, block);
    }

    #[test]
    fn test_offsets_point_at_fields() {
        let block = sample_block();
        let layout = block.serialize();

        let nonce = u32::from_le_bytes(
            layout.bytes[layout.nonce_offset..layout.nonce_offset + 4]
                .try_into()
                .unwrap(),
        );
        assert_eq!(nonce, block.header.nonce);

        let extra_nonce = u32::from_le_bytes(
            layout.bytes[layout.extra_nonce_offset..layout.extra_nonce_offset + 4]
                .try_into()
                .unwrap(),
        );
        assert_eq!(extra_nonce, 42);

        assert_eq!(
            &layout.bytes[layout.sidechain_id_offset..layout.sidechain_id_offset + 32],
            block.side.id.as_bytes()
        );
    }

    #[test]
    fn test_side_chain_id_independent_of_nonces() {
        let mut block = sample_block();
        let id = block.compute_side_chain_id();

        block.header.nonce = 0xDEADBEEF;
        block.miner_tx.extra_nonce = 7;
        assert_eq!(block.compute_side_chain_id(), id);

        block.side.height += 1;
        assert_ne!(block.compute_side_chain_id(), id);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(PoolBlock::parse(&[]).is_err());
        assert!(PoolBlock::parse(&[0u8; 16]).is_err());

        let mut blob = sample_block().serialize().bytes;
        blob.push(0);
        assert!(PoolBlock::parse(&blob).is_err());
    }

    #[test]
    fn test_parse_requires_extra_nonce() {
        // hand-build an extra with the nonce subfield missing
        let block = sample_block();
        let mut extra = Vec::new();
        extra.push(TX_EXTRA_PUBKEY);
        extra.extend_from_slice(block.miner_tx.tx_pubkey.as_bytes());
        extra.push(TX_EXTRA_SIDECHAIN);
        write_varint(&mut extra, block.side_payload_len() as u64);
        block.write_side_payload(&mut extra, true);
        assert!(parse_extra(&extra).is_err());
    }

    #[test]
    fn test_tree_hash_shapes() {
        let h: Vec<Hash> = (0u8..7).map(|i| Hash::from_bytes([i; 32])).collect();

        assert_eq!(tree_hash(&h[..1]), h[0]);
        assert_eq!(tree_hash(&h[..2]), hash_pair(&h[0], &h[1]));

        // three leaves: first passes through, last two fold
        let expect3 = hash_pair(&h[0], &hash_pair(&h[1], &h[2]));
        assert_eq!(tree_hash(&h[..3]), expect3);

        // deterministic for a larger, non-power-of-two count
        assert_eq!(tree_hash(&h), tree_hash(&h));
        assert_ne!(tree_hash(&h[..6]), tree_hash(&h));
    }

    #[test]
    fn test_hashing_blob_differs_from_wire_blob() {
        let block = sample_block();
        assert_ne!(block.serialize().bytes, block.hashing_blob().bytes);
        // but the nonce lives at the same offset in both
        assert_eq!(
            block.serialize().nonce_offset,
            block.hashing_blob().nonce_offset
        );
    }
}
