//! Chain data model shared by the daemon client, the builder and the wallet.
//!
//! Transactions carry plain ring signatures and a structured extra field.
//! The prefix hash is computed over a canonical varint serialization so it is
//! stable regardless of how the transaction travels (JSON, hex blob).

use crate::base58::write_varint;
use crate::bns::BnsExtra;
use crate::{keccak256, Hash, KeyImage, PublicKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid transaction blob: {0}")]
    InvalidBlob(String),

    #[error("ring offsets are not strictly increasing")]
    UnsortedOffsets,
}

// ── Transaction type ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    #[default]
    Standard,
    Stake,
    BnsBuy,
    BnsUpdate,
    BnsRenew,
    KeyImageUnlock,
    Coinbase,
}

impl TxType {
    pub fn to_u8(self) -> u8 {
        match self {
            TxType::Standard => 0,
            TxType::Stake => 1,
            TxType::BnsBuy => 2,
            TxType::BnsUpdate => 3,
            TxType::BnsRenew => 4,
            TxType::KeyImageUnlock => 5,
            TxType::Coinbase => 6,
        }
    }
}

// ── Signatures ───────────────────────────────────────────────────────────────

/// Schnorr-style (c, s) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub c: [u8; 32],
    pub s: [u8; 32],
}

impl Signature {
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.c);
        out[32..].copy_from_slice(&self.s);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 64 {
            return None;
        }
        let mut c = [0u8; 32];
        let mut s = [0u8; 32];
        c.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Some(Self { c, s })
    }
}

/// LSAG ring signature: initial challenge plus one response per ring member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RingSignature {
    pub c0: [u8; 32],
    pub s: Vec<[u8; 32]>,
}

// ── Inputs / outputs / extra ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub key_image: KeyImage,
    /// Global output indices of the ring, relative-offset encoded.
    pub key_offsets: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub key: PublicKey,
    /// Set for legacy (non-RingCT) outputs, which can only be spent unmixed.
    pub clear_amount: Option<u64>,
    pub encrypted_amount: [u8; 8],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeExtra {
    pub service_node_key: PublicKey,
    /// Revealed so the service node can verify the staked amount.
    pub tx_secret_key: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockExtra {
    pub service_node_key: PublicKey,
    pub key_image: KeyImage,
    pub signature: Signature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TxExtra {
    pub tx_pub_key: Option<PublicKey>,
    #[serde(default)]
    pub additional_pub_keys: Vec<PublicKey>,
    #[serde(default)]
    pub stake: Option<StakeExtra>,
    #[serde(default)]
    pub bns: Option<BnsExtra>,
    #[serde(default)]
    pub unlock: Option<UnlockExtra>,
    #[serde(default)]
    pub burn: u64,
}

// ── Transaction ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Transaction {
    pub version: u8,
    pub tx_type: TxType,
    pub unlock_time: u64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub extra: TxExtra,
    pub fee: u64,
    #[serde(default)]
    pub signatures: Vec<RingSignature>,
}

impl Transaction {
    /// Canonical serialization of everything except the signatures.
    pub fn prefix_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        write_varint(self.version as u64, &mut buf);
        write_varint(self.tx_type.to_u8() as u64, &mut buf);
        write_varint(self.unlock_time, &mut buf);

        write_varint(self.inputs.len() as u64, &mut buf);
        for input in &self.inputs {
            buf.extend_from_slice(&input.key_image);
            write_varint(input.key_offsets.len() as u64, &mut buf);
            for off in &input.key_offsets {
                write_varint(*off, &mut buf);
            }
        }

        write_varint(self.outputs.len() as u64, &mut buf);
        for out in &self.outputs {
            buf.extend_from_slice(&out.key);
            match out.clear_amount {
                Some(amount) => {
                    buf.push(1);
                    write_varint(amount, &mut buf);
                }
                None => buf.push(0),
            }
            buf.extend_from_slice(&out.encrypted_amount);
        }

        // Struct field order makes the JSON encoding deterministic.
        let extra = serde_json::to_vec(&self.extra).unwrap_or_default();
        write_varint(extra.len() as u64, &mut buf);
        buf.extend_from_slice(&extra);

        write_varint(self.fee, &mut buf);
        buf
    }

    /// Message signed by every ring signature in the transaction.
    pub fn prefix_hash(&self) -> Hash {
        keccak256(&self.prefix_bytes())
    }

    /// Transaction id: hash of prefix hash and signature data.
    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(64 + self.signatures.len() * 32 * 11);
        buf.extend_from_slice(&self.prefix_hash());
        for sig in &self.signatures {
            buf.extend_from_slice(&sig.c0);
            for s in &sig.s {
                buf.extend_from_slice(s);
            }
        }
        keccak256(&buf)
    }

    pub fn key_images(&self) -> impl Iterator<Item = &KeyImage> {
        self.inputs.iter().map(|i| &i.key_image)
    }

    /// Hex-encoded wire form submitted to the daemon.
    pub fn to_blob(&self) -> String {
        hex::encode(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn from_blob(blob: &str) -> Result<Self, ChainError> {
        let bytes = hex::decode(blob).map_err(|e| ChainError::InvalidBlob(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| ChainError::InvalidBlob(e.to_string()))
    }

    /// Rough serialized weight used by the fee model.
    pub fn weight(&self) -> usize {
        self.prefix_bytes().len() + self.signatures.iter().map(|s| 32 + s.s.len() * 32).sum::<usize>()
    }
}

// ── Blocks ───────────────────────────────────────────────────────────────────

/// A transaction as reported by the daemon, with its global output indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEntry {
    pub hash: Hash,
    pub tx: Transaction,
    #[serde(default)]
    pub output_indices: Vec<u64>,
    pub block_height: Option<u64>,
    #[serde(default)]
    pub in_pool: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub hash: Hash,
    pub prev_hash: Hash,
    pub timestamp: u64,
    /// Coinbase first, then the block's transactions.
    pub txs: Vec<TxEntry>,
}

impl Block {
    pub fn summary(&self) -> BlockHash {
        BlockHash { height: self.height, hash: self.hash, prev_hash: self.prev_hash }
    }
}

/// Lightweight block summary used by the fast refresh path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHash {
    pub height: u64,
    pub hash: Hash,
    pub prev_hash: Hash,
}

// ── Ring offsets ─────────────────────────────────────────────────────────────

/// Convert sorted absolute indices to the relative form stored in inputs.
pub fn absolute_to_relative(absolute: &[u64]) -> Result<Vec<u64>, ChainError> {
    let mut out = Vec::with_capacity(absolute.len());
    let mut prev = 0u64;
    for (i, &idx) in absolute.iter().enumerate() {
        if i > 0 && idx <= prev {
            return Err(ChainError::UnsortedOffsets);
        }
        out.push(if i == 0 { idx } else { idx - prev });
        prev = idx;
    }
    Ok(out)
}

pub fn relative_to_absolute(relative: &[u64]) -> Vec<u64> {
    let mut acc = 0u64;
    relative
        .iter()
        .map(|&off| {
            acc = acc.saturating_add(off);
            acc
        })
        .collect()
}
