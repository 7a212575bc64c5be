//! The daemon collaborator as seen by the wallet engine.
//!
//! Calls are blocking; the synchronizer runs them from its own threads.

use crate::error::RpcError;
use beldex_types::{Block, BlockHash, BnsRecordInfo, Hash, KeyImage, PublicKey, TxEntry};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHeight {
    /// Number of blocks the daemon has (top height + 1).
    pub height: u64,
    /// Height the daemon believes the network is at; 0 when it is synced.
    pub target_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitResult {
    Accepted,
    Rejected(String),
}

/// Ring member data returned by `get_outputs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputKey {
    pub global_index: u64,
    pub key: PublicKey,
    pub height: u64,
    pub unlocked: bool,
}

/// Cumulative count of outputs per block, starting at `start_height`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OutputDistribution {
    pub start_height: u64,
    pub cumulative: Vec<u64>,
}

impl OutputDistribution {
    pub fn total_outputs(&self) -> u64 {
        self.cumulative.last().copied().unwrap_or(0)
    }
}

pub trait DaemonClient: Send + Sync {
    fn get_height(&self) -> Result<ChainHeight, RpcError>;

    /// Full blocks from `start_height`, at most `max_count`.
    fn get_blocks(&self, start_height: u64, max_count: usize) -> Result<Vec<Block>, RpcError>;

    /// Block summaries from `start_height`, at most `max_count`.
    fn get_hashes(&self, start_height: u64, max_count: usize) -> Result<Vec<BlockHash>, RpcError>;

    fn submit_transaction(&self, blob: &str) -> Result<SubmitResult, RpcError>;

    /// Chain or pool transactions; `None` for unknown hashes.
    fn get_transactions(&self, hashes: &[Hash]) -> Result<Vec<Option<TxEntry>>, RpcError>;

    fn get_output_distribution(&self) -> Result<OutputDistribution, RpcError>;

    fn get_outputs(&self, indices: &[u64]) -> Result<Vec<OutputKey>, RpcError>;

    /// Spent status per key image (chain or pool).
    fn is_key_image_spent(&self, key_images: &[KeyImage]) -> Result<Vec<bool>, RpcError>;

    fn lookup_bns(&self, name_hash: &Hash) -> Result<Option<BnsRecordInfo>, RpcError>;
}
