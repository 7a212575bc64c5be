//! In-memory daemon: a single-node chain kept in process.
//!
//! Used as the daemon in tests and offline simulations. Submitted
//! transactions are checked for double spends and valid ring signatures,
//! then held in the pool until the next `mine_block`.

use crate::daemon::{ChainHeight, DaemonClient, OutputDistribution, OutputKey, SubmitResult};
use crate::error::RpcError;
use beldex_crypto::{keccak256, lsag_verify, random_point};
use beldex_types::constants::{DEFAULT_TX_SPENDABLE_AGE, MAX_BLOCK_NUMBER, MINED_MONEY_UNLOCK_WINDOW};
use beldex_types::{
    relative_to_absolute, Block, BlockHash, BnsRecordInfo, Hash, KeyImage, MappingYears, PublicKey, Transaction,
    TxEntry, TxExtra, TxOutput, TxType,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

const GENESIS_TIMESTAMP: u64 = 1_600_000_000;

#[derive(Debug, Clone)]
struct OutputRecord {
    key: PublicKey,
    height: u64,
    unlock_time: u64,
    coinbase: bool,
}

#[derive(Default)]
struct Chain {
    blocks: Vec<Block>,
    outputs: Vec<OutputRecord>,
    /// Key image -> height it was spent at.
    spent: HashMap<KeyImage, u64>,
    txs: HashMap<Hash, TxEntry>,
    pool: Vec<TxEntry>,
    bns: HashMap<Hash, BnsRecordInfo>,
}

pub struct MemoryDaemon {
    chain: Mutex<Chain>,
    offline: AtomicBool,
    nonce: AtomicU64,
    calls: AtomicU64,
    /// Submissions still accepted before `submit_transaction` fails.
    submit_quota: AtomicU64,
}

impl Default for MemoryDaemon {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDaemon {
    /// A chain holding only the genesis block.
    pub fn new() -> Self {
        let daemon = Self {
            chain: Mutex::new(Chain::default()),
            offline: AtomicBool::new(false),
            nonce: AtomicU64::new(0),
            calls: AtomicU64::new(0),
            submit_quota: AtomicU64::new(u64::MAX),
        };
        daemon.mine_block(Vec::new());
        daemon
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Chain> {
        self.chain.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_online(&self) -> Result<(), RpcError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.offline.load(Ordering::SeqCst) {
            return Err(RpcError::Unreachable("memory daemon offline".into()));
        }
        Ok(())
    }

    /// Make every call fail with `Unreachable` until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Let `n` more submissions through; later ones fail with `Unreachable`.
    pub fn limit_submissions(&self, n: u64) {
        self.submit_quota.store(n, Ordering::SeqCst);
    }

    /// Number of daemon calls served (or refused) so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn height(&self) -> u64 {
        self.lock().blocks.len() as u64
    }

    pub fn pool_size(&self) -> usize {
        self.lock().pool.len()
    }

    pub fn pool_transactions(&self) -> Vec<Transaction> {
        self.lock().pool.iter().map(|e| e.tx.clone()).collect()
    }

    pub fn output_count(&self) -> u64 {
        self.lock().outputs.len() as u64
    }

    /// Mine a block holding `txs` plus everything in the pool.
    pub fn mine_block(&self, txs: Vec<Transaction>) -> Block {
        let mut chain = self.lock();
        let height = chain.blocks.len() as u64;
        let prev_hash = chain.blocks.last().map(|b| b.hash).unwrap_or([0u8; 32]);
        let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);

        let mut entries: Vec<Transaction> = txs;
        entries.extend(chain.pool.drain(..).map(|e| e.tx));

        let mut block_txs = Vec::with_capacity(entries.len());
        for tx in entries {
            let hash = tx.hash();
            let mut output_indices = Vec::with_capacity(tx.outputs.len());
            for out in &tx.outputs {
                output_indices.push(chain.outputs.len() as u64);
                chain.outputs.push(OutputRecord {
                    key: out.key,
                    height,
                    unlock_time: tx.unlock_time,
                    coinbase: tx.tx_type == TxType::Coinbase,
                });
            }
            for ki in tx.key_images() {
                chain.spent.insert(*ki, height);
            }
            if let Some(bns) = &tx.extra.bns {
                apply_bns(&mut chain.bns, tx.tx_type, bns, hash, height);
            }
            let entry = TxEntry { hash, tx, output_indices, block_height: Some(height), in_pool: false };
            chain.txs.insert(hash, entry.clone());
            block_txs.push(entry);
        }

        let mut header = Vec::with_capacity(80 + block_txs.len() * 32);
        header.extend_from_slice(&height.to_le_bytes());
        header.extend_from_slice(&prev_hash);
        header.extend_from_slice(&nonce.to_le_bytes());
        for e in &block_txs {
            header.extend_from_slice(&e.hash);
        }
        let block = Block {
            height,
            hash: keccak256(&header),
            prev_hash,
            timestamp: GENESIS_TIMESTAMP + height * beldex_types::constants::DIFFICULTY_TARGET,
            txs: block_txs,
        };
        log::debug!("memory daemon mined block {height} with {} txs", block.txs.len());
        chain.blocks.push(block.clone());
        block
    }

    /// Mine `count` blocks, each with a coinbase of `outputs_per_block`
    /// outputs to random keys (decoy population).
    pub fn mine_filler_blocks(&self, count: usize, outputs_per_block: usize) {
        for _ in 0..count {
            let outputs = (0..outputs_per_block)
                .map(|_| TxOutput { key: random_point(), clear_amount: None, encrypted_amount: [0u8; 8] })
                .collect();
            let coinbase = Transaction {
                version: 2,
                tx_type: TxType::Coinbase,
                outputs,
                extra: TxExtra { tx_pub_key: Some(random_point()), ..Default::default() },
                ..Default::default()
            };
            self.mine_block(vec![coinbase]);
        }
    }

    /// Drop the top `count` blocks, undoing their outputs, spends and records.
    /// Pool contents are discarded.
    pub fn pop_blocks(&self, count: usize) {
        let mut chain = self.lock();
        for _ in 0..count {
            // Never pop genesis.
            if chain.blocks.len() <= 1 {
                break;
            }
            let Some(block) = chain.blocks.pop() else { break };
            for entry in block.txs.iter().rev() {
                let keep = chain.outputs.len() - entry.tx.outputs.len();
                chain.outputs.truncate(keep);
                for ki in entry.tx.key_images() {
                    chain.spent.remove(ki);
                }
                chain.txs.remove(&entry.hash);
            }
            let height = block.height;
            chain.bns.retain(|_, r| r.register_height < height);
        }
        chain.pool.clear();
    }

    fn validate(chain: &Chain, tx: &Transaction) -> Result<(), String> {
        let mut seen = HashSet::new();
        for ki in tx.key_images() {
            if !seen.insert(*ki) {
                return Err("duplicate key image in transaction".into());
            }
            if chain.spent.contains_key(ki) || chain.pool.iter().any(|e| e.tx.key_images().any(|k| k == ki)) {
                return Err("double spend".into());
            }
        }
        if tx.signatures.len() != tx.inputs.len() {
            return Err("signature count mismatch".into());
        }
        let prefix_hash = tx.prefix_hash();
        for (input, sig) in tx.inputs.iter().zip(&tx.signatures) {
            let indices = relative_to_absolute(&input.key_offsets);
            let mut ring = Vec::with_capacity(indices.len());
            for idx in indices {
                let out = chain.outputs.get(idx as usize).ok_or("ring member out of range")?;
                ring.push(out.key);
            }
            if !lsag_verify(&prefix_hash, &ring, &input.key_image, sig) {
                return Err("invalid ring signature".into());
            }
        }
        Ok(())
    }

    fn is_unlocked(out: &OutputRecord, chain_height: u64) -> bool {
        let age = if out.coinbase { MINED_MONEY_UNLOCK_WINDOW } else { DEFAULT_TX_SPENDABLE_AGE };
        if out.height + age > chain_height {
            return false;
        }
        if out.unlock_time == 0 {
            return true;
        }
        if out.unlock_time < MAX_BLOCK_NUMBER {
            out.unlock_time <= chain_height
        } else {
            out.unlock_time <= GENESIS_TIMESTAMP + chain_height * beldex_types::constants::DIFFICULTY_TARGET
        }
    }
}

fn apply_bns(records: &mut HashMap<Hash, BnsRecordInfo>, tx_type: TxType, bns: &beldex_types::BnsExtra, txid: Hash, height: u64) {
    let lifetime = bns.years.and_then(MappingYears::from_years).map(|y| y.blocks());
    match tx_type {
        TxType::BnsBuy => {
            let expired = records
                .get(&bns.name_hash)
                .map(|r| r.expiration_height.is_some_and(|e| e <= height))
                .unwrap_or(true);
            if expired {
                records.insert(
                    bns.name_hash,
                    BnsRecordInfo {
                        name_hash: bns.name_hash,
                        owner: bns.owner.clone().unwrap_or_default(),
                        backup_owner: bns.backup_owner.clone(),
                        values: bns.values.clone(),
                        txid,
                        register_height: height,
                        update_height: height,
                        expiration_height: lifetime.map(|l| height + l),
                    },
                );
            }
        }
        TxType::BnsUpdate => {
            if let Some(record) = records.get_mut(&bns.name_hash) {
                if let Some(owner) = &bns.owner {
                    record.owner = owner.clone();
                }
                if bns.backup_owner.is_some() {
                    record.backup_owner = bns.backup_owner.clone();
                }
                if !bns.values.is_empty() {
                    record.values = bns.values.clone();
                }
                record.txid = txid;
                record.update_height = height;
            }
        }
        TxType::BnsRenew => {
            if let Some(record) = records.get_mut(&bns.name_hash) {
                let base = record.expiration_height.unwrap_or(height).max(height);
                record.expiration_height = lifetime.map(|l| base + l);
                record.txid = txid;
                record.update_height = height;
            }
        }
        _ => {}
    }
}

impl DaemonClient for MemoryDaemon {
    fn get_height(&self) -> Result<ChainHeight, RpcError> {
        self.check_online()?;
        Ok(ChainHeight { height: self.height(), target_height: 0 })
    }

    fn get_blocks(&self, start_height: u64, max_count: usize) -> Result<Vec<Block>, RpcError> {
        self.check_online()?;
        let chain = self.lock();
        Ok(chain.blocks.iter().skip(start_height as usize).take(max_count).cloned().collect())
    }

    fn get_hashes(&self, start_height: u64, max_count: usize) -> Result<Vec<BlockHash>, RpcError> {
        self.check_online()?;
        let chain = self.lock();
        Ok(chain.blocks.iter().skip(start_height as usize).take(max_count).map(Block::summary).collect())
    }

    fn submit_transaction(&self, blob: &str) -> Result<SubmitResult, RpcError> {
        self.check_online()?;
        if self.submit_quota.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_err() {
            return Err(RpcError::Unreachable("memory daemon stopped taking submissions".into()));
        }
        let tx = match Transaction::from_blob(blob) {
            Ok(tx) => tx,
            Err(e) => return Ok(SubmitResult::Rejected(e.to_string())),
        };
        let mut chain = self.lock();
        if let Err(reason) = Self::validate(&chain, &tx) {
            log::debug!("memory daemon rejected tx: {reason}");
            return Ok(SubmitResult::Rejected(reason));
        }
        let hash = tx.hash();
        chain.pool.push(TxEntry { hash, tx, output_indices: Vec::new(), block_height: None, in_pool: true });
        Ok(SubmitResult::Accepted)
    }

    fn get_transactions(&self, hashes: &[Hash]) -> Result<Vec<Option<TxEntry>>, RpcError> {
        self.check_online()?;
        let chain = self.lock();
        Ok(hashes
            .iter()
            .map(|h| chain.txs.get(h).cloned().or_else(|| chain.pool.iter().find(|e| &e.hash == h).cloned()))
            .collect())
    }

    fn get_output_distribution(&self) -> Result<OutputDistribution, RpcError> {
        self.check_online()?;
        let chain = self.lock();
        let mut total = 0u64;
        let cumulative = chain
            .blocks
            .iter()
            .map(|b| {
                total += b.txs.iter().map(|e| e.tx.outputs.len() as u64).sum::<u64>();
                total
            })
            .collect();
        Ok(OutputDistribution { start_height: 0, cumulative })
    }

    fn get_outputs(&self, indices: &[u64]) -> Result<Vec<OutputKey>, RpcError> {
        self.check_online()?;
        let chain = self.lock();
        let chain_height = chain.blocks.len() as u64;
        indices
            .iter()
            .map(|&idx| {
                let out = chain
                    .outputs
                    .get(idx as usize)
                    .ok_or_else(|| RpcError::Other(format!("output index {idx} out of range")))?;
                Ok(OutputKey {
                    global_index: idx,
                    key: out.key,
                    height: out.height,
                    unlocked: Self::is_unlocked(out, chain_height),
                })
            })
            .collect()
    }

    fn is_key_image_spent(&self, key_images: &[KeyImage]) -> Result<Vec<bool>, RpcError> {
        self.check_online()?;
        let chain = self.lock();
        Ok(key_images
            .iter()
            .map(|ki| chain.spent.contains_key(ki) || chain.pool.iter().any(|e| e.tx.key_images().any(|k| k == ki)))
            .collect())
    }

    fn lookup_bns(&self, name_hash: &Hash) -> Result<Option<BnsRecordInfo>, RpcError> {
        self.check_online()?;
        let chain = self.lock();
        let height = chain.blocks.len() as u64;
        Ok(chain
            .bns
            .get(name_hash)
            .filter(|r| r.expiration_height.map_or(true, |e| e > height))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beldex_crypto::{lsag_sign, KeyPair};
    use beldex_types::{absolute_to_relative, TxInput};

    #[test]
    fn test_genesis_and_filler() {
        let d = MemoryDaemon::new();
        assert_eq!(d.get_height().unwrap().height, 1);
        d.mine_filler_blocks(5, 3);
        assert_eq!(d.height(), 6);
        assert_eq!(d.output_count(), 15);
        let dist = d.get_output_distribution().unwrap();
        assert_eq!(dist.cumulative.len(), 6);
        assert_eq!(dist.total_outputs(), 15);
    }

    #[test]
    fn test_hash_chain_links() {
        let d = MemoryDaemon::new();
        d.mine_filler_blocks(3, 1);
        let hashes = d.get_hashes(0, 10).unwrap();
        for pair in hashes.windows(2) {
            assert_eq!(pair[1].prev_hash, pair[0].hash);
        }
    }

    #[test]
    fn test_pop_and_remine_changes_hash() {
        let d = MemoryDaemon::new();
        d.mine_filler_blocks(3, 2);
        let old = d.get_hashes(3, 1).unwrap()[0];
        d.pop_blocks(1);
        assert_eq!(d.height(), 3);
        assert_eq!(d.output_count(), 4);
        d.mine_filler_blocks(1, 2);
        let new = d.get_hashes(3, 1).unwrap()[0];
        assert_eq!(new.prev_hash, old.prev_hash);
        assert_ne!(new.hash, old.hash);
    }

    #[test]
    fn test_offline_is_unreachable() {
        let d = MemoryDaemon::new();
        d.set_offline(true);
        assert!(matches!(d.get_height(), Err(RpcError::Unreachable(_))));
        d.set_offline(false);
        assert!(d.get_height().is_ok());
    }

    #[test]
    fn test_submit_checks_signature_and_double_spend() {
        let d = MemoryDaemon::new();
        let owner = KeyPair::generate();
        let funding = Transaction {
            version: 2,
            tx_type: TxType::Coinbase,
            outputs: vec![TxOutput { key: owner.public, clear_amount: Some(10), encrypted_amount: [0; 8] }],
            ..Default::default()
        };
        d.mine_block(vec![funding]);
        d.mine_filler_blocks(2, 2);

        let ring_indices = vec![0u64, 1, 2];
        let ring: Vec<[u8; 32]> = d.get_outputs(&ring_indices).unwrap().iter().map(|o| o.key).collect();
        let key_image = beldex_crypto::generate_key_image(&owner.public, &owner.secret);
        let mut tx = Transaction {
            version: 2,
            inputs: vec![TxInput { key_image, key_offsets: absolute_to_relative(&ring_indices).unwrap() }],
            ..Default::default()
        };
        let sig = lsag_sign(&tx.prefix_hash(), &ring, 0, &owner.secret).unwrap();
        tx.signatures.push(sig);

        let mut forged = tx.clone();
        forged.fee = 99;
        assert!(matches!(d.submit_transaction(&forged.to_blob()).unwrap(), SubmitResult::Rejected(_)));

        assert_eq!(d.submit_transaction(&tx.to_blob()).unwrap(), SubmitResult::Accepted);
        assert_eq!(d.is_key_image_spent(&[key_image]).unwrap(), vec![true]);
        assert!(matches!(d.submit_transaction(&tx.to_blob()).unwrap(), SubmitResult::Rejected(r) if r == "double spend"));

        d.mine_block(Vec::new());
        assert_eq!(d.pool_size(), 0);
        let found = d.get_transactions(&[tx.hash()]).unwrap();
        assert_eq!(found[0].as_ref().and_then(|e| e.block_height), Some(4));
    }

    #[test]
    fn test_coinbase_unlock_window() {
        let d = MemoryDaemon::new();
        d.mine_filler_blocks(1, 1);
        assert!(!d.get_outputs(&[0]).unwrap()[0].unlocked);
        d.mine_filler_blocks(MINED_MONEY_UNLOCK_WINDOW as usize, 0);
        assert!(d.get_outputs(&[0]).unwrap()[0].unlocked);
    }
}
