//! Wallet state.
//!
//! Everything the engine knows about the wallet: keys, the subaddress tree,
//! owned outputs and their key images, history, the sync cursor and the
//! per-output bookkeeping (rings, blackballs, tx keys, stakes). Only ever
//! reached through the [`StateGuard`](crate::guard::StateGuard).
//!
//! Index maps are derived data: they are skipped when serializing and
//! rebuilt by [`WalletState::rebuild_indices`] after load.

use crate::error::WalletError;
use crate::keys::{SubaddressIndex, WalletKeys};
use beldex_crypto::Scalar;
use beldex_multisig::{KexSession, PartialKeyImage};
use beldex_types::constants::{DEFAULT_TX_SPENDABLE_AGE, MAX_BLOCK_NUMBER, MINED_MONEY_UNLOCK_WINDOW};
use beldex_types::{Hash, KeyImage, PublicKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

// ─── Records ────────────────────────────────────────────────────────────────

/// An output received by the wallet. Never deleted by spending, only marked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedOutput {
    pub tx_hash: Hash,
    /// Position within the transaction.
    pub output_index: u64,
    pub global_index: u64,
    pub public_key: PublicKey,
    /// Transaction public key the output was derived from (main or additional).
    pub tx_pub_key: PublicKey,
    /// `8 * a * R` for that key.
    pub derivation: [u8; 32],
    pub amount: u64,
    pub subaddress: SubaddressIndex,
    pub height: u64,
    pub unlock_time: u64,
    pub coinbase: bool,
    /// Pre-RingCT output; only spendable with ring size 1.
    pub unmixable: bool,
    pub key_image: Option<KeyImage>,
    pub spent: bool,
    /// Height the spend was mined at; `None` for local or pool spends.
    pub spent_height: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    In,
    Out,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub tx_hash: Hash,
    pub direction: TransferDirection,
    pub amount: u64,
    pub fee: u64,
    /// `None` while in the pool.
    pub height: Option<u64>,
    pub account: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeRecord {
    pub tx_hash: Hash,
    pub service_node_key: PublicKey,
    /// One-time key of the locked output.
    pub output_key: PublicKey,
    pub amount: u64,
    pub unlock_requested: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubaddressEntry {
    pub address: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubaddressAccount {
    pub label: String,
    pub addresses: Vec<SubaddressEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected,
    /// Daemon calls are failing and being retried.
    Degraded,
}

/// Key exchange in progress or finished, plus signing material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultisigState {
    pub session: KexSession,
    /// Partial key images received from co-signers.
    #[serde(default)]
    pub partial_images: Vec<PartialKeyImage>,
    /// Nonce secrets of signing sets we committed to, by prefix hash (hex).
    #[serde(default)]
    pub nonces: BTreeMap<String, Vec<Scalar>>,
}

// ─── WalletState ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletState {
    pub keys: WalletKeys,
    pub accounts: Vec<SubaddressAccount>,
    /// Extra (accounts, addresses) scanned beyond the tree.
    pub lookahead: (u32, u32),
    pub outputs: Vec<OwnedOutput>,
    pub transfers: Vec<TransferRecord>,
    pub block_hashes: BTreeMap<u64, Hash>,
    /// Next height to scan (= number of blocks processed).
    pub cursor: u64,
    pub last_block_timestamp: u64,
    pub refresh_from_height: u64,
    pub connection: ConnectionStatus,
    /// Transaction secret keys (hex) by txid (hex).
    pub tx_keys: BTreeMap<String, String>,
    /// Global output indices never used as decoys.
    pub blackballed: BTreeSet<u64>,
    /// Absolute ring indices by key image (hex).
    pub rings: BTreeMap<String, Vec<u64>>,
    pub stakes: Vec<StakeRecord>,
    pub multisig: Option<MultisigState>,

    #[serde(skip)]
    subaddress_lookup: HashMap<PublicKey, SubaddressIndex>,
    #[serde(skip)]
    by_key_image: HashMap<KeyImage, usize>,
    #[serde(skip)]
    by_public_key: HashMap<PublicKey, usize>,
    /// Output key -> pending transaction holding it.
    #[serde(skip)]
    reserved: HashMap<PublicKey, u64>,
}

impl WalletState {
    pub fn new(keys: WalletKeys, lookahead: (u32, u32), refresh_from_height: u64) -> Result<Self, WalletError> {
        let mut state = Self {
            keys,
            accounts: Vec::new(),
            lookahead,
            outputs: Vec::new(),
            transfers: Vec::new(),
            block_hashes: BTreeMap::new(),
            cursor: 0,
            last_block_timestamp: 0,
            refresh_from_height,
            connection: ConnectionStatus::Disconnected,
            tx_keys: BTreeMap::new(),
            blackballed: BTreeSet::new(),
            rings: BTreeMap::new(),
            stakes: Vec::new(),
            multisig: None,
            subaddress_lookup: HashMap::new(),
            by_key_image: HashMap::new(),
            by_public_key: HashMap::new(),
            reserved: HashMap::new(),
        };
        state.add_account("Primary account")?;
        Ok(state)
    }

    /// Rebuild the derived lookup maps (after load or a bulk change).
    pub fn rebuild_indices(&mut self) -> Result<(), WalletError> {
        self.by_key_image.clear();
        self.by_public_key.clear();
        for (i, out) in self.outputs.iter().enumerate() {
            self.by_public_key.insert(out.public_key, i);
            if let Some(ki) = out.key_image {
                self.by_key_image.insert(ki, i);
            }
        }
        self.refresh_subaddress_lookup()
    }

    // ─── Subaddresses ───────────────────────────────────────────────────────

    fn refresh_subaddress_lookup(&mut self) -> Result<(), WalletError> {
        let (extra_accounts, extra_minor) = self.lookahead;
        let total_accounts = self.accounts.len() as u32 + extra_accounts;
        for major in 0..total_accounts {
            let known = self.accounts.get(major as usize).map_or(1, |a| a.addresses.len() as u32);
            for minor in 0..known + extra_minor {
                let index = SubaddressIndex::new(major, minor);
                let spend = self.keys.subaddress_spend_key(index)?;
                self.subaddress_lookup.entry(spend).or_insert(index);
            }
        }
        Ok(())
    }

    pub fn subaddress_for_spend_key(&self, spend: &PublicKey) -> Option<SubaddressIndex> {
        self.subaddress_lookup.get(spend).copied()
    }

    pub fn set_lookahead(&mut self, major: u32, minor: u32) -> Result<(), WalletError> {
        self.lookahead = (major, minor);
        self.refresh_subaddress_lookup()
    }

    pub fn add_account(&mut self, label: &str) -> Result<u32, WalletError> {
        let major = self.accounts.len() as u32;
        let address = self.keys.subaddress(SubaddressIndex::new(major, 0))?.encode();
        self.accounts.push(SubaddressAccount {
            label: label.to_string(),
            addresses: vec![SubaddressEntry { address, label: label.to_string() }],
        });
        self.refresh_subaddress_lookup()?;
        Ok(major)
    }

    pub fn add_subaddress(&mut self, account: u32, label: &str) -> Result<u32, WalletError> {
        let keys = &self.keys;
        let entry = self
            .accounts
            .get_mut(account as usize)
            .ok_or_else(|| WalletError::InvalidDestination(format!("no account {account}")))?;
        let minor = entry.addresses.len() as u32;
        let address = keys.subaddress(SubaddressIndex::new(account, minor))?.encode();
        entry.addresses.push(SubaddressEntry { address, label: label.to_string() });
        self.refresh_subaddress_lookup()?;
        Ok(minor)
    }

    /// Grow the tree so `index` exists (an output arrived there).
    pub fn expand_to(&mut self, index: SubaddressIndex) -> Result<(), WalletError> {
        while self.accounts.len() as u32 <= index.major {
            let n = self.accounts.len();
            self.add_account(&format!("Account #{n}"))?;
        }
        while self.num_subaddresses(index.major) <= index.minor {
            self.add_subaddress(index.major, "")?;
        }
        Ok(())
    }

    pub fn num_accounts(&self) -> u32 {
        self.accounts.len() as u32
    }

    pub fn num_subaddresses(&self, account: u32) -> u32 {
        self.accounts.get(account as usize).map_or(0, |a| a.addresses.len() as u32)
    }

    // ─── Outputs ────────────────────────────────────────────────────────────

    pub fn output_by_key(&self, key: &PublicKey) -> Option<&OwnedOutput> {
        self.by_public_key.get(key).map(|&i| &self.outputs[i])
    }

    pub fn output_by_key_image(&self, key_image: &KeyImage) -> Option<&OwnedOutput> {
        self.by_key_image.get(key_image).map(|&i| &self.outputs[i])
    }

    /// Record a new output. Returns `false` if it is already known.
    pub fn add_output(&mut self, output: OwnedOutput) -> bool {
        if self.by_public_key.contains_key(&output.public_key) {
            return false;
        }
        let i = self.outputs.len();
        self.by_public_key.insert(output.public_key, i);
        if let Some(ki) = output.key_image {
            self.by_key_image.insert(ki, i);
        }
        self.outputs.push(output);
        true
    }

    /// Attach a key image learned after the output was scanned.
    pub fn set_key_image(&mut self, output_key: &PublicKey, key_image: KeyImage) -> bool {
        let Some(&i) = self.by_public_key.get(output_key) else {
            return false;
        };
        if self.outputs[i].key_image == Some(key_image) {
            return false;
        }
        if let Some(old) = self.outputs[i].key_image.replace(key_image) {
            self.by_key_image.remove(&old);
        }
        self.by_key_image.insert(key_image, i);
        true
    }

    /// Mark the output with `key_image` spent; returns its amount.
    pub fn mark_spent(&mut self, key_image: &KeyImage, height: Option<u64>) -> Option<u64> {
        let &i = self.by_key_image.get(key_image)?;
        let out = &mut self.outputs[i];
        if out.spent && (out.spent_height.is_some() || height.is_none()) {
            return None;
        }
        let newly = !out.spent;
        out.spent = true;
        out.spent_height = height;
        newly.then_some(out.amount)
    }

    pub fn mark_unspent(&mut self, key_image: &KeyImage) {
        if let Some(&i) = self.by_key_image.get(key_image) {
            self.outputs[i].spent = false;
            self.outputs[i].spent_height = None;
        }
    }

    pub fn is_unlocked(&self, out: &OwnedOutput) -> bool {
        let age = if out.coinbase { MINED_MONEY_UNLOCK_WINDOW } else { DEFAULT_TX_SPENDABLE_AGE };
        if out.height + age > self.cursor {
            return false;
        }
        match out.unlock_time {
            0 => true,
            t if t < MAX_BLOCK_NUMBER => t <= self.cursor,
            t => t <= self.last_block_timestamp,
        }
    }

    fn in_account(out: &OwnedOutput, account: Option<u32>) -> bool {
        account.map_or(true, |a| out.subaddress.major == a)
    }

    pub fn balance(&self, account: Option<u32>) -> u64 {
        self.outputs.iter().filter(|o| !o.spent && Self::in_account(o, account)).map(|o| o.amount).sum()
    }

    pub fn unlocked_balance(&self, account: Option<u32>) -> u64 {
        self.outputs
            .iter()
            .filter(|o| !o.spent && Self::in_account(o, account) && self.is_unlocked(o))
            .map(|o| o.amount)
            .sum()
    }

    // ─── Reservations ───────────────────────────────────────────────────────

    pub fn is_reserved(&self, key: &PublicKey) -> bool {
        self.reserved.contains_key(key)
    }

    pub fn reserve(&mut self, keys: &[PublicKey], pending_id: u64) {
        for key in keys {
            self.reserved.insert(*key, pending_id);
        }
    }

    pub fn release(&mut self, pending_id: u64) -> usize {
        let before = self.reserved.len();
        self.reserved.retain(|_, id| *id != pending_id);
        before - self.reserved.len()
    }

    pub fn reserved_count(&self) -> usize {
        self.reserved.len()
    }

    // ─── History ────────────────────────────────────────────────────────────

    pub fn record_transfer(&mut self, record: TransferRecord) {
        match self
            .transfers
            .iter_mut()
            .find(|t| t.tx_hash == record.tx_hash && t.direction == record.direction)
        {
            Some(existing) => {
                if record.height.is_some() {
                    existing.height = record.height;
                }
            }
            None => self.transfers.push(record),
        }
    }

    // ─── Rollback and rescan ────────────────────────────────────────────────

    /// Undo everything observed at or above `fork_height`.
    pub fn rollback(&mut self, fork_height: u64) -> Result<(), WalletError> {
        self.outputs.retain(|o| o.height < fork_height);
        for out in &mut self.outputs {
            if out.spent_height.is_some_and(|h| h >= fork_height) {
                out.spent = false;
                out.spent_height = None;
            }
        }
        self.transfers.retain(|t| !(t.direction == TransferDirection::In && t.height.is_some_and(|h| h >= fork_height)));
        for t in &mut self.transfers {
            if t.height.is_some_and(|h| h >= fork_height) {
                t.height = None;
            }
        }
        self.block_hashes.split_off(&fork_height);
        self.cursor = self.cursor.min(fork_height);
        self.rebuild_indices()
    }

    /// Forget chain-derived data and restart scanning at the restore height.
    /// A cache rebuild also drops recorded rings. Reservations are left alone:
    /// they belong to live pending transactions, and the outputs they name
    /// come back under the same keys.
    pub fn reset_for_rescan(&mut self, rebuild_cache: bool) -> Result<(), WalletError> {
        self.outputs.clear();
        self.transfers.clear();
        self.block_hashes.clear();
        self.cursor = 0;
        self.last_block_timestamp = 0;
        if rebuild_cache {
            self.rings.clear();
        }
        self.rebuild_indices()
    }

    /// Switch to new spend authority (multisig finalize). The subaddress tree
    /// and everything scanned under the old keys is discarded.
    pub fn replace_keys(&mut self, keys: WalletKeys) -> Result<(), WalletError> {
        self.keys = keys;
        self.accounts.clear();
        self.subaddress_lookup.clear();
        self.stakes.clear();
        self.tx_keys.clear();
        self.reset_for_rescan(true)?;
        self.add_account("Primary account")?;
        Ok(())
    }

    /// Key images of unspent outputs, paired with the output key.
    pub fn unspent_key_images(&self) -> Vec<(PublicKey, KeyImage)> {
        self.outputs.iter().filter(|o| !o.spent).filter_map(|o| o.key_image.map(|ki| (o.public_key, ki))).collect()
    }
}
