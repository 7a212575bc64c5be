//! Main Wallet struct.
//!
//! Ties together the state guard, the synchronizer and the transaction,
//! multisig, proof and key image operations into a single high-level API.
//! Every call goes through the guard; none holds it across a daemon call.

use crate::config::WalletConfig;
use crate::core::WalletCore;
use crate::error::WalletError;
use crate::key_images::{self, ColdSigner, KeyImageImport};
use crate::keys::{SubaddressIndex, WalletKeys, WalletType};
use crate::keystore::Keystore;
use crate::listener::WalletListener;
use crate::multisig::{self, MultisigStatus};
use crate::progress::SyncState;
use crate::proofs::{self, ReserveProofCheck, TxKeyCheck, TxProofCheck};
use crate::state::{ConnectionStatus, StakeRecord, TransferRecord, WalletState};
use crate::sync::Synchronizer;
use crate::transfer::{self, PendingTransaction};
use beldex_crypto::{keccak256, scalar_from_hex, schnorr_sign, schnorr_verify};
use beldex_rpc::DaemonClient;
use beldex_tx::bns::BnsValues;
use beldex_types::{Address, Network, PublicKey, Signature};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const MESSAGE_SIGNATURE_PREFIX: &str = "SigV1";

/// High-level wallet.
pub struct Wallet {
    core: Arc<WalletCore>,
    sync: Synchronizer,
}

fn bad_key(what: &str) -> impl FnOnce(beldex_crypto::CryptoError) -> WalletError + '_ {
    move |e| WalletError::Keystore(format!("invalid {what}: {e}"))
}

impl Wallet {
    fn with_state(config: WalletConfig, daemon: Arc<dyn DaemonClient>, state: WalletState) -> Self {
        let core = Arc::new(WalletCore::new(config, daemon, state));
        let sync = Synchronizer::new(core.clone());
        Self { core, sync }
    }

    fn with_keys(config: WalletConfig, daemon: Arc<dyn DaemonClient>, keys: WalletKeys) -> Result<Self, WalletError> {
        let state = WalletState::new(keys, config.subaddress_lookahead, config.refresh_from_height)?;
        Ok(Self::with_state(config, daemon, state))
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────

    /// New wallet with fresh keys.
    pub fn create(config: WalletConfig, daemon: Arc<dyn DaemonClient>) -> Result<Self, WalletError> {
        let keys = WalletKeys::generate(config.network);
        log::info!("created wallet {}", keys.primary_address().encode());
        Self::with_keys(config, daemon, keys)
    }

    /// Restore from a spend secret (hex). The first sync pulls full blocks.
    pub fn recover(config: WalletConfig, daemon: Arc<dyn DaemonClient>, spend_secret: &str) -> Result<Self, WalletError> {
        let secret = scalar_from_hex(spend_secret).map_err(bad_key("spend secret"))?;
        let wallet = Self::with_keys(config.clone(), daemon, WalletKeys::from_spend_secret(secret, config.network))?;
        wallet.set_recovering_from_seed(true);
        Ok(wallet)
    }

    /// Watch-only wallet from the view secret and spend public key (hex).
    pub fn from_view_key(
        config: WalletConfig,
        daemon: Arc<dyn DaemonClient>,
        view_secret: &str,
        spend_public: &str,
    ) -> Result<Self, WalletError> {
        let view = scalar_from_hex(view_secret).map_err(bad_key("view secret"))?;
        let spend: PublicKey = hex::decode(spend_public.trim())
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| WalletError::Keystore("invalid spend public key".into()))?;
        let keys = WalletKeys::view_only(view, spend, config.network)?;
        let wallet = Self::with_keys(config, daemon, keys)?;
        wallet.set_recovering_from_seed(true);
        Ok(wallet)
    }

    pub fn open(
        config: WalletConfig,
        daemon: Arc<dyn DaemonClient>,
        keystore: &dyn Keystore,
        path: &Path,
        password: &str,
    ) -> Result<Self, WalletError> {
        let state = keystore.load(path, password)?;
        if state.keys.network != config.network {
            return Err(WalletError::Config(format!(
                "wallet is for {:?}, config is for {:?}",
                state.keys.network, config.network
            )));
        }
        Ok(Self::with_state(config, daemon, state))
    }

    /// Persist a consistent snapshot: never the middle of a sync step.
    pub fn store(&self, keystore: &dyn Keystore, path: &Path, password: &str) -> Result<(), WalletError> {
        let handle = self.core.acquire();
        let state = handle.state();
        keystore.save(path, password, &state)
    }

    /// Stop the sync loop and drop the wallet.
    pub fn close(self) -> Result<(), WalletError> {
        self.sync.stop()?;
        log::info!("wallet closed");
        Ok(())
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn WalletListener>>) {
        self.core.set_listener(listener);
    }

    // ─── Keys and addresses ─────────────────────────────────────────────────

    pub fn wallet_type(&self) -> WalletType {
        self.core.acquire().state().keys.wallet_type
    }

    pub fn network(&self) -> Network {
        self.core.acquire().state().keys.network
    }

    pub fn watch_only(&self) -> bool {
        self.core.acquire().state().keys.is_watch_only()
    }

    pub fn primary_address(&self) -> String {
        self.core.acquire().state().keys.primary_address().encode()
    }

    pub fn view_secret_key_hex(&self) -> String {
        hex::encode(self.core.acquire().state().keys.view_secret.to_bytes())
    }

    pub fn spend_public_key_hex(&self) -> String {
        hex::encode(self.core.acquire().state().keys.spend_public)
    }

    /// `None` for watch-only and multisig wallets.
    pub fn spend_secret_key_hex(&self) -> Option<String> {
        let handle = self.core.acquire();
        let secret = handle.state().keys.spend_secret("export the spend key").ok().map(|s| hex::encode(s.to_bytes()));
        secret
    }

    pub fn address(&self, account: u32, index: u32) -> Result<String, WalletError> {
        let handle = self.core.acquire();
        let address = handle.state().keys.subaddress(SubaddressIndex::new(account, index))?.encode();
        Ok(address)
    }

    pub fn add_subaddress_account(&self, label: &str) -> Result<u32, WalletError> {
        let handle = self.core.acquire();
        let index = handle.state_mut().add_account(label)?;
        Ok(index)
    }

    pub fn add_subaddress(&self, account: u32, label: &str) -> Result<u32, WalletError> {
        let handle = self.core.acquire();
        let index = handle.state_mut().add_subaddress(account, label)?;
        Ok(index)
    }

    pub fn num_subaddress_accounts(&self) -> u32 {
        self.core.acquire().state().num_accounts()
    }

    pub fn num_subaddresses(&self, account: u32) -> u32 {
        self.core.acquire().state().num_subaddresses(account)
    }

    pub fn set_subaddress_lookahead(&self, major: u32, minor: u32) -> Result<(), WalletError> {
        let handle = self.core.acquire();
        let result = handle.state_mut().set_lookahead(major, minor);
        result
    }

    // ─── Balance and status ─────────────────────────────────────────────────

    pub fn balance(&self, account: u32) -> u64 {
        self.core.acquire().state().balance(Some(account))
    }

    pub fn unlocked_balance(&self, account: u32) -> u64 {
        self.core.acquire().state().unlocked_balance(Some(account))
    }

    pub fn balance_all(&self) -> u64 {
        self.core.acquire().state().balance(None)
    }

    pub fn unlocked_balance_all(&self) -> u64 {
        self.core.acquire().state().unlocked_balance(None)
    }

    /// Blocks processed so far (the sync cursor).
    pub fn blockchain_height(&self) -> u64 {
        self.core.acquire().state().cursor
    }

    pub fn daemon_blockchain_height(&self) -> Result<u64, WalletError> {
        self.core.daemon_height_for_query()
    }

    pub fn daemon_target_height(&self) -> Result<u64, WalletError> {
        let heights = self.core.daemon_heights(self.core.config.daemon_height_max_age())?;
        Ok(heights.target.max(heights.height))
    }

    pub fn synchronized(&self) -> bool {
        self.core.progress.synchronized.load(Ordering::SeqCst)
    }

    pub fn connected(&self) -> ConnectionStatus {
        self.core.acquire().state().connection
    }

    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.core.acquire().state().transfers.clone()
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync.state()
    }

    // ─── Refresh control ────────────────────────────────────────────────────

    /// Enable auto-refresh and make sure the sync loop runs.
    pub fn start_refresh(&self) -> Result<(), WalletError> {
        self.core.progress.enabled.store(true, Ordering::SeqCst);
        self.sync.start()
    }

    /// Keep the loop alive but stop stepping on its own.
    pub fn pause_refresh(&self) {
        self.core.progress.enabled.store(false, Ordering::SeqCst);
    }

    pub fn stop_refresh(&self) -> Result<(), WalletError> {
        self.sync.stop()
    }

    pub fn refresh(&self) -> Result<(), WalletError> {
        self.sync.refresh()
    }

    pub fn refresh_async(&self) -> Result<(), WalletError> {
        self.sync.refresh_async()
    }

    pub fn is_refreshing(&self, max_wait: Duration) -> bool {
        self.sync.is_refreshing(max_wait)
    }

    pub fn set_auto_refresh_interval(&self, millis: u64) {
        self.core.progress.interval_ms.store(millis, Ordering::SeqCst);
    }

    pub fn auto_refresh_interval(&self) -> Duration {
        self.core.progress.interval()
    }

    pub fn rescan_blockchain(&self) -> Result<(), WalletError> {
        self.sync.rescan()
    }

    pub fn rescan_blockchain_async(&self) -> Result<(), WalletError> {
        self.sync.rescan_async()
    }

    /// Clear every chain-derived record on the next sync step.
    pub fn rebuild_wallet_cache(&self) {
        self.sync.request_rescan(true);
    }

    pub fn set_refresh_from_block_height(&self, height: u64) {
        let handle = self.core.acquire();
        handle.state_mut().refresh_from_height = height;
    }

    pub fn refresh_from_block_height(&self) -> u64 {
        self.core.acquire().state().refresh_from_height
    }

    pub fn set_recovering_from_seed(&self, recovering: bool) {
        self.core.progress.recovering_from_seed.store(recovering, Ordering::SeqCst);
    }

    pub fn set_recovering_from_device(&self, recovering: bool) {
        self.core.progress.recovering_from_device.store(recovering, Ordering::SeqCst);
    }

    /// Ask the daemon again which known key images are spent.
    pub fn rescan_spent(&self) -> Result<usize, WalletError> {
        key_images::rescan_spent(&self.core)
    }

    // ─── Transactions ───────────────────────────────────────────────────────

    /// `amount: None` sweeps the account (or `indices`) to `destination`.
    pub fn create_transaction(
        &self,
        destination: &str,
        amount: Option<u64>,
        priority: u32,
        account: u32,
        indices: &[u32],
    ) -> Result<PendingTransaction, WalletError> {
        transfer::create_transaction(&self.core, destination, amount, priority, account, indices)
    }

    pub fn create_transaction_multi_dest(
        &self,
        destinations: &[(String, u64)],
        priority: u32,
        account: u32,
        indices: &[u32],
    ) -> Result<PendingTransaction, WalletError> {
        transfer::create_transaction_multi_dest(&self.core, destinations, priority, account, indices)
    }

    pub fn create_sweep_unmixable_transaction(&self, priority: u32) -> Result<PendingTransaction, WalletError> {
        transfer::create_sweep_unmixable_transaction(&self.core, priority)
    }

    pub fn stake_pending(&self, service_node_key: &str, amount: u64, priority: u32) -> Result<PendingTransaction, WalletError> {
        transfer::stake_pending(&self.core, service_node_key, amount, priority)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_bns_transaction(
        &self,
        name: &str,
        years: &str,
        owner: Option<&str>,
        backup_owner: Option<&str>,
        values: &BnsValues,
        priority: u32,
        account: u32,
    ) -> Result<PendingTransaction, WalletError> {
        transfer::create_bns_transaction(&self.core, name, years, owner, backup_owner, values, priority, account)
    }

    pub fn bns_update_transaction(
        &self,
        name: &str,
        owner: Option<&str>,
        backup_owner: Option<&str>,
        values: &BnsValues,
        priority: u32,
        account: u32,
    ) -> Result<PendingTransaction, WalletError> {
        transfer::bns_update_transaction(&self.core, name, owner, backup_owner, values, priority, account)
    }

    pub fn bns_renew_transaction(
        &self,
        name: &str,
        years: &str,
        priority: u32,
        account: u32,
    ) -> Result<PendingTransaction, WalletError> {
        transfer::bns_renew_transaction(&self.core, name, years, priority, account)
    }

    pub fn estimate_transaction_fee(&self, priority: u32, recipients: usize) -> Result<u64, WalletError> {
        transfer::estimate_transaction_fee(priority, recipients)
    }

    /// Submit every transaction of `pending` and record the spends.
    pub fn commit_transaction(&self, pending: &mut PendingTransaction) -> Result<(), WalletError> {
        transfer::commit_transaction(&self.core, pending)
    }

    /// Discard without submitting, releasing the reserved outputs.
    pub fn dispose_transaction(&self, pending: PendingTransaction) {
        transfer::dispose_transaction(pending)
    }

    // ─── Stakes ─────────────────────────────────────────────────────────────

    pub fn list_current_stakes(&self) -> Vec<StakeRecord> {
        transfer::list_current_stakes(&self.core)
    }

    pub fn can_request_stake_unlock(&self, service_node_key: &str) -> bool {
        transfer::can_request_stake_unlock(&self.core, service_node_key)
    }

    pub fn request_stake_unlock(&self, service_node_key: &str) -> Result<PendingTransaction, WalletError> {
        transfer::request_stake_unlock(&self.core, service_node_key)
    }

    // ─── Multisig ───────────────────────────────────────────────────────────

    pub fn multisig(&self) -> MultisigStatus {
        multisig::multisig_status(&self.core)
    }

    pub fn get_multisig_info(&self) -> Result<String, WalletError> {
        multisig::get_multisig_info(&self.core)
    }

    pub fn make_multisig(&self, infos: &[String], threshold: usize) -> Result<String, WalletError> {
        multisig::make_multisig(&self.core, infos, threshold)
    }

    pub fn exchange_multisig_keys(&self, infos: &[String]) -> Result<String, WalletError> {
        multisig::exchange_multisig_keys(&self.core, infos)
    }

    pub fn finalize_multisig(&self, infos: &[String]) -> Result<String, WalletError> {
        multisig::finalize_multisig(&self.core, infos)
    }

    pub fn export_multisig_images(&self) -> Result<String, WalletError> {
        multisig::export_multisig_images(&self.core)
    }

    pub fn import_multisig_images(&self, blobs: &[String]) -> Result<usize, WalletError> {
        multisig::import_multisig_images(&self.core, blobs)
    }

    pub fn has_multisig_partial_key_images(&self) -> bool {
        multisig::has_multisig_partial_key_images(&self.core)
    }

    pub fn export_multisig_sign_data(&self, pending: &PendingTransaction) -> Result<String, WalletError> {
        multisig::export_multisig_sign_data(pending)
    }

    pub fn restore_multisig_transaction(&self, sign_data: &str) -> Result<PendingTransaction, WalletError> {
        multisig::restore_multisig_transaction(&self.core, sign_data)
    }

    pub fn sign_multisig_transaction(&self, pending: &mut PendingTransaction) -> Result<(), WalletError> {
        multisig::sign_multisig_transaction(&self.core, pending)
    }

    // ─── Proofs ─────────────────────────────────────────────────────────────

    pub fn get_tx_key(&self, txid: &str) -> Result<String, WalletError> {
        proofs::get_tx_key(&self.core, txid)
    }

    pub fn check_tx_key(&self, txid: &str, tx_key: &str, address: &str) -> Result<TxKeyCheck, WalletError> {
        proofs::check_tx_key(&self.core, txid, tx_key, address)
    }

    pub fn get_tx_proof(&self, txid: &str, address: &str, message: &str) -> Result<String, WalletError> {
        proofs::get_tx_proof(&self.core, txid, address, message)
    }

    pub fn check_tx_proof(
        &self,
        txid: &str,
        address: &str,
        message: &str,
        signature: &str,
    ) -> Result<TxProofCheck, WalletError> {
        proofs::check_tx_proof(&self.core, txid, address, message, signature)
    }

    pub fn get_spend_proof(&self, txid: &str, message: &str) -> Result<String, WalletError> {
        proofs::get_spend_proof(&self.core, txid, message)
    }

    pub fn check_spend_proof(&self, txid: &str, message: &str, signature: &str) -> Result<bool, WalletError> {
        proofs::check_spend_proof(&self.core, txid, message, signature)
    }

    /// Proves funds held at the main address of `account` (account 0 when
    /// `None`); `amount: None` proves all of them.
    pub fn get_reserve_proof(&self, account: Option<u32>, amount: Option<u64>, message: &str) -> Result<String, WalletError> {
        proofs::get_reserve_proof(&self.core, account, amount, message)
    }

    pub fn check_reserve_proof(&self, address: &str, message: &str, signature: &str) -> Result<ReserveProofCheck, WalletError> {
        proofs::check_reserve_proof(&self.core, address, message, signature)
    }

    // ─── Key images and rings ───────────────────────────────────────────────

    pub fn export_key_images(&self, all: bool) -> Result<String, WalletError> {
        key_images::export_key_images(&self.core, all)
    }

    pub fn import_key_images(&self, blob: &str) -> Result<KeyImageImport, WalletError> {
        key_images::import_key_images(&self.core, blob)
    }

    pub fn export_outputs(&self, only_missing: bool) -> Result<String, WalletError> {
        key_images::export_outputs(&self.core, only_missing)
    }

    pub fn cold_key_image_sync(&self, signer: &dyn ColdSigner) -> Result<KeyImageImport, WalletError> {
        key_images::cold_key_image_sync(&self.core, signer)
    }

    pub fn blackball_outputs(&self, outputs: &[u64], add: bool) {
        key_images::blackball_outputs(&self.core, outputs, add)
    }

    pub fn unblackball_output(&self, output: u64) -> bool {
        key_images::unblackball_output(&self.core, output)
    }

    pub fn is_output_blackballed(&self, output: u64) -> bool {
        key_images::is_output_blackballed(&self.core, output)
    }

    pub fn get_ring(&self, key_image: &str, relative: bool) -> Result<Vec<u64>, WalletError> {
        key_images::get_ring(&self.core, key_image, relative)
    }

    pub fn set_ring(&self, key_image: &str, ring: &[u64], relative: bool) -> Result<(), WalletError> {
        key_images::set_ring(&self.core, key_image, ring, relative)
    }

    pub fn get_rings(&self, txid: &str) -> Result<Vec<(String, Vec<u64>)>, WalletError> {
        key_images::get_rings(&self.core, txid)
    }

    // ─── Message signing ────────────────────────────────────────────────────

    pub fn sign_message(&self, message: &str) -> Result<String, WalletError> {
        let handle = self.core.acquire();
        let state = handle.state();
        let secret = state.keys.spend_secret("sign a message")?;
        let sig = schnorr_sign(&keccak256(message.as_bytes()), &state.keys.spend_public, secret);
        Ok(format!("{MESSAGE_SIGNATURE_PREFIX}{}", hex::encode(sig.to_bytes())))
    }

    /// Check a [`Wallet::sign_message`] signature against `address`.
    pub fn verify_signed_message(&self, message: &str, address: &str, signature: &str) -> bool {
        let Ok(address) = Address::parse_for(address, self.network()) else {
            return false;
        };
        let Some(sig) = signature
            .trim()
            .strip_prefix(MESSAGE_SIGNATURE_PREFIX)
            .and_then(|body| hex::decode(body).ok())
            .and_then(|bytes| Signature::from_bytes(&bytes))
        else {
            return false;
        };
        schnorr_verify(&keccak256(message.as_bytes()), &address.spend_public_key, &sig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beldex_rpc::MemoryDaemon;

    fn config() -> WalletConfig {
        WalletConfig { network: Network::Testnet, ..Default::default() }
    }

    fn wallet() -> Wallet {
        Wallet::create(config(), Arc::new(MemoryDaemon::new())).unwrap()
    }

    #[test]
    fn test_recover_and_view_only_share_address() {
        let w = wallet();
        let spend = w.spend_secret_key_hex().unwrap();
        let recovered = Wallet::recover(config(), Arc::new(MemoryDaemon::new()), &spend).unwrap();
        assert_eq!(recovered.primary_address(), w.primary_address());

        let view = Wallet::from_view_key(
            config(),
            Arc::new(MemoryDaemon::new()),
            &w.view_secret_key_hex(),
            &w.spend_public_key_hex(),
        )
        .unwrap();
        assert_eq!(view.primary_address(), w.primary_address());
        assert!(view.watch_only());
        assert!(view.spend_secret_key_hex().is_none());
        assert!(Wallet::recover(config(), Arc::new(MemoryDaemon::new()), "zz").is_err());
    }

    #[test]
    fn test_subaddresses() {
        let w = wallet();
        assert_eq!(w.num_subaddress_accounts(), 1);
        let account = w.add_subaddress_account("savings").unwrap();
        assert_eq!(account, 1);
        let index = w.add_subaddress(account, "rent").unwrap();
        assert_eq!(w.num_subaddresses(account), index + 1);
        assert_ne!(w.address(account, index).unwrap(), w.primary_address());
        assert_eq!(w.address(0, 0).unwrap(), w.primary_address());
    }

    #[test]
    fn test_message_signatures() {
        let w = wallet();
        let sig = w.sign_message("hello").unwrap();
        assert!(w.verify_signed_message("hello", &w.primary_address(), &sig));
        assert!(!w.verify_signed_message("hellO", &w.primary_address(), &sig));
        assert!(!w.verify_signed_message("hello", &wallet().primary_address(), &sig));
        assert!(!w.verify_signed_message("hello", &w.primary_address(), "SigV1zz"));
    }

    #[test]
    fn test_refresh_flags() {
        let w = wallet();
        w.set_auto_refresh_interval(250);
        assert_eq!(w.auto_refresh_interval(), Duration::from_millis(250));
        w.set_refresh_from_block_height(12);
        assert_eq!(w.refresh_from_block_height(), 12);
        w.refresh().unwrap();
        assert!(w.synchronized());
        assert_eq!(w.sync_state(), SyncState::Stopped);
        w.close().unwrap();
    }
}
