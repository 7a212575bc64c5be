#![allow(dead_code)]

use beldex_rpc::MemoryDaemon;
use beldex_tx::miner_transaction;
use beldex_types::{Address, Network};
use beldex_wallet::{Wallet, WalletConfig};
use std::sync::Arc;

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn config() -> WalletConfig {
    WalletConfig { network: Network::Testnet, ..Default::default() }
}

pub fn wallet(daemon: &Arc<MemoryDaemon>) -> Wallet {
    Wallet::create(config(), daemon.clone()).unwrap()
}

pub fn address(address: &str) -> Address {
    Address::parse(address).unwrap()
}

/// Pay `amounts` to `to` in one coinbase, then mine filler blocks (two
/// decoy outputs each) until the chain is `height` blocks tall.
pub fn fund(daemon: &MemoryDaemon, to: &str, amounts: &[u64], height: u64) {
    daemon.mine_block(vec![miner_transaction(&address(to), amounts, false).unwrap()]);
    let filler = height.saturating_sub(daemon.height());
    daemon.mine_filler_blocks(filler as usize, 2);
}

/// Mine the pool, then enough blocks for new outputs to unlock.
pub fn confirm(daemon: &MemoryDaemon) {
    daemon.mine_block(Vec::new());
    daemon.mine_filler_blocks(10, 2);
}

/// Flip one hex digit near the end of a proof string.
pub fn mutate(signature: &str) -> String {
    let mut bytes = signature.as_bytes().to_vec();
    let i = bytes.len() - 3;
    bytes[i] = if bytes[i] == b'0' { b'1' } else { b'0' };
    String::from_utf8(bytes).unwrap()
}
