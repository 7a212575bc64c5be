//! Output scanning.
//!
//! Applies blocks to the wallet state: detects owned outputs (main and
//! per-output transaction keys, every known subaddress), decodes amounts,
//! computes key images where the keys allow it and marks spends by key
//! image. Applying a block twice changes nothing.

use crate::error::WalletError;
use crate::listener::WalletEvent;
use crate::multisig::combined_key_image;
use crate::state::{OwnedOutput, TransferDirection, TransferRecord, WalletState};
use beldex_crypto::keys::derive_subaddress_public_key;
use beldex_crypto::{decrypt_amount, generate_key_derivation};
use beldex_types::{Block, Hash, PublicKey, Transaction, TxType};

/// Owned outputs of one transaction. Outputs without a global index
/// (pool transactions) are skipped.
pub fn scan_transaction(
    state: &WalletState,
    tx: &Transaction,
    tx_hash: &Hash,
    output_indices: &[u64],
    height: u64,
) -> Vec<OwnedOutput> {
    let view = &state.keys.view_secret;
    let derive = |r: &PublicKey| generate_key_derivation(r, view).ok().map(|d| (*r, d));
    let main = tx.extra.tx_pub_key.as_ref().and_then(derive);
    let additional: Vec<Option<(PublicKey, [u8; 32])>> = tx.extra.additional_pub_keys.iter().map(derive).collect();

    let mut found = Vec::new();
    for (i, out) in tx.outputs.iter().enumerate() {
        let Some(&global_index) = output_indices.get(i) else {
            continue;
        };
        let index = i as u64;
        let candidates = main.iter().chain(additional.get(i).and_then(|a| a.as_ref()));
        for (tx_pub_key, derivation) in candidates {
            let Ok(spend) = derive_subaddress_public_key(&out.key, derivation, index) else {
                continue;
            };
            let Some(subaddress) = state.subaddress_for_spend_key(&spend) else {
                continue;
            };
            let amount = out.clear_amount.unwrap_or_else(|| decrypt_amount(&out.encrypted_amount, derivation, index));
            let key_image = if state.keys.is_multisig() {
                let base = state.keys.output_base_secret(derivation, index, subaddress);
                combined_key_image(state, &out.key, &base)
            } else {
                state.keys.key_image(&out.key, derivation, index, subaddress)
            };
            found.push(OwnedOutput {
                tx_hash: *tx_hash,
                output_index: index,
                global_index,
                public_key: out.key,
                tx_pub_key: *tx_pub_key,
                derivation: *derivation,
                amount,
                subaddress,
                height,
                unlock_time: tx.unlock_time,
                coinbase: tx.tx_type == TxType::Coinbase,
                unmixable: out.clear_amount.is_some(),
                key_image,
                spent: false,
                spent_height: None,
            });
            break;
        }
    }
    found
}

/// Apply one block and advance the cursor past it.
pub fn apply_block(state: &mut WalletState, block: &Block, events: &mut Vec<WalletEvent>) -> Result<(), WalletError> {
    for entry in &block.txs {
        let tx = &entry.tx;
        let txid = hex::encode(entry.hash);

        let mut ours_in = 0u64;
        let mut newly_spent = 0u64;
        for ki in tx.key_images() {
            let Some(out) = state.output_by_key_image(ki) else {
                continue;
            };
            ours_in += out.amount;
            if let Some(amount) = state.mark_spent(ki, Some(block.height)) {
                newly_spent += amount;
            }
        }

        let mut received = 0u64;
        let mut account = 0u32;
        for out in scan_transaction(state, tx, &entry.hash, &entry.output_indices, block.height) {
            let (amount, subaddress) = (out.amount, out.subaddress);
            if state.add_output(out) {
                state.expand_to(subaddress)?;
                received += amount;
                account = subaddress.major;
            }
        }

        if ours_in > 0 {
            state.record_transfer(TransferRecord {
                tx_hash: entry.hash,
                direction: TransferDirection::Out,
                amount: ours_in.saturating_sub(received).saturating_sub(tx.fee),
                fee: tx.fee,
                height: Some(block.height),
                account,
            });
        } else if received > 0 {
            state.record_transfer(TransferRecord {
                tx_hash: entry.hash,
                direction: TransferDirection::In,
                amount: received,
                fee: 0,
                height: Some(block.height),
                account,
            });
        }

        if newly_spent > 0 {
            log::debug!("spent {newly_spent} in {txid} at height {}", block.height);
            events.push(WalletEvent::MoneySpent { txid: txid.clone(), amount: newly_spent });
        }
        if received > 0 {
            log::debug!("received {received} in {txid} at height {}", block.height);
            events.push(WalletEvent::MoneyReceived { txid, amount: received });
        }
    }

    state.block_hashes.insert(block.height, block.hash);
    state.cursor = block.height + 1;
    state.last_block_timestamp = block.timestamp;
    events.push(WalletEvent::NewBlock(block.height));
    Ok(())
}
