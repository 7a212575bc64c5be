//! Multisig coordination.
//!
//! Drives a [`KexSession`] stored in the wallet state through the key
//! exchange, swaps partial key images with co-signers and moves signing sets
//! between participants. Every call works on a copy of the session and only
//! stores it back on success, so a failed round leaves the session where it
//! was and a base wallet is never touched until finalize.

use crate::core::WalletCore;
use crate::error::WalletError;
use crate::keys::WalletKeys;
use crate::state::{MultisigState, WalletState};
use crate::transfer::{BuiltTx, PendingKind, PendingTransaction};
use beldex_crypto::Scalar;
use beldex_multisig::{KexSession, MultisigKeys, MultisigTxSet, PartialKeyImage};
use beldex_tx::FeePriority;
use beldex_types::{KeyImage, PublicKey};
use std::collections::BTreeMap;
use std::sync::Arc;

const IMAGES_PREFIX: &str = "BeldexMultisigImagesV1";
/// Separates signing sets in exported sign data.
const SET_SEPARATOR: char = ';';

/// Multisig summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultisigStatus {
    pub is_multisig: bool,
    /// Key exchange finished.
    pub is_ready: bool,
    pub threshold: usize,
    pub total: usize,
}

// ─── Key exchange ───────────────────────────────────────────────────────────

/// Run `f` on a copy of the session and store it back on success.
fn with_session<T>(
    core: &WalletCore,
    f: impl FnOnce(&mut KexSession) -> Result<T, WalletError>,
) -> Result<T, WalletError> {
    let handle = core.acquire();
    let mut state = handle.state_mut();
    if state.keys.is_multisig() {
        return Err(WalletError::MultisigAlreadyFinalized);
    }
    let mut session = match &state.multisig {
        Some(m) => m.session.clone(),
        None => KexSession::new(state.keys.spend_secret("start multisig")?, &state.keys.view_secret),
    };
    let out = f(&mut session)?;
    match state.multisig.as_mut() {
        Some(m) => m.session = session,
        None => state.multisig = Some(MultisigState { session, partial_images: Vec::new(), nonces: BTreeMap::new() }),
    }
    Ok(out)
}

/// Round-1 info for this participant. Starts a session if none exists.
pub(crate) fn get_multisig_info(core: &WalletCore) -> Result<String, WalletError> {
    with_session(core, |s| Ok(s.first_message()?))
}

pub(crate) fn make_multisig(core: &WalletCore, infos: &[String], threshold: usize) -> Result<String, WalletError> {
    with_session(core, |s| Ok(s.make(infos, threshold)?))
}

pub(crate) fn exchange_multisig_keys(core: &WalletCore, infos: &[String]) -> Result<String, WalletError> {
    with_session(core, |s| {
        if s.round() == 1 {
            return Err(WalletError::MultisigRoundMismatch("make_multisig has not been called".into()));
        }
        Ok(s.exchange(infos)?)
    })
}

/// Finish the exchange. The wallet switches to the shared keys and forgets
/// everything scanned under its old keys. Returns the multisig address.
pub(crate) fn finalize_multisig(core: &WalletCore, infos: &[String]) -> Result<String, WalletError> {
    let handle = core.acquire();
    let mut state = handle.state_mut();
    if state.keys.is_multisig() {
        return Err(WalletError::MultisigAlreadyFinalized);
    }
    let Some(msig) = state.multisig.as_ref() else {
        return Err(WalletError::MultisigRoundMismatch("make_multisig has not been called".into()));
    };
    let mut session = msig.session.clone();
    let keys = session.finalize(infos)?;
    let network = state.keys.network;
    state.replace_keys(WalletKeys::multisig(&keys, network))?;
    state.multisig = Some(MultisigState { session, partial_images: Vec::new(), nonces: BTreeMap::new() });
    let address = keys.address(network).encode();
    log::info!("multisig {}-of-{} finalized: {address}", keys.threshold, keys.total());
    Ok(address)
}

pub(crate) fn multisig_status(core: &WalletCore) -> MultisigStatus {
    let handle = core.acquire();
    let state = handle.state();
    match &state.multisig {
        Some(m) => MultisigStatus {
            is_multisig: state.keys.is_multisig(),
            is_ready: m.session.is_finalized(),
            threshold: m.session.threshold(),
            total: m.session.total(),
        },
        None => MultisigStatus { is_multisig: false, is_ready: false, threshold: 0, total: 0 },
    }
}

fn ready_keys(state: &WalletState) -> Result<&MultisigKeys, WalletError> {
    if !state.keys.is_multisig() {
        return Err(WalletError::NotMultisig);
    }
    state
        .multisig
        .as_ref()
        .and_then(|m| m.session.keys())
        .ok_or_else(|| WalletError::Multisig("multisig wallet is not ready".into()))
}

// ─── Partial key images ─────────────────────────────────────────────────────

/// Full key image of an output, once partials cover every group.
pub(crate) fn combined_key_image(state: &WalletState, output_key: &PublicKey, base_secret: &Scalar) -> Option<KeyImage> {
    let msig = state.multisig.as_ref()?;
    let keys = msig.session.keys()?;
    let mut partials = keys.partial_key_images(output_key);
    partials.extend(msig.partial_images.iter().filter(|p| &p.output_key == output_key).cloned());
    keys.combine_key_image(output_key, base_secret, &partials).ok()
}

/// This participant's partial images for every owned output.
pub(crate) fn export_multisig_images(core: &WalletCore) -> Result<String, WalletError> {
    let handle = core.acquire();
    let state = handle.state();
    let keys = ready_keys(&state)?;
    let partials: Vec<PartialKeyImage> =
        state.outputs.iter().flat_map(|o| keys.partial_key_images(&o.public_key)).collect();
    let json = serde_json::to_vec(&partials).map_err(|e| WalletError::CriticalInternal(e.to_string()))?;
    Ok(format!("{IMAGES_PREFIX}{}", hex::encode(json)))
}

fn decode_images(blob: &str) -> Result<Vec<PartialKeyImage>, WalletError> {
    let body = blob
        .trim()
        .strip_prefix(IMAGES_PREFIX)
        .ok_or_else(|| WalletError::InvalidSignature("not a multisig images blob".into()))?;
    let json = hex::decode(body).map_err(|e| WalletError::InvalidSignature(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| WalletError::InvalidSignature(e.to_string()))
}

/// Import co-signers' partial images. Every proof is checked before
/// anything is stored. Returns how many outputs gained a key image.
pub(crate) fn import_multisig_images(core: &WalletCore, blobs: &[String]) -> Result<usize, WalletError> {
    let mut incoming = Vec::new();
    for blob in blobs {
        incoming.extend(decode_images(blob)?);
    }

    let completed: Vec<KeyImage> = {
        let handle = core.acquire();
        let mut state = handle.state_mut();
        let keys = ready_keys(&state)?.clone();
        if let Some(bad) = incoming.iter().find(|p| !keys.verify_partial_key_image(p)) {
            return Err(WalletError::InvalidSignature(format!(
                "partial key image for output {} does not verify",
                hex::encode(bad.output_key)
            )));
        }
        let Some(msig) = state.multisig.as_mut() else {
            return Err(WalletError::NotMultisig);
        };
        for partial in incoming {
            let known = msig
                .partial_images
                .iter()
                .any(|p| p.output_key == partial.output_key && p.members == partial.members);
            if !known && partial.members.iter().all(|m| *m != keys.signer) {
                msig.partial_images.push(partial);
            }
        }

        let pending: Vec<(PublicKey, Scalar)> = state
            .outputs
            .iter()
            .filter(|o| o.key_image.is_none())
            .map(|o| (o.public_key, state.keys.output_base_secret(&o.derivation, o.output_index, o.subaddress)))
            .collect();
        let mut completed = Vec::new();
        for (key, base) in pending {
            if let Some(image) = combined_key_image(&state, &key, &base) {
                state.set_key_image(&key, image);
                completed.push(image);
            }
        }
        completed
    };

    if !completed.is_empty() {
        match core.daemon.is_key_image_spent(&completed) {
            Ok(spent) => {
                let handle = core.acquire();
                let mut state = handle.state_mut();
                for (image, _) in completed.iter().zip(spent).filter(|(_, s)| *s) {
                    state.mark_spent(image, None);
                }
            }
            Err(e) => log::warn!("could not check spent status of imported images: {e}"),
        }
    }
    log::info!("imported multisig images, {} output(s) completed", completed.len());
    Ok(completed.len())
}

/// Some owned output still lacks co-signer contributions.
pub(crate) fn has_multisig_partial_key_images(core: &WalletCore) -> bool {
    let handle = core.acquire();
    let state = handle.state();
    state.keys.is_multisig() && state.outputs.iter().any(|o| !o.spent && o.key_image.is_none())
}

// ─── Signing ────────────────────────────────────────────────────────────────

pub(crate) fn export_multisig_sign_data(pending: &PendingTransaction) -> Result<String, WalletError> {
    let PendingKind::MultisigPartial { sets } = pending.kind() else {
        return Err(WalletError::Multisig("not a multisig transaction".into()));
    };
    let encoded = sets.iter().map(|s| s.encode()).collect::<Result<Vec<_>, _>>()?;
    Ok(encoded.join(&SET_SEPARATOR.to_string()))
}

/// Rebuild a pending transaction from a co-signer's sign data. Inputs this
/// wallet knows are reserved like any other build.
pub(crate) fn restore_multisig_transaction(
    core: &Arc<WalletCore>,
    sign_data: &str,
) -> Result<PendingTransaction, WalletError> {
    let sets = sign_data
        .split(SET_SEPARATOR)
        .filter(|s| !s.trim().is_empty())
        .map(MultisigTxSet::decode)
        .collect::<Result<Vec<_>, _>>()?;
    if sets.is_empty() {
        return Err(WalletError::Multisig("empty sign data".into()));
    }

    let id = core.next_pending_id();
    {
        let handle = core.acquire();
        let mut state = handle.state_mut();
        let keys = ready_keys(&state)?;
        if let Some(set) = sets.iter().find(|s| s.threshold != keys.threshold) {
            return Err(WalletError::Multisig(format!("sign data is for a {}-signer set", set.threshold)));
        }
        let owned: Vec<PublicKey> = sets
            .iter()
            .flat_map(|s| s.inputs.iter())
            .filter(|i| state.output_by_key(&i.input.public_key).is_some())
            .map(|i| i.input.public_key)
            .collect();
        state.reserve(&owned, id);
    }

    let txs = sets
        .iter()
        .map(|set| {
            let inputs: Vec<_> = set.inputs.iter().map(|i| i.input.clone()).collect();
            let total: u64 = inputs.iter().map(|i| i.amount).sum();
            BuiltTx {
                tx: set.tx.clone(),
                tx_keys: None,
                amount: total.saturating_sub(set.tx.fee).saturating_sub(set.tx.extra.burn),
                fee: set.tx.fee,
                burn: set.tx.extra.burn,
                change: 0,
                inputs,
                destinations: Vec::new(),
            }
        })
        .collect();
    Ok(PendingTransaction::new(core, id, PendingKind::MultisigPartial { sets }, txs, FeePriority::Default, 0))
}

/// Add this participant's commitment and, once the signing set is full, its
/// responses. Sets already carrying our responses are left alone.
pub(crate) fn sign_multisig_transaction(core: &WalletCore, pending: &mut PendingTransaction) -> Result<(), WalletError> {
    let PendingKind::MultisigPartial { sets } = pending.kind() else {
        return Err(WalletError::Multisig("not a multisig transaction".into()));
    };
    let mut sets = sets.clone();

    let handle = core.acquire();
    let mut state = handle.state_mut();
    let keys = ready_keys(&state)?.clone();
    let mut nonces = state.multisig.as_ref().map(|m| m.nonces.clone()).unwrap_or_default();

    for set in &mut sets {
        let prefix = hex::encode(set.prefix_hash());
        if !set.has_signer(&keys.signer) {
            if set.is_committed() {
                return Err(WalletError::Multisig("signing set is already full".into()));
            }
            nonces.insert(prefix.clone(), set.commit(keys.signer)?);
        }
        let responded = set.signers.iter().any(|r| r.signer == keys.signer && !r.responses.is_empty());
        if set.is_committed() && !responded {
            let secrets = nonces
                .get(&prefix)
                .ok_or_else(|| WalletError::Multisig("nonces for this transaction are not held by this wallet".into()))?;
            set.respond(&keys, secrets)?;
            nonces.remove(&prefix);
        }
    }

    if let Some(msig) = state.multisig.as_mut() {
        msig.nonces = nonces;
    }
    drop(state);
    drop(handle);
    *pending.kind_mut() = PendingKind::MultisigPartial { sets };
    Ok(())
}
