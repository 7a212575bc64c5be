//! Key images, cold signing and ring bookkeeping.
//!
//! A view-only wallet sees outputs but cannot compute their key images, so
//! it cannot tell when they are spent. The holder of the spend key signs
//! the images (one single-member ring signature per output, proving the
//! image belongs to the output key) and the whole blob with the shared view
//! key; the view-only wallet checks both before importing anything.

use crate::core::WalletCore;
use crate::error::WalletError;
use crate::keys::{SubaddressIndex, WalletKeys};
use beldex_crypto::{generate_key_derivation, keccak256, lsag_sign, lsag_verify, schnorr_sign, schnorr_verify};
use beldex_types::{absolute_to_relative, relative_to_absolute, KeyImage, PublicKey, RingSignature, Signature};
use serde::{Deserialize, Serialize};

const KEY_IMAGES_PREFIX: &str = "BeldexKeyImagesV1";
const OUTPUTS_PREFIX: &str = "BeldexOutputsV1";

/// What a signing device needs to know about an owned output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedOutput {
    pub output_key: PublicKey,
    pub tx_pub_key: PublicKey,
    pub output_index: u64,
    pub subaddress: SubaddressIndex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedKeyImage {
    pub output_key: PublicKey,
    pub key_image: KeyImage,
    /// Ring of one over `output_key`.
    pub proof: RingSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct KeyImageBlob {
    images: Vec<SignedKeyImage>,
    /// View-key signature over the images.
    signature: Signature,
}

/// Outcome of a key image import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyImageImport {
    pub imported: usize,
    pub spent: u64,
    pub unspent: u64,
}

/// Air-gapped signer holding the spend key.
pub trait ColdSigner {
    /// Sign key images for `outputs`, producing an importable blob.
    fn sign_key_images(&self, outputs: &[ExportedOutput]) -> Result<String, WalletError>;
}

/// Software signer over full wallet keys.
pub struct KeysColdSigner {
    keys: WalletKeys,
}

impl KeysColdSigner {
    pub fn new(keys: WalletKeys) -> Result<Self, WalletError> {
        keys.spend_secret("sign key images")?;
        Ok(Self { keys })
    }

    /// Sign an [`export_outputs`] blob.
    pub fn sign_outputs(&self, blob: &str) -> Result<String, WalletError> {
        self.sign_key_images(&decode_outputs(blob)?)
    }
}

impl ColdSigner for KeysColdSigner {
    fn sign_key_images(&self, outputs: &[ExportedOutput]) -> Result<String, WalletError> {
        sign_key_images(&self.keys, outputs)
    }
}

fn image_message(output_key: &PublicKey, key_image: &KeyImage) -> [u8; 32] {
    let mut data = Vec::with_capacity(73);
    data.extend_from_slice(b"key-image");
    data.extend_from_slice(output_key);
    data.extend_from_slice(key_image);
    keccak256(&data)
}

fn blob_digest(images: &[SignedKeyImage]) -> Result<[u8; 32], WalletError> {
    let json = serde_json::to_vec(images).map_err(|e| WalletError::CriticalInternal(e.to_string()))?;
    Ok(keccak256(&json))
}

fn sign_key_images(keys: &WalletKeys, outputs: &[ExportedOutput]) -> Result<String, WalletError> {
    keys.spend_secret("sign key images")?;
    let mut images = Vec::with_capacity(outputs.len());
    for out in outputs {
        let derivation = generate_key_derivation(&out.tx_pub_key, &keys.view_secret)?;
        let key_image = keys
            .key_image(&out.output_key, &derivation, out.output_index, out.subaddress)
            .ok_or(WalletError::WatchOnly("sign key images"))?;
        let secret = keys
            .output_secret(&derivation, out.output_index, out.subaddress)
            .ok_or(WalletError::WatchOnly("sign key images"))?;
        let proof = lsag_sign(&image_message(&out.output_key, &key_image), &[out.output_key], 0, &secret)
            .map_err(|e| WalletError::InvalidSignature(format!("output {} is not ours: {e}", hex::encode(out.output_key))))?;
        images.push(SignedKeyImage { output_key: out.output_key, key_image, proof });
    }
    let signature = schnorr_sign(&blob_digest(&images)?, &keys.view_public, &keys.view_secret);
    let json = serde_json::to_vec(&KeyImageBlob { images, signature })
        .map_err(|e| WalletError::CriticalInternal(e.to_string()))?;
    Ok(format!("{KEY_IMAGES_PREFIX}{}", hex::encode(json)))
}

fn decode_key_images(blob: &str) -> Result<KeyImageBlob, WalletError> {
    let body = blob
        .trim()
        .strip_prefix(KEY_IMAGES_PREFIX)
        .ok_or_else(|| WalletError::InvalidSignature("not a key image export".into()))?;
    let json = hex::decode(body).map_err(|e| WalletError::InvalidSignature(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| WalletError::InvalidSignature(e.to_string()))
}

pub fn decode_outputs(blob: &str) -> Result<Vec<ExportedOutput>, WalletError> {
    let body = blob
        .trim()
        .strip_prefix(OUTPUTS_PREFIX)
        .ok_or_else(|| WalletError::InvalidDestination("not an outputs export".into()))?;
    let json = hex::decode(body).map_err(|e| WalletError::InvalidDestination(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| WalletError::InvalidDestination(e.to_string()))
}

fn exported(core: &WalletCore, only_missing: bool) -> Vec<ExportedOutput> {
    let handle = core.acquire();
    let state = handle.state();
    state
        .outputs
        .iter()
        .filter(|o| !only_missing || o.key_image.is_none())
        .map(|o| ExportedOutput {
            output_key: o.public_key,
            tx_pub_key: o.tx_pub_key,
            output_index: o.output_index,
            subaddress: o.subaddress,
        })
        .collect()
}

// ─── Export / import ────────────────────────────────────────────────────────

/// Every owned output (or only those still lacking an image), for a signer.
pub(crate) fn export_outputs(core: &WalletCore, only_missing: bool) -> Result<String, WalletError> {
    let json = serde_json::to_vec(&exported(core, only_missing))
        .map_err(|e| WalletError::CriticalInternal(e.to_string()))?;
    Ok(format!("{OUTPUTS_PREFIX}{}", hex::encode(json)))
}

/// Signed key images of owned outputs; `all: false` skips spent ones.
pub(crate) fn export_key_images(core: &WalletCore, all: bool) -> Result<String, WalletError> {
    let handle = core.acquire();
    let state = handle.state();
    let outputs: Vec<ExportedOutput> = state
        .outputs
        .iter()
        .filter(|o| all || !o.spent)
        .map(|o| ExportedOutput {
            output_key: o.public_key,
            tx_pub_key: o.tx_pub_key,
            output_index: o.output_index,
            subaddress: o.subaddress,
        })
        .collect();
    sign_key_images(&state.keys, &outputs)
}

/// Verify and apply a key image blob. Nothing changes unless every image
/// checks out and the daemon answered; importing the same blob twice
/// leaves the state as after the first import.
pub(crate) fn import_key_images(core: &WalletCore, blob: &str) -> Result<KeyImageImport, WalletError> {
    let decoded = decode_key_images(blob)?;
    {
        let handle = core.acquire();
        let state = handle.state();
        if !schnorr_verify(&blob_digest(&decoded.images)?, &state.keys.view_public, &decoded.signature) {
            return Err(WalletError::InvalidSignature("key images are not signed by this wallet's view key".into()));
        }
        for image in &decoded.images {
            if state.output_by_key(&image.output_key).is_none() {
                return Err(WalletError::InvalidSignature(format!(
                    "key image for unknown output {}",
                    hex::encode(image.output_key)
                )));
            }
            let msg = image_message(&image.output_key, &image.key_image);
            if !lsag_verify(&msg, &[image.output_key], &image.key_image, &image.proof) {
                return Err(WalletError::InvalidSignature(format!(
                    "bad key image proof for output {}",
                    hex::encode(image.output_key)
                )));
            }
        }
    }

    let images: Vec<KeyImage> = decoded.images.iter().map(|i| i.key_image).collect();
    let spent = if images.is_empty() { Vec::new() } else { core.daemon.is_key_image_spent(&images)? };

    let handle = core.acquire();
    let mut state = handle.state_mut();
    let mut result = KeyImageImport { imported: decoded.images.len(), ..Default::default() };
    for (image, is_spent) in decoded.images.iter().zip(spent) {
        state.set_key_image(&image.output_key, image.key_image);
        let amount = state.output_by_key(&image.output_key).map_or(0, |o| o.amount);
        if is_spent {
            state.mark_spent(&image.key_image, None);
            result.spent += amount;
        } else {
            result.unspent += amount;
        }
    }
    log::info!(
        "imported {} key image(s): {} spent, {} unspent",
        result.imported,
        result.spent,
        result.unspent
    );
    Ok(result)
}

/// Have `signer` compute images for outputs still missing one, then import.
pub(crate) fn cold_key_image_sync(core: &WalletCore, signer: &dyn ColdSigner) -> Result<KeyImageImport, WalletError> {
    let outputs = exported(core, true);
    if outputs.is_empty() {
        return Ok(KeyImageImport::default());
    }
    let blob = signer.sign_key_images(&outputs)?;
    import_key_images(core, &blob)
}

/// Re-query the spent status of every known key image.
pub(crate) fn rescan_spent(core: &WalletCore) -> Result<usize, WalletError> {
    let images: Vec<(KeyImage, bool)> = {
        let handle = core.acquire();
        let state = handle.state();
        state.outputs.iter().filter_map(|o| o.key_image.map(|ki| (ki, o.spent))).collect()
    };
    if images.is_empty() {
        return Ok(0);
    }
    let keys: Vec<KeyImage> = images.iter().map(|(ki, _)| *ki).collect();
    let flags = core.daemon.is_key_image_spent(&keys)?;

    let handle = core.acquire();
    let mut state = handle.state_mut();
    let mut changed = 0;
    for ((ki, was_spent), now_spent) in images.into_iter().zip(flags) {
        if now_spent && !was_spent {
            state.mark_spent(&ki, None);
            changed += 1;
        } else if !now_spent && was_spent {
            state.mark_unspent(&ki);
            changed += 1;
        }
    }
    log::debug!("rescan_spent: {changed} output(s) changed");
    Ok(changed)
}

// ─── Blackballs and rings ───────────────────────────────────────────────────

/// Exclude outputs from decoy selection. `add: false` replaces the set.
pub(crate) fn blackball_outputs(core: &WalletCore, outputs: &[u64], add: bool) {
    let handle = core.acquire();
    let mut state = handle.state_mut();
    if !add {
        state.blackballed.clear();
    }
    state.blackballed.extend(outputs.iter().copied());
}

pub(crate) fn unblackball_output(core: &WalletCore, output: u64) -> bool {
    let handle = core.acquire();
    let removed = handle.state_mut().blackballed.remove(&output);
    removed
}

pub(crate) fn is_output_blackballed(core: &WalletCore, output: u64) -> bool {
    let handle = core.acquire();
    let blackballed = handle.state().blackballed.contains(&output);
    blackballed
}

fn parse_key_image(key_image: &str) -> Result<KeyImage, WalletError> {
    hex::decode(key_image.trim())
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| WalletError::InvalidRing(format!("malformed key image {key_image}")))
}

/// Recorded ring of `key_image`, as absolute indices or relative offsets.
pub(crate) fn get_ring(core: &WalletCore, key_image: &str, relative: bool) -> Result<Vec<u64>, WalletError> {
    let ki = parse_key_image(key_image)?;
    let ring = {
        let handle = core.acquire();
        let ring = handle.state().rings.get(&hex::encode(ki)).cloned();
        ring
    }
    .ok_or_else(|| WalletError::InvalidRing(format!("no ring recorded for {key_image}")))?;
    if relative {
        absolute_to_relative(&ring).map_err(|e| WalletError::InvalidRing(e.to_string()))
    } else {
        Ok(ring)
    }
}

/// Override the ring used when `key_image` is spent.
pub(crate) fn set_ring(core: &WalletCore, key_image: &str, ring: &[u64], relative: bool) -> Result<(), WalletError> {
    let ki = parse_key_image(key_image)?;
    if ring.is_empty() {
        return Err(WalletError::InvalidRing("empty ring".into()));
    }
    let absolute = if relative { relative_to_absolute(ring) } else { ring.to_vec() };
    absolute_to_relative(&absolute).map_err(|e| WalletError::InvalidRing(e.to_string()))?;
    let handle = core.acquire();
    handle.state_mut().rings.insert(hex::encode(ki), absolute);
    Ok(())
}

/// Rings of every input of `txid`: the recorded ring when there is one,
/// else the ring the transaction references on chain.
pub(crate) fn get_rings(core: &WalletCore, txid: &str) -> Result<Vec<(String, Vec<u64>)>, WalletError> {
    let hash = crate::proofs::parse_txid(txid)?;
    let entry = core
        .daemon
        .get_transactions(&[hash])?
        .into_iter()
        .next()
        .flatten()
        .ok_or_else(|| WalletError::TxNotFound(txid.to_string()))?;
    let handle = core.acquire();
    let state = handle.state();
    Ok(entry
        .tx
        .inputs
        .iter()
        .map(|input| {
            let ki = hex::encode(input.key_image);
            let ring = state.rings.get(&ki).cloned().unwrap_or_else(|| relative_to_absolute(&input.key_offsets));
            (ki, ring)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalletConfig;
    use crate::scanner::apply_block;
    use crate::state::WalletState;
    use beldex_rpc::MemoryDaemon;
    use beldex_tx::miner_transaction;
    use beldex_types::{Block, Network, TxEntry};
    use std::sync::Arc;

    /// A view-only core that has scanned one coinbase for `full`.
    fn view_only_core(full: &WalletKeys) -> WalletCore {
        let keys = WalletKeys::view_only(full.view_secret, full.spend_public, Network::Testnet).unwrap();
        let mut state = WalletState::new(keys, (0, 1), 0).unwrap();
        let tx = miner_transaction(&full.primary_address(), &[4_000, 6_000], false).unwrap();
        let block = Block {
            height: 0,
            hash: [1; 32],
            prev_hash: [0; 32],
            timestamp: 0,
            txs: vec![TxEntry { hash: tx.hash(), tx, output_indices: vec![0, 1], block_height: Some(0), in_pool: false }],
        };
        apply_block(&mut state, &block, &mut Vec::new()).unwrap();
        WalletCore::new(WalletConfig::default(), Arc::new(MemoryDaemon::new()), state)
    }

    #[test]
    fn test_cold_sync_fills_images_once() {
        let full = WalletKeys::generate(Network::Testnet);
        let core = view_only_core(&full);
        assert!(core.acquire().state().outputs.iter().all(|o| o.key_image.is_none()));

        let signer = KeysColdSigner::new(full.clone()).unwrap();
        let result = cold_key_image_sync(&core, &signer).unwrap();
        assert_eq!(result, KeyImageImport { imported: 2, spent: 0, unspent: 10_000 });
        assert!(core.acquire().state().outputs.iter().all(|o| o.key_image.is_some()));
        assert_eq!(cold_key_image_sync(&core, &signer).unwrap(), KeyImageImport::default());
    }

    #[test]
    fn test_import_is_idempotent_and_checks_view_key() {
        let full = WalletKeys::generate(Network::Testnet);
        let core = view_only_core(&full);
        let blob = KeysColdSigner::new(full).unwrap().sign_outputs(&export_outputs(&core, false).unwrap()).unwrap();

        import_key_images(&core, &blob).unwrap();
        let once = serde_json::to_string(&*core.acquire().state()).unwrap();
        import_key_images(&core, &blob).unwrap();
        assert_eq!(serde_json::to_string(&*core.acquire().state()).unwrap(), once);

        let other = WalletKeys::generate(Network::Testnet);
        let other_core = view_only_core(&other);
        assert!(matches!(import_key_images(&other_core, &blob), Err(WalletError::InvalidSignature(_))));
        assert!(matches!(import_key_images(&core, "junk"), Err(WalletError::InvalidSignature(_))));
    }

    #[test]
    fn test_rings_and_blackballs() {
        let full = WalletKeys::generate(Network::Testnet);
        let core = view_only_core(&full);
        let ki = hex::encode([3u8; 32]);
        set_ring(&core, &ki, &[5, 2, 1], true).unwrap();
        assert_eq!(get_ring(&core, &ki, false).unwrap(), vec![5, 7, 8]);
        assert_eq!(get_ring(&core, &ki, true).unwrap(), vec![5, 2, 1]);
        assert!(set_ring(&core, &ki, &[9, 3], false).is_err());
        assert!(matches!(get_ring(&core, &hex::encode([4u8; 32]), false), Err(WalletError::InvalidRing(_))));

        blackball_outputs(&core, &[4, 9], true);
        blackball_outputs(&core, &[11], true);
        assert!(is_output_blackballed(&core, 9));
        assert!(unblackball_output(&core, 9));
        assert!(!is_output_blackballed(&core, 9));
        blackball_outputs(&core, &[1], false);
        assert!(!is_output_blackballed(&core, 4));
        assert!(is_output_blackballed(&core, 1));
    }
}
