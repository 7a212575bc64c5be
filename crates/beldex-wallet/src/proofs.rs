//! Payment, spend and reserve proofs.
//!
//! The cryptographic checks are pure functions of a transaction (or a set of
//! transactions) and the proof string; the daemon is only asked for the
//! transactions themselves, ring members and confirmation counts. Nothing
//! here mutates wallet state.
//!
//! Formats:
//! * `OutProofV2` / `InProofV2`: per transaction public key, the shared
//!   point `D` and a DLEQ proof that `D` was made with the sender's `r` or
//!   the recipient's view secret `a`.
//! * `SpendProofV1`: one ring signature per input, re-signed over a
//!   message with the spent outputs' keys.
//! * `ReserveProofV2`: per output the view-key shared point, a DLEQ proof
//!   for it, a DLEQ proof binding the key image to the output key, and a
//!   spend-key signature over the whole set.

use crate::core::WalletCore;
use crate::error::WalletError;
use crate::keys::SubaddressIndex;
use crate::state::{OwnedOutput, WalletState};
use beldex_crypto::{
    compress, decompress, decrypt_amount, derive_public_key, dleq_prove, dleq_verify, generate_key_derivation,
    hash_to_point, keccak256, lsag_sign, lsag_verify, schnorr_sign, schnorr_verify, EdwardsPoint, Scalar,
};
use beldex_tx::TxSecretKeys;
use beldex_types::{relative_to_absolute, Address, Hash, KeyImage, PublicKey, RingSignature, Signature, Transaction, TxEntry};
use serde::{Deserialize, Serialize};

const OUT_PROOF: &str = "OutProofV2";
const IN_PROOF: &str = "InProofV2";
const SPEND_PROOF: &str = "SpendProofV1";
const RESERVE_PROOF: &str = "ReserveProofV2";

/// Bytes per tx-proof entry: key index, `D`, signature.
const TX_PROOF_ENTRY: usize = 1 + 32 + 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxKeyCheck {
    pub received: u64,
    pub in_pool: bool,
    pub confirmations: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxProofCheck {
    pub good: bool,
    pub received: u64,
    pub in_pool: bool,
    pub confirmations: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReserveProofCheck {
    pub good: bool,
    pub total: u64,
    pub spent: u64,
}

fn base_point() -> EdwardsPoint {
    EdwardsPoint::mul_base(&Scalar::ONE)
}

pub(crate) fn parse_txid(txid: &str) -> Result<Hash, WalletError> {
    hex::decode(txid.trim())
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| WalletError::TxNotFound(format!("malformed txid {txid}")))
}

fn fetch_tx(core: &WalletCore, txid: &Hash) -> Result<TxEntry, WalletError> {
    core.daemon
        .get_transactions(&[*txid])?
        .into_iter()
        .next()
        .flatten()
        .ok_or_else(|| WalletError::TxNotFound(hex::encode(txid)))
}

fn confirmations(core: &WalletCore, entry: &TxEntry) -> Result<u64, WalletError> {
    match entry.block_height {
        Some(h) if !entry.in_pool => Ok(core.daemon_height_for_query()?.saturating_sub(h)),
        _ => Ok(0),
    }
}

fn parse_address(address: &str, state_network: beldex_types::Network) -> Result<Address, WalletError> {
    Address::parse_for(address, state_network).map_err(|e| WalletError::InvalidDestination(e.to_string()))
}

fn network(core: &WalletCore) -> beldex_types::Network {
    let handle = core.acquire();
    let network = handle.state().keys.network;
    network
}

/// Transaction public key `index`: 0 is the main key, `1 + i` the
/// additional key of output `i`.
fn tx_pub_key(tx: &Transaction, index: usize) -> Option<PublicKey> {
    match index {
        0 => tx.extra.tx_pub_key,
        i => tx.extra.additional_pub_keys.get(i - 1).copied(),
    }
}

/// Key index whose derivation applies to output `i`.
fn key_index_for_output(tx: &Transaction, i: usize) -> usize {
    if tx.extra.additional_pub_keys.is_empty() {
        0
    } else {
        i + 1
    }
}

/// Sum of outputs paying `address`, given derivations by key index.
fn received_amount(tx: &Transaction, address: &Address, derivation: impl Fn(usize) -> Option<[u8; 32]>) -> u64 {
    tx.outputs
        .iter()
        .enumerate()
        .filter_map(|(i, out)| {
            let d = derivation(key_index_for_output(tx, i))?;
            let expected = derive_public_key(&d, i as u64, &address.spend_public_key).ok()?;
            (expected == out.key)
                .then(|| out.clear_amount.unwrap_or_else(|| decrypt_amount(&out.encrypted_amount, &d, i as u64)))
        })
        .sum()
}

/// `8 * D`, the derivation behind a shared point.
fn derivation_of(shared: &PublicKey) -> Option<[u8; 32]> {
    decompress(shared).ok().map(|p| compress(&p.mul_by_cofactor()))
}

// ─── Transaction key ────────────────────────────────────────────────────────

pub(crate) fn get_tx_key(core: &WalletCore, txid: &str) -> Result<String, WalletError> {
    let hash = parse_txid(txid)?;
    let handle = core.acquire();
    let state = handle.state();
    state
        .tx_keys
        .get(&hex::encode(hash))
        .cloned()
        .ok_or_else(|| WalletError::TxNotFound(format!("no key stored for {txid}")))
}

/// Amount `address` received in `tx`, using the sender's secret keys.
pub fn received_with_tx_key(tx: &Transaction, keys: &TxSecretKeys, address: &Address) -> u64 {
    let secret = |k: usize| if k == 0 { Some(keys.main) } else { keys.additional.get(k - 1).copied() };
    received_amount(tx, address, |k| secret(k).and_then(|r| generate_key_derivation(&address.view_public_key, &r).ok()))
}

pub(crate) fn check_tx_key(core: &WalletCore, txid: &str, tx_key: &str, address: &str) -> Result<TxKeyCheck, WalletError> {
    let hash = parse_txid(txid)?;
    let address = parse_address(address, network(core))?;
    let keys = TxSecretKeys::from_hex(tx_key).map_err(|e| WalletError::InvalidSignature(e.to_string()))?;
    let entry = fetch_tx(core, &hash)?;
    Ok(TxKeyCheck {
        received: received_with_tx_key(&entry.tx, &keys, &address),
        in_pool: entry.in_pool,
        confirmations: confirmations(core, &entry)?,
    })
}

// ─── Transaction proofs ─────────────────────────────────────────────────────

fn tx_proof_message(txid: &Hash, address: &Address, message: &str) -> [u8; 32] {
    let mut data = Vec::with_capacity(96 + message.len());
    data.extend_from_slice(txid);
    data.extend_from_slice(&address.spend_public_key);
    data.extend_from_slice(&address.view_public_key);
    data.extend_from_slice(message.as_bytes());
    keccak256(&data)
}

fn encode_entries(prefix: &str, entries: &[(u8, PublicKey, Signature)]) -> String {
    let mut bytes = Vec::with_capacity(entries.len() * TX_PROOF_ENTRY);
    for (index, shared, sig) in entries {
        bytes.push(*index);
        bytes.extend_from_slice(shared);
        bytes.extend_from_slice(&sig.to_bytes());
    }
    format!("{prefix}{}", hex::encode(bytes))
}

fn decode_entries(body: &str) -> Option<Vec<(u8, PublicKey, Signature)>> {
    let bytes = hex::decode(body).ok()?;
    if bytes.is_empty() || bytes.len() % TX_PROOF_ENTRY != 0 {
        return None;
    }
    bytes
        .chunks(TX_PROOF_ENTRY)
        .map(|c| {
            let shared: PublicKey = c[1..33].try_into().ok()?;
            Some((c[0], shared, Signature::from_bytes(&c[33..])?))
        })
        .collect()
}

/// Sender proof from the transaction's secret keys.
fn out_proof(tx: &Transaction, keys: &TxSecretKeys, address: &Address, msg: &[u8; 32]) -> Result<String, WalletError> {
    let view = decompress(&address.view_public_key)?;
    let spend = decompress(&address.spend_public_key)?;
    let secrets = std::iter::once(keys.main).chain(keys.additional.iter().copied());
    let mut entries = Vec::new();
    for (k, r) in secrets.enumerate() {
        let Some(r_pub) = tx_pub_key(tx, k) else {
            continue;
        };
        let g1 = if compress(&EdwardsPoint::mul_base(&r)) == r_pub {
            base_point()
        } else if address.is_subaddress() && compress(&(r * spend)) == r_pub {
            spend
        } else {
            continue;
        };
        let shared = compress(&(r * view));
        entries.push((k as u8, shared, dleq_prove(msg, &g1, &view, &r)));
    }
    if entries.is_empty() {
        return Err(WalletError::TxNotFound("transaction keys do not match the transaction".into()));
    }
    Ok(encode_entries(OUT_PROOF, &entries))
}

/// Recipient proof from the view secret.
fn in_proof(tx: &Transaction, view_secret: &Scalar, address: &Address, msg: &[u8; 32]) -> Result<String, WalletError> {
    let g1 = if address.is_subaddress() { decompress(&address.spend_public_key)? } else { base_point() };
    let mut entries = Vec::new();
    let count = 1 + tx.extra.additional_pub_keys.len();
    for k in 0..count {
        let Some(r_pub) = tx_pub_key(tx, k) else {
            continue;
        };
        let r_point = decompress(&r_pub)?;
        let shared = compress(&(view_secret * r_point));
        entries.push((k as u8, shared, dleq_prove(msg, &g1, &r_point, view_secret)));
    }
    if entries.is_empty() {
        return Err(WalletError::TxNotFound("transaction has no public keys".into()));
    }
    Ok(encode_entries(IN_PROOF, &entries))
}

pub(crate) fn get_tx_proof(core: &WalletCore, txid: &str, address: &str, message: &str) -> Result<String, WalletError> {
    let hash = parse_txid(txid)?;
    let address = parse_address(address, network(core))?;
    let entry = fetch_tx(core, &hash)?;
    let msg = tx_proof_message(&hash, &address, message);

    let handle = core.acquire();
    let state = handle.state();
    if let Some(keys) = state.tx_keys.get(&hex::encode(hash)) {
        let keys = TxSecretKeys::from_hex(keys)?;
        return out_proof(&entry.tx, &keys, &address, &msg);
    }
    if state.subaddress_for_spend_key(&address.spend_public_key).is_none() {
        return Err(WalletError::InvalidDestination("address does not belong to this wallet".into()));
    }
    in_proof(&entry.tx, &state.keys.view_secret, &address, &msg)
}

/// Check a transaction proof against `tx`. Returns validity and the amount
/// the proof shows `address` received.
pub fn verify_tx_proof(tx: &Transaction, txid: &Hash, address: &Address, message: &str, signature: &str) -> (bool, u64) {
    let signature = signature.trim();
    let (outbound, body) = match (signature.strip_prefix(OUT_PROOF), signature.strip_prefix(IN_PROOF)) {
        (Some(body), _) => (true, body),
        (_, Some(body)) => (false, body),
        _ => return (false, 0),
    };
    let Some(entries) = decode_entries(body) else {
        return (false, 0);
    };
    let (Ok(view), Ok(spend)) = (decompress(&address.view_public_key), decompress(&address.spend_public_key)) else {
        return (false, 0);
    };
    let msg = tx_proof_message(txid, address, message);

    let mut derivations = Vec::with_capacity(entries.len());
    for (k, shared, sig) in &entries {
        let (Some(r_pub), Ok(shared_point)) = (tx_pub_key(tx, *k as usize), decompress(shared)) else {
            return (false, 0);
        };
        let Ok(r_point) = decompress(&r_pub) else {
            return (false, 0);
        };
        let ok = if outbound {
            dleq_verify(&msg, &base_point(), &r_point, &view, &shared_point, sig)
                || (address.is_subaddress() && dleq_verify(&msg, &spend, &r_point, &view, &shared_point, sig))
        } else {
            let g1 = if address.is_subaddress() { spend } else { base_point() };
            dleq_verify(&msg, &g1, &view, &r_point, &shared_point, sig)
        };
        if !ok {
            return (false, 0);
        }
        derivations.push((*k as usize, derivation_of(shared)));
    }
    let received = received_amount(tx, address, |k| derivations.iter().find(|(i, _)| *i == k).and_then(|(_, d)| *d));
    (true, received)
}

pub(crate) fn check_tx_proof(
    core: &WalletCore,
    txid: &str,
    address: &str,
    message: &str,
    signature: &str,
) -> Result<TxProofCheck, WalletError> {
    let hash = parse_txid(txid)?;
    let address = parse_address(address, network(core))?;
    let entry = fetch_tx(core, &hash)?;
    let (good, received) = verify_tx_proof(&entry.tx, &hash, &address, message, signature);
    Ok(TxProofCheck { good, received, in_pool: entry.in_pool, confirmations: confirmations(core, &entry)? })
}

// ─── Spend proofs ───────────────────────────────────────────────────────────

fn spend_proof_message(txid: &Hash, message: &str) -> [u8; 32] {
    let mut data = Vec::with_capacity(SPEND_PROOF.len() + 32 + message.len());
    data.extend_from_slice(SPEND_PROOF.as_bytes());
    data.extend_from_slice(txid);
    data.extend_from_slice(message.as_bytes());
    keccak256(&data)
}

/// Ring member keys of every input of `tx`.
fn ring_keys(core: &WalletCore, tx: &Transaction) -> Result<Vec<Vec<PublicKey>>, WalletError> {
    tx.inputs
        .iter()
        .map(|input| -> Result<Vec<PublicKey>, WalletError> {
            let indices = relative_to_absolute(&input.key_offsets);
            let members = core.daemon.get_outputs(&indices)?;
            Ok(members.into_iter().map(|m| m.key).collect())
        })
        .collect()
}

fn spend_secret_for(state: &WalletState, out: &OwnedOutput) -> Result<Scalar, WalletError> {
    state.keys.spend_secret("generate a proof")?;
    state
        .keys
        .output_secret(&out.derivation, out.output_index, out.subaddress)
        .ok_or(WalletError::WatchOnly("generate a proof"))
}

pub(crate) fn get_spend_proof(core: &WalletCore, txid: &str, message: &str) -> Result<String, WalletError> {
    let hash = parse_txid(txid)?;
    let entry = fetch_tx(core, &hash)?;
    let rings = ring_keys(core, &entry.tx)?;
    let msg = spend_proof_message(&hash, message);

    let handle = core.acquire();
    let state = handle.state();
    let mut bytes = Vec::new();
    for (input, ring) in entry.tx.inputs.iter().zip(&rings) {
        let out = state
            .output_by_key_image(&input.key_image)
            .ok_or_else(|| WalletError::TxNotFound(format!("{txid} does not spend this wallet's outputs")))?;
        let secret = spend_secret_for(&state, out)?;
        let real = ring
            .iter()
            .position(|k| *k == out.public_key)
            .ok_or_else(|| WalletError::InvalidRing("spent output is not in its ring".into()))?;
        let sig = lsag_sign(&msg, ring, real, &secret)?;
        bytes.extend_from_slice(&sig.c0);
        for s in &sig.s {
            bytes.extend_from_slice(s);
        }
    }
    if rings.is_empty() {
        return Err(WalletError::TxNotFound(format!("{txid} has no inputs")));
    }
    Ok(format!("{SPEND_PROOF}{}", hex::encode(bytes)))
}

/// Check a spend proof against `tx` and the ring member keys of its inputs.
pub fn verify_spend_proof(tx: &Transaction, txid: &Hash, rings: &[Vec<PublicKey>], message: &str, signature: &str) -> bool {
    let Some(body) = signature.trim().strip_prefix(SPEND_PROOF) else {
        return false;
    };
    let Ok(bytes) = hex::decode(body) else {
        return false;
    };
    let expected: usize = rings.iter().map(|r| 32 * (r.len() + 1)).sum();
    if tx.inputs.is_empty() || rings.len() != tx.inputs.len() || bytes.len() != expected {
        return false;
    }
    let msg = spend_proof_message(txid, message);
    let mut chunks = bytes.chunks(32).map(|c| {
        let mut out = [0u8; 32];
        out.copy_from_slice(c);
        out
    });
    for (input, ring) in tx.inputs.iter().zip(rings) {
        let Some(c0) = chunks.next() else {
            return false;
        };
        let s: Vec<[u8; 32]> = chunks.by_ref().take(ring.len()).collect();
        if !lsag_verify(&msg, ring, &input.key_image, &RingSignature { c0, s }) {
            return false;
        }
    }
    true
}

pub(crate) fn check_spend_proof(core: &WalletCore, txid: &str, message: &str, signature: &str) -> Result<bool, WalletError> {
    let hash = parse_txid(txid)?;
    let entry = fetch_tx(core, &hash)?;
    let rings = ring_keys(core, &entry.tx)?;
    Ok(verify_spend_proof(&entry.tx, &hash, &rings, message, signature))
}

// ─── Reserve proofs ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveEntry {
    pub txid: Hash,
    pub output_index: u64,
    pub tx_pub_key: PublicKey,
    /// `a * R`.
    pub shared: PublicKey,
    pub shared_proof: Signature,
    pub key_image: KeyImage,
    pub image_proof: Signature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveProof {
    pub entries: Vec<ReserveEntry>,
    pub signature: Signature,
}

fn reserve_message(address: &Address, message: &str) -> [u8; 32] {
    let mut data = Vec::with_capacity(RESERVE_PROOF.len() + 64 + message.len());
    data.extend_from_slice(RESERVE_PROOF.as_bytes());
    data.extend_from_slice(&address.spend_public_key);
    data.extend_from_slice(&address.view_public_key);
    data.extend_from_slice(message.as_bytes());
    keccak256(&data)
}

fn entries_digest(msg: &[u8; 32], entries: &[ReserveEntry]) -> [u8; 32] {
    let mut data = msg.to_vec();
    for e in entries {
        data.extend_from_slice(&e.txid);
        data.extend_from_slice(&e.output_index.to_le_bytes());
        data.extend_from_slice(&e.shared);
        data.extend_from_slice(&e.key_image);
        data.extend_from_slice(&e.shared_proof.to_bytes());
        data.extend_from_slice(&e.image_proof.to_bytes());
    }
    keccak256(&data)
}

/// Prove control of at least `amount` (everything unspent when `None`)
/// received at the main address of `account` (account 0 when `None`).
///
/// Only outputs paying that one address can be proven: the checker must be
/// able to derive every output key from the address it was handed.
pub(crate) fn get_reserve_proof(
    core: &WalletCore,
    account: Option<u32>,
    amount: Option<u64>,
    message: &str,
) -> Result<String, WalletError> {
    let handle = core.acquire();
    let state = handle.state();
    let spend_secret = *state.keys.spend_secret("generate a reserve proof")?;
    let index = SubaddressIndex::new(account.unwrap_or(0), 0);
    let mut candidates: Vec<&OwnedOutput> =
        state.outputs.iter().filter(|o| !o.spent && o.key_image.is_some() && o.subaddress == index).collect();
    candidates.sort_by(|a, b| b.amount.cmp(&a.amount));

    let available = candidates.iter().try_fold(0u64, |acc, o| acc.checked_add(o.amount)).unwrap_or(u64::MAX);
    let target = amount.unwrap_or(available);
    if target == 0 || available < target {
        return Err(WalletError::InsufficientFunds { need: target.max(1), have: available });
    }
    let mut chosen = Vec::new();
    let mut total = 0u64;
    for out in candidates {
        if total >= target {
            break;
        }
        total = total.saturating_add(out.amount);
        chosen.push(out);
    }

    let address = state.keys.subaddress(index)?;
    let address_secret = spend_secret + state.keys.subaddress_offset(index);
    let msg = reserve_message(&address, message);
    let view = &state.keys.view_secret;
    let base = view_base(&address)?;
    let g = base_point();
    let mut entries = Vec::with_capacity(chosen.len());
    for out in chosen {
        let r_point = decompress(&out.tx_pub_key)?;
        let x = spend_secret_for(&state, out)?;
        let key_image = out
            .key_image
            .ok_or_else(|| WalletError::CriticalInternal("reserve output without key image".into()))?;
        entries.push(ReserveEntry {
            txid: out.tx_hash,
            output_index: out.output_index,
            tx_pub_key: out.tx_pub_key,
            shared: compress(&(view * r_point)),
            shared_proof: dleq_prove(&msg, &base, &r_point, view),
            key_image,
            image_proof: dleq_prove(&msg, &g, &hash_to_point(&out.public_key), &x),
        });
    }
    let signature = schnorr_sign(&entries_digest(&msg, &entries), &address.spend_public_key, &address_secret);
    let json = serde_json::to_vec(&ReserveProof { entries, signature })
        .map_err(|e| WalletError::CriticalInternal(e.to_string()))?;
    Ok(format!("{RESERVE_PROOF}{}", hex::encode(json)))
}

/// Base the view secret multiplies into the address's view key: `G` for a
/// main address, the spend key for a subaddress.
fn view_base(address: &Address) -> Result<EdwardsPoint, WalletError> {
    if address.is_subaddress() {
        Ok(decompress(&address.spend_public_key)?)
    } else {
        Ok(base_point())
    }
}

pub fn decode_reserve_proof(signature: &str) -> Option<ReserveProof> {
    let body = signature.trim().strip_prefix(RESERVE_PROOF)?;
    serde_json::from_slice(&hex::decode(body).ok()?).ok()
}

/// Check a reserve proof against the transactions its entries name (in
/// entry order). Returns the amount of every entry, or `None` if any entry
/// fails: a bad signature, an output key that does not derive from
/// `address`, or a total that does not fit in a `u64`.
pub fn verify_reserve_proof(
    address: &Address,
    message: &str,
    proof: &ReserveProof,
    txs: &[Transaction],
) -> Option<Vec<u64>> {
    if proof.entries.is_empty() || txs.len() != proof.entries.len() {
        return None;
    }
    let msg = reserve_message(address, message);
    if !schnorr_verify(&entries_digest(&msg, &proof.entries), &address.spend_public_key, &proof.signature) {
        return None;
    }
    let view = decompress(&address.view_public_key).ok()?;
    let base = view_base(address).ok()?;
    let g = base_point();
    let mut seen = std::collections::HashSet::new();
    let mut amounts = Vec::with_capacity(proof.entries.len());
    let mut total = 0u64;
    for (e, tx) in proof.entries.iter().zip(txs) {
        if !seen.insert(e.key_image) {
            return None;
        }
        let i = e.output_index as usize;
        let out = tx.outputs.get(i)?;
        let own_key = tx_pub_key(tx, 0) == Some(e.tx_pub_key) || tx_pub_key(tx, i + 1) == Some(e.tx_pub_key);
        if !own_key {
            return None;
        }
        let r = decompress(&e.tx_pub_key).ok()?;
        let shared = decompress(&e.shared).ok()?;
        let p = decompress(&out.key).ok()?;
        let image = decompress(&e.key_image).ok()?;
        if !dleq_verify(&msg, &base, &view, &r, &shared, &e.shared_proof)
            || !dleq_verify(&msg, &g, &p, &hash_to_point(&out.key), &image, &e.image_proof)
        {
            return None;
        }
        let d = derivation_of(&e.shared)?;
        if derive_public_key(&d, i as u64, &address.spend_public_key).ok()? != out.key {
            return None;
        }
        let amount = out.clear_amount.unwrap_or_else(|| decrypt_amount(&out.encrypted_amount, &d, i as u64));
        total = total.checked_add(amount)?;
        amounts.push(amount);
    }
    Some(amounts)
}

pub(crate) fn check_reserve_proof(
    core: &WalletCore,
    address: &str,
    message: &str,
    signature: &str,
) -> Result<ReserveProofCheck, WalletError> {
    let address = parse_address(address, network(core))?;
    let bad = ReserveProofCheck { good: false, total: 0, spent: 0 };
    let Some(proof) = decode_reserve_proof(signature) else {
        return Ok(bad);
    };
    let hashes: Vec<Hash> = proof.entries.iter().map(|e| e.txid).collect();
    let Some(txs) = core
        .daemon
        .get_transactions(&hashes)?
        .into_iter()
        .map(|e| e.map(|e| e.tx))
        .collect::<Option<Vec<_>>>()
    else {
        return Ok(bad);
    };
    let Some(amounts) = verify_reserve_proof(&address, message, &proof, &txs) else {
        return Ok(bad);
    };

    let images: Vec<KeyImage> = proof.entries.iter().map(|e| e.key_image).collect();
    let spent_flags = core.daemon.is_key_image_spent(&images)?;
    // Sums cannot overflow: verification bounded the full total.
    let total = amounts.iter().sum();
    let spent = amounts.iter().zip(spent_flags).filter(|(_, s)| *s).map(|(a, _)| a).sum();
    Ok(ReserveProofCheck { good: true, total, spent })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{SubaddressIndex, WalletKeys};
    use beldex_tx::{Destination, PreparedInput, TransactionBuilder};
    use beldex_types::Network;

    /// Unsigned transfer to `to` (no real inputs are needed for proofs).
    fn transfer(to: Address, amount: u64) -> (Transaction, TxSecretKeys) {
        let sender = WalletKeys::generate(Network::Testnet);
        let fake = PreparedInput {
            public_key: sender.spend_public,
            amount: amount + 1_000,
            global_index: 0,
            key_image: [7; 32],
            ring: vec![sender.spend_public],
            ring_indices: vec![0],
            real_index: 0,
        };
        let unsigned = TransactionBuilder::new()
            .add_inputs(vec![fake])
            .add_destination(Destination { address: to, amount })
            .set_change_address(sender.primary_address())
            .set_fee(1_000)
            .build()
            .unwrap();
        (unsigned.tx, unsigned.tx_keys)
    }

    fn flip(proof: &str) -> String {
        let mut bytes = proof.as_bytes().to_vec();
        let last = bytes.len() - 1;
        bytes[last] = if bytes[last] == b'0' { b'1' } else { b'0' };
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_tx_key_and_out_proof() {
        let recipient = WalletKeys::generate(Network::Testnet);
        let address = recipient.primary_address();
        let (tx, keys) = transfer(address, 42_000);
        assert_eq!(received_with_tx_key(&tx, &keys, &address), 42_000);

        let txid = tx.hash();
        let msg = tx_proof_message(&txid, &address, "invoice 7");
        let proof = out_proof(&tx, &keys, &address, &msg).unwrap();
        assert!(proof.starts_with(OUT_PROOF));
        assert_eq!(verify_tx_proof(&tx, &txid, &address, "invoice 7", &proof), (true, 42_000));
        assert!(!verify_tx_proof(&tx, &txid, &address, "invoice 8", &proof).0);
        assert!(!verify_tx_proof(&tx, &txid, &address, "invoice 7", &flip(&proof)).0);
    }

    #[test]
    fn test_in_proof_for_subaddress() {
        let recipient = WalletKeys::generate(Network::Testnet);
        let address = recipient.subaddress(SubaddressIndex::new(0, 2)).unwrap();
        let (tx, keys) = transfer(address, 9_000);
        assert_eq!(received_with_tx_key(&tx, &keys, &address), 9_000);

        let txid = tx.hash();
        let msg = tx_proof_message(&txid, &address, "");
        let proof = in_proof(&tx, &recipient.view_secret, &address, &msg).unwrap();
        assert_eq!(verify_tx_proof(&tx, &txid, &address, "", &proof), (true, 9_000));
        assert!(!verify_tx_proof(&tx, &txid, &address, "", &flip(&proof)).0);

        let stranger = WalletKeys::generate(Network::Testnet);
        let forged = in_proof(&tx, &stranger.view_secret, &address, &msg).unwrap();
        assert!(!verify_tx_proof(&tx, &txid, &address, "", &forged).0);
    }

    /// A reserve entry for output `i` of `tx`, signed with `output_secret`
    /// but claimed under `prover`'s view key.
    fn reserve_entry(tx: &Transaction, i: usize, prover: &WalletKeys, output_secret: &Scalar, msg: &[u8; 32]) -> ReserveEntry {
        let tx_pub_key = tx.extra.tx_pub_key.unwrap();
        let r = decompress(&tx_pub_key).unwrap();
        let out = tx.outputs[i].key;
        ReserveEntry {
            txid: tx.hash(),
            output_index: i as u64,
            tx_pub_key,
            shared: compress(&(prover.view_secret * r)),
            shared_proof: dleq_prove(msg, &base_point(), &r, &prover.view_secret),
            key_image: beldex_crypto::generate_key_image(&out, output_secret),
            image_proof: dleq_prove(msg, &base_point(), &hash_to_point(&out), output_secret),
        }
    }

    /// Index and one-time secret of the output of `tx` paying `keys`.
    fn owned_output(tx: &Transaction, keys: &WalletKeys) -> (usize, Scalar) {
        let d = generate_key_derivation(&tx.extra.tx_pub_key.unwrap(), &keys.view_secret).unwrap();
        let i = tx
            .outputs
            .iter()
            .enumerate()
            .position(|(i, o)| derive_public_key(&d, i as u64, &keys.spend_public).unwrap() == o.key)
            .unwrap();
        (i, keys.output_secret(&d, i as u64, SubaddressIndex::PRIMARY).unwrap())
    }

    fn signed(prover: &WalletKeys, msg: &[u8; 32], entries: Vec<ReserveEntry>) -> ReserveProof {
        let spend = prover.spend_secret("test").unwrap();
        let signature = schnorr_sign(&entries_digest(msg, &entries), &prover.spend_public, spend);
        ReserveProof { entries, signature }
    }

    #[test]
    fn test_reserve_proof_rejects_foreign_outputs() {
        let alice = WalletKeys::generate(Network::Testnet);
        let other = WalletKeys::generate(Network::Testnet);
        let address = alice.primary_address();
        let msg = reserve_message(&address, "audit");

        let (own_tx, _) = transfer(address, 7_000);
        let (i, x) = owned_output(&own_tx, &alice);
        let honest = signed(&alice, &msg, vec![reserve_entry(&own_tx, i, &alice, &x, &msg)]);
        assert_eq!(verify_reserve_proof(&address, "audit", &honest, &[own_tx.clone()]), Some(vec![7_000]));

        // Alice holds the secret of another wallet's output and claims it.
        let (foreign_tx, _) = transfer(other.primary_address(), 900_000);
        let (j, y) = owned_output(&foreign_tx, &other);
        let forged = signed(
            &alice,
            &msg,
            vec![reserve_entry(&own_tx, i, &alice, &x, &msg), reserve_entry(&foreign_tx, j, &alice, &y, &msg)],
        );
        assert_eq!(verify_reserve_proof(&address, "audit", &forged, &[own_tx.clone(), foreign_tx]), None);

        // The same output twice is not twice the reserve.
        let doubled = signed(
            &alice,
            &msg,
            vec![reserve_entry(&own_tx, i, &alice, &x, &msg), reserve_entry(&own_tx, i, &alice, &x, &msg)],
        );
        assert_eq!(verify_reserve_proof(&address, "audit", &doubled, &[own_tx.clone(), own_tx]), None);
    }

    #[test]
    fn test_malformed_proofs_are_bad() {
        let recipient = WalletKeys::generate(Network::Testnet);
        let address = recipient.primary_address();
        let (tx, _) = transfer(address, 1_000);
        let txid = tx.hash();
        assert_eq!(verify_tx_proof(&tx, &txid, &address, "", "OutProofV2zz"), (false, 0));
        assert!(!verify_spend_proof(&tx, &txid, &[vec![[1; 32]]], "", "SpendProofV1"));
        assert!(decode_reserve_proof("ReserveProofV2abc").is_none());
        assert!(matches!(parse_txid("xyz"), Err(WalletError::TxNotFound(_))));
    }
}
