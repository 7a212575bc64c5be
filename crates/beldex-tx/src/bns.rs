//! Name-service value encryption and record payload construction.
//!
//! Values are encrypted with ChaCha20 under a key derived from the
//! normalized name, so anyone who knows the name can read the mapping but
//! the chain only ever sees the name hash.

use crate::TxError;
use beldex_types::bns::{name_hash, normalize_name, validate_value};
use beldex_types::{keccak256, BnsError, BnsExtra, BnsService, EncryptedValue, Hash, MappingYears, Network};
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::{ChaCha20, Key, Nonce};
use rand::RngCore;

fn value_key(normalized_name: &str) -> [u8; 32] {
    let mut data = Vec::with_capacity(8 + normalized_name.len());
    data.extend_from_slice(b"bns-value");
    data.extend_from_slice(normalized_name.as_bytes());
    keccak256(&data)
}

fn apply(normalized_name: &str, nonce: &[u8; 12], buf: &mut [u8]) {
    let key = value_key(normalized_name);
    let mut cipher = ChaCha20::new(Key::from_slice(&key), Nonce::from_slice(nonce));
    cipher.apply_keystream(buf);
}

pub fn encrypt_value(normalized_name: &str, service: BnsService, value: &str) -> EncryptedValue {
    let mut nonce = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce);
    let mut buf = value.as_bytes().to_vec();
    apply(normalized_name, &nonce, &mut buf);
    EncryptedValue { service, nonce, ciphertext: hex::encode(buf) }
}

pub fn decrypt_value(normalized_name: &str, value: &EncryptedValue) -> Result<String, TxError> {
    let mut buf = hex::decode(&value.ciphertext).map_err(|e| TxError::Invalid(format!("ciphertext: {e}")))?;
    apply(normalized_name, &value.nonce, &mut buf);
    String::from_utf8(buf).map_err(|_| TxError::Invalid("value is not utf-8 (wrong name?)".into()))
}

/// Plaintext service values for a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BnsValues {
    pub bchat: Option<String>,
    pub wallet: Option<String>,
    pub belnet: Option<String>,
}

impl BnsValues {
    pub fn is_empty(&self) -> bool {
        self.bchat.is_none() && self.wallet.is_none() && self.belnet.is_none()
    }

    fn entries(&self) -> impl Iterator<Item = (BnsService, &str)> {
        [
            (BnsService::Bchat, self.bchat.as_deref()),
            (BnsService::Wallet, self.wallet.as_deref()),
            (BnsService::Belnet, self.belnet.as_deref()),
        ]
        .into_iter()
        .filter_map(|(s, v)| v.filter(|v| !v.is_empty()).map(|v| (s, v)))
    }

    /// Validate and encrypt every present value.
    pub fn encrypt(&self, normalized_name: &str, network: Network) -> Result<Vec<EncryptedValue>, TxError> {
        self.entries()
            .map(|(service, value)| -> Result<EncryptedValue, TxError> {
                validate_value(service, value, network)?;
                Ok(encrypt_value(normalized_name, service, value))
            })
            .collect()
    }
}

/// Extra payload for a new registration.
pub fn buy_extra(
    name: &str,
    owner: String,
    backup_owner: Option<String>,
    years: MappingYears,
    values: &BnsValues,
    network: Network,
) -> Result<(BnsExtra, String), TxError> {
    let normalized = normalize_name(name)?;
    if values.is_empty() {
        return Err(BnsError::NoValues.into());
    }
    let extra = BnsExtra {
        name_hash: name_hash(&normalized),
        owner: Some(owner),
        backup_owner,
        years: Some(years.years()),
        values: values.encrypt(&normalized, network)?,
        prev_txid: None,
        signature: None,
    };
    Ok((extra, normalized))
}

/// Unsigned extra payload for an update; the caller signs
/// [`BnsExtra::signing_payload`] with the owner key.
pub fn update_extra(
    normalized_name: &str,
    prev_txid: Hash,
    owner: Option<String>,
    backup_owner: Option<String>,
    values: &BnsValues,
    network: Network,
) -> Result<BnsExtra, TxError> {
    if owner.is_none() && backup_owner.is_none() && values.is_empty() {
        return Err(BnsError::NoValues.into());
    }
    Ok(BnsExtra {
        name_hash: name_hash(normalized_name),
        owner,
        backup_owner,
        years: None,
        values: values.encrypt(normalized_name, network)?,
        prev_txid: Some(prev_txid),
        signature: None,
    })
}

pub fn renew_extra(normalized_name: &str, prev_txid: Hash, years: MappingYears) -> BnsExtra {
    BnsExtra {
        name_hash: name_hash(normalized_name),
        owner: None,
        backup_owner: None,
        years: Some(years.years()),
        values: Vec::new(),
        prev_txid: Some(prev_txid),
        signature: None,
    }
}
