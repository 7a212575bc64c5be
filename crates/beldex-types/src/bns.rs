//! Beldex Name Service record types and validation.

use crate::address::Address;
use crate::chain::Signature;
use crate::constants::{bns_burn_amount, Network, BNS_MAX_NAME_LENGTH, DIFFICULTY_TARGET};
use crate::{keccak256, Hash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Suffix of names that map to belnet addresses.
pub const BDX_SUFFIX: &str = ".bdx";

const BCHAT_ID_LEN: usize = 66;
const BELNET_KEY_LEN: usize = 52;
const BASE32Z_ALPHABET: &str = "ybndrfg8ejkmcpqxot1uwisza345h769";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BnsError {
    #[error("invalid name '{0}': {1}")]
    InvalidName(String, &'static str),

    #[error("invalid mapping years '{0}'")]
    InvalidYears(String),

    #[error("invalid {service:?} value: {reason}")]
    InvalidValue { service: BnsService, reason: &'static str },

    #[error("record must carry at least one value")]
    NoValues,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BnsService {
    Bchat,
    Wallet,
    Belnet,
}

// ── Mapping years ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingYears {
    One,
    Two,
    Five,
    Ten,
}

impl MappingYears {
    /// Accepts `"2"`, `"2y"`, `"2year"` and `"2years"` (case-insensitive).
    pub fn parse(s: &str) -> Result<Self, BnsError> {
        let lower = s.trim().to_ascii_lowercase();
        let digits = lower
            .strip_suffix("years")
            .or_else(|| lower.strip_suffix("year"))
            .or_else(|| lower.strip_suffix('y'))
            .unwrap_or(&lower)
            .trim();
        match digits.parse::<u8>() {
            Ok(n) => Self::from_years(n).ok_or_else(|| BnsError::InvalidYears(s.to_string())),
            Err(_) => Err(BnsError::InvalidYears(s.to_string())),
        }
    }

    pub fn from_years(n: u8) -> Option<Self> {
        match n {
            1 => Some(MappingYears::One),
            2 => Some(MappingYears::Two),
            5 => Some(MappingYears::Five),
            10 => Some(MappingYears::Ten),
            _ => None,
        }
    }

    pub fn years(self) -> u8 {
        match self {
            MappingYears::One => 1,
            MappingYears::Two => 2,
            MappingYears::Five => 5,
            MappingYears::Ten => 10,
        }
    }

    /// Amount burned by a registration or renewal of this length.
    pub fn burn(self) -> u64 {
        bns_burn_amount(self.years())
    }

    /// Registration lifetime in blocks.
    pub fn blocks(self) -> u64 {
        self.years() as u64 * 365 * 24 * 3600 / DIFFICULTY_TARGET
    }
}

// ── Names and values ─────────────────────────────────────────────────────────

/// Lowercase and validate a name, returning its normalized form.
pub fn normalize_name(name: &str) -> Result<String, BnsError> {
    let lower = name.trim().to_ascii_lowercase();
    let label = lower.strip_suffix(BDX_SUFFIX).unwrap_or(&lower);
    let err = |reason| Err(BnsError::InvalidName(name.to_string(), reason));
    if label.is_empty() {
        return err("empty");
    }
    if label.len() > BNS_MAX_NAME_LENGTH {
        return err("too long");
    }
    if !label.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-') {
        return err("only a-z, 0-9 and '-' are allowed");
    }
    if label.starts_with('-') || label.ends_with('-') {
        return err("cannot start or end with '-'");
    }
    Ok(lower)
}

/// Hash identifying a name on chain.
pub fn name_hash(normalized: &str) -> Hash {
    keccak256(normalized.as_bytes())
}

/// Check a plaintext service value before it is encrypted into a record.
pub fn validate_value(service: BnsService, value: &str, network: Network) -> Result<(), BnsError> {
    let err = |reason| Err(BnsError::InvalidValue { service, reason });
    match service {
        BnsService::Bchat => {
            if value.len() != BCHAT_ID_LEN || !value.starts_with("bd") {
                return err("expected 66 hex characters starting with 'bd'");
            }
            if hex::decode(value).is_err() {
                return err("not hex");
            }
        }
        BnsService::Wallet => {
            if Address::parse_for(value, network).is_err() {
                return err("not a valid address for this network");
            }
        }
        BnsService::Belnet => {
            let Some(key) = value.strip_suffix(BDX_SUFFIX) else {
                return err("must end with .bdx");
            };
            if key.len() != BELNET_KEY_LEN || !key.chars().all(|c| BASE32Z_ALPHABET.contains(c)) {
                return err("expected a 52 character base32z key");
            }
        }
    }
    Ok(())
}

// ── Records ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedValue {
    pub service: BnsService,
    pub nonce: [u8; 12],
    /// Hex ciphertext.
    pub ciphertext: String,
}

/// Name-service payload carried in a transaction's extra field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BnsExtra {
    pub name_hash: Hash,
    pub owner: Option<String>,
    pub backup_owner: Option<String>,
    pub years: Option<u8>,
    #[serde(default)]
    pub values: Vec<EncryptedValue>,
    /// Transaction that last touched the record (updates and renewals).
    pub prev_txid: Option<Hash>,
    /// Owner's signature over the update (updates only).
    pub signature: Option<Signature>,
}

impl BnsExtra {
    /// Bytes the owner signs for an update.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(b"bns-update");
        buf.extend_from_slice(&self.name_hash);
        if let Some(prev) = &self.prev_txid {
            buf.extend_from_slice(prev);
        }
        for field in [&self.owner, &self.backup_owner].into_iter().flatten() {
            buf.extend_from_slice(field.as_bytes());
        }
        for v in &self.values {
            buf.extend_from_slice(&v.nonce);
            buf.extend_from_slice(v.ciphertext.as_bytes());
        }
        buf
    }
}

/// A registered name as reported by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BnsRecordInfo {
    pub name_hash: Hash,
    pub owner: String,
    pub backup_owner: Option<String>,
    pub values: Vec<EncryptedValue>,
    pub txid: Hash,
    pub register_height: u64,
    pub update_height: u64,
    pub expiration_height: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::AddressType;

    #[test]
    fn test_mapping_years_forms() {
        assert_eq!(MappingYears::parse("1y").unwrap(), MappingYears::One);
        assert_eq!(MappingYears::parse("2").unwrap(), MappingYears::Two);
        assert_eq!(MappingYears::parse("5years").unwrap(), MappingYears::Five);
        assert_eq!(MappingYears::parse(" 10Year ").unwrap(), MappingYears::Ten);
        for bad in ["3y", "0", "", "y", "11years", "abc"] {
            assert!(MappingYears::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_burn_grows_with_years() {
        assert!(MappingYears::One.burn() > 0);
        assert!(MappingYears::Ten.burn() > MappingYears::Five.burn());
        assert_eq!(MappingYears::One.blocks(), 365 * 24 * 120);
    }

    #[test]
    fn test_name_normalization() {
        assert_eq!(normalize_name("Alice").unwrap(), "alice");
        assert_eq!(normalize_name("my-node.bdx").unwrap(), "my-node.bdx");
        assert!(normalize_name("-bad").is_err());
        assert!(normalize_name("bad-").is_err());
        assert!(normalize_name("sp ace").is_err());
        assert!(normalize_name("").is_err());
        assert!(normalize_name(&"a".repeat(64)).is_err());
        assert_eq!(name_hash("alice"), name_hash(&normalize_name("ALICE").unwrap()));
    }

    #[test]
    fn test_value_validation() {
        let bchat = format!("bd{}", "ab".repeat(32));
        assert!(validate_value(BnsService::Bchat, &bchat, Network::Mainnet).is_ok());
        assert!(validate_value(BnsService::Bchat, "bd12", Network::Mainnet).is_err());

        let addr = Address::new(Network::Mainnet, AddressType::Standard, [1; 32], [2; 32]).encode();
        assert!(validate_value(BnsService::Wallet, &addr, Network::Mainnet).is_ok());
        assert!(validate_value(BnsService::Wallet, &addr, Network::Testnet).is_err());

        let belnet = format!("{}.bdx", "y".repeat(52));
        assert!(validate_value(BnsService::Belnet, &belnet, Network::Mainnet).is_ok());
        assert!(validate_value(BnsService::Belnet, "abc.bdx", Network::Mainnet).is_err());
        assert!(validate_value(BnsService::Belnet, &"y".repeat(52), Network::Mainnet).is_err());
    }
}
