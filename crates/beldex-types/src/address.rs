//! Beldex address parsing and creation.

use crate::base58::{self, Base58Error};
use crate::constants::{get_prefix, prefix_info, AddressType, Network, KEY_SIZE};
use crate::PublicKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("address must be a non-empty string")]
    Empty,

    #[error("base58 decode error: {0}")]
    Base58(#[from] Base58Error),

    #[error("unknown address prefix: 0x{0:x}")]
    UnknownPrefix(u64),

    #[error("invalid data length: expected {expected} bytes, got {actual}")]
    InvalidDataLength { expected: usize, actual: usize },

    #[error("address is for {actual:?}, expected {expected:?}")]
    WrongNetwork { expected: Network, actual: Network },
}

/// A decoded public address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub network: Network,
    pub address_type: AddressType,
    pub spend_public_key: PublicKey,
    pub view_public_key: PublicKey,
}

impl Address {
    pub fn new(
        network: Network,
        address_type: AddressType,
        spend_public_key: PublicKey,
        view_public_key: PublicKey,
    ) -> Self {
        Self { network, address_type, spend_public_key, view_public_key }
    }

    pub fn is_subaddress(&self) -> bool {
        self.address_type == AddressType::Subaddress
    }

    /// Parse an address string without checking the network.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AddressError::Empty);
        }
        let (tag, data) = base58::decode_check(s)?;
        let info = prefix_info(tag).ok_or(AddressError::UnknownPrefix(tag))?;
        if data.len() != KEY_SIZE * 2 {
            return Err(AddressError::InvalidDataLength {
                expected: KEY_SIZE * 2,
                actual: data.len(),
            });
        }
        let mut spend = [0u8; 32];
        let mut view = [0u8; 32];
        spend.copy_from_slice(&data[..32]);
        view.copy_from_slice(&data[32..]);
        Ok(Self::new(info.network, info.address_type, spend, view))
    }

    /// Parse and require a specific network.
    pub fn parse_for(s: &str, network: Network) -> Result<Self, AddressError> {
        let addr = Self::parse(s)?;
        if addr.network != network {
            return Err(AddressError::WrongNetwork { expected: network, actual: addr.network });
        }
        Ok(addr)
    }

    pub fn encode(&self) -> String {
        let mut data = Vec::with_capacity(KEY_SIZE * 2);
        data.extend_from_slice(&self.spend_public_key);
        data.extend_from_slice(&self.view_public_key);
        base58::encode_check(get_prefix(self.network, self.address_type), &data)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Whether `s` parses as an address on `network`.
pub fn is_valid_address(s: &str, network: Network) -> bool {
    Address::parse_for(s, network).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(network: Network, address_type: AddressType) -> Address {
        Address::new(network, address_type, [0x11; 32], [0x22; 32])
    }

    #[test]
    fn test_encode_parse_all_prefixes() {
        for network in [Network::Mainnet, Network::Testnet, Network::Devnet] {
            for ty in [AddressType::Standard, AddressType::Subaddress] {
                let addr = sample(network, ty);
                let parsed: Address = addr.to_string().parse().unwrap();
                assert_eq!(parsed, addr);
            }
        }
    }

    #[test]
    fn test_wrong_network_rejected() {
        let s = sample(Network::Testnet, AddressType::Standard).encode();
        assert!(matches!(
            Address::parse_for(&s, Network::Mainnet),
            Err(AddressError::WrongNetwork { .. })
        ));
        assert!(is_valid_address(&s, Network::Testnet));
    }

    #[test]
    fn test_empty_and_garbage() {
        assert!(matches!(Address::parse(""), Err(AddressError::Empty)));
        assert!(Address::parse("not-an-address").is_err());
    }

    #[test]
    fn test_wrong_payload_length() {
        let s = base58::encode_check(0xd1, &[0u8; 40]);
        assert!(matches!(
            Address::parse(&s),
            Err(AddressError::InvalidDataLength { expected: 64, actual: 40 })
        ));
    }
}
