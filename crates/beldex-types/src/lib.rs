//! Core types and constants for the Beldex wallet engine.
//!
//! Network parameters, CryptoNote base58 and address encoding, the chain
//! data model shared by the daemon client and the wallet, and name-service
//! record types.

pub mod address;
pub mod base58;
pub mod bns;
pub mod chain;
pub mod constants;

use tiny_keccak::{Hasher, Keccak};

pub use address::{is_valid_address, Address, AddressError};
pub use bns::{BnsError, BnsExtra, BnsRecordInfo, BnsService, EncryptedValue, MappingYears};
pub use chain::{
    absolute_to_relative, relative_to_absolute, Block, BlockHash, ChainError, RingSignature,
    Signature, StakeExtra, Transaction, TxEntry, TxExtra, TxInput, TxOutput, TxType, UnlockExtra,
};
pub use constants::{AddressType, Network};

/// 32-byte hash (transaction id, block id, name hash).
pub type Hash = [u8; 32];
/// Compressed ed25519 point.
pub type PublicKey = [u8; 32];
/// Compressed key image point.
pub type KeyImage = [u8; 32];

/// Keccak-256 (the pre-standard variant CryptoNote uses).
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut keccak = Keccak::v256();
    let mut output = [0u8; 32];
    keccak.update(data);
    keccak.finalize(&mut output);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak_empty() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }
}
