//! Beldex transaction construction.
//!
//! Output and extra-field creation, ring signing, the fee model, decoy
//! selection and name-service value encryption. Input selection and
//! reservations live in the wallet; this crate turns a chosen set of inputs
//! and destinations into a signed transaction.

pub mod bns;
pub mod builder;
pub mod decoy;
pub mod fee;

pub use builder::{miner_transaction, Destination, PreparedInput, TransactionBuilder, TxSecretKeys, UnsignedTransaction};
pub use decoy::DecoySelector;
pub use fee::{estimate_fee_for_recipients, estimate_tx_fee, FeePriority};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TxError {
    #[error("invalid transaction: {0}")]
    Invalid(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("insufficient inputs: need {need}, have {have}")]
    InsufficientInputs { need: u64, have: u64 },

    #[error("no destinations specified")]
    NoDestinations,

    #[error("ring size mismatch: expected {expected}, got {got}")]
    RingSizeMismatch { expected: usize, got: usize },

    #[error("decoy selection failed: {0}")]
    DecoySelection(String),

    #[error("invalid priority {0}")]
    InvalidPriority(u32),

    #[error("name service error: {0}")]
    Bns(#[from] beldex_types::BnsError),

    #[error("crypto error: {0}")]
    Crypto(#[from] beldex_crypto::CryptoError),
}
