//! M-of-N multisig for the Beldex wallet engine.
//!
//! [`KexSession`] runs the key exchange, [`MultisigKeys`] is the finalized
//! account (signing shares and partial key images) and [`MultisigTxSet`]
//! carries a transaction through two-pass signing.

pub mod account;
pub mod constants;
pub mod images;
pub mod kex;
pub mod tx_set;

pub use account::{GroupKey, GroupShare, MultisigKeys};
pub use constants::{group_size, kex_rounds_required, MultisigMsgType};
pub use images::PartialKeyImage;
pub use kex::{check_params, KexMessage, KexSession};
pub use tx_set::{MultisigInput, MultisigTxSet, SignerRecord};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MultisigError {
    #[error("invalid multisig parameters: {0}")]
    InvalidParams(String),

    #[error("multisig round mismatch: {0}")]
    RoundMismatch(String),

    #[error("multisig already finalized")]
    AlreadyFinalized,

    #[error("invalid multisig message: {0}")]
    InvalidMessage(String),

    #[error("key exchange failed: {0}")]
    Kex(String),

    #[error("multisig signing error: {0}")]
    Signing(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] beldex_crypto::CryptoError),
}
