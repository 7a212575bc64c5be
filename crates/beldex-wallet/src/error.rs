//! Wallet error types.
//!
//! Every public wallet call returns `Result<_, WalletError>`;
//! [`WalletError::status`] gives the `(code, message)` pair hosts report.

use beldex_multisig::MultisigError;
use beldex_rpc::RpcError;
use beldex_tx::TxError;
use beldex_types::BnsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("insufficient funds: need {need}, have {have}")]
    InsufficientFunds { need: u64, have: u64 },

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("invalid mapping years: {0}")]
    InvalidMappingYears(String),

    #[error("invalid service node key: {0}")]
    InvalidServiceNodeKey(String),

    #[error("multisig round mismatch: {0}")]
    MultisigRoundMismatch(String),

    #[error("multisig already finalized")]
    MultisigAlreadyFinalized,

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("daemon unavailable: {0}")]
    DaemonUnavailable(String),

    /// The daemon answered, but with an error or a reply we cannot use.
    #[error("daemon error: {0}")]
    DaemonProtocol(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("critical internal error: {0}")]
    CriticalInternal(String),

    #[error("wallet is watch-only, cannot {0}")]
    WatchOnly(&'static str),

    #[error("invalid priority {0}")]
    InvalidPriority(u32),

    #[error("invalid name: {0}")]
    InvalidBnsName(String),

    #[error("name not registered: {0}")]
    BnsNotFound(String),

    #[error("invalid ring: {0}")]
    InvalidRing(String),

    #[error("multisig error: {0}")]
    Multisig(String),

    #[error("wallet is not multisig")]
    NotMultisig,

    #[error("no stake to service node {0}")]
    StakeNotFound(String),

    #[error("transaction already submitted")]
    AlreadySubmitted,

    #[error("daemon rejected transaction: {0}")]
    Rejected(String),

    #[error("keystore error: {0}")]
    Keystore(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("transaction not found: {0}")]
    TxNotFound(String),
}

impl WalletError {
    /// Stable numeric code per variant; 0 is reserved for success.
    pub fn code(&self) -> i32 {
        match self {
            WalletError::InsufficientFunds { .. } => 1,
            WalletError::InvalidDestination(_) => 2,
            WalletError::InvalidMappingYears(_) => 3,
            WalletError::InvalidServiceNodeKey(_) => 4,
            WalletError::MultisigRoundMismatch(_) => 5,
            WalletError::MultisigAlreadyFinalized => 6,
            WalletError::InvalidSignature(_) => 7,
            WalletError::DaemonUnavailable(_) => 8,
            WalletError::Timeout(_) => 9,
            WalletError::CriticalInternal(_) => 10,
            WalletError::WatchOnly(_) => 11,
            WalletError::InvalidPriority(_) => 12,
            WalletError::InvalidBnsName(_) => 13,
            WalletError::BnsNotFound(_) => 14,
            WalletError::InvalidRing(_) => 15,
            WalletError::Multisig(_) => 16,
            WalletError::NotMultisig => 17,
            WalletError::StakeNotFound(_) => 18,
            WalletError::AlreadySubmitted => 19,
            WalletError::Rejected(_) => 20,
            WalletError::Keystore(_) => 21,
            WalletError::Config(_) => 22,
            WalletError::TxNotFound(_) => 23,
            WalletError::DaemonProtocol(_) => 24,
        }
    }

    pub fn status(&self) -> (i32, String) {
        (self.code(), self.to_string())
    }

    /// Failures the synchronizer retries instead of surfacing.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletError::DaemonUnavailable(_) | WalletError::Timeout(_))
    }
}

/// `(code, message)` for a result, `(0, "")` on success.
pub fn status_of<T>(result: &Result<T, WalletError>) -> (i32, String) {
    match result {
        Ok(_) => (0, String::new()),
        Err(e) => e.status(),
    }
}

impl From<RpcError> for WalletError {
    fn from(e: RpcError) -> Self {
        if e.is_timeout() {
            WalletError::Timeout(e.to_string())
        } else if e.is_retryable() {
            WalletError::DaemonUnavailable(e.to_string())
        } else {
            WalletError::DaemonProtocol(e.to_string())
        }
    }
}

impl From<BnsError> for WalletError {
    fn from(e: BnsError) -> Self {
        match e {
            BnsError::InvalidYears(y) => WalletError::InvalidMappingYears(y),
            BnsError::InvalidValue { .. } => WalletError::InvalidDestination(e.to_string()),
            other => WalletError::InvalidBnsName(other.to_string()),
        }
    }
}

impl From<TxError> for WalletError {
    fn from(e: TxError) -> Self {
        match e {
            TxError::InsufficientInputs { need, have } => WalletError::InsufficientFunds { need, have },
            TxError::NoDestinations | TxError::Invalid(_) => WalletError::InvalidDestination(e.to_string()),
            TxError::InvalidPriority(p) => WalletError::InvalidPriority(p),
            TxError::RingSizeMismatch { .. } | TxError::DecoySelection(_) => WalletError::InvalidRing(e.to_string()),
            TxError::Bns(b) => b.into(),
            TxError::Signing(_) | TxError::Crypto(_) => WalletError::CriticalInternal(e.to_string()),
        }
    }
}

impl From<MultisigError> for WalletError {
    fn from(e: MultisigError) -> Self {
        match e {
            MultisigError::RoundMismatch(m) => WalletError::MultisigRoundMismatch(m),
            MultisigError::AlreadyFinalized => WalletError::MultisigAlreadyFinalized,
            MultisigError::InvalidMessage(m) => WalletError::InvalidSignature(m),
            other => WalletError::Multisig(other.to_string()),
        }
    }
}

impl From<beldex_crypto::CryptoError> for WalletError {
    fn from(e: beldex_crypto::CryptoError) -> Self {
        WalletError::CriticalInternal(e.to_string())
    }
}
