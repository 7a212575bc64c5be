//! Beldex wallet engine.
//!
//! Guards the wallet state, keeps it in step with the daemon on a background
//! thread, and builds, co-signs and proves transactions against it. Storage
//! goes through a [`Keystore`]; the daemon through
//! [`beldex_rpc::DaemonClient`].

pub mod config;
mod core;
pub mod error;
pub mod guard;
pub mod key_images;
pub mod keys;
pub mod keystore;
pub mod listener;
pub mod multisig;
pub mod progress;
pub mod proofs;
pub mod scanner;
pub mod state;
pub mod sync;
pub mod transfer;
pub mod wallet;

pub use config::WalletConfig;
pub use error::{status_of, WalletError};
pub use key_images::{ColdSigner, ExportedOutput, KeyImageImport, KeysColdSigner};
pub use keys::{SubaddressIndex, WalletKeys, WalletType};
pub use keystore::{FileKeystore, Keystore};
pub use listener::{WalletEvent, WalletListener};
pub use multisig::MultisigStatus;
pub use progress::SyncState;
pub use proofs::{ReserveProofCheck, TxKeyCheck, TxProofCheck};
pub use state::{ConnectionStatus, OwnedOutput, StakeRecord, TransferDirection, TransferRecord, WalletState};
pub use sync::Synchronizer;
pub use transfer::{estimate_transaction_fee, BuiltTx, PendingKind, PendingTransaction};
pub use wallet::Wallet;

pub use beldex_tx::bns::BnsValues;
