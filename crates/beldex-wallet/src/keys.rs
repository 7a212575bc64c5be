//! Wallet key management.
//!
//! CryptoNote spend/view key pairs, subaddress derivation and the one-time
//! secrets of owned outputs. Full wallets hold the spend secret; view-only
//! wallets scan but cannot spend; multisig wallets hold only the shared
//! view key and spend through the multisig coordinator.

use crate::error::WalletError;
use beldex_crypto::{
    derivation_to_scalar, generate_key_image, is_valid_point, public_from_secret, random_scalar,
    subaddress_secret, subaddress_spend_public, subaddress_view_public, view_secret_from_spend, Scalar,
};
use beldex_multisig::MultisigKeys;
use beldex_types::{Address, AddressType, KeyImage, Network, PublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wallet capability level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletType {
    /// Can scan and spend.
    Full,
    /// Can scan outputs but cannot spend.
    ViewOnly,
    /// Spend authority is shared with co-signers.
    Multisig,
}

/// Position of a subaddress: account (major) and address (minor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct SubaddressIndex {
    pub major: u32,
    pub minor: u32,
}

impl SubaddressIndex {
    pub const PRIMARY: SubaddressIndex = SubaddressIndex { major: 0, minor: 0 };

    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn is_primary(&self) -> bool {
        self.major == 0 && self.minor == 0
    }
}

impl fmt::Display for SubaddressIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.major, self.minor)
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletKeys {
    pub wallet_type: WalletType,
    pub network: Network,
    pub spend_secret: Option<Scalar>,
    pub spend_public: PublicKey,
    pub view_secret: Scalar,
    pub view_public: PublicKey,
}

impl fmt::Debug for WalletKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletKeys")
            .field("wallet_type", &self.wallet_type)
            .field("network", &self.network)
            .field("spend_public", &hex::encode(self.spend_public))
            .finish_non_exhaustive()
    }
}

impl WalletKeys {
    /// Fresh random keys.
    pub fn generate(network: Network) -> Self {
        Self::from_spend_secret(random_scalar(), network)
    }

    /// Full wallet; the view key is derived from the spend key.
    pub fn from_spend_secret(spend_secret: Scalar, network: Network) -> Self {
        let view_secret = view_secret_from_spend(&spend_secret);
        Self {
            wallet_type: WalletType::Full,
            network,
            spend_secret: Some(spend_secret),
            spend_public: public_from_secret(&spend_secret),
            view_secret,
            view_public: public_from_secret(&view_secret),
        }
    }

    pub fn view_only(view_secret: Scalar, spend_public: PublicKey, network: Network) -> Result<Self, WalletError> {
        if !is_valid_point(&spend_public) {
            return Err(WalletError::InvalidDestination("spend public key is not a valid point".into()));
        }
        Ok(Self {
            wallet_type: WalletType::ViewOnly,
            network,
            spend_secret: None,
            spend_public,
            view_secret,
            view_public: public_from_secret(&view_secret),
        })
    }

    /// Keys of a finalized multisig account.
    pub fn multisig(keys: &MultisigKeys, network: Network) -> Self {
        Self {
            wallet_type: WalletType::Multisig,
            network,
            spend_secret: None,
            spend_public: keys.spend_public,
            view_secret: keys.view_secret,
            view_public: keys.view_public(),
        }
    }

    pub fn is_watch_only(&self) -> bool {
        self.wallet_type == WalletType::ViewOnly
    }

    pub fn is_multisig(&self) -> bool {
        self.wallet_type == WalletType::Multisig
    }

    pub fn spend_secret(&self, operation: &'static str) -> Result<&Scalar, WalletError> {
        match (&self.spend_secret, self.wallet_type) {
            (Some(s), _) => Ok(s),
            (None, WalletType::Multisig) => Err(WalletError::Multisig(format!("cannot {operation} alone"))),
            (None, _) => Err(WalletError::WatchOnly(operation)),
        }
    }

    pub fn primary_address(&self) -> Address {
        Address::new(self.network, AddressType::Standard, self.spend_public, self.view_public)
    }

    /// Spend public key of a subaddress (the primary key for 0/0).
    pub fn subaddress_spend_key(&self, index: SubaddressIndex) -> Result<PublicKey, WalletError> {
        Ok(subaddress_spend_public(&self.spend_public, &self.view_secret, index.major, index.minor)?)
    }

    pub fn subaddress(&self, index: SubaddressIndex) -> Result<Address, WalletError> {
        if index.is_primary() {
            return Ok(self.primary_address());
        }
        let spend = self.subaddress_spend_key(index)?;
        let view = subaddress_view_public(&self.view_secret, &spend)?;
        Ok(Address::new(self.network, AddressType::Subaddress, spend, view))
    }

    /// Secret offset `m` of a subaddress (zero for the primary address).
    pub fn subaddress_offset(&self, index: SubaddressIndex) -> Scalar {
        if index.is_primary() {
            Scalar::ZERO
        } else {
            subaddress_secret(&self.view_secret, index.major, index.minor)
        }
    }

    /// The part of an output's one-time secret known from the view key:
    /// `Hs(D || i) + m`.
    pub fn output_base_secret(&self, derivation: &[u8; 32], output_index: u64, index: SubaddressIndex) -> Scalar {
        derivation_to_scalar(derivation, output_index) + self.subaddress_offset(index)
    }

    /// Full one-time secret; `None` without the spend key.
    pub fn output_secret(&self, derivation: &[u8; 32], output_index: u64, index: SubaddressIndex) -> Option<Scalar> {
        self.spend_secret.map(|b| self.output_base_secret(derivation, output_index, index) + b)
    }

    pub fn key_image(
        &self,
        output_key: &PublicKey,
        derivation: &[u8; 32],
        output_index: u64,
        index: SubaddressIndex,
    ) -> Option<KeyImage> {
        self.output_secret(derivation, output_index, index).map(|x| generate_key_image(output_key, &x))
    }
}
