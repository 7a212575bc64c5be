use crate::MultisigError;
use beldex_crypto::{compress, EdwardsPoint, Scalar};
use beldex_types::{Address, AddressType, Network, PublicKey};
use serde::{Deserialize, Serialize};

/// Public key of one signer group (members sorted by signer key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupKey {
    pub members: Vec<PublicKey>,
    pub key: PublicKey,
}

/// Secret shared by the members of one group.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupShare {
    pub members: Vec<PublicKey>,
    pub secret: Scalar,
}

impl std::fmt::Debug for GroupShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupShare").field("members", &self.members.len()).finish_non_exhaustive()
    }
}

/// A finalized multisig account as held by one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigKeys {
    pub threshold: usize,
    /// This participant's signer key.
    pub signer: PublicKey,
    /// All signer keys, sorted.
    pub signers: Vec<PublicKey>,
    /// Shares of the groups this participant belongs to.
    pub shares: Vec<GroupShare>,
    /// Every group's public key; they sum to `spend_public`.
    pub group_keys: Vec<GroupKey>,
    pub spend_public: PublicKey,
    pub view_secret: Scalar,
}

impl MultisigKeys {
    pub fn total(&self) -> usize {
        self.signers.len()
    }

    pub fn view_public(&self) -> PublicKey {
        compress(&EdwardsPoint::mul_base(&self.view_secret))
    }

    pub fn address(&self, network: Network) -> Address {
        Address::new(network, AddressType::Standard, self.spend_public, self.view_public())
    }

    pub fn group_key(&self, members: &[PublicKey]) -> Option<&PublicKey> {
        self.group_keys.iter().find(|g| g.members == members).map(|g| &g.key)
    }

    /// Sum of the shares this participant contributes when `signing` sign
    /// together. Each group is covered by its first member (in signer order)
    /// that is signing, so the contributions of all `signing` add up to the
    /// full spend secret.
    pub fn signing_share(&self, signing: &[PublicKey]) -> Result<Scalar, MultisigError> {
        if signing.len() < self.threshold {
            return Err(MultisigError::Signing(format!(
                "{} signers, threshold is {}",
                signing.len(),
                self.threshold
            )));
        }
        if !signing.contains(&self.signer) {
            return Err(MultisigError::Signing("this participant is not in the signing set".into()));
        }
        if let Some(unknown) = signing.iter().find(|s| !self.signers.contains(s)) {
            return Err(MultisigError::Signing(format!("unknown signer {}", hex::encode(unknown))));
        }
        let mut total = Scalar::ZERO;
        for share in &self.shares {
            let owner = share
                .members
                .iter()
                .find(|m| signing.contains(m))
                .ok_or_else(|| MultisigError::Signing("a signer group has no signing member".into()))?;
            if *owner == self.signer {
                total += share.secret;
            }
        }
        Ok(total)
    }
}
