//! Partial key images.
//!
//! The key image of a multisig output is `(h + x) * Hp(P)` where `h` is the
//! output's derivation scalar (known to every participant through the shared
//! view key) and `x` the spend secret split over the signer groups. Each
//! participant publishes `z_T * Hp(P)` for its groups with a DLEQ proof
//! against the group key; once every group is covered anyone can assemble
//! the full image.

use crate::account::MultisigKeys;
use crate::MultisigError;
use beldex_crypto::{compress, decompress, dleq_prove, dleq_verify, hash_to_point, EdwardsPoint, Scalar};
use beldex_types::{KeyImage, PublicKey, Signature};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialKeyImage {
    pub output_key: PublicKey,
    /// Group the contribution belongs to.
    pub members: Vec<PublicKey>,
    pub image: [u8; 32],
    pub proof: Signature,
}

impl MultisigKeys {
    /// One partial image per group this participant belongs to.
    pub fn partial_key_images(&self, output_key: &PublicKey) -> Vec<PartialKeyImage> {
        let hp = hash_to_point(output_key);
        let g = EdwardsPoint::mul_base(&Scalar::ONE);
        self.shares
            .iter()
            .map(|share| PartialKeyImage {
                output_key: *output_key,
                members: share.members.clone(),
                image: compress(&(share.secret * hp)),
                proof: dleq_prove(output_key, &g, &hp, &share.secret),
            })
            .collect()
    }

    /// Check a peer's contribution against the group key it claims.
    pub fn verify_partial_key_image(&self, partial: &PartialKeyImage) -> bool {
        let Some(group_key) = self.group_key(&partial.members) else {
            return false;
        };
        let (Ok(key), Ok(image)) = (decompress(group_key), decompress(&partial.image)) else {
            return false;
        };
        let g = EdwardsPoint::mul_base(&Scalar::ONE);
        let hp = hash_to_point(&partial.output_key);
        dleq_verify(&partial.output_key, &g, &key, &hp, &image, &partial.proof)
    }

    /// Assemble the key image of `output_key` from partials covering every
    /// group. `base_secret` is the output's derivation scalar (plus any
    /// subaddress offset).
    pub fn combine_key_image(
        &self,
        output_key: &PublicKey,
        base_secret: &Scalar,
        partials: &[PartialKeyImage],
    ) -> Result<KeyImage, MultisigError> {
        let mut by_group: BTreeMap<&[PublicKey], &PartialKeyImage> = BTreeMap::new();
        for p in partials.iter().filter(|p| &p.output_key == output_key) {
            by_group.entry(p.members.as_slice()).or_insert(p);
        }
        let hp = hash_to_point(output_key);
        let mut image = base_secret * hp;
        for group in &self.group_keys {
            let partial = by_group
                .get(group.members.as_slice())
                .ok_or_else(|| MultisigError::Signing("partial key images are incomplete".into()))?;
            image += decompress(&partial.image)?;
        }
        Ok(compress(&image))
    }
}
