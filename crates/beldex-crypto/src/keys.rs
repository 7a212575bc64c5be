//! Key pairs, output key derivation, key images and amount masking.

use crate::{compress, decompress, hash_to_point, hash_to_scalar, random_scalar, CryptoError};
use beldex_types::base58::write_varint;
use beldex_types::keccak256;
use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;

/// Secret scalar with its compressed public point.
#[derive(Clone)]
pub struct KeyPair {
    pub secret: Scalar,
    pub public: [u8; 32],
}

impl KeyPair {
    pub fn generate() -> Self {
        Self::from_secret(random_scalar())
    }

    pub fn from_secret(secret: Scalar) -> Self {
        let public = compress(&EdwardsPoint::mul_base(&secret));
        Self { secret, public }
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair").field("public", &hex::encode(self.public)).finish_non_exhaustive()
    }
}

/// View secret derived deterministically from the spend secret.
pub fn view_secret_from_spend(spend: &Scalar) -> Scalar {
    hash_to_scalar(&[spend.as_bytes()])
}

/// Shared secret `8 * sec * pub`.
pub fn generate_key_derivation(public: &[u8; 32], secret: &Scalar) -> Result<[u8; 32], CryptoError> {
    let point = decompress(public)?;
    Ok(compress(&(secret * point).mul_by_cofactor()))
}

/// `H_s(derivation || varint(index))`.
pub fn derivation_to_scalar(derivation: &[u8; 32], index: u64) -> Scalar {
    let mut buf = Vec::with_capacity(42);
    buf.extend_from_slice(derivation);
    write_varint(index, &mut buf);
    hash_to_scalar(&[&buf])
}

/// One-time output key `H_s(D || i) G + base`.
pub fn derive_public_key(derivation: &[u8; 32], index: u64, base: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
    let base = decompress(base)?;
    let scalar = derivation_to_scalar(derivation, index);
    Ok(compress(&(EdwardsPoint::mul_base(&scalar) + base)))
}

/// One-time output secret `H_s(D || i) + base`.
pub fn derive_secret_key(derivation: &[u8; 32], index: u64, base: &Scalar) -> Scalar {
    derivation_to_scalar(derivation, index) + base
}

/// Recover the spend public key an output was sent to: `P - H_s(D || i) G`.
pub fn derive_subaddress_public_key(
    output_key: &[u8; 32],
    derivation: &[u8; 32],
    index: u64,
) -> Result<[u8; 32], CryptoError> {
    let p = decompress(output_key)?;
    let scalar = derivation_to_scalar(derivation, index);
    Ok(compress(&(p - EdwardsPoint::mul_base(&scalar))))
}

/// Key image `x * H_p(P)`.
pub fn generate_key_image(public: &[u8; 32], secret: &Scalar) -> [u8; 32] {
    compress(&(secret * hash_to_point(public)))
}

fn amount_mask(derivation: &[u8; 32], index: u64) -> [u8; 8] {
    let scalar = derivation_to_scalar(derivation, index);
    let mut data = Vec::with_capacity(38);
    data.extend_from_slice(b"amount");
    data.extend_from_slice(scalar.as_bytes());
    let hash = keccak256(&data);
    let mut mask = [0u8; 8];
    mask.copy_from_slice(&hash[..8]);
    mask
}

pub fn encrypt_amount(amount: u64, derivation: &[u8; 32], index: u64) -> [u8; 8] {
    let mask = amount_mask(derivation, index);
    let mut out = amount.to_le_bytes();
    for (b, m) in out.iter_mut().zip(mask) {
        *b ^= m;
    }
    out
}

pub fn decrypt_amount(encrypted: &[u8; 8], derivation: &[u8; 32], index: u64) -> u64 {
    let mask = amount_mask(derivation, index);
    let mut out = *encrypted;
    for (b, m) in out.iter_mut().zip(mask) {
        *b ^= m;
    }
    u64::from_le_bytes(out)
}
