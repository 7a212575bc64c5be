//! CryptoNote subaddress derivation.

use crate::{compress, decompress, hash_to_scalar, CryptoError};
use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;

/// Subaddress secret offset:
///   m = H_s("SubAddr\0" || view_secret || major_LE || minor_LE)
pub fn subaddress_secret(view_secret: &Scalar, major: u32, minor: u32) -> Scalar {
    hash_to_scalar(&[
        b"SubAddr\0",
        view_secret.as_bytes(),
        &major.to_le_bytes(),
        &minor.to_le_bytes(),
    ])
}

/// Subaddress spend public key:
///   D = B + m*G   (for non-zero indices)
///   D = B         (for 0,0)
pub fn subaddress_spend_public(
    spend_public: &[u8; 32],
    view_secret: &Scalar,
    major: u32,
    minor: u32,
) -> Result<[u8; 32], CryptoError> {
    if major == 0 && minor == 0 {
        return Ok(*spend_public);
    }
    let b = decompress(spend_public)?;
    let m = subaddress_secret(view_secret, major, minor);
    Ok(compress(&(b + EdwardsPoint::mul_base(&m))))
}

/// Subaddress view public key `C = a * D`.
pub fn subaddress_view_public(view_secret: &Scalar, sub_spend_public: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
    let d = decompress(sub_spend_public)?;
    Ok(compress(&(view_secret * d)))
}
