//! ed25519 primitives used by the Beldex wallet engine.
//!
//! Scalars and points are handled as `curve25519_dalek` types internally and
//! cross crate boundaries as compressed 32-byte arrays.

pub mod keys;
pub mod lsag;
pub mod schnorr;
pub mod subaddress;

use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::traits::IsIdentity;
use rand::RngCore;
use thiserror::Error;

pub use beldex_types::keccak256;
pub use curve25519_dalek::edwards::EdwardsPoint;
pub use curve25519_dalek::scalar::Scalar;

pub use keys::{
    decrypt_amount, derivation_to_scalar, derive_public_key, derive_secret_key, encrypt_amount,
    generate_key_derivation, generate_key_image, view_secret_from_spend, KeyPair,
};
pub use lsag::{lsag_ring_challenges, lsag_sign, lsag_verify};
pub use schnorr::{dleq_prove, dleq_verify, schnorr_sign, schnorr_verify};
pub use subaddress::{subaddress_secret, subaddress_spend_public, subaddress_view_public};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid point encoding")]
    InvalidPoint,

    #[error("non-canonical scalar")]
    InvalidScalar,

    #[error("invalid ring: {0}")]
    InvalidRing(&'static str),
}

// ─── Helpers ────────────────────────────────────────────────────────────────

pub fn decompress(bytes: &[u8; 32]) -> Result<EdwardsPoint, CryptoError> {
    CompressedEdwardsY(*bytes).decompress().ok_or(CryptoError::InvalidPoint)
}

pub fn compress(p: &EdwardsPoint) -> [u8; 32] {
    p.compress().to_bytes()
}

/// Parse a canonical scalar.
pub fn scalar_from_bytes(bytes: &[u8; 32]) -> Result<Scalar, CryptoError> {
    Option::<Scalar>::from(Scalar::from_canonical_bytes(*bytes)).ok_or(CryptoError::InvalidScalar)
}

pub fn scalar_from_hex(s: &str) -> Result<Scalar, CryptoError> {
    let bytes = hex::decode(s.trim()).map_err(|_| CryptoError::InvalidScalar)?;
    let arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidScalar)?;
    scalar_from_bytes(&arr)
}

/// Whether `bytes` is a valid point encoding.
pub fn is_valid_point(bytes: &[u8; 32]) -> bool {
    decompress(bytes).is_ok()
}

/// Hash to scalar: keccak256 of the concatenation, reduced mod L.
pub fn hash_to_scalar(data: &[&[u8]]) -> Scalar {
    let total: usize = data.iter().map(|d| d.len()).sum();
    let mut combined = Vec::with_capacity(total);
    for d in data {
        combined.extend_from_slice(d);
    }
    Scalar::from_bytes_mod_order(keccak256(&combined))
}

/// Hash to a prime-order point by try-and-increment over keccak, then
/// cofactor clearing.
pub fn hash_to_point(data: &[u8]) -> EdwardsPoint {
    let seed = keccak256(data);
    let mut buf = [0u8; 33];
    buf[..32].copy_from_slice(&seed);
    let mut counter = 0u8;
    loop {
        buf[32] = counter;
        let candidate = keccak256(&buf);
        if let Some(p) = CompressedEdwardsY(candidate).decompress() {
            let p = p.mul_by_cofactor();
            if !p.is_identity() {
                return p;
            }
        }
        // Rehash the seed after 256 attempts.
        counter = counter.wrapping_add(1);
        if counter == 0 {
            let rehashed = keccak256(&buf[..32]);
            buf[..32].copy_from_slice(&rehashed);
        }
    }
}

/// Uniformly random scalar.
pub fn random_scalar() -> Scalar {
    let mut bytes = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut bytes);
    Scalar::from_bytes_mod_order_wide(&bytes)
}

/// Random point with unknown discrete log relation to anything the caller holds.
pub fn random_point() -> [u8; 32] {
    compress(&EdwardsPoint::mul_base(&random_scalar()))
}

pub fn public_from_secret(secret: &Scalar) -> [u8; 32] {
    compress(&EdwardsPoint::mul_base(secret))
}
