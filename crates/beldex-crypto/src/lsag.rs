//! LSAG (linkable spontaneous anonymous group) ring signatures.
//!
//! Ring closure is split out as [`lsag_ring_challenges`] so multisig signers
//! can agree on the challenge for aggregated nonces before each contributes
//! its share of the real response.

use crate::{compress, decompress, hash_to_point, hash_to_scalar, random_scalar, scalar_from_bytes, CryptoError};
use beldex_types::RingSignature;
use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;

fn round_hash(message: &[u8; 32], l: &EdwardsPoint, r: &EdwardsPoint) -> Scalar {
    hash_to_scalar(&[message, &compress(l), &compress(r)])
}

fn decompress_ring(ring: &[[u8; 32]]) -> Result<Vec<EdwardsPoint>, CryptoError> {
    if ring.is_empty() {
        return Err(CryptoError::InvalidRing("empty ring"));
    }
    ring.iter().map(decompress).collect()
}

/// Walk the ring starting from the real member's commitments `(L, R)`.
///
/// `responses` holds the response for every index; the entry at `real` is
/// ignored. Returns `(c_0, c_real)`: the challenge stored in the signature
/// and the challenge the real response must be computed against.
pub fn lsag_ring_challenges(
    message: &[u8; 32],
    ring: &[[u8; 32]],
    key_image: &[u8; 32],
    real: usize,
    l_real: &EdwardsPoint,
    r_real: &EdwardsPoint,
    responses: &[Scalar],
) -> Result<(Scalar, Scalar), CryptoError> {
    let points = decompress_ring(ring)?;
    let image = decompress(key_image)?;
    let n = points.len();
    if real >= n {
        return Err(CryptoError::InvalidRing("real index out of range"));
    }
    if responses.len() != n {
        return Err(CryptoError::InvalidRing("response count mismatch"));
    }

    let mut c = round_hash(message, l_real, r_real);
    let mut i = (real + 1) % n;
    let mut c0 = c;
    while i != real {
        let l = EdwardsPoint::vartime_double_scalar_mul_basepoint(&c, &points[i], &responses[i]);
        let r = responses[i] * hash_to_point(&ring[i]) + c * image;
        c = round_hash(message, &l, &r);
        i = (i + 1) % n;
        if i == 0 {
            c0 = c;
        }
    }
    Ok((c0, c))
}

/// Sign `message` with the secret for `ring[real]`.
pub fn lsag_sign(
    message: &[u8; 32],
    ring: &[[u8; 32]],
    real: usize,
    secret: &Scalar,
) -> Result<RingSignature, CryptoError> {
    let n = ring.len();
    if real >= n {
        return Err(CryptoError::InvalidRing("real index out of range"));
    }
    if EdwardsPoint::mul_base(secret) != decompress(&ring[real])? {
        return Err(CryptoError::InvalidRing("secret does not match ring member"));
    }
    let hp = hash_to_point(&ring[real]);
    let key_image = compress(&(secret * hp));

    let alpha = random_scalar();
    let mut responses: Vec<Scalar> = (0..n).map(|_| random_scalar()).collect();
    let (c0, c_real) = lsag_ring_challenges(
        message,
        ring,
        &key_image,
        real,
        &EdwardsPoint::mul_base(&alpha),
        &(alpha * hp),
        &responses,
    )?;
    responses[real] = alpha - c_real * secret;

    Ok(RingSignature {
        c0: c0.to_bytes(),
        s: responses.iter().map(|s| s.to_bytes()).collect(),
    })
}

/// Verify a ring signature for the given ring and key image.
pub fn lsag_verify(message: &[u8; 32], ring: &[[u8; 32]], key_image: &[u8; 32], sig: &RingSignature) -> bool {
    if ring.is_empty() || sig.s.len() != ring.len() {
        return false;
    }
    let Ok(points) = decompress_ring(ring) else {
        return false;
    };
    let Ok(image) = decompress(key_image) else {
        return false;
    };
    if !image.is_torsion_free() {
        return false;
    }
    let Ok(c0) = scalar_from_bytes(&sig.c0) else {
        return false;
    };

    let mut c = c0;
    for (i, point) in points.iter().enumerate() {
        let Ok(s) = scalar_from_bytes(&sig.s[i]) else {
            return false;
        };
        let l = EdwardsPoint::vartime_double_scalar_mul_basepoint(&c, point, &s);
        let r = s * hash_to_point(&ring[i]) + c * image;
        c = round_hash(message, &l, &r);
    }
    c == c0
}
