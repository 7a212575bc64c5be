//! Schnorr signatures and discrete-log-equality proofs.
//!
//! Both produce a `(c, s)` pair with `s = k - c*x`; verification rebuilds the
//! commitment(s) from `s*Base + c*Public` and recomputes the challenge.

use crate::{compress, decompress, hash_to_scalar, random_scalar, scalar_from_bytes};
use beldex_types::Signature;
use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;

/// Sign `message` with `secret`, whose public key is `public`.
pub fn schnorr_sign(message: &[u8; 32], public: &[u8; 32], secret: &Scalar) -> Signature {
    let k = random_scalar();
    let commitment = compress(&EdwardsPoint::mul_base(&k));
    let c = hash_to_scalar(&[message, public, &commitment]);
    let s = k - c * secret;
    Signature { c: c.to_bytes(), s: s.to_bytes() }
}

pub fn schnorr_verify(message: &[u8; 32], public: &[u8; 32], sig: &Signature) -> bool {
    let (Ok(p), Ok(c), Ok(s)) = (decompress(public), scalar_from_bytes(&sig.c), scalar_from_bytes(&sig.s)) else {
        return false;
    };
    let commitment = EdwardsPoint::vartime_double_scalar_mul_basepoint(&c, &p, &s);
    hash_to_scalar(&[message, public, &compress(&commitment)]) == c
}

/// Prove that `x*g1` and `x*g2` share the same discrete log `x`.
pub fn dleq_prove(message: &[u8], g1: &EdwardsPoint, g2: &EdwardsPoint, x: &Scalar) -> Signature {
    let p1 = x * g1;
    let p2 = x * g2;
    let k = random_scalar();
    let c = dleq_challenge(message, g1, &p1, g2, &p2, &(k * g1), &(k * g2));
    let s = k - c * x;
    Signature { c: c.to_bytes(), s: s.to_bytes() }
}

pub fn dleq_verify(
    message: &[u8],
    g1: &EdwardsPoint,
    p1: &EdwardsPoint,
    g2: &EdwardsPoint,
    p2: &EdwardsPoint,
    sig: &Signature,
) -> bool {
    let (Ok(c), Ok(s)) = (scalar_from_bytes(&sig.c), scalar_from_bytes(&sig.s)) else {
        return false;
    };
    let k1 = s * g1 + c * p1;
    let k2 = s * g2 + c * p2;
    dleq_challenge(message, g1, p1, g2, p2, &k1, &k2) == c
}

fn dleq_challenge(
    message: &[u8],
    g1: &EdwardsPoint,
    p1: &EdwardsPoint,
    g2: &EdwardsPoint,
    p2: &EdwardsPoint,
    k1: &EdwardsPoint,
    k2: &EdwardsPoint,
) -> Scalar {
    hash_to_scalar(&[
        b"dleq",
        message,
        &compress(g1),
        &compress(p1),
        &compress(g2),
        &compress(p2),
        &compress(k1),
        &compress(k2),
    ])
}
