//! Two-pass multisig signing.
//!
//! Pass one: `threshold` signers each commit nonces `(a*G, a*Hp(P))` for
//! every input. Once the set is full, everyone derives the same ring
//! challenges from the aggregated nonces and fixed decoy responses.
//! Pass two: each signer adds `s_j = a_j - c*x_j`; the finalizer sums the
//! shares and removes the output's derivation part, yielding ordinary LSAG
//! signatures.

use crate::account::MultisigKeys;
use crate::constants::MULTISIG_TX_SET_PREFIX;
use crate::MultisigError;
use beldex_crypto::{
    compress, decompress, hash_to_point, hash_to_scalar, lsag_ring_challenges, lsag_verify, random_scalar, EdwardsPoint,
    Scalar,
};
use beldex_tx::PreparedInput;
use beldex_types::{PublicKey, RingSignature, Transaction};
use serde::{Deserialize, Serialize};

/// An input plus the derivation part of its one-time secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigInput {
    pub input: PreparedInput,
    pub base_secret: Scalar,
}

/// One signer's nonce commitments and (after pass two) responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerRecord {
    pub signer: PublicKey,
    /// `(L, R)` per input.
    pub nonces: Vec<(PublicKey, PublicKey)>,
    pub responses: Vec<Scalar>,
}

struct InputChallenge {
    c0: Scalar,
    c_real: Scalar,
    responses: Vec<Scalar>,
}

/// A transaction being signed by several participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigTxSet {
    /// Unsigned transaction; its prefix is fixed.
    pub tx: Transaction,
    pub inputs: Vec<MultisigInput>,
    pub threshold: usize,
    pub signers: Vec<SignerRecord>,
}

impl MultisigTxSet {
    pub fn new(tx: Transaction, inputs: Vec<MultisigInput>, threshold: usize) -> Result<Self, MultisigError> {
        if inputs.is_empty() || inputs.len() != tx.inputs.len() {
            return Err(MultisigError::Signing("input count does not match the transaction".into()));
        }
        Ok(Self { tx, inputs, threshold, signers: Vec::new() })
    }

    pub fn prefix_hash(&self) -> [u8; 32] {
        self.tx.prefix_hash()
    }

    pub fn has_signer(&self, signer: &PublicKey) -> bool {
        self.signers.iter().any(|r| &r.signer == signer)
    }

    /// All nonce commitments are in.
    pub fn is_committed(&self) -> bool {
        self.signers.len() == self.threshold
    }

    pub fn is_complete(&self) -> bool {
        self.is_committed() && self.signers.iter().all(|r| r.responses.len() == self.inputs.len())
    }

    /// Sorted keys of the committed signers.
    pub fn signing_set(&self) -> Vec<PublicKey> {
        let mut set: Vec<PublicKey> = self.signers.iter().map(|r| r.signer).collect();
        set.sort_unstable();
        set
    }

    /// Pass one. Returns the nonce secrets, which the caller must keep until
    /// it responds.
    pub fn commit(&mut self, signer: PublicKey) -> Result<Vec<Scalar>, MultisigError> {
        if self.has_signer(&signer) {
            return Err(MultisigError::Signing("signer already committed to this set".into()));
        }
        if self.is_committed() {
            return Err(MultisigError::Signing("signing set already has enough signers".into()));
        }
        let mut secrets = Vec::with_capacity(self.inputs.len());
        let mut nonces = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            let alpha = random_scalar();
            let hp = hash_to_point(&input.input.public_key);
            nonces.push((compress(&EdwardsPoint::mul_base(&alpha)), compress(&(alpha * hp))));
            secrets.push(alpha);
        }
        self.signers.push(SignerRecord { signer, nonces, responses: Vec::new() });
        Ok(secrets)
    }

    fn fake_response(&self, prefix_hash: &[u8; 32], input: usize, member: usize) -> Scalar {
        let mut data = Vec::with_capacity(16 + self.signers.len() * 64);
        data.extend_from_slice(&(input as u64).to_le_bytes());
        data.extend_from_slice(&(member as u64).to_le_bytes());
        for record in &self.signers {
            if let Some((l, r)) = record.nonces.get(input) {
                data.extend_from_slice(l);
                data.extend_from_slice(r);
            }
        }
        hash_to_scalar(&[b"multisig-decoy", prefix_hash, &data])
    }

    fn challenges(&self) -> Result<Vec<InputChallenge>, MultisigError> {
        if !self.is_committed() {
            return Err(MultisigError::Signing(format!(
                "{} of {} signers committed",
                self.signers.len(),
                self.threshold
            )));
        }
        let prefix_hash = self.prefix_hash();
        let mut out = Vec::with_capacity(self.inputs.len());
        for (k, input) in self.inputs.iter().enumerate() {
            let mut l = EdwardsPoint::mul_base(&Scalar::ZERO);
            let mut r = l;
            for record in &self.signers {
                let (lj, rj) = record
                    .nonces
                    .get(k)
                    .ok_or_else(|| MultisigError::Signing("signer is missing nonces".into()))?;
                l += decompress(lj)?;
                r += decompress(rj)?;
            }
            let prepared = &input.input;
            let responses: Vec<Scalar> =
                (0..prepared.ring.len()).map(|i| self.fake_response(&prefix_hash, k, i)).collect();
            let (c0, c_real) = lsag_ring_challenges(
                &prefix_hash,
                &prepared.ring,
                &prepared.key_image,
                prepared.real_index,
                &l,
                &r,
                &responses,
            )?;
            out.push(InputChallenge { c0, c_real, responses });
        }
        Ok(out)
    }

    /// Pass two: add this participant's response for every input.
    pub fn respond(&mut self, keys: &MultisigKeys, nonce_secrets: &[Scalar]) -> Result<(), MultisigError> {
        let challenges = self.challenges()?;
        let share = keys.signing_share(&self.signing_set())?;
        let record = self
            .signers
            .iter_mut()
            .find(|r| r.signer == keys.signer)
            .ok_or_else(|| MultisigError::Signing("this participant has not committed".into()))?;
        if !record.responses.is_empty() {
            return Err(MultisigError::Signing("already responded".into()));
        }
        if nonce_secrets.len() != record.nonces.len() {
            return Err(MultisigError::Signing("nonce count mismatch".into()));
        }
        for (alpha, (l, _)) in nonce_secrets.iter().zip(&record.nonces) {
            if compress(&EdwardsPoint::mul_base(alpha)) != *l {
                return Err(MultisigError::Signing("nonces do not match the commitments".into()));
            }
        }
        record.responses = nonce_secrets.iter().zip(&challenges).map(|(alpha, ch)| alpha - ch.c_real * share).collect();
        Ok(())
    }

    /// Combine all responses into a fully signed transaction.
    pub fn finalize(&self) -> Result<Transaction, MultisigError> {
        if !self.is_complete() {
            return Err(MultisigError::Signing("not every signer has responded".into()));
        }
        let challenges = self.challenges()?;
        let prefix_hash = self.prefix_hash();
        let mut tx = self.tx.clone();
        tx.signatures = Vec::with_capacity(self.inputs.len());
        for (k, (input, ch)) in self.inputs.iter().zip(challenges).enumerate() {
            let partial_sum: Scalar = self.signers.iter().map(|r| r.responses[k]).sum();
            let mut responses = ch.responses;
            responses[input.input.real_index] = partial_sum - ch.c_real * input.base_secret;
            let sig = RingSignature { c0: ch.c0.to_bytes(), s: responses.iter().map(|s| s.to_bytes()).collect() };
            if !lsag_verify(&prefix_hash, &input.input.ring, &input.input.key_image, &sig) {
                return Err(MultisigError::Signing(format!("input {k}: combined signature does not verify")));
            }
            tx.signatures.push(sig);
        }
        Ok(tx)
    }

    pub fn encode(&self) -> Result<String, MultisigError> {
        let json = serde_json::to_vec(self).map_err(|e| MultisigError::InvalidMessage(e.to_string()))?;
        Ok(format!("{MULTISIG_TX_SET_PREFIX}{}", hex::encode(json)))
    }

    pub fn decode(s: &str) -> Result<Self, MultisigError> {
        let body = s
            .trim()
            .strip_prefix(MULTISIG_TX_SET_PREFIX)
            .ok_or_else(|| MultisigError::InvalidMessage("missing multisig tx set prefix".into()))?;
        let json = hex::decode(body).map_err(|e| MultisigError::InvalidMessage(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| MultisigError::InvalidMessage(e.to_string()))
    }
}
