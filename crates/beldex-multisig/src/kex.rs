//! Multisig key exchange.
//!
//! Each participant blinds its spend key into a signer key `K_i = k_i*G`.
//! The spend authority is split over every group of `N - M + 1` signers
//! (sorted by signer key). A group's secret is grown one member per round:
//! for `T = S + {c}` (with `c` the largest member of `T`), members of `S`
//! compute `Hs(z_S * K_c)` and `c` computes `Hs(k_c * Z_S)`. The wallet
//! spend key is the sum of all full-size group keys; the view key is the sum
//! of the view shares published in round 1.

use crate::account::{GroupKey, GroupShare, MultisigKeys};
use crate::constants::{group_size, MultisigMsgType, MULTISIG_INFO_PREFIX, MULTISIG_MAX_SIGNERS, MULTISIG_MIN_THRESHOLD};
use crate::MultisigError;
use beldex_crypto::{compress, decompress, hash_to_scalar, keccak256, schnorr_sign, schnorr_verify, EdwardsPoint, Scalar};
use beldex_types::{base58, PublicKey, Signature};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A message exchanged during the multisig key-exchange protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KexMessage {
    /// Protocol round (1-indexed).
    pub round: usize,
    /// Sender's signer key.
    pub signer: PublicKey,
    /// Sender's view-key share (round 1 only).
    pub view_share: Option<[u8; 32]>,
    /// Public keys of the sender's groups for this round.
    pub keys: Vec<GroupKey>,
    pub msg_type: MultisigMsgType,
    /// Schnorr signature by the signer key over everything above.
    pub signature: Signature,
}

impl KexMessage {
    fn signing_hash(&self) -> [u8; 32] {
        let mut data = Vec::with_capacity(96 + self.keys.len() * 64);
        data.extend_from_slice(b"multisig-kex");
        data.extend_from_slice(&(self.round as u64).to_le_bytes());
        data.extend_from_slice(self.msg_type.as_str().as_bytes());
        data.extend_from_slice(&self.signer);
        if let Some(share) = &self.view_share {
            data.extend_from_slice(share);
        }
        for group in &self.keys {
            data.push(group.members.len() as u8);
            for member in &group.members {
                data.extend_from_slice(member);
            }
            data.extend_from_slice(&group.key);
        }
        keccak256(&data)
    }

    fn signed(
        round: usize,
        msg_type: MultisigMsgType,
        signer: PublicKey,
        secret: &Scalar,
        view_share: Option<[u8; 32]>,
        keys: Vec<GroupKey>,
    ) -> Self {
        let mut msg = Self { round, signer, view_share, keys, msg_type, signature: Signature { c: [0; 32], s: [0; 32] } };
        msg.signature = schnorr_sign(&msg.signing_hash(), &signer, secret);
        msg
    }

    pub fn verify(&self) -> bool {
        schnorr_verify(&self.signing_hash(), &self.signer, &self.signature)
    }

    pub fn encode(&self) -> Result<String, MultisigError> {
        let json = serde_json::to_vec(self).map_err(|e| MultisigError::InvalidMessage(e.to_string()))?;
        Ok(format!("{MULTISIG_INFO_PREFIX}{}", base58::encode(&json)))
    }

    /// Decode and check the sender's signature.
    pub fn decode(s: &str) -> Result<Self, MultisigError> {
        let body = s
            .trim()
            .strip_prefix(MULTISIG_INFO_PREFIX)
            .ok_or_else(|| MultisigError::InvalidMessage("missing multisig info prefix".into()))?;
        let json = base58::decode(body).map_err(|e| MultisigError::InvalidMessage(e.to_string()))?;
        let msg: Self = serde_json::from_slice(&json).map_err(|e| MultisigError::InvalidMessage(e.to_string()))?;
        if !msg.verify() {
            return Err(MultisigError::InvalidMessage("bad signature on multisig info".into()));
        }
        Ok(msg)
    }
}

/// Check a threshold/participant pair.
pub fn check_params(threshold: usize, signers: usize) -> Result<(), MultisigError> {
    if threshold < MULTISIG_MIN_THRESHOLD {
        return Err(MultisigError::InvalidParams(format!(
            "threshold must be at least {MULTISIG_MIN_THRESHOLD}, got {threshold}"
        )));
    }
    if threshold > signers {
        return Err(MultisigError::InvalidParams(format!(
            "threshold ({threshold}) must not exceed signer count ({signers})"
        )));
    }
    if signers > MULTISIG_MAX_SIGNERS {
        return Err(MultisigError::InvalidParams(format!(
            "signer count ({signers}) exceeds max allowed ({MULTISIG_MAX_SIGNERS})"
        )));
    }
    Ok(())
}

/// All size-`k` subsets of `items`, each in the order of `items`.
pub(crate) fn combinations(items: &[PublicKey], k: usize) -> Vec<Vec<PublicKey>> {
    fn walk(items: &[PublicKey], k: usize, start: usize, cur: &mut Vec<PublicKey>, out: &mut Vec<Vec<PublicKey>>) {
        if cur.len() == k {
            out.push(cur.clone());
            return;
        }
        for i in start..items.len() {
            cur.push(items[i]);
            walk(items, k, i + 1, cur, out);
            cur.pop();
        }
    }
    let mut out = Vec::new();
    walk(items, k, 0, &mut Vec::with_capacity(k), &mut out);
    out
}

fn group_secret(secret: &Scalar, public: &EdwardsPoint) -> Scalar {
    hash_to_scalar(&[b"multisig-group", &compress(&(secret * public))])
}

/// One participant's side of the key exchange.
///
/// Every mutating call either advances the session by exactly one round or
/// leaves it untouched.
#[derive(Clone, Serialize, Deserialize)]
pub struct KexSession {
    secret: Scalar,
    signer: PublicKey,
    view_share: Scalar,
    threshold: usize,
    /// Sorted signer keys, known after `make`.
    signers: Vec<PublicKey>,
    view_secret: Scalar,
    /// Round whose messages the session consumes next.
    round: usize,
    /// Size of the groups in `shares`.
    level: usize,
    shares: Vec<GroupShare>,
    finalized: Option<MultisigKeys>,
}

impl std::fmt::Debug for KexSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KexSession")
            .field("signer", &hex::encode(self.signer))
            .field("round", &self.round)
            .field("level", &self.level)
            .field("finalized", &self.finalized.is_some())
            .finish_non_exhaustive()
    }
}

impl KexSession {
    /// Start a session from a wallet's base keys. The keys are blinded so
    /// multisig shares are unrelated to the original wallet keys.
    pub fn new(spend_secret: &Scalar, view_secret: &Scalar) -> Self {
        let secret = hash_to_scalar(&[b"multisig-spend", spend_secret.as_bytes()]);
        let view_share = hash_to_scalar(&[b"multisig-view", view_secret.as_bytes()]);
        Self {
            secret,
            signer: compress(&EdwardsPoint::mul_base(&secret)),
            view_share,
            threshold: 0,
            signers: Vec::new(),
            view_secret: Scalar::ZERO,
            round: 1,
            level: 0,
            shares: Vec::new(),
            finalized: None,
        }
    }

    pub fn signer(&self) -> PublicKey {
        self.signer
    }

    pub fn round(&self) -> usize {
        self.round
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.is_some()
    }

    pub fn keys(&self) -> Option<&MultisigKeys> {
        self.finalized.as_ref()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn total(&self) -> usize {
        self.signers.len()
    }

    fn target_level(&self) -> usize {
        group_size(self.threshold, self.signers.len())
    }

    /// Round-1 info string for this participant.
    pub fn first_message(&self) -> Result<String, MultisigError> {
        KexMessage::signed(
            1,
            MultisigMsgType::KexInit,
            self.signer,
            &self.secret,
            Some(self.view_share.to_bytes()),
            Vec::new(),
        )
        .encode()
    }

    fn check_mutable(&self, expected_round: usize) -> Result<(), MultisigError> {
        if self.finalized.is_some() {
            return Err(MultisigError::AlreadyFinalized);
        }
        if self.round != expected_round {
            return Err(MultisigError::RoundMismatch(format!(
                "session is at round {}, call expects round {expected_round}",
                self.round
            )));
        }
        Ok(())
    }

    /// Decode peer messages for the current round, dropping our own.
    fn decode_round(&self, infos: &[String]) -> Result<Vec<KexMessage>, MultisigError> {
        let mut msgs = Vec::with_capacity(infos.len());
        let mut seen = BTreeSet::new();
        for info in infos {
            let msg = KexMessage::decode(info)?;
            if msg.round != self.round {
                return Err(MultisigError::RoundMismatch(format!(
                    "expected round {} info, got round {}",
                    self.round, msg.round
                )));
            }
            if msg.signer == self.signer {
                continue;
            }
            if !seen.insert(msg.signer) {
                return Err(MultisigError::InvalidMessage("duplicate signer".into()));
            }
            if !self.signers.is_empty() && !self.signers.contains(&msg.signer) {
                return Err(MultisigError::InvalidMessage("info from an unknown signer".into()));
            }
            msgs.push(msg);
        }
        if !self.signers.is_empty() && msgs.len() + 1 != self.signers.len() {
            return Err(MultisigError::RoundMismatch(format!(
                "expected {} peer infos, got {}",
                self.signers.len() - 1,
                msgs.len()
            )));
        }
        Ok(msgs)
    }

    /// Group keys for the current level, from our shares and peer messages.
    fn collect_keys(&self, msgs: &[KexMessage]) -> Result<BTreeMap<Vec<PublicKey>, PublicKey>, MultisigError> {
        let mut keys: BTreeMap<Vec<PublicKey>, PublicKey> = self
            .shares
            .iter()
            .map(|s| (s.members.clone(), compress(&EdwardsPoint::mul_base(&s.secret))))
            .collect();
        for msg in msgs {
            for group in &msg.keys {
                if group.members.len() != self.level || !group.members.contains(&msg.signer) {
                    return Err(MultisigError::Kex("peer sent a key for a group it is not in".into()));
                }
                match keys.get(&group.members) {
                    Some(existing) if *existing != group.key => {
                        return Err(MultisigError::Kex("group key mismatch between participants".into()));
                    }
                    Some(_) => {}
                    None => {
                        keys.insert(group.members.clone(), group.key);
                    }
                }
            }
        }
        Ok(keys)
    }

    /// Grow our groups by one member.
    fn extend(&self, keys: &BTreeMap<Vec<PublicKey>, PublicKey>) -> Result<Vec<GroupShare>, MultisigError> {
        let mine: BTreeMap<&Vec<PublicKey>, &Scalar> = self.shares.iter().map(|s| (&s.members, &s.secret)).collect();
        let mut out = Vec::new();
        for members in combinations(&self.signers, self.level + 1) {
            if !members.contains(&self.signer) {
                continue;
            }
            let (base, last) = members.split_at(members.len() - 1);
            let secret = if last[0] == self.signer {
                let key = keys
                    .get(base)
                    .ok_or_else(|| MultisigError::Kex("missing group key from peers".into()))?;
                group_secret(&self.secret, &decompress(key)?)
            } else {
                let share = mine
                    .get(&base.to_vec())
                    .ok_or_else(|| MultisigError::Kex("missing own group share".into()))?;
                group_secret(share, &decompress(&last[0])?)
            };
            out.push(GroupShare { members, secret });
        }
        Ok(out)
    }

    fn message(&self, round: usize, shares: &[GroupShare], final_round: bool) -> Result<String, MultisigError> {
        let keys = shares
            .iter()
            .map(|s| GroupKey { members: s.members.clone(), key: compress(&EdwardsPoint::mul_base(&s.secret)) })
            .collect();
        let msg_type = if final_round { MultisigMsgType::KexFinal } else { MultisigMsgType::KexRound };
        KexMessage::signed(round, msg_type, self.signer, &self.secret, None, keys).encode()
    }

    /// Consume every peer's round-1 info and fix the threshold. Returns this
    /// participant's next info string.
    pub fn make(&mut self, infos: &[String], threshold: usize) -> Result<String, MultisigError> {
        self.check_mutable(1)?;
        let msgs = self.decode_round(infos)?;
        let total = msgs.len() + 1;
        check_params(threshold, total)?;

        let mut next = self.clone();
        next.threshold = threshold;
        next.signers = msgs.iter().map(|m| m.signer).chain(std::iter::once(self.signer)).collect();
        next.signers.sort_unstable();
        next.view_secret = self.view_share;
        for msg in &msgs {
            let share = msg
                .view_share
                .ok_or_else(|| MultisigError::InvalidMessage("round-1 info without view share".into()))?;
            next.view_secret += beldex_crypto::scalar_from_bytes(&share)?;
        }
        next.level = 1;
        next.shares = vec![GroupShare { members: vec![self.signer], secret: self.secret }];
        if next.target_level() > 1 {
            let singles = next.signers.iter().map(|k| (vec![*k], *k)).collect();
            next.shares = next.extend(&singles)?;
            next.level = 2;
        }
        next.round = 2;

        let reply = next.message(2, &next.shares, next.level == next.target_level())?;
        log::info!(
            "multisig {}-of-{}: made, {} exchange round(s) before finalize",
            threshold,
            total,
            next.target_level().saturating_sub(next.level)
        );
        *self = next;
        Ok(reply)
    }

    /// One intermediate round: grow every group by one member.
    pub fn exchange(&mut self, infos: &[String]) -> Result<String, MultisigError> {
        if self.finalized.is_some() {
            return Err(MultisigError::AlreadyFinalized);
        }
        if self.signers.is_empty() {
            return Err(MultisigError::RoundMismatch("make_multisig has not been called".into()));
        }
        if self.level >= self.target_level() {
            return Err(MultisigError::RoundMismatch("no exchange rounds left; finalize instead".into()));
        }
        let msgs = self.decode_round(infos)?;
        let keys = self.collect_keys(&msgs)?;

        let mut next = self.clone();
        next.shares = self.extend(&keys)?;
        next.level += 1;
        next.round += 1;
        let reply = next.message(next.round, &next.shares, next.level == next.target_level())?;
        log::debug!("multisig exchange: now at group size {}", next.level);
        *self = next;
        Ok(reply)
    }

    /// Consume the full-size group keys and derive the shared wallet keys.
    pub fn finalize(&mut self, infos: &[String]) -> Result<MultisigKeys, MultisigError> {
        if self.finalized.is_some() {
            return Err(MultisigError::AlreadyFinalized);
        }
        if self.signers.is_empty() || self.level != self.target_level() {
            return Err(MultisigError::RoundMismatch("key exchange rounds are not complete".into()));
        }
        let msgs = self.decode_round(infos)?;
        let keys = self.collect_keys(&msgs)?;
        let expected = combinations(&self.signers, self.level).len();
        if keys.len() != expected {
            return Err(MultisigError::Kex(format!("expected {expected} group keys, got {}", keys.len())));
        }

        let mut spend = EdwardsPoint::mul_base(&Scalar::ZERO);
        for key in keys.values() {
            spend += decompress(key)?;
        }
        let result = MultisigKeys {
            threshold: self.threshold,
            signer: self.signer,
            signers: self.signers.clone(),
            shares: self.shares.clone(),
            group_keys: keys.into_iter().map(|(members, key)| GroupKey { members, key }).collect(),
            spend_public: compress(&spend),
            view_secret: self.view_secret,
        };
        log::info!("multisig finalized: spend key {}", hex::encode(result.spend_public));
        self.finalized = Some(result.clone());
        self.round += 1;
        Ok(result)
    }
}
