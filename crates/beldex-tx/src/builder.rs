//! Transaction builder.
//!
//! Assembles chosen inputs (with their rings), destinations, change, fee and
//! extra payloads into an [`UnsignedTransaction`], which is then signed with
//! one LSAG per input. Input choice and fee iteration belong to the caller.

use crate::TxError;
use beldex_crypto::{
    compress, decompress, derive_public_key, encrypt_amount, generate_key_derivation, lsag_sign, random_scalar,
    scalar_from_hex, EdwardsPoint, Scalar,
};
use beldex_types::constants::STAKE_LOCK_FOREVER;
use beldex_types::{
    absolute_to_relative, Address, BnsExtra, PublicKey, StakeExtra, Transaction, TxExtra, TxInput, TxOutput, TxType,
    UnlockExtra,
};
use serde::{Deserialize, Serialize};

pub const TX_VERSION: u8 = 2;

/// A destination for funds in the transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub address: Address,
    pub amount: u64,
}

/// A prepared input for spending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedInput {
    /// One-time public key of the output being spent.
    pub public_key: PublicKey,
    pub amount: u64,
    pub global_index: u64,
    pub key_image: [u8; 32],
    /// Ring member public keys, ordered as `ring_indices`.
    pub ring: Vec<PublicKey>,
    /// Ring member global indices (sorted ascending).
    pub ring_indices: Vec<u64>,
    /// Position of the real output within the ring.
    pub real_index: usize,
}

/// Per-transaction secret keys: `r` plus one `r_i` per output when any
/// destination is a subaddress.
#[derive(Clone, PartialEq, Eq)]
pub struct TxSecretKeys {
    pub main: Scalar,
    pub additional: Vec<Scalar>,
}

impl TxSecretKeys {
    /// Hex of `r` followed by each `r_i`.
    pub fn to_hex(&self) -> String {
        let mut out = hex::encode(self.main.to_bytes());
        for k in &self.additional {
            out.push_str(&hex::encode(k.to_bytes()));
        }
        out
    }

    pub fn from_hex(s: &str) -> Result<Self, TxError> {
        let s = s.trim();
        if s.is_empty() || s.len() % 64 != 0 {
            return Err(TxError::Invalid("transaction key must be a multiple of 64 hex characters".into()));
        }
        let mut keys = Vec::with_capacity(s.len() / 64);
        for i in (0..s.len()).step_by(64) {
            let chunk = s.get(i..i + 64).ok_or_else(|| TxError::Invalid("transaction key is not hex".into()))?;
            keys.push(scalar_from_hex(chunk)?);
        }
        let main = keys.remove(0);
        Ok(Self { main, additional: keys })
    }

    /// Secret used for output `index`.
    pub fn for_output(&self, index: usize) -> &Scalar {
        self.additional.get(index).unwrap_or(&self.main)
    }
}

impl std::fmt::Debug for TxSecretKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxSecretKeys").field("additional", &self.additional.len()).finish_non_exhaustive()
    }
}

/// Built transaction awaiting ring signatures.
#[derive(Debug, Clone)]
pub struct UnsignedTransaction {
    pub tx: Transaction,
    pub inputs: Vec<PreparedInput>,
    pub tx_keys: TxSecretKeys,
    pub destinations: Vec<Destination>,
    pub change_amount: u64,
    /// Output position of the change, when there is change.
    pub change_index: Option<usize>,
}

impl UnsignedTransaction {
    pub fn prefix_hash(&self) -> [u8; 32] {
        self.tx.prefix_hash()
    }

    /// Sign every input with its one-time secret (same order as `inputs`).
    pub fn sign(self, secrets: &[Scalar]) -> Result<Transaction, TxError> {
        if secrets.len() != self.inputs.len() {
            return Err(TxError::Signing(format!(
                "{} secrets for {} inputs",
                secrets.len(),
                self.inputs.len()
            )));
        }
        let prefix_hash = self.tx.prefix_hash();
        let mut tx = self.tx;
        tx.signatures = self
            .inputs
            .iter()
            .zip(secrets)
            .map(|(input, secret)| lsag_sign(&prefix_hash, &input.ring, input.real_index, secret))
            .collect::<Result<_, _>>()
            .map_err(|e| TxError::Signing(e.to_string()))?;
        Ok(tx)
    }
}

/// Builder for constructing transactions.
pub struct TransactionBuilder {
    inputs: Vec<PreparedInput>,
    destinations: Vec<Destination>,
    change_address: Option<Address>,
    tx_type: TxType,
    fee: u64,
    unlock_time: u64,
    burn: u64,
    stake_node: Option<PublicKey>,
    bns: Option<BnsExtra>,
    unlock: Option<UnlockExtra>,
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            destinations: Vec::new(),
            change_address: None,
            tx_type: TxType::Standard,
            fee: 0,
            unlock_time: 0,
            burn: 0,
            stake_node: None,
            bns: None,
            unlock: None,
        }
    }

    pub fn add_inputs(mut self, inputs: Vec<PreparedInput>) -> Self {
        self.inputs.extend(inputs);
        self
    }

    pub fn add_destination(mut self, dest: Destination) -> Self {
        self.destinations.push(dest);
        self
    }

    pub fn set_change_address(mut self, address: Address) -> Self {
        self.change_address = Some(address);
        self
    }

    pub fn set_tx_type(mut self, tx_type: TxType) -> Self {
        self.tx_type = tx_type;
        self
    }

    pub fn set_fee(mut self, fee: u64) -> Self {
        self.fee = fee;
        self
    }

    pub fn set_unlock_time(mut self, unlock_time: u64) -> Self {
        self.unlock_time = unlock_time;
        self
    }

    /// Amount destroyed by the transaction (name-service fees).
    pub fn set_burn(mut self, burn: u64) -> Self {
        self.burn = burn;
        self
    }

    /// Lock the destinations to a service node; reveals the tx secret key.
    pub fn set_stake(mut self, service_node_key: PublicKey) -> Self {
        self.tx_type = TxType::Stake;
        self.unlock_time = STAKE_LOCK_FOREVER;
        self.stake_node = Some(service_node_key);
        self
    }

    pub fn set_bns(mut self, tx_type: TxType, extra: BnsExtra) -> Self {
        self.tx_type = tx_type;
        self.bns = Some(extra);
        self
    }

    pub fn set_unlock(mut self, extra: UnlockExtra) -> Self {
        self.tx_type = TxType::KeyImageUnlock;
        self.unlock = Some(extra);
        self
    }

    fn validate_inputs(&self) -> Result<(), TxError> {
        let Some(first) = self.inputs.first() else {
            return Ok(());
        };
        let ring_size = first.ring.len();
        for (i, input) in self.inputs.iter().enumerate() {
            if input.ring.len() != ring_size {
                return Err(TxError::RingSizeMismatch { expected: ring_size, got: input.ring.len() });
            }
            if input.ring_indices.len() != ring_size {
                return Err(TxError::RingSizeMismatch { expected: ring_size, got: input.ring_indices.len() });
            }
            if input.real_index >= ring_size {
                return Err(TxError::Invalid(format!(
                    "input {i} real_index {} >= ring_size {ring_size}",
                    input.real_index
                )));
            }
            if input.ring[input.real_index] != input.public_key
                || input.ring_indices[input.real_index] != input.global_index
            {
                return Err(TxError::Invalid(format!("input {i} real output not at its ring position")));
            }
        }
        Ok(())
    }

    /// Build an unsigned transaction.
    pub fn build(self) -> Result<UnsignedTransaction, TxError> {
        let needs_inputs = self.tx_type != TxType::KeyImageUnlock;
        if needs_inputs && self.inputs.is_empty() {
            return Err(TxError::InsufficientInputs { need: 1, have: 0 });
        }
        if self.destinations.is_empty() && matches!(self.tx_type, TxType::Standard | TxType::Stake) {
            return Err(TxError::NoDestinations);
        }
        if self.destinations.iter().any(|d| d.amount == 0) {
            return Err(TxError::Invalid("zero-amount destination".into()));
        }
        self.validate_inputs()?;

        let total_in: u64 = self.inputs.iter().map(|i| i.amount).sum();
        let total_dest: u64 = self.destinations.iter().map(|d| d.amount).sum();
        let need = total_dest
            .checked_add(self.fee)
            .and_then(|v| v.checked_add(self.burn))
            .ok_or_else(|| TxError::Invalid("amount overflow".into()))?;
        if total_in < need {
            return Err(TxError::InsufficientInputs { need, have: total_in });
        }
        let change_amount = total_in - need;

        let mut recipients: Vec<(Address, u64)> = self.destinations.iter().map(|d| (d.address, d.amount)).collect();
        let change_index = if change_amount > 0 {
            let change = self
                .change_address
                .ok_or_else(|| TxError::Invalid("change left over but no change address".into()))?;
            recipients.push((change, change_amount));
            Some(recipients.len() - 1)
        } else {
            None
        };

        let main = random_scalar();
        let use_additional = recipients.iter().any(|(a, _)| a.is_subaddress());
        let mut additional = Vec::new();
        let mut additional_pub = Vec::new();
        let mut outputs = Vec::with_capacity(recipients.len());
        for (i, (addr, amount)) in recipients.iter().enumerate() {
            let r = if use_additional {
                let r_i = random_scalar();
                let base = if addr.is_subaddress() {
                    decompress(&addr.spend_public_key)?
                } else {
                    EdwardsPoint::mul_base(&Scalar::ONE)
                };
                additional_pub.push(compress(&(r_i * base)));
                additional.push(r_i);
                r_i
            } else {
                main
            };
            let derivation = generate_key_derivation(&addr.view_public_key, &r)?;
            outputs.push(TxOutput {
                key: derive_public_key(&derivation, i as u64, &addr.spend_public_key)?,
                clear_amount: None,
                encrypted_amount: encrypt_amount(*amount, &derivation, i as u64),
            });
        }

        let inputs = self
            .inputs
            .iter()
            .map(|input| {
                Ok(TxInput {
                    key_image: input.key_image,
                    key_offsets: absolute_to_relative(&input.ring_indices)
                        .map_err(|e| TxError::Invalid(e.to_string()))?,
                })
            })
            .collect::<Result<Vec<_>, TxError>>()?;

        let extra = TxExtra {
            tx_pub_key: Some(compress(&EdwardsPoint::mul_base(&main))),
            additional_pub_keys: additional_pub,
            stake: self
                .stake_node
                .map(|service_node_key| StakeExtra { service_node_key, tx_secret_key: main.to_bytes() }),
            bns: self.bns,
            unlock: self.unlock,
            burn: self.burn,
        };

        let tx = Transaction {
            version: TX_VERSION,
            tx_type: self.tx_type,
            unlock_time: self.unlock_time,
            inputs,
            outputs,
            extra,
            fee: self.fee,
            signatures: Vec::new(),
        };

        Ok(UnsignedTransaction {
            tx,
            inputs: self.inputs,
            tx_keys: TxSecretKeys { main, additional },
            destinations: self.destinations,
            change_amount,
            change_index,
        })
    }
}

/// Coinbase paying `amounts` to `address`. `legacy` outputs carry clear
/// amounts (pre-RingCT) and can only be spent unmixed.
pub fn miner_transaction(address: &Address, amounts: &[u64], legacy: bool) -> Result<Transaction, TxError> {
    let r = random_scalar();
    let derivation = generate_key_derivation(&address.view_public_key, &r)?;
    let outputs = amounts
        .iter()
        .enumerate()
        .map(|(i, &amount)| {
            Ok(TxOutput {
                key: derive_public_key(&derivation, i as u64, &address.spend_public_key)?,
                clear_amount: legacy.then_some(amount),
                encrypted_amount: encrypt_amount(amount, &derivation, i as u64),
            })
        })
        .collect::<Result<Vec<_>, TxError>>()?;
    Ok(Transaction {
        version: TX_VERSION,
        tx_type: TxType::Coinbase,
        outputs,
        extra: TxExtra { tx_pub_key: Some(compress(&EdwardsPoint::mul_base(&r))), ..Default::default() },
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use beldex_crypto::{
        decrypt_amount, derive_secret_key, generate_key_image, lsag_verify, random_point, subaddress_spend_public,
        subaddress_view_public, view_secret_from_spend, KeyPair,
    };
    use beldex_types::{AddressType, Network};

    struct Keys {
        spend: KeyPair,
        view: KeyPair,
    }

    impl Keys {
        fn new() -> Self {
            let spend = KeyPair::generate();
            let view = KeyPair::from_secret(view_secret_from_spend(&spend.secret));
            Self { spend, view }
        }

        fn address(&self) -> Address {
            Address::new(Network::Mainnet, AddressType::Standard, self.spend.public, self.view.public)
        }
    }

    /// Returns (input, one-time secret) for output 0 of a fresh coinbase.
    fn owned_input(keys: &Keys, amount: u64) -> (PreparedInput, Scalar) {
        let coinbase = miner_transaction(&keys.address(), &[amount], false).unwrap();
        let tx_pub = coinbase.extra.tx_pub_key.unwrap();
        let derivation = generate_key_derivation(&tx_pub, &keys.view.secret).unwrap();
        let secret = derive_secret_key(&derivation, 0, &keys.spend.secret);
        let public_key = coinbase.outputs[0].key;
        let mut ring: Vec<[u8; 32]> = (0..4).map(|_| random_point()).collect();
        ring[2] = public_key;
        let input = PreparedInput {
            public_key,
            amount,
            global_index: 12,
            key_image: generate_key_image(&public_key, &secret),
            ring,
            ring_indices: vec![3, 7, 12, 20],
            real_index: 2,
        };
        (input, secret)
    }

    #[test]
    fn test_build_and_sign_transfer() {
        let sender = Keys::new();
        let recipient = Keys::new();
        let (input, secret) = owned_input(&sender, 5_000_000);

        let unsigned = TransactionBuilder::new()
            .add_inputs(vec![input.clone()])
            .add_destination(Destination { address: recipient.address(), amount: 1_000_000 })
            .set_change_address(sender.address())
            .set_fee(100_000)
            .build()
            .unwrap();
        assert_eq!(unsigned.change_amount, 3_900_000);
        assert_eq!(unsigned.change_index, Some(1));
        assert_eq!(unsigned.tx.inputs[0].key_offsets, vec![3, 4, 5, 8]);

        // Recipient can find and decode output 0.
        let tx_pub = unsigned.tx.extra.tx_pub_key.unwrap();
        let d = generate_key_derivation(&tx_pub, &recipient.view.secret).unwrap();
        assert_eq!(derive_public_key(&d, 0, &recipient.spend.public).unwrap(), unsigned.tx.outputs[0].key);
        assert_eq!(decrypt_amount(&unsigned.tx.outputs[0].encrypted_amount, &d, 0), 1_000_000);

        let tx = unsigned.sign(&[secret]).unwrap();
        assert!(lsag_verify(&tx.prefix_hash(), &input.ring, &input.key_image, &tx.signatures[0]));
    }

    #[test]
    fn test_subaddress_destination_uses_additional_keys() {
        let sender = Keys::new();
        let recipient = Keys::new();
        let sub_spend = subaddress_spend_public(&recipient.spend.public, &recipient.view.secret, 0, 3).unwrap();
        let sub_view = subaddress_view_public(&recipient.view.secret, &sub_spend).unwrap();
        let sub = Address::new(Network::Mainnet, AddressType::Subaddress, sub_spend, sub_view);
        let (input, _) = owned_input(&sender, 2_000_000);

        let unsigned = TransactionBuilder::new()
            .add_inputs(vec![input])
            .add_destination(Destination { address: sub, amount: 500_000 })
            .set_change_address(sender.address())
            .set_fee(1_000)
            .build()
            .unwrap();
        assert_eq!(unsigned.tx.extra.additional_pub_keys.len(), 2);
        assert_eq!(unsigned.tx_keys.additional.len(), 2);

        let r0 = unsigned.tx.extra.additional_pub_keys[0];
        let d = generate_key_derivation(&r0, &recipient.view.secret).unwrap();
        assert_eq!(derive_public_key(&d, 0, &sub_spend).unwrap(), unsigned.tx.outputs[0].key);
    }

    #[test]
    fn test_insufficient_and_invalid() {
        let sender = Keys::new();
        let (input, _) = owned_input(&sender, 1_000);
        let err = TransactionBuilder::new()
            .add_inputs(vec![input.clone()])
            .add_destination(Destination { address: sender.address(), amount: 900 })
            .set_fee(200)
            .build()
            .unwrap_err();
        assert!(matches!(err, TxError::InsufficientInputs { need: 1_100, have: 1_000 }));

        let mut misplaced = input.clone();
        misplaced.real_index = 1;
        assert!(TransactionBuilder::new()
            .add_inputs(vec![misplaced])
            .add_destination(Destination { address: sender.address(), amount: 1 })
            .set_change_address(sender.address())
            .build()
            .is_err());

        assert!(matches!(
            TransactionBuilder::new().add_inputs(vec![input]).build(),
            Err(TxError::NoDestinations)
        ));
    }

    #[test]
    fn test_stake_reveals_tx_key() {
        let sender = Keys::new();
        let (input, _) = owned_input(&sender, 10_000);
        let node = random_point();
        let unsigned = TransactionBuilder::new()
            .add_inputs(vec![input])
            .add_destination(Destination { address: sender.address(), amount: 9_000 })
            .set_stake(node)
            .set_fee(1_000)
            .build()
            .unwrap();
        assert_eq!(unsigned.tx.tx_type, TxType::Stake);
        assert_eq!(unsigned.tx.unlock_time, STAKE_LOCK_FOREVER);
        let stake = unsigned.tx.extra.stake.as_ref().unwrap();
        assert_eq!(stake.service_node_key, node);
        assert_eq!(stake.tx_secret_key, unsigned.tx_keys.main.to_bytes());
        assert_eq!(unsigned.change_index, None);
    }

    #[test]
    fn test_tx_key_hex() {
        let keys = TxSecretKeys { main: random_scalar(), additional: vec![random_scalar(), random_scalar()] };
        let parsed = TxSecretKeys::from_hex(&keys.to_hex()).unwrap();
        assert_eq!(parsed, keys);
        assert!(TxSecretKeys::from_hex("abc").is_err());
        assert!(TxSecretKeys::from_hex("").is_err());
    }

    #[test]
    fn test_legacy_miner_outputs_have_clear_amounts() {
        let keys = Keys::new();
        let tx = miner_transaction(&keys.address(), &[5, 6], true).unwrap();
        assert_eq!(tx.outputs[1].clear_amount, Some(6));
        assert_eq!(tx.tx_type, TxType::Coinbase);
    }
}
