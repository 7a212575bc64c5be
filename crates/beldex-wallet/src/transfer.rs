//! Transaction construction and submission.
//!
//! Building runs in three phases. Under the state guard the eligible outputs
//! are gathered, a plan (inputs, destinations, fee) is computed and the
//! chosen outputs are reserved for the new pending transaction. Without the
//! guard, rings are fetched from the daemon and the transactions are built
//! and signed. A failure in either phase releases the reservation, so a
//! failed build leaves nothing behind.
//!
//! A [`PendingTransaction`] is consumed once: committed or disposed. Both
//! (and dropping it) release its reservations.

use crate::core::WalletCore;
use crate::error::WalletError;
use crate::keys::{SubaddressIndex, WalletKeys};
use crate::listener::WalletEvent;
use crate::state::{OwnedOutput, StakeRecord, TransferDirection, TransferRecord, WalletState};
use beldex_crypto::{is_valid_point, keccak256, schnorr_sign, Scalar};
use beldex_multisig::{MultisigInput, MultisigKeys, MultisigTxSet};
use beldex_rpc::SubmitResult;
use beldex_tx::bns::{buy_extra, renew_extra, update_extra, BnsValues};
use beldex_tx::{
    estimate_fee_for_recipients, estimate_tx_fee, DecoySelector, Destination, FeePriority, PreparedInput,
    TransactionBuilder, TxSecretKeys,
};
use beldex_types::bns::{name_hash, normalize_name};
use beldex_types::constants::{MAX_DESTINATIONS_PER_TX, MAX_INPUTS_PER_TX};
use beldex_types::{Address, BnsExtra, MappingYears, PublicKey, Transaction, TxType, UnlockExtra};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::{Arc, Weak};

/// Rough extra-field sizes used in fee estimates.
const STAKE_EXTRA_BYTES: usize = 64;
const BNS_EXTRA_BYTES: usize = 256;
const UNLOCK_EXTRA_BYTES: usize = 128;

// ─── Pending transactions ───────────────────────────────────────────────────

/// What a pending transaction does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingKind {
    Transfer,
    MultiDest,
    Stake { service_node_key: PublicKey },
    BnsCreate { name: String },
    BnsUpdate { name: String },
    BnsRenew { name: String },
    SweepUnmixable,
    StakeUnlock { service_node_key: PublicKey },
    /// Awaiting co-signers; one signing set per transaction.
    MultisigPartial { sets: Vec<MultisigTxSet> },
}

/// One constructed transaction.
#[derive(Debug, Clone)]
pub struct BuiltTx {
    /// Signed, except while multisig signing is in progress.
    pub tx: Transaction,
    /// `None` when restored from another participant's sign data.
    pub tx_keys: Option<TxSecretKeys>,
    pub inputs: Vec<PreparedInput>,
    pub destinations: Vec<Destination>,
    pub amount: u64,
    pub fee: u64,
    /// Burned on top of the fee (name-service purchases and renewals).
    pub burn: u64,
    pub change: u64,
}

impl BuiltTx {
    fn input_total(&self) -> u64 {
        self.inputs.iter().map(|i| i.amount).sum()
    }
}

pub struct PendingTransaction {
    id: u64,
    kind: PendingKind,
    txs: Vec<BuiltTx>,
    priority: FeePriority,
    account: u32,
    /// Transactions already accepted by the daemon.
    accepted: usize,
    submitted: bool,
    core: Weak<WalletCore>,
}

impl std::fmt::Debug for PendingTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTransaction")
            .field("id", &self.id)
            .field("txs", &self.txs.len())
            .field("amount", &self.amount())
            .field("fee", &self.fee())
            .field("submitted", &self.submitted)
            .finish_non_exhaustive()
    }
}

impl PendingTransaction {
    pub(crate) fn new(
        core: &Arc<WalletCore>,
        id: u64,
        kind: PendingKind,
        txs: Vec<BuiltTx>,
        priority: FeePriority,
        account: u32,
    ) -> Self {
        Self { id, kind, txs, priority, account, accepted: 0, submitted: false, core: Arc::downgrade(core) }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> &PendingKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut PendingKind {
        &mut self.kind
    }

    pub fn txs(&self) -> &[BuiltTx] {
        &self.txs
    }

    pub fn tx_count(&self) -> usize {
        self.txs.len()
    }

    pub fn priority(&self) -> FeePriority {
        self.priority
    }

    pub fn amount(&self) -> u64 {
        self.txs.iter().map(|t| t.amount).sum()
    }

    pub fn fee(&self) -> u64 {
        self.txs.iter().map(|t| t.fee).sum()
    }

    pub fn burn(&self) -> u64 {
        self.txs.iter().map(|t| t.burn).sum()
    }

    pub fn change(&self) -> u64 {
        self.txs.iter().map(|t| t.change).sum()
    }

    pub fn txids(&self) -> Vec<String> {
        self.txs.iter().map(|t| hex::encode(t.tx.hash())).collect()
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    /// One-time keys of the outputs this transaction spends.
    pub fn spent_output_keys(&self) -> Vec<PublicKey> {
        self.txs.iter().flat_map(|t| t.inputs.iter().map(|i| i.public_key)).collect()
    }

    fn release(&self) {
        if let Some(core) = self.core.upgrade() {
            let handle = core.acquire();
            handle.state_mut().release(self.id);
        }
    }
}

impl Drop for PendingTransaction {
    fn drop(&mut self) {
        self.release();
    }
}

// ─── Planning ───────────────────────────────────────────────────────────────

/// Extra payload attached to every transaction of a build.
#[derive(Debug, Clone)]
pub(crate) enum Payload {
    None,
    Stake(PublicKey),
    Bns { tx_type: TxType, extra: BnsExtra, burn: u64 },
}

impl Payload {
    fn extra_bytes(&self) -> usize {
        match self {
            Payload::None => 0,
            Payload::Stake(_) => STAKE_EXTRA_BYTES,
            Payload::Bns { .. } => BNS_EXTRA_BYTES,
        }
    }

    fn burn(&self) -> u64 {
        match self {
            Payload::Bns { burn, .. } => *burn,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct FeeParams {
    pub ring_size: usize,
    pub extra_bytes: usize,
    pub burn: u64,
    pub priority: FeePriority,
}

impl FeeParams {
    fn fee(&self, inputs: usize, outputs: usize) -> u64 {
        estimate_tx_fee(inputs, outputs, self.ring_size, self.extra_bytes, self.priority)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TxPlan {
    pub inputs: Vec<OwnedOutput>,
    pub destinations: Vec<Destination>,
    pub fee: u64,
    pub burn: u64,
}

/// Smallest single output covering `target`, else largest-first.
fn select_inputs(pool: &[OwnedOutput], target: u64) -> Option<Vec<usize>> {
    let single = pool.iter().enumerate().filter(|(_, o)| o.amount >= target).min_by_key(|(_, o)| o.amount);
    if let Some((i, _)) = single {
        return Some(vec![i]);
    }
    let mut order: Vec<usize> = (0..pool.len()).collect();
    order.sort_by(|a, b| pool[*b].amount.cmp(&pool[*a].amount));
    let mut total = 0u64;
    let mut chosen = Vec::new();
    for i in order {
        chosen.push(i);
        total = total.saturating_add(pool[i].amount);
        if total >= target {
            return Some(chosen);
        }
    }
    None
}

fn take_from_pool(pool: &mut Vec<OwnedOutput>, mut indices: Vec<usize>) -> Vec<OwnedOutput> {
    indices.sort_unstable_by(|a, b| b.cmp(a));
    indices.into_iter().map(|i| pool.swap_remove(i)).collect()
}

fn largest(pool: &[OwnedOutput], n: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..pool.len()).collect();
    order.sort_by(|a, b| pool[*b].amount.cmp(&pool[*a].amount));
    order.truncate(n);
    order
}

/// Plan transactions paying `destinations`, splitting when the output or
/// input limits are exceeded. A build without destinations (name-service
/// operations) still yields one transaction paying the burn and fee.
pub(crate) fn plan_transfer(
    mut pool: Vec<OwnedOutput>,
    destinations: Vec<Destination>,
    params: &FeeParams,
) -> Result<Vec<TxPlan>, WalletError> {
    let available = pool.iter().fold(0u64, |acc, o| acc.saturating_add(o.amount));
    destinations
        .iter()
        .try_fold(params.burn, |acc, d| acc.checked_add(d.amount))
        .ok_or_else(|| WalletError::InvalidDestination("total amount overflows".into()))?;
    let mut queue: VecDeque<Destination> = destinations.into();
    let mut plans = Vec::new();
    let mut burn = params.burn;

    while !queue.is_empty() || plans.is_empty() {
        let n = queue.len().min(MAX_DESTINATIONS_PER_TX);
        let mut chunk: Vec<Destination> = queue.drain(..n).collect();
        let outputs = chunk.len() + 1;
        let sent: u64 = chunk.iter().map(|d| d.amount).sum();

        let mut fee = params.fee(1, outputs);
        let mut chosen = loop {
            let target = sent
                .checked_add(burn)
                .and_then(|v| v.checked_add(fee))
                .ok_or_else(|| WalletError::InvalidDestination("total amount overflows".into()))?;
            let chosen = select_inputs(&pool, target)
                .ok_or(WalletError::InsufficientFunds { need: target, have: available })?;
            if chosen.len() > MAX_INPUTS_PER_TX {
                break chosen;
            }
            let needed = params.fee(chosen.len(), outputs);
            if needed <= fee {
                break chosen;
            }
            fee = needed;
        };

        if chosen.len() > MAX_INPUTS_PER_TX {
            // Spend the largest outputs now and carry the rest over.
            chosen = largest(&pool, MAX_INPUTS_PER_TX);
            fee = params.fee(MAX_INPUTS_PER_TX, outputs);
            let total_in = chosen.iter().fold(0u64, |acc, &i| acc.saturating_add(pool[i].amount));
            let mut capacity = total_in.saturating_sub(fee.saturating_add(burn));
            if capacity == 0 || chunk.is_empty() {
                let need = sent.saturating_add(burn).saturating_add(fee);
                return Err(WalletError::InsufficientFunds { need, have: available });
            }
            let mut partial = Vec::new();
            let mut carry = Vec::new();
            for d in chunk {
                let take = d.amount.min(capacity);
                capacity -= take;
                if take > 0 {
                    partial.push(Destination { address: d.address, amount: take });
                }
                if take < d.amount {
                    carry.push(Destination { address: d.address, amount: d.amount - take });
                }
            }
            for d in carry.into_iter().rev() {
                queue.push_front(d);
            }
            chunk = partial;
        }

        let inputs = take_from_pool(&mut pool, chosen);
        plans.push(TxPlan { inputs, destinations: chunk, fee, burn });
        burn = 0;
    }
    Ok(plans)
}

/// Plan transactions moving every output in `pool` to `address`.
pub(crate) fn plan_sweep(mut pool: Vec<OwnedOutput>, address: Address, params: &FeeParams) -> Vec<TxPlan> {
    pool.sort_by(|a, b| b.amount.cmp(&a.amount));
    pool.chunks(MAX_INPUTS_PER_TX)
        .filter_map(|chunk| {
            let total = chunk.iter().fold(0u64, |acc, o| acc.saturating_add(o.amount));
            let fee = params.fee(chunk.len(), 1);
            (total > fee).then(|| TxPlan {
                inputs: chunk.to_vec(),
                destinations: vec![Destination { address, amount: total - fee }],
                fee,
                burn: 0,
            })
        })
        .collect()
}

// ─── Building ───────────────────────────────────────────────────────────────

/// Who signs the inputs.
enum Authority {
    Single(WalletKeys),
    Multisig(WalletKeys, Box<MultisigKeys>),
}

impl Authority {
    fn from_state(state: &WalletState) -> Result<Self, WalletError> {
        if state.keys.is_multisig() {
            let keys = state
                .multisig
                .as_ref()
                .and_then(|m| m.session.keys())
                .ok_or_else(|| WalletError::Multisig("multisig wallet is not ready".into()))?;
            return Ok(Authority::Multisig(state.keys.clone(), Box::new(keys.clone())));
        }
        state.keys.spend_secret("spend")?;
        Ok(Authority::Single(state.keys.clone()))
    }

    fn keys(&self) -> &WalletKeys {
        match self {
            Authority::Single(k) | Authority::Multisig(k, _) => k,
        }
    }
}

pub(crate) struct TransferRequest {
    pub kind: PendingKind,
    pub destinations: Vec<Destination>,
    /// Sweep every eligible output to this address instead.
    pub sweep_to: Option<Address>,
    pub account: u32,
    /// Restrict inputs to these minor indices (empty: any).
    pub indices: BTreeSet<u32>,
    pub priority: FeePriority,
    pub unmixable: bool,
    pub payload: Payload,
}

fn eligible_outputs(state: &WalletState, req: &TransferRequest) -> Vec<OwnedOutput> {
    let sweeping = req.sweep_to.is_some();
    state
        .outputs
        .iter()
        .filter(|o| {
            !o.spent
                && o.amount > 0
                && o.key_image.is_some()
                && o.subaddress.major == req.account
                && (req.indices.is_empty() || req.indices.contains(&o.subaddress.minor))
                && o.unmixable == req.unmixable
                && !state.is_reserved(&o.public_key)
                && !(sweeping && state.blackballed.contains(&o.global_index))
                && state.is_unlocked(o)
        })
        .cloned()
        .collect()
}

struct RingContext<'a> {
    core: &'a WalletCore,
    ring_size: usize,
    selector: Option<DecoySelector>,
    stored: Vec<(PublicKey, Vec<u64>)>,
    exclude: HashSet<u64>,
}

impl RingContext<'_> {
    fn prepare(&self, out: &OwnedOutput) -> Result<PreparedInput, WalletError> {
        let key_image = out
            .key_image
            .ok_or_else(|| WalletError::CriticalInternal("selected output has no key image".into()))?;
        let stored = self
            .stored
            .iter()
            .find(|(key, ring)| *key == out.public_key && ring.len() == self.ring_size && ring.contains(&out.global_index))
            .map(|(_, ring)| ring.clone());
        let ring_indices = match (stored, &self.selector) {
            (Some(ring), _) => ring,
            (None, _) if self.ring_size == 1 => vec![out.global_index],
            (None, Some(selector)) => selector.build_ring(out.global_index, self.ring_size, &self.exclude)?.0,
            (None, None) => return Err(WalletError::CriticalInternal("no decoy selector".into())),
        };
        let real_index = ring_indices
            .iter()
            .position(|&i| i == out.global_index)
            .ok_or_else(|| WalletError::InvalidRing("ring does not contain the real output".into()))?;

        let members = self.core.daemon.get_outputs(&ring_indices)?;
        if members.len() != ring_indices.len() {
            return Err(WalletError::InvalidRing(format!(
                "daemon returned {} of {} ring members",
                members.len(),
                ring_indices.len()
            )));
        }
        let ring: Vec<PublicKey> = members.iter().map(|m| m.key).collect();
        if ring[real_index] != out.public_key {
            return Err(WalletError::InvalidRing(format!("output {} key mismatch", out.global_index)));
        }
        Ok(PreparedInput {
            public_key: out.public_key,
            amount: out.amount,
            global_index: out.global_index,
            key_image,
            ring,
            ring_indices,
            real_index,
        })
    }
}

fn apply_payload(builder: TransactionBuilder, payload: &Payload) -> TransactionBuilder {
    match payload {
        Payload::None => builder,
        Payload::Stake(node) => builder.set_stake(*node),
        Payload::Bns { tx_type, extra, .. } => builder.set_bns(*tx_type, extra.clone()),
    }
}

/// Built transactions plus, for multisig, each set's nonce secrets.
type Assembled = (Vec<BuiltTx>, Vec<(MultisigTxSet, Vec<Scalar>)>);

fn assemble(
    ctx: &RingContext<'_>,
    authority: &Authority,
    plans: &[TxPlan],
    change_address: Address,
    payload: &Payload,
) -> Result<Assembled, WalletError> {
    let keys = authority.keys();
    let mut built = Vec::with_capacity(plans.len());
    let mut sets = Vec::new();
    for (i, plan) in plans.iter().enumerate() {
        let inputs = plan.inputs.iter().map(|o| ctx.prepare(o)).collect::<Result<Vec<_>, _>>()?;
        let mut builder = TransactionBuilder::new()
            .add_inputs(inputs.clone())
            .set_change_address(change_address)
            .set_fee(plan.fee)
            .set_burn(plan.burn);
        for d in &plan.destinations {
            builder = builder.add_destination(d.clone());
        }
        // Name-service records go in the first transaction only.
        if i == 0 || !matches!(payload, Payload::Bns { .. }) {
            builder = apply_payload(builder, payload);
        }
        let unsigned = builder.build()?;
        let amount = plan.destinations.iter().map(|d| d.amount).sum();
        let change = unsigned.change_amount;
        let tx_keys = unsigned.tx_keys.clone();
        let destinations = unsigned.destinations.clone();

        let tx = match authority {
            Authority::Single(_) => {
                let secrets = plan
                    .inputs
                    .iter()
                    .map(|o| keys.output_secret(&o.derivation, o.output_index, o.subaddress).ok_or(WalletError::WatchOnly("sign")))
                    .collect::<Result<Vec<_>, _>>()?;
                unsigned.sign(&secrets)?
            }
            Authority::Multisig(_, msig) => {
                let msig_inputs = inputs
                    .iter()
                    .zip(&plan.inputs)
                    .map(|(input, o)| MultisigInput {
                        input: input.clone(),
                        base_secret: keys.output_base_secret(&o.derivation, o.output_index, o.subaddress),
                    })
                    .collect();
                let tx = unsigned.tx.clone();
                let mut set = MultisigTxSet::new(unsigned.tx, msig_inputs, msig.threshold)?;
                let nonces = set.commit(msig.signer)?;
                sets.push((set, nonces));
                tx
            }
        };
        built.push(BuiltTx {
            tx,
            tx_keys: Some(tx_keys),
            inputs,
            destinations,
            amount,
            fee: plan.fee,
            burn: plan.burn,
            change,
        });
    }
    Ok((built, sets))
}

fn fetch_rings(
    core: &WalletCore,
    ring_size: usize,
    needed: bool,
    stored: Vec<(PublicKey, Vec<u64>)>,
    exclude: HashSet<u64>,
) -> Result<RingContext<'_>, WalletError> {
    let selector = if ring_size > 1 && needed {
        Some(DecoySelector::new(core.daemon.get_output_distribution()?.cumulative)?)
    } else {
        None
    };
    Ok(RingContext { core, ring_size, selector, stored, exclude })
}

/// Select, reserve, build and sign.
pub(crate) fn build_pending(core: &Arc<WalletCore>, req: TransferRequest) -> Result<PendingTransaction, WalletError> {
    let id = core.next_pending_id();
    let ring_size = if req.unmixable { 1 } else { core.config.ring_size };
    let params = FeeParams {
        ring_size,
        extra_bytes: req.payload.extra_bytes(),
        burn: req.payload.burn(),
        priority: req.priority,
    };

    let (plans, authority, change_address, stored, exclude) = {
        let handle = core.acquire();
        let mut state = handle.state_mut();
        let authority = Authority::from_state(&state)?;
        let change_address = state.keys.subaddress(SubaddressIndex::new(req.account, 0))?;
        let pool = eligible_outputs(&state, &req);
        let plans = match req.sweep_to {
            Some(address) => plan_sweep(pool, address, &params),
            None => plan_transfer(pool, req.destinations.clone(), &params)?,
        };
        if plans.is_empty() && req.kind != PendingKind::SweepUnmixable {
            return Err(WalletError::InsufficientFunds { need: 0, have: state.unlocked_balance(Some(req.account)) });
        }
        let selected: Vec<&OwnedOutput> = plans.iter().flat_map(|p| p.inputs.iter()).collect();
        let stored = selected
            .iter()
            .filter_map(|o| {
                let ki = hex::encode(o.key_image?);
                state.rings.get(&ki).map(|r| (o.public_key, r.clone()))
            })
            .collect();
        let keys: Vec<PublicKey> = selected.iter().map(|o| o.public_key).collect();
        state.reserve(&keys, id);
        let exclude: HashSet<u64> = state.blackballed.iter().copied().collect();
        (plans, authority, change_address, stored, exclude)
    };

    let built = fetch_rings(core, ring_size, !plans.is_empty(), stored, exclude)
        .and_then(|ctx| assemble(&ctx, &authority, &plans, change_address, &req.payload));

    let (txs, sets) = match built {
        Ok(b) => b,
        Err(e) => {
            let handle = core.acquire();
            handle.state_mut().release(id);
            return Err(e);
        }
    };

    let kind = if sets.is_empty() {
        req.kind
    } else {
        let handle = core.acquire();
        let mut state = handle.state_mut();
        let Some(msig) = state.multisig.as_mut() else {
            state.release(id);
            return Err(WalletError::NotMultisig);
        };
        for (set, nonces) in &sets {
            msig.nonces.insert(hex::encode(set.prefix_hash()), nonces.clone());
        }
        PendingKind::MultisigPartial { sets: sets.into_iter().map(|(s, _)| s).collect() }
    };

    let pending = PendingTransaction::new(core, id, kind, txs, req.priority, req.account);
    log::info!(
        "built pending transaction {id}: {} tx(s), amount {}, fee {}",
        pending.tx_count(),
        pending.amount(),
        pending.fee()
    );
    Ok(pending)
}

// ─── Operations ─────────────────────────────────────────────────────────────

pub(crate) fn parse_destination(address: &str, amount: u64, network: beldex_types::Network) -> Result<Destination, WalletError> {
    let address = Address::parse_for(address, network).map_err(|e| WalletError::InvalidDestination(e.to_string()))?;
    if amount == 0 {
        return Err(WalletError::InvalidDestination("amount must be positive".into()));
    }
    Ok(Destination { address, amount })
}

fn priority(p: u32) -> Result<FeePriority, WalletError> {
    Ok(FeePriority::from_u32(p)?)
}

fn network(core: &WalletCore) -> beldex_types::Network {
    let handle = core.acquire();
    let network = handle.state().keys.network;
    network
}

/// Transfer to one address; `amount: None` sweeps everything eligible.
pub(crate) fn create_transaction(
    core: &Arc<WalletCore>,
    destination: &str,
    amount: Option<u64>,
    priority_class: u32,
    account: u32,
    indices: &[u32],
) -> Result<PendingTransaction, WalletError> {
    let network = network(core);
    let priority = priority(priority_class)?;
    let (destinations, sweep_to) = match amount {
        Some(amount) => (vec![parse_destination(destination, amount, network)?], None),
        None => {
            let address =
                Address::parse_for(destination, network).map_err(|e| WalletError::InvalidDestination(e.to_string()))?;
            (Vec::new(), Some(address))
        }
    };
    build_pending(
        core,
        TransferRequest {
            kind: PendingKind::Transfer,
            destinations,
            sweep_to,
            account,
            indices: indices.iter().copied().collect(),
            priority,
            unmixable: false,
            payload: Payload::None,
        },
    )
}

pub(crate) fn create_transaction_multi_dest(
    core: &Arc<WalletCore>,
    destinations: &[(String, u64)],
    priority_class: u32,
    account: u32,
    indices: &[u32],
) -> Result<PendingTransaction, WalletError> {
    if destinations.is_empty() {
        return Err(WalletError::InvalidDestination("no destinations".into()));
    }
    let network = network(core);
    let priority = priority(priority_class)?;
    let destinations = destinations
        .iter()
        .map(|(a, amount)| parse_destination(a, *amount, network))
        .collect::<Result<Vec<_>, _>>()?;
    build_pending(
        core,
        TransferRequest {
            kind: PendingKind::MultiDest,
            destinations,
            sweep_to: None,
            account,
            indices: indices.iter().copied().collect(),
            priority,
            unmixable: false,
            payload: Payload::None,
        },
    )
}

/// Consolidate outputs that can only be spent without decoys. Producing
/// no transactions is not an error.
pub(crate) fn create_sweep_unmixable_transaction(
    core: &Arc<WalletCore>,
    priority_class: u32,
) -> Result<PendingTransaction, WalletError> {
    let priority = priority(priority_class)?;
    let address = core.acquire().state().keys.primary_address();
    build_pending(
        core,
        TransferRequest {
            kind: PendingKind::SweepUnmixable,
            destinations: Vec::new(),
            sweep_to: Some(address),
            account: 0,
            indices: BTreeSet::new(),
            priority,
            unmixable: true,
            payload: Payload::None,
        },
    )
}

pub(crate) fn parse_service_node_key(key: &str) -> Result<PublicKey, WalletError> {
    let bytes = hex::decode(key.trim()).map_err(|e| WalletError::InvalidServiceNodeKey(e.to_string()))?;
    let key: PublicKey = bytes
        .try_into()
        .map_err(|_| WalletError::InvalidServiceNodeKey("expected 32 bytes".into()))?;
    if !is_valid_point(&key) {
        return Err(WalletError::InvalidServiceNodeKey("not a valid point".into()));
    }
    Ok(key)
}

/// Lock `amount` to a service node. The locked output pays this wallet.
pub(crate) fn stake_pending(
    core: &Arc<WalletCore>,
    service_node_key: &str,
    amount: u64,
    priority_class: u32,
) -> Result<PendingTransaction, WalletError> {
    let node = parse_service_node_key(service_node_key)?;
    let priority = priority(priority_class)?;
    if amount == 0 {
        return Err(WalletError::InvalidDestination("stake amount must be positive".into()));
    }
    let address = core.acquire().state().keys.primary_address();
    build_pending(
        core,
        TransferRequest {
            kind: PendingKind::Stake { service_node_key: node },
            destinations: vec![Destination { address, amount }],
            sweep_to: None,
            account: 0,
            indices: BTreeSet::new(),
            priority,
            unmixable: false,
            payload: Payload::Stake(node),
        },
    )
}

fn bns_request(kind: PendingKind, payload: Payload, priority: FeePriority, account: u32) -> TransferRequest {
    TransferRequest {
        kind,
        destinations: Vec::new(),
        sweep_to: None,
        account,
        indices: BTreeSet::new(),
        priority,
        unmixable: false,
        payload,
    }
}

/// Daemon height, for name expiry checks.
fn chain_height(core: &WalletCore) -> Result<u64, WalletError> {
    core.daemon_height_for_query()
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn create_bns_transaction(
    core: &Arc<WalletCore>,
    name: &str,
    years: &str,
    owner: Option<&str>,
    backup_owner: Option<&str>,
    values: &BnsValues,
    priority_class: u32,
    account: u32,
) -> Result<PendingTransaction, WalletError> {
    let years = MappingYears::parse(years)?;
    let priority = priority(priority_class)?;
    let (network, own) = {
        let handle = core.acquire();
        let state = handle.state();
        (state.keys.network, state.keys.primary_address().encode())
    };
    let owner = owner.map(str::to_string).unwrap_or(own);
    let (extra, normalized) =
        buy_extra(name, owner, backup_owner.map(str::to_string), years, values, network)?;

    if let Some(record) = core.daemon.lookup_bns(&extra.name_hash)? {
        let height = chain_height(core)?;
        if record.expiration_height.map_or(true, |e| e > height) {
            return Err(WalletError::InvalidBnsName(format!("{normalized} is already registered")));
        }
    }

    let payload = Payload::Bns { tx_type: TxType::BnsBuy, extra, burn: years.burn() };
    build_pending(core, bns_request(PendingKind::BnsCreate { name: normalized }, payload, priority, account))
}

/// Addresses of this wallet that may own names.
fn own_addresses(state: &WalletState) -> Vec<String> {
    state.accounts.iter().flat_map(|a| a.addresses.iter().map(|e| e.address.clone())).collect()
}

pub(crate) fn bns_update_transaction(
    core: &Arc<WalletCore>,
    name: &str,
    owner: Option<&str>,
    backup_owner: Option<&str>,
    values: &BnsValues,
    priority_class: u32,
    account: u32,
) -> Result<PendingTransaction, WalletError> {
    let normalized = normalize_name(name)?;
    let priority = priority(priority_class)?;
    let record = core
        .daemon
        .lookup_bns(&name_hash(&normalized))?
        .ok_or_else(|| WalletError::BnsNotFound(normalized.clone()))?;

    let extra = {
        let handle = core.acquire();
        let state = handle.state();
        let mine = own_addresses(&state);
        let owned = mine.contains(&record.owner) || record.backup_owner.as_ref().is_some_and(|b| mine.contains(b));
        if !owned {
            return Err(WalletError::InvalidBnsName(format!("{normalized} is not owned by this wallet")));
        }
        let mut extra = update_extra(
            &normalized,
            record.txid,
            owner.map(str::to_string),
            backup_owner.map(str::to_string),
            values,
            state.keys.network,
        )?;
        let secret = state.keys.spend_secret("sign a name update")?;
        let digest = keccak256(&extra.signing_payload());
        extra.signature = Some(schnorr_sign(&digest, &state.keys.spend_public, secret));
        extra
    };

    let payload = Payload::Bns { tx_type: TxType::BnsUpdate, extra, burn: 0 };
    build_pending(core, bns_request(PendingKind::BnsUpdate { name: normalized }, payload, priority, account))
}

pub(crate) fn bns_renew_transaction(
    core: &Arc<WalletCore>,
    name: &str,
    years: &str,
    priority_class: u32,
    account: u32,
) -> Result<PendingTransaction, WalletError> {
    let years = MappingYears::parse(years)?;
    let normalized = normalize_name(name)?;
    let priority = priority(priority_class)?;
    let record = core
        .daemon
        .lookup_bns(&name_hash(&normalized))?
        .ok_or_else(|| WalletError::BnsNotFound(normalized.clone()))?;
    let extra = renew_extra(&normalized, record.txid, years);
    let payload = Payload::Bns { tx_type: TxType::BnsRenew, extra, burn: years.burn() };
    build_pending(core, bns_request(PendingKind::BnsRenew { name: normalized }, payload, priority, account))
}

/// Fee for a transfer to `recipients` at `priority_class`. Pure.
pub fn estimate_transaction_fee(priority_class: u32, recipients: usize) -> Result<u64, WalletError> {
    Ok(estimate_fee_for_recipients(recipients.max(1), priority(priority_class)?))
}

// ─── Stakes ─────────────────────────────────────────────────────────────────

pub(crate) fn list_current_stakes(core: &WalletCore) -> Vec<StakeRecord> {
    core.acquire().state().stakes.clone()
}

pub(crate) fn can_request_stake_unlock(core: &WalletCore, service_node_key: &str) -> bool {
    let Ok(node) = parse_service_node_key(service_node_key) else {
        return false;
    };
    let handle = core.acquire();
    let state = handle.state();
    state.stakes.iter().any(|s| {
        s.service_node_key == node
            && !s.unlock_requested
            && state.output_by_key(&s.output_key).is_some_and(|o| o.key_image.is_some() && !o.spent)
    })
}

/// Unlock message signed by the stake output's one-time key.
pub(crate) fn stake_unlock_digest(service_node_key: &PublicKey, key_image: &[u8; 32]) -> [u8; 32] {
    let mut data = Vec::with_capacity(76);
    data.extend_from_slice(b"stake-unlock");
    data.extend_from_slice(service_node_key);
    data.extend_from_slice(key_image);
    keccak256(&data)
}

/// Ask the network to release a stake. Spends nothing and pays no fee.
pub(crate) fn request_stake_unlock(core: &Arc<WalletCore>, service_node_key: &str) -> Result<PendingTransaction, WalletError> {
    let node = parse_service_node_key(service_node_key)?;
    let extra = {
        let handle = core.acquire();
        let state = handle.state();
        let output = state
            .stakes
            .iter()
            .filter(|s| s.service_node_key == node && !s.unlock_requested)
            .find_map(|s| state.output_by_key(&s.output_key).filter(|o| !o.spent))
            .ok_or_else(|| WalletError::StakeNotFound(service_node_key.to_string()))?;
        let key_image = output.key_image.ok_or_else(|| WalletError::StakeNotFound(service_node_key.to_string()))?;
        state.keys.spend_secret("sign a stake unlock")?;
        let secret = state
            .keys
            .output_secret(&output.derivation, output.output_index, output.subaddress)
            .ok_or(WalletError::WatchOnly("sign a stake unlock"))?;
        let signature = schnorr_sign(&stake_unlock_digest(&node, &key_image), &output.public_key, &secret);
        UnlockExtra { service_node_key: node, key_image, signature }
    };
    let unsigned = TransactionBuilder::new().set_unlock(extra).build()?;
    let tx_keys = unsigned.tx_keys.clone();
    let tx = unsigned.sign(&[])?;
    let built = BuiltTx { tx, tx_keys: Some(tx_keys), inputs: Vec::new(), destinations: Vec::new(), amount: 0, fee: 0, burn: 0, change: 0 };
    let id = core.next_pending_id();
    Ok(PendingTransaction::new(
        core,
        id,
        PendingKind::StakeUnlock { service_node_key: node },
        vec![built],
        FeePriority::Default,
        0,
    ))
}

// ─── Commit ─────────────────────────────────────────────────────────────────

fn record_submitted(state: &mut WalletState, pending: &PendingTransaction, built: &BuiltTx) -> Option<WalletEvent> {
    let txid = built.tx.hash();
    for input in &built.inputs {
        state.mark_spent(&input.key_image, None);
        state.rings.insert(hex::encode(input.key_image), input.ring_indices.clone());
    }
    if let Some(keys) = &built.tx_keys {
        state.tx_keys.insert(hex::encode(txid), keys.to_hex());
    }
    if !built.inputs.is_empty() {
        state.record_transfer(TransferRecord {
            tx_hash: txid,
            direction: TransferDirection::Out,
            amount: built.amount,
            fee: built.fee,
            height: None,
            account: pending.account,
        });
    }
    match &pending.kind {
        PendingKind::Stake { service_node_key } => {
            if let Some(out) = built.tx.outputs.first() {
                state.stakes.push(StakeRecord {
                    tx_hash: txid,
                    service_node_key: *service_node_key,
                    output_key: out.key,
                    amount: built.amount,
                    unlock_requested: false,
                });
            }
        }
        PendingKind::StakeUnlock { service_node_key } => {
            let unlocked = built.tx.extra.unlock.as_ref().map(|u| u.key_image);
            for stake in state.stakes.iter_mut().filter(|s| &s.service_node_key == service_node_key) {
                let image = state_key_image(&state.outputs, &stake.output_key);
                if image.is_some() && image == unlocked {
                    stake.unlock_requested = true;
                }
            }
        }
        _ => {}
    }
    (!built.inputs.is_empty())
        .then(|| WalletEvent::MoneySpent { txid: hex::encode(txid), amount: built.input_total() })
}

fn state_key_image(outputs: &[OwnedOutput], key: &PublicKey) -> Option<[u8; 32]> {
    outputs.iter().find(|o| &o.public_key == key).and_then(|o| o.key_image)
}

/// Finish multisig sets whose signatures are complete.
fn finalize_multisig(pending: &mut PendingTransaction) -> Result<(), WalletError> {
    let PendingKind::MultisigPartial { sets } = &pending.kind else {
        return Ok(());
    };
    for (i, set) in sets.iter().enumerate() {
        if !set.is_complete() {
            return Err(WalletError::Multisig(format!(
                "transaction {i} has {} of {} signatures",
                set.signers.iter().filter(|s| !s.responses.is_empty()).count(),
                set.threshold
            )));
        }
    }
    let signed = sets.iter().map(|s| s.finalize()).collect::<Result<Vec<_>, _>>()?;
    for (built, tx) in pending.txs.iter_mut().zip(signed) {
        built.tx = tx;
    }
    Ok(())
}

/// Submit every transaction, then record spends and release reservations.
pub(crate) fn commit_transaction(core: &Arc<WalletCore>, pending: &mut PendingTransaction) -> Result<(), WalletError> {
    if pending.submitted {
        return Err(WalletError::AlreadySubmitted);
    }
    finalize_multisig(pending)?;

    let mut events = Vec::new();
    while pending.accepted < pending.txs.len() {
        let built = &pending.txs[pending.accepted];
        let txid = hex::encode(built.tx.hash());
        // Parts already accepted stay recorded; their events go out with the error.
        let failure = match core.daemon.submit_transaction(&built.tx.to_blob()) {
            Ok(SubmitResult::Accepted) => None,
            Ok(SubmitResult::Rejected(reason)) => {
                log::warn!("daemon rejected {txid}: {reason}");
                Some(WalletError::Rejected(reason))
            }
            Err(e) => {
                log::warn!("submitting {txid} failed: {e}");
                Some(e.into())
            }
        };
        if let Some(e) = failure {
            core.notify(events);
            return Err(e);
        }
        log::info!("submitted {txid}");
        {
            let handle = core.acquire();
            let mut state = handle.state_mut();
            events.extend(record_submitted(&mut state, pending, built));
            if let PendingKind::MultisigPartial { sets } = &pending.kind {
                if let (Some(msig), Some(set)) = (state.multisig.as_mut(), sets.get(pending.accepted)) {
                    msig.nonces.remove(&hex::encode(set.prefix_hash()));
                }
            }
        }
        pending.accepted += 1;
    }

    pending.submitted = true;
    pending.release();
    events.push(WalletEvent::Updated);
    core.notify(events);
    Ok(())
}

pub(crate) fn dispose_transaction(pending: PendingTransaction) {
    log::debug!("disposing pending transaction {} (submitted: {})", pending.id, pending.submitted);
    drop(pending);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::output;
    use beldex_types::{AddressType, Network};

    fn params() -> FeeParams {
        FeeParams { ring_size: 10, extra_bytes: 0, burn: 0, priority: FeePriority::Unimportant }
    }

    fn dest(amount: u64) -> Destination {
        let keys = WalletKeys::generate(Network::Testnet);
        Destination {
            address: Address::new(Network::Testnet, AddressType::Standard, keys.spend_public, keys.view_public),
            amount,
        }
    }

    #[test]
    fn test_prefers_single_covering_output() {
        let pool = vec![output(1, 9_000_000, 0), output(2, 5_000_000, 0), output(3, 800_000, 0)];
        let plans = plan_transfer(pool, vec![dest(1_000_000)], &params()).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].inputs.len(), 1);
        assert_eq!(plans[0].inputs[0].amount, 5_000_000);
        assert_eq!(plans[0].fee, params().fee(1, 2));
    }

    #[test]
    fn test_largest_first_and_fee_iteration() {
        let pool = (1..=5).map(|i| output(i, 400_000, 0)).collect();
        let plans = plan_transfer(pool, vec![dest(1_000_000)], &params()).unwrap();
        let inputs = plans[0].inputs.len();
        assert!(inputs >= 3);
        let total: u64 = plans[0].inputs.iter().map(|o| o.amount).sum();
        assert!(total >= 1_000_000 + plans[0].fee);
        assert_eq!(plans[0].fee, params().fee(inputs, 2));
    }

    #[test]
    fn test_insufficient_funds() {
        let pool = vec![output(1, 1_000, 0)];
        let err = plan_transfer(pool, vec![dest(5_000)], &params()).unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { have: 1_000, .. }));
    }

    #[test]
    fn test_splits_on_destination_limit() {
        let pool = (1..=4).map(|i| output(i, 50_000_000, 0)).collect();
        let dests: Vec<Destination> = (0..20).map(|_| dest(100_000)).collect();
        let plans = plan_transfer(pool, dests, &params()).unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].destinations.len(), MAX_DESTINATIONS_PER_TX);
        assert_eq!(plans[1].destinations.len(), 5);
        let keys: HashSet<PublicKey> = plans.iter().flat_map(|p| p.inputs.iter().map(|o| o.public_key)).collect();
        assert_eq!(keys.len(), plans.iter().map(|p| p.inputs.len()).sum::<usize>());
    }

    #[test]
    fn test_splits_on_input_limit() {
        let pool = (1..=20).map(|i| output(i, 1_000_000, 0)).collect();
        let plans = plan_transfer(pool, vec![dest(17_000_000)], &params()).unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].inputs.len(), MAX_INPUTS_PER_TX);
        let sent: u64 = plans.iter().flat_map(|p| p.destinations.iter().map(|d| d.amount)).sum();
        assert_eq!(sent, 17_000_000);
    }

    #[test]
    fn test_overflowing_amounts_are_invalid() {
        let pool = vec![output(1, 9_000_000, 0)];
        let half = u64::MAX / 2 + 1;
        let err = plan_transfer(pool.clone(), vec![dest(half), dest(half)], &params()).unwrap_err();
        assert!(matches!(err, WalletError::InvalidDestination(_)));

        let burning = FeeParams { burn: 2, ..params() };
        let err = plan_transfer(pool, vec![dest(u64::MAX - 1)], &burning).unwrap_err();
        assert!(matches!(err, WalletError::InvalidDestination(_)));
    }

    #[test]
    fn test_sweep_skips_dust_chunks() {
        let address = dest(1).address;
        let pool = vec![output(1, 10_000_000, 0), output(2, 3, 0)];
        let plans = plan_sweep(pool.clone(), address, &params());
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].destinations[0].amount, 10_000_003 - plans[0].fee);
        assert!(plan_sweep(vec![output(3, 5, 0)], address, &params()).is_empty());
    }

    #[test]
    fn test_burn_only_plan() {
        let pool = vec![output(1, 90_000_000, 0)];
        let p = FeeParams { burn: 20_000_000, ..params() };
        let plans = plan_transfer(pool, Vec::new(), &p).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].burn, 20_000_000);
        assert!(plans[0].destinations.is_empty());
    }

    #[test]
    fn test_service_node_key_validation() {
        assert!(matches!(parse_service_node_key("zz"), Err(WalletError::InvalidServiceNodeKey(_))));
        assert!(matches!(parse_service_node_key("abcd"), Err(WalletError::InvalidServiceNodeKey(_))));
        let good = hex::encode(WalletKeys::generate(Network::Mainnet).spend_public);
        assert!(parse_service_node_key(&good).is_ok());
        assert!(estimate_transaction_fee(9, 1).is_err());
        assert!(estimate_transaction_fee(4, 2).unwrap() > estimate_transaction_fee(1, 2).unwrap());
    }
}
