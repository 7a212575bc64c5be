mod common;

use beldex_rpc::MemoryDaemon;
use beldex_types::constants::COIN;
use beldex_wallet::{BnsValues, FileKeystore, PendingKind, Wallet, WalletError, WalletListener};
use common::{confirm, fund, init, wallet};
use std::sync::{Arc, Mutex};

#[test]
fn test_transfer_reserve_dispose_then_sweep() {
    init();
    let daemon = Arc::new(MemoryDaemon::new());
    let alice = wallet(&daemon);
    let bob = wallet(&daemon);
    fund(&daemon, &alice.primary_address(), &[5_000_000], 100);
    alice.refresh().unwrap();
    assert_eq!(alice.blockchain_height(), 100);
    assert_eq!(alice.unlocked_balance(0), 5_000_000);

    let pending = alice.create_transaction(&bob.primary_address(), Some(1_000_000), 1, 0, &[]).unwrap();
    assert_eq!(pending.kind(), &PendingKind::Transfer);
    assert_eq!(pending.tx_count(), 1);
    assert_eq!(pending.amount(), 1_000_000);
    assert!(pending.fee() > 0);
    assert_eq!(pending.change(), 5_000_000 - 1_000_000 - pending.fee());
    assert_eq!(pending.spent_output_keys().len(), 1);

    // The only output is reserved.
    let second = alice.create_transaction(&bob.primary_address(), Some(1_000_000), 1, 0, &[]);
    assert!(matches!(second, Err(WalletError::InsufficientFunds { .. })));

    alice.dispose_transaction(pending);
    let sweep = alice.create_transaction(&bob.primary_address(), None, 1, 0, &[]).unwrap();
    assert_eq!(sweep.amount() + sweep.fee(), 5_000_000);
    assert_eq!(sweep.change(), 0);
}

#[test]
fn test_rescan_keeps_reservations() {
    init();
    let daemon = Arc::new(MemoryDaemon::new());
    let alice = wallet(&daemon);
    let bob = wallet(&daemon);
    fund(&daemon, &alice.primary_address(), &[5_000_000], 100);
    alice.refresh().unwrap();

    let pending = alice.create_transaction(&bob.primary_address(), Some(1_000_000), 1, 0, &[]).unwrap();
    alice.rescan_blockchain().unwrap();
    assert_eq!(alice.balance(0), 5_000_000);
    assert!(matches!(
        alice.create_transaction(&bob.primary_address(), Some(1_000_000), 1, 0, &[]),
        Err(WalletError::InsufficientFunds { .. })
    ));

    alice.rebuild_wallet_cache();
    alice.refresh().unwrap();
    assert!(matches!(
        alice.create_transaction(&bob.primary_address(), Some(1_000_000), 1, 0, &[]),
        Err(WalletError::InsufficientFunds { .. })
    ));

    alice.dispose_transaction(pending);
    assert!(alice.create_transaction(&bob.primary_address(), Some(1_000_000), 1, 0, &[]).is_ok());
}

#[test]
fn test_commit_moves_funds() {
    init();
    let daemon = Arc::new(MemoryDaemon::new());
    let alice = wallet(&daemon);
    let bob = wallet(&daemon);
    fund(&daemon, &alice.primary_address(), &[5_000_000], 100);
    alice.refresh().unwrap();

    let mut pending = alice.create_transaction(&bob.primary_address(), Some(1_000_000), 1, 0, &[]).unwrap();
    alice.commit_transaction(&mut pending).unwrap();
    assert!(pending.is_submitted());
    assert!(matches!(alice.commit_transaction(&mut pending), Err(WalletError::AlreadySubmitted)));
    assert_eq!(daemon.pool_size(), 1);
    // Spent locally before the block arrives.
    assert_eq!(alice.balance(0), 0);

    let change = pending.change();
    drop(pending);
    confirm(&daemon);
    alice.refresh().unwrap();
    bob.refresh().unwrap();
    assert_eq!(alice.balance(0), change);
    assert_eq!(bob.balance(0), 1_000_000);
    assert_eq!(bob.unlocked_balance(0), 1_000_000);
}

#[test]
fn test_concurrent_builds_never_share_inputs() {
    init();
    let daemon = Arc::new(MemoryDaemon::new());
    let alice = wallet(&daemon);
    let bob = wallet(&daemon);
    fund(&daemon, &alice.primary_address(), &[5_000_000], 100);
    alice.refresh().unwrap();
    let dest = bob.primary_address();

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| s.spawn(|| alice.create_transaction(&dest, Some(3_000_000), 1, 0, &[])))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    let built = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(built, 1);
    assert!(results.iter().any(|r| matches!(r, Err(WalletError::InsufficientFunds { .. }))));
}

#[test]
fn test_blackballed_outputs_are_never_decoys() {
    init();
    let daemon = Arc::new(MemoryDaemon::new());
    let alice = wallet(&daemon);
    let bob = wallet(&daemon);
    fund(&daemon, &alice.primary_address(), &[5_000_000], 100);
    alice.refresh().unwrap();

    // Alice's output is global index 0; the genesis block has none.
    let blackballed: Vec<u64> = (1..=80).collect();
    alice.blackball_outputs(&blackballed, true);
    let pending = alice.create_transaction(&bob.primary_address(), Some(1_000_000), 1, 0, &[]).unwrap();
    let ring = &pending.txs()[0].inputs[0].ring_indices;
    assert_eq!(ring.len(), 10);
    assert!(ring.contains(&0));
    assert!(ring.iter().all(|i| !blackballed.contains(i)));
    alice.dispose_transaction(pending);

    // Sweeps skip blackballed outputs of our own.
    alice.blackball_outputs(&[0], true);
    assert!(matches!(
        alice.create_transaction(&bob.primary_address(), None, 1, 0, &[]),
        Err(WalletError::InsufficientFunds { .. })
    ));
    assert!(alice.unblackball_output(0));
    assert!(alice.create_transaction(&bob.primary_address(), None, 1, 0, &[]).is_ok());
}

#[test]
fn test_committed_rings_are_recorded() {
    init();
    let daemon = Arc::new(MemoryDaemon::new());
    let alice = wallet(&daemon);
    let bob = wallet(&daemon);
    fund(&daemon, &alice.primary_address(), &[5_000_000], 100);
    alice.refresh().unwrap();

    let mut pending = alice.create_transaction(&bob.primary_address(), Some(1_000_000), 1, 0, &[]).unwrap();
    let input = pending.txs()[0].inputs[0].clone();
    let txid = pending.txids().remove(0);
    alice.commit_transaction(&mut pending).unwrap();
    confirm(&daemon);

    let key_image = hex::encode(input.key_image);
    assert_eq!(alice.get_ring(&key_image, false).unwrap(), input.ring_indices);
    let rings = alice.get_rings(&txid).unwrap();
    assert_eq!(rings, vec![(key_image, input.ring_indices)]);
}

#[test]
fn test_invalid_requests() {
    init();
    let daemon = Arc::new(MemoryDaemon::new());
    let alice = wallet(&daemon);
    fund(&daemon, &alice.primary_address(), &[5_000_000], 100);
    alice.refresh().unwrap();

    let me = alice.primary_address();
    assert!(matches!(alice.create_transaction("nope", Some(5), 1, 0, &[]), Err(WalletError::InvalidDestination(_))));
    assert!(matches!(alice.create_transaction(&me, Some(0), 1, 0, &[]), Err(WalletError::InvalidDestination(_))));
    assert!(matches!(alice.create_transaction(&me, Some(5), 9, 0, &[]), Err(WalletError::InvalidPriority(_))));
    assert!(matches!(
        alice.create_transaction(&me, Some(50_000_000), 1, 0, &[]),
        Err(WalletError::InsufficientFunds { .. })
    ));
    assert!(matches!(alice.stake_pending("abcd", 1_000, 1), Err(WalletError::InvalidServiceNodeKey(_))));
    assert!(matches!(
        alice.create_bns_transaction("name", "3", None, None, &Default::default(), 1, 0),
        Err(WalletError::InvalidMappingYears(_))
    ));
    // Nothing was left reserved by the failures.
    assert!(alice.create_transaction(&me, Some(1_000), 1, 0, &[]).is_ok());
}

#[test]
fn test_daemon_outage_fails_build_cleanly() {
    init();
    let daemon = Arc::new(MemoryDaemon::new());
    let alice = wallet(&daemon);
    fund(&daemon, &alice.primary_address(), &[5_000_000], 100);
    alice.refresh().unwrap();

    daemon.set_offline(true);
    let me = alice.primary_address();
    assert!(matches!(
        alice.create_transaction(&me, Some(1_000), 1, 0, &[]),
        Err(WalletError::DaemonUnavailable(_))
    ));
    daemon.set_offline(false);
    assert!(alice.create_transaction(&me, Some(1_000), 1, 0, &[]).is_ok());
}

#[test]
fn test_overflowing_destinations_are_invalid() {
    init();
    let daemon = Arc::new(MemoryDaemon::new());
    let alice = wallet(&daemon);
    fund(&daemon, &alice.primary_address(), &[5_000_000], 100);
    alice.refresh().unwrap();

    let me = alice.primary_address();
    let half = u64::MAX / 2 + 1;
    let result = alice.create_transaction_multi_dest(&[(me.clone(), half), (me.clone(), half)], 1, 0, &[]);
    assert!(matches!(result, Err(WalletError::InvalidDestination(_))));
    assert!(alice.create_transaction(&me, Some(1_000), 1, 0, &[]).is_ok());
}

#[test]
fn test_name_purchase_burns() {
    init();
    let daemon = Arc::new(MemoryDaemon::new());
    let alice = wallet(&daemon);
    fund(&daemon, &alice.primary_address(), &[100 * COIN], 100);
    alice.refresh().unwrap();

    let values = BnsValues { wallet: Some(alice.primary_address()), ..Default::default() };
    let mut pending = alice.create_bns_transaction("beldex", "1", None, None, &values, 1, 0).unwrap();
    assert_eq!(pending.burn(), 15 * COIN);
    let built = &pending.txs()[0];
    assert_eq!(built.tx.extra.burn, 15 * COIN);
    let input_total: u64 = built.inputs.iter().map(|i| i.amount).sum();
    assert_eq!(input_total, built.amount + built.fee + built.burn + built.change);
    assert_eq!(pending.change(), 100 * COIN - 15 * COIN - pending.fee());

    alice.commit_transaction(&mut pending).unwrap();
    let change = pending.change();
    drop(pending);
    confirm(&daemon);
    alice.refresh().unwrap();
    assert_eq!(alice.balance(0), change);
}

#[test]
fn test_partial_commit_reports_accepted_parts() {
    init();
    let daemon = Arc::new(MemoryDaemon::new());
    let alice = wallet(&daemon);
    let bob = wallet(&daemon);
    let recorder = Arc::new(Recorder::default());
    alice.set_listener(Some(recorder.clone() as Arc<dyn WalletListener>));
    fund(&daemon, &alice.primary_address(), &[5_000_000, 5_000_000], 100);
    alice.refresh().unwrap();

    // Twenty outputs need two transactions.
    let dests: Vec<(String, u64)> = (0..20).map(|_| (bob.primary_address(), 100_000)).collect();
    let mut pending = alice.create_transaction_multi_dest(&dests, 1, 0, &[]).unwrap();
    assert_eq!(pending.tx_count(), 2);
    let txids = pending.txids();

    daemon.limit_submissions(1);
    assert!(matches!(alice.commit_transaction(&mut pending), Err(WalletError::DaemonUnavailable(_))));
    assert!(!pending.is_submitted());
    assert_eq!(daemon.pool_size(), 1);
    assert_eq!(*recorder.spent.lock().unwrap(), txids[..1]);

    daemon.limit_submissions(u64::MAX);
    alice.commit_transaction(&mut pending).unwrap();
    assert!(pending.is_submitted());
    assert_eq!(daemon.pool_size(), 2);
    assert_eq!(*recorder.spent.lock().unwrap(), txids);
}

#[derive(Default)]
struct Recorder {
    received: Mutex<u64>,
    spent: Mutex<Vec<String>>,
    refreshed: Mutex<usize>,
}

impl WalletListener for Recorder {
    fn money_received(&self, _txid: &str, amount: u64) {
        *self.received.lock().unwrap() += amount;
    }

    fn money_spent(&self, txid: &str, _amount: u64) {
        self.spent.lock().unwrap().push(txid.to_string());
    }

    fn refreshed(&self) {
        *self.refreshed.lock().unwrap() += 1;
    }
}

#[test]
fn test_listener_and_keystore() {
    init();
    let daemon = Arc::new(MemoryDaemon::new());
    let alice = wallet(&daemon);
    let recorder = Arc::new(Recorder::default());
    alice.set_listener(Some(recorder.clone() as Arc<dyn WalletListener>));
    fund(&daemon, &alice.primary_address(), &[700, 300], 50);
    alice.refresh().unwrap();
    assert_eq!(*recorder.received.lock().unwrap(), 1_000);
    assert_eq!(*recorder.refreshed.lock().unwrap(), 1);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alice");
    alice.store(&FileKeystore, &path, "pw").unwrap();
    let reopened = Wallet::open(common::config(), daemon.clone(), &FileKeystore, &path, "pw").unwrap();
    assert_eq!(reopened.primary_address(), alice.primary_address());
    assert_eq!(reopened.balance(0), 1_000);
    assert_eq!(reopened.blockchain_height(), 50);
    assert!(matches!(
        Wallet::open(common::config(), daemon, &FileKeystore, &path, "wrong"),
        Err(WalletError::Keystore(_))
    ));
    alice.close().unwrap();
}
