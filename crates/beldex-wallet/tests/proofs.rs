mod common;

use beldex_rpc::MemoryDaemon;
use beldex_wallet::{Wallet, WalletError};
use common::{confirm, fund, init, mutate, wallet};
use std::sync::Arc;

struct Payment {
    daemon: Arc<MemoryDaemon>,
    alice: Wallet,
    bob: Wallet,
    /// Third party with no stake in the transaction.
    carol: Wallet,
    txid: String,
}

/// Alice pays Bob 1 000 000 in a confirmed transaction.
fn payment() -> Payment {
    init();
    let daemon = Arc::new(MemoryDaemon::new());
    let (alice, bob, carol) = (wallet(&daemon), wallet(&daemon), wallet(&daemon));
    fund(&daemon, &alice.primary_address(), &[5_000_000], 100);
    alice.refresh().unwrap();
    let mut pending = alice.create_transaction(&bob.primary_address(), Some(1_000_000), 1, 0, &[]).unwrap();
    let txid = pending.txids().remove(0);
    alice.commit_transaction(&mut pending).unwrap();
    drop(pending);
    confirm(&daemon);
    alice.refresh().unwrap();
    bob.refresh().unwrap();
    Payment { daemon, alice, bob, carol, txid }
}

#[test]
fn test_tx_key_reveals_amount_to_anyone() {
    let p = payment();
    let key = p.alice.get_tx_key(&p.txid).unwrap();
    let check = p.carol.check_tx_key(&p.txid, &key, &p.bob.primary_address()).unwrap();
    assert_eq!(check.received, 1_000_000);
    assert!(!check.in_pool);
    assert!(check.confirmations >= 1);

    let other = p.carol.check_tx_key(&p.txid, &key, &p.carol.primary_address()).unwrap();
    assert_eq!(other.received, 0);
    assert!(matches!(p.bob.get_tx_key(&p.txid), Err(WalletError::TxNotFound(_))));
    assert!(matches!(p.alice.get_tx_key("00"), Err(WalletError::TxNotFound(_))));
}

#[test]
fn test_tx_proof_from_sender_and_recipient() {
    let p = payment();
    let bob = p.bob.primary_address();

    let out = p.alice.get_tx_proof(&p.txid, &bob, "invoice 7").unwrap();
    assert!(out.starts_with("OutProofV2"));
    let check = p.carol.check_tx_proof(&p.txid, &bob, "invoice 7", &out).unwrap();
    assert!(check.good);
    assert_eq!(check.received, 1_000_000);
    assert!(!p.carol.check_tx_proof(&p.txid, &bob, "invoice 8", &out).unwrap().good);
    assert!(!p.carol.check_tx_proof(&p.txid, &bob, "invoice 7", &mutate(&out)).unwrap().good);

    let inbound = p.bob.get_tx_proof(&p.txid, &bob, "received").unwrap();
    assert!(inbound.starts_with("InProofV2"));
    let check = p.carol.check_tx_proof(&p.txid, &bob, "received", &inbound).unwrap();
    assert!(check.good);
    assert_eq!(check.received, 1_000_000);
    assert!(!p.carol.check_tx_proof(&p.txid, &bob, "received", &mutate(&inbound)).unwrap().good);
}

#[test]
fn test_spend_proof() {
    let p = payment();
    let proof = p.alice.get_spend_proof(&p.txid, "it was me").unwrap();
    assert!(p.carol.check_spend_proof(&p.txid, "it was me", &proof).unwrap());
    assert!(!p.carol.check_spend_proof(&p.txid, "it was not me", &proof).unwrap());
    assert!(!p.carol.check_spend_proof(&p.txid, "it was me", &mutate(&proof)).unwrap());
    // Bob spent nothing in this transaction.
    assert!(p.bob.get_spend_proof(&p.txid, "it was me").is_err());
}

#[test]
fn test_reserve_proof() {
    let p = payment();
    let bob = p.bob.primary_address();
    let proof = p.bob.get_reserve_proof(None, None, "audit").unwrap();
    let check = p.carol.check_reserve_proof(&bob, "audit", &proof).unwrap();
    assert!(check.good);
    assert_eq!(check.total, 1_000_000);
    assert_eq!(check.spent, 0);

    assert!(!p.carol.check_reserve_proof(&bob, "audit", &mutate(&proof)).unwrap().good);
    assert!(!p.carol.check_reserve_proof(&bob, "other", &proof).unwrap().good);
    assert!(!p.carol.check_reserve_proof(&p.alice.primary_address(), "audit", &proof).unwrap().good);
    assert!(matches!(
        p.bob.get_reserve_proof(Some(0), Some(2_000_000), "audit"),
        Err(WalletError::InsufficientFunds { .. })
    ));
}

#[test]
fn test_reserve_proof_reports_later_spends() {
    let p = payment();
    let alice = p.alice.primary_address();
    let proof = p.alice.get_reserve_proof(Some(0), None, "before").unwrap();
    let before = p.carol.check_reserve_proof(&alice, "before", &proof).unwrap();
    assert!(before.good);
    assert_eq!(before.spent, 0);

    // Alice spends everything she proved.
    let mut sweep = p.alice.create_transaction(&p.bob.primary_address(), None, 1, 0, &[]).unwrap();
    p.alice.commit_transaction(&mut sweep).unwrap();
    drop(sweep);
    confirm(&p.daemon);
    let after = p.carol.check_reserve_proof(&alice, "before", &proof).unwrap();
    assert!(after.good);
    assert_eq!(after.spent, after.total);
}

#[test]
fn test_reserve_proof_is_bound_to_one_address() {
    let p = payment();
    assert_eq!(p.bob.add_subaddress_account("savings").unwrap(), 1);
    let savings = p.bob.address(1, 0).unwrap();
    let mut pending = p.alice.create_transaction(&savings, Some(400_000), 1, 0, &[]).unwrap();
    p.alice.commit_transaction(&mut pending).unwrap();
    drop(pending);
    confirm(&p.daemon);
    p.bob.refresh().unwrap();
    assert_eq!(p.bob.balance(1), 400_000);

    let proof = p.bob.get_reserve_proof(Some(1), None, "audit").unwrap();
    let check = p.carol.check_reserve_proof(&savings, "audit", &proof).unwrap();
    assert!(check.good);
    assert_eq!(check.total, 400_000);
    // The savings outputs do not pay the main address.
    assert!(!p.carol.check_reserve_proof(&p.bob.primary_address(), "audit", &proof).unwrap().good);

    let main = p.bob.get_reserve_proof(None, None, "audit").unwrap();
    let check = p.carol.check_reserve_proof(&p.bob.primary_address(), "audit", &main).unwrap();
    assert!(check.good);
    assert_eq!(check.total, 1_000_000);
}
