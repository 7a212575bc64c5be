mod common;

use beldex_rpc::MemoryDaemon;
use beldex_wallet::{MultisigStatus, PendingKind, Wallet, WalletError, WalletType};
use common::{confirm, fund, init, wallet};
use std::sync::Arc;

fn others(msgs: &[String], me: usize) -> Vec<String> {
    msgs.iter().enumerate().filter(|(i, _)| *i != me).map(|(_, m)| m.clone()).collect()
}

/// Three wallets turned into one 2-of-3 multisig wallet.
fn two_of_three(daemon: &Arc<MemoryDaemon>) -> (Vec<Wallet>, String) {
    let wallets: Vec<Wallet> = (0..3).map(|_| wallet(daemon)).collect();
    let round1: Vec<String> = wallets.iter().map(|w| w.get_multisig_info().unwrap()).collect();
    let round2: Vec<String> =
        wallets.iter().enumerate().map(|(i, w)| w.make_multisig(&others(&round1, i), 2).unwrap()).collect();
    let addresses: Vec<String> =
        wallets.iter().enumerate().map(|(i, w)| w.finalize_multisig(&others(&round2, i)).unwrap()).collect();
    assert!(addresses.iter().all(|a| *a == addresses[0]));
    let address = addresses[0].clone();
    (wallets, address)
}

#[test]
fn test_finalize_agrees_and_happens_once() {
    init();
    let daemon = Arc::new(MemoryDaemon::new());
    let (wallets, address) = two_of_three(&daemon);
    for w in &wallets {
        assert_eq!(w.primary_address(), address);
        assert_eq!(w.wallet_type(), WalletType::Multisig);
        assert_eq!(w.multisig(), MultisigStatus { is_multisig: true, is_ready: true, threshold: 2, total: 3 });
        assert!(matches!(w.finalize_multisig(&[]), Err(WalletError::MultisigAlreadyFinalized)));
        assert!(matches!(w.make_multisig(&[], 2), Err(WalletError::MultisigAlreadyFinalized)));
    }
}

#[test]
fn test_out_of_order_rounds() {
    init();
    let daemon = Arc::new(MemoryDaemon::new());
    let (a, b, c) = (wallet(&daemon), wallet(&daemon), wallet(&daemon));
    let infos = [a.get_multisig_info().unwrap(), b.get_multisig_info().unwrap(), c.get_multisig_info().unwrap()];
    assert!(matches!(a.exchange_multisig_keys(&infos[1..]), Err(WalletError::MultisigRoundMismatch(_))));
    assert!(matches!(a.finalize_multisig(&infos[1..]), Err(WalletError::MultisigRoundMismatch(_))));
    // A bad threshold leaves the session usable.
    assert!(a.make_multisig(&infos[1..], 4).is_err());
    assert!(a.make_multisig(&infos[1..], 2).is_ok());
    assert!(!a.multisig().is_multisig);
    assert_eq!(a.wallet_type(), WalletType::Full);
}

#[test]
fn test_two_signers_spend() {
    init();
    let daemon = Arc::new(MemoryDaemon::new());
    let (wallets, address) = two_of_three(&daemon);
    let carol = wallet(&daemon);
    fund(&daemon, &address, &[5_000_000], 100);
    for w in &wallets {
        w.refresh().unwrap();
        assert_eq!(w.balance(0), 5_000_000);
        assert!(w.has_multisig_partial_key_images());
    }

    // Nobody can spend before the partial images are exchanged.
    assert!(matches!(
        wallets[0].create_transaction(&carol.primary_address(), Some(1_000_000), 1, 0, &[]),
        Err(WalletError::InsufficientFunds { .. })
    ));
    let images: Vec<String> = wallets.iter().map(|w| w.export_multisig_images().unwrap()).collect();
    for (i, w) in wallets.iter().enumerate() {
        assert_eq!(w.import_multisig_images(&others(&images, i)).unwrap(), 1);
        assert!(!w.has_multisig_partial_key_images());
    }

    let (a, b) = (&wallets[0], &wallets[1]);
    let started = a.create_transaction(&carol.primary_address(), Some(1_000_000), 1, 0, &[]).unwrap();
    assert!(matches!(started.kind(), PendingKind::MultisigPartial { .. }));
    let sign_data = a.export_multisig_sign_data(&started).unwrap();
    a.dispose_transaction(started);

    let mut cosigned = b.restore_multisig_transaction(&sign_data).unwrap();
    b.sign_multisig_transaction(&mut cosigned).unwrap();
    let sign_data = b.export_multisig_sign_data(&cosigned).unwrap();
    b.dispose_transaction(cosigned);

    let mut finished = a.restore_multisig_transaction(&sign_data).unwrap();
    a.sign_multisig_transaction(&mut finished).unwrap();
    a.commit_transaction(&mut finished).unwrap();
    drop(finished);

    confirm(&daemon);
    carol.refresh().unwrap();
    assert_eq!(carol.balance(0), 1_000_000);
    a.refresh().unwrap();
    assert!(a.balance(0) < 4_000_000);
}

#[test]
fn test_multisig_images_reject_tampering() {
    init();
    let daemon = Arc::new(MemoryDaemon::new());
    let (wallets, address) = two_of_three(&daemon);
    fund(&daemon, &address, &[5_000_000], 50);
    for w in &wallets {
        w.refresh().unwrap();
    }
    let blob = wallets[1].export_multisig_images().unwrap();
    let tampered = common::mutate(&blob);
    assert!(matches!(
        wallets[0].import_multisig_images(&[tampered]),
        Err(WalletError::InvalidSignature(_))
    ));
    assert!(wallets[0].has_multisig_partial_key_images());
}
