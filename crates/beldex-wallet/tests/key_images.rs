mod common;

use beldex_crypto::scalar_from_hex;
use beldex_rpc::MemoryDaemon;
use beldex_types::Network;
use beldex_wallet::{KeyImageImport, KeysColdSigner, Wallet, WalletError, WalletKeys};
use common::{config, confirm, fund, init, wallet};
use std::sync::Arc;

struct Setup {
    alice: Wallet,
    /// Watch-only copy of Alice.
    watch: Wallet,
    spent: u64,
    change: u64,
}

/// Alice holds 3 000 000 and 2 000 000, then spends the smaller output.
fn setup() -> Setup {
    init();
    let daemon = Arc::new(MemoryDaemon::new());
    let alice = wallet(&daemon);
    let bob = wallet(&daemon);
    fund(&daemon, &alice.primary_address(), &[3_000_000, 2_000_000], 100);
    alice.refresh().unwrap();

    let mut pending = alice.create_transaction(&bob.primary_address(), Some(1_000_000), 1, 0, &[]).unwrap();
    let change = pending.change();
    alice.commit_transaction(&mut pending).unwrap();
    drop(pending);
    confirm(&daemon);
    alice.refresh().unwrap();

    let watch =
        Wallet::from_view_key(config(), daemon.clone(), &alice.view_secret_key_hex(), &alice.spend_public_key_hex())
            .unwrap();
    watch.refresh().unwrap();
    Setup { alice, watch, spent: 2_000_000, change }
}

fn signer(alice: &Wallet) -> KeysColdSigner {
    let secret = scalar_from_hex(&alice.spend_secret_key_hex().unwrap()).unwrap();
    KeysColdSigner::new(WalletKeys::from_spend_secret(secret, Network::Testnet)).unwrap()
}

#[test]
fn test_watch_only_cannot_see_spends_until_images_arrive() {
    let s = setup();
    assert!(s.watch.watch_only());
    // Received outputs are visible, the spend is not.
    assert_eq!(s.watch.balance(0), 5_000_000 + s.change);
    assert!(matches!(s.watch.export_key_images(true), Err(WalletError::WatchOnly(_))));

    let result = s.watch.cold_key_image_sync(&signer(&s.alice)).unwrap();
    assert_eq!(result.imported, 3);
    assert_eq!(result.spent, s.spent);
    assert_eq!(result.unspent, 3_000_000 + s.change);
    assert_eq!(s.watch.balance(0), s.alice.balance(0));
}

#[test]
fn test_reimport_is_a_no_op() {
    let s = setup();
    let blob = s.alice.export_key_images(true).unwrap();
    let first = s.watch.import_key_images(&blob).unwrap();
    let balance = s.watch.balance(0);
    let transfers = s.watch.transfers();

    let second = s.watch.import_key_images(&blob).unwrap();
    assert_eq!(first, second);
    assert_eq!(s.watch.balance(0), balance);
    assert_eq!(s.watch.transfers(), transfers);
    assert_eq!(balance, s.alice.balance(0));
}

#[test]
fn test_foreign_or_mutated_blobs_are_rejected() {
    let s = setup();
    let before = s.watch.balance(0);

    let stranger = Wallet::create(config(), Arc::new(MemoryDaemon::new())).unwrap();
    let foreign = stranger.export_key_images(true).unwrap();
    assert!(matches!(s.watch.import_key_images(&foreign), Err(WalletError::InvalidSignature(_))));

    let blob = s.alice.export_key_images(true).unwrap();
    let mut bytes = blob.into_bytes();
    let i = bytes.len() / 2;
    bytes[i] = if bytes[i] == b'0' { b'1' } else { b'0' };
    let mutated = String::from_utf8(bytes).unwrap();
    assert!(matches!(s.watch.import_key_images(&mutated), Err(WalletError::InvalidSignature(_))));

    assert_eq!(s.watch.balance(0), before);
}

#[test]
fn test_outputs_export_round_trip_through_signer() {
    let s = setup();
    let outputs = s.watch.export_outputs(true).unwrap();
    let blob = signer(&s.alice).sign_outputs(&outputs).unwrap();
    let result: KeyImageImport = s.watch.import_key_images(&blob).unwrap();
    assert_eq!(result.spent, s.spent);
    // Every output has an image now.
    let again = s.watch.cold_key_image_sync(&signer(&s.alice)).unwrap();
    assert_eq!(again, KeyImageImport::default());
}

#[test]
fn test_rescan_spent_after_cache_rebuild() {
    let s = setup();
    let balance = s.alice.balance(0);
    s.alice.rebuild_wallet_cache();
    s.alice.refresh().unwrap();
    assert_eq!(s.alice.balance(0), balance);
    assert_eq!(s.alice.rescan_spent().unwrap(), 0);
}
