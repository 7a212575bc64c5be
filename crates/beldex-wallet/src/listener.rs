//! Wallet event callbacks.

use std::sync::Arc;

/// Receives wallet events. Called from the sync thread after the state
/// guard is released, so implementations may call back into the wallet.
pub trait WalletListener: Send + Sync {
    fn new_block(&self, _height: u64) {}

    fn money_received(&self, _txid: &str, _amount: u64) {}

    fn money_spent(&self, _txid: &str, _amount: u64) {}

    /// A refresh reached the daemon's top.
    fn refreshed(&self) {}

    /// Wallet state changed (outputs, spends or rollback).
    fn updated(&self) {}
}

/// Event collected while the guard is held, delivered after release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    NewBlock(u64),
    MoneyReceived { txid: String, amount: u64 },
    MoneySpent { txid: String, amount: u64 },
    Refreshed,
    Updated,
}

pub(crate) fn dispatch(listener: Option<&Arc<dyn WalletListener>>, events: Vec<WalletEvent>) {
    let Some(listener) = listener else {
        return;
    };
    for event in events {
        match event {
            WalletEvent::NewBlock(h) => listener.new_block(h),
            WalletEvent::MoneyReceived { txid, amount } => listener.money_received(&txid, amount),
            WalletEvent::MoneySpent { txid, amount } => listener.money_spent(&txid, amount),
            WalletEvent::Refreshed => listener.refreshed(),
            WalletEvent::Updated => listener.updated(),
        }
    }
}
