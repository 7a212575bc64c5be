//! Refresh progress flags.
//!
//! Read without the state guard. Each flag has one writer: the foreground
//! sets request flags (`rescan_requested`, `rebuild_cache`), the sync loop
//! clears them and owns `thread_alive`, `step_active`, `synchronized` and
//! `state`.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

/// Lifecycle of the background synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Stopped,
    Starting,
    Running,
    Rescanning,
    Stopping,
}

impl SyncState {
    fn to_u8(self) -> u8 {
        match self {
            SyncState::Stopped => 0,
            SyncState::Starting => 1,
            SyncState::Running => 2,
            SyncState::Rescanning => 3,
            SyncState::Stopping => 4,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => SyncState::Starting,
            2 => SyncState::Running,
            3 => SyncState::Rescanning,
            4 => SyncState::Stopping,
            _ => SyncState::Stopped,
        }
    }
}

#[derive(Debug)]
pub struct RefreshProgress {
    /// Auto-refresh between steps.
    pub enabled: AtomicBool,
    pub thread_alive: AtomicBool,
    pub interval_ms: AtomicU64,
    pub rescan_requested: AtomicBool,
    pub synchronized: AtomicBool,
    pub recovering_from_seed: AtomicBool,
    pub recovering_from_device: AtomicBool,
    pub rebuild_cache: AtomicBool,
    /// A sync step is executing right now.
    pub step_active: AtomicBool,
    /// Completed sync steps.
    pub steps: AtomicU64,
    state: AtomicU8,
}

impl RefreshProgress {
    pub fn new(interval: Duration) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            thread_alive: AtomicBool::new(false),
            interval_ms: AtomicU64::new(interval.as_millis() as u64),
            rescan_requested: AtomicBool::new(false),
            synchronized: AtomicBool::new(false),
            recovering_from_seed: AtomicBool::new(false),
            recovering_from_device: AtomicBool::new(false),
            rebuild_cache: AtomicBool::new(false),
            step_active: AtomicBool::new(false),
            steps: AtomicU64::new(0),
            state: AtomicU8::new(SyncState::Stopped.to_u8()),
        }
    }

    pub fn state(&self) -> SyncState {
        SyncState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: SyncState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    /// Recovering wallets must pull full blocks.
    pub fn is_recovering(&self) -> bool {
        self.recovering_from_seed.load(Ordering::SeqCst) || self.recovering_from_device.load(Ordering::SeqCst)
    }

    /// Clear a request flag, returning whether it was set.
    pub fn take(flag: &AtomicBool) -> bool {
        flag.swap(false, Ordering::SeqCst)
    }
}

impl Default for RefreshProgress {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}
