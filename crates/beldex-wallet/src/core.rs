//! Shared wallet internals.
//!
//! One `WalletCore` is shared (behind an `Arc`) by the wallet facade, the
//! sync loop, the long-poll thread and pending transactions. Wallet data sits
//! behind the state guard; everything else here is either atomic or behind
//! its own small mutex that is never held across a daemon call.

use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::guard::{StateGuard, StateHandle};
use crate::listener::{dispatch, WalletEvent, WalletListener};
use crate::progress::RefreshProgress;
use crate::state::WalletState;
use beldex_rpc::{ChainHeight, DaemonClient};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Last daemon height seen and when it was fetched.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct HeightCache {
    pub height: u64,
    pub target: u64,
    pub fetched_at: Option<Instant>,
}

impl HeightCache {
    fn age(&self) -> Option<Duration> {
        self.fetched_at.map(|t| t.elapsed())
    }
}

pub struct WalletCore {
    pub(crate) config: WalletConfig,
    pub(crate) daemon: Arc<dyn DaemonClient>,
    pub(crate) guard: StateGuard<WalletState>,
    pub(crate) progress: RefreshProgress,
    heights: Mutex<HeightCache>,
    listener: Mutex<Option<Arc<dyn WalletListener>>>,
    next_pending_id: AtomicU64,
    /// Serializes sync steps between the loop and foreground refreshes.
    step_lock: Mutex<()>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl WalletCore {
    pub(crate) fn new(config: WalletConfig, daemon: Arc<dyn DaemonClient>, state: WalletState) -> Self {
        let progress = RefreshProgress::new(config.refresh_interval());
        Self {
            config,
            daemon,
            guard: StateGuard::new(state),
            progress,
            heights: Mutex::new(HeightCache::default()),
            listener: Mutex::new(None),
            next_pending_id: AtomicU64::new(1),
            step_lock: Mutex::new(()),
        }
    }

    pub(crate) fn acquire(&self) -> StateHandle<'_, WalletState> {
        self.guard.acquire()
    }

    pub(crate) fn step_lock(&self) -> MutexGuard<'_, ()> {
        lock(&self.step_lock)
    }

    pub(crate) fn next_pending_id(&self) -> u64 {
        self.next_pending_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn set_listener(&self, listener: Option<Arc<dyn WalletListener>>) {
        *lock(&self.listener) = listener;
    }

    /// Deliver events. Must not be called with the state guard held.
    pub(crate) fn notify(&self, events: Vec<WalletEvent>) {
        if events.is_empty() {
            return;
        }
        let listener = lock(&self.listener).clone();
        dispatch(listener.as_ref(), events);
    }

    // ─── Daemon height cache ────────────────────────────────────────────────

    pub(crate) fn cached_heights(&self) -> HeightCache {
        *lock(&self.heights)
    }

    pub(crate) fn record_heights(&self, heights: ChainHeight) {
        let mut cache = lock(&self.heights);
        cache.height = heights.height;
        cache.target = heights.target_height;
        cache.fetched_at = Some(Instant::now());
    }

    /// Daemon height, refetched only when the cache is older than `min_age`.
    pub(crate) fn daemon_heights(&self, min_age: Duration) -> Result<HeightCache, WalletError> {
        let cached = self.cached_heights();
        if cached.age().is_some_and(|age| age < min_age) {
            return Ok(cached);
        }
        let fresh = self.daemon.get_height()?;
        self.record_heights(fresh);
        Ok(self.cached_heights())
    }

    /// Height for foreground queries: the cached value unless it is older
    /// than the staleness bound.
    pub(crate) fn daemon_height_for_query(&self) -> Result<u64, WalletError> {
        Ok(self.daemon_heights(self.config.daemon_height_max_age())?.height)
    }

    /// Height for the sync loop, throttled.
    pub(crate) fn daemon_height_throttled(&self) -> Result<HeightCache, WalletError> {
        self.daemon_heights(self.config.daemon_height_throttle())
    }
}
