//! Background chain synchronization.
//!
//! A dedicated sync thread pulls blocks from the daemon and applies them to
//! the wallet state one step at a time; a second thread long-polls the
//! daemon height and wakes the loop when the chain grows. Stop, refresh and
//! rescan requests are delivered to the loop as messages, so a loop waiting
//! out its interval reacts immediately.
//!
//! Each step holds the state guard only while reading the cursor and while
//! applying fetched data; daemon calls run without it.

use crate::core::WalletCore;
use crate::error::WalletError;
use crate::listener::WalletEvent;
use crate::progress::{RefreshProgress, SyncState};
use crate::scanner::apply_block;
use crate::state::ConnectionStatus;
use beldex_types::{Block, BlockHash, Hash};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// First window searched for a fork point; doubled until a match is found.
const FORK_SEARCH_WINDOW: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// The daemon has new blocks.
    Wake,
    /// Sync until synchronized, even with auto-refresh paused.
    Refresh,
    Stop,
}

struct LoopHandle {
    commands: Sender<Command>,
    sync_thread: JoinHandle<()>,
    poll_stop: Sender<()>,
    poll_thread: JoinHandle<()>,
}

// ─── Sync step ──────────────────────────────────────────────────────────────

enum Fetched {
    Hashes(Vec<BlockHash>),
    Blocks(Vec<Block>),
}

impl Fetched {
    fn len(&self) -> usize {
        match self {
            Fetched::Hashes(h) => h.len(),
            Fetched::Blocks(b) => b.len(),
        }
    }

    fn first_prev_hash(&self) -> Option<Hash> {
        match self {
            Fetched::Hashes(h) => h.first().map(|b| b.prev_hash),
            Fetched::Blocks(b) => b.first().map(|b| b.prev_hash),
        }
    }
}

/// Clears `step_active` on every exit path.
struct ActiveStep<'a>(&'a AtomicBool);

impl<'a> ActiveStep<'a> {
    fn begin(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for ActiveStep<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn stored_hash(core: &WalletCore, height: u64) -> Option<Hash> {
    let handle = core.acquire();
    let hash = handle.state().block_hashes.get(&height).copied();
    hash
}

pub(crate) fn set_connection(core: &WalletCore, status: ConnectionStatus) {
    let handle = core.acquire();
    handle.state_mut().connection = status;
}

/// Whether the daemon still has the block our cursor sits on.
fn parent_matches(core: &WalletCore, cursor: u64, fetched: &Fetched) -> Result<bool, WalletError> {
    if cursor == 0 {
        return Ok(true);
    }
    let Some(stored) = stored_hash(core, cursor - 1) else {
        return Ok(true);
    };
    match fetched.first_prev_hash() {
        Some(prev) => Ok(prev == stored),
        None => {
            let remote = core.daemon.get_hashes(cursor - 1, 1)?;
            Ok(remote.first().is_some_and(|b| b.hash == stored))
        }
    }
}

/// Lowest height whose block differs from the daemon's chain.
fn find_fork_point(core: &WalletCore, cursor: u64) -> Result<u64, WalletError> {
    let mut window = FORK_SEARCH_WINDOW;
    loop {
        let start = cursor.saturating_sub(window);
        let remote = core.daemon.get_hashes(start, (cursor - start) as usize)?;
        let stored: BTreeMap<u64, Hash> = {
            let handle = core.acquire();
            let state = handle.state();
            state.block_hashes.range(start..cursor).map(|(h, hash)| (*h, *hash)).collect()
        };
        if let Some(agreed) = remote.iter().rev().find(|b| stored.get(&b.height) == Some(&b.hash)) {
            return Ok(agreed.height + 1);
        }
        if start == 0 {
            return Ok(0);
        }
        window *= 2;
    }
}

/// Whether `cursor` is at the daemon's top, going by the throttled height
/// cache. A full window ending at or above the cached top means the cache
/// is behind, so it is refetched.
fn reached_top(core: &WalletCore, cursor: u64, window_full: bool) -> Result<bool, WalletError> {
    let cached = core.daemon_height_throttled()?;
    if cursor < cached.height {
        return Ok(false);
    }
    if !window_full {
        return Ok(true);
    }
    Ok(cursor >= core.daemon_heights(Duration::ZERO)?.height)
}

/// One sync step. Returns whether the wallet reached the daemon's top.
pub(crate) fn sync_step(core: &WalletCore) -> Result<bool, WalletError> {
    let _serial = core.step_lock();
    let _active = ActiveStep::begin(&core.progress.step_active);
    let mut events = Vec::new();
    let result = run_step(core, &mut events);
    core.progress.steps.fetch_add(1, Ordering::Relaxed);
    core.notify(events);
    result
}

fn run_step(core: &WalletCore, events: &mut Vec<WalletEvent>) -> Result<bool, WalletError> {
    let progress = &core.progress;

    if RefreshProgress::take(&progress.rescan_requested) {
        let rebuild = RefreshProgress::take(&progress.rebuild_cache);
        let previous = progress.state();
        progress.set_state(SyncState::Rescanning);
        progress.synchronized.store(false, Ordering::SeqCst);
        let reset = {
            let handle = core.acquire();
            let result = handle.state_mut().reset_for_rescan(rebuild);
            result
        };
        progress.set_state(previous);
        reset?;
        log::info!("rescan requested, restarting from genesis (rebuild cache: {rebuild})");
        events.push(WalletEvent::Updated);
    }

    let (cursor, refresh_from) = {
        let handle = core.acquire();
        let state = handle.state();
        (state.cursor, state.refresh_from_height)
    };

    let max = core.config.max_blocks_per_step;
    let fast = cursor < refresh_from && !progress.is_recovering();
    let requested = if fast { max.min((refresh_from - cursor) as usize) } else { max };
    let fetched = if fast {
        Fetched::Hashes(core.daemon.get_hashes(cursor, requested)?)
    } else {
        Fetched::Blocks(core.daemon.get_blocks(cursor, max)?)
    };

    if !parent_matches(core, cursor, &fetched)? {
        let fork = find_fork_point(core, cursor)?;
        log::warn!("chain reorganization: rolling back from {cursor} to {fork}");
        let handle = core.acquire();
        handle.state_mut().rollback(fork)?;
        progress.synchronized.store(false, Ordering::SeqCst);
        events.push(WalletEvent::Updated);
        return Ok(false);
    }

    let count = fetched.len();
    let reached = {
        let handle = core.acquire();
        let mut state = handle.state_mut();
        if state.cursor != cursor {
            log::debug!("cursor moved from {cursor} to {} during fetch, retrying", state.cursor);
            return Ok(false);
        }
        let snapshot = state.clone();
        let applied = match &fetched {
            Fetched::Hashes(hashes) => {
                for b in hashes {
                    state.block_hashes.insert(b.height, b.hash);
                    state.cursor = b.height + 1;
                }
                Ok(())
            }
            Fetched::Blocks(blocks) => blocks.iter().try_for_each(|b| apply_block(&mut state, b, events)),
        };
        if let Err(e) = applied {
            *state = snapshot;
            events.clear();
            return Err(e);
        }
        state.connection = ConnectionStatus::Connected;
        if count > 0 {
            log::debug!("applied {count} {} up to height {}", if fast { "hashes" } else { "blocks" }, state.cursor);
        }
        state.cursor
    };

    if events.iter().any(|e| matches!(e, WalletEvent::MoneyReceived { .. } | WalletEvent::MoneySpent { .. })) {
        events.push(WalletEvent::Updated);
    }

    let synchronized = count == 0 || reached_top(core, reached, count == requested)?;
    if synchronized {
        progress.recovering_from_seed.store(false, Ordering::SeqCst);
        progress.recovering_from_device.store(false, Ordering::SeqCst);
        if !progress.synchronized.swap(true, Ordering::SeqCst) {
            events.push(WalletEvent::Refreshed);
        }
    } else {
        progress.synchronized.store(false, Ordering::SeqCst);
    }
    Ok(synchronized)
}

// ─── Loop threads ───────────────────────────────────────────────────────────

fn backoff(core: &WalletCore, failures: u32) -> Duration {
    let base = core.progress.interval();
    let factor = 1u32.checked_shl(failures.min(16)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(core.config.max_backoff())
}

fn run_sync_loop(core: Arc<WalletCore>, commands: Receiver<Command>) {
    let progress = &core.progress;
    progress.thread_alive.store(true, Ordering::SeqCst);
    progress.set_state(SyncState::Running);
    log::info!("sync loop started");

    let mut failures = 0u32;
    let mut forced = false;
    let mut wait = Duration::ZERO;
    loop {
        let command = match commands.recv_timeout(wait) {
            Ok(c) => Some(c),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Command::Stop),
        };
        match command {
            Some(Command::Stop) => break,
            Some(Command::Refresh) => forced = true,
            Some(Command::Wake) | None => {}
        }

        let auto = progress.enabled.load(Ordering::SeqCst);
        if !(auto || forced || progress.rescan_requested.load(Ordering::SeqCst)) {
            wait = progress.interval();
            continue;
        }

        wait = match sync_step(&core) {
            Ok(true) => {
                failures = 0;
                forced = false;
                progress.interval()
            }
            Ok(false) => {
                failures = 0;
                Duration::ZERO
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                if e.is_retryable() {
                    log::warn!("sync step failed ({e}), retry {failures}");
                } else {
                    log::error!("sync step failed: {e}");
                }
                set_connection(&core, ConnectionStatus::Degraded);
                backoff(&core, failures)
            }
        };
    }

    progress.thread_alive.store(false, Ordering::SeqCst);
    progress.set_state(SyncState::Stopped);
    log::info!("sync loop stopped");
}

fn run_long_poll(core: Arc<WalletCore>, commands: Sender<Command>, stop: Receiver<()>) {
    loop {
        match stop.recv_timeout(core.config.long_poll_interval()) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => break,
        }
        let before = core.cached_heights().height;
        match core.daemon.get_height() {
            Ok(heights) => {
                core.record_heights(heights);
                if heights.height != before && commands.send(Command::Wake).is_err() {
                    break;
                }
            }
            Err(e) => log::debug!("long poll: {e}"),
        }
    }
}

// ─── Synchronizer ───────────────────────────────────────────────────────────

pub struct Synchronizer {
    core: Arc<WalletCore>,
    control: Mutex<Option<LoopHandle>>,
}

impl Synchronizer {
    pub(crate) fn new(core: Arc<WalletCore>) -> Self {
        Self { core, control: Mutex::new(None) }
    }

    fn control(&self) -> MutexGuard<'_, Option<LoopHandle>> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> SyncState {
        self.core.progress.state()
    }

    pub fn is_running(&self) -> bool {
        self.control().as_ref().is_some_and(|h| !h.sync_thread.is_finished())
    }

    /// Spawn the sync and long-poll threads. No-op when already running.
    pub fn start(&self) -> Result<(), WalletError> {
        let mut control = self.control();
        if control.as_ref().is_some_and(|h| !h.sync_thread.is_finished()) {
            return Ok(());
        }
        self.core.progress.set_state(SyncState::Starting);

        let (commands, command_rx) = mpsc::channel();
        let (poll_stop, poll_stop_rx) = mpsc::channel();
        let core = self.core.clone();
        let sync_thread = thread::Builder::new()
            .name("wallet-sync".into())
            .spawn(move || run_sync_loop(core, command_rx))
            .map_err(|e| WalletError::CriticalInternal(format!("spawn sync thread: {e}")))?;
        let core = self.core.clone();
        let wake = commands.clone();
        let poll_thread = thread::Builder::new()
            .name("wallet-long-poll".into())
            .spawn(move || run_long_poll(core, wake, poll_stop_rx))
            .map_err(|e| WalletError::CriticalInternal(format!("spawn long-poll thread: {e}")))?;

        *control = Some(LoopHandle { commands, sync_thread, poll_stop, poll_thread });
        Ok(())
    }

    /// Stop both threads, waiting at most the configured stop timeout. On
    /// timeout the threads stay registered, so `start` will not spawn a
    /// second loop beside them and a later `stop` can wait again.
    pub fn stop(&self) -> Result<(), WalletError> {
        let mut control = self.control();
        let Some(handle) = control.as_ref() else {
            return Ok(());
        };
        self.core.progress.set_state(SyncState::Stopping);
        let _ = handle.commands.send(Command::Stop);
        let _ = handle.poll_stop.send(());

        let deadline = Instant::now() + self.core.config.stop_timeout();
        while !(handle.sync_thread.is_finished() && handle.poll_thread.is_finished()) {
            if Instant::now() >= deadline {
                return Err(WalletError::Timeout("sync loop did not stop in time".into()));
            }
            thread::sleep(Duration::from_millis(5));
        }
        if let Some(handle) = control.take() {
            if handle.sync_thread.join().is_err() || handle.poll_thread.join().is_err() {
                return Err(WalletError::CriticalInternal("sync thread panicked".into()));
            }
        }
        self.core.progress.set_state(SyncState::Stopped);
        Ok(())
    }

    /// Sync on the calling thread until the wallet reaches the daemon's top.
    pub fn refresh(&self) -> Result<(), WalletError> {
        loop {
            match sync_step(&self.core) {
                Ok(true) => return Ok(()),
                Ok(false) => continue,
                Err(e) => {
                    if e.is_retryable() {
                        set_connection(&self.core, ConnectionStatus::Degraded);
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Ask the background loop to sync now; starts it if needed.
    pub fn refresh_async(&self) -> Result<(), WalletError> {
        self.start()?;
        if let Some(handle) = self.control().as_ref() {
            let _ = handle.commands.send(Command::Refresh);
        }
        Ok(())
    }

    pub fn request_rescan(&self, rebuild_cache: bool) {
        if rebuild_cache {
            self.core.progress.rebuild_cache.store(true, Ordering::SeqCst);
        }
        self.core.progress.rescan_requested.store(true, Ordering::SeqCst);
    }

    pub fn rescan(&self) -> Result<(), WalletError> {
        self.request_rescan(false);
        self.refresh()
    }

    pub fn rescan_async(&self) -> Result<(), WalletError> {
        self.request_rescan(false);
        self.refresh_async()
    }

    /// True if a sync step is seen running within `max_wait`.
    pub fn is_refreshing(&self, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        loop {
            if self.core.progress.step_active.load(Ordering::SeqCst) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(2)));
        }
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        if let Some(handle) = self.control().take() {
            let _ = handle.commands.send(Command::Stop);
            let _ = handle.poll_stop.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalletConfig;
    use crate::keys::WalletKeys;
    use crate::state::WalletState;
    use beldex_rpc::MemoryDaemon;
    use beldex_tx::miner_transaction;
    use beldex_types::Network;

    fn setup(config: WalletConfig) -> (Arc<MemoryDaemon>, Arc<WalletCore>) {
        let daemon = Arc::new(MemoryDaemon::new());
        let keys = WalletKeys::generate(Network::Testnet);
        let state = WalletState::new(keys, (0, 2), config.refresh_from_height).unwrap();
        let core = Arc::new(WalletCore::new(config, daemon.clone(), state));
        (daemon, core)
    }

    fn address(core: &WalletCore) -> beldex_types::Address {
        core.acquire().state().keys.primary_address()
    }

    #[test]
    fn test_step_granularity_does_not_change_result() {
        let small = WalletConfig { max_blocks_per_step: 3, ..Default::default() };
        let (daemon, core_small) = setup(small);
        let addr = address(&core_small);
        daemon.mine_filler_blocks(5, 2);
        daemon.mine_block(vec![miner_transaction(&addr, &[700], false).unwrap()]);
        daemon.mine_filler_blocks(4, 2);
        daemon.mine_block(vec![miner_transaction(&addr, &[300], false).unwrap()]);

        Synchronizer::new(core_small.clone()).refresh().unwrap();
        let state = core_small.acquire().state().clone();
        assert_eq!(state.cursor, daemon.height());
        assert_eq!(state.balance(None), 1_000);
        assert!(core_small.progress.synchronized.load(Ordering::SeqCst));
        assert!(core_small.progress.steps.load(Ordering::SeqCst) > 3);
    }

    #[test]
    fn test_fast_path_below_refresh_height() {
        let config = WalletConfig { refresh_from_height: 6, ..Default::default() };
        let (daemon, core) = setup(config);
        let addr = address(&core);
        daemon.mine_block(vec![miner_transaction(&addr, &[50], false).unwrap()]);
        daemon.mine_filler_blocks(6, 1);
        Synchronizer::new(core.clone()).refresh().unwrap();
        // The early output sits below the restore height and is skipped.
        assert_eq!(core.acquire().state().balance(None), 0);

        core.progress.recovering_from_seed.store(true, Ordering::SeqCst);
        let sync = Synchronizer::new(core.clone());
        sync.rescan().unwrap();
        assert_eq!(core.acquire().state().balance(None), 50);
        assert!(!core.progress.is_recovering());
    }

    #[test]
    fn test_reorg_rolls_back_outputs() {
        let (daemon, core) = setup(WalletConfig::default());
        let addr = address(&core);
        daemon.mine_filler_blocks(3, 1);
        daemon.mine_block(vec![miner_transaction(&addr, &[900], false).unwrap()]);
        daemon.mine_filler_blocks(2, 1);
        let sync = Synchronizer::new(core.clone());
        sync.refresh().unwrap();
        assert_eq!(core.acquire().state().balance(None), 900);

        daemon.pop_blocks(3);
        daemon.mine_filler_blocks(5, 1);
        sync.refresh().unwrap();
        let state = core.acquire().state().clone();
        assert_eq!(state.balance(None), 0);
        assert_eq!(state.cursor, daemon.height());
    }

    #[test]
    fn test_daemon_failure_is_retryable() {
        let (daemon, core) = setup(WalletConfig::default());
        daemon.set_offline(true);
        let sync = Synchronizer::new(core.clone());
        let err = sync.refresh().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(core.acquire().state().connection, ConnectionStatus::Degraded);
        daemon.set_offline(false);
        sync.refresh().unwrap();
        assert_eq!(core.acquire().state().connection, ConnectionStatus::Connected);
    }

    #[test]
    fn test_start_stop_and_wake() {
        let config = WalletConfig { refresh_interval_ms: 60_000, long_poll_interval_ms: 10, ..Default::default() };
        let (daemon, core) = setup(config);
        let sync = Synchronizer::new(core.clone());
        sync.start().unwrap();
        sync.start().unwrap();
        assert!(sync.is_running());

        let addr = address(&core);
        daemon.mine_block(vec![miner_transaction(&addr, &[42], false).unwrap()]);
        let deadline = Instant::now() + Duration::from_secs(5);
        while core.acquire().state().balance(None) != 42 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(core.acquire().state().balance(None), 42);

        // The loop is parked on a one-minute interval; stop must still be prompt.
        let started = Instant::now();
        sync.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!core.progress.thread_alive.load(Ordering::SeqCst));
        assert_eq!(sync.state(), SyncState::Stopped);
    }

    #[test]
    fn test_stop_timeout_keeps_loop_registered() {
        let config = WalletConfig { refresh_interval_ms: 10, stop_timeout_ms: 50, ..Default::default() };
        let (_, core) = setup(config);
        let sync = Synchronizer::new(core.clone());

        // Holding the guard parks the loop inside its next step.
        let held = core.acquire();
        sync.start().unwrap();
        assert!(sync.is_refreshing(Duration::from_secs(5)));
        assert!(matches!(sync.stop(), Err(WalletError::Timeout(_))));
        assert!(sync.is_running());
        assert!(core.progress.thread_alive.load(Ordering::SeqCst));

        drop(held);
        let deadline = Instant::now() + Duration::from_secs(5);
        while core.progress.thread_alive.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        sync.stop().unwrap();
        assert!(!sync.is_running());
        assert!(!core.progress.thread_alive.load(Ordering::SeqCst));
        assert_eq!(sync.state(), SyncState::Stopped);
    }

    #[test]
    fn test_height_checks_are_throttled() {
        let config = WalletConfig { daemon_height_throttle_ms: 60_000, max_blocks_per_step: 4, ..Default::default() };
        let (daemon, core) = setup(config);
        daemon.mine_filler_blocks(2, 1);
        let sync = Synchronizer::new(core.clone());
        sync.refresh().unwrap();
        assert_eq!(core.acquire().state().cursor, 3);

        // One new block: a single block fetch, no height call.
        daemon.mine_filler_blocks(1, 1);
        let calls = daemon.call_count();
        sync.refresh().unwrap();
        assert_eq!(daemon.call_count(), calls + 1);
        assert_eq!(core.acquire().state().cursor, 4);

        // More than one window past the cached height: the cache is refetched.
        daemon.mine_filler_blocks(10, 1);
        sync.refresh().unwrap();
        assert_eq!(core.acquire().state().cursor, daemon.height());
        assert_eq!(core.cached_heights().height, daemon.height());
        assert!(core.progress.synchronized.load(Ordering::SeqCst));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = WalletConfig { refresh_interval_ms: 100, max_backoff_ms: 1_000, ..Default::default() };
        let (_, core) = setup(config);
        assert_eq!(backoff(&core, 1), Duration::from_millis(200));
        assert_eq!(backoff(&core, 30), Duration::from_millis(1_000));
    }
}
