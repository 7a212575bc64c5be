//! Exclusive, reentrant access to wallet state.
//!
//! [`StateGuard::acquire`] blocks until no other thread owns the state and
//! returns a [`StateHandle`]; the owning thread may acquire again without
//! deadlocking. Ownership is tracked with an owner token (thread id plus
//! depth) under a plain mutex, and released when the last handle drops.
//! Handles are `!Send`, so the state lock is only ever taken by the owning
//! thread and never waits; a conflicting borrow on that thread panics.

use std::marker::PhantomData;
use std::sync::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Ownership {
    thread: Option<ThreadId>,
    depth: usize,
}

pub struct StateGuard<T> {
    owner: Mutex<Ownership>,
    released: Condvar,
    state: RwLock<T>,
}

impl<T> StateGuard<T> {
    pub fn new(state: T) -> Self {
        Self { owner: Mutex::new(Ownership::default()), released: Condvar::new(), state: RwLock::new(state) }
    }

    fn lock_owner(&self) -> MutexGuard<'_, Ownership> {
        self.owner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle(&self) -> StateHandle<'_, T> {
        StateHandle { guard: self, _not_send: PhantomData }
    }

    /// Block until the state is ours.
    pub fn acquire(&self) -> StateHandle<'_, T> {
        let me = thread::current().id();
        let mut owner = self.lock_owner();
        if owner.thread == Some(me) {
            owner.depth += 1;
            return self.handle();
        }
        while owner.thread.is_some() {
            owner = self.released.wait(owner).unwrap_or_else(|e| e.into_inner());
        }
        owner.thread = Some(me);
        owner.depth = 1;
        self.handle()
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`.
    pub fn try_acquire_for(&self, timeout: Duration) -> Option<StateHandle<'_, T>> {
        let me = thread::current().id();
        let deadline = Instant::now() + timeout;
        let mut owner = self.lock_owner();
        if owner.thread == Some(me) {
            owner.depth += 1;
            return Some(self.handle());
        }
        while owner.thread.is_some() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            owner = self.released.wait_timeout(owner, deadline - now).unwrap_or_else(|e| e.into_inner()).0;
        }
        owner.thread = Some(me);
        owner.depth = 1;
        Some(self.handle())
    }

    /// Some thread currently owns the state.
    pub fn is_held(&self) -> bool {
        self.lock_owner().thread.is_some()
    }

    fn release(&self) {
        let mut owner = self.lock_owner();
        owner.depth = owner.depth.saturating_sub(1);
        if owner.depth == 0 {
            owner.thread = None;
            drop(owner);
            self.released.notify_all();
        }
    }
}

/// Scoped access to the guarded state. Borrows taken through the handle
/// must end before the handle does.
pub struct StateHandle<'a, T> {
    guard: &'a StateGuard<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T> StateHandle<'_, T> {
    pub fn state(&self) -> RwLockReadGuard<'_, T> {
        match self.guard.state.try_read() {
            Ok(state) => state,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => panic!("wallet state is already borrowed mutably"),
        }
    }

    pub fn state_mut(&self) -> RwLockWriteGuard<'_, T> {
        match self.guard.state.try_write() {
            Ok(state) => state,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => panic!("wallet state is already borrowed"),
        }
    }
}

impl<T> Drop for StateHandle<'_, T> {
    fn drop(&mut self) {
        self.guard.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_reentrant_on_same_thread() {
        let guard = StateGuard::new(1u32);
        let outer = guard.acquire();
        {
            let inner = guard.acquire();
            *inner.state_mut() += 1;
        }
        assert!(guard.is_held());
        assert_eq!(*outer.state(), 2);
        drop(outer);
        assert!(!guard.is_held());
    }

    #[test]
    fn test_exclusive_across_threads() {
        let guard = Arc::new(StateGuard::new(Vec::<u32>::new()));
        let handle = guard.acquire();
        let entered = Arc::new(AtomicBool::new(false));

        let t = {
            let guard = Arc::clone(&guard);
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                let h = guard.acquire();
                entered.store(true, Ordering::SeqCst);
                h.state_mut().push(2);
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!entered.load(Ordering::SeqCst));
        handle.state_mut().push(1);
        drop(handle);
        t.join().unwrap();
        assert_eq!(*guard.acquire().state(), vec![1, 2]);
    }

    #[test]
    fn test_try_acquire_times_out() {
        let guard = Arc::new(StateGuard::new(()));
        let _held = guard.acquire();
        let other = Arc::clone(&guard);
        let got = thread::spawn(move || other.try_acquire_for(Duration::from_millis(20)).is_some())
            .join()
            .unwrap();
        assert!(!got);
    }

    #[test]
    fn test_nested_reads_and_sequential_writes() {
        let guard = StateGuard::new(String::from("a"));
        let outer = guard.acquire();
        {
            let inner = guard.acquire();
            let first = outer.state();
            let second = inner.state();
            assert_eq!(*first, *second);
        }
        outer.state_mut().push('b');
        guard.acquire().state_mut().push('c');
        assert_eq!(*outer.state(), "abc");
    }

    #[test]
    #[should_panic(expected = "already borrowed")]
    fn test_conflicting_borrow_panics() {
        let guard = StateGuard::new(0u8);
        let h = guard.acquire();
        let _read = h.state();
        let _write = h.state_mut();
    }

    #[test]
    fn test_guard_is_shareable() {
        fn assert_sync<S: Send + Sync>() {}
        assert_sync::<StateGuard<Vec<u8>>>();
    }

    #[test]
    fn test_release_on_error_path() {
        let guard = StateGuard::new(0u8);
        let failing = || -> Result<(), ()> {
            let h = guard.acquire();
            *h.state_mut() = 7;
            Err(())
        };
        assert!(failing().is_err());
        assert!(!guard.is_held());
        assert_eq!(*guard.acquire().state(), 7);
    }
}
