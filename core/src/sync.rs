//! Named mutual exclusion across invocation chains
//!
//! Locks are created on first use and dropped again once nobody holds or
//! waits for them. They are reentrant for the owning thread and granted in
//! arrival order.

use anyhow::{bail, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::info;

static GLOBAL: OnceLock<NamedLocks> = OnceLock::new();

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
    next_ticket: u64,
    waiting: VecDeque<u64>,
}

#[derive(Debug, Default)]
struct NamedLock {
    state: Mutex<LockState>,
    released: Condvar,
}

impl NamedLock {
    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self, timeout: Duration) -> bool {
        let me = thread::current().id();
        let mut state = self.state();
        if state.owner == Some(me) {
            state.depth += 1;
            return true;
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiting.push_back(ticket);
        let deadline = Instant::now() + timeout;

        loop {
            if state.owner.is_none() && state.waiting.front() == Some(&ticket) {
                state.waiting.pop_front();
                state.owner = Some(me);
                state.depth = 1;
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                state.waiting.retain(|t| *t != ticket);
                self.released.notify_all();
                return false;
            }
            state = self
                .released
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn release(&self) {
        let mut state = self.state();
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.owner = None;
            self.released.notify_all();
        }
    }
}

/// A lock plus the number of guards and waiters currently using it
#[derive(Debug, Default)]
struct Slot {
    lock: Arc<NamedLock>,
    users: usize,
}

/// Process-wide registry of named locks
#[derive(Debug, Default)]
pub struct NamedLocks {
    locks: Mutex<HashMap<String, Slot>>,
}

impl NamedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static NamedLocks {
        GLOBAL.get_or_init(NamedLocks::new)
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enter the critical section `name`, waiting at most `timeout`
    pub fn acquire(&self, name: &str, timeout: Duration) -> Result<NamedLockGuard<'_>> {
        let lock = {
            let mut slots = self.slots();
            let slot = slots.entry(name.to_string()).or_default();
            slot.users += 1;
            slot.lock.clone()
        };

        info!(name, "Waiting for mutex");
        if !lock.acquire(timeout) {
            self.forget(name);
            bail!("Timed out after {} ms waiting for mutex '{}'", timeout.as_millis(), name);
        }
        info!(name, "Entered mutex");
        Ok(NamedLockGuard {
            locks: self,
            name: name.to_string(),
            lock,
        })
    }

    /// Number of names currently held or waited for
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn forget(&self, name: &str) {
        let mut slots = self.slots();
        if let Some(slot) = slots.get_mut(name) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                slots.remove(name);
            }
        }
    }
}

/// Holds a named lock until dropped
#[derive(Debug)]
pub struct NamedLockGuard<'a> {
    locks: &'a NamedLocks,
    name: String,
    lock: Arc<NamedLock>,
}

impl Drop for NamedLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
        self.locks.forget(&self.name);
        info!(name = %self.name, "Exited mutex");
    }
}
