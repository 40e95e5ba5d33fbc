//! Execution context store.
//!
//! Maps each live thread to exactly one [`TransactionState`]. Entries are
//! created lazily on first access and only ever touched by their own thread;
//! the map itself is a [`DashMap`] so concurrent insert-if-absent from many
//! threads is safe.
//!
//! Creating an entry also registers a thread-local exit guard, so the entry
//! is removed when its thread terminates even if nobody calls
//! [`ContextStore::clear`].
//!
//! Each entry is a reentrant mutex around a `RefCell`. The owner is the only
//! thread that locks it on the normal path, so the lock is never contended,
//! and nested access from the same thread re-enters the lock and then fails
//! the `RefCell` borrow with [`StateError::Busy`] instead of deadlocking.
//! [`StateHandle`] is `!Send`, which keeps a handle from leaving the thread
//! that obtained it.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use parking_lot::ReentrantMutex;

use crate::clock::{SharedClock, system_clock};
use crate::config::StateConfig;
use crate::error::{Result, StateError};
use crate::request::SharedRequest;
use crate::state::TransactionState;
use crate::token::{BrowserTokenExtractor, SharedTokenExtractor};

/// Opaque identifier of one thread of execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionContextKey(ThreadId);

impl ExecutionContextKey {
    /// Key of the calling thread.
    pub fn current() -> Self {
        Self(thread::current().id())
    }

    /// The underlying thread id.
    pub fn thread_id(self) -> ThreadId {
        self.0
    }
}

impl From<ThreadId> for ExecutionContextKey {
    fn from(id: ThreadId) -> Self {
        Self(id)
    }
}

type Entry = Arc<ReentrantMutex<RefCell<TransactionState>>>;
type StateMap = DashMap<ExecutionContextKey, Entry>;

thread_local! {
    static EXIT_GUARDS: RefCell<Vec<ExitGuard>> = const { RefCell::new(Vec::new()) };
}

/// Removes one thread's entry from one store when the thread exits.
struct ExitGuard {
    states: Weak<StateMap>,
    key: ExecutionContextKey,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if let Some(states) = self.states.upgrade() {
            states.remove(&self.key);
        }
    }
}

/// Register an exit guard for `key` in `states`, once per thread and store.
fn register_exit_guard(states: &Arc<StateMap>, key: ExecutionContextKey) {
    let weak = Arc::downgrade(states);
    // Fails only while the thread's locals are being torn down, when there
    // is nothing left to guard.
    let _ = EXIT_GUARDS.try_with(|guards| {
        let mut guards = guards.borrow_mut();
        guards.retain(|g| g.states.strong_count() > 0);
        if !guards.iter().any(|g| g.states.ptr_eq(&weak)) {
            guards.push(ExitGuard { states: weak, key });
        }
    });
}

/// Process-wide registry of per-thread transaction state.
#[derive(Debug)]
pub struct ContextStore {
    states: Arc<StateMap>,
    clock: SharedClock,
    token_extractor: SharedTokenExtractor,
}

impl ContextStore {
    /// Create a store with the system clock and default token extraction.
    pub fn new() -> Self {
        Self::from_config(&StateConfig::default())
    }

    /// Create a store from configuration.
    pub fn from_config(config: &StateConfig) -> Self {
        Self::with_collaborators(
            system_clock(),
            Arc::new(BrowserTokenExtractor::from_config(&config.browser_token)),
            config.store.initial_capacity,
        )
    }

    /// Create a store whose states use the given clock and token extractor.
    pub fn with_collaborators(
        clock: SharedClock,
        token_extractor: SharedTokenExtractor,
        initial_capacity: usize,
    ) -> Self {
        Self {
            states: Arc::new(DashMap::with_capacity(initial_capacity)),
            clock,
            token_extractor,
        }
    }

    /// The calling thread's state, created on first use.
    pub fn get(&self) -> StateHandle {
        let key = ExecutionContextKey::current();

        // Release the read guard before taking the shard write lock.
        let existing = self.states.get(&key).map(|entry| Arc::clone(entry.value()));
        let state = match existing {
            Some(state) => state,
            None => {
                let state = Arc::clone(
                    self.states
                        .entry(key)
                        .or_insert_with(|| {
                            tracing::debug!(thread = ?key.0, "Creating transaction state");
                            Arc::new(ReentrantMutex::new(RefCell::new(TransactionState::new(
                                Arc::clone(&self.clock),
                                Arc::clone(&self.token_extractor),
                            ))))
                        })
                        .value(),
                );
                register_exit_guard(&self.states, key);
                state
            }
        };

        StateHandle {
            key,
            state,
            _not_send: PhantomData,
        }
    }

    /// Run `f` against the calling thread's state.
    ///
    /// Returns [`StateError::Busy`] if the state is already borrowed further
    /// up this thread's stack.
    pub fn with_current<R>(&self, f: impl FnOnce(&mut TransactionState) -> R) -> Result<R> {
        self.get().with(f)
    }

    /// Remove the calling thread's entry.
    ///
    /// Pool workers call this when they are recycled so state never leaks
    /// into the next job. Returns whether an entry existed.
    pub fn clear(&self) -> bool {
        let key = ExecutionContextKey::current();
        let removed = self.states.remove(&key).is_some();
        tracing::debug!(thread = ?key.0, removed, "Cleared transaction state");
        removed
    }

    /// Reset the calling thread's state for a new unit of work.
    pub fn reset(&self) -> Result<()> {
        self.with_current(TransactionState::reset)
    }

    /// Attach a request to the calling thread's state.
    pub fn set_request(&self, request: SharedRequest) -> Result<()> {
        self.with_current(|state| state.set_request(request))
    }

    /// Whether `key`'s thread is running a background transaction.
    ///
    /// Threads without state are not in a transaction.
    pub fn in_background_transaction(&self, key: ExecutionContextKey) -> bool {
        self.read(key, TransactionState::in_background_transaction)
            .unwrap_or(false)
    }

    /// Whether `key`'s thread is running a request transaction.
    pub fn in_request_transaction(&self, key: ExecutionContextKey) -> bool {
        self.read(key, TransactionState::in_request_transaction)
            .unwrap_or(false)
    }

    /// Read another thread's state.
    ///
    /// This is a diagnostic escape hatch, not a concurrent-access path. The
    /// owning thread may be in the middle of a unit of work; the read blocks
    /// it for the duration of `f` and observes whatever point it had
    /// reached. Callers that need a coherent view across several reads must
    /// coordinate with the owner themselves. Never creates an entry, and
    /// returns `None` for a missing entry or one that is mutably borrowed on
    /// the calling thread.
    pub fn inspect_foreign<R>(
        &self,
        key: ExecutionContextKey,
        f: impl FnOnce(&TransactionState) -> R,
    ) -> Option<R> {
        self.read(key, f)
    }

    fn read<R>(&self, key: ExecutionContextKey, f: impl FnOnce(&TransactionState) -> R) -> Option<R> {
        let entry = self.states.get(&key).map(|e| Arc::clone(e.value()))?;
        let guard = entry.lock();
        let Ok(state) = guard.try_borrow() else {
            tracing::warn!(thread = ?key.0, "Transaction state busy, skipping read");
            return None;
        };
        Some(f(&state))
    }

    /// Whether `key` currently has an entry.
    pub fn contains(&self, key: ExecutionContextKey) -> bool {
        self.states.contains_key(&key)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to the calling thread's state. Cannot be sent to another thread.
#[derive(Debug)]
pub struct StateHandle {
    key: ExecutionContextKey,
    state: Entry,
    _not_send: PhantomData<*const ()>,
}

impl StateHandle {
    /// Key of the thread that owns this state.
    pub fn key(&self) -> ExecutionContextKey {
        self.key
    }

    /// Run `f` against the state.
    ///
    /// Uncontended on the owning thread. Nested calls on the same thread
    /// return [`StateError::Busy`].
    pub fn with<R>(&self, f: impl FnOnce(&mut TransactionState) -> R) -> Result<R> {
        let guard = self.state.lock();
        let mut state = guard.try_borrow_mut().map_err(|_| {
            tracing::warn!(thread = ?self.key.0, "Nested transaction state access");
            StateError::Busy
        })?;
        Ok(f(&mut state))
    }

    /// Whether both handles point at the same state instance.
    pub fn same_as(&self, other: &StateHandle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}
