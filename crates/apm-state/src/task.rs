//! Task-local transaction state.
//!
//! Async work can hop between worker threads, so a thread-keyed store would
//! split one unit of work across several states. Wrapping the work in
//! [`with_transaction_state`] pins a single state to the task instead; the
//! free functions here then reach it from anywhere inside that task.

use std::cell::RefCell;

use crate::request::SharedRequest;
use crate::state::TransactionState;

tokio::task_local! {
    static CURRENT_STATE: RefCell<TransactionState>;
}

/// Run `f` with `state` as the task's transaction state.
///
/// Returns the operation result together with the state as it was when `f`
/// finished, so the caller can read timing and correlation data from it.
pub async fn with_transaction_state<F, T>(state: TransactionState, f: F) -> (T, TransactionState)
where
    F: std::future::Future<Output = T>,
{
    CURRENT_STATE
        .scope(RefCell::new(state), async {
            let result = f.await;
            let state = CURRENT_STATE.with(|cell| std::mem::take(&mut *cell.borrow_mut()));
            (result, state)
        })
        .await
}

/// Whether a task-local state is active for the current task.
pub fn is_state_active() -> bool {
    CURRENT_STATE.try_with(|_| ()).is_ok()
}

/// Run `f` against the task's state.
///
/// Returns `None` if no state is active, or if the state is already borrowed
/// by an enclosing `with_current` on the same task.
pub fn with_current<R>(f: impl FnOnce(&mut TransactionState) -> R) -> Option<R> {
    CURRENT_STATE
        .try_with(|cell| match cell.try_borrow_mut() {
            Ok(mut state) => Some(f(&mut state)),
            Err(_) => {
                tracing::warn!("Nested task-local transaction state access");
                None
            }
        })
        .ok()
        .flatten()
}

/// Reset the task's state (no-op if no state is active).
pub fn reset() {
    let _ = with_current(TransactionState::reset);
}

/// Attach a request to the task's state (no-op if no state is active).
pub fn set_request(request: SharedRequest) {
    let _ = with_current(|state| state.set_request(request));
}

/// Push a tracing override on the task's state (no-op if no state is active).
pub fn push_traced(enabled: bool) {
    let _ = with_current(|state| state.push_traced(enabled));
}

/// Pop a tracing override (returns `None` if nothing was pushed or no state
/// is active).
pub fn pop_traced() -> Option<bool> {
    with_current(TransactionState::pop_traced).flatten()
}

/// Whether tracing is enabled for the task. Defaults to enabled when no
/// state is active.
pub fn is_traced() -> bool {
    with_current(|state| state.is_traced()).unwrap_or(true)
}
