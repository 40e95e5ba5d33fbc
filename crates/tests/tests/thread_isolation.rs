//! Cross-thread integration tests
//!
//! These tests drive one shared store from many threads and async tasks and
//! check that every execution context sees only its own state.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use apm_state::testing::{ManualClock, MockTransaction};
use apm_state::{
    BrowserTokenExtractor, Clock, ContextStore, ExecutionContextKey, InboundRequest,
    TransactionState, task,
};

fn manual_store() -> (Arc<ContextStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let store = ContextStore::with_collaborators(
        clock.clone(),
        Arc::new(BrowserTokenExtractor::default()),
        16,
    );
    (Arc::new(store), clock)
}

/// Every thread gets its own instance, created exactly once and dropped when
/// the thread exits.
#[test]
fn test_concurrent_get_yields_distinct_states() {
    const THREADS: usize = 16;

    let store = Arc::new(ContextStore::new());
    let start = Arc::new(Barrier::new(THREADS));
    // Workers plus the inspecting thread
    let written = Arc::new(Barrier::new(THREADS + 1));
    let inspected = Arc::new(Barrier::new(THREADS + 1));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let store = Arc::clone(&store);
            let start = Arc::clone(&start);
            let written = Arc::clone(&written);
            let inspected = Arc::clone(&inspected);
            thread::spawn(move || {
                start.wait();
                let first = store.get();
                let second = store.get();
                assert!(first.same_as(&second));
                first.with(|state| state.set_busy_entries(i as u32)).unwrap();
                written.wait();
                inspected.wait();
            })
        })
        .collect();

    written.wait();
    let keys: HashSet<_> = handles
        .iter()
        .map(|h| ExecutionContextKey::from(h.thread().id()))
        .collect();
    assert_eq!(keys.len(), THREADS);
    assert_eq!(store.len(), THREADS);

    for (i, handle) in handles.iter().enumerate() {
        let key = ExecutionContextKey::from(handle.thread().id());
        assert_eq!(
            store.inspect_foreign(key, |state| state.busy_entries()),
            Some(i as u32)
        );
    }
    inspected.wait();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(store.len(), 0);
    for key in keys {
        assert!(!store.contains(key));
        assert_eq!(store.inspect_foreign(key, |state| state.busy_entries()), None);
    }
}

/// Short-lived threads that never call `clear` do not accumulate entries.
#[test]
fn test_exited_threads_leave_no_entries() {
    let (store, _) = manual_store();
    store.reset().unwrap();

    for _ in 0..4 {
        let workers: Vec<_> = (0..25)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store.reset().unwrap();
                    store.with_current(|state| state.push_traced(false)).unwrap();
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        // Only this thread's entry survives
        assert_eq!(store.len(), 1);
    }

    assert!(store.contains(ExecutionContextKey::current()));
}

/// Re-entering the store from inside an open borrow fails fast.
#[test]
fn test_nested_access_does_not_hang() {
    let (store, _) = manual_store();
    let nested_store = Arc::clone(&store);

    let worker = thread::spawn(move || {
        let handle = nested_store.get();
        handle
            .with(|_| {
                (
                    nested_store.reset().is_err(),
                    handle.with(|_| ()).is_err(),
                )
            })
            .unwrap()
    });

    assert_eq!(worker.join().unwrap(), (true, true));
    assert!(store.is_empty());
}

/// Tracing overrides pushed on one thread never leak into another.
#[test]
fn test_traced_stack_is_thread_local() {
    let store = Arc::new(ContextStore::new());
    let pushed = Arc::new(Barrier::new(2));

    let writer_store = Arc::clone(&store);
    let writer_pushed = Arc::clone(&pushed);
    let writer = thread::spawn(move || {
        writer_store
            .with_current(|state| state.push_traced(false))
            .unwrap();
        writer_pushed.wait();
        writer_store.with_current(|state| state.is_traced()).unwrap()
    });

    pushed.wait();
    assert!(store.with_current(|state| state.is_traced()).unwrap());
    assert!(!writer.join().unwrap());
}

/// A recycled pool worker starts the next job from a clean state.
#[test]
fn test_clear_between_jobs_on_worker() {
    let (store, clock) = manual_store();

    let worker_store = Arc::clone(&store);
    let worker = thread::spawn(move || {
        worker_store
            .with_current(|state| {
                state.set_current_transaction(Some(Arc::new(MockTransaction::new(clock.now()))));
                state.set_record_sql(false);
                assert!(state.in_background_transaction());
            })
            .unwrap();
        worker_store.clear();

        worker_store
            .with_current(|state| {
                assert!(!state.in_background_transaction());
                assert!(state.is_sql_recorded());
            })
            .unwrap();
        ExecutionContextKey::current()
    });

    let key = worker.join().unwrap();
    assert!(!store.in_background_transaction(key));
    assert!(!store.contains(key));
}

/// No state yet, request with a token, no transaction: the GUID stays private.
#[test]
fn test_token_without_transaction_keeps_guid_private() {
    let (store, _) = manual_store();
    let key = ExecutionContextKey::current();
    assert!(!store.contains(key));

    let handle = store.get();
    store.set_request(
        InboundRequest::new("/cart")
            .with_header("Cookie", "NRAGENT=tk=abc")
            .into_shared(),
    )
    .unwrap();

    handle
        .with(|state| {
            assert_eq!(state.request_token(), Some("abc"));
            assert!(state.most_recent_transaction().is_none());
            assert!(!state.include_guid());
            assert_eq!(state.request_guid_for_event(), None);
            assert_eq!(state.request_guid_to_include(), Some(String::new()));
        })
        .unwrap();
}

/// A slow transaction with a token hands its GUID back.
#[test]
fn test_slow_transaction_includes_guid() {
    let (store, clock) = manual_store();
    store.reset().unwrap();
    store
        .set_request(
            InboundRequest::new("/cart")
                .with_cookie("NRAGENT", "tk=abc")
                .into_shared(),
        )
        .unwrap();

    store
        .with_current(|state| {
            state.set_most_recent_transaction(Some(Arc::new(
                MockTransaction::new(clock.now())
                    .with_apdex_t(Duration::from_millis(500))
                    .with_guid("9f8e7d6c")
                    .with_request(true),
            )));
        })
        .unwrap();
    clock.advance(Duration::from_millis(800));

    store
        .with_current(|state| {
            assert!(state.include_guid());
            assert_eq!(state.request_guid_to_include(), Some("9f8e7d6c".to_string()));
            assert_eq!(state.request_guid_for_event(), Some("9f8e7d6c".to_string()));
        })
        .unwrap();
}

/// Timing queries right after a reset fall back to the reset itself.
#[test]
fn test_reset_timing_fallback() {
    let (store, clock) = manual_store();
    store
        .with_current(|state| {
            state.set_most_recent_transaction(Some(Arc::new(
                MockTransaction::new(clock.now() - chrono::Duration::seconds(30))
                    .with_queue_time(Duration::from_millis(40))
                    .with_name("Controller/old"),
            )));
            assert_eq!(state.transaction_queue_time(), 0.04);
        })
        .unwrap();

    clock.advance(Duration::from_secs(2));
    store.reset().unwrap();

    store
        .with_current(|state| {
            assert_eq!(state.transaction_start_time(), clock.now());
            assert_eq!(state.transaction_queue_time(), 0.0);
            assert_eq!(state.transaction_name(), None);
            assert_eq!(state.timings().start_time, clock.now());
        })
        .unwrap();
}

/// Task-local state follows a task across worker threads.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_task_state_survives_thread_hops() {
    let tasks: Vec<_> = (0..8)
        .map(|i| {
            tokio::spawn(task::with_transaction_state(
                TransactionState::default(),
                async move {
                    let enabled = i % 2 == 0;
                    task::push_traced(enabled);
                    for _ in 0..10 {
                        tokio::task::yield_now().await;
                        assert_eq!(task::is_traced(), enabled);
                    }
                    task::pop_traced()
                },
            ))
        })
        .collect();

    for (i, handle) in tasks.into_iter().enumerate() {
        let (popped, state) = handle.await.unwrap();
        assert_eq!(popped, Some(i % 2 == 0));
        assert!(state.is_traced());
    }
}
