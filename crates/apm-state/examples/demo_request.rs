//! Demo of per-thread state simulating a web request and a background job
//! running side by side.
//!
//! Run with `RUST_LOG=apm_state=trace` to see the state bookkeeping events.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use apm_state::testing::MockTransaction;
use apm_state::{
    ContextStore, ExecutionContextKey, InboundRequest, ReferringTransactionInfo, Result,
    StateConfig,
};
use tracing_subscriber::EnvFilter;

fn simulate_web_request(store: &ContextStore) -> Result<()> {
    store.reset()?;
    store.set_request(
        InboundRequest::new("/checkout")
            .with_header("Cookie", "session=1; NRAGENT=tk=8c1f")
            .into_shared(),
    )?;

    store.get().with(|state| {
        // Headers arrive before the transaction object exists
        state.set_referring_transaction_info(Some(ReferringTransactionInfo::new("upstream-guid")));

        let txn = Arc::new(
            MockTransaction::new(state.now())
                .with_name("Controller/checkout/create")
                .with_apdex_t(Duration::from_millis(5))
                .with_request(true),
        );
        state.set_current_transaction(Some(txn.clone()));
        state.set_most_recent_transaction(Some(txn));

        let controller = state.push_traced_method("controller");
        {
            let mut quiet = state.traced_scope(false);
            let frame = quiet.push_traced_method("cache");
            thread::sleep(Duration::from_millis(10));
            if let Err(e) = quiet.pop_traced_method(frame, "Cache/fetch") {
                tracing::error!("Cache frame out of order: {}", e);
            }
        }
        if let Err(e) = state.pop_traced_method(controller, "Controller/checkout/create") {
            tracing::error!("Controller frame out of order: {}", e);
        }

        println!(
            "[web] {} guid for event: {:?}, guid to include: {:?}",
            state.timings().transaction_name_or_unknown(),
            state.request_guid_for_event(),
            state.request_guid_to_include(),
        );
        println!(
            "[web] snapshot: {}",
            serde_json::to_string_pretty(&state.snapshot()).unwrap_or_default()
        );
    })
}

fn simulate_background_job(store: &ContextStore) -> Result<ExecutionContextKey> {
    store.reset()?;
    store.with_current(|state| {
        let txn = Arc::new(MockTransaction::new(state.now()).with_name("OtherTransaction/Job/sync"));
        state.set_current_transaction(Some(txn.clone()));
        state.set_most_recent_transaction(Some(txn));
        state.set_record_sql(false);

        println!(
            "[job] background: {}, sql recorded: {}, guid to include: {:?}",
            state.in_background_transaction(),
            state.is_sql_recorded(),
            state.request_guid_to_include(),
        );
    })?;
    Ok(ExecutionContextKey::current())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let store = Arc::new(ContextStore::from_config(&StateConfig::load_or_default()));

    let web_store = Arc::clone(&store);
    let web = thread::spawn(move || {
        if let Err(e) = simulate_web_request(&web_store) {
            tracing::error!("Web request failed: {}", e);
        }
    });

    let job_store = Arc::clone(&store);
    let job = thread::spawn(move || {
        let key = simulate_background_job(&job_store);
        // Worker is recycled once the job finishes
        job_store.clear();
        key.unwrap_or_else(|e| {
            tracing::error!("Background job failed: {}", e);
            ExecutionContextKey::current()
        })
    });

    web.join().expect("web thread panicked");
    let job_key = job.join().expect("job thread panicked");

    println!(
        "[main] entries left: {}, job still in background transaction: {}",
        store.len(),
        store.in_background_transaction(job_key),
    );
}
