//! Per-execution-context transaction state.
//!
//! A [`TransactionState`] holds every piece of mutable bookkeeping for the
//! unit of work running on one thread (or task): the inbound request and its
//! correlation token, cross-app correlation inputs that arrive in headers
//! before a transaction object exists, the traced-method stack, and the
//! tracing/recording switches.
//!
//! The instance is reused across units of work. [`TransactionState::reset`]
//! marks the boundary of "no transaction object yet"; it deliberately leaves
//! the current transaction, the untraced stack, the record flags and the
//! traced-method stack alone because their owners manage them on a longer
//! lifecycle.

use std::any::Any;
use std::cell::OnceCell;
use std::fmt;
use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::{SharedClock, system_clock};
use crate::error::Result;
use crate::flags::{RecordFlag, UntracedStack};
use crate::request::SharedRequest;
use crate::timings::TransactionTimings;
use crate::token::{BrowserTokenExtractor, SharedTokenExtractor};
use crate::traced_method_stack::{FrameId, TracedMethodFrame, TracedMethodStack};
use crate::transaction::{ErrorId, SharedTransaction};

/// Correlation data sent by an upstream application that called us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferringTransactionInfo {
    /// GUID of the calling transaction.
    pub referring_guid: String,
    /// Trip id shared by every transaction in the cross-app trip.
    pub trip_id: Option<String>,
    /// Path hash of the caller.
    pub path_hash: Option<String>,
}

impl ReferringTransactionInfo {
    /// Create info for a caller identified only by its GUID.
    pub fn new(referring_guid: impl Into<String>) -> Self {
        Self {
            referring_guid: referring_guid.into(),
            trip_id: None,
            path_hash: None,
        }
    }
}

/// An opaque value owned by another subsystem, parked on the state so it can
/// be reached from anywhere on the same thread.
#[derive(Default)]
pub struct PassThrough(Option<Box<dyn Any + Send>>);

impl PassThrough {
    /// Borrow the value if it is present and of type `T`.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_ref()?.downcast_ref()
    }

    /// Mutably borrow the value if it is present and of type `T`.
    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.0.as_mut()?.downcast_mut()
    }

    /// Replace the value.
    pub fn set<T: Any + Send>(&mut self, value: T) {
        self.0 = Some(Box::new(value));
    }

    /// Remove and return the value if it is of type `T`.
    ///
    /// A value of another type is left in place.
    pub fn take<T: Any>(&mut self) -> Option<T> {
        match self.0.take()?.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.0 = Some(other);
                None
            }
        }
    }

    /// Whether a value is stored.
    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Debug for PassThrough {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PassThrough")
            .field(&if self.is_set() { "set" } else { "empty" })
            .finish()
    }
}

/// All mutable bookkeeping for the transaction on one execution context.
pub struct TransactionState {
    clock: SharedClock,
    token_extractor: SharedTokenExtractor,

    // Fallback start time when no transaction object exists yet
    last_reset_time: DateTime<Utc>,
    most_recent_transaction: Option<SharedTransaction>,
    timings: OnceCell<TransactionTimings>,

    request: Option<SharedRequest>,
    request_token: Option<String>,
    request_ignore_end_user: bool,

    client_cross_app_id: Option<String>,
    referring_transaction_info: Option<ReferringTransactionInfo>,
    is_cross_app_caller: bool,

    current_transaction: Option<SharedTransaction>,
    traced_method_stack: TracedMethodStack,
    untraced: UntracedStack,
    record_transaction_trace: RecordFlag,
    record_sql: RecordFlag,

    busy_entries: u32,
    sql_sampler_data: PassThrough,
    transaction_sample_builder: PassThrough,
}

impl TransactionState {
    /// Create a fresh state reading time from `clock` and tokens through
    /// `token_extractor`.
    pub fn new(clock: SharedClock, token_extractor: SharedTokenExtractor) -> Self {
        let last_reset_time = clock.now();
        Self {
            clock,
            token_extractor,
            last_reset_time,
            most_recent_transaction: None,
            timings: OnceCell::new(),
            request: None,
            request_token: None,
            request_ignore_end_user: false,
            client_cross_app_id: None,
            referring_transaction_info: None,
            is_cross_app_caller: false,
            current_transaction: None,
            traced_method_stack: TracedMethodStack::new(),
            untraced: UntracedStack::default(),
            record_transaction_trace: RecordFlag::Unset,
            record_sql: RecordFlag::Unset,
            busy_entries: 0,
            sql_sampler_data: PassThrough::default(),
            transaction_sample_builder: PassThrough::default(),
        }
    }

    /// Start a new unit of work on this state.
    ///
    /// Clears the transaction reference, cached timings, request data and
    /// cross-app caller/callee status, and restarts the fallback clock.
    pub fn reset(&mut self) {
        self.last_reset_time = self.clock.now();
        self.most_recent_transaction = None;
        self.timings = OnceCell::new();
        self.request = None;
        self.request_token = None;
        self.request_ignore_end_user = false;
        self.is_cross_app_caller = false;
        self.referring_transaction_info = None;
        tracing::trace!(at = %self.last_reset_time, "Transaction state reset");
    }

    // -- Request data --

    /// Attach the inbound request and derive its correlation token.
    pub fn set_request(&mut self, request: SharedRequest) {
        self.request_token = self.token_extractor.extract(request.as_ref());
        self.request = Some(request);
    }

    /// The inbound request for this unit of work.
    pub fn request(&self) -> Option<&SharedRequest> {
        self.request.as_ref()
    }

    /// Token extracted from the request when it was attached.
    pub fn request_token(&self) -> Option<&str> {
        self.request_token.as_deref()
    }

    /// Whether end-user monitoring should skip this request.
    pub fn request_ignore_end_user(&self) -> bool {
        self.request_ignore_end_user
    }

    /// Mark the request as ignored for end-user monitoring.
    pub fn set_request_ignore_end_user(&mut self, ignore: bool) {
        self.request_ignore_end_user = ignore;
    }

    // -- Cross app tracing --
    //
    // Populated from headers, usually before the transaction starts.

    /// Cross-app id of the client that called us.
    pub fn client_cross_app_id(&self) -> Option<&str> {
        self.client_cross_app_id.as_deref()
    }

    pub fn set_client_cross_app_id(&mut self, id: Option<String>) {
        self.client_cross_app_id = id;
    }

    pub fn referring_transaction_info(&self) -> Option<&ReferringTransactionInfo> {
        self.referring_transaction_info.as_ref()
    }

    pub fn set_referring_transaction_info(&mut self, info: Option<ReferringTransactionInfo>) {
        self.referring_transaction_info = info;
    }

    pub fn set_is_cross_app_caller(&mut self, caller: bool) {
        self.is_cross_app_caller = caller;
    }

    /// Whether this unit of work made an outbound cross-app call.
    pub fn is_cross_app_caller(&self) -> bool {
        self.is_cross_app_caller
    }

    /// Whether this unit of work was called by another application.
    pub fn is_cross_app_callee(&self) -> bool {
        self.referring_transaction_info.is_some()
    }

    /// GUID of the most recent transaction.
    pub fn request_guid(&self) -> Option<String> {
        self.most_recent_transaction.as_ref()?.guid()
    }

    /// GUID to attach to analytics events, when this unit of work takes
    /// part in cross-process correlation.
    pub fn request_guid_for_event(&self) -> Option<String> {
        if !(self.is_cross_app_callee() || self.is_cross_app_caller() || self.include_guid()) {
            return None;
        }
        self.request_guid()
    }

    /// GUID to hand back to the browser.
    ///
    /// Returns `Some("")` when the GUID is withheld, and `None` only when it
    /// should be included but the transaction has none.
    pub fn request_guid_to_include(&self) -> Option<String> {
        if !self.include_guid() {
            return Some(String::new());
        }
        self.request_guid()
    }

    /// Whether the GUID should be handed back to the browser.
    ///
    /// Requires a request token and a transaction that has run strictly
    /// longer than its apdex threshold.
    pub fn include_guid(&self) -> bool {
        let (Some(_), Some(txn)) = (&self.request_token, &self.most_recent_transaction) else {
            return false;
        };
        let app_time = self.timings().app_time_in_seconds(self.clock.now());
        app_time > txn.apdex_t().as_secs_f64()
    }

    // -- Transactions --

    pub fn most_recent_transaction(&self) -> Option<&SharedTransaction> {
        self.most_recent_transaction.as_ref()
    }

    /// Associate the transaction whose data timing and correlation queries
    /// read from. Does not invalidate already computed timings.
    pub fn set_most_recent_transaction(&mut self, txn: Option<SharedTransaction>) {
        self.most_recent_transaction = txn;
    }

    /// The transaction currently executing on this context.
    pub fn current_transaction(&self) -> Option<&SharedTransaction> {
        self.current_transaction.as_ref()
    }

    pub fn set_current_transaction(&mut self, txn: Option<SharedTransaction>) {
        self.current_transaction = txn;
    }

    /// Whether a transaction without an inbound request is running.
    pub fn in_background_transaction(&self) -> bool {
        self.current_transaction
            .as_ref()
            .is_some_and(|txn| !txn.has_request())
    }

    /// Whether a transaction started by an inbound request is running.
    pub fn in_request_transaction(&self) -> bool {
        self.current_transaction
            .as_ref()
            .is_some_and(|txn| txn.has_request())
    }

    // -- Timing --

    /// Timing snapshot, computed on first use after a reset.
    pub fn timings(&self) -> &TransactionTimings {
        self.timings.get_or_init(|| {
            TransactionTimings::new(
                self.transaction_queue_time(),
                self.transaction_start_time(),
                self.transaction_name(),
            )
        })
    }

    /// Start of the most recent transaction, or of the last reset.
    pub fn transaction_start_time(&self) -> DateTime<Utc> {
        match &self.most_recent_transaction {
            Some(txn) => txn.start_time(),
            None => self.last_reset_time,
        }
    }

    /// Queue time of the most recent transaction in seconds, or `0.0`.
    pub fn transaction_queue_time(&self) -> f64 {
        self.most_recent_transaction
            .as_ref()
            .map_or(0.0, |txn| txn.queue_time().as_secs_f64())
    }

    pub fn transaction_name(&self) -> Option<String> {
        self.most_recent_transaction.as_ref()?.best_name()
    }

    pub fn transaction_noticed_error_ids(&self) -> Vec<ErrorId> {
        self.most_recent_transaction
            .as_ref()
            .map(|txn| txn.noticed_error_ids())
            .unwrap_or_default()
    }

    // -- Execution tracing on this context --

    /// Push a local tracing override. Pair with [`pop_traced`](Self::pop_traced),
    /// or use [`traced_scope`](Self::traced_scope).
    pub fn push_traced(&mut self, enabled: bool) {
        self.untraced.push(enabled);
    }

    /// Pop the innermost tracing override; `None` if nothing was pushed.
    pub fn pop_traced(&mut self) -> Option<bool> {
        self.untraced.pop()
    }

    /// Whether tracing is enabled at the current nesting level.
    pub fn is_traced(&self) -> bool {
        self.untraced.is_traced()
    }

    /// Push a tracing override that is popped when the guard drops,
    /// including during unwinding.
    pub fn traced_scope(&mut self, enabled: bool) -> TracedScope<'_> {
        self.push_traced(enabled);
        TracedScope { state: self }
    }

    // -- Transaction traces and SQL --

    pub fn set_record_transaction_trace(&mut self, flag: impl Into<RecordFlag>) {
        self.record_transaction_trace = flag.into();
    }

    pub fn set_record_sql(&mut self, flag: impl Into<RecordFlag>) {
        self.record_sql = flag.into();
    }

    /// True unless transaction traces were explicitly disabled.
    pub fn is_transaction_traced(&self) -> bool {
        self.record_transaction_trace.is_enabled()
    }

    /// True unless SQL recording was explicitly disabled.
    pub fn is_sql_recorded(&self) -> bool {
        self.record_sql.is_enabled()
    }

    // -- Pass-through data for other subsystems --

    /// Busy-time calculator entry count.
    pub fn busy_entries(&self) -> u32 {
        self.busy_entries
    }

    pub fn set_busy_entries(&mut self, entries: u32) {
        self.busy_entries = entries;
    }

    pub fn sql_sampler_data(&self) -> &PassThrough {
        &self.sql_sampler_data
    }

    pub fn sql_sampler_data_mut(&mut self) -> &mut PassThrough {
        &mut self.sql_sampler_data
    }

    pub fn transaction_sample_builder(&self) -> &PassThrough {
        &self.transaction_sample_builder
    }

    pub fn transaction_sample_builder_mut(&mut self) -> &mut PassThrough {
        &mut self.transaction_sample_builder
    }

    /// Call stack of instrumented frames. Never reconstructed by `reset`.
    pub fn traced_method_stack(&self) -> &TracedMethodStack {
        &self.traced_method_stack
    }

    pub fn traced_method_stack_mut(&mut self) -> &mut TracedMethodStack {
        &mut self.traced_method_stack
    }

    /// Push an instrumented frame stamped with this state's clock.
    pub fn push_traced_method(&mut self, tag: impl Into<String>) -> FrameId {
        let now = self.clock.now();
        self.traced_method_stack.push_frame(tag, now)
    }

    /// Pop the instrumented frame `frame`, naming it `name`.
    pub fn pop_traced_method(
        &mut self,
        frame: FrameId,
        name: impl Into<String>,
    ) -> Result<TracedMethodFrame> {
        let now = self.clock.now();
        Ok(self.traced_method_stack.pop_frame(frame, name, now)?)
    }

    /// Current time according to this state's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Read-only summary for diagnostics.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            transaction_start_time: self.transaction_start_time(),
            transaction_name: self.transaction_name(),
            has_request: self.request.is_some(),
            has_request_token: self.request_token.is_some(),
            is_cross_app_caller: self.is_cross_app_caller(),
            is_cross_app_callee: self.is_cross_app_callee(),
            in_background_transaction: self.in_background_transaction(),
            in_request_transaction: self.in_request_transaction(),
            is_traced: self.is_traced(),
            traced_method_depth: self.traced_method_stack.depth(),
            record_transaction_trace: self.record_transaction_trace,
            record_sql: self.record_sql,
            busy_entries: self.busy_entries,
        }
    }
}

impl Default for TransactionState {
    fn default() -> Self {
        Self::new(system_clock(), std::sync::Arc::new(BrowserTokenExtractor::default()))
    }
}

impl fmt::Debug for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionState")
            .field("last_reset_time", &self.last_reset_time)
            .field("most_recent_transaction", &self.most_recent_transaction)
            .field("request", &self.request)
            .field("request_token", &self.request_token)
            .field("is_cross_app_caller", &self.is_cross_app_caller)
            .field("referring_transaction_info", &self.referring_transaction_info)
            .field("current_transaction", &self.current_transaction)
            .field("untraced", &self.untraced)
            .field("traced_method_stack", &self.traced_method_stack)
            .finish_non_exhaustive()
    }
}

/// Guard returned by [`TransactionState::traced_scope`].
///
/// Derefs to the state so instrumented code can keep using it while the
/// override is active.
#[must_use = "the override is popped as soon as the guard is dropped"]
pub struct TracedScope<'a> {
    state: &'a mut TransactionState,
}

impl Deref for TracedScope<'_> {
    type Target = TransactionState;

    fn deref(&self) -> &TransactionState {
        self.state
    }
}

impl DerefMut for TracedScope<'_> {
    fn deref_mut(&mut self) -> &mut TransactionState {
        self.state
    }
}

impl Drop for TracedScope<'_> {
    fn drop(&mut self) {
        self.state.pop_traced();
    }
}

/// Serializable view of a state at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub transaction_start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_name: Option<String>,
    pub has_request: bool,
    pub has_request_token: bool,
    pub is_cross_app_caller: bool,
    pub is_cross_app_callee: bool,
    pub in_background_transaction: bool,
    pub in_request_transaction: bool,
    pub is_traced: bool,
    pub traced_method_depth: usize,
    pub record_transaction_trace: RecordFlag,
    pub record_sql: RecordFlag,
    pub busy_entries: u32,
}
