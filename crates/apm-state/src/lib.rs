//! Per-execution-context transaction state for APM instrumentation.
//!
//! This crate tracks the one in-flight unit of work (an HTTP request or a
//! background job) running on a thread of execution:
//!
//! - **Store**: [`ContextStore`] maps each thread to exactly one
//!   [`TransactionState`], created lazily, never shared, and dropped when
//!   its thread exits
//! - **State**: request and correlation data, timing derived from the
//!   current transaction, traced-method stack, tracing/recording switches
//! - **Task scope**: [`task::with_transaction_state`] pins one state to an
//!   async task instead of a thread
//!
//! # Usage
//!
//! ```rust
//! use apm_state::{ContextStore, InboundRequest};
//!
//! # fn main() -> apm_state::Result<()> {
//! let store = ContextStore::new();
//!
//! // Start of a unit of work on this thread
//! store.reset()?;
//! store.set_request(
//!     InboundRequest::new("/orders")
//!         .with_header("Cookie", "NRAGENT=tk=3f2a")
//!         .into_shared(),
//! )?;
//!
//! store.with_current(|state| {
//!     let mut scope = state.traced_scope(false);
//!     assert!(!scope.is_traced());
//!     // No transaction attached yet, so the GUID stays private.
//!     assert_eq!(scope.request_guid_for_event(), None);
//!     scope.set_busy_entries(1);
//! })?;
//!
//! // Pool worker is being recycled
//! store.clear();
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod flags;
pub mod request;
pub mod state;
pub mod store;
pub mod task;
pub mod timings;
pub mod token;
pub mod traced_method_stack;
pub mod transaction;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use clock::{Clock, SharedClock, SystemClock};
pub use config::{BrowserTokenConfig, StateConfig, StoreConfig};
pub use error::{Result, StackError, StateError};
pub use flags::{RecordFlag, UntracedStack};
pub use request::{InboundRequest, Request, SharedRequest};
pub use state::{
    PassThrough, ReferringTransactionInfo, StateSnapshot, TracedScope, TransactionState,
};
pub use store::{ContextStore, ExecutionContextKey, StateHandle};
pub use timings::{TransactionTimings, UNKNOWN_TRANSACTION_NAME};
pub use token::{BrowserTokenExtractor, SharedTokenExtractor, TokenExtractor};
pub use traced_method_stack::{FrameId, TracedMethodFrame, TracedMethodStack};
pub use transaction::{ErrorId, SharedTransaction, Transaction};
