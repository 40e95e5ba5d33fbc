//! The transaction collaborator.
//!
//! A transaction owns its own lifecycle and sampling decisions. The state
//! only reads from it, and may outlive it for a short window of
//! post-processing reads after the transaction finishes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Identifier of an error noticed during a transaction.
pub type ErrorId = u64;

/// Read accessors the state needs from a transaction.
pub trait Transaction: Send + Sync + fmt::Debug {
    /// When the transaction started.
    fn start_time(&self) -> DateTime<Utc>;

    /// Time the request spent queued before the application saw it.
    fn queue_time(&self) -> Duration;

    /// Best available metric name for the transaction.
    fn best_name(&self) -> Option<String>;

    /// Apdex threshold configured for this transaction.
    fn apdex_t(&self) -> Duration;

    /// Cross-process GUID, once one has been assigned.
    fn guid(&self) -> Option<String>;

    /// Ids of errors noticed while the transaction ran.
    fn noticed_error_ids(&self) -> Vec<ErrorId>;

    /// Whether the transaction was started by an inbound request.
    fn has_request(&self) -> bool;
}

/// Shared transaction handle.
pub type SharedTransaction = Arc<dyn Transaction>;
