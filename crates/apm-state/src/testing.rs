//! Test fixtures: a configurable transaction and a hand-driven clock.
//!
//! Available in this crate's tests and, through the `testing` feature, to
//! downstream test crates.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::transaction::{ErrorId, Transaction};

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Jump to a specific time.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        if let Ok(delta) = chrono::Duration::from_std(by) {
            *self.now.lock() += delta;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Transaction with fixed, builder-configured values.
///
/// Defaults: no queue time, no name, 0.5s apdex threshold, a random GUID,
/// no noticed errors, and no inbound request (a background job).
#[derive(Debug, Clone)]
pub struct MockTransaction {
    start_time: DateTime<Utc>,
    queue_time: Duration,
    name: Option<String>,
    apdex_t: Duration,
    guid: Option<String>,
    noticed_error_ids: Vec<ErrorId>,
    has_request: bool,
}

impl MockTransaction {
    /// Create a transaction that started at `start_time`.
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            queue_time: Duration::ZERO,
            name: None,
            apdex_t: Duration::from_millis(500),
            guid: Some(uuid::Uuid::new_v4().simple().to_string()[..16].to_string()),
            noticed_error_ids: Vec::new(),
            has_request: false,
        }
    }

    pub fn with_queue_time(mut self, queue_time: Duration) -> Self {
        self.queue_time = queue_time;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_apdex_t(mut self, apdex_t: Duration) -> Self {
        self.apdex_t = apdex_t;
        self
    }

    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = Some(guid.into());
        self
    }

    pub fn without_guid(mut self) -> Self {
        self.guid = None;
        self
    }

    pub fn with_noticed_errors(mut self, ids: Vec<ErrorId>) -> Self {
        self.noticed_error_ids = ids;
        self
    }

    /// Mark the transaction as started by an inbound request.
    pub fn with_request(mut self, has_request: bool) -> Self {
        self.has_request = has_request;
        self
    }
}

impl Transaction for MockTransaction {
    fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    fn queue_time(&self) -> Duration {
        self.queue_time
    }

    fn best_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn apdex_t(&self) -> Duration {
        self.apdex_t
    }

    fn guid(&self) -> Option<String> {
        self.guid.clone()
    }

    fn noticed_error_ids(&self) -> Vec<ErrorId> {
        self.noticed_error_ids.clone()
    }

    fn has_request(&self) -> bool {
        self.has_request
    }
}
