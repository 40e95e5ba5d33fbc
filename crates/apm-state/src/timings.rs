//! Timing snapshot for the transaction on a thread.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metric name used when a transaction has not been named yet.
pub const UNKNOWN_TRANSACTION_NAME: &str = "(unknown)";

/// Queue time, start time and name captured once per unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionTimings {
    /// Time spent queued before the application, never negative.
    pub queue_time_in_seconds: f64,

    /// When the transaction (or the reset that preceded it) started.
    pub start_time: DateTime<Utc>,

    /// Transaction name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_name: Option<String>,
}

impl TransactionTimings {
    /// Create a timing snapshot. Negative queue times clamp to zero.
    pub fn new(
        queue_time_in_seconds: f64,
        start_time: DateTime<Utc>,
        transaction_name: Option<String>,
    ) -> Self {
        Self {
            queue_time_in_seconds: clamp_to_positive(queue_time_in_seconds),
            start_time,
            transaction_name,
        }
    }

    /// The transaction name, or `(unknown)`.
    pub fn transaction_name_or_unknown(&self) -> &str {
        self.transaction_name
            .as_deref()
            .unwrap_or(UNKNOWN_TRANSACTION_NAME)
    }

    /// Start time as milliseconds since the Unix epoch.
    pub fn start_time_in_millis(&self) -> i64 {
        self.start_time.timestamp_millis()
    }

    /// Queue time in whole milliseconds.
    pub fn queue_time_in_millis(&self) -> i64 {
        to_millis(self.queue_time_in_seconds)
    }

    /// Seconds the application has spent on the transaction as of `now`.
    pub fn app_time_in_seconds(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = now - self.start_time;
        match elapsed.num_microseconds() {
            Some(micros) => micros as f64 / 1_000_000.0,
            None => elapsed.num_milliseconds() as f64 / 1_000.0,
        }
    }

    /// Application time in whole milliseconds as of `now`.
    pub fn app_time_in_millis(&self, now: DateTime<Utc>) -> i64 {
        to_millis(self.app_time_in_seconds(now))
    }
}

fn clamp_to_positive(value: f64) -> f64 {
    if value < 0.0 { 0.0 } else { value }
}

fn to_millis(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}
