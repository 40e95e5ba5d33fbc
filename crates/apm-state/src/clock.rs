//! Time source for state timestamps.
//!
//! Reset timestamps and elapsed-time predicates read the clock through this
//! trait so tests can pin "now" to a known instant.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// A source of the current wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Create the default shared clock.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
