//! Enable flags for tracing and recording.

use serde::{Deserialize, Serialize};

/// A recording switch that distinguishes "never configured" from "off".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFlag {
    /// Not configured; behaves as enabled.
    #[default]
    Unset,
    /// Explicitly enabled.
    Enabled,
    /// Explicitly disabled.
    Disabled,
}

impl RecordFlag {
    /// True unless explicitly disabled.
    pub fn is_enabled(self) -> bool {
        self != RecordFlag::Disabled
    }
}

impl From<bool> for RecordFlag {
    fn from(enabled: bool) -> Self {
        if enabled {
            RecordFlag::Enabled
        } else {
            RecordFlag::Disabled
        }
    }
}

/// Push/pop stack of local tracing overrides. Empty means tracing is on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UntracedStack {
    entries: Vec<bool>,
}

impl UntracedStack {
    /// Push an override.
    pub fn push(&mut self, enabled: bool) {
        self.entries.push(enabled);
    }

    /// Pop the innermost override, if any.
    pub fn pop(&mut self) -> Option<bool> {
        self.entries.pop()
    }

    /// Whether tracing is enabled at the current nesting level.
    pub fn is_traced(&self) -> bool {
        self.entries.last() != Some(&false)
    }

    /// Number of pushed overrides.
    pub fn depth(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_flag_defaults_enabled() {
        assert!(RecordFlag::default().is_enabled());
        assert!(RecordFlag::Enabled.is_enabled());
        assert!(!RecordFlag::Disabled.is_enabled());
        assert_eq!(RecordFlag::from(false), RecordFlag::Disabled);
        assert_eq!(RecordFlag::from(true), RecordFlag::Enabled);
    }

    #[test]
    fn test_untraced_stack_nesting() {
        let mut stack = UntracedStack::default();
        assert!(stack.is_traced());

        stack.push(false);
        assert!(!stack.is_traced());
        stack.push(true);
        assert!(stack.is_traced());

        assert_eq!(stack.pop(), Some(true));
        assert!(!stack.is_traced());
        assert_eq!(stack.pop(), Some(false));
        assert!(stack.is_traced());
        assert_eq!(stack.pop(), None);
        assert_eq!(stack.depth(), 0);
    }
}
