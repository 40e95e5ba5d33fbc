//! Error types for transaction state bookkeeping.
//!
//! Most accessors on [`TransactionState`](crate::TransactionState) never fail:
//! an absent transaction or request is a normal condition. Errors are reserved
//! for configuration loading, explicit traced-method frame bookkeeping, and
//! nested access to a thread's state.

use thiserror::Error;

use crate::traced_method_stack::FrameId;

/// Result type alias for state operations.
pub type Result<T> = std::result::Result<T, StateError>;

/// Errors that can occur while configuring or driving transaction state.
#[derive(Debug, Error)]
pub enum StateError {
    /// Configuration could not be parsed or validated.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reading a configuration file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The traced-method stack was popped out of order.
    #[error("Traced method stack error: {0}")]
    TracedMethodStack(#[from] StackError),

    /// The thread's state is already borrowed further up the same stack.
    #[error("Transaction state is already borrowed on this thread")]
    Busy,
}

/// Errors raised by [`TracedMethodStack`](crate::TracedMethodStack) pops.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    /// A frame was popped while no frames were pushed.
    #[error("pop from empty traced method stack")]
    Empty,

    /// The frame on top of the stack was not the one the caller expected.
    #[error("unexpected frame on traced method stack: expected {expected}, found {found}")]
    UnexpectedFrame {
        /// Frame the caller tried to pop.
        expected: FrameId,
        /// Frame that was actually on top.
        found: FrameId,
    },
}

impl From<toml::de::Error> for StateError {
    fn from(e: toml::de::Error) -> Self {
        StateError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traced_method_stack::TracedMethodStack;
    use chrono::Utc;

    #[test]
    fn test_error_display() {
        let err = StateError::Config("bad cookie name".to_string());
        assert_eq!(err.to_string(), "Configuration error: bad cookie name");

        let mut stack = TracedMethodStack::new();
        let expected = stack.push_frame("outer", Utc::now());
        let found = stack.push_frame("inner", Utc::now());
        let stack_err = StateError::from(StackError::UnexpectedFrame { expected, found });
        assert_eq!(
            stack_err.to_string(),
            "Traced method stack error: unexpected frame on traced method stack: expected 0, found 1"
        );

        assert_eq!(
            StateError::Busy.to_string(),
            "Transaction state is already borrowed on this thread"
        );
    }

    #[test]
    fn test_empty_stack_display() {
        assert_eq!(
            StackError::Empty.to_string(),
            "pop from empty traced method stack"
        );
    }
}
