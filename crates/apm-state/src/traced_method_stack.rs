//! Stack of currently executing instrumented method frames.
//!
//! Each instrumented method pushes a frame on entry and pops it on exit.
//! When a frame is popped its duration is credited to the parent's
//! `children_time`, so exclusive time can be derived later.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::StackError;

/// Identifier returned by [`TracedMethodStack::push_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u64);

impl FrameId {
    /// Raw id value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One instrumented call on the stack.
#[derive(Debug, Clone, PartialEq)]
pub struct TracedMethodFrame {
    /// Unique id within the owning stack.
    pub id: FrameId,

    /// Caller-supplied tag identifying the kind of frame.
    pub tag: String,

    /// Metric name, filled in when the frame is popped.
    pub name: Option<String>,

    /// When the frame was pushed.
    pub start_time: DateTime<Utc>,

    /// Accumulated seconds spent in child frames.
    pub children_time: f64,
}

impl TracedMethodFrame {
    /// Seconds from push until `end`, including children.
    pub fn duration_until(&self, end: DateTime<Utc>) -> f64 {
        (end - self.start_time).num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0
    }
}

/// Ordered call stack owned by one transaction state.
#[derive(Debug, Default)]
pub struct TracedMethodStack {
    frames: Vec<TracedMethodFrame>,
    next_id: u64,
}

impl TracedMethodStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a new frame. Must be paired with [`pop_frame`](Self::pop_frame).
    pub fn push_frame(&mut self, tag: impl Into<String>, at: DateTime<Utc>) -> FrameId {
        let id = FrameId(self.next_id);
        self.next_id += 1;
        self.frames.push(TracedMethodFrame {
            id,
            tag: tag.into(),
            name: None,
            start_time: at,
            children_time: 0.0,
        });
        id
    }

    /// Pop the frame `expected`, naming it `name`.
    ///
    /// If other frames sit above `expected` they were leaked by callers that
    /// never popped; they are discarded, `expected` is still popped, and
    /// the mismatch is reported as an error.
    pub fn pop_frame(
        &mut self,
        expected: FrameId,
        name: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<TracedMethodFrame, StackError> {
        let top = self.frames.last().ok_or(StackError::Empty)?.id;

        if top != expected {
            tracing::warn!(
                expected = expected.0,
                found = top.0,
                depth = self.frames.len(),
                "Unexpected frame in traced method stack"
            );
            if let Some(pos) = self.frames.iter().position(|f| f.id == expected) {
                self.frames.truncate(pos + 1);
                self.complete_top(name, at);
            }
            return Err(StackError::UnexpectedFrame {
                expected,
                found: top,
            });
        }

        self.complete_top(name, at).ok_or(StackError::Empty)
    }

    fn complete_top(
        &mut self,
        name: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Option<TracedMethodFrame> {
        let mut frame = self.frames.pop()?;
        frame.name = Some(name.into());
        let elapsed = frame.duration_until(at);
        if let Some(parent) = self.frames.last_mut() {
            parent.children_time += elapsed;
        }
        Some(frame)
    }

    /// The innermost frame.
    pub fn last(&self) -> Option<&TracedMethodFrame> {
        self.frames.last()
    }

    /// Number of frames currently pushed.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frames are pushed.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drop every frame.
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
