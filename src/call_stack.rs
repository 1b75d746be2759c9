//! Call stack of currently active calls
//!
//! Each frame owns a running timer. Popping a frame stops the timer and
//! hands back a [`FinishedCall`] carrying the final interval; the stack
//! never drops a frame without reporting it.

use crate::error::{ProfilerError, Result};
use crate::function::{Cell, FunctionId};
use crate::timer::{Clock, Timer};
use std::time::Duration;

/// One active call
#[derive(Debug, Clone)]
pub struct CallFrame {
    function: FunctionId,
    /// Frame pointer recorded when the call was detected
    frame: Cell,
    timer: Timer,
    /// Time spent in calls made from this frame, accumulated as they finish
    child_time: Duration,
}

impl CallFrame {
    pub fn function(&self) -> FunctionId {
        self.function
    }

    pub fn frame(&self) -> Cell {
        self.frame
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn child_time(&self) -> Duration {
        self.child_time
    }

    /// Attribute a finished callee's interval to this frame
    pub fn add_child_time(&mut self, elapsed: Duration) {
        self.child_time += elapsed;
    }
}

/// A frame removed from the stack with its timer stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishedCall {
    pub function: FunctionId,
    pub frame: Cell,
    /// Entry to exit, nested calls included
    pub elapsed: Duration,
    /// Portion of `elapsed` spent in nested calls
    pub child_time: Duration,
}

/// LIFO sequence of active calls for one monitored program
#[derive(Debug, Default)]
pub struct CallStack {
    frames: Vec<CallFrame>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a new frame and start its timer
    pub fn push(&mut self, function: FunctionId, frame: Cell, clock: &dyn Clock) {
        self.frames.push(CallFrame {
            function,
            frame,
            timer: Timer::start(clock),
            child_time: Duration::ZERO,
        });
    }

    /// Remove the top frame and stop its timer
    pub fn pop(&mut self, clock: &dyn Clock) -> Result<FinishedCall> {
        let frame = self.frames.pop().ok_or(ProfilerError::EmptyStack)?;
        Ok(FinishedCall {
            function: frame.function,
            frame: frame.frame,
            elapsed: frame.timer.elapsed(clock),
            child_time: frame.child_time,
        })
    }

    pub fn top(&self) -> Result<&CallFrame> {
        self.frames.last().ok_or(ProfilerError::EmptyStack)
    }

    pub fn top_mut(&mut self) -> Result<&mut CallFrame> {
        self.frames.last_mut().ok_or(ProfilerError::EmptyStack)
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Frames from the bottom of the stack to the top
    pub fn iter(&self) -> impl Iterator<Item = &CallFrame> {
        self.frames.iter()
    }

    /// Drop every frame without finalizing it, returning how many were dropped
    pub fn abandon(&mut self) -> usize {
        let count = self.frames.len();
        self.frames.clear();
        count
    }
}
