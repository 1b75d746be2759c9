//! Call-level profiling engine
//!
//! Reconstructs nested calls of one monitored program from two signal
//! sources and aggregates per-function statistics.
//!
//! - **Explicit calls**: the host wraps every public entry point and every
//!   native call, so those arrive as [`FunctionProfiler::enter_function`] /
//!   [`FunctionProfiler::leave_function`] pairs.
//! - **Debug steps**: normal functions are never announced. After most
//!   instructions the host reports the registers and the engine compares
//!   the frame pointer with the one recorded for the top frame:
//!
//! ```text
//!   frm <  reference  and previous opcode is PROC  -> entered Normal(cip - 2 cells)
//!   frm >  reference  and top frame is not public  -> left the top frame
//!   otherwise                                      -> no transition
//! ```
//!
//! Leaving pops frames until the requested function comes off the stack,
//! finalizing each one; normal exits the steps never showed are closed on
//! the way down.

use crate::call_stack::{CallStack, FinishedCall};
use crate::config::ProfilerConfig;
use crate::error::{ProfilerError, Result};
use crate::function::{Cell, FunctionId};
use crate::host::{CodeReader, DebugHook, HookResult, ProgramInfo, Registers, CELL_SIZE, OP_PROC};
use crate::profile::Profile;
use crate::stats::StatsTable;
use crate::symbols::SymbolInfo;
use crate::timer::Clock;
use fnv::FnvHashSet;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// One observed caller/callee relationship; `caller` is `None` at the program boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallRecord {
    pub caller: Option<FunctionId>,
    pub callee: FunctionId,
}

/// Transition detected by a debug step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Entered(FunctionId),
    Left(FunctionId),
    Unchanged,
}

/// Profiling engine for one monitored program
pub struct FunctionProfiler {
    program: String,
    symbols: SymbolInfo,
    active: bool,
    subtract_child_time: bool,
    record_calls: bool,
    clock: Arc<dyn Clock>,
    call_stack: CallStack,
    stats: StatsTable,
    /// First-seen order of distinct caller/callee pairs
    calls: Vec<CallRecord>,
    seen_calls: FnvHashSet<CallRecord>,
    /// Debug hook that was installed before this profiler, called after every step
    previous_hook: Option<DebugHook>,
}

impl FunctionProfiler {
    /// Create an inactive profiler for `program`
    ///
    /// Fails with [`ProfilerError::NotProfilable`] when the program emits no
    /// debug steps to follow.
    pub fn new(program: ProgramInfo, config: &ProfilerConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        if !program.flags.is_profilable() {
            return Err(ProfilerError::NotProfilable {
                program: program.name,
                reason: "compiled without debug information and without run-time checks"
                    .to_string(),
            });
        }

        Ok(Self {
            program: program.name,
            symbols: program.symbols,
            active: false,
            subtract_child_time: config.subtract_child_time,
            record_calls: config.call_graph,
            clock,
            call_stack: CallStack::new(),
            stats: StatsTable::new(),
            calls: Vec::new(),
            seen_calls: FnvHashSet::default(),
            previous_hook: None,
        })
    }

    /// Start intercepting, remembering the hook to forward steps to
    pub fn activate(&mut self, previous_hook: Option<DebugHook>) {
        if self.active {
            return;
        }
        self.active = true;
        self.previous_hook = previous_hook;
        debug!(program = %self.program, chained = self.previous_hook.is_some(), "profiler activated");
    }

    /// Stop intercepting and hand back the hook that was installed before
    pub fn deactivate(&mut self) -> Option<DebugHook> {
        if !self.active {
            return None;
        }
        self.active = false;
        debug!(program = %self.program, "profiler deactivated");
        self.previous_hook.take()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn symbols(&self) -> &SymbolInfo {
        &self.symbols
    }

    pub fn stats(&self) -> &StatsTable {
        &self.stats
    }

    pub fn call_stack(&self) -> &CallStack {
        &self.call_stack
    }

    pub fn calls(&self) -> &[CallRecord] {
        &self.calls
    }

    /// Forget everything recorded so far
    ///
    /// Active calls stay on the stack with empty records so their exits
    /// still land somewhere.
    pub fn reset_stats(&mut self) {
        self.stats.clear();
        self.calls.clear();
        self.seen_calls.clear();
        for frame in self.call_stack.iter() {
            self.stats.ensure(frame.function());
        }
    }

    /// Push a frame for `function` and count the call
    pub fn enter_function(&mut self, function: FunctionId, frame: Cell) {
        let caller = self.call_stack.top().ok().map(|top| top.function());
        trace!(%function, frame, depth = self.call_stack.depth(), "enter");

        self.call_stack.push(function, frame, self.clock.as_ref());
        self.stats.record_entry(function);

        if self.record_calls {
            let record = CallRecord {
                caller,
                callee: function,
            };
            if self.seen_calls.insert(record) {
                self.calls.push(record);
            }
        }
    }

    /// Pop frames until `function` is popped, finalizing each one
    ///
    /// Returns [`ProfilerError::EmptyStack`] if the stack runs out first;
    /// frames popped before that point are still accounted for.
    pub fn leave_function(&mut self, function: FunctionId) -> Result<()> {
        loop {
            let finished = self.call_stack.pop(self.clock.as_ref())?;
            self.finalize(&finished)?;

            if finished.function == function {
                trace!(%function, elapsed = ?finished.elapsed, "leave");
                return Ok(());
            }
            trace!(unwound = %finished.function, target = %function, "unwound frame");
        }
    }

    fn finalize(&mut self, finished: &FinishedCall) -> Result<()> {
        let child_time = if self.subtract_child_time {
            if let Ok(parent) = self.call_stack.top_mut() {
                parent.add_child_time(finished.elapsed);
            }
            finished.child_time
        } else {
            Duration::ZERO
        };
        self.stats
            .record_exit(finished.function, finished.elapsed, child_time)
    }

    /// Classify one debug step and apply the transition it implies
    pub fn step(&mut self, regs: &Registers, code: &dyn CodeReader) -> Result<StepOutcome> {
        let reference = self
            .call_stack
            .top()
            .map(|top| top.frame())
            .unwrap_or(regs.stp);

        match regs.frm.cmp(&reference) {
            Ordering::Less => {
                // First step after a PROC: the prologue sits two cells behind cip.
                let Some(address) = regs
                    .cip
                    .checked_sub(2 * CELL_SIZE)
                    .filter(|address| *address >= 0)
                else {
                    return Ok(StepOutcome::Unchanged);
                };
                if code.read_code(address) != Some(OP_PROC) {
                    return Ok(StepOutcome::Unchanged);
                }
                let function = FunctionId::Normal(address);
                self.enter_function(function, regs.frm);
                Ok(StepOutcome::Entered(function))
            }
            Ordering::Greater => {
                let Ok(top) = self.call_stack.top() else {
                    return Ok(StepOutcome::Unchanged);
                };
                let function = top.function();
                // Public exits are reported explicitly by the exec wrapper.
                if function.is_public() {
                    return Ok(StepOutcome::Unchanged);
                }
                self.leave_function(function)?;
                Ok(StepOutcome::Left(function))
            }
            Ordering::Equal => Ok(StepOutcome::Unchanged),
        }
    }

    /// Debug-hook entry point: process the step, then forward to the previous hook
    pub fn on_debug_step(&mut self, regs: &Registers, code: &dyn CodeReader) -> HookResult {
        self.observe_step(regs, code);
        match self.previous_hook.as_mut() {
            Some(hook) => hook(regs),
            None => Ok(()),
        }
    }

    /// Apply a debug step while active; failures are logged, never returned
    pub fn observe_step(&mut self, regs: &Registers, code: &dyn CodeReader) {
        if !self.active {
            return;
        }
        if let Err(err) = self.step(regs, code) {
            warn!(program = %self.program, frm = regs.frm, cip = regs.cip, "debug step: {}", err);
        }
    }

    /// Lend out the chained hook so it can run without this profiler borrowed
    pub fn take_previous_hook(&mut self) -> Option<DebugHook> {
        self.previous_hook.take()
    }

    /// Give back a hook lent out by [`take_previous_hook`](Self::take_previous_hook)
    ///
    /// A profiler deactivated in the meantime has already handed its hook
    /// slot back to the host, so the hook is dropped instead.
    pub fn restore_previous_hook(&mut self, hook: DebugHook) {
        if self.active && self.previous_hook.is_none() {
            self.previous_hook = Some(hook);
        } else {
            debug!(program = %self.program, "chained hook not restored");
        }
    }

    /// Take the collected results, abandoning any frames still active
    pub fn finish(&mut self) -> Profile {
        let abandoned = self.call_stack.abandon();
        if abandoned > 0 {
            warn!(program = %self.program, abandoned, "discarding unfinished calls");
        }
        self.seen_calls.clear();

        Profile::new(
            self.program.clone(),
            std::mem::take(&mut self.stats),
            std::mem::take(&mut self.calls),
            self.symbols.clone(),
            abandoned,
        )
    }
}

impl fmt::Debug for FunctionProfiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionProfiler")
            .field("program", &self.program)
            .field("active", &self.active)
            .field("depth", &self.call_stack.depth())
            .field("functions", &self.stats.len())
            .field("chained_hook", &self.previous_hook.is_some())
            .finish()
    }
}
