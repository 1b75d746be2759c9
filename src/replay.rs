//! Recorded signal traces
//!
//! A host can record every signal it would send the profiler as one JSON
//! object per line and replay it later, away from the host:
//!
//! ```text
//! {"event":"program","name":"gamemodes/test.amx","stp":4096,"publics":["OnStart"],"natives":["print"]}
//! {"event":"exec_begin","index":-1,"stk":4096,"at_ns":0}
//! {"event":"step","frm":4084,"cip":64,"prev_opcode":46,"at_ns":100}
//! {"event":"native_begin","index":0,"frm":4084,"at_ns":150}
//! {"event":"native_end","index":0,"at_ns":400}
//! {"event":"exec_end","index":-1,"at_ns":1000}
//! ```
//!
//! `at_ns` is optional and drives a [`ManualClock`], so replayed durations
//! are exactly the recorded ones. Begin/end pairs must nest, at most
//! [`MAX_NESTING`] deep; they are fed through an [`Interceptor`] just like
//! live host calls.

use crate::config::ProfilerConfig;
use crate::error::{ProfilerError, Result};
use crate::function::Cell;
use crate::host::{ProgramFlags, ProgramInfo, Registers, CELL_SIZE};
use crate::intercept::Interceptor;
use crate::profile::Profile;
use crate::registry::Registry;
use crate::symbols::SymbolInfo;
use crate::timer::ManualClock;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// One recorded signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    /// Header: the program the rest of the trace belongs to
    Program {
        name: String,
        #[serde(default)]
        flags: ProgramFlags,
        /// Top of the stack area
        stp: Cell,
        #[serde(default)]
        publics: Vec<String>,
        #[serde(default)]
        natives: Vec<String>,
        #[serde(default)]
        functions: Vec<FunctionSymbol>,
    },
    ExecBegin {
        index: Cell,
        stk: Cell,
    },
    ExecEnd {
        index: Cell,
    },
    NativeBegin {
        index: Cell,
        frm: Cell,
    },
    NativeEnd {
        index: Cell,
    },
    /// Debug step; `prev_opcode` is the code cell two cells behind `cip`
    Step {
        frm: Cell,
        cip: Cell,
        #[serde(default)]
        prev_opcode: Cell,
    },
}

/// Name of a normal function, keyed by its prologue address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSymbol {
    pub address: Cell,
    pub name: String,
}

/// A signal with its optional timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_ns: Option<u64>,
    #[serde(flatten)]
    pub event: TraceEvent,
}

/// Parse one trace line; blank lines yield `None`
pub fn parse_event(line: usize, text: &str) -> Result<Option<TraceRecord>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(text)
        .map(Some)
        .map_err(|err| ProfilerError::Trace {
            line,
            message: err.to_string(),
        })
}

/// Replay a whole trace and return the resulting profile
pub fn replay<R: BufRead>(reader: R, config: &ProfilerConfig) -> Result<Profile> {
    let mut events = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if let Some(record) = parse_event(number + 1, &line)? {
            events.push((number + 1, record));
        }
    }
    debug!(events = events.len(), "trace loaded");

    let mut cursor = Cursor {
        events: events.into_iter(),
        frm: 0,
        stp: 0,
        depth: 0,
        last_line: 0,
    };

    let (line, header) = cursor
        .next_record()
        .ok_or_else(|| trace_error(0, "trace is empty"))?;
    let TraceEvent::Program {
        name,
        flags,
        stp,
        publics,
        natives,
        functions,
    } = header.event
    else {
        return Err(trace_error(line, "trace must start with a program header"));
    };

    let clock = ManualClock::new();
    if let Some(at) = header.at_ns {
        clock.advance_to(Duration::from_nanos(at));
    }
    let interceptor = Interceptor::new(Registry::new(config.clone(), Arc::new(clock.clone())));
    interceptor.install();

    let symbols = functions
        .into_iter()
        .fold(SymbolInfo::new(publics, natives), |symbols, function| {
            symbols.with_function(function.address, function.name)
        });
    interceptor.attach(PROGRAM, ProgramInfo::new(name, flags).with_symbols(symbols), None)?;
    cursor.stp = stp;
    cursor.frm = stp;

    let session = Session {
        interceptor: &interceptor,
        clock: &clock,
    };
    session.run(&mut cursor, None)?;

    interceptor
        .detach(PROGRAM)
        .map(|detached| detached.profile)
        .ok_or_else(|| trace_error(cursor.last_line, "profiler was not released"))
}

/// Handle of the single program in a trace
const PROGRAM: u32 = 0;

/// Deepest begin/end nesting a trace may use
pub const MAX_NESTING: usize = 128;

/// Call a nested block was opened by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Opened {
    Exec(Cell),
    Native(Cell),
}

struct Cursor {
    events: std::vec::IntoIter<(usize, TraceRecord)>,
    /// Last frame pointer reported by the host
    frm: Cell,
    stp: Cell,
    /// Begin events currently open
    depth: usize,
    last_line: usize,
}

impl Cursor {
    fn next_record(&mut self) -> Option<(usize, TraceRecord)> {
        let next = self.events.next()?;
        self.last_line = next.0;
        Some(next)
    }

    fn open_block(&mut self, line: usize) -> Result<()> {
        if self.depth >= MAX_NESTING {
            return Err(trace_error(line, "nesting too deep"));
        }
        self.depth += 1;
        Ok(())
    }

    fn registers(&self, stk: Cell, cip: Cell) -> Registers {
        Registers {
            frm: self.frm,
            stk,
            stp: self.stp,
            cip,
        }
    }
}

struct Session<'a> {
    interceptor: &'a Interceptor<u32>,
    clock: &'a ManualClock,
}

impl Session<'_> {
    /// Feed events until the block opened by `opened` closes
    fn run(&self, cursor: &mut Cursor, opened: Option<Opened>) -> Result<()> {
        while let Some((line, record)) = cursor.next_record() {
            if let Some(at) = record.at_ns {
                self.clock.advance_to(Duration::from_nanos(at));
            }
            trace!(line, event = ?record.event, "replay");

            match record.event {
                TraceEvent::Program { .. } => {
                    return Err(trace_error(line, "duplicate program header"));
                }
                TraceEvent::ExecBegin { index, stk } => {
                    cursor.open_block(line)?;
                    let regs = cursor.registers(stk, 0);
                    self.interceptor.exec(PROGRAM, index, &regs, || {
                        self.run(cursor, Some(Opened::Exec(index)))
                    })?;
                    cursor.depth -= 1;
                }
                TraceEvent::NativeBegin { index, frm } => {
                    cursor.open_block(line)?;
                    cursor.frm = frm;
                    let regs = cursor.registers(frm, 0);
                    self.interceptor.callback(PROGRAM, index, &regs, || {
                        self.run(cursor, Some(Opened::Native(index)))
                    })?;
                    cursor.depth -= 1;
                }
                TraceEvent::ExecEnd { index } => {
                    return close(line, opened, Opened::Exec(index));
                }
                TraceEvent::NativeEnd { index } => {
                    return close(line, opened, Opened::Native(index));
                }
                TraceEvent::Step {
                    frm,
                    cip,
                    prev_opcode,
                } => {
                    cursor.frm = frm;
                    let regs = cursor.registers(frm, cip);
                    let prologue = cip.wrapping_sub(2 * CELL_SIZE);
                    let code = move |offset: Cell| -> Option<Cell> {
                        (offset == prologue).then_some(prev_opcode)
                    };
                    self.interceptor
                        .debug_step(PROGRAM, &regs, &code)
                        .map_err(|err| trace_error(line, &err.to_string()))?;
                }
            }
        }

        match opened {
            None => Ok(()),
            Some(block) => Err(trace_error(
                cursor.last_line,
                &format!("trace ended inside {:?}", block),
            )),
        }
    }
}

fn close(line: usize, opened: Option<Opened>, closing: Opened) -> Result<()> {
    if opened == Some(closing) {
        Ok(())
    } else {
        Err(trace_error(
            line,
            &format!("{:?} does not match open block {:?}", closing, opened),
        ))
    }
}

fn trace_error(line: usize, message: &str) -> ProfilerError {
    ProfilerError::Trace {
        line,
        message: message.to_string(),
    }
}
