//! Boundary types shared with the host virtual machine
//!
//! The host owns execution; the profiler only sees register snapshots,
//! reads single code cells, and forwards to whatever debug hook was
//! installed before it.

use crate::function::Cell;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of one VM cell in bytes
pub const CELL_SIZE: Cell = 4;

/// Opcode the compiler emits at the start of every normal function body
pub const OP_PROC: Cell = 46;

/// Register snapshot taken when a signal fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Registers {
    /// Current frame pointer
    pub frm: Cell,
    /// Current stack pointer
    pub stk: Cell,
    /// Top of the stack area; the frame reference when no call is active
    pub stp: Cell,
    /// Code instruction pointer, relative to the code section
    pub cip: Cell,
}

/// Read access to the monitored program's code section
pub trait CodeReader {
    /// Cell at `offset` bytes into the code section, if it is in range
    fn read_code(&self, offset: Cell) -> Option<Cell>;
}

impl<F> CodeReader for F
where
    F: Fn(Cell) -> Option<Cell>,
{
    fn read_code(&self, offset: Cell) -> Option<Cell> {
        self(offset)
    }
}

/// Failure reported by the host's own call mechanism or a chained hook
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("host error code {code}")]
pub struct HostError {
    pub code: i32,
}

impl HostError {
    pub fn new(code: i32) -> Self {
        Self { code }
    }
}

/// Result of a debug hook invocation
pub type HookResult = std::result::Result<(), HostError>;

/// Debug-step callback previously installed on a program
pub type DebugHook = Box<dyn FnMut(&Registers) -> HookResult>;

/// Compilation flags that decide whether a program can be intercepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramFlags {
    /// Program carries symbolic debug information
    pub debug: bool,
    /// Program was compiled without run-time checks (no debug steps emitted)
    pub no_checks: bool,
}

impl ProgramFlags {
    /// Debug steps are only emitted when the program has debug info or checks
    pub fn is_profilable(&self) -> bool {
        self.debug || !self.no_checks
    }
}

/// What the host tells the profiler about a program when it loads
#[derive(Debug, Clone, Default)]
pub struct ProgramInfo {
    /// Path the program was loaded from
    pub name: String,
    pub flags: ProgramFlags,
    pub symbols: crate::symbols::SymbolInfo,
}

impl ProgramInfo {
    pub fn new(name: impl Into<String>, flags: ProgramFlags) -> Self {
        Self {
            name: name.into(),
            flags,
            symbols: Default::default(),
        }
    }

    pub fn with_symbols(mut self, symbols: crate::symbols::SymbolInfo) -> Self {
        self.symbols = symbols;
        self
    }
}
