//! Error taxonomy for the profiling engine
//!
//! Host-side failures (the VM's own call mechanism) never travel through
//! this type: wrapped calls return the caller's own `Result` untouched.

use crate::function::FunctionId;
use thiserror::Error;

/// Errors raised by the profiler itself
#[derive(Error, Debug)]
pub enum ProfilerError {
    /// An exit signal arrived with no matching entry on the call stack
    #[error("call stack is empty")]
    EmptyStack,

    /// An exit was recorded for a function that never entered
    #[error("no statistics recorded for {0}")]
    UnknownFunction(FunctionId),

    /// The program lacks debug info and run-time checks, so it cannot be intercepted
    #[error("program '{program}' cannot be profiled: {reason}")]
    NotProfilable { program: String, reason: String },

    #[error("a profiler is already attached to {0}")]
    AlreadyAttached(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A recorded signal trace could not be replayed
    #[error("trace line {line}: {message}")]
    Trace { line: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for profiler operations
pub type Result<T> = std::result::Result<T, ProfilerError>;
