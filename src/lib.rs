//! vmprof - call-level profiler for an embedded bytecode VM
//!
//! Reconstructs the nested calls of a running script from the signals its
//! host emits (public entry points, native calls, per-instruction debug
//! steps) and aggregates per-function call counts, total and child time,
//! plus a caller/callee graph.

pub mod call_graph;
pub mod call_stack;
pub mod cli;
pub mod config;
pub mod error;
pub mod function;
pub mod function_profiler;
pub mod host;
pub mod intercept;
pub mod profile;
pub mod registry;
pub mod replay;
pub mod stats;
pub mod symbols;
pub mod timer;

pub use error::{ProfilerError, Result};
