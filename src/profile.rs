//! Read-only results handed to output consumers
//!
//! A [`Profile`] is what remains of a profiler after detach: the statistics
//! table, the call relationships, and the names captured at attach time.
//! Consumers render it however they like; the engine never formats output.

use crate::call_graph::CallGraph;
use crate::error::Result;
use crate::function::{FunctionId, FunctionKind};
use crate::function_profiler::CallRecord;
use crate::stats::{FunctionStats, SortMode, StatsTable};
use crate::symbols::SymbolInfo;
use serde::Serialize;

/// Final results of one profiling session
#[derive(Debug, Clone, Default, Serialize)]
pub struct Profile {
    pub program: String,
    pub stats: StatsTable,
    /// Distinct caller/callee pairs in first-observed order
    pub calls: Vec<CallRecord>,
    pub symbols: SymbolInfo,
    /// Calls still active when the session ended; never finalized
    pub abandoned_frames: usize,
}

/// One function's statistics with its resolved name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionRecord {
    pub function: FunctionId,
    pub name: String,
    pub kind: FunctionKind,
    pub calls: u64,
    pub total_ns: u64,
    pub child_ns: u64,
    pub self_ns: u64,
}

/// Serializable snapshot of a profile
#[derive(Debug, Clone, Serialize)]
pub struct ProfileReport<'a> {
    pub program: &'a str,
    pub sort_by: SortMode,
    pub functions: Vec<FunctionRecord>,
    pub calls: &'a [CallRecord],
    pub abandoned_frames: usize,
}

impl Profile {
    pub fn new(
        program: String,
        stats: StatsTable,
        calls: Vec<CallRecord>,
        symbols: SymbolInfo,
        abandoned_frames: usize,
    ) -> Self {
        Self {
            program,
            stats,
            calls,
            symbols,
            abandoned_frames,
        }
    }

    pub fn name_of(&self, function: FunctionId) -> String {
        self.symbols.name_of(function)
    }

    /// Records in identity order
    pub fn records(&self) -> impl Iterator<Item = FunctionRecord> + '_ {
        self.stats.enumerate().map(|stats| self.record(stats))
    }

    /// Records ordered by `mode`, hottest first
    pub fn sorted_records(&self, mode: SortMode) -> Vec<FunctionRecord> {
        let mut stats: Vec<_> = self.stats.enumerate().collect();
        mode.sort(&mut stats);
        stats.into_iter().map(|s| self.record(s)).collect()
    }

    fn record(&self, stats: &FunctionStats) -> FunctionRecord {
        FunctionRecord {
            function: stats.function,
            name: self.symbols.name_of(stats.function),
            kind: self.symbols.kind_of(stats.function),
            calls: stats.calls,
            total_ns: nanos(stats.total_time),
            child_ns: nanos(stats.child_time),
            self_ns: nanos(stats.self_time()),
        }
    }

    pub fn call_graph(&self) -> Result<CallGraph<'_>> {
        CallGraph::build(&self.calls, &self.stats)
    }

    pub fn report(&self, mode: SortMode) -> ProfileReport<'_> {
        ProfileReport {
            program: &self.program,
            sort_by: mode,
            functions: self.sorted_records(mode),
            calls: &self.calls,
            abandoned_frames: self.abandoned_frames,
        }
    }
}

fn nanos(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
