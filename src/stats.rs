//! Per-function statistics table
//!
//! One [`FunctionStats`] record per distinct [`FunctionId`] ever entered,
//! created lazily on the first entry and kept until the profiling session
//! ends. Records are stored by value in an ordered map so enumeration is
//! deterministic (identity order) and no caller ever mutates through a
//! container handle.

use crate::error::{ProfilerError, Result};
use crate::function::FunctionId;
use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

/// Serialize `Duration` as whole nanoseconds
pub(crate) mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}

/// Aggregated metrics for one function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionStats {
    pub function: FunctionId,
    /// Number of entries, recursive re-entries included
    pub calls: u64,
    /// Sum of entry-to-exit intervals, nested calls included
    #[serde(rename = "total_ns", with = "duration_nanos")]
    pub total_time: Duration,
    /// Portion of `total_time` attributed to nested calls
    #[serde(rename = "child_ns", with = "duration_nanos")]
    pub child_time: Duration,
}

impl FunctionStats {
    pub fn new(function: FunctionId) -> Self {
        Self {
            function,
            calls: 0,
            total_time: Duration::ZERO,
            child_time: Duration::ZERO,
        }
    }

    /// Time spent in the function body itself; never exceeds `total_time`
    pub fn self_time(&self) -> Duration {
        self.total_time.saturating_sub(self.child_time)
    }

    /// Average total time per call
    pub fn time_per_call(&self) -> Duration {
        if self.calls == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_time.as_nanos() / u128::from(self.calls);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Statistics for every function observed in one monitored program
#[derive(Debug, Default, Clone)]
pub struct StatsTable {
    records: BTreeMap<FunctionId, FunctionStats>,
}

impl StatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a record exists for `function` and count one call
    pub fn record_entry(&mut self, function: FunctionId) {
        self.records
            .entry(function)
            .or_insert_with(|| FunctionStats::new(function))
            .calls += 1;
    }

    /// Ensure a record exists for `function` without counting a call
    pub fn ensure(&mut self, function: FunctionId) {
        self.records
            .entry(function)
            .or_insert_with(|| FunctionStats::new(function));
    }

    /// Add a finished interval to an existing record
    pub fn record_exit(
        &mut self,
        function: FunctionId,
        elapsed: Duration,
        child_elapsed: Duration,
    ) -> Result<()> {
        let record = self
            .records
            .get_mut(&function)
            .ok_or(ProfilerError::UnknownFunction(function))?;
        record.total_time += elapsed;
        record.child_time += child_elapsed;
        Ok(())
    }

    pub fn get(&self, function: FunctionId) -> Option<&FunctionStats> {
        self.records.get(&function)
    }

    /// All records in identity order
    ///
    /// Call again to restart; the table must not be mutated while a consumer
    /// is reading it, which the borrow already guarantees.
    pub fn enumerate(&self) -> impl Iterator<Item = &FunctionStats> + '_ {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Sum of self time over all records
    pub fn total_self_time(&self) -> Duration {
        self.records.values().map(FunctionStats::self_time).sum()
    }
}

impl Serialize for StatsTable {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.records.values())
    }
}

/// Consumer-side ordering of records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    /// Most calls first
    Calls,
    /// Most total time first
    #[default]
    Time,
    /// Highest average time per call first
    TimePerCall,
}

impl SortMode {
    /// Compare two records so that the "hottest" sorts first
    ///
    /// Ties fall back to identity order to keep output stable.
    pub fn compare(&self, a: &FunctionStats, b: &FunctionStats) -> Ordering {
        let primary = match self {
            SortMode::Calls => b.calls.cmp(&a.calls),
            SortMode::Time => b.total_time.cmp(&a.total_time),
            SortMode::TimePerCall => b.time_per_call().cmp(&a.time_per_call()),
        };
        primary.then_with(|| a.function.cmp(&b.function))
    }

    pub fn sort(&self, records: &mut [&FunctionStats]) {
        records.sort_by(|a, b| self.compare(a, b));
    }
}
