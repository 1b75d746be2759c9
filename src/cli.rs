//! CLI argument parsing for the trace replayer

use crate::stats::SortMode;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "vmprof")]
#[command(version)]
#[command(about = "Replay a recorded VM signal trace and print its call profile", long_about = None)]
pub struct Cli {
    /// Trace file, one JSON event per line
    #[arg(value_name = "TRACE")]
    pub trace: PathBuf,

    /// Profiler configuration (TOML)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Order functions by call count, total time, or time per call
    #[arg(short, long = "sort-by", value_enum, value_name = "MODE")]
    pub sort_by: Option<SortMode>,

    /// Enable debug tracing output to stderr
    #[arg(long)]
    pub debug: bool,
}
