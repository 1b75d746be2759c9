use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use tracing_subscriber::EnvFilter;
use vmprof::{cli::Cli, config::ProfilerConfig, replay};

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let config = match &args.config {
        Some(path) => ProfilerConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ProfilerConfig::default(),
    };
    let sort_by = args.sort_by.unwrap_or(config.sort_by);

    let file = File::open(&args.trace)
        .with_context(|| format!("Failed to open trace {}", args.trace.display()))?;
    let profile = replay::replay(BufReader::new(file), &config)
        .with_context(|| format!("Failed to replay trace {}", args.trace.display()))?;

    let report = serde_json::to_string_pretty(&profile.report(sort_by))
        .context("Failed to serialize profile")?;
    println!("{}", report);

    Ok(())
}
