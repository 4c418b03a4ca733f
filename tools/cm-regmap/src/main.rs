//! Dry run of a ClockBuilder Pro register map.
//!
//! Parses the map exactly as the Si53xx driver would and prints the bus
//! transactions and pauses it would produce, without touching hardware.
//! Exits non-zero, naming the file and line, if the map does not parse.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use cm_hwctl::peripheral::si53xx::{self, PlannedStep};
use cm_hwctl::regmap::RegisterMap;
use tracing::debug;

/// Show the Si53xx programming plan for a ClockBuilder register map
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the ClockBuilder Pro register map export
    input: PathBuf,

    /// Print only the totals
    #[arg(short = 's', long)]
    summary: bool,

    /// Enable logging (level from RUST_LOG, INFO if unset)
    #[arg(short = 'd', long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.debug {
        cm_hwctl::tracing::init_stdout();
    }

    let map = RegisterMap::load(&args.input)
        .await
        .with_context(|| format!("Failed to load register map {:?}", args.input))?;
    let steps = si53xx::plan(&map).context("Register map does not fit the Si53xx")?;
    debug!(file = map.file(), steps = steps.len(), "Plan built");

    if !args.summary {
        for step in &steps {
            println!("{}", step);
        }
    }

    let (writes, delay) = totals(&steps);
    println!(
        "{}: {} writes, {} ms of delays",
        map.file(),
        writes,
        delay.as_millis()
    );
    Ok(())
}

fn totals(steps: &[PlannedStep]) -> (usize, std::time::Duration) {
    steps
        .iter()
        .fold((0, std::time::Duration::ZERO), |(writes, delay), step| match step {
            PlannedStep::Write { .. } => (writes + 1, delay),
            PlannedStep::Delay { duration, .. } => (writes, delay + *duration),
        })
}
