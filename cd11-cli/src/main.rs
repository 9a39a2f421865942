//! cd11-station - CD-1.1 consumer station tools
//!
//! Writes example configuration, validates configuration files, and inspects
//! persisted gap state snapshots.

use anyhow::Context;
use cd11_consumer::Config;
use cd11_protocol::{GapStateSnapshot, SequenceGapTracker, NO_HIGHEST_SEQUENCE};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cd11-station")]
#[command(about = "CD-1.1 consumer station tools", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write an example configuration file
    ExampleConfig {
        /// Destination path
        #[arg(short, long, default_value = "cd11.toml")]
        output: PathBuf,
    },
    /// Validate a configuration file
    Check {
        /// Configuration file to validate
        config: PathBuf,
    },
    /// Inspect a persisted gap state snapshot
    Gaps {
        /// Snapshot file, e.g. gap-state/STA01.json
        snapshot: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    match args.command {
        Command::ExampleConfig { output } => {
            Config::example()
                .to_file(&output)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!("Wrote example configuration to {}", output.display());
        }
        Command::Check { config } => {
            let config = Config::from_file(&config)
                .with_context(|| format!("failed to load {}", config.display()))?;
            config.validate()?;
            for station in &config.stations {
                println!(
                    "{}: listen {} expecting provider {}",
                    station.station_name, station.listen, station.expected_provider
                );
            }
            println!("Configuration OK ({} stations)", config.stations.len());
        }
        Command::Gaps { snapshot } => {
            let contents = fs::read_to_string(&snapshot)
                .with_context(|| format!("failed to read {}", snapshot.display()))?;
            let snapshot = GapStateSnapshot::from_json(&contents)
                .context("snapshot file is not valid gap state JSON")?;
            let tracker = SequenceGapTracker::from_snapshot(&snapshot)
                .context("snapshot gap list is inconsistent")?;

            match tracker.starting_sequence_number() {
                Some(start) => println!("Starting sequence number: {start}"),
                None => println!("Starting sequence number: none"),
            }
            let highest = tracker.highest_sequence_number();
            if highest == NO_HIGHEST_SEQUENCE {
                println!("Tracked range: empty");
            } else {
                println!("Tracked range: [{}, {}]", tracker.gap_list().min(), highest);
            }
            let gaps = tracker.gap_list().gap_ranges(false, false)?;
            if gaps.is_empty() {
                println!("No gaps");
            } else {
                println!("{} gaps (inclusive ranges):", gaps.len());
                for (start, end) in gaps {
                    println!("  [{start}, {end}]");
                }
            }
        }
    }

    Ok(())
}
