// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "rawburst")]
#[command(about = "Raw-sensor capture and burst-assembly pipeline")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic single-shot capture session
    Single {
        /// Number of shots to take
        #[arg(short, long, default_value = "1")]
        shots: usize,

        /// Pipeline configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output directory (default: ~/Pictures/rawburst)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a synthetic burst capture session
    Burst {
        /// Number of bursts to take
        #[arg(short, long, default_value = "1")]
        shots: usize,

        /// Pipeline configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output directory (default: ~/Pictures/rawburst)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the burst exposure plan for a scene
    Plan {
        /// Current ISO from auto-exposure
        #[arg(short, long, default_value = "100")]
        iso: u32,

        /// Current exposure time in nanoseconds
        #[arg(short, long, default_value = "10000000")]
        time: u64,
    },

    /// Watch the closed-loop exposure controller converge
    Meter {
        /// Number of luma samples to process
        #[arg(short, long, default_value = "40")]
        samples: usize,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=rawburst=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Single {
            shots,
            config,
            output,
        } => cli::run_session(false, shots, config, output),
        Commands::Burst {
            shots,
            config,
            output,
        } => cli::run_session(true, shots, config, output),
        Commands::Plan { iso, time } => cli::print_plan(iso, time),
        Commands::Meter { samples } => cli::run_meter(samples),
    }
}
