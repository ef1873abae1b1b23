//! Drone Simulation - Entry Point
//!
//! Runs the drone scenario headless for a fixed number of steps and
//! prints a summary; the full per-step output can be written as JSON.

use std::path::PathBuf;

use clap::Parser;
use drone_ensembles::core::config::ScenarioConfig;
use drone_ensembles::core::error::Result;
use drone_ensembles::scenario::Simulation;

/// Headless drone simulation driven by ensemble materialization
#[derive(Parser, Debug)]
#[command(name = "drone_sim")]
#[command(about = "Run the drone/charger/field/bird scenario and report ensemble statistics")]
struct Args {
    /// Scenario configuration (TOML); defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of steps to simulate
    #[arg(long, default_value_t = 500)]
    steps: u64,

    /// Random seed, overrides the configuration file
    #[arg(long)]
    seed: Option<u64>,

    /// Write the full run output as JSON to this path
    #[arg(long)]
    output: Option<PathBuf>,

    /// Log every step
    #[arg(long, short = 'v')]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("drone_ensembles={}", level))),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => ScenarioConfig::load(path)?,
        None => ScenarioConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.world.seed = seed;
    }

    tracing::info!(steps = args.steps, seed = config.world.seed, "starting drone simulation");

    let mut simulation = Simulation::new(config)?;
    let output = simulation.run(args.steps)?;

    println!("{}", output.summary());

    if let Some(path) = &args.output {
        std::fs::write(path, output.to_json())?;
        println!("Full output written to {}", path.display());
    }

    Ok(())
}
