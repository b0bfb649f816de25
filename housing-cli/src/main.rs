//! Command line front-end for the housing market model
//!
//! Usage: housing run --steps 50 --dataset data/sample_neighbourhoods.csv
//!        housing batch -g contentment_threshold=0.2:0.8:0.2 -i 5 --out results
//!        housing map --steps 20 --every 5 --out maps

mod args;
mod commands;
mod error;
mod output;

use clap::Parser;
use housing_core::DATA_TARGETS;
use instrument::DataFrameLayer;
use tracing::error;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use args::{Cli, Command};

/// Human-readable logs go through an fmt layer with the data targets muted;
/// the data events only reach the recorder, which is present when `record` is set.
fn init_logging(verbose: bool, record: bool) {
    let base = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if verbose { "debug" } else { "info" }.to_string()
    });
    let muted: Vec<String> = DATA_TARGETS.iter().map(|t| format!("{t}=off")).collect();
    let filter = EnvFilter::new(format!("{},{}", base, muted.join(",")));

    let recorder = record.then(|| DataFrameLayer::for_targets(DATA_TARGETS));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_filter(filter))
        .with(recorder)
        .init();
}

fn main() {
    let cli = Cli::parse();

    let record = matches!(&cli.command, Command::Run(run) if run.record.is_some());
    init_logging(cli.verbose, record);

    let outcome = match cli.command {
        Command::Run(args) => commands::run(args),
        Command::Batch(args) => commands::batch(args),
        Command::Map(args) => commands::map(args),
        Command::Sliders(args) => commands::sliders(args),
    };

    if let Err(e) = outcome {
        error!("{e}");
        std::process::exit(1);
    }
}
