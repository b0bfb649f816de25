use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use housing_core::ModelParams;

use crate::error::CliError;

/// Agent-based model of the Amsterdam housing market
#[derive(Parser, Debug)]
#[command(name = "housing")]
#[command(about = "Simulate households trading houses across Amsterdam neighbourhoods", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one simulation and print a line per step
    Run(RunArgs),
    /// Sensitivity analysis over a parameter grid
    Batch(BatchArgs),
    /// Write the coloured neighbourhood map as GeoJSON, frame by frame
    Map(MapArgs),
    /// Print the slider definitions of the adjustable parameters as JSON
    Sliders(ModelArgs),
}

/// Input data and model parameters shared by every command.
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Neighbourhood boundaries (GeoJSON FeatureCollection)
    #[arg(long, default_value = "data/sample_neighbourhoods.geojson")]
    pub geojson: PathBuf,

    /// Neighbourhood statistics (CSV); values are synthesized when omitted
    #[arg(long)]
    pub dataset: Option<PathBuf>,

    /// GeoJSON property holding the neighbourhood name
    #[arg(long, default_value = housing_core::DEFAULT_NAME_KEY)]
    pub name_key: String,

    /// Model parameters as JSON; missing fields take their defaults
    #[arg(long)]
    pub params: Option<PathBuf>,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub growth_rate: Option<f64>,

    #[arg(long)]
    pub demand_increase: Option<f64>,

    #[arg(long)]
    pub demand_sensitivity: Option<f64>,

    #[arg(long)]
    pub contentment_threshold: Option<f64>,

    #[arg(long)]
    pub noise: Option<f64>,

    #[arg(long)]
    pub initial_vacancy: Option<f64>,

    #[arg(long)]
    pub house_sample_rate: Option<f64>,

    /// Stop as soon as a step closes no deals
    #[arg(long)]
    pub stop_at_equilibrium: bool,
}

impl ModelArgs {
    /// Parameters from the params file (or defaults) with command line overrides applied.
    pub fn model_params(&self) -> Result<ModelParams, CliError> {
        let mut params = match &self.params {
            Some(path) => {
                let file = std::fs::File::open(path).map_err(|e| CliError::io(path, e))?;
                serde_json::from_reader(std::io::BufReader::new(file)).map_err(|source| CliError::Params {
                    path: path.clone(),
                    source,
                })?
            }
            None => ModelParams::default(),
        };

        let overrides = [
            (&mut params.growth_rate, self.growth_rate),
            (&mut params.demand_increase, self.demand_increase),
            (&mut params.demand_sensitivity, self.demand_sensitivity),
            (&mut params.contentment_threshold, self.contentment_threshold),
            (&mut params.noise, self.noise),
            (&mut params.initial_vacancy, self.initial_vacancy),
            (&mut params.house_sample_rate, self.house_sample_rate),
        ];
        for (field, value) in overrides {
            if let Some(value) = value {
                *field = value;
            }
        }
        if let Some(seed) = self.seed {
            params.seed = seed;
        }
        if self.stop_at_equilibrium {
            params.stop_at_equilibrium = true;
        }

        params.validate()?;
        Ok(params)
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Number of steps to simulate
    #[arg(short = 'n', long, default_value = "10")]
    pub steps: u64,

    /// Record step, deal and neighbourhood tables as parquet under this directory
    #[arg(long)]
    pub record: Option<PathBuf>,

    /// Print the run summary as JSON instead of step lines
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct BatchArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Swept parameter, `name=v1,v2,...` or `name=start:stop:step` (repeatable)
    #[arg(short, long = "grid")]
    pub grid: Vec<String>,

    /// Runs per parameter combination
    #[arg(short, long, default_value = "5")]
    pub iterations: u32,

    #[arg(long, default_value = "100")]
    pub max_steps: u64,

    /// Keep every n-th step in the step table
    #[arg(long, default_value = "1")]
    pub data_collection_period: u64,

    /// Directory for runs/steps tables; must not already hold results
    #[arg(short, long, default_value = "results")]
    pub out: PathBuf,
}

#[derive(Args, Debug)]
pub struct MapArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    #[arg(short = 'n', long, default_value = "10")]
    pub steps: u64,

    /// Write a frame every n steps; 0 writes only the final map
    #[arg(long, default_value = "1")]
    pub every: u64,

    #[arg(short, long, default_value = "maps")]
    pub out: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_overrides_apply() {
        let cli = Cli::parse_from(["housing", "run", "--seed", "7", "--noise", "0.05", "--stop-at-equilibrium"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let params = args.model.model_params().unwrap();
        assert_eq!(params.seed, 7);
        assert_eq!(params.noise, 0.05);
        assert!(params.stop_at_equilibrium);
        assert_eq!(params.growth_rate, ModelParams::default().growth_rate);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let cli = Cli::parse_from(["housing", "sliders", "--contentment-threshold", "3"]);
        let Command::Sliders(args) = cli.command else {
            panic!("expected sliders");
        };
        assert!(matches!(args.model_params(), Err(CliError::Config(_))));
    }

    #[test]
    fn test_batch_grid_flags() {
        let cli = Cli::parse_from(["housing", "batch", "-g", "noise=0,0.1", "--grid", "growth_rate=0:0.02:0.01", "-i", "2"]);
        let Command::Batch(args) = cli.command else {
            panic!("expected batch");
        };
        assert_eq!(args.grid.len(), 2);
        assert_eq!(args.iterations, 2);
    }
}
