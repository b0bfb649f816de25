//! Sensitivity analysis: many independent runs over a grid of parameter values.
//!
//! Every combination of swept values is run `iterations` times. Iteration `i`
//! uses seed `base_params.seed + i`, so a (combination, iteration) pair always
//! reproduces the same run. With the `parallel` feature runs execute on the
//! rayon thread pool; results are ordered the same way either way.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{ModelParams, Param};
use crate::error::{ConfigError, ModelError};
use crate::loader::Dataset;
use crate::metrics::{RunSummary, StepMetrics};
use crate::model::Model;

/// Upper bound on the values of one range sweep.
pub const MAX_SWEEP_VALUES: usize = 10_000;

/// Upper bound on planned runs (tuples times iterations).
pub const MAX_BATCH_RUNS: usize = 1_000_000;

// === PARAMETER GRID ===

/// Values to try for one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sweep {
    pub param: Param,
    pub values: Vec<f64>,
}

impl Sweep {
    pub fn new(param: Param, values: Vec<f64>) -> Self {
        Self { param, values }
    }

    /// Inclusive range `start, start + step, ..., stop`.
    pub fn range(param: Param, start: f64, stop: f64, step: f64) -> Result<Self, ConfigError> {
        if !(start.is_finite() && stop.is_finite() && step.is_finite()) || step <= 0.0 || stop < start {
            return Err(ConfigError::MalformedSweep(format!(
                "{}={}:{}:{}",
                param, start, stop, step
            )));
        }
        // Tolerate rounding so that e.g. 0:0.3:0.1 includes 0.3
        let intervals = ((stop - start) / step + 1e-9).floor();
        if !intervals.is_finite() || intervals >= MAX_SWEEP_VALUES as f64 {
            return Err(ConfigError::MalformedSweep(format!(
                "{}={}:{}:{} yields more than {} values",
                param, start, stop, step, MAX_SWEEP_VALUES
            )));
        }
        let count = intervals as usize + 1;
        let values = (0..count).map(|i| start + i as f64 * step).collect();
        Ok(Self { param, values })
    }
}

impl FromStr for Sweep {
    type Err = ConfigError;

    /// `name=v1,v2,...` or `name=start:stop:step`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ConfigError::MalformedSweep(s.to_string());
        let (name, spec) = s.split_once('=').ok_or_else(malformed)?;
        let param: Param = name.parse()?;

        let number = |text: &str| text.trim().parse::<f64>().map_err(|_| malformed());
        if spec.contains(':') {
            let parts: Vec<&str> = spec.split(':').collect();
            let [start, stop, step] = parts[..] else {
                return Err(malformed());
            };
            return Sweep::range(param, number(start)?, number(stop)?, number(step)?);
        }

        let values = spec.split(',').map(number).collect::<Result<Vec<f64>, _>>()?;
        if values.is_empty() {
            return Err(malformed());
        }
        Ok(Sweep::new(param, values))
    }
}

/// Named parameters with candidate values; the cartesian product gives the
/// parameter tuples of a batch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterGrid {
    pub sweeps: Vec<Sweep>,
}

impl ParameterGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sweep, replacing an earlier one for the same parameter.
    pub fn with_sweep(mut self, sweep: Sweep) -> Self {
        self.sweeps.retain(|s| s.param != sweep.param);
        self.sweeps.push(sweep);
        self
    }

    pub fn parse<S: AsRef<str>>(definitions: &[S]) -> Result<Self, ConfigError> {
        let mut grid = ParameterGrid::new();
        for definition in definitions {
            grid = grid.with_sweep(definition.as_ref().parse()?);
        }
        Ok(grid)
    }

    /// Number of parameter tuples, `None` on overflow. An empty grid has one
    /// (empty) tuple.
    pub fn checked_len(&self) -> Option<usize> {
        self.sweeps
            .iter()
            .try_fold(1usize, |acc, s| acc.checked_mul(s.values.len()))
    }

    /// Number of parameter tuples, saturating at `usize::MAX`.
    pub fn len(&self) -> usize {
        self.checked_len().unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every parameter tuple; the last sweep varies fastest.
    pub fn combinations(&self) -> Vec<Vec<(Param, f64)>> {
        self.sweeps.iter().fold(vec![Vec::new()], |acc, sweep| {
            acc.into_iter()
                .flat_map(|prefix| {
                    sweep.values.iter().map(move |&value| {
                        let mut tuple = prefix.clone();
                        tuple.push((sweep.param, value));
                        tuple
                    })
                })
                .collect()
        })
    }
}

// === BATCH CONFIGURATION ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub base_params: ModelParams,
    pub grid: ParameterGrid,
    /// Runs per parameter tuple.
    pub iterations: u32,
    pub max_steps: u64,
    /// Keep every n-th step row.
    pub data_collection_period: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            base_params: ModelParams::default(),
            grid: ParameterGrid::new(),
            iterations: 1,
            max_steps: 100,
            data_collection_period: 1,
        }
    }
}

/// A single run to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub run_id: usize,
    pub tuple_index: usize,
    pub iteration: u32,
    pub swept: Vec<(Param, f64)>,
    pub params: ModelParams,
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.iterations == 0 {
            return Err(ConfigError::InvalidBatch("iterations must be at least 1"));
        }
        if self.data_collection_period == 0 {
            return Err(ConfigError::InvalidBatch("data collection period must be at least 1"));
        }
        if self.grid.is_empty() {
            return Err(ConfigError::InvalidBatch("a sweep has no values"));
        }
        self.run_count()?;
        self.base_params.validate()
    }

    /// Tuples times iterations, rejected when it overflows or exceeds
    /// [`MAX_BATCH_RUNS`].
    pub fn run_count(&self) -> Result<usize, ConfigError> {
        self.grid
            .checked_len()
            .and_then(|tuples| tuples.checked_mul(self.iterations as usize))
            .filter(|&runs| runs <= MAX_BATCH_RUNS)
            .ok_or(ConfigError::InvalidBatch("grid too large"))
    }

    /// All runs in (tuple, iteration) order, with their parameters resolved.
    pub fn plan(&self) -> Result<Vec<RunPlan>, ConfigError> {
        self.validate()?;
        let mut plans = Vec::with_capacity(self.run_count()?);
        for (tuple_index, swept) in self.grid.combinations().into_iter().enumerate() {
            let mut params = self.base_params.clone();
            for &(param, value) in &swept {
                param.set(&mut params, value);
            }
            params.validate()?;

            for iteration in 0..self.iterations {
                plans.push(RunPlan {
                    run_id: plans.len(),
                    tuple_index,
                    iteration,
                    swept: swept.clone(),
                    params: ModelParams {
                        seed: self.base_params.seed.wrapping_add(iteration as u64),
                        ..params.clone()
                    },
                });
            }
        }
        Ok(plans)
    }
}

// === RESULTS ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: usize,
    pub tuple_index: usize,
    pub iteration: u32,
    pub seed: u64,
    pub parameters: Vec<(Param, f64)>,
    pub steps: u64,
    pub summary: RunSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub run_id: usize,
    pub metrics: StepMetrics,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BatchResults {
    pub runs: Vec<RunRecord>,
    pub steps: Vec<StepRecord>,
}

/// Execute one planned run.
pub fn execute(
    dataset: &Dataset,
    plan: &RunPlan,
    max_steps: u64,
    period: u64,
) -> Result<(RunRecord, Vec<StepRecord>), ModelError> {
    let mut model = Model::new(dataset, plan.params.clone())?;
    let steps = model.run_until_equilibrium(max_steps)?;
    debug!(run_id = plan.run_id, steps, "batch run finished");

    let last_step = model.step_count();
    let step_records = model
        .metrics()
        .iter()
        .filter(|m| m.step % period.max(1) == 0 || m.step == last_step)
        .map(|m| StepRecord {
            run_id: plan.run_id,
            metrics: m.clone(),
        })
        .collect();

    let record = RunRecord {
        run_id: plan.run_id,
        tuple_index: plan.tuple_index,
        iteration: plan.iteration,
        seed: plan.params.seed,
        parameters: plan.swept.clone(),
        steps,
        summary: model.summary(),
    };
    Ok((record, step_records))
}

/// Run every (tuple, iteration) of the batch.
pub fn run_batch(dataset: &Dataset, config: &BatchConfig) -> Result<BatchResults, ModelError> {
    let plans = config.plan()?;
    info!(
        tuples = config.grid.len(),
        iterations = config.iterations,
        runs = plans.len(),
        max_steps = config.max_steps,
        "starting batch"
    );

    let run = |plan: &RunPlan| execute(dataset, plan, config.max_steps, config.data_collection_period);

    #[cfg(feature = "parallel")]
    let outcomes: Vec<_> = {
        use rayon::prelude::*;
        plans.par_iter().map(run).collect()
    };
    #[cfg(not(feature = "parallel"))]
    let outcomes: Vec<_> = plans.iter().map(run).collect();

    let mut results = BatchResults::default();
    for outcome in outcomes {
        let (record, steps) = outcome?;
        results.runs.push(record);
        results.steps.extend(steps);
    }
    info!(runs = results.runs.len(), rows = results.steps.len(), "batch finished");
    Ok(results)
}
