use std::collections::HashMap;
use std::path::Path;

use housing_core::{BatchResults, RunRecord, StepRecord};
use polars::prelude::*;

use crate::error::CliError;

const TABLES: [&str; 2] = ["runs", "steps"];

/// One row per run: identity, swept parameter values, then the run summary.
pub fn runs_frame(runs: &[RunRecord]) -> PolarsResult<DataFrame> {
    let mut columns = vec![
        Column::new("run_id".into(), runs.iter().map(|r| r.run_id as u64).collect::<Vec<_>>()),
        Column::new("tuple_index".into(), runs.iter().map(|r| r.tuple_index as u64).collect::<Vec<_>>()),
        Column::new("iteration".into(), runs.iter().map(|r| r.iteration).collect::<Vec<_>>()),
        Column::new("seed".into(), runs.iter().map(|r| r.seed).collect::<Vec<_>>()),
    ];

    // Every run of a batch sweeps the same parameters in the same order
    if let Some(first) = runs.first() {
        for (index, (param, _)) in first.parameters.iter().enumerate() {
            let values: Vec<Option<f64>> = runs
                .iter()
                .map(|r| r.parameters.get(index).map(|(_, v)| *v))
                .collect();
            columns.push(Column::new(param.name().into(), values));
        }
    }

    columns.extend([
        Column::new("steps".into(), runs.iter().map(|r| r.steps).collect::<Vec<_>>()),
        Column::new("total_deals".into(), runs.iter().map(|r| r.summary.total_deals).collect::<Vec<_>>()),
        Column::new(
            "final_average_contentment".into(),
            runs.iter().map(|r| r.summary.final_average_contentment).collect::<Vec<_>>(),
        ),
        Column::new(
            "final_average_price".into(),
            runs.iter().map(|r| r.summary.final_average_price).collect::<Vec<_>>(),
        ),
        Column::new("price_growth".into(), runs.iter().map(|r| r.summary.price_growth).collect::<Vec<_>>()),
        Column::new("final_unhoused".into(), runs.iter().map(|r| r.summary.final_unhoused).collect::<Vec<_>>()),
        Column::new(
            "final_population".into(),
            runs.iter().map(|r| r.summary.final_population).collect::<Vec<_>>(),
        ),
        Column::new(
            "final_unhappy_share".into(),
            runs.iter().map(|r| r.summary.final_unhappy_share).collect::<Vec<_>>(),
        ),
        Column::new(
            "mean_seller_share".into(),
            runs.iter().map(|r| r.summary.mean_seller_share).collect::<Vec<_>>(),
        ),
        Column::new(
            "last_deal_step".into(),
            runs.iter().map(|r| r.summary.last_deal_step).collect::<Vec<_>>(),
        ),
        Column::new(
            "seller_share_rmse".into(),
            runs.iter().map(|r| r.summary.seller_share_rmse).collect::<Vec<_>>(),
        ),
    ]);

    DataFrame::new(columns)
}

/// One row per collected step of every run.
pub fn steps_frame(steps: &[StepRecord]) -> PolarsResult<DataFrame> {
    df!(
        "run_id" => steps.iter().map(|r| r.run_id as u64).collect::<Vec<_>>(),
        "step" => steps.iter().map(|r| r.metrics.step).collect::<Vec<_>>(),
        "deals" => steps.iter().map(|r| r.metrics.deals).collect::<Vec<_>>(),
        "average_contentment" => steps.iter().map(|r| r.metrics.average_contentment).collect::<Vec<_>>(),
        "average_price" => steps.iter().map(|r| r.metrics.average_price).collect::<Vec<_>>(),
        "sellers" => steps.iter().map(|r| r.metrics.sellers).collect::<Vec<_>>(),
        "unhoused" => steps.iter().map(|r| r.metrics.unhoused).collect::<Vec<_>>(),
        "households" => steps.iter().map(|r| r.metrics.households).collect::<Vec<_>>(),
        "vacant" => steps.iter().map(|r| r.metrics.vacant).collect::<Vec<_>>(),
    )
}

pub fn batch_frames(results: &BatchResults) -> PolarsResult<HashMap<String, DataFrame>> {
    Ok(HashMap::from([
        ("runs".to_string(), runs_frame(&results.runs)?),
        ("steps".to_string(), steps_frame(&results.steps)?),
    ]))
}

/// Write `runs` and `steps` as parquet and csv into `dir`.
///
/// Refuses a directory that already holds either table so earlier results are
/// never overwritten.
pub fn write_batch(results: &BatchResults, dir: &Path) -> Result<(), CliError> {
    let taken = TABLES.iter().any(|table| {
        ["parquet", "csv"]
            .iter()
            .any(|ext| dir.join(format!("{table}.{ext}")).exists())
    });
    if taken {
        return Err(CliError::OutputExists(dir.to_path_buf()));
    }

    let mut frames = batch_frames(results)?;
    instrument::save_parquet(&mut frames, dir)?;
    instrument::save_csv(&mut frames, dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use housing_core::{BatchConfig, DEFAULT_NAME_KEY, Dataset, ModelParams, ParameterGrid, run_batch};

    const GEOJSON: &str = include_str!("../../data/sample_neighbourhoods.geojson");

    fn small_batch() -> BatchResults {
        let dataset = Dataset::from_sources(GEOJSON, None, DEFAULT_NAME_KEY, 3).unwrap();
        let config = BatchConfig {
            base_params: ModelParams {
                house_sample_rate: 0.05,
                ..Default::default()
            },
            grid: ParameterGrid::parse(&["noise=0,0.1"]).unwrap(),
            iterations: 2,
            max_steps: 4,
            data_collection_period: 2,
        };
        run_batch(&dataset, &config).unwrap()
    }

    #[test]
    fn test_runs_frame_has_sweep_columns() {
        let results = small_batch();
        let df = runs_frame(&results.runs).unwrap();
        assert_eq!(df.height(), 4);
        let names: Vec<&str> = df.get_column_names().into_iter().map(|n| n.as_str()).collect();
        assert_eq!(&names[..6], &["run_id", "tuple_index", "iteration", "seed", "noise", "steps"]);
        assert!(names.contains(&"seller_share_rmse"));

        let population: Vec<u32> = df
            .column("final_population")
            .unwrap()
            .u32()
            .unwrap()
            .into_no_null_iter()
            .collect();
        let expected: Vec<u32> = results.runs.iter().map(|r| r.summary.final_population).collect();
        assert_eq!(population, expected);

        let unhappy = df.column("final_unhappy_share").unwrap().f64().unwrap();
        assert!(unhappy.into_no_null_iter().all(|s| (0.0..=1.0).contains(&s)));
    }

    #[test]
    fn test_steps_frame_rows() {
        let results = small_batch();
        let df = steps_frame(&results.steps).unwrap();
        // Steps 0, 2 and 4 of each of the four runs
        assert_eq!(df.height(), 4 * 3);
        assert_eq!(df.width(), 9);
    }

    #[test]
    fn test_write_batch_refuses_existing_results() {
        let dir = std::env::temp_dir().join(format!("housing_cli_output_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let results = small_batch();
        write_batch(&results, &dir).unwrap();
        for table in TABLES {
            assert!(dir.join(format!("{table}.parquet")).exists());
            assert!(dir.join(format!("{table}.csv")).exists());
        }
        assert!(matches!(write_batch(&results, &dir), Err(CliError::OutputExists(_))));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
