use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use housing_core::{BatchConfig, Dataset, Model, ParameterGrid, map_geojson, run_batch};
use instrument::ScopedRecorder;
use tracing::{debug, info, warn};

use crate::args::{BatchArgs, MapArgs, ModelArgs, RunArgs};
use crate::error::CliError;
use crate::output;

fn load_dataset(args: &ModelArgs, seed: u64) -> Result<Dataset, CliError> {
    Ok(Dataset::load(&args.geojson, args.dataset.as_deref(), &args.name_key, seed)?)
}

fn write_json(path: &Path, value: &impl serde::Serialize) -> Result<(), CliError> {
    let file = File::create(path).map_err(|e| CliError::io(path, e))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .map_err(|e| CliError::io(path, std::io::Error::other(e)))
}

// === run ===

pub fn run(args: RunArgs) -> Result<(), CliError> {
    let params = args.model.model_params()?;
    let dataset = load_dataset(&args.model, params.seed)?;

    let mut recorder = args
        .record
        .as_ref()
        .map(|dir| ScopedRecorder::new(dir, &format!("seed{}", params.seed)));

    let mut model = Model::new(&dataset, params)?;
    info!(
        households = model.households.len(),
        houses = model.houses.len(),
        vacant = model.vacant_count(),
        "model ready"
    );

    for _ in 0..args.steps {
        model.step()?;
        if !args.json {
            if let Some(m) = model.latest_metrics() {
                println!(
                    "step {:>4}: Amount of Deals: {:>4} | contentment {:.3} | price {:>10.0} | sellers {:>5} | unhoused {:>4}",
                    m.step, m.deals, m.average_contentment, m.average_price, m.sellers, m.unhoused
                );
            }
        }
        if model.params.stop_at_equilibrium && !model.is_running() {
            info!(step = model.step_count(), "equilibrium reached");
            break;
        }
    }

    let summary = model.summary();
    if args.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(e) => warn!("could not serialise summary: {e}"),
        }
    } else {
        let calibration = model.calibration();
        for row in &calibration.rows {
            debug!(
                neighbourhood = %row.neighbourhood,
                simulated = row.simulated,
                observed = row.observed,
                "seller share"
            );
        }
        info!(
            steps = summary.steps,
            deals = summary.total_deals,
            contentment = summary.final_average_contentment,
            price_growth = summary.price_growth,
            unhoused = summary.final_unhoused,
            population = summary.final_population,
            unhappy_share = summary.final_unhappy_share,
            "run finished"
        );
        if let Some(rmse) = summary.seller_share_rmse {
            info!("seller share RMSE against targets: {rmse:.4}");
        }
    }

    if let Some(recorder) = recorder.as_mut() {
        let tables = recorder.get();
        for (name, df) in tables {
            debug!(table = %name, rows = df.height(), "recorded");
        }
        info!("writing recorded tables to {}", recorder.run_dir().display());
    }
    Ok(())
}

// === batch ===

pub fn batch(args: BatchArgs) -> Result<(), CliError> {
    let base_params = args.model.model_params()?;
    let dataset = load_dataset(&args.model, base_params.seed)?;

    let config = BatchConfig {
        base_params,
        grid: ParameterGrid::parse(&args.grid)?,
        iterations: args.iterations,
        max_steps: args.max_steps,
        data_collection_period: args.data_collection_period,
    };
    config.validate()?;

    let results = run_batch(&dataset, &config)?;
    output::write_batch(&results, &args.out)?;
    info!(
        runs = results.runs.len(),
        step_rows = results.steps.len(),
        "results written to {}",
        args.out.display()
    );
    Ok(())
}

// === map ===

pub fn map(args: MapArgs) -> Result<(), CliError> {
    let params = args.model.model_params()?;
    let dataset = load_dataset(&args.model, params.seed)?;
    let mut model = Model::new(&dataset, params)?;

    std::fs::create_dir_all(&args.out).map_err(|e| CliError::io(&args.out, e))?;
    let write_frame = |model: &Model| -> Result<(), CliError> {
        let path = args.out.join(format!("map_{:04}.geojson", model.step_count()));
        write_json(&path, &map_geojson(model))?;
        debug!("wrote {}", path.display());
        Ok(())
    };

    let mut frames = 0;
    if args.every > 0 {
        write_frame(&model)?;
        frames += 1;
    }
    for _ in 0..args.steps {
        model.step()?;
        let stopped = model.params.stop_at_equilibrium && !model.is_running();
        let due = args.every > 0 && model.step_count() % args.every == 0;
        if due || stopped || model.step_count() == args.steps {
            write_frame(&model)?;
            frames += 1;
        }
        if stopped {
            break;
        }
    }
    if args.every == 0 && args.steps == 0 {
        write_frame(&model)?;
        frames += 1;
    }

    info!(frames, step = model.step_count(), "maps written to {}", args.out.display());
    Ok(())
}

// === sliders ===

pub fn sliders(args: ModelArgs) -> Result<(), CliError> {
    let params = args.model_params()?;
    let definitions = housing_core::sliders(&params);
    match serde_json::to_string_pretty(&definitions) {
        Ok(json) => println!("{json}"),
        Err(e) => warn!("could not serialise sliders: {e}"),
    }
    Ok(())
}
