use wasm_bindgen::prelude::*;

pub mod agents;
pub mod batch;
pub mod config;
pub mod error;
pub mod geography;
pub mod loader;
pub mod metrics;
pub mod model;
pub mod snapshot;
pub mod types;

pub use agents::*;
pub use batch::{BatchConfig, BatchResults, ParameterGrid, RunRecord, StepRecord, Sweep, run_batch};
pub use config::*;
pub use error::*;
pub use geography::*;
pub use loader::{BoroughRecord, DEFAULT_NAME_KEY, Dataset};
pub use metrics::*;
pub use model::{AgentRef, Model};
pub use snapshot::*;
pub use types::*;

#[cfg(feature = "instrument")]
pub use instrument;

/// Tracing targets of the structured data events the model emits.
pub const DATA_TARGETS: [&str; 5] = ["step", "deal", "borough", "purchase", "forced_sale"];

// ============================================================================
// WASM API - Interactive housing market simulation
// ============================================================================

/// One interactive session: a dataset and the model currently running on it.
#[wasm_bindgen]
pub struct HousingSimulation {
    dataset: Dataset,
    model: Model,
}

fn params_from_js(params: JsValue) -> Result<ModelParams, JsError> {
    if params.is_undefined() || params.is_null() {
        return Ok(ModelParams::default());
    }
    serde_wasm_bindgen::from_value(params).map_err(|e| JsError::new(&e.to_string()))
}

fn to_js<T: serde::Serialize>(value: &T) -> Result<JsValue, JsError> {
    serde_wasm_bindgen::to_value(value).map_err(|e| JsError::new(&e.to_string()))
}

#[wasm_bindgen]
impl HousingSimulation {
    /// Build a simulation from GeoJSON boundaries, an optional CSV table of
    /// neighbourhood statistics and a (partial) parameter object.
    #[wasm_bindgen(constructor)]
    pub fn new(
        geojson: &str,
        dataset_csv: Option<String>,
        name_key: Option<String>,
        params: JsValue,
    ) -> Result<HousingSimulation, JsError> {
        // Better panic messages in browser console
        console_error_panic_hook::set_once();

        let params = params_from_js(params)?;
        let name_key = name_key.as_deref().unwrap_or(DEFAULT_NAME_KEY);
        let dataset = Dataset::from_sources(geojson, dataset_csv.as_deref(), name_key, params.seed)?;
        Ok(Self::from_dataset(dataset, params)?)
    }

    /// Advance the simulation by one step
    #[wasm_bindgen]
    pub fn step(&mut self) -> Result<(), JsError> {
        self.model.step()?;
        Ok(())
    }

    /// Advance several steps, stopping early at equilibrium if configured.
    /// Returns the number of steps taken.
    #[wasm_bindgen]
    pub fn run(&mut self, max_steps: u32) -> Result<u32, JsError> {
        Ok(self.model.run_until_equilibrium(max_steps as u64)? as u32)
    }

    #[wasm_bindgen]
    pub fn get_step(&self) -> u64 {
        self.model.step_count()
    }

    /// False once a step passed without any trade
    #[wasm_bindgen]
    pub fn is_running(&self) -> bool {
        self.model.is_running()
    }

    /// Get a snapshot of the current state for rendering
    #[wasm_bindgen]
    pub fn get_state_snapshot(&self) -> StateSnapshot {
        snapshot(&self.model)
    }

    /// The coloured neighbourhood map as GeoJSON text
    #[wasm_bindgen]
    pub fn get_map_geojson(&self) -> String {
        map_geojson(&self.model).to_string()
    }

    #[wasm_bindgen]
    pub fn get_deals_text(&self) -> String {
        deals_text(&self.model)
    }

    /// Time series for charts: one `StepMetrics` object per step
    #[wasm_bindgen]
    pub fn get_metrics(&self) -> Result<js_sys::Array, JsError> {
        let rows = self
            .model
            .metrics()
            .iter()
            .map(to_js)
            .collect::<Result<Vec<JsValue>, JsError>>()?;
        Ok(rows.into_iter().collect())
    }

    #[wasm_bindgen]
    pub fn get_summary(&self) -> RunSummary {
        self.model.summary()
    }

    #[wasm_bindgen]
    pub fn get_params(&self) -> ModelParams {
        self.model.params.clone()
    }

    /// Slider definitions for the adjustable parameters, seeded from the
    /// current values
    #[wasm_bindgen]
    pub fn model_params(&self) -> Result<JsValue, JsError> {
        to_js(&sliders(&self.model.params))
    }

    /// Restart on the same data with new parameters
    #[wasm_bindgen]
    pub fn reset(&mut self, params: JsValue) -> Result<(), JsError> {
        let params = params_from_js(params)?;
        self.restart(params)?;
        Ok(())
    }
}

impl HousingSimulation {
    pub fn from_dataset(dataset: Dataset, params: ModelParams) -> Result<Self, ModelError> {
        let model = Model::new(&dataset, params)?;
        Ok(Self { dataset, model })
    }

    pub fn restart(&mut self, params: ModelParams) -> Result<(), ModelError> {
        self.model = Model::new(&self.dataset, params)?;
        Ok(())
    }

    pub fn model(&self) -> &Model {
        &self.model
    }
}
