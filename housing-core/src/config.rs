use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::error::ConfigError;

// ============================================================================
// Model Parameters
// ============================================================================

/// Every tunable knob of a single model run.
///
/// Missing fields fall back to [`ModelParams::default`] when deserialized, so a
/// params file only needs to mention what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(default)]
pub struct ModelParams {
    /// Per-step growth of house prices, salaries and cost of living.
    pub growth_rate: f64,
    /// Unhoused newcomers entering the city per step (fractions accumulate).
    pub demand_increase: f64,
    /// How strongly local demand pressure moves house prices.
    pub demand_sensitivity: f64,
    /// Societal standard: households below this contentment want to sell.
    pub contentment_threshold: f64,
    /// Half-width of the uniform noise added to neighbourhood attributes.
    pub noise: f64,
    /// Probability that a generated house starts vacant.
    pub initial_vacancy: f64,
    /// Fraction of the dataset's houses that become agents.
    pub house_sample_rate: f64,
    /// Starting cash range, as a multiple of the local average house price.
    pub starting_cash_min: f64,
    pub starting_cash_max: f64,
    /// Cost of living as a share of income when the dataset omits it.
    pub cost_of_living_ratio: f64,
    pub seed: u64,
    /// Halt once a step passes without any trade.
    pub stop_at_equilibrium: bool,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            growth_rate: 0.01,
            demand_increase: 0.0,
            demand_sensitivity: 0.05,
            contentment_threshold: 0.4,
            noise: 0.0,
            initial_vacancy: 0.0,
            house_sample_rate: 0.01,
            starting_cash_min: 0.1,
            starting_cash_max: 0.6,
            cost_of_living_ratio: 0.9,
            seed: 42,
            stop_at_equilibrium: false,
        }
    }
}

fn finite(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::InvalidParam {
            name,
            value,
            reason: "must be finite",
        })
    }
}

fn unit_interval(name: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(name, value)?;
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidParam {
            name,
            value,
            reason: "must be within [0, 1]",
        })
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(name, value)?;
    if value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidParam {
            name,
            value,
            reason: "must not be negative",
        })
    }
}

impl ModelParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        finite("growth_rate", self.growth_rate)?;
        if self.growth_rate <= -1.0 {
            return Err(ConfigError::InvalidParam {
                name: "growth_rate",
                value: self.growth_rate,
                reason: "must be greater than -1",
            });
        }
        non_negative("demand_increase", self.demand_increase)?;
        non_negative("demand_sensitivity", self.demand_sensitivity)?;
        unit_interval("contentment_threshold", self.contentment_threshold)?;
        unit_interval("noise", self.noise)?;
        unit_interval("initial_vacancy", self.initial_vacancy)?;
        unit_interval("house_sample_rate", self.house_sample_rate)?;
        if self.house_sample_rate == 0.0 {
            return Err(ConfigError::InvalidParam {
                name: "house_sample_rate",
                value: 0.0,
                reason: "must be greater than 0",
            });
        }
        non_negative("starting_cash_min", self.starting_cash_min)?;
        non_negative("starting_cash_max", self.starting_cash_max)?;
        if self.starting_cash_max < self.starting_cash_min {
            return Err(ConfigError::InvalidParam {
                name: "starting_cash_max",
                value: self.starting_cash_max,
                reason: "must not be below starting_cash_min",
            });
        }
        non_negative("cost_of_living_ratio", self.cost_of_living_ratio)?;
        Ok(())
    }
}

// ============================================================================
// Sweepable parameters - The knobs exposed to sliders and batch grids
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "snake_case")]
pub enum Param {
    GrowthRate,
    DemandIncrease,
    DemandSensitivity,
    ContentmentThreshold,
    Noise,
    InitialVacancy,
    HouseSampleRate,
}

impl Param {
    pub fn all() -> impl Iterator<Item = Param> {
        [
            Param::GrowthRate,
            Param::DemandIncrease,
            Param::DemandSensitivity,
            Param::ContentmentThreshold,
            Param::Noise,
            Param::InitialVacancy,
            Param::HouseSampleRate,
        ]
        .into_iter()
    }

    pub fn name(self) -> &'static str {
        match self {
            Param::GrowthRate => "growth_rate",
            Param::DemandIncrease => "demand_increase",
            Param::DemandSensitivity => "demand_sensitivity",
            Param::ContentmentThreshold => "contentment_threshold",
            Param::Noise => "noise",
            Param::InitialVacancy => "initial_vacancy",
            Param::HouseSampleRate => "house_sample_rate",
        }
    }

    pub fn get(self, params: &ModelParams) -> f64 {
        match self {
            Param::GrowthRate => params.growth_rate,
            Param::DemandIncrease => params.demand_increase,
            Param::DemandSensitivity => params.demand_sensitivity,
            Param::ContentmentThreshold => params.contentment_threshold,
            Param::Noise => params.noise,
            Param::InitialVacancy => params.initial_vacancy,
            Param::HouseSampleRate => params.house_sample_rate,
        }
    }

    pub fn set(self, params: &mut ModelParams, value: f64) {
        match self {
            Param::GrowthRate => params.growth_rate = value,
            Param::DemandIncrease => params.demand_increase = value,
            Param::DemandSensitivity => params.demand_sensitivity = value,
            Param::ContentmentThreshold => params.contentment_threshold = value,
            Param::Noise => params.noise = value,
            Param::InitialVacancy => params.initial_vacancy = value,
            Param::HouseSampleRate => params.house_sample_rate = value,
        }
    }

    /// Slider range for the interactive front-end: (min, max, step).
    pub fn slider_range(self) -> (f64, f64, f64) {
        match self {
            Param::GrowthRate => (0.0, 0.1, 0.005),
            Param::DemandIncrease => (0.0, 20.0, 1.0),
            Param::DemandSensitivity => (0.0, 0.5, 0.01),
            Param::ContentmentThreshold => (0.1, 1.0, 0.1),
            Param::Noise => (0.0, 0.2, 0.01),
            Param::InitialVacancy => (0.0, 0.5, 0.05),
            Param::HouseSampleRate => (0.001, 0.05, 0.001),
        }
    }
}

impl std::str::FromStr for Param {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_").to_ascii_lowercase();
        Param::all()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownParam(s.to_string()))
    }
}

impl std::fmt::Display for Param {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A slider definition for the visualization front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct ParamSlider {
    pub param: Param,
    pub label: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

/// Slider definitions seeded from the given parameter values.
pub fn sliders(params: &ModelParams) -> Vec<ParamSlider> {
    Param::all()
        .map(|param| {
            let (min, max, step) = param.slider_range();
            ParamSlider {
                param,
                label: param.name().replace('_', " "),
                value: param.get(params),
                min,
                max,
                step,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert_eq!(ModelParams::default().validate(), Ok(()));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let params: ModelParams =
            serde_json::from_str(r#"{ "growth_rate": 0.02, "seed": 7 }"#).unwrap();
        assert_eq!(params.growth_rate, 0.02);
        assert_eq!(params.seed, 7);
        assert_eq!(params.contentment_threshold, 0.4);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let mut params = ModelParams::default();
        params.contentment_threshold = 1.5;
        assert!(matches!(
            params.validate(),
            Err(ConfigError::InvalidParam {
                name: "contentment_threshold",
                ..
            })
        ));

        let mut params = ModelParams::default();
        params.house_sample_rate = 0.0;
        assert!(params.validate().is_err());

        let mut params = ModelParams::default();
        params.starting_cash_min = 2.0;
        params.starting_cash_max = 1.0;
        assert!(params.validate().is_err());

        let mut params = ModelParams::default();
        params.growth_rate = f64::NAN;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_param_names_round_trip() {
        for param in Param::all() {
            assert_eq!(param.name().parse::<Param>(), Ok(param));
        }
        assert_eq!("growth-rate".parse::<Param>(), Ok(Param::GrowthRate));
        assert!("money_loving".parse::<Param>().is_err());
    }

    #[test]
    fn test_param_set_get() {
        let mut params = ModelParams::default();
        Param::Noise.set(&mut params, 0.05);
        assert_eq!(Param::Noise.get(&params), 0.05);
        assert_eq!(params.noise, 0.05);
    }

    #[test]
    fn test_sliders_cover_all_params() {
        let sliders = sliders(&ModelParams::default());
        assert_eq!(sliders.len(), Param::all().count());
        for slider in &sliders {
            assert!(slider.min <= slider.max);
            assert!(slider.step > 0.0);
        }
    }
}
