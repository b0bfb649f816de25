use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::geography::Neighbourhood;

/// City-wide statistics collected after every step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct StepMetrics {
    pub step: u64,
    /// Trades closed by the auction this step.
    pub deals: u32,
    /// Mean contentment of housed households.
    pub average_contentment: f64,
    pub average_price: f64,
    pub sellers: u32,
    pub unhoused: u32,
    pub households: u32,
    pub vacant: u32,
}

/// Headline numbers of a finished run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct RunSummary {
    pub steps: u64,
    pub total_deals: u64,
    pub final_average_contentment: f64,
    pub final_average_price: f64,
    /// Relative change of the average price since step 0.
    pub price_growth: f64,
    pub final_unhoused: u32,
    /// Households alive at the last step.
    pub final_population: u32,
    /// Share of the final population housed below the contentment threshold.
    pub final_unhappy_share: f64,
    /// Mean share of households selling, over all steps after step 0.
    pub mean_seller_share: f64,
    /// Last step with at least one deal.
    pub last_deal_step: Option<u64>,
    pub seller_share_rmse: Option<f64>,
}

impl RunSummary {
    pub fn from_metrics(metrics: &[StepMetrics], seller_share_rmse: Option<f64>) -> Self {
        let (Some(first), Some(last)) = (metrics.first(), metrics.last()) else {
            return Self {
                seller_share_rmse,
                ..Default::default()
            };
        };

        let price_growth = if first.average_price > 0.0 {
            last.average_price / first.average_price - 1.0
        } else {
            0.0
        };

        let later = &metrics[1..];
        let mean_seller_share = if later.is_empty() {
            0.0
        } else {
            later
                .iter()
                .map(|m| {
                    if m.households == 0 {
                        0.0
                    } else {
                        m.sellers as f64 / m.households as f64
                    }
                })
                .sum::<f64>()
                / later.len() as f64
        };

        Self {
            steps: last.step,
            total_deals: metrics.iter().map(|m| m.deals as u64).sum(),
            final_average_contentment: last.average_contentment,
            final_average_price: last.average_price,
            price_growth,
            final_unhoused: last.unhoused,
            final_population: last.households,
            final_unhappy_share: 0.0,
            mean_seller_share,
            last_deal_step: metrics.iter().rev().find(|m| m.deals > 0).map(|m| m.step),
            seller_share_rmse,
        }
    }
}

/// Simulated against observed share of residents wanting to move, per neighbourhood.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRow {
    pub neighbourhood: String,
    pub simulated: f64,
    pub observed: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Calibration {
    pub rows: Vec<CalibrationRow>,
    /// `None` when no neighbourhood carries a target.
    pub rmse: Option<f64>,
}

impl Calibration {
    /// Seller share (sellers / occupied houses) against `want_to_move_out`.
    /// Neighbourhoods without a target or without residents are left out.
    pub fn from_neighbourhoods<'a>(neighbourhoods: impl IntoIterator<Item = &'a Neighbourhood>) -> Self {
        let rows: Vec<CalibrationRow> = neighbourhoods
            .into_iter()
            .filter(|n| n.occupied > 0)
            .filter_map(|n| {
                let observed = n.targets.want_to_move_out?;
                Some(CalibrationRow {
                    neighbourhood: n.name.clone(),
                    simulated: n.sellers as f64 / n.occupied as f64,
                    observed,
                })
            })
            .collect();

        let rmse = (!rows.is_empty()).then(|| {
            let squared: f64 = rows.iter().map(|r| (r.simulated - r.observed).powi(2)).sum();
            (squared / rows.len() as f64).sqrt()
        });
        Self { rows, rmse }
    }
}
