use serde::{Deserialize, Serialize};

use crate::geography::Position;
use crate::types::{HouseholdId, NeighbourhoodId, Price};

// === HOUSE ===

/// A dwelling located in exactly one neighbourhood.
///
/// Houses are created at load time and never destroyed during a run. The owner
/// is a lookup-only reference; the household holds the matching `residence`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct House {
    pub neighbourhood: NeighbourhoodId,
    pub location: Position,
    pub price: Price,
    pub owner: Option<HouseholdId>,
}

impl House {
    pub fn new(neighbourhood: NeighbourhoodId, location: Position, price: Price) -> Self {
        Self {
            neighbourhood,
            location,
            price: price.max(0.0),
            owner: None,
        }
    }

    pub fn is_vacant(&self) -> bool {
        self.owner.is_none()
    }

    /// Price multiplier for one step: trend growth plus the local demand response.
    pub fn price_factor(growth_rate: f64, demand_sensitivity: f64, demand_pressure: f64) -> f64 {
        (1.0 + growth_rate + demand_sensitivity * demand_pressure).max(0.0)
    }

    /// Advance the house one step. Returns the new price.
    pub fn step(&mut self, growth_rate: f64, demand_sensitivity: f64, demand_pressure: f64) -> Price {
        self.price *= Self::price_factor(growth_rate, demand_sensitivity, demand_pressure);
        self.price
    }

    /// Price a buyer pays, marked up by the contentment the buyer gains.
    pub fn transaction_price(&self, buyer_gain: f64) -> Price {
        self.price * (1.0 + buyer_gain.max(0.0))
    }
}
