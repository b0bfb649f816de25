// Neighbourhood (borough) agent: static geometry plus per-step aggregates

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::types::{Attribute, AttributeVector, HouseId, Price};

use super::geometry::{Geometry, Position};

/// Observed values from the dataset that a calibrated run should reproduce.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CalibrationTargets {
    pub houses_sold: Option<f64>,
    pub satisfaction: Option<f64>,
    /// Share of residents wanting to move out, as a fraction in [0, 1].
    pub want_to_move_out: Option<f64>,
}

/// A geographic subdivision of the city aggregating houses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neighbourhood {
    pub name: String,
    pub geometry: Geometry,
    pub centroid: Position,
    pub attributes: AttributeVector,
    /// Household disposable income earned per step by residents.
    pub salary: f64,
    pub cost_of_living: f64,
    pub targets: CalibrationTargets,

    /// Member houses, in creation order.
    pub house_ids: Vec<HouseId>,

    // Aggregates, recomputed at the end of every step
    pub average_house_price: Price,
    pub demand_pressure: f64,
    pub occupied: u32,
    pub sellers: u32,
    pub mean_contentment: f64,
    /// Cumulative number of trades touching this neighbourhood.
    pub moves: u32,
}

impl Neighbourhood {
    pub fn new(name: impl Into<String>, geometry: Geometry) -> Self {
        let centroid = geometry.centroid();
        Self {
            name: name.into(),
            geometry,
            centroid,
            attributes: AttributeVector::default(),
            salary: 0.0,
            cost_of_living: 0.0,
            targets: CalibrationTargets::default(),
            house_ids: Vec::new(),
            average_house_price: 0.0,
            demand_pressure: 0.0,
            occupied: 0,
            sellers: 0,
            mean_contentment: 0.0,
            moves: 0,
        }
    }

    pub fn with_attributes(mut self, attributes: AttributeVector) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_economy(mut self, salary: f64, cost_of_living: f64, average_house_price: Price) -> Self {
        self.salary = salary;
        self.cost_of_living = cost_of_living;
        self.average_house_price = average_house_price;
        self
    }

    pub fn with_targets(mut self, targets: CalibrationTargets) -> Self {
        self.targets = targets;
        self
    }

    /// Net income a resident household gains per step.
    pub fn net_income(&self) -> f64 {
        self.salary - self.cost_of_living
    }

    pub fn has_houses(&self) -> bool {
        !self.house_ids.is_empty()
    }

    /// Gradually increases salary and cost of living.
    pub fn growth(&mut self, growth_rate: f64) {
        self.salary *= 1.0 + growth_rate;
        self.cost_of_living *= 1.0 + growth_rate;
    }

    /// Stochastic drift of the attributes, kept within [0, 1].
    pub fn noise<R: Rng>(&mut self, rng: &mut R, sigma: f64) {
        if sigma <= 0.0 {
            return;
        }
        for attribute in Attribute::all() {
            let drift = rng.random_range(-sigma..=sigma);
            let value = (self.attributes.get(attribute) + drift).clamp(0.0, 1.0);
            self.attributes.set(attribute, value);
        }
    }

    /// Advance the neighbourhood one step.
    pub fn step<R: Rng>(&mut self, rng: &mut R, growth_rate: f64, sigma: f64) {
        self.growth(growth_rate);
        self.noise(rng, sigma);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn neighbourhood() -> Neighbourhood {
        Neighbourhood::new("Jordaan", Geometry::default())
            .with_attributes(AttributeVector([0.5, 0.5, 0.5, 0.5]))
            .with_economy(20.0, 15.0, 100.0)
    }

    #[test]
    fn test_growth_compounds() {
        let mut n = neighbourhood();
        n.growth(0.01);
        n.growth(0.01);
        assert!((n.salary - 20.0 * 1.01 * 1.01).abs() < 1e-12);
        assert!((n.cost_of_living - 15.0 * 1.01 * 1.01).abs() < 1e-12);
        assert!((n.net_income() - 5.0 * 1.01 * 1.01).abs() < 1e-12);
    }

    #[test]
    fn test_zero_noise_leaves_attributes() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let mut n = neighbourhood();
        n.step(&mut rng, 0.0, 0.0);
        assert_eq!(n.attributes, AttributeVector([0.5, 0.5, 0.5, 0.5]));
    }

    #[test]
    fn test_noise_stays_in_unit_interval() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut n = neighbourhood().with_attributes(AttributeVector([0.0, 1.0, 0.02, 0.98]));
        for _ in 0..200 {
            n.noise(&mut rng, 0.2);
            for attribute in Attribute::all() {
                let v = n.attributes.get(attribute);
                assert!((0.0..=1.0).contains(&v), "{:?} = {}", attribute, v);
            }
        }
    }
}
