// Step orchestration: newcomers, auction, agent updates, aggregates, statistics

use std::collections::HashMap;

use tracing::debug;

use crate::agents::Household;
use crate::error::ModelError;
use crate::metrics::StepMetrics;
use crate::types::{HouseholdId, KeyToU64, NeighbourhoodId};

use super::{AgentRef, Model};

impl Model {
    /// Advance the model by one step.
    pub fn step(&mut self) -> Result<(), ModelError> {
        self.current_step += 1;
        self.deals = 0;

        // 1. DEMAND PHASE
        self.arrive_newcomers();

        // 2. AUCTION PHASE
        self.run_auction()?;

        // 3. AGENT PHASE
        for index in 0..self.schedule.len() {
            let Some(agent) = self.schedule.get(index) else {
                break;
            };
            self.step_agent(agent)?;
        }

        // 4. AGGREGATION PHASE
        self.update_aggregates()?;
        self.collect_metrics();

        self.running = self.deals > 0;
        Ok(())
    }

    /// Advance exactly `steps` steps, regardless of equilibrium.
    pub fn run(&mut self, steps: u64) -> Result<(), ModelError> {
        for _ in 0..steps {
            self.step()?;
        }
        Ok(())
    }

    /// Advance up to `max_steps` steps, stopping early at equilibrium when
    /// `stop_at_equilibrium` is set. Returns the number of steps taken.
    pub fn run_until_equilibrium(&mut self, max_steps: u64) -> Result<u64, ModelError> {
        let mut taken = 0;
        while taken < max_steps {
            self.step()?;
            taken += 1;
            if self.params.stop_at_equilibrium && !self.running {
                debug!(step = self.current_step, "equilibrium reached");
                break;
            }
        }
        Ok(taken)
    }

    fn arrive_newcomers(&mut self) {
        self.newcomer_backlog += self.params.demand_increase;
        let arriving = self.newcomer_backlog.floor();
        self.newcomer_backlog -= arriving;
        if arriving < 1.0 {
            return;
        }

        let reference_price = self.average_price();
        for _ in 0..arriving as u64 {
            let cash = self.random_cash(reference_price);
            let household = Household::new(self.random_preferences(), cash);
            self.add_household(household);
        }
        debug!(step = self.current_step, newcomers = arriving as u64, "newcomers arrived");
    }

    fn step_agent(&mut self, agent: AgentRef) -> Result<(), ModelError> {
        match agent {
            AgentRef::Neighbourhood(id) => {
                let (growth, noise) = (self.params.growth_rate, self.params.noise);
                self.neighbourhoods
                    .get_mut(id)
                    .ok_or(ModelError::NeighbourhoodNotFound(id.to_u64()))?
                    .step(&mut self.rng, growth, noise);
            }
            AgentRef::House(id) => {
                let neighbourhood = self.house(id)?.neighbourhood;
                let pressure = self.neighbourhood(neighbourhood)?.demand_pressure;
                let (growth, sensitivity) = (self.params.growth_rate, self.params.demand_sensitivity);
                let house = self
                    .houses
                    .get_mut(id)
                    .ok_or(ModelError::HouseNotFound(id.to_u64()))?;
                let price = house.step(growth, sensitivity, pressure);
                if !price.is_finite() {
                    return Err(ModelError::NonFinitePrice {
                        house: id.to_u64(),
                        step: self.current_step,
                    });
                }
            }
            AgentRef::Household(id) => self.step_household(id)?,
        }
        Ok(())
    }

    fn step_household(&mut self, id: HouseholdId) -> Result<(), ModelError> {
        let Some(house_id) = self.household(id)?.residence else {
            self.buy_vacant(id)?;
            return Ok(());
        };
        let neighbourhood = self.neighbourhood(self.house(house_id)?.neighbourhood)?;
        let net_income = neighbourhood.net_income();
        let attributes = neighbourhood.attributes;
        let threshold = self.params.contentment_threshold;

        let household = self
            .households
            .get_mut(id)
            .ok_or(ModelError::HouseholdNotFound(id.to_u64()))?;
        household.receive_net_income(net_income);
        if household.cash < 0.0 {
            return self.force_sale(id);
        }
        household.update_status(&attributes, threshold);
        Ok(())
    }

    /// Neighbourhood a household would most like to live in. Only
    /// neighbourhoods with houses count; ties go to the earlier one.
    fn preferred_neighbourhood(&self, household: &Household) -> Option<NeighbourhoodId> {
        let mut best: Option<(NeighbourhoodId, f64)> = None;
        for (id, neighbourhood) in &self.neighbourhoods {
            if !neighbourhood.has_houses() {
                continue;
            }
            let contentment = household.contentment_in(&neighbourhood.attributes);
            if best.is_none_or(|(_, c)| contentment > c) {
                best = Some((id, contentment));
            }
        }
        best.map(|(id, _)| id)
    }

    /// Recompute per-neighbourhood prices, occupancy, sellers, contentment and
    /// the demand pressure used by next step's price update.
    pub(super) fn update_aggregates(&mut self) -> Result<(), ModelError> {
        // Households looking for a home, by the neighbourhood they want
        let mut seekers: HashMap<NeighbourhoodId, u32> = HashMap::new();
        for (id, household) in &self.households {
            if household.is_housed() && !household.selling {
                continue;
            }
            let Some(preferred) = self.preferred_neighbourhood(household) else {
                continue;
            };
            if self.household_neighbourhood(id) != Some(preferred) {
                *seekers.entry(preferred).or_insert(0) += 1;
            }
        }

        for (id, neighbourhood) in self.neighbourhoods.iter_mut() {
            if !neighbourhood.has_houses() {
                neighbourhood.occupied = 0;
                neighbourhood.sellers = 0;
                neighbourhood.mean_contentment = 0.0;
                neighbourhood.demand_pressure = 0.0;
                continue;
            }

            let mut price_sum = 0.0;
            let mut occupied = 0u32;
            let mut sellers = 0u32;
            let mut contentment_sum = 0.0;
            for &house_id in &neighbourhood.house_ids {
                let house = self
                    .houses
                    .get(house_id)
                    .ok_or(ModelError::HouseNotFound(house_id.to_u64()))?;
                price_sum += house.price;
                let Some(owner) = house.owner else {
                    continue;
                };
                let household = self
                    .households
                    .get(owner)
                    .ok_or(ModelError::HouseholdNotFound(owner.to_u64()))?;
                occupied += 1;
                contentment_sum += household.contentment;
                if household.selling {
                    sellers += 1;
                }
            }

            let houses = neighbourhood.house_ids.len() as f64;
            neighbourhood.average_house_price = price_sum / houses;
            neighbourhood.occupied = occupied;
            neighbourhood.sellers = sellers;
            neighbourhood.mean_contentment = if occupied > 0 {
                contentment_sum / occupied as f64
            } else {
                0.0
            };
            let incoming = seekers.get(&id).copied().unwrap_or(0) as f64;
            neighbourhood.demand_pressure = ((incoming - sellers as f64) / houses).clamp(-1.0, 1.0);

            #[cfg(feature = "instrument")]
            tracing::info!(
                target: "borough",
                step = self.current_step,
                neighbourhood_id = id.to_u64(),
                name = neighbourhood.name.as_str(),
                average_price = neighbourhood.average_house_price,
                demand_pressure = neighbourhood.demand_pressure,
                occupied = occupied,
                sellers = sellers,
                seekers = incoming,
                mean_contentment = neighbourhood.mean_contentment,
                moves = neighbourhood.moves,
            );
        }
        Ok(())
    }

    pub(super) fn collect_metrics(&mut self) {
        let metrics = StepMetrics {
            step: self.current_step,
            deals: self.deals,
            average_contentment: self.average_contentment(),
            average_price: self.average_price(),
            sellers: self.seller_count() as u32,
            unhoused: self.unhoused_count() as u32,
            households: self.households.len() as u32,
            vacant: self.vacant_count() as u32,
        };

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "step",
            step = metrics.step,
            deals = metrics.deals,
            average_contentment = metrics.average_contentment,
            average_price = metrics.average_price,
            sellers = metrics.sellers,
            unhoused = metrics.unhoused,
            households = metrics.households,
            vacant = metrics.vacant,
        );

        self.metrics.push(metrics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::House;
    use crate::config::ModelParams;
    use crate::geography::{CalibrationTargets, Geometry};
    use crate::loader::{BoroughRecord, Dataset};
    use crate::types::AttributeVector;

    fn record(name: &str, attributes: [f64; 4], houses: u32, income: f64, cost: f64) -> BoroughRecord {
        BoroughRecord {
            name: name.to_string(),
            geometry: Geometry::default(),
            attributes: AttributeVector(attributes),
            houses,
            income,
            cost_of_living: Some(cost),
            average_house_price: 100.0,
            targets: CalibrationTargets::default(),
        }
    }

    fn dataset() -> Dataset {
        Dataset {
            boroughs: vec![
                record("Centrum", [0.9, 0.8, 0.1, 0.1], 1000, 20.0, 15.0),
                record("Noord", [0.1, 0.2, 0.9, 0.9], 1000, 15.0, 10.0),
                record("Zuid", [0.5, 0.5, 0.5, 0.5], 1000, 18.0, 12.0),
            ],
        }
    }

    fn model(params: ModelParams) -> Model {
        Model::new(&dataset(), params).unwrap()
    }

    #[test]
    fn test_step_counter_and_metrics() {
        let mut m = model(ModelParams::default());
        m.run(5).unwrap();
        assert_eq!(m.step_count(), 5);
        assert_eq!(m.metrics().len(), 6);
        let steps: Vec<u64> = m.metrics().iter().map(|r| r.step).collect();
        assert_eq!(steps, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_prices_inflate_without_pressure() {
        let params = ModelParams {
            demand_sensitivity: 0.0,
            contentment_threshold: 0.0,
            ..Default::default()
        };
        let mut m = model(params);
        m.step().unwrap();
        for house in m.houses.values() {
            assert!((house.price - 101.0).abs() < 1e-9);
        }
        assert_eq!(m.deals(), 0);
        assert!(!m.is_running());
    }

    #[test]
    fn test_average_price_matches_members() {
        let mut m = model(ModelParams {
            demand_increase: 2.0,
            ..Default::default()
        });
        m.run(4).unwrap();
        for neighbourhood in m.neighbourhoods.values() {
            let mean = neighbourhood
                .house_ids
                .iter()
                .map(|&h| m.houses[h].price)
                .sum::<f64>()
                / neighbourhood.house_ids.len() as f64;
            assert!((neighbourhood.average_house_price - mean).abs() < 1e-9);
        }
    }

    #[test]
    fn test_fractional_newcomers_accumulate() {
        let mut m = model(ModelParams {
            demand_increase: 0.5,
            ..Default::default()
        });
        let before = m.households.len();
        m.step().unwrap();
        assert_eq!(m.households.len(), before);
        m.step().unwrap();
        assert_eq!(m.households.len(), before + 1);
    }

    #[test]
    fn test_newcomers_buy_vacant_houses() {
        let mut m = model(ModelParams {
            initial_vacancy: 1.0,
            demand_increase: 3.0,
            starting_cash_min: 5.0,
            starting_cash_max: 5.0,
            growth_rate: 0.0,
            ..Default::default()
        });
        assert_eq!(m.households.len(), 0);
        m.step().unwrap();
        assert_eq!(m.households.len(), 3);
        assert_eq!(m.unhoused_count(), 0);
        assert_eq!(m.vacant_count(), m.houses.len() - 3);
        assert!(m.check_invariants().is_empty());
    }

    #[test]
    fn test_negative_income_forces_sale() {
        let data = Dataset {
            boroughs: vec![record("Duur", [0.5, 0.5, 0.5, 0.5], 100, 1.0, 1000.0)],
        };
        let mut m = Model::new(&data, ModelParams::default()).unwrap();
        m.step().unwrap();
        // Everyone went broke, sold to the market, and still has too little to buy back in
        assert_eq!(m.vacant_count(), m.houses.len());
        assert_eq!(m.unhoused_count(), m.households.len());
        assert!(m.check_invariants().is_empty());
    }

    #[test]
    fn test_demand_pressure_bounded() {
        let mut m = model(ModelParams {
            demand_increase: 50.0,
            ..Default::default()
        });
        m.run(3).unwrap();
        for neighbourhood in m.neighbourhoods.values() {
            assert!((-1.0..=1.0).contains(&neighbourhood.demand_pressure));
        }
    }

    #[test]
    fn test_unhoused_seekers_raise_pressure() {
        let mut m = model(ModelParams {
            contentment_threshold: 0.0,
            ..Default::default()
        });
        let centrum = m.find_neighbourhood("Centrum").unwrap();
        // Homeless households who love what Centrum offers, too poor to buy
        for _ in 0..5 {
            m.add_household(Household::new(
                crate::types::Preferences::from_raw([1.0, 0.0, 0.0, 0.0]),
                0.0,
            ));
        }
        m.update_aggregates().unwrap();
        assert!(m.neighbourhoods[centrum].demand_pressure > 0.0);
    }

    #[test]
    fn test_run_until_equilibrium_stops_early() {
        let mut m = model(ModelParams {
            stop_at_equilibrium: true,
            contentment_threshold: 0.0,
            ..Default::default()
        });
        assert_eq!(m.run_until_equilibrium(50).unwrap(), 1);

        let mut m = model(ModelParams {
            contentment_threshold: 0.0,
            ..Default::default()
        });
        assert_eq!(m.run_until_equilibrium(7).unwrap(), 7);
    }

    #[test]
    fn test_dangling_residence_aborts() {
        let mut m = model(ModelParams::default());
        let (house_id, _) = m.houses.iter().next().unwrap();
        m.houses.remove(house_id);
        assert!(matches!(m.step(), Err(ModelError::HouseNotFound(_))));
    }

    #[test]
    fn test_same_seed_same_run() {
        let params = ModelParams {
            demand_increase: 1.5,
            noise: 0.05,
            ..Default::default()
        };
        let mut a = model(params.clone());
        let mut b = model(params);
        a.run(10).unwrap();
        b.run(10).unwrap();
        assert_eq!(a.metrics(), b.metrics());
    }

    #[test]
    fn test_house_added_mid_run_is_scheduled() {
        let mut m = model(ModelParams::default());
        let centrum = m.find_neighbourhood("Centrum").unwrap();
        let house = m.add_house(House::new(centrum, [0.0, 0.0], 100.0));
        assert_eq!(m.schedule().counts().1, m.houses.len());
        m.params.demand_sensitivity = 0.0;
        m.step().unwrap();
        assert!((m.houses[house].price - 101.0).abs() < 1e-9);
    }
}
