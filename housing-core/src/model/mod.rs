//! The housing market model: owns the city and every agent, and advances time.
//!
//! Agents live in slotmaps keyed by generational ids. Cross references
//! (house owner, household residence, house neighbourhood) are plain ids and
//! are resolved through the model on every use; a reference that no longer
//! resolves aborts the step with a [`ModelError`].

mod market;
mod schedule;
mod step;

pub use schedule::{AgentRef, Schedule};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use slotmap::SlotMap;
use tracing::debug;

use crate::agents::{House, Household};
use crate::config::ModelParams;
use crate::error::ModelError;
use crate::geography::Neighbourhood;
use crate::loader::{BoroughRecord, Dataset};
use crate::metrics::{Calibration, RunSummary, StepMetrics};
use crate::types::{Attribute, HouseId, HouseholdId, KeyToU64, NeighbourhoodId, Preferences, Price};

/// Number of house agents generated for a neighbourhood with `houses` dwellings.
pub fn sampled_house_count(houses: u32, sample_rate: f64) -> u32 {
    if houses == 0 {
        return 0;
    }
    ((houses as f64 * sample_rate).round() as u32).max(1)
}

#[derive(Debug, Clone)]
pub struct Model {
    pub params: ModelParams,
    pub neighbourhoods: SlotMap<NeighbourhoodId, Neighbourhood>,
    pub houses: SlotMap<HouseId, House>,
    pub households: SlotMap<HouseholdId, Household>,

    schedule: Schedule,
    rng: StdRng,
    current_step: u64,
    running: bool,
    deals: u32,
    /// Fractional newcomers carried over to the next step.
    newcomer_backlog: f64,
    metrics: Vec<StepMetrics>,
}

impl Model {
    /// Build the initial population from a dataset.
    pub fn new(dataset: &Dataset, params: ModelParams) -> Result<Self, ModelError> {
        params.validate()?;

        let mut model = Self {
            rng: StdRng::seed_from_u64(params.seed),
            params,
            neighbourhoods: SlotMap::with_key(),
            houses: SlotMap::with_key(),
            households: SlotMap::with_key(),
            schedule: Schedule::new(),
            current_step: 0,
            running: true,
            deals: 0,
            newcomer_backlog: 0.0,
            metrics: Vec::new(),
        };

        for record in &dataset.boroughs {
            model.populate(record);
        }

        let threshold = model.params.contentment_threshold;
        for (_, household) in model.households.iter_mut() {
            let Some(house) = household.residence.and_then(|id| model.houses.get(id)) else {
                continue;
            };
            let Some(neighbourhood) = model.neighbourhoods.get(house.neighbourhood) else {
                continue;
            };
            household.update_status(&neighbourhood.attributes, threshold);
        }

        model.update_aggregates()?;
        model.collect_metrics();

        debug!(
            neighbourhoods = model.neighbourhoods.len(),
            houses = model.houses.len(),
            households = model.households.len(),
            "model initialized"
        );
        Ok(model)
    }

    /// Create a neighbourhood with its sampled houses and their households.
    fn populate(&mut self, record: &BoroughRecord) {
        let cost_of_living = record
            .cost_of_living
            .unwrap_or(record.income * self.params.cost_of_living_ratio);
        let neighbourhood = Neighbourhood::new(record.name.clone(), record.geometry.clone())
            .with_attributes(record.attributes)
            .with_economy(record.income, cost_of_living, record.average_house_price)
            .with_targets(record.targets);
        let location = neighbourhood.centroid;
        let neighbourhood_id = self.add_neighbourhood(neighbourhood);

        for _ in 0..sampled_house_count(record.houses, self.params.house_sample_rate) {
            let house_id = self.add_house(House::new(neighbourhood_id, location, record.average_house_price));
            if self.rng.random::<f64>() < self.params.initial_vacancy {
                continue;
            }
            let cash = self.random_cash(record.average_house_price);
            let household = Household::new(self.random_preferences(), cash).with_residence(house_id);
            let household_id = self.add_household(household);
            self.houses[house_id].owner = Some(household_id);
        }
    }

    fn random_preferences(&mut self) -> Preferences {
        let raw: [f64; Attribute::COUNT] = std::array::from_fn(|_| self.rng.random());
        Preferences::from_raw(raw)
    }

    /// Starting cash relative to a reference house price.
    fn random_cash(&mut self, reference_price: Price) -> f64 {
        let factor = self
            .rng
            .random_range(self.params.starting_cash_min..=self.params.starting_cash_max);
        factor * reference_price
    }

    // === Agent Management ===

    pub fn add_neighbourhood(&mut self, neighbourhood: Neighbourhood) -> NeighbourhoodId {
        let id = self.neighbourhoods.insert(neighbourhood);
        self.schedule.add(AgentRef::Neighbourhood(id));
        id
    }

    /// Add a house; it joins its neighbourhood's member list.
    ///
    /// # Panics
    /// Panics if the house's neighbourhood does not exist.
    pub fn add_house(&mut self, house: House) -> HouseId {
        let neighbourhood = house.neighbourhood;
        let id = self.houses.insert(house);
        self.neighbourhoods[neighbourhood].house_ids.push(id);
        self.schedule.add(AgentRef::House(id));
        id
    }

    pub fn add_household(&mut self, household: Household) -> HouseholdId {
        let id = self.households.insert(household);
        self.schedule.add(AgentRef::Household(id));
        id
    }

    // === Queries ===

    pub fn step_count(&self) -> u64 {
        self.current_step
    }

    /// False once a step passed without any trade.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Trades closed in the latest step.
    pub fn deals(&self) -> u32 {
        self.deals
    }

    /// One row per step, starting with the initial state at step 0.
    pub fn metrics(&self) -> &[StepMetrics] {
        &self.metrics
    }

    pub fn latest_metrics(&self) -> Option<&StepMetrics> {
        self.metrics.last()
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn house(&self, id: HouseId) -> Result<&House, ModelError> {
        self.houses
            .get(id)
            .ok_or(ModelError::HouseNotFound(id.to_u64()))
    }

    pub fn household(&self, id: HouseholdId) -> Result<&Household, ModelError> {
        self.households
            .get(id)
            .ok_or(ModelError::HouseholdNotFound(id.to_u64()))
    }

    pub fn neighbourhood(&self, id: NeighbourhoodId) -> Result<&Neighbourhood, ModelError> {
        self.neighbourhoods
            .get(id)
            .ok_or(ModelError::NeighbourhoodNotFound(id.to_u64()))
    }

    pub fn find_neighbourhood(&self, name: &str) -> Option<NeighbourhoodId> {
        self.neighbourhoods
            .iter()
            .find(|(_, n)| n.name.eq_ignore_ascii_case(name))
            .map(|(id, _)| id)
    }

    pub fn house_owner(&self, id: HouseId) -> Option<HouseholdId> {
        self.houses.get(id).and_then(|house| house.owner)
    }

    /// Neighbourhood a household currently lives in.
    pub fn household_neighbourhood(&self, id: HouseholdId) -> Option<NeighbourhoodId> {
        let house = self.households.get(id)?.residence?;
        self.houses.get(house).map(|h| h.neighbourhood)
    }

    pub fn unhoused_count(&self) -> usize {
        self.households.values().filter(|h| !h.is_housed()).count()
    }

    pub fn vacant_count(&self) -> usize {
        self.houses.values().filter(|h| h.is_vacant()).count()
    }

    pub fn seller_count(&self) -> usize {
        self.households.values().filter(|h| h.selling).count()
    }

    /// Mean price over all houses; 0 without houses.
    pub fn average_price(&self) -> Price {
        if self.houses.is_empty() {
            return 0.0;
        }
        self.houses.values().map(|h| h.price).sum::<f64>() / self.houses.len() as f64
    }

    /// Mean contentment of housed households; 0 if nobody is housed.
    pub fn average_contentment(&self) -> f64 {
        let (sum, count) = self
            .households
            .values()
            .filter(|h| h.is_housed())
            .fold((0.0, 0usize), |(sum, count), h| (sum + h.contentment, count + 1));
        if count == 0 { 0.0 } else { sum / count as f64 }
    }

    /// Housed households below the contentment threshold, over all households;
    /// 0 without households.
    pub fn unhappy_share(&self) -> f64 {
        if self.households.is_empty() {
            return 0.0;
        }
        let unhappy = self
            .households
            .values()
            .filter(|h| h.is_housed() && h.contentment < self.params.contentment_threshold)
            .count();
        unhappy as f64 / self.households.len() as f64
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            final_unhappy_share: self.unhappy_share(),
            ..RunSummary::from_metrics(&self.metrics, self.calibration().rmse)
        }
    }

    /// Compare per-neighbourhood seller shares with the observed share of
    /// residents wanting to move out.
    pub fn calibration(&self) -> Calibration {
        Calibration::from_neighbourhoods(self.neighbourhoods.values())
    }

    // === Invariants ===

    /// Every broken cross reference or price, as a human readable line.
    pub fn check_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();

        for (id, household) in &self.households {
            let Some(house_id) = household.residence else {
                continue;
            };
            match self.houses.get(house_id) {
                None => violations.push(format!(
                    "household {} lives in missing house {}",
                    id.to_u64(),
                    house_id.to_u64()
                )),
                Some(house) if house.owner != Some(id) => violations.push(format!(
                    "household {} lives in house {} owned by {:?}",
                    id.to_u64(),
                    house_id.to_u64(),
                    house.owner.map(KeyToU64::to_u64)
                )),
                Some(_) => {}
            }
        }

        for (id, house) in &self.houses {
            if !house.price.is_finite() || house.price < 0.0 {
                violations.push(format!("house {} has price {}", id.to_u64(), house.price));
            }
            if let Some(owner) = house.owner {
                let resident = self.households.get(owner).and_then(|h| h.residence);
                if resident != Some(id) {
                    violations.push(format!(
                        "house {} owned by {} who lives elsewhere",
                        id.to_u64(),
                        owner.to_u64()
                    ));
                }
            }
            let memberships = self
                .neighbourhoods
                .iter()
                .filter(|(_, n)| n.house_ids.contains(&id))
                .map(|(nid, _)| nid)
                .collect::<Vec<_>>();
            if memberships != [house.neighbourhood] {
                violations.push(format!(
                    "house {} belongs to {} neighbourhoods",
                    id.to_u64(),
                    memberships.len()
                ));
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geography::{CalibrationTargets, Geometry};
    use crate::types::AttributeVector;

    fn record(name: &str, attributes: [f64; 4], houses: u32, price: f64) -> BoroughRecord {
        BoroughRecord {
            name: name.to_string(),
            geometry: Geometry::default(),
            attributes: AttributeVector(attributes),
            houses,
            income: 20.0,
            cost_of_living: Some(15.0),
            average_house_price: price,
            targets: CalibrationTargets::default(),
        }
    }

    fn dataset() -> Dataset {
        Dataset {
            boroughs: vec![
                record("Centrum", [0.9, 0.9, 0.2, 0.1], 300, 100.0),
                record("Noord", [0.2, 0.3, 0.9, 0.9], 500, 60.0),
                record("Empty", [0.5, 0.5, 0.5, 0.5], 0, 80.0),
            ],
        }
    }

    #[test]
    fn test_sampled_house_count() {
        assert_eq!(sampled_house_count(0, 0.5), 0);
        assert_eq!(sampled_house_count(10, 0.01), 1);
        assert_eq!(sampled_house_count(250, 0.01), 3);
        assert_eq!(sampled_house_count(1000, 1.0), 1000);
    }

    #[test]
    fn test_initial_population() {
        let params = ModelParams {
            house_sample_rate: 0.02,
            ..Default::default()
        };
        let model = Model::new(&dataset(), params).unwrap();

        assert_eq!(model.neighbourhoods.len(), 3);
        assert_eq!(model.houses.len(), 6 + 10);
        // No vacancy by default: one household per house
        assert_eq!(model.households.len(), model.houses.len());
        assert_eq!(model.vacant_count(), 0);
        assert_eq!(model.step_count(), 0);
        assert_eq!(model.metrics().len(), 1);
        assert!(model.check_invariants().is_empty());

        let centrum = model.find_neighbourhood("centrum").unwrap();
        for &house in &model.neighbourhoods[centrum].house_ids {
            assert_eq!(model.houses[house].price, 100.0);
            let owner = model.house_owner(house).unwrap();
            let cash = model.households[owner].cash;
            assert!((10.0..=60.0).contains(&cash), "cash {}", cash);
        }
    }

    #[test]
    fn test_full_vacancy_creates_no_households() {
        let params = ModelParams {
            initial_vacancy: 1.0,
            ..Default::default()
        };
        let model = Model::new(&dataset(), params).unwrap();
        assert!(model.households.is_empty());
        assert_eq!(model.vacant_count(), model.houses.len());
        assert_eq!(model.average_contentment(), 0.0);
    }

    #[test]
    fn test_schedule_in_creation_order() {
        let model = Model::new(&dataset(), ModelParams::default()).unwrap();
        let first: Vec<AgentRef> = model.schedule().iter().take(3).collect();
        assert!(matches!(first[0], AgentRef::Neighbourhood(_)));
        assert!(matches!(first[1], AgentRef::House(_)));
        assert!(matches!(first[2], AgentRef::Household(_)));
        let (n, h, hh) = model.schedule().counts();
        assert_eq!(
            (n, h, hh),
            (model.neighbourhoods.len(), model.houses.len(), model.households.len())
        );
    }

    #[test]
    fn test_initial_status_computed() {
        let model = Model::new(&dataset(), ModelParams::default()).unwrap();
        for household in model.households.values() {
            assert!(household.contentment > 0.0);
            assert_eq!(household.selling, household.contentment < 0.4);
        }
    }

    #[test]
    fn test_summary_population_and_unhappy_share() {
        let model = Model::new(&dataset(), ModelParams::default()).unwrap();
        let summary = model.summary();
        assert_eq!(summary.final_population as usize, model.households.len());
        // Everyone is housed at step 0 and sells exactly when unhappy
        let expected = model.seller_count() as f64 / model.households.len() as f64;
        assert!((summary.final_unhappy_share - expected).abs() < 1e-12);

        let params = ModelParams {
            contentment_threshold: 0.0,
            ..Default::default()
        };
        let content = Model::new(&dataset(), params).unwrap();
        assert_eq!(content.summary().final_unhappy_share, 0.0);

        let params = ModelParams {
            initial_vacancy: 1.0,
            ..Default::default()
        };
        let empty = Model::new(&dataset(), params).unwrap();
        assert_eq!(empty.summary().final_population, 0);
        assert_eq!(empty.unhappy_share(), 0.0);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = ModelParams {
            contentment_threshold: -0.1,
            ..Default::default()
        };
        assert!(matches!(Model::new(&dataset(), params), Err(ModelError::Config(_))));
    }

    #[test]
    fn test_invariant_check_catches_dangling_owner() {
        let mut model = Model::new(&dataset(), ModelParams::default()).unwrap();
        let (house_id, _) = model.houses.iter().next().unwrap();
        let owner = model.house_owner(house_id).unwrap();
        model.households.remove(owner);
        assert!(!model.check_invariants().is_empty());
    }
}
