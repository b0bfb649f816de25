use serde::{Deserialize, Serialize};

use crate::types::{AttributeVector, Cash, HouseId, Preferences, Price};

// === HOUSEHOLD ===

/// A household on the housing market.
///
/// Preferences are fixed at creation. Contentment and the selling flag are
/// re-derived every step from the neighbourhood it lives in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Household {
    pub preferences: Preferences,
    pub cash: Cash,
    /// Lookup-only reference; `None` while unhoused.
    pub residence: Option<HouseId>,
    pub contentment: f64,
    pub selling: bool,
}

impl Household {
    pub fn new(preferences: Preferences, cash: Cash) -> Self {
        Self {
            preferences,
            cash,
            residence: None,
            contentment: 0.0,
            selling: false,
        }
    }

    pub fn with_residence(mut self, house: HouseId) -> Self {
        self.residence = Some(house);
        self
    }

    pub fn is_housed(&self) -> bool {
        self.residence.is_some()
    }

    /// Contentment this household would have in a neighbourhood.
    pub fn contentment_in(&self, attributes: &AttributeVector) -> f64 {
        self.preferences.contentment(attributes)
    }

    pub fn can_afford(&self, price: Price) -> bool {
        price <= self.cash
    }

    /// Re-derive contentment and selling status from the current neighbourhood.
    pub fn update_status(&mut self, attributes: &AttributeVector, threshold: f64) {
        self.contentment = self.contentment_in(attributes);
        self.selling = self.contentment < threshold;
    }

    /// Income minus cost of living for the step.
    pub fn receive_net_income(&mut self, net_income: f64) {
        self.cash += net_income;
    }

    /// Leave the current residence, e.g. after a forced sale.
    pub fn move_out(&mut self) -> Option<HouseId> {
        self.contentment = 0.0;
        self.selling = false;
        self.residence.take()
    }

    pub fn move_into(&mut self, house: HouseId, contentment: f64) {
        self.residence = Some(house);
        self.contentment = contentment;
    }
}
