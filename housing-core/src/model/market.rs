// Housing market: seller auction (pairwise house swaps) and vacant-house purchases

use crate::error::ModelError;
use crate::types::{HouseId, HouseholdId, KeyToU64, Price};

use super::Model;

/// A mutually beneficial, affordable house swap between two sellers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Swap {
    pub first: HouseholdId,
    pub second: HouseholdId,
    pub first_house: HouseId,
    pub second_house: HouseId,
    /// Contentment each party will have after moving.
    pub first_contentment: f64,
    pub second_contentment: f64,
    /// Price paid by `second` for `first_house`.
    pub first_house_price: Price,
    /// Price paid by `first` for `second_house`.
    pub second_house_price: Price,
}

impl Swap {
    /// Cash change of `first`; `second` changes by the negation.
    pub fn first_cash_delta(&self) -> f64 {
        self.first_house_price - self.second_house_price
    }
}

impl Model {
    /// Housed households that want to sell, in creation order.
    pub fn sellers(&self) -> Vec<HouseholdId> {
        self.households
            .iter()
            .filter(|(_, h)| h.selling && h.is_housed())
            .map(|(id, _)| id)
            .collect()
    }

    /// Evaluate a swap between two sellers.
    ///
    /// Returns `None` unless both strictly gain contentment and both can pay.
    pub fn propose_swap(&self, first: HouseholdId, second: HouseholdId) -> Result<Option<Swap>, ModelError> {
        let a = self.household(first)?;
        let b = self.household(second)?;
        let (Some(first_house), Some(second_house)) = (a.residence, b.residence) else {
            return Ok(None);
        };
        let house_a = self.house(first_house)?;
        let house_b = self.house(second_house)?;
        let attributes_a = &self.neighbourhood(house_a.neighbourhood)?.attributes;
        let attributes_b = &self.neighbourhood(house_b.neighbourhood)?.attributes;

        let first_contentment = a.contentment_in(attributes_b);
        let second_contentment = b.contentment_in(attributes_a);
        let first_gain = first_contentment - a.contentment;
        let second_gain = second_contentment - b.contentment;
        if first_gain <= 0.0 || second_gain <= 0.0 {
            return Ok(None);
        }

        let swap = Swap {
            first,
            second,
            first_house,
            second_house,
            first_contentment,
            second_contentment,
            first_house_price: house_a.transaction_price(second_gain),
            second_house_price: house_b.transaction_price(first_gain),
        };
        let delta = swap.first_cash_delta();
        if a.cash + delta < 0.0 || b.cash - delta < 0.0 {
            return Ok(None);
        }
        Ok(Some(swap))
    }

    /// Exchange houses, cash and contentment between the two parties.
    pub fn apply_swap(&mut self, swap: &Swap) -> Result<(), ModelError> {
        let delta = swap.first_cash_delta();
        {
            let first = self
                .households
                .get_mut(swap.first)
                .ok_or(ModelError::HouseholdNotFound(swap.first.to_u64()))?;
            first.cash += delta;
            first.move_into(swap.second_house, swap.first_contentment);
        }
        {
            let second = self
                .households
                .get_mut(swap.second)
                .ok_or(ModelError::HouseholdNotFound(swap.second.to_u64()))?;
            second.cash -= delta;
            second.move_into(swap.first_house, swap.second_contentment);
        }

        let first_neighbourhood = {
            let house = self
                .houses
                .get_mut(swap.first_house)
                .ok_or(ModelError::HouseNotFound(swap.first_house.to_u64()))?;
            house.price = swap.first_house_price;
            house.owner = Some(swap.second);
            house.neighbourhood
        };
        let second_neighbourhood = {
            let house = self
                .houses
                .get_mut(swap.second_house)
                .ok_or(ModelError::HouseNotFound(swap.second_house.to_u64()))?;
            house.price = swap.second_house_price;
            house.owner = Some(swap.first);
            house.neighbourhood
        };

        for id in [first_neighbourhood, second_neighbourhood] {
            self.neighbourhoods
                .get_mut(id)
                .ok_or(ModelError::NeighbourhoodNotFound(id.to_u64()))?
                .moves += 1;
        }
        self.deals += 1;

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "deal",
            step = self.current_step,
            first = swap.first.to_u64(),
            second = swap.second.to_u64(),
            first_house = swap.first_house.to_u64(),
            second_house = swap.second_house.to_u64(),
            from = self.neighbourhoods[first_neighbourhood].name.as_str(),
            to = self.neighbourhoods[second_neighbourhood].name.as_str(),
            first_house_price = swap.first_house_price,
            second_house_price = swap.second_house_price,
        );

        Ok(())
    }

    /// Match sellers pairwise. Each seller trades at most once per step.
    pub(super) fn run_auction(&mut self) -> Result<(), ModelError> {
        let sellers = self.sellers();
        let mut traded = vec![false; sellers.len()];

        for i in 0..sellers.len() {
            if traded[i] {
                continue;
            }
            for j in 0..sellers.len() {
                if i == j || traded[j] {
                    continue;
                }
                if let Some(swap) = self.propose_swap(sellers[i], sellers[j])? {
                    self.apply_swap(&swap)?;
                    traded[i] = true;
                    traded[j] = true;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Affordable vacant house in the neighbourhood the household likes best.
    /// Ties go to the earliest created house.
    pub fn best_vacant_house(&self, id: HouseholdId) -> Result<Option<(HouseId, f64)>, ModelError> {
        let household = self.household(id)?;
        let mut best: Option<(HouseId, f64)> = None;
        for (house_id, house) in &self.houses {
            if !house.is_vacant() || !household.can_afford(house.price) {
                continue;
            }
            let contentment = household.contentment_in(&self.neighbourhood(house.neighbourhood)?.attributes);
            if best.is_none_or(|(_, c)| contentment > c) {
                best = Some((house_id, contentment));
            }
        }
        Ok(best)
    }

    /// An unhoused household buys the best vacant house it can afford, if any.
    pub(super) fn buy_vacant(&mut self, id: HouseholdId) -> Result<Option<HouseId>, ModelError> {
        let Some((house_id, contentment)) = self.best_vacant_house(id)? else {
            return Ok(None);
        };
        let threshold = self.params.contentment_threshold;

        let house = self
            .houses
            .get_mut(house_id)
            .ok_or(ModelError::HouseNotFound(house_id.to_u64()))?;
        house.owner = Some(id);
        let price = house.price;
        let neighbourhood_id = house.neighbourhood;

        let household = self
            .households
            .get_mut(id)
            .ok_or(ModelError::HouseholdNotFound(id.to_u64()))?;
        household.cash -= price;
        household.move_into(house_id, contentment);
        household.selling = contentment < threshold;

        self.neighbourhoods
            .get_mut(neighbourhood_id)
            .ok_or(ModelError::NeighbourhoodNotFound(neighbourhood_id.to_u64()))?
            .moves += 1;

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "purchase",
            step = self.current_step,
            household = id.to_u64(),
            house = house_id.to_u64(),
            neighbourhood = self.neighbourhoods[neighbourhood_id].name.as_str(),
            price = price,
        );

        Ok(Some(house_id))
    }

    /// Sell a household's house to the market after its cash ran out.
    pub(super) fn force_sale(&mut self, id: HouseholdId) -> Result<(), ModelError> {
        let household = self
            .households
            .get_mut(id)
            .ok_or(ModelError::HouseholdNotFound(id.to_u64()))?;
        let Some(house_id) = household.move_out() else {
            return Ok(());
        };
        let house = self
            .houses
            .get_mut(house_id)
            .ok_or(ModelError::HouseNotFound(house_id.to_u64()))?;
        house.owner = None;
        household.cash += house.price;

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "forced_sale",
            step = self.current_step,
            household = id.to_u64(),
            house = house_id.to_u64(),
            price = house.price,
        );

        Ok(())
    }
}
