use serde::{Deserialize, Serialize};

use crate::types::{HouseId, HouseholdId, NeighbourhoodId};

/// A reference to any agent the scheduler activates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentRef {
    Neighbourhood(NeighbourhoodId),
    House(HouseId),
    Household(HouseholdId),
}

/// Agents in creation order. Every step activates each agent exactly once, in
/// this order; agents created mid-run are appended.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schedule {
    agents: Vec<AgentRef>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, agent: AgentRef) {
        self.agents.push(agent);
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<AgentRef> {
        self.agents.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = AgentRef> + '_ {
        self.agents.iter().copied()
    }

    /// Number of scheduled agents of each kind: (neighbourhoods, houses, households).
    pub fn counts(&self) -> (usize, usize, usize) {
        self.agents
            .iter()
            .fold((0, 0, 0), |(n, h, hh), agent| match agent {
                AgentRef::Neighbourhood(_) => (n + 1, h, hh),
                AgentRef::House(_) => (n, h + 1, hh),
                AgentRef::Household(_) => (n, h, hh + 1),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_keeps_creation_order() {
        let mut schedule = Schedule::new();
        schedule.add(AgentRef::Neighbourhood(NeighbourhoodId::default()));
        schedule.add(AgentRef::House(HouseId::default()));
        schedule.add(AgentRef::Household(HouseholdId::default()));

        let kinds: Vec<AgentRef> = schedule.iter().collect();
        assert!(matches!(kinds[0], AgentRef::Neighbourhood(_)));
        assert!(matches!(kinds[1], AgentRef::House(_)));
        assert!(matches!(kinds[2], AgentRef::Household(_)));
        assert_eq!(schedule.counts(), (1, 1, 1));
        assert_eq!(schedule.get(3), None);
    }
}
