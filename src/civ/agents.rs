use crate::rng::Rng;

use super::types::{AgentAction, AgentCity, AgentDecision, Performance, Personality};

const NAME_HEADS: [&str; 12] = [
    "Ash", "Bel", "Cor", "Dun", "El", "Fair", "Glen", "Har", "Iron", "Kings", "Lake", "Mar",
];
const NAME_TAILS: [&str; 8] = [
    "ford", "haven", "mouth", "stead", "ton", "vale", "wick", "bury",
];

pub fn initialize_agents(count: usize, seed: u32) -> Vec<AgentCity> {
    let mut rng = Rng::derive(seed, 0);
    (0..count)
        .map(|index| {
            let agent_id = index as u32 + 1;
            let head = rng.pick(&NAME_HEADS).copied().unwrap_or("New");
            let tail = rng.pick(&NAME_TAILS).copied().unwrap_or("town");
            let personality = rng
                .pick(&Personality::ALL)
                .copied()
                .unwrap_or(Personality::Balanced);
            let population = rng.range_i32(100, 500) as u64;
            AgentCity {
                agent_id,
                name: format!("{head}{tail} {agent_id}"),
                rank: agent_id,
                performance: Performance {
                    total_population: population,
                    total_money: rng.range_i32(1_000, 5_000) as i64,
                    buildings_placed: 0,
                    peak_population: population,
                },
                personality,
                last_decision: None,
            }
        })
        .collect()
}

pub trait AgentDecider: Send + Sync {
    fn decide(&self, agent: &AgentCity, turn: u32, rng: &mut Rng) -> AgentDecision;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ArchetypeDecider;

impl ArchetypeDecider {
    fn weights(personality: Personality) -> [(AgentAction, u32); 5] {
        use AgentAction::*;
        match personality {
            Personality::Builder => [
                (ZoneResidential, 3),
                (BuildServices, 5),
                (OpenTradeRoute, 1),
                (RaiseTaxes, 1),
                (Save, 1),
            ],
            Personality::Trader => [
                (ZoneResidential, 2),
                (BuildServices, 1),
                (OpenTradeRoute, 5),
                (RaiseTaxes, 1),
                (Save, 1),
            ],
            Personality::Expansionist => [
                (ZoneResidential, 6),
                (BuildServices, 2),
                (OpenTradeRoute, 1),
                (RaiseTaxes, 1),
                (Save, 0),
            ],
            Personality::Hoarder => [
                (ZoneResidential, 1),
                (BuildServices, 1),
                (OpenTradeRoute, 2),
                (RaiseTaxes, 2),
                (Save, 5),
            ],
            Personality::Balanced => [
                (ZoneResidential, 2),
                (BuildServices, 2),
                (OpenTradeRoute, 2),
                (RaiseTaxes, 1),
                (Save, 2),
            ],
        }
    }
}

impl AgentDecider for ArchetypeDecider {
    fn decide(&self, agent: &AgentCity, turn: u32, rng: &mut Rng) -> AgentDecision {
        let money = agent.performance.total_money;
        let action = if money < 100 {
            if rng.chance(0.5) {
                AgentAction::RaiseTaxes
            } else {
                AgentAction::Save
            }
        } else {
            let weights = Self::weights(agent.personality);
            let total: u32 = weights.iter().map(|(_, weight)| weight).sum();
            let mut roll = rng.range_i32(0, total.saturating_sub(1) as i32) as u32;
            let mut chosen = AgentAction::Save;
            for (action, weight) in weights {
                if roll < weight {
                    chosen = action;
                    break;
                }
                roll -= weight;
            }
            chosen
        };

        let budget = money.max(0);
        let spend = match action {
            AgentAction::ZoneResidential => budget.min(rng.range_i32(200, 400) as i64),
            AgentAction::BuildServices => budget.min(300),
            AgentAction::OpenTradeRoute => budget.min(150),
            AgentAction::RaiseTaxes | AgentAction::Save => 0,
        };
        AgentDecision {
            turn,
            action,
            spend,
        }
    }
}

pub fn apply_decision(performance: &mut Performance, decision: &AgentDecision, rng: &mut Rng) {
    let population = performance.total_population;
    performance.total_money -= decision.spend;
    match decision.action {
        AgentAction::ZoneResidential => {
            performance.total_population += (decision.spend / 2) as u64 + rng.range_i32(0, 50) as u64;
            performance.buildings_placed += 1;
        }
        AgentAction::BuildServices => {
            if decision.spend > 0 {
                performance.total_population += population / 20 + 10;
                performance.buildings_placed += 2;
            }
        }
        AgentAction::OpenTradeRoute => {
            if decision.spend > 0 {
                performance.total_money +=
                    decision.spend + (population / 5) as i64 + rng.range_i32(50, 200) as i64;
            }
        }
        AgentAction::RaiseTaxes => {
            performance.total_money += (population / 3) as i64;
            performance.total_population -= population / 50;
        }
        AgentAction::Save => {
            performance.total_money += (population / 10) as i64;
        }
    }
    performance.total_money += (performance.total_population / 20) as i64;
    performance.total_money -= performance.buildings_placed as i64 * 2;
    performance.peak_population = performance.peak_population.max(performance.total_population);
}
