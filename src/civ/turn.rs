use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::error::DeltaError;
use crate::rng::Rng;

use super::agents::{apply_decision, initialize_agents, AgentDecider};
use super::types::{
    AgentCity, AgentDelta, Award, AwardKind, CharacterStat, CivEvent, CivEventKind, CivStats,
    CivilizationSessionState, TurnDelta, TurnPhase,
};

const MAX_EVENTS: usize = 50;
const MAX_AWARDS: usize = 40;
const RANK_SURGE_PLACES: u32 = 10;
const POPULATION_MILESTONES: [u64; 4] = [1_000, 10_000, 100_000, 1_000_000];

pub fn new_session(agent_count: usize, seed: u32) -> CivilizationSessionState {
    let mut agents = initialize_agents(agent_count, seed);
    update_rankings(&mut agents);
    let stats = compute_stats(&agents);
    let character_stats = character_stats(&agents);
    CivilizationSessionState {
        seed,
        agents,
        current_turn: 0,
        turn_phase: TurnPhase::Waiting,
        current_view_index: 0,
        events: Vec::new(),
        awards: Vec::new(),
        character_stats,
        stats,
    }
}

fn ranking_order(a: &AgentCity, b: &AgentCity) -> Ordering {
    b.performance
        .total_population
        .cmp(&a.performance.total_population)
        .then_with(|| b.performance.total_money.cmp(&a.performance.total_money))
        .then_with(|| a.agent_id.cmp(&b.agent_id))
}

pub fn update_rankings(agents: &mut [AgentCity]) {
    let mut order: Vec<usize> = (0..agents.len()).collect();
    order.sort_by(|&a, &b| ranking_order(&agents[a], &agents[b]));
    for (position, idx) in order.into_iter().enumerate() {
        agents[idx].rank = position as u32 + 1;
    }
}

pub fn compute_stats(agents: &[AgentCity]) -> CivStats {
    let total_population: u64 = agents
        .iter()
        .map(|agent| agent.performance.total_population)
        .sum();
    CivStats {
        total_population,
        total_money: agents
            .iter()
            .map(|agent| agent.performance.total_money)
            .sum(),
        total_buildings: agents
            .iter()
            .map(|agent| agent.performance.buildings_placed as u64)
            .sum(),
        average_population: if agents.is_empty() {
            0
        } else {
            total_population / agents.len() as u64
        },
        leader_id: agents
            .iter()
            .find(|agent| agent.rank == 1)
            .map(|agent| agent.agent_id),
    }
}

pub fn character_stats(agents: &[AgentCity]) -> Vec<CharacterStat> {
    let mut groups: BTreeMap<_, Vec<&AgentCity>> = BTreeMap::new();
    for agent in agents {
        groups.entry(agent.personality).or_default().push(agent);
    }
    groups
        .into_iter()
        .map(|(personality, members)| {
            let count = members.len() as u64;
            CharacterStat {
                personality,
                agents: members.len() as u32,
                average_population: members
                    .iter()
                    .map(|agent| agent.performance.total_population)
                    .sum::<u64>()
                    / count,
                average_money: members
                    .iter()
                    .map(|agent| agent.performance.total_money)
                    .sum::<i64>()
                    / count as i64,
                best_rank: members
                    .iter()
                    .map(|agent| agent.rank)
                    .min()
                    .unwrap_or(0),
            }
        })
        .collect()
}

pub fn detect_events(previous: &[AgentCity], next: &[AgentCity], turn: u32) -> Vec<CivEvent> {
    let before: HashMap<u32, &AgentCity> =
        previous.iter().map(|agent| (agent.agent_id, agent)).collect();
    let mut events = Vec::new();

    let old_leader = previous.iter().find(|agent| agent.rank == 1).map(|a| a.agent_id);
    let new_leader = next.iter().find(|agent| agent.rank == 1).map(|a| a.agent_id);
    if let Some(leader) = new_leader {
        if old_leader != Some(leader) {
            events.push(CivEvent {
                turn,
                agent_id: leader,
                kind: CivEventKind::NewLeader {
                    previous: old_leader,
                },
            });
        }
    }

    for agent in next {
        let Some(prev) = before.get(&agent.agent_id) else {
            continue;
        };
        let was = prev.performance.total_population;
        let now = agent.performance.total_population;
        if let Some(milestone) = POPULATION_MILESTONES
            .iter()
            .rev()
            .find(|milestone| was < **milestone && now >= **milestone)
        {
            events.push(CivEvent {
                turn,
                agent_id: agent.agent_id,
                kind: CivEventKind::PopulationMilestone {
                    milestone: *milestone,
                },
            });
        }
        if prev.rank >= agent.rank + RANK_SURGE_PLACES {
            events.push(CivEvent {
                turn,
                agent_id: agent.agent_id,
                kind: CivEventKind::RankSurge {
                    from: prev.rank,
                    to: agent.rank,
                },
            });
        }
        if prev.performance.total_money >= 0 && agent.performance.total_money < 0 {
            events.push(CivEvent {
                turn,
                agent_id: agent.agent_id,
                kind: CivEventKind::WentBroke,
            });
        }
    }
    events
}

pub fn compute_awards(previous: &[AgentCity], next: &[AgentCity], turn: u32) -> Vec<Award> {
    let mut awards = Vec::new();
    let mut push = |kind, best: Option<(&AgentCity, i64)>| {
        if let Some((agent, value)) = best {
            awards.push(Award {
                turn,
                kind,
                agent_id: agent.agent_id,
                value,
            });
        }
    };

    push(
        AwardKind::MostPopulous,
        best_by(next, |agent| agent.performance.total_population as i64),
    );
    push(
        AwardKind::Richest,
        best_by(next, |agent| agent.performance.total_money),
    );
    push(
        AwardKind::MasterBuilder,
        best_by(next, |agent| agent.performance.buildings_placed as i64)
            .filter(|(_, value)| *value > 0),
    );

    let before: HashMap<u32, u32> = previous
        .iter()
        .map(|agent| (agent.agent_id, agent.rank))
        .collect();
    push(
        AwardKind::BiggestClimber,
        best_by(next, |agent| {
            before
                .get(&agent.agent_id)
                .map(|rank| *rank as i64 - agent.rank as i64)
                .unwrap_or(0)
        })
        .filter(|(_, climb)| *climb > 0),
    );
    awards
}

fn best_by(agents: &[AgentCity], value: impl Fn(&AgentCity) -> i64) -> Option<(&AgentCity, i64)> {
    agents
        .iter()
        .map(|agent| (agent, value(agent)))
        .max_by(|(a, av), (b, bv)| av.cmp(bv).then_with(|| b.agent_id.cmp(&a.agent_id)))
}

pub fn process_turn(
    state: &CivilizationSessionState,
    decider: &dyn AgentDecider,
) -> (CivilizationSessionState, TurnDelta) {
    let turn = state.current_turn + 1;
    let mut rng = Rng::derive(state.seed, turn as u64);

    let mut agents = state.agents.clone();
    for agent in agents.iter_mut() {
        let decision = decider.decide(agent, turn, &mut rng);
        apply_decision(&mut agent.performance, &decision, &mut rng);
        agent.last_decision = Some(decision);
    }
    update_rankings(&mut agents);

    let stats = compute_stats(&agents);
    let character_stats = character_stats(&agents);
    let events = detect_events(&state.agents, &agents, turn);
    let awards = compute_awards(&state.agents, &agents, turn);
    debug!(
        turn,
        events = events.len(),
        leader = ?stats.leader_id,
        "turn processed"
    );

    let delta = TurnDelta {
        turn,
        agents: agents
            .iter()
            .map(|agent| AgentDelta {
                agent_id: agent.agent_id,
                rank: agent.rank,
                performance: agent.performance.clone(),
                last_decision: agent.last_decision.clone(),
            })
            .collect(),
        events: events.clone(),
        awards: awards.clone(),
        character_stats: character_stats.clone(),
        stats: stats.clone(),
    };

    let mut next = CivilizationSessionState {
        agents,
        current_turn: turn,
        turn_phase: TurnPhase::Complete,
        character_stats,
        stats,
        ..state.clone()
    };
    append_bounded(&mut next.events, events, MAX_EVENTS);
    append_bounded(&mut next.awards, awards, MAX_AWARDS);
    (next, delta)
}

fn append_bounded<T>(log: &mut Vec<T>, items: Vec<T>, limit: usize) {
    log.extend(items);
    if log.len() > limit {
        let overflow = log.len() - limit;
        log.drain(..overflow);
    }
}

/// Applies a leader's delta. It must be for exactly the next turn; anything
/// else means the follower missed a broadcast and has to reload.
pub fn apply_delta(
    state: &CivilizationSessionState,
    delta: &TurnDelta,
) -> Result<CivilizationSessionState, DeltaError> {
    if delta.turn != state.current_turn + 1 {
        return Err(DeltaError::TurnGap {
            current: state.current_turn,
            received: delta.turn,
        });
    }
    let mut next = state.clone();
    let slots: HashMap<u32, usize> = next
        .agents
        .iter()
        .enumerate()
        .map(|(idx, agent)| (agent.agent_id, idx))
        .collect();
    for change in &delta.agents {
        let Some(idx) = slots.get(&change.agent_id) else {
            return Err(DeltaError::UnknownAgent(change.agent_id));
        };
        let agent = &mut next.agents[*idx];
        agent.rank = change.rank;
        agent.performance = change.performance.clone();
        agent.last_decision = change.last_decision.clone();
    }
    next.current_turn = delta.turn;
    next.turn_phase = TurnPhase::Complete;
    next.character_stats = delta.character_stats.clone();
    next.stats = delta.stats.clone();
    append_bounded(&mut next.events, delta.events.clone(), MAX_EVENTS);
    append_bounded(&mut next.awards, delta.awards.clone(), MAX_AWARDS);
    Ok(next)
}

pub fn set_view_index(state: &mut CivilizationSessionState, index: usize) {
    state.current_view_index = if state.agents.is_empty() {
        0
    } else {
        index % state.agents.len()
    };
}
