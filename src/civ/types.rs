use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Personality {
    Builder,
    Trader,
    Expansionist,
    Hoarder,
    Balanced,
}

impl Personality {
    pub const ALL: [Personality; 5] = [
        Personality::Builder,
        Personality::Trader,
        Personality::Expansionist,
        Personality::Hoarder,
        Personality::Balanced,
    ];
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Performance {
    pub total_population: u64,
    pub total_money: i64,
    pub buildings_placed: u32,
    pub peak_population: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentAction {
    ZoneResidential,
    BuildServices,
    OpenTradeRoute,
    RaiseTaxes,
    Save,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDecision {
    pub turn: u32,
    pub action: AgentAction,
    pub spend: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCity {
    pub agent_id: u32,
    pub name: String,
    pub rank: u32,
    pub performance: Performance,
    pub personality: Personality,
    pub last_decision: Option<AgentDecision>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    #[default]
    Waiting,
    Processing,
    Complete,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CivEventKind {
    NewLeader { previous: Option<u32> },
    PopulationMilestone { milestone: u64 },
    RankSurge { from: u32, to: u32 },
    WentBroke,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CivEvent {
    pub turn: u32,
    pub agent_id: u32,
    pub kind: CivEventKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AwardKind {
    MostPopulous,
    Richest,
    MasterBuilder,
    BiggestClimber,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Award {
    pub turn: u32,
    pub kind: AwardKind,
    pub agent_id: u32,
    pub value: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterStat {
    pub personality: Personality,
    pub agents: u32,
    pub average_population: u64,
    pub average_money: i64,
    pub best_rank: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CivStats {
    pub total_population: u64,
    pub total_money: i64,
    pub total_buildings: u64,
    pub average_population: u64,
    pub leader_id: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CivilizationSessionState {
    pub seed: u32,
    pub agents: Vec<AgentCity>,
    pub current_turn: u32,
    pub turn_phase: TurnPhase,
    pub current_view_index: usize,
    pub events: Vec<CivEvent>,
    pub awards: Vec<Award>,
    pub character_stats: Vec<CharacterStat>,
    pub stats: CivStats,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDelta {
    pub agent_id: u32,
    pub rank: u32,
    pub performance: Performance,
    pub last_decision: Option<AgentDecision>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnDelta {
    pub turn: u32,
    pub agents: Vec<AgentDelta>,
    pub events: Vec<CivEvent>,
    pub awards: Vec<Award>,
    pub character_stats: Vec<CharacterStat>,
    pub stats: CivStats,
}
