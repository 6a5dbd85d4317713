use clap::Parser;
use iso_sim_server::civ::ArchetypeDecider;
use iso_sim_server::constants::NEED_MAX;
use iso_sim_server::engine::tick;
use iso_sim_server::sync::{
    now_ms, LocalHub, MemorySessionStore, SyncConfig, SyncNotice, SyncProvider, Viewer,
};
use iso_sim_server::types::{ParkConfig, ParkState};
use iso_sim_server::world::generate_demo_park;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const DEFAULT_TICKS: u64 = 3_000;
const DEFAULT_SEEDS: [u32; 3] = [1, 7, 42];
const DEFAULT_VIEWERS: usize = 3;
const DEFAULT_TURNS: u32 = 6;
const CIV_AGENT_COUNT: usize = 40;
const CIV_TIME_LIMIT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Park ticks per scenario.
    #[arg(long)]
    ticks: Option<u64>,
    #[arg(long)]
    seed: Option<u64>,
    /// Overrides the park's guest cap.
    #[arg(long)]
    guests: Option<usize>,
    /// Also run the multi-viewer civilization scenario.
    #[arg(long)]
    civ: bool,
    #[arg(long)]
    viewers: Option<usize>,
    #[arg(long)]
    turns: Option<u32>,
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Debug)]
struct ParkScenario {
    name: String,
    seed: u32,
    ticks: u64,
    max_guests: Option<usize>,
}

#[derive(Clone, Debug)]
struct CivScenario {
    name: String,
    seed: u32,
    viewers: usize,
    turns: u32,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ParkResultLine {
    scenario: String,
    seed: u32,
    ticks: u64,
    guests_in_park: usize,
    total_guests_admitted: u64,
    rides_ridden: u64,
    rating: f32,
    cash: i64,
    ride_revenue: i64,
    shop_revenue: i64,
    rides_with_breakdowns: usize,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CivResultLine {
    scenario: String,
    seed: u32,
    viewers: usize,
    target_turns: u32,
    final_turn: u32,
    first_leader: Option<String>,
    final_leader: Option<String>,
    failover_ms: Option<u64>,
    converged: bool,
    sync_errors: usize,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct AnomalyRecord {
    tick: u64,
    message: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunSummary {
    run_id: String,
    started_at_ms: u64,
    finished_at_ms: u64,
    scenario_count: usize,
    anomaly_count: usize,
    scenarios: Vec<Value>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StructuredLogLine {
    timestamp_ms: u64,
    level: String,
    event: String,
    run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scenario: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tick: Option<u64>,
    details: Value,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let park_scenarios = resolve_park_scenarios(&cli);
    let run_started_at_ms = now_ms();
    let seed_hint = park_scenarios.first().map(|s| s.seed).unwrap_or(0);
    let run_id = cli
        .run_id
        .clone()
        .unwrap_or_else(|| default_run_id(seed_hint, run_started_at_ms));
    let mut results: Vec<Value> = Vec::new();
    let mut total_anomalies = 0usize;

    for scenario in &park_scenarios {
        emit_log(
            "info",
            "scenario_started",
            &run_id,
            Some(&scenario.name),
            None,
            json!({ "seed": scenario.seed, "ticks": scenario.ticks, "maxGuests": scenario.max_guests }),
        );
        let (result, anomaly_records) = run_park_scenario(scenario);
        for anomaly in &anomaly_records {
            emit_log(
                "warn",
                "anomaly_detected",
                &run_id,
                Some(&scenario.name),
                Some(anomaly.tick),
                json!({ "message": anomaly.message }),
            );
        }
        total_anomalies += anomaly_records.len();
        emit_log(
            "info",
            "scenario_finished",
            &run_id,
            Some(&scenario.name),
            Some(result.ticks),
            json!({
                "guestsInPark": result.guests_in_park,
                "rating": result.rating,
                "anomalyCount": anomaly_records.len(),
            }),
        );
        println!(
            "{}",
            serde_json::to_string(&result).expect("scenario result should serialize")
        );
        results.push(serde_json::to_value(&result).expect("scenario result should serialize"));
    }

    if cli.civ {
        let scenario = resolve_civ_scenario(&cli);
        emit_log(
            "info",
            "scenario_started",
            &run_id,
            Some(&scenario.name),
            None,
            json!({ "seed": scenario.seed, "viewers": scenario.viewers, "turns": scenario.turns }),
        );
        let result = run_civ_scenario(&scenario, &run_id).await;
        for anomaly in &result.anomalies {
            emit_log(
                "warn",
                "anomaly_detected",
                &run_id,
                Some(&scenario.name),
                Some(u64::from(result.final_turn)),
                json!({ "message": anomaly }),
            );
        }
        total_anomalies += result.anomalies.len();
        emit_log(
            "info",
            "scenario_finished",
            &run_id,
            Some(&scenario.name),
            Some(u64::from(result.final_turn)),
            json!({
                "finalLeader": result.final_leader,
                "failoverMs": result.failover_ms,
                "converged": result.converged,
            }),
        );
        println!(
            "{}",
            serde_json::to_string(&result).expect("scenario result should serialize")
        );
        results.push(serde_json::to_value(&result).expect("scenario result should serialize"));
    }

    let summary = RunSummary {
        run_id: run_id.clone(),
        started_at_ms: run_started_at_ms,
        finished_at_ms: now_ms(),
        scenario_count: results.len(),
        anomaly_count: total_anomalies,
        scenarios: results,
    };

    let mut summary_out_written: Option<String> = None;
    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            emit_log(
                "error",
                "summary_write_failed",
                &run_id,
                None,
                None,
                json!({
                    "path": path.to_string_lossy(),
                    "error": error.to_string(),
                }),
            );
            std::process::exit(2);
        }
        summary_out_written = Some(path.to_string_lossy().to_string());
    }

    emit_log(
        "info",
        "run_finished",
        &run_id,
        None,
        None,
        json!({
            "scenarioCount": summary.scenario_count,
            "anomalyCount": summary.anomaly_count,
            "summaryOut": summary_out_written,
        }),
    );

    if total_anomalies > 0 {
        std::process::exit(1);
    }
}

fn run_park_scenario(scenario: &ParkScenario) -> (ParkResultLine, Vec<AnomalyRecord>) {
    let mut config = ParkConfig::default();
    if let Some(max_guests) = scenario.max_guests {
        config.max_guests = max_guests;
    }
    let mut state = generate_demo_park(scenario.seed, config);
    let mut anomalies = Vec::new();
    let mut anomaly_records = Vec::new();
    let mut anomaly_seen = HashSet::new();
    let mut rides_ridden = 0u64;

    for _ in 0..scenario.ticks {
        let before: u64 = state.guests.iter().map(|g| u64::from(g.rides_ridden)).sum();
        state = tick(state);
        let after: u64 = state.guests.iter().map(|g| u64::from(g.rides_ridden)).sum();
        rides_ridden += after.saturating_sub(before);

        for message in collect_park_anomalies(&state) {
            if anomaly_seen.insert(message.clone()) {
                anomalies.push(message.clone());
                anomaly_records.push(AnomalyRecord {
                    tick: state.tick,
                    message,
                });
            }
        }
    }

    let result = ParkResultLine {
        scenario: scenario.name.clone(),
        seed: scenario.seed,
        ticks: state.tick,
        guests_in_park: state.guests.len(),
        total_guests_admitted: state.stats.total_guests_admitted,
        rides_ridden,
        rating: state.stats.rating,
        cash: state.finance.cash,
        ride_revenue: state.finance.ride_revenue,
        shop_revenue: state.finance.shop_revenue,
        rides_with_breakdowns: state
            .rides
            .iter()
            .filter(|ride| ride.stats.last_breakdown_tick.is_some())
            .count(),
        anomalies,
    };
    (result, anomaly_records)
}

fn collect_park_anomalies(state: &ParkState) -> Vec<String> {
    let mut anomalies = Vec::new();
    let mut ids = HashSet::new();
    for guest in &state.guests {
        if !ids.insert(guest.id) {
            anomalies.push(format!("duplicate guest id {}", guest.id));
        }
        let needs = guest.needs;
        let values = [
            needs.hunger,
            needs.thirst,
            needs.bathroom,
            needs.energy,
            needs.nausea,
            needs.happiness,
        ];
        if values
            .iter()
            .any(|value| !value.is_finite() || *value < 0.0 || *value > NEED_MAX)
        {
            anomalies.push(format!("guest {} need out of range", guest.id));
        }
    }
    for ride in &state.rides {
        if ride.queue.guest_ids.len() > ride.queue.max_length {
            anomalies.push(format!("ride {} queue over capacity", ride.id));
        }
    }
    anomalies
}

async fn run_civ_scenario(scenario: &CivScenario, run_id: &str) -> CivResultLine {
    let hub = LocalHub::default();
    let store = Arc::new(MemorySessionStore::new());
    let config = SyncConfig {
        heartbeat_interval_ms: 100,
        leader_timeout_ms: 600,
        turn_interval_ms: 200,
        agent_count: CIV_AGENT_COUNT,
        session_seed: scenario.seed,
        ..SyncConfig::default()
    };

    let base = now_ms();
    let mut providers = Vec::new();
    let mut notices = Vec::new();
    for idx in 0..scenario.viewers {
        let viewer = Viewer::new(format!("viewer-{}", idx + 1), base + idx as u64);
        emit_log(
            "info",
            "viewer_joined",
            run_id,
            Some(&scenario.name),
            None,
            json!({ "viewerId": viewer.viewer_id, "joinedAt": viewer.joined_at }),
        );
        let (provider, rx) = SyncProvider::connect(
            viewer,
            config.clone(),
            Box::new(ArchetypeDecider),
            &hub,
            store.clone(),
        );
        providers.push(provider);
        notices.push(rx);
    }

    let mut anomalies = Vec::new();
    let mut sync_errors = 0usize;
    let half = (scenario.turns / 2).max(1);

    let first_leader = wait_for_leader_turn(&providers, half).await;
    drain_notices(&mut notices, &mut sync_errors);
    let mut failover_ms = None;
    if let Some(leader_id) = first_leader.clone() {
        emit_log(
            "info",
            "leader_elected",
            run_id,
            Some(&scenario.name),
            Some(u64::from(half)),
            json!({ "leaderId": leader_id }),
        );
        if let Some(leader) = providers.iter().find(|p| p.viewer().viewer_id == leader_id) {
            let _ = leader.set_camera(3);
        }
        if providers.len() > 1 {
            if let Some(idx) = providers.iter().position(|p| p.viewer().viewer_id == leader_id) {
                providers.remove(idx).destroy().await;
                notices.remove(idx);
                let destroyed_at = now_ms();
                emit_log(
                    "info",
                    "leader_destroyed",
                    run_id,
                    Some(&scenario.name),
                    None,
                    json!({ "leaderId": leader_id }),
                );
                if let Some(next) = wait_for_new_leader(&providers, &leader_id).await {
                    let elapsed = now_ms().saturating_sub(destroyed_at);
                    failover_ms = Some(elapsed);
                    emit_log(
                        "info",
                        "failover",
                        run_id,
                        Some(&scenario.name),
                        None,
                        json!({ "leaderId": next, "elapsedMs": elapsed }),
                    );
                } else {
                    anomalies.push("no leader after failover".to_string());
                }
            }
        }
    } else {
        anomalies.push("no leader reached the first half of the turns".to_string());
    }

    let final_leader = wait_for_leader_turn(&providers, scenario.turns).await;
    if final_leader.is_none() {
        anomalies.push(format!("turn {} not reached", scenario.turns));
    }
    let converged = wait_for_convergence(&providers).await;
    if !converged {
        anomalies.push("viewers did not converge on one state".to_string());
    }
    drain_notices(&mut notices, &mut sync_errors);

    let final_turn = providers
        .iter()
        .filter_map(|p| p.snapshot().turn())
        .max()
        .unwrap_or(0);
    for provider in providers {
        provider.destroy().await;
    }

    CivResultLine {
        scenario: scenario.name.clone(),
        seed: scenario.seed,
        viewers: scenario.viewers,
        target_turns: scenario.turns,
        final_turn,
        first_leader,
        final_leader,
        failover_ms,
        converged,
        sync_errors,
        anomalies,
    }
}

async fn poll_until<T>(mut check: impl FnMut() -> Option<T>) -> Option<T> {
    tokio::time::timeout(CIV_TIME_LIMIT, async {
        loop {
            if let Some(found) = check() {
                return found;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    })
    .await
    .ok()
}

async fn wait_for_leader_turn(providers: &[SyncProvider], turn: u32) -> Option<String> {
    poll_until(|| {
        providers.iter().find_map(|provider| {
            let snapshot = provider.snapshot();
            (snapshot.is_leader() && snapshot.turn().is_some_and(|t| t >= turn))
                .then(|| provider.viewer().viewer_id.clone())
        })
    })
    .await
}

async fn wait_for_new_leader(providers: &[SyncProvider], previous: &str) -> Option<String> {
    poll_until(|| {
        providers.iter().find_map(|provider| {
            let snapshot = provider.snapshot();
            (snapshot.is_leader() && provider.viewer().viewer_id != previous)
                .then(|| provider.viewer().viewer_id.clone())
        })
    })
    .await
}

async fn wait_for_convergence(providers: &[SyncProvider]) -> bool {
    poll_until(|| {
        let snapshots: Vec<_> = providers.iter().map(|p| p.snapshot()).collect();
        let leader = snapshots.iter().find(|s| s.is_leader())?;
        let target = leader.state.as_ref()?;
        snapshots
            .iter()
            .all(|s| s.state.as_ref() == Some(target))
            .then_some(())
    })
    .await
    .is_some()
}

fn drain_notices(notices: &mut [mpsc::Receiver<SyncNotice>], errors: &mut usize) {
    for rx in notices.iter_mut() {
        while let Ok(notice) = rx.try_recv() {
            if matches!(notice, SyncNotice::Error(_)) {
                *errors += 1;
            }
        }
    }
}

fn resolve_park_scenarios(cli: &Cli) -> Vec<ParkScenario> {
    let ticks = cli.ticks.unwrap_or(DEFAULT_TICKS).max(1);
    let seeds: Vec<u32> = match cli.seed {
        Some(seed) => vec![normalize_seed(seed)],
        None => DEFAULT_SEEDS.to_vec(),
    };
    seeds
        .into_iter()
        .map(|seed| ParkScenario {
            name: format!("park-{seed}"),
            seed,
            ticks,
            max_guests: cli.guests,
        })
        .collect()
}

fn resolve_civ_scenario(cli: &Cli) -> CivScenario {
    let seed = cli.seed.map(normalize_seed).unwrap_or(DEFAULT_SEEDS[0]);
    CivScenario {
        name: format!("civ-{seed}"),
        seed,
        viewers: cli.viewers.unwrap_or(DEFAULT_VIEWERS).clamp(1, 16),
        turns: cli.turns.unwrap_or(DEFAULT_TURNS).clamp(1, 200),
    }
}

fn normalize_seed(seed: u64) -> u32 {
    (seed % (u32::MAX as u64 + 1)) as u32
}

fn default_run_id(seed: u32, timestamp_ms: u64) -> String {
    format!("sim-{seed}-{timestamp_ms}")
}

fn emit_log(
    level: &str,
    event: &str,
    run_id: &str,
    scenario: Option<&str>,
    tick: Option<u64>,
    details: Value,
) {
    let log_line = StructuredLogLine {
        timestamp_ms: now_ms(),
        level: level.to_string(),
        event: event.to_string(),
        run_id: run_id.to_string(),
        scenario: scenario.map(|value| value.to_string()),
        tick,
        details,
    };
    eprintln!(
        "{}",
        serde_json::to_string(&log_line).expect("structured log should serialize")
    );
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).expect("run summary should serialize");
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, summary_text)
}
