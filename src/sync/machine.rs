use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::civ::{
    apply_delta, new_session, process_turn, set_view_index, AgentDecider,
    CivilizationSessionState, TurnDelta,
};
use crate::constants::{
    DEFAULT_AGENT_COUNT, HEARTBEAT_INTERVAL_MS, LEADER_TIMEOUT_MS, STATE_REQUEST_DELAYS_MS,
    STORE_RETRY_DELAYS_MS, TURN_INTERVAL_MS,
};
use crate::error::{DeltaError, SyncError};

use super::election::{elect_leader, Viewer};
use super::protocol::{ChannelEvent, SyncMessage, TurnUpdate};
use super::retry::{RetryOutcome, RetryPolicy};
use super::store::{ClaimOutcome, SessionRecord};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Disconnected,
    Connecting,
    Leader,
    Follower,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnBroadcastMode {
    #[default]
    PersistThenSignal,
    FullDelta,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    pub heartbeat_interval_ms: u64,
    pub leader_timeout_ms: u64,
    pub turn_interval_ms: u64,
    pub state_requests: RetryPolicy,
    pub store_retry: RetryPolicy,
    pub broadcast_mode: TurnBroadcastMode,
    pub agent_count: usize,
    pub session_seed: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            leader_timeout_ms: LEADER_TIMEOUT_MS,
            turn_interval_ms: TURN_INTERVAL_MS,
            state_requests: RetryPolicy::new(
                STATE_REQUEST_DELAYS_MS.len(),
                &STATE_REQUEST_DELAYS_MS,
            ),
            store_retry: RetryPolicy::new(STORE_RETRY_DELAYS_MS.len(), &STORE_RETRY_DELAYS_MS),
            broadcast_mode: TurnBroadcastMode::default(),
            agent_count: DEFAULT_AGENT_COUNT,
            session_seed: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadPurpose {
    Bootstrap,
    /// Catch up to at least `min_turn`; older snapshots count as a miss.
    Reload { min_turn: u32 },
}

#[derive(Debug)]
pub enum Input {
    Connected,
    JoinFailed { error: SyncError, now_ms: u64 },
    Channel { event: ChannelEvent, now_ms: u64 },
    Tick { now_ms: u64 },
    SessionLoaded {
        purpose: LoadPurpose,
        outcome: RetryOutcome<SessionRecord>,
        now_ms: u64,
    },
    ClaimResolved { outcome: ClaimOutcome, now_ms: u64 },
    SaveResolved { turn: u32, ok: bool },
    SetCamera { view_index: usize },
    Shutdown,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Broadcast(SyncMessage),
    LoadSession(LoadPurpose),
    SaveSession(Box<CivilizationSessionState>),
    UpdateHeartbeat,
    ClaimLeadership,
    ClearLeadership,
    UpdateViewerCount(usize),
    Notify(SyncNotice),
}

#[derive(Clone, Debug, PartialEq)]
pub enum SyncNotice {
    RoleChanged {
        role: Role,
        leader_id: Option<String>,
    },
    StateReplaced { turn: u32 },
    TurnAdvanced { turn: u32 },
    CameraChanged { view_index: usize },
    Error(SyncError),
}

#[derive(Default)]
struct Timers {
    heartbeat: Option<u64>,
    turn: Option<u64>,
    watchdog: Option<u64>,
    state_request: Option<u64>,
}

fn due(deadline: Option<u64>, now_ms: u64) -> bool {
    deadline.is_some_and(|at| at <= now_ms)
}

pub struct SyncMachine {
    me: Viewer,
    config: SyncConfig,
    decider: Box<dyn AgentDecider>,
    role: Role,
    isolated: bool,
    bootstrapped: bool,
    viewers: BTreeMap<String, Viewer>,
    suspects: HashSet<String>,
    leader_id: Option<String>,
    claim_pending: bool,
    state: Option<CivilizationSessionState>,
    degraded: bool,
    timers: Timers,
    state_requests_sent: usize,
    reload_target: Option<u32>,
    save_in_flight: bool,
    unsignalled_turn: Option<TurnDelta>,
}

impl SyncMachine {
    pub fn new(me: Viewer, config: SyncConfig, decider: Box<dyn AgentDecider>) -> Self {
        Self {
            me,
            config,
            decider,
            role: Role::Disconnected,
            isolated: false,
            bootstrapped: false,
            viewers: BTreeMap::new(),
            suspects: HashSet::new(),
            leader_id: None,
            claim_pending: false,
            state: None,
            degraded: false,
            timers: Timers::default(),
            state_requests_sent: 0,
            reload_target: None,
            save_in_flight: false,
            unsignalled_turn: None,
        }
    }

    pub fn me(&self) -> &Viewer {
        &self.me
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    pub fn leader_id(&self) -> Option<&str> {
        self.leader_id.as_deref()
    }

    pub fn state(&self) -> Option<&CivilizationSessionState> {
        self.state.as_ref()
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    /// Earliest timestamp at which a `Tick` has work to do.
    pub fn next_deadline(&self) -> Option<u64> {
        let timers = &self.timers;
        [
            timers.heartbeat,
            timers.turn,
            timers.watchdog,
            timers.state_request,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn handle(&mut self, input: Input) -> Vec<Command> {
        let mut out = Vec::new();
        match input {
            Input::Connected => self.on_connected(&mut out),
            Input::JoinFailed { error, now_ms } => self.go_isolated(error, now_ms, &mut out),
            Input::Channel { event, now_ms } => self.on_channel(event, now_ms, &mut out),
            Input::Tick { now_ms } => self.on_tick(now_ms, &mut out),
            Input::SessionLoaded {
                purpose,
                outcome,
                now_ms,
            } => self.on_session_loaded(purpose, outcome, now_ms, &mut out),
            Input::ClaimResolved { outcome, now_ms } => {
                self.on_claim_resolved(outcome, now_ms, &mut out)
            }
            Input::SaveResolved { turn, ok } => self.on_save_resolved(turn, ok, &mut out),
            Input::SetCamera { view_index } => self.set_camera(view_index, &mut out),
            Input::Shutdown => self.shutdown(&mut out),
        }
        out
    }

    fn on_connected(&mut self, out: &mut Vec<Command>) {
        if self.role != Role::Disconnected || self.isolated {
            return;
        }
        self.viewers
            .insert(self.me.viewer_id.clone(), self.me.clone());
        self.set_role(Role::Connecting, out);
        out.push(Command::LoadSession(LoadPurpose::Bootstrap));
    }

    fn go_isolated(&mut self, error: SyncError, now_ms: u64, out: &mut Vec<Command>) {
        warn!(viewer_id = %self.me.viewer_id, %error, "sync channel unavailable, running isolated");
        self.isolated = true;
        self.bootstrapped = true;
        out.push(Command::Notify(SyncNotice::Error(error)));
        if self.state.is_none() {
            self.seed_state(out);
        }
        self.leader_id = Some(self.me.viewer_id.clone());
        self.timers = Timers {
            turn: Some(now_ms + self.config.turn_interval_ms),
            ..Timers::default()
        };
        self.set_role(Role::Leader, out);
    }

    fn on_channel(&mut self, event: ChannelEvent, now_ms: u64, out: &mut Vec<Command>) {
        if self.role == Role::Disconnected || self.isolated {
            return;
        }
        match event {
            ChannelEvent::PresenceSync { viewers } => {
                self.viewers = viewers
                    .into_iter()
                    .map(|viewer| (viewer.viewer_id.clone(), viewer))
                    .collect();
                self.viewers
                    .insert(self.me.viewer_id.clone(), self.me.clone());
                self.suspects
                    .retain(|viewer_id| self.viewers.contains_key(viewer_id));
                self.on_presence_changed(now_ms, out);
            }
            ChannelEvent::PresenceJoin { viewer } => {
                self.viewers.insert(viewer.viewer_id.clone(), viewer);
                self.on_presence_changed(now_ms, out);
            }
            ChannelEvent::PresenceLeave { viewer } => {
                if viewer.viewer_id == self.me.viewer_id {
                    return;
                }
                self.viewers.remove(&viewer.viewer_id);
                self.suspects.remove(&viewer.viewer_id);
                if self.leader_id.as_deref() == Some(viewer.viewer_id.as_str()) {
                    self.leader_id = None;
                }
                self.on_presence_changed(now_ms, out);
            }
            ChannelEvent::Broadcast { from, message } => {
                if message.is_for(&self.me.viewer_id) {
                    self.on_message(&from, message, now_ms, out);
                }
            }
        }
    }

    fn on_presence_changed(&mut self, now_ms: u64, out: &mut Vec<Command>) {
        if self.role == Role::Leader {
            out.push(Command::UpdateViewerCount(self.viewers.len()));
        }
        self.evaluate(now_ms, out);
    }

    fn elected_self(&self) -> bool {
        let candidates = self.viewers.values().filter(|viewer| {
            viewer.viewer_id == self.me.viewer_id || !self.suspects.contains(&viewer.viewer_id)
        });
        elect_leader(candidates).map_or(true, |leader| leader.viewer_id == self.me.viewer_id)
    }

    fn evaluate(&mut self, now_ms: u64, out: &mut Vec<Command>) {
        if self.isolated || !self.bootstrapped || self.role == Role::Disconnected {
            return;
        }
        let elected = self.elected_self();
        match (self.role, elected) {
            (Role::Leader, true) => {}
            (Role::Leader, false) => self.relinquish(None, true, now_ms, out),
            (_, true) => {
                if !self.claim_pending {
                    self.claim_pending = true;
                    out.push(Command::ClaimLeadership);
                }
            }
            (Role::Connecting, false) => self.become_follower(now_ms, out),
            (_, false) => {}
        }
    }

    fn on_claim_resolved(&mut self, outcome: ClaimOutcome, now_ms: u64, out: &mut Vec<Command>) {
        self.claim_pending = false;
        if self.role == Role::Disconnected || self.isolated || self.role == Role::Leader {
            return;
        }
        match outcome {
            ClaimOutcome::Granted => {
                if !self.elected_self() {
                    out.push(Command::ClearLeadership);
                    self.become_follower(now_ms, out);
                    return;
                }
                self.become_leader(now_ms, out);
            }
            ClaimOutcome::Refused { holder } => {
                debug!(viewer_id = %self.me.viewer_id, ?holder, "leadership claim refused");
                if self.leader_id.is_none() {
                    self.leader_id = holder.filter(|id| *id != self.me.viewer_id);
                }
                self.become_follower(now_ms, out);
            }
            ClaimOutcome::Unreachable => {
                let other_leader = self
                    .leader_id
                    .as_ref()
                    .is_some_and(|id| *id != self.me.viewer_id);
                if other_leader || !self.elected_self() {
                    self.become_follower(now_ms, out);
                    return;
                }
                warn!(viewer_id = %self.me.viewer_id, "session store unreachable, leading without it");
                out.push(Command::Notify(SyncNotice::Error(SyncError::StoreUnavailable)));
                self.become_leader(now_ms, out);
            }
        }
    }

    fn become_leader(&mut self, now_ms: u64, out: &mut Vec<Command>) {
        self.leader_id = Some(self.me.viewer_id.clone());
        self.timers = Timers {
            heartbeat: Some(now_ms + self.config.heartbeat_interval_ms),
            turn: Some(now_ms + self.config.turn_interval_ms),
            ..Timers::default()
        };
        self.reload_target = None;
        self.set_role(Role::Leader, out);
        self.emit_heartbeat(now_ms, out);
        out.push(Command::UpdateViewerCount(self.viewers.len()));

        if self.state.is_none() || self.degraded {
            if self.state.is_none() {
                self.seed_state(out);
            }
            self.degraded = false;
            if let Some(state) = &self.state {
                self.save_in_flight = true;
                out.push(Command::SaveSession(Box::new(state.clone())));
                out.push(Command::Broadcast(SyncMessage::StateSync {
                    state: Box::new(state.clone()),
                    target: None,
                }));
            }
        }
    }

    fn seed_state(&mut self, out: &mut Vec<Command>) {
        let state = new_session(self.config.agent_count, self.config.session_seed);
        info!(
            viewer_id = %self.me.viewer_id,
            agents = state.agents.len(),
            seed = state.seed,
            "seeded fresh civilization session"
        );
        out.push(Command::Notify(SyncNotice::StateReplaced {
            turn: state.current_turn,
        }));
        self.state = Some(state);
    }

    fn become_follower(&mut self, now_ms: u64, out: &mut Vec<Command>) {
        let was_follower = self.role == Role::Follower;
        self.timers.heartbeat = None;
        self.timers.turn = None;
        if !was_follower || self.timers.watchdog.is_none() {
            self.timers.watchdog = Some(now_ms + self.config.leader_timeout_ms);
        }
        self.set_role(Role::Follower, out);
        if self.state.is_none() && self.timers.state_request.is_none() {
            self.state_requests_sent = 0;
            self.send_state_request(now_ms, out);
        }
    }

    fn relinquish(
        &mut self,
        new_leader: Option<String>,
        clear: bool,
        now_ms: u64,
        out: &mut Vec<Command>,
    ) {
        info!(
            viewer_id = %self.me.viewer_id,
            new_leader = ?new_leader,
            "relinquishing leadership"
        );
        if clear {
            out.push(Command::ClearLeadership);
        }
        self.leader_id = new_leader;
        self.unsignalled_turn = None;
        self.timers.watchdog = None;
        self.become_follower(now_ms, out);
    }

    fn emit_heartbeat(&self, now_ms: u64, out: &mut Vec<Command>) {
        out.push(Command::Broadcast(SyncMessage::LeaderHeartbeat {
            leader_id: self.me.viewer_id.clone(),
            joined_at: self.me.joined_at,
            timestamp: now_ms,
        }));
        out.push(Command::UpdateHeartbeat);
    }

    fn send_state_request(&mut self, now_ms: u64, out: &mut Vec<Command>) {
        self.state_requests_sent += 1;
        out.push(Command::Broadcast(SyncMessage::RequestState {
            viewer_id: self.me.viewer_id.clone(),
        }));
        self.timers.state_request =
            Some(now_ms + self.config.state_requests.backoff(self.state_requests_sent));
    }

    fn on_message(&mut self, from: &str, message: SyncMessage, now_ms: u64, out: &mut Vec<Command>) {
        match message {
            SyncMessage::LeaderHeartbeat {
                leader_id,
                joined_at,
                ..
            } => self.on_heartbeat(Viewer::new(leader_id, joined_at), now_ms, out),
            SyncMessage::TurnUpdate { leader_id, update } => {
                if self.role == Role::Leader {
                    debug!(from, "ignoring turn update while leading");
                    return;
                }
                self.note_leader_alive(leader_id, now_ms);
                self.on_turn_update(update, out);
            }
            SyncMessage::CameraChange { view_index } => {
                if self.role == Role::Leader {
                    return;
                }
                if let Some(state) = self.state.as_mut() {
                    set_view_index(state, view_index);
                    out.push(Command::Notify(SyncNotice::CameraChanged {
                        view_index: state.current_view_index,
                    }));
                }
            }
            SyncMessage::RequestState { viewer_id } => {
                if self.role != Role::Leader {
                    return;
                }
                if let Some(state) = &self.state {
                    debug!(requester = %viewer_id, turn = state.current_turn, "answering state request");
                    out.push(Command::Broadcast(SyncMessage::StateSync {
                        state: Box::new(state.clone()),
                        target: Some(viewer_id),
                    }));
                }
            }
            SyncMessage::StateSync { state, .. } => {
                if self.role == Role::Leader {
                    return;
                }
                self.accept_full_state(*state, out);
            }
        }
    }

    fn on_heartbeat(&mut self, sender: Viewer, now_ms: u64, out: &mut Vec<Command>) {
        if sender.viewer_id == self.me.viewer_id {
            return;
        }
        self.suspects.remove(&sender.viewer_id);
        match self.role {
            Role::Leader => {
                if sender.outranks(&self.me) {
                    self.relinquish(Some(sender.viewer_id), false, now_ms, out);
                }
            }
            Role::Follower | Role::Connecting => {
                self.note_leader_alive(sender.viewer_id, now_ms);
            }
            Role::Disconnected => {}
        }
    }

    fn note_leader_alive(&mut self, leader_id: String, now_ms: u64) {
        self.suspects.remove(&leader_id);
        self.leader_id = Some(leader_id);
        if self.role == Role::Follower {
            self.timers.watchdog = Some(now_ms + self.config.leader_timeout_ms);
        }
    }

    fn on_turn_update(&mut self, update: TurnUpdate, out: &mut Vec<Command>) {
        match update {
            TurnUpdate::ReloadFromDb { turn } => {
                let current = self.state.as_ref().map(|state| state.current_turn);
                if current.is_some_and(|current| current >= turn) && !self.degraded {
                    return;
                }
                self.request_reload(turn, out);
            }
            TurnUpdate::Delta { delta } => {
                let Some(state) = self.state.as_ref().filter(|_| !self.degraded) else {
                    self.request_reload(delta.turn, out);
                    return;
                };
                match apply_delta(state, &delta) {
                    Ok(next) => {
                        let turn = next.current_turn;
                        self.state = Some(next);
                        out.push(Command::Notify(SyncNotice::TurnAdvanced { turn }));
                    }
                    Err(DeltaError::TurnGap { current, received }) if received <= current => {
                        debug!(current, received, "dropping stale turn delta");
                    }
                    Err(error) => {
                        warn!(%error, "turn delta rejected, reloading from store");
                        out.push(Command::Notify(SyncNotice::Error(error.into())));
                        self.request_reload(delta.turn, out);
                    }
                }
            }
        }
    }

    fn request_reload(&mut self, turn: u32, out: &mut Vec<Command>) {
        if self.reload_target.is_some_and(|pending| pending >= turn) {
            return;
        }
        self.reload_target = Some(turn);
        out.push(Command::LoadSession(LoadPurpose::Reload { min_turn: turn }));
    }

    fn accept_full_state(&mut self, state: CivilizationSessionState, out: &mut Vec<Command>) -> bool {
        let newer = match &self.state {
            None => true,
            Some(current) => self.degraded || state.current_turn > current.current_turn,
        };
        if !newer {
            return false;
        }
        let turn = state.current_turn;
        self.state = Some(state);
        self.degraded = false;
        self.timers.state_request = None;
        out.push(Command::Notify(SyncNotice::StateReplaced { turn }));
        true
    }

    fn on_session_loaded(
        &mut self,
        purpose: LoadPurpose,
        outcome: RetryOutcome<SessionRecord>,
        now_ms: u64,
        out: &mut Vec<Command>,
    ) {
        if self.role == Role::Disconnected {
            return;
        }
        match purpose {
            LoadPurpose::Bootstrap => {
                if self.bootstrapped {
                    return;
                }
                self.bootstrapped = true;
                match outcome {
                    RetryOutcome::Found(record) => {
                        if record.leader_id.as_deref() != Some(self.me.viewer_id.as_str()) {
                            self.leader_id = record.leader_id.clone();
                        }
                        self.accept_full_state(record.state, out);
                    }
                    RetryOutcome::Exhausted { attempts } => {
                        warn!(attempts, "session store unreachable during bootstrap");
                    }
                    RetryOutcome::NotFound | RetryOutcome::Cancelled => {}
                }
                self.evaluate(now_ms, out);
            }
            LoadPurpose::Reload { min_turn } => {
                if self.reload_target.is_some_and(|target| target <= min_turn) {
                    self.reload_target = None;
                }
                if self.role == Role::Leader {
                    return;
                }
                match outcome {
                    RetryOutcome::Found(record) => {
                        self.accept_full_state(record.state, out);
                    }
                    RetryOutcome::Exhausted { attempts } => {
                        warn!(min_turn, attempts, "reload gave up waiting for the store");
                        out.push(Command::Notify(SyncNotice::Error(
                            SyncError::LoadExhausted { attempts },
                        )));
                    }
                    RetryOutcome::NotFound | RetryOutcome::Cancelled => {}
                }
            }
        }
    }

    fn on_save_resolved(&mut self, turn: u32, ok: bool, out: &mut Vec<Command>) {
        self.save_in_flight = false;
        if self.role != Role::Leader || self.isolated {
            return;
        }
        let pending = match &self.unsignalled_turn {
            Some(delta) if delta.turn == turn => self.unsignalled_turn.take(),
            _ => None,
        };
        match (pending, ok) {
            (Some(_), true) => {
                out.push(Command::Broadcast(SyncMessage::TurnUpdate {
                    leader_id: self.me.viewer_id.clone(),
                    update: TurnUpdate::ReloadFromDb { turn },
                }));
            }
            (Some(delta), false) => {
                warn!(turn, "save failed, broadcasting the delta instead");
                out.push(Command::Notify(SyncNotice::Error(SyncError::SaveFailed)));
                out.push(Command::Broadcast(SyncMessage::TurnUpdate {
                    leader_id: self.me.viewer_id.clone(),
                    update: TurnUpdate::Delta { delta },
                }));
            }
            (None, true) => {}
            (None, false) => {
                warn!(turn, "session save failed");
                out.push(Command::Notify(SyncNotice::Error(SyncError::SaveFailed)));
            }
        }
    }

    fn on_tick(&mut self, now_ms: u64, out: &mut Vec<Command>) {
        match self.role {
            Role::Leader => {
                if due(self.timers.heartbeat, now_ms) {
                    self.timers.heartbeat = Some(now_ms + self.config.heartbeat_interval_ms);
                    self.emit_heartbeat(now_ms, out);
                }
                if due(self.timers.turn, now_ms) {
                    self.timers.turn = Some(now_ms + self.config.turn_interval_ms);
                    if self.save_in_flight {
                        debug!("previous turn still saving, skipping");
                    } else {
                        self.advance_turn(out);
                    }
                }
            }
            Role::Follower => {
                if due(self.timers.watchdog, now_ms) {
                    self.on_leader_silent(now_ms, out);
                }
                if self.role == Role::Follower && due(self.timers.state_request, now_ms) {
                    self.retry_state_request(now_ms, out);
                }
            }
            Role::Connecting | Role::Disconnected => {}
        }
    }

    fn on_leader_silent(&mut self, now_ms: u64, out: &mut Vec<Command>) {
        let silent = self.leader_id.take().or_else(|| {
            let candidates = self
                .viewers
                .values()
                .filter(|viewer| !self.suspects.contains(&viewer.viewer_id));
            elect_leader(candidates).map(|viewer| viewer.viewer_id.clone())
        });
        warn!(
            viewer_id = %self.me.viewer_id,
            silent_leader = ?silent,
            "no leader heartbeat, re-running election"
        );
        if let Some(silent) = silent.filter(|id| *id != self.me.viewer_id) {
            self.suspects.insert(silent);
        }
        self.timers.watchdog = Some(now_ms + self.config.leader_timeout_ms);
        self.evaluate(now_ms, out);
    }

    fn retry_state_request(&mut self, now_ms: u64, out: &mut Vec<Command>) {
        if self.state.is_some() {
            self.timers.state_request = None;
            return;
        }
        if self
            .config
            .state_requests
            .has_attempts_left(self.state_requests_sent)
        {
            self.send_state_request(now_ms, out);
            return;
        }
        self.timers.state_request = None;
        let attempts = self.state_requests_sent;
        warn!(attempts, "no state received, continuing with a local session");
        out.push(Command::Notify(SyncNotice::Error(SyncError::LoadExhausted {
            attempts,
        })));
        self.seed_state(out);
        self.degraded = true;
    }

    fn advance_turn(&mut self, out: &mut Vec<Command>) {
        let Some(state) = &self.state else {
            return;
        };
        let (next, delta) = process_turn(state, self.decider.as_ref());
        let turn = next.current_turn;
        self.state = Some(next.clone());
        out.push(Command::Notify(SyncNotice::TurnAdvanced { turn }));
        if self.isolated {
            return;
        }
        self.save_in_flight = true;
        match self.config.broadcast_mode {
            TurnBroadcastMode::PersistThenSignal => {
                self.unsignalled_turn = Some(delta);
            }
            TurnBroadcastMode::FullDelta => {
                out.push(Command::Broadcast(SyncMessage::TurnUpdate {
                    leader_id: self.me.viewer_id.clone(),
                    update: TurnUpdate::Delta { delta },
                }));
            }
        }
        out.push(Command::SaveSession(Box::new(next)));
    }

    fn set_camera(&mut self, view_index: usize, out: &mut Vec<Command>) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        set_view_index(state, view_index);
        let view_index = state.current_view_index;
        out.push(Command::Notify(SyncNotice::CameraChanged { view_index }));
        if self.role == Role::Leader && !self.isolated {
            out.push(Command::Broadcast(SyncMessage::CameraChange { view_index }));
        }
    }

    fn shutdown(&mut self, out: &mut Vec<Command>) {
        if self.role == Role::Leader && !self.isolated {
            out.push(Command::ClearLeadership);
        }
        self.timers = Timers::default();
        self.claim_pending = false;
        self.unsignalled_turn = None;
        self.set_role(Role::Disconnected, out);
    }

    fn set_role(&mut self, role: Role, out: &mut Vec<Command>) {
        if self.role == role {
            return;
        }
        info!(
            viewer_id = %self.me.viewer_id,
            from = ?self.role,
            to = ?role,
            leader = ?self.leader_id,
            "sync role changed"
        );
        self.role = role;
        out.push(Command::Notify(SyncNotice::RoleChanged {
            role,
            leader_id: self.leader_id.clone(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::civ::ArchetypeDecider;
    use crate::sync::store::LeaderSlot;

    fn config() -> SyncConfig {
        SyncConfig {
            agent_count: 12,
            session_seed: 7,
            ..SyncConfig::default()
        }
    }

    fn machine_with(id: &str, joined_at: u64, config: SyncConfig) -> SyncMachine {
        SyncMachine::new(Viewer::new(id, joined_at), config, Box::new(ArchetypeDecider))
    }

    fn machine(id: &str, joined_at: u64) -> SyncMachine {
        machine_with(id, joined_at, config())
    }

    fn bring_up(
        machine: &mut SyncMachine,
        viewers: &[Viewer],
        outcome: RetryOutcome<SessionRecord>,
        now_ms: u64,
    ) -> Vec<Command> {
        let mut cmds = machine.handle(Input::Connected);
        cmds.extend(machine.handle(Input::Channel {
            event: ChannelEvent::PresenceSync {
                viewers: viewers.to_vec(),
            },
            now_ms,
        }));
        cmds.extend(machine.handle(Input::SessionLoaded {
            purpose: LoadPurpose::Bootstrap,
            outcome,
            now_ms,
        }));
        cmds
    }

    fn messages(cmds: &[Command]) -> Vec<SyncMessage> {
        cmds.iter()
            .filter_map(|cmd| match cmd {
                Command::Broadcast(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    fn saved_turns(cmds: &[Command]) -> Vec<u32> {
        cmds.iter()
            .filter_map(|cmd| match cmd {
                Command::SaveSession(state) => Some(state.current_turn),
                _ => None,
            })
            .collect()
    }

    fn deliver(to: &mut SyncMachine, from: &str, cmds: &[Command], now_ms: u64) -> Vec<Command> {
        let mut out = Vec::new();
        for message in messages(cmds) {
            out.extend(to.handle(Input::Channel {
                event: ChannelEvent::Broadcast {
                    from: from.to_string(),
                    message,
                },
                now_ms,
            }));
        }
        out
    }

    fn record_of(machine: &SyncMachine) -> SessionRecord {
        SessionRecord {
            state: machine.state().cloned().expect("machine has state"),
            leader_id: machine.leader_id().map(str::to_string),
            leader_heartbeat_ms: 0,
            viewer_count: machine.viewer_count(),
        }
    }

    fn two_viewers() -> Vec<Viewer> {
        vec![Viewer::new("a", 100), Viewer::new("b", 200)]
    }

    fn pair_with(config: SyncConfig) -> (SyncMachine, SyncMachine) {
        let viewers = two_viewers();
        let mut a = machine_with("a", 100, config.clone());
        let mut b = machine_with("b", 200, config);
        bring_up(&mut a, &viewers, RetryOutcome::NotFound, 0);
        let lead = a.handle(Input::ClaimResolved {
            outcome: ClaimOutcome::Granted,
            now_ms: 0,
        });
        a.handle(Input::SaveResolved { turn: 0, ok: true });
        bring_up(&mut b, &viewers, RetryOutcome::NotFound, 0);
        deliver(&mut b, "a", &lead, 0);
        (a, b)
    }

    fn pair() -> (SyncMachine, SyncMachine) {
        pair_with(config())
    }

    #[test]
    fn earliest_viewer_claims_and_seeds_fresh_session() {
        let viewers = two_viewers();
        let mut a = machine("a", 100);
        let cmds = bring_up(&mut a, &viewers, RetryOutcome::NotFound, 0);
        assert_eq!(cmds[0], Command::Notify(SyncNotice::RoleChanged {
            role: Role::Connecting,
            leader_id: None,
        }));
        assert!(cmds.contains(&Command::LoadSession(LoadPurpose::Bootstrap)));
        assert!(cmds.contains(&Command::ClaimLeadership));

        let cmds = a.handle(Input::ClaimResolved {
            outcome: ClaimOutcome::Granted,
            now_ms: 0,
        });
        assert_eq!(a.role(), Role::Leader);
        assert_eq!(a.leader_id(), Some("a"));
        assert_eq!(saved_turns(&cmds), vec![0]);
        assert!(cmds.contains(&Command::UpdateHeartbeat));
        assert!(messages(&cmds).contains(&SyncMessage::LeaderHeartbeat {
            leader_id: "a".to_string(),
            joined_at: 100,
            timestamp: 0,
        }));
        assert_eq!(a.state().map(|state| state.agents.len()), Some(12));

        let mut b = machine("b", 200);
        let cmds = bring_up(&mut b, &viewers, RetryOutcome::NotFound, 0);
        assert!(!cmds.contains(&Command::ClaimLeadership));
        assert_eq!(b.role(), Role::Follower);
        assert_eq!(
            messages(&cmds),
            vec![SyncMessage::RequestState {
                viewer_id: "b".to_string()
            }]
        );
    }

    #[test]
    fn unreachable_store_does_not_stall_a_lone_viewer() {
        let mut a = machine("a", 100);
        let cmds = bring_up(&mut a, &[Viewer::new("a", 100)], RetryOutcome::NotFound, 0);
        assert!(cmds.contains(&Command::ClaimLeadership));

        let cmds = a.handle(Input::ClaimResolved {
            outcome: ClaimOutcome::Unreachable,
            now_ms: 0,
        });
        assert!(cmds.contains(&Command::Notify(SyncNotice::Error(
            SyncError::StoreUnavailable
        ))));
        assert_eq!(a.role(), Role::Leader);
        assert!(!a.is_isolated());
        assert_eq!(saved_turns(&cmds), vec![0]);
        a.handle(Input::SaveResolved { turn: 0, ok: false });

        let turn_at = config().turn_interval_ms;
        let cmds = a.handle(Input::Tick { now_ms: turn_at });
        assert!(cmds.contains(&Command::Notify(SyncNotice::TurnAdvanced { turn: 1 })));
        assert_eq!(a.state().map(|state| state.current_turn), Some(1));
    }

    #[test]
    fn unreachable_store_defers_to_a_live_leader() {
        let (a, mut b) = pair();
        let heartbeat = vec![Command::Broadcast(SyncMessage::LeaderHeartbeat {
            leader_id: "a".to_string(),
            joined_at: 100,
            timestamp: 0,
        })];
        deliver(&mut b, "a", &heartbeat, 0);
        assert_eq!(a.role(), Role::Leader);

        let cmds = b.handle(Input::ClaimResolved {
            outcome: ClaimOutcome::Unreachable,
            now_ms: 0,
        });
        assert_eq!(b.role(), Role::Follower);
        assert_eq!(b.leader_id(), Some("a"));
        assert!(!cmds.contains(&Command::Notify(SyncNotice::Error(
            SyncError::StoreUnavailable
        ))));
    }

    #[test]
    fn follower_adopts_broadcast_state_and_leader() {
        let (a, b) = pair();
        assert_eq!(b.role(), Role::Follower);
        assert_eq!(b.leader_id(), Some("a"));
        assert_eq!(b.state(), a.state());
    }

    #[test]
    fn leader_answers_state_requests_with_targeted_sync() {
        let (mut a, _) = pair();
        let cmds = a.handle(Input::Channel {
            event: ChannelEvent::Broadcast {
                from: "c".to_string(),
                message: SyncMessage::RequestState {
                    viewer_id: "c".to_string(),
                },
            },
            now_ms: 10,
        });
        match messages(&cmds).as_slice() {
            [SyncMessage::StateSync { target, .. }] => {
                assert_eq!(target.as_deref(), Some("c"));
            }
            other => panic!("expected a single state-sync, got {other:?}"),
        }
    }

    #[test]
    fn follower_takes_over_after_leader_leaves_and_heartbeat_times_out() {
        let (_, mut b) = pair();
        let cmds = b.handle(Input::Channel {
            event: ChannelEvent::PresenceLeave {
                viewer: Viewer::new("a", 100),
            },
            now_ms: 1_000,
        });
        assert!(cmds.contains(&Command::ClaimLeadership));

        // a never cleared its claim, so the store still sees a fresh heartbeat
        b.handle(Input::ClaimResolved {
            outcome: ClaimOutcome::Refused {
                holder: Some("a".to_string()),
            },
            now_ms: 1_000,
        });
        assert_eq!(b.role(), Role::Follower);
        assert!(b.handle(Input::Tick { now_ms: 14_999 }).is_empty());

        let cmds = b.handle(Input::Tick { now_ms: 15_000 });
        assert!(cmds.contains(&Command::ClaimLeadership));
        let cmds = b.handle(Input::ClaimResolved {
            outcome: ClaimOutcome::Granted,
            now_ms: 15_000,
        });
        assert_eq!(b.role(), Role::Leader);
        assert!(messages(&cmds).contains(&SyncMessage::LeaderHeartbeat {
            leader_id: "b".to_string(),
            joined_at: 200,
            timestamp: 15_000,
        }));

        let cmds = b.handle(Input::Tick { now_ms: 20_000 });
        assert!(messages(&cmds).contains(&SyncMessage::LeaderHeartbeat {
            leader_id: "b".to_string(),
            joined_at: 200,
            timestamp: 20_000,
        }));
    }

    #[test]
    fn heartbeats_keep_the_follower_waiting() {
        let (mut a, mut b) = pair();
        for now_ms in (5_000..=40_000).step_by(5_000) {
            let beat = a.handle(Input::Tick { now_ms });
            deliver(&mut b, "a", &beat, now_ms);
            let cmds = b.handle(Input::Tick { now_ms });
            assert!(!cmds.contains(&Command::ClaimLeadership), "claimed at {now_ms}");
        }
        assert_eq!(b.role(), Role::Follower);
    }

    #[test]
    fn returning_senior_leader_makes_usurper_relinquish() {
        let (mut a, mut b) = pair();
        // a is still present but silent (partitioned)
        let cmds = b.handle(Input::Tick { now_ms: 15_000 });
        assert!(cmds.contains(&Command::ClaimLeadership));
        let takeover = b.handle(Input::ClaimResolved {
            outcome: ClaimOutcome::Granted,
            now_ms: 15_000,
        });
        assert_eq!(b.role(), Role::Leader);

        // the junior leader's heartbeat does not move a
        deliver(&mut a, "b", &takeover, 15_500);
        assert_eq!(a.role(), Role::Leader);

        let beat = a.handle(Input::Tick { now_ms: 16_000 });
        let cmds = deliver(&mut b, "a", &beat, 16_000);
        assert_eq!(b.role(), Role::Follower);
        assert_eq!(b.leader_id(), Some("a"));
        assert!(!cmds.contains(&Command::ClearLeadership));
    }

    #[test]
    fn earlier_joiner_takes_over_once_leader_heartbeat_is_stale() {
        let mut store = LeaderSlot::default();
        let mut b = machine("b", 200);
        bring_up(&mut b, &[Viewer::new("b", 200)], RetryOutcome::NotFound, 0);
        assert!(store.claim("b", LEADER_TIMEOUT_MS, 0));
        b.handle(Input::ClaimResolved {
            outcome: ClaimOutcome::Granted,
            now_ms: 0,
        });
        assert_eq!(b.role(), Role::Leader);
        let record = record_of(&b);

        // b then goes silent without leaving; c joined earlier
        let mut c = machine("c", 50);
        let viewers = vec![Viewer::new("b", 200), Viewer::new("c", 50)];
        let cmds = bring_up(&mut c, &viewers, RetryOutcome::Found(record), 1_000);
        assert!(cmds.contains(&Command::ClaimLeadership));
        let outcome = store.outcome_of_claim("c", LEADER_TIMEOUT_MS, 1_000);
        assert!(!outcome.is_granted());
        c.handle(Input::ClaimResolved {
            outcome,
            now_ms: 1_000,
        });
        assert_eq!(c.role(), Role::Follower);

        let cmds = c.handle(Input::Tick { now_ms: 16_000 });
        assert!(cmds.contains(&Command::ClaimLeadership));
        let outcome = store.outcome_of_claim("c", LEADER_TIMEOUT_MS, 16_000);
        assert!(outcome.is_granted());
        c.handle(Input::ClaimResolved {
            outcome,
            now_ms: 16_000,
        });
        assert_eq!(c.role(), Role::Leader);
        assert_eq!(c.state().map(|state| state.seed), Some(7));
    }

    #[test]
    fn leader_steps_down_for_an_earlier_joiner() {
        let mut b = machine("b", 200);
        bring_up(&mut b, &[Viewer::new("b", 200)], RetryOutcome::NotFound, 0);
        b.handle(Input::ClaimResolved {
            outcome: ClaimOutcome::Granted,
            now_ms: 0,
        });
        let cmds = b.handle(Input::Channel {
            event: ChannelEvent::PresenceJoin {
                viewer: Viewer::new("c", 50),
            },
            now_ms: 2_000,
        });
        assert!(cmds.contains(&Command::ClearLeadership));
        assert_eq!(b.role(), Role::Follower);
    }

    #[test]
    fn persist_then_signal_reloads_followers_from_store() {
        let (mut a, mut b) = pair();
        let cmds = a.handle(Input::Tick { now_ms: 3_000 });
        assert_eq!(saved_turns(&cmds), vec![1]);
        assert!(messages(&cmds).is_empty());

        let cmds = a.handle(Input::SaveResolved { turn: 1, ok: true });
        assert_eq!(
            messages(&cmds),
            vec![SyncMessage::TurnUpdate {
                leader_id: "a".to_string(),
                update: TurnUpdate::ReloadFromDb { turn: 1 },
            }]
        );

        let cmds = deliver(&mut b, "a", &cmds, 3_100);
        assert_eq!(
            cmds,
            vec![Command::LoadSession(LoadPurpose::Reload { min_turn: 1 })]
        );
        let cmds = b.handle(Input::SessionLoaded {
            purpose: LoadPurpose::Reload { min_turn: 1 },
            outcome: RetryOutcome::Found(record_of(&a)),
            now_ms: 3_200,
        });
        assert!(cmds.contains(&Command::Notify(SyncNotice::StateReplaced { turn: 1 })));
        assert_eq!(b.state(), a.state());
    }

    #[test]
    fn exhausted_reload_is_reported() {
        let (_, mut b) = pair();
        b.handle(Input::Channel {
            event: ChannelEvent::Broadcast {
                from: "a".to_string(),
                message: SyncMessage::TurnUpdate {
                    leader_id: "a".to_string(),
                    update: TurnUpdate::ReloadFromDb { turn: 4 },
                },
            },
            now_ms: 100,
        });
        let cmds = b.handle(Input::SessionLoaded {
            purpose: LoadPurpose::Reload { min_turn: 4 },
            outcome: RetryOutcome::Exhausted { attempts: 3 },
            now_ms: 4_000,
        });
        assert_eq!(
            cmds,
            vec![Command::Notify(SyncNotice::Error(SyncError::LoadExhausted {
                attempts: 3
            }))]
        );
        assert_eq!(b.state().map(|state| state.current_turn), Some(0));
    }

    #[test]
    fn failed_save_falls_back_to_delta_broadcast() {
        let (mut a, mut b) = pair();
        a.handle(Input::Tick { now_ms: 3_000 });
        let cmds = a.handle(Input::SaveResolved { turn: 1, ok: false });
        assert!(cmds.contains(&Command::Notify(SyncNotice::Error(SyncError::SaveFailed))));

        let applied = deliver(&mut b, "a", &cmds, 3_100);
        assert_eq!(
            applied,
            vec![Command::Notify(SyncNotice::TurnAdvanced { turn: 1 })]
        );
        assert_eq!(b.state(), a.state());
    }

    #[test]
    fn full_delta_mode_applies_in_order_and_reloads_on_gap() {
        let (mut a, mut b) = pair_with(SyncConfig {
            broadcast_mode: TurnBroadcastMode::FullDelta,
            ..config()
        });
        let first = a.handle(Input::Tick { now_ms: 3_000 });
        a.handle(Input::SaveResolved { turn: 1, ok: true });
        let second = a.handle(Input::Tick { now_ms: 6_000 });
        assert_eq!(saved_turns(&second), vec![2]);

        let cmds = deliver(&mut b, "a", &second, 6_100);
        assert!(cmds.contains(&Command::LoadSession(LoadPurpose::Reload { min_turn: 2 })));
        assert!(cmds.contains(&Command::Notify(SyncNotice::Error(SyncError::Delta(
            DeltaError::TurnGap {
                current: 0,
                received: 2
            }
        )))));

        let cmds = deliver(&mut b, "a", &first, 6_200);
        assert_eq!(cmds, vec![Command::Notify(SyncNotice::TurnAdvanced { turn: 1 })]);
        assert!(deliver(&mut b, "a", &first, 6_300).is_empty());
        assert_eq!(b.state().map(|state| state.current_turn), Some(1));
    }

    #[test]
    fn unanswered_state_requests_fall_back_to_local_session() {
        let mut b = machine("b", 200);
        bring_up(&mut b, &two_viewers(), RetryOutcome::NotFound, 0);
        assert_eq!(b.next_deadline(), Some(1_000));

        let cmds = b.handle(Input::Tick { now_ms: 1_000 });
        assert_eq!(messages(&cmds).len(), 1);
        let cmds = b.handle(Input::Tick { now_ms: 3_000 });
        assert_eq!(messages(&cmds).len(), 1);
        assert!(b.handle(Input::Tick { now_ms: 6_999 }).is_empty());

        let cmds = b.handle(Input::Tick { now_ms: 7_000 });
        assert!(cmds.contains(&Command::Notify(SyncNotice::Error(SyncError::LoadExhausted {
            attempts: 3
        }))));
        assert!(messages(&cmds).is_empty());
        assert_eq!(b.state().map(|state| state.current_turn), Some(0));
        assert_eq!(b.role(), Role::Follower);

        // a real snapshot still replaces the local one, even at the same turn
        let leader_state = new_session(12, 99);
        let cmds = b.handle(Input::Channel {
            event: ChannelEvent::Broadcast {
                from: "a".to_string(),
                message: SyncMessage::StateSync {
                    state: Box::new(leader_state.clone()),
                    target: Some("b".to_string()),
                },
            },
            now_ms: 8_000,
        });
        assert_eq!(cmds, vec![Command::Notify(SyncNotice::StateReplaced { turn: 0 })]);
        assert_eq!(b.state(), Some(&leader_state));
    }

    #[test]
    fn state_sync_for_someone_else_is_ignored() {
        let mut b = machine("b", 200);
        bring_up(&mut b, &two_viewers(), RetryOutcome::NotFound, 0);
        let cmds = b.handle(Input::Channel {
            event: ChannelEvent::Broadcast {
                from: "a".to_string(),
                message: SyncMessage::StateSync {
                    state: Box::new(new_session(4, 1)),
                    target: Some("z".to_string()),
                },
            },
            now_ms: 10,
        });
        assert!(cmds.is_empty());
        assert!(b.state().is_none());
    }

    #[test]
    fn camera_change_follows_the_leader() {
        let (mut a, mut b) = pair();
        let cmds = a.handle(Input::SetCamera { view_index: 15 });
        assert_eq!(
            messages(&cmds),
            vec![SyncMessage::CameraChange { view_index: 3 }]
        );
        let cmds = deliver(&mut b, "a", &cmds, 50);
        assert_eq!(
            cmds,
            vec![Command::Notify(SyncNotice::CameraChanged { view_index: 3 })]
        );
        assert_eq!(b.state().map(|state| state.current_view_index), Some(3));
    }

    #[test]
    fn isolated_machine_leads_locally() {
        let mut m = machine("solo", 1);
        let cmds = m.handle(Input::JoinFailed {
            error: SyncError::JoinFailed("offline".to_string()),
            now_ms: 0,
        });
        assert!(cmds.contains(&Command::Notify(SyncNotice::Error(SyncError::JoinFailed(
            "offline".to_string()
        )))));
        assert!(m.is_isolated());
        assert_eq!(m.role(), Role::Leader);

        let cmds = m.handle(Input::Tick { now_ms: 3_000 });
        assert_eq!(cmds, vec![Command::Notify(SyncNotice::TurnAdvanced { turn: 1 })]);
        assert!(m.handle(Input::SetCamera { view_index: 2 })
            .iter()
            .all(|cmd| !matches!(cmd, Command::Broadcast(_))));
    }

    #[test]
    fn shutdown_releases_leadership() {
        let (mut a, _) = pair();
        let cmds = a.handle(Input::Shutdown);
        assert!(cmds.contains(&Command::ClearLeadership));
        assert_eq!(a.role(), Role::Disconnected);
        assert_eq!(a.next_deadline(), None);
        assert!(a.handle(Input::Tick { now_ms: 50_000 }).is_empty());
    }
}
