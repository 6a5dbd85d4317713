use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::civ::{AgentDecider, CivilizationSessionState};
use crate::error::SyncError;

use super::channel::{ChannelLink, LocalHub};
use super::election::Viewer;
use super::machine::{Command, Input, LoadPurpose, Role, SyncConfig, SyncMachine, SyncNotice};
use super::protocol::{ChannelEvent, SyncMessage};
use super::retry::Attempt;
use super::store::{now_ms, SessionStore};

const NOTICE_QUEUE: usize = 64;
const FEEDBACK_QUEUE: usize = 64;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncSnapshot {
    pub role: Role,
    pub leader_id: Option<String>,
    pub isolated: bool,
    pub viewer_count: usize,
    pub state: Option<CivilizationSessionState>,
}

impl SyncSnapshot {
    pub fn turn(&self) -> Option<u32> {
        self.state.as_ref().map(|state| state.current_turn)
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }
}

type SnapshotKey = (Role, Option<String>, bool, usize, Option<(u32, u32, usize)>);

enum Control {
    SetCamera(usize),
}

/// Millisecond wall clock anchored to tokio's clock, so paused-time tests
/// and the store agree on timestamps.
#[derive(Clone, Copy)]
struct Clock {
    origin: Instant,
    origin_ms: u64,
}

impl Clock {
    fn start() -> Self {
        Self {
            origin: Instant::now(),
            origin_ms: now_ms(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.origin_ms + self.origin.elapsed().as_millis() as u64
    }

    fn instant_at(&self, at_ms: u64) -> Instant {
        self.origin + Duration::from_millis(at_ms.saturating_sub(self.origin_ms))
    }
}

pub struct SyncProvider {
    viewer: Viewer,
    control: mpsc::Sender<Control>,
    snapshot: watch::Receiver<SyncSnapshot>,
    destroyed: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl SyncProvider {
    pub fn connect<S: SessionStore>(
        viewer: Viewer,
        config: SyncConfig,
        decider: Box<dyn AgentDecider>,
        hub: &LocalHub,
        store: Arc<S>,
    ) -> (Self, mpsc::Receiver<SyncNotice>) {
        let clock = Clock::start();
        let (first, link) = match hub.join(viewer.clone()) {
            Ok(link) => (Input::Connected, Some(link)),
            Err(error) => (
                Input::JoinFailed {
                    error,
                    now_ms: clock.now_ms(),
                },
                None,
            ),
        };

        let (control_tx, control_rx) = mpsc::channel(16);
        let (feedback_tx, feedback_rx) = mpsc::channel(FEEDBACK_QUEUE);
        let (notice_tx, notice_rx) = mpsc::channel(NOTICE_QUEUE);
        let (snapshot_tx, snapshot_rx) = watch::channel(SyncSnapshot::default());
        let destroyed = Arc::new(AtomicBool::new(false));

        let driver = Driver {
            machine: SyncMachine::new(viewer.clone(), config, decider),
            link,
            store,
            clock,
            destroyed: destroyed.clone(),
            feedback: feedback_tx,
            notices: notice_tx,
            snapshot: snapshot_tx,
            published: None,
        };
        let task = tokio::spawn(driver.run(control_rx, feedback_rx, first));

        (
            Self {
                viewer,
                control: control_tx,
                snapshot: snapshot_rx,
                destroyed,
                task,
            },
            notice_rx,
        )
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshot.clone()
    }

    pub fn set_camera(&self, view_index: usize) -> Result<(), SyncError> {
        self.control
            .try_send(Control::SetCamera(view_index))
            .map_err(|_| SyncError::ChannelClosed)
    }

    pub async fn destroy(self) {
        self.destroyed.store(true, Ordering::SeqCst);
        drop(self.control);
        if let Err(error) = self.task.await {
            warn!(viewer_id = %self.viewer.viewer_id, %error, "sync driver ended abnormally");
        }
    }
}

struct Driver<S> {
    machine: SyncMachine,
    link: Option<ChannelLink>,
    store: Arc<S>,
    clock: Clock,
    destroyed: Arc<AtomicBool>,
    feedback: mpsc::Sender<Input>,
    notices: mpsc::Sender<SyncNotice>,
    snapshot: watch::Sender<SyncSnapshot>,
    published: Option<SnapshotKey>,
}

async fn next_event(link: &mut Option<ChannelLink>) -> Option<ChannelEvent> {
    match link {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl<S: SessionStore> Driver<S> {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    async fn run(
        mut self,
        mut control: mpsc::Receiver<Control>,
        mut feedback: mpsc::Receiver<Input>,
        first: Input,
    ) {
        self.apply(first).await;
        loop {
            if self.is_destroyed() {
                break;
            }
            let deadline = self
                .machine
                .next_deadline()
                .map(|at| self.clock.instant_at(at));
            tokio::select! {
                message = control.recv() => match message {
                    Some(Control::SetCamera(view_index)) => {
                        self.apply(Input::SetCamera { view_index }).await;
                    }
                    None => break,
                },
                event = next_event(&mut self.link) => match event {
                    Some(event) => {
                        let now_ms = self.clock.now_ms();
                        self.apply(Input::Channel { event, now_ms }).await;
                    }
                    None => {
                        warn!(viewer_id = %self.machine.me().viewer_id, "presence channel closed");
                        self.link = None;
                        self.notify(SyncNotice::Error(SyncError::ChannelClosed));
                    }
                },
                Some(input) = feedback.recv() => self.apply(input).await,
                _ = sleep_until(deadline) => {
                    let now_ms = self.clock.now_ms();
                    self.apply(Input::Tick { now_ms }).await;
                }
            }
        }

        self.destroyed.store(true, Ordering::SeqCst);
        let commands = self.machine.handle(Input::Shutdown);
        for command in commands {
            self.execute(command).await;
        }
        self.publish();
        self.link = None;
    }

    async fn apply(&mut self, input: Input) {
        let commands = self.machine.handle(input);
        for command in commands {
            self.execute(command).await;
            if self.is_destroyed() {
                break;
            }
        }
        self.publish();
    }

    async fn execute(&mut self, command: Command) {
        let viewer_id = self.machine.me().viewer_id.clone();
        match command {
            Command::Broadcast(message) => self.broadcast(message),
            Command::LoadSession(purpose) => self.spawn_load(purpose),
            Command::SaveSession(state) => {
                let store = self.store.clone();
                let feedback = self.feedback.clone();
                let destroyed = self.destroyed.clone();
                let clock = self.clock;
                tokio::spawn(async move {
                    let turn = state.current_turn;
                    let ok = store.save_session(&state, &viewer_id, clock.now_ms()).await;
                    if destroyed.load(Ordering::SeqCst) {
                        return;
                    }
                    let _ = feedback.send(Input::SaveResolved { turn, ok }).await;
                });
            }
            Command::UpdateHeartbeat => {
                let store = self.store.clone();
                let clock = self.clock;
                tokio::spawn(async move {
                    if !store.update_heartbeat(&viewer_id, clock.now_ms()).await {
                        debug!(viewer_id, "heartbeat not recorded by store");
                    }
                });
            }
            Command::ClaimLeadership => {
                let store = self.store.clone();
                let feedback = self.feedback.clone();
                let destroyed = self.destroyed.clone();
                let clock = self.clock;
                let timeout_ms = self.machine.config().leader_timeout_ms;
                tokio::spawn(async move {
                    let outcome = store
                        .claim_leadership(&viewer_id, timeout_ms, clock.now_ms())
                        .await;
                    if destroyed.load(Ordering::SeqCst) {
                        return;
                    }
                    let now_ms = clock.now_ms();
                    let _ = feedback
                        .send(Input::ClaimResolved { outcome, now_ms })
                        .await;
                });
            }
            Command::ClearLeadership => {
                if !self.store.clear_leadership(&viewer_id).await {
                    debug!(viewer_id, "store had no leadership to clear");
                }
            }
            Command::UpdateViewerCount(count) => {
                let store = self.store.clone();
                tokio::spawn(async move {
                    if !store.update_viewer_count(count).await {
                        debug!(count, "viewer count not recorded by store");
                    }
                });
            }
            Command::Notify(notice) => self.notify(notice),
        }
    }

    fn broadcast(&self, message: SyncMessage) {
        let Some(link) = &self.link else {
            return;
        };
        if let Err(error) = link.send(message) {
            warn!(viewer_id = %self.machine.me().viewer_id, %error, "broadcast failed");
        }
    }

    fn spawn_load(&self, purpose: LoadPurpose) {
        let store = self.store.clone();
        let feedback = self.feedback.clone();
        let destroyed = self.destroyed.clone();
        let policy = self.machine.config().store_retry.clone();
        let clock = self.clock;
        tokio::spawn(async move {
            let outcome = policy
                .run(
                    |_| {
                        let store = store.clone();
                        async move {
                            let record = store.load_session().await;
                            match (purpose, record) {
                                (LoadPurpose::Bootstrap, Some(record)) => Attempt::Done(record),
                                (LoadPurpose::Bootstrap, None) => Attempt::Missing,
                                (LoadPurpose::Reload { min_turn }, Some(record))
                                    if record.state.current_turn >= min_turn =>
                                {
                                    Attempt::Done(record)
                                }
                                (LoadPurpose::Reload { .. }, _) => Attempt::Retry,
                            }
                        }
                    },
                    || destroyed.load(Ordering::SeqCst),
                )
                .await;
            if destroyed.load(Ordering::SeqCst) {
                return;
            }
            let now_ms = clock.now_ms();
            let _ = feedback
                .send(Input::SessionLoaded {
                    purpose,
                    outcome,
                    now_ms,
                })
                .await;
        });
    }

    fn notify(&self, notice: SyncNotice) {
        if let Err(TrySendError::Full(notice)) = self.notices.try_send(notice) {
            warn!(?notice, "notice queue full, dropping");
        }
    }

    fn publish(&mut self) {
        let machine = &self.machine;
        let key: SnapshotKey = (
            machine.role(),
            machine.leader_id().map(str::to_string),
            machine.is_isolated(),
            machine.viewer_count(),
            machine
                .state()
                .map(|state| (state.seed, state.current_turn, state.current_view_index)),
        );
        if self.published.as_ref() == Some(&key) {
            return;
        }
        self.snapshot.send_replace(SyncSnapshot {
            role: machine.role(),
            leader_id: machine.leader_id().map(str::to_string),
            isolated: machine.is_isolated(),
            viewer_count: machine.viewer_count(),
            state: machine.state().cloned(),
        });
        self.published = Some(key);
    }
}
