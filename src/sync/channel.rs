use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::SyncError;

use super::election::Viewer;
use super::protocol::{ChannelEvent, SyncMessage};

pub const DEFAULT_MEMBER_QUEUE: usize = 256;

struct Member {
    viewer: Viewer,
    link_id: u64,
    tx: mpsc::Sender<ChannelEvent>,
}

#[derive(Default)]
struct HubState {
    members: BTreeMap<String, Member>,
    next_link_id: u64,
    closed: bool,
}

#[derive(Clone)]
pub struct LocalHub {
    inner: Arc<Mutex<HubState>>,
    queue_capacity: usize,
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new(DEFAULT_MEMBER_QUEUE)
    }
}

impl LocalHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubState::default())),
            queue_capacity: queue_capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.members.clear();
    }

    pub fn viewers(&self) -> Vec<Viewer> {
        self.lock()
            .members
            .values()
            .map(|member| member.viewer.clone())
            .collect()
    }

    pub fn join(&self, viewer: Viewer) -> Result<ChannelLink, SyncError> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let mut state = self.lock();
        if state.closed {
            return Err(SyncError::JoinFailed("hub closed".to_string()));
        }
        state.next_link_id += 1;
        let link_id = state.next_link_id;
        let replaced = state.members.insert(
            viewer.viewer_id.clone(),
            Member {
                viewer: viewer.clone(),
                link_id,
                tx,
            },
        );
        if replaced.is_some() {
            debug!(viewer_id = %viewer.viewer_id, "presence replaced by newer link");
        }

        let viewers: Vec<Viewer> = state
            .members
            .values()
            .map(|member| member.viewer.clone())
            .collect();
        if let Some(member) = state.members.get(&viewer.viewer_id) {
            deliver(member, ChannelEvent::PresenceSync { viewers });
        }
        fan_out(
            &state,
            &viewer.viewer_id,
            ChannelEvent::PresenceJoin {
                viewer: viewer.clone(),
            },
        );
        drop(state);

        Ok(ChannelLink {
            hub: self.clone(),
            viewer,
            link_id,
            rx,
        })
    }

    pub fn broadcast(&self, from: &str, message: SyncMessage) -> Result<(), SyncError> {
        let state = self.lock();
        if state.closed {
            return Err(SyncError::ChannelClosed);
        }
        fan_out(
            &state,
            from,
            ChannelEvent::Broadcast {
                from: from.to_string(),
                message,
            },
        );
        Ok(())
    }

    fn leave(&self, viewer_id: &str, link_id: u64) {
        let mut state = self.lock();
        let current = state
            .members
            .get(viewer_id)
            .is_some_and(|member| member.link_id == link_id);
        if !current {
            return;
        }
        if let Some(member) = state.members.remove(viewer_id) {
            fan_out(
                &state,
                viewer_id,
                ChannelEvent::PresenceLeave {
                    viewer: member.viewer,
                },
            );
        }
    }
}

fn fan_out(state: &HubState, except: &str, event: ChannelEvent) {
    for (viewer_id, member) in &state.members {
        if viewer_id != except {
            deliver(member, event.clone());
        }
    }
}

fn deliver(member: &Member, event: ChannelEvent) {
    // Slow members lose events rather than stall the hub.
    if let Err(error) = member.tx.try_send(event) {
        if matches!(error, mpsc::error::TrySendError::Full(_)) {
            warn!(viewer_id = %member.viewer.viewer_id, "member queue full, dropping event");
        }
    }
}

pub struct ChannelLink {
    hub: LocalHub,
    viewer: Viewer,
    link_id: u64,
    rx: mpsc::Receiver<ChannelEvent>,
}

impl ChannelLink {
    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub fn send(&self, message: SyncMessage) -> Result<(), SyncError> {
        self.hub.broadcast(&self.viewer.viewer_id, message)
    }

    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }
}

impl Drop for ChannelLink {
    fn drop(&mut self) {
        self.hub.leave(&self.viewer.viewer_id, self.link_id);
    }
}
