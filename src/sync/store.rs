use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::civ::{decompress_state, encode_state, CivilizationSessionState};

#[derive(Clone, Debug, PartialEq)]
pub struct SessionRecord {
    pub state: CivilizationSessionState,
    pub leader_id: Option<String>,
    pub leader_heartbeat_ms: u64,
    pub viewer_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    Granted,
    Refused { holder: Option<String> },
    /// The backend could not answer; nobody is known to hold the slot.
    Unreachable,
}

impl ClaimOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, ClaimOutcome::Granted)
    }
}

pub trait SessionStore: Send + Sync + 'static {
    fn load_session(&self) -> impl Future<Output = Option<SessionRecord>> + Send;

    fn save_session(
        &self,
        state: &CivilizationSessionState,
        leader_id: &str,
        now_ms: u64,
    ) -> impl Future<Output = bool> + Send;

    fn update_heartbeat(&self, leader_id: &str, now_ms: u64) -> impl Future<Output = bool> + Send;

    fn claim_leadership(
        &self,
        viewer_id: &str,
        timeout_ms: u64,
        now_ms: u64,
    ) -> impl Future<Output = ClaimOutcome> + Send;

    fn update_viewer_count(&self, count: usize) -> impl Future<Output = bool> + Send;

    fn clear_leadership(&self, leader_id: &str) -> impl Future<Output = bool> + Send;
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderSlot {
    pub leader_id: Option<String>,
    pub heartbeat_ms: u64,
}

impl LeaderSlot {
    pub fn is_stale(&self, timeout_ms: u64, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.heartbeat_ms) >= timeout_ms
    }

    pub fn claim(&mut self, viewer_id: &str, timeout_ms: u64, now_ms: u64) -> bool {
        let free = match self.leader_id.as_deref() {
            None => true,
            Some(current) => current == viewer_id || self.is_stale(timeout_ms, now_ms),
        };
        if free {
            self.leader_id = Some(viewer_id.to_string());
            self.heartbeat_ms = now_ms;
        }
        free
    }

    pub fn outcome_of_claim(&mut self, viewer_id: &str, timeout_ms: u64, now_ms: u64) -> ClaimOutcome {
        if self.claim(viewer_id, timeout_ms, now_ms) {
            ClaimOutcome::Granted
        } else {
            ClaimOutcome::Refused {
                holder: self.leader_id.clone(),
            }
        }
    }

    pub fn beat(&mut self, leader_id: &str, now_ms: u64) -> bool {
        if self.leader_id.as_deref() != Some(leader_id) {
            return false;
        }
        self.heartbeat_ms = now_ms;
        true
    }

    pub fn clear(&mut self, leader_id: &str) -> bool {
        if self.leader_id.as_deref() != Some(leader_id) {
            return false;
        }
        self.leader_id = None;
        true
    }

    /// A save takes the slot if it is free and is refused if someone else holds it.
    pub fn accept_save(&mut self, leader_id: &str, now_ms: u64) -> bool {
        match self.leader_id.as_deref() {
            Some(current) if current != leader_id => false,
            _ => {
                self.leader_id = Some(leader_id.to_string());
                self.heartbeat_ms = now_ms;
                true
            }
        }
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Default)]
struct MemoryInner {
    payload: Vec<u8>,
    slot: LeaderSlot,
    viewer_count: usize,
    offline: bool,
}

#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn put_raw(&self, payload: Vec<u8>) {
        self.lock().payload = payload;
    }

    pub fn leader_slot(&self) -> LeaderSlot {
        self.lock().slot.clone()
    }

    pub fn viewer_count(&self) -> usize {
        self.lock().viewer_count
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_online<R>(&self, offline_value: R, f: impl FnOnce(&mut MemoryInner) -> R) -> R {
        let mut inner = self.lock();
        if inner.offline {
            return offline_value;
        }
        f(&mut inner)
    }
}

impl SessionStore for MemorySessionStore {
    async fn load_session(&self) -> Option<SessionRecord> {
        self.with_online(None, |inner| {
            let state = decompress_state(&inner.payload)?;
            Some(SessionRecord {
                state,
                leader_id: inner.slot.leader_id.clone(),
                leader_heartbeat_ms: inner.slot.heartbeat_ms,
                viewer_count: inner.viewer_count,
            })
        })
    }

    async fn save_session(
        &self,
        state: &CivilizationSessionState,
        leader_id: &str,
        now_ms: u64,
    ) -> bool {
        let Ok(payload) = encode_state(state) else {
            return false;
        };
        self.with_online(false, |inner| {
            if !inner.slot.accept_save(leader_id, now_ms) {
                return false;
            }
            inner.payload = payload;
            true
        })
    }

    async fn update_heartbeat(&self, leader_id: &str, now_ms: u64) -> bool {
        self.with_online(false, |inner| inner.slot.beat(leader_id, now_ms))
    }

    async fn claim_leadership(&self, viewer_id: &str, timeout_ms: u64, now_ms: u64) -> ClaimOutcome {
        self.with_online(ClaimOutcome::Unreachable, |inner| {
            inner.slot.outcome_of_claim(viewer_id, timeout_ms, now_ms)
        })
    }

    async fn update_viewer_count(&self, count: usize) -> bool {
        self.with_online(false, |inner| {
            inner.viewer_count = count;
            true
        })
    }

    async fn clear_leadership(&self, leader_id: &str) -> bool {
        self.with_online(false, |inner| inner.slot.clear(leader_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::civ::new_session;

    #[test]
    fn claim_respects_fresh_heartbeats() {
        let mut slot = LeaderSlot::default();
        assert!(slot.claim("a", 15_000, 1_000));
        assert!(!slot.claim("b", 15_000, 10_000));
        assert!(slot.claim("a", 15_000, 10_000));
        assert_eq!(slot.heartbeat_ms, 10_000);
        assert!(!slot.claim("b", 15_000, 24_999));
        assert!(slot.claim("b", 15_000, 25_000));
        assert_eq!(slot.leader_id.as_deref(), Some("b"));
    }

    #[test]
    fn only_the_holder_beats_or_clears() {
        let mut slot = LeaderSlot::default();
        assert!(!slot.beat("a", 5));
        slot.claim("a", 100, 1);
        assert!(!slot.beat("b", 5));
        assert!(!slot.clear("b"));
        assert!(slot.beat("a", 5));
        assert!(slot.clear("a"));
        assert_eq!(slot.leader_id, None);
    }

    #[tokio::test]
    async fn memory_store_round_trips_compressed_state() {
        let store = MemorySessionStore::new();
        assert!(store.load_session().await.is_none());

        let state = new_session(8, 3);
        assert!(store.save_session(&state, "a", 40).await);
        let record = store.load_session().await.expect("session stored");
        assert_eq!(record.state, state);
        assert_eq!(record.leader_id.as_deref(), Some("a"));
        assert_eq!(record.leader_heartbeat_ms, 40);
    }

    #[tokio::test]
    async fn save_is_refused_for_non_holder() {
        let store = MemorySessionStore::new();
        assert!(store.claim_leadership("a", 15_000, 0).await.is_granted());
        assert_eq!(
            store.claim_leadership("b", 15_000, 5).await,
            ClaimOutcome::Refused {
                holder: Some("a".to_string())
            }
        );
        assert!(!store.save_session(&new_session(2, 1), "b", 10).await);
        assert!(store.load_session().await.is_none());
    }

    #[tokio::test]
    async fn corrupt_payload_reads_as_no_session() {
        let store = MemorySessionStore::new();
        store.put_raw(vec![9, 0, 0, 0, 1, 2, 3]);
        assert!(store.load_session().await.is_none());
    }

    #[tokio::test]
    async fn offline_store_degrades() {
        let store = MemorySessionStore::new();
        assert!(store.save_session(&new_session(2, 1), "a", 0).await);
        store.set_offline(true);
        assert!(store.load_session().await.is_none());
        assert!(!store.update_heartbeat("a", 10).await);
        assert!(!store.update_viewer_count(3).await);
        assert_eq!(
            store.claim_leadership("b", 15_000, 20_000).await,
            ClaimOutcome::Unreachable
        );
        store.set_offline(false);
        assert!(store.update_viewer_count(3).await);
        assert_eq!(store.viewer_count(), 3);
    }
}
