use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;

use crate::civ::{decompress_state, encode_state, CivilizationSessionState};
use crate::error::StoreError;

use super::store::{ClaimOutcome, LeaderSlot, SessionRecord, SessionStore};

const META_VERSION: u8 = 1;
const SESSION_FILE: &str = "session.bin";
const META_FILE: &str = "meta.json";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SessionMeta {
    #[serde(flatten)]
    slot: LeaderSlot,
    viewer_count: usize,
    turn: Option<u32>,
    updated_at: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct SessionMetaFile {
    version: u8,
    #[serde(flatten)]
    meta: SessionMeta,
}

pub struct FileSessionStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    async fn read_meta(&self) -> SessionMeta {
        let path = self.path(META_FILE);
        let text = match fs::read_to_string(&path).await {
            Ok(value) => value,
            Err(error) => {
                if error.kind() != ErrorKind::NotFound {
                    warn!(path = %path.display(), %error, "failed to read session meta");
                }
                return SessionMeta::default();
            }
        };
        match serde_json::from_str::<SessionMetaFile>(&text) {
            Ok(file) if file.version == META_VERSION => file.meta,
            Ok(file) => {
                warn!(path = %path.display(), version = file.version, "unsupported session meta version");
                SessionMeta::default()
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to parse session meta");
                SessionMeta::default()
            }
        }
    }

    async fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).await?;
        let target = self.path(name);
        let staging = self.path(&format!("{name}.tmp"));
        fs::write(&staging, bytes).await?;
        fs::rename(&staging, &target).await?;
        Ok(())
    }

    async fn write_meta(&self, mut meta: SessionMeta) -> Result<(), StoreError> {
        meta.updated_at = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        let file = SessionMetaFile {
            version: META_VERSION,
            meta,
        };
        let text = serde_json::to_string_pretty(&file)?;
        self.write_atomic(META_FILE, text.as_bytes()).await
    }

    async fn update_meta(&self, update: impl FnOnce(&mut SessionMeta) -> bool) -> bool {
        let _guard = self.lock.lock().await;
        let mut meta = self.read_meta().await;
        if !update(&mut meta) {
            return false;
        }
        match self.write_meta(meta).await {
            Ok(()) => true,
            Err(error) => {
                warn!(dir = %self.dir.display(), %error, "failed to write session meta");
                false
            }
        }
    }

    async fn write_session(
        &self,
        state: &CivilizationSessionState,
        meta: SessionMeta,
    ) -> Result<(), StoreError> {
        let payload = encode_state(state)?;
        self.write_atomic(SESSION_FILE, &payload).await?;
        self.write_meta(meta).await
    }
}

impl SessionStore for FileSessionStore {
    async fn load_session(&self) -> Option<SessionRecord> {
        let _guard = self.lock.lock().await;
        let path = self.path(SESSION_FILE);
        let payload = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) => {
                if error.kind() != ErrorKind::NotFound {
                    warn!(path = %path.display(), %error, "failed to read session");
                }
                return None;
            }
        };
        let state = decompress_state(&payload)?;
        let meta = self.read_meta().await;
        Some(SessionRecord {
            state,
            leader_id: meta.slot.leader_id,
            leader_heartbeat_ms: meta.slot.heartbeat_ms,
            viewer_count: meta.viewer_count,
        })
    }

    async fn save_session(
        &self,
        state: &CivilizationSessionState,
        leader_id: &str,
        now_ms: u64,
    ) -> bool {
        let _guard = self.lock.lock().await;
        let mut meta = self.read_meta().await;
        if !meta.slot.accept_save(leader_id, now_ms) {
            warn!(leader_id, holder = ?meta.slot.leader_id, "save refused, leadership held elsewhere");
            return false;
        }
        meta.turn = Some(state.current_turn);
        match self.write_session(state, meta).await {
            Ok(()) => true,
            Err(error) => {
                warn!(dir = %self.dir.display(), %error, "failed to persist session");
                false
            }
        }
    }

    async fn update_heartbeat(&self, leader_id: &str, now_ms: u64) -> bool {
        self.update_meta(|meta| meta.slot.beat(leader_id, now_ms))
            .await
    }

    async fn claim_leadership(&self, viewer_id: &str, timeout_ms: u64, now_ms: u64) -> ClaimOutcome {
        let mut outcome = ClaimOutcome::Unreachable;
        let written = self
            .update_meta(|meta| {
                outcome = meta.slot.outcome_of_claim(viewer_id, timeout_ms, now_ms);
                outcome.is_granted()
            })
            .await;
        match outcome {
            ClaimOutcome::Granted if !written => ClaimOutcome::Unreachable,
            other => other,
        }
    }

    async fn update_viewer_count(&self, count: usize) -> bool {
        self.update_meta(|meta| {
            meta.viewer_count = count;
            true
        })
        .await
    }

    async fn clear_leadership(&self, leader_id: &str) -> bool {
        self.update_meta(|meta| meta.slot.clear(leader_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::civ::{new_session, process_turn, ArchetypeDecider};
    use crate::sync::store::now_ms;

    fn temp_dir(name: &str) -> PathBuf {
        let unique = format!(
            "{}-{}-{}",
            name,
            std::process::id(),
            now_ms().saturating_add(rand::random::<u32>() as u64)
        );
        std::env::temp_dir().join(unique).join("session")
    }

    #[tokio::test]
    async fn missing_directory_reads_as_no_session() {
        let store = FileSessionStore::new(temp_dir("iso-missing"));
        assert!(store.load_session().await.is_none());
    }

    #[tokio::test]
    async fn save_then_load_keeps_state_and_leader() {
        let store = FileSessionStore::new(temp_dir("iso-save"));
        let (state, _) = process_turn(&new_session(10, 4), &ArchetypeDecider);
        assert!(store.save_session(&state, "leader", 1_000).await);
        assert!(store.update_viewer_count(3).await);

        let record = store.load_session().await.expect("session persisted");
        assert_eq!(record.state, state);
        assert_eq!(record.leader_id.as_deref(), Some("leader"));
        assert_eq!(record.leader_heartbeat_ms, 1_000);
        assert_eq!(record.viewer_count, 3);

        let meta_text = std::fs::read_to_string(store.dir().join(META_FILE)).expect("meta file");
        assert!(meta_text.contains("\"version\": 1"));
        assert!(meta_text.contains("\"turn\": 1"));
    }

    #[tokio::test]
    async fn leadership_lifecycle_persists() {
        let dir = temp_dir("iso-claim");
        let store = FileSessionStore::new(dir.clone());
        assert!(store.claim_leadership("a", 15_000, 0).await.is_granted());
        assert_eq!(
            store.claim_leadership("b", 15_000, 5_000).await,
            ClaimOutcome::Refused {
                holder: Some("a".to_string())
            }
        );
        assert!(store.update_heartbeat("a", 5_000).await);

        let reopened = FileSessionStore::new(dir);
        assert!(!reopened.claim_leadership("b", 15_000, 19_000).await.is_granted());
        assert!(reopened.clear_leadership("a").await);
        assert!(reopened.claim_leadership("b", 15_000, 20_000).await.is_granted());
        assert!(!reopened.update_heartbeat("a", 21_000).await);
    }

    #[tokio::test]
    async fn corrupt_files_degrade() {
        let store = FileSessionStore::new(temp_dir("iso-corrupt"));
        std::fs::create_dir_all(store.dir()).expect("dir");
        std::fs::write(store.dir().join(SESSION_FILE), b"garbage").expect("write session");
        std::fs::write(store.dir().join(META_FILE), "{\"version\":9}").expect("write meta");
        assert!(store.load_session().await.is_none());
        assert!(store.claim_leadership("a", 15_000, 0).await.is_granted());
    }
}
