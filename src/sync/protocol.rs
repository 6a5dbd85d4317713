use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::civ::{CivilizationSessionState, TurnDelta};
use crate::server_utils::sanitize_viewer_id;

use super::election::Viewer;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum SyncMessage {
    TurnUpdate {
        leader_id: String,
        update: TurnUpdate,
    },
    CameraChange {
        view_index: usize,
    },
    LeaderHeartbeat {
        leader_id: String,
        joined_at: u64,
        timestamp: u64,
    },
    RequestState {
        viewer_id: String,
    },
    StateSync {
        state: Box<CivilizationSessionState>,
        target: Option<String>,
    },
}

impl SyncMessage {
    pub fn topic(&self) -> &'static str {
        match self {
            SyncMessage::TurnUpdate { .. } => "turn-update",
            SyncMessage::CameraChange { .. } => "camera-change",
            SyncMessage::LeaderHeartbeat { .. } => "leader-heartbeat",
            SyncMessage::RequestState { .. } => "request-state",
            SyncMessage::StateSync { .. } => "state-sync",
        }
    }

    pub fn is_for(&self, viewer_id: &str) -> bool {
        match self {
            SyncMessage::StateSync {
                target: Some(target),
                ..
            } => target == viewer_id,
            _ => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum TurnUpdate {
    ReloadFromDb { turn: u32 },
    Delta { delta: TurnDelta },
}

impl TurnUpdate {
    pub fn turn(&self) -> u32 {
        match self {
            TurnUpdate::ReloadFromDb { turn } => *turn,
            TurnUpdate::Delta { delta } => delta.turn,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ChannelEvent {
    PresenceSync { viewers: Vec<Viewer> },
    PresenceJoin { viewer: Viewer },
    PresenceLeave { viewer: Viewer },
    Broadcast { from: String, message: SyncMessage },
}

#[derive(Debug)]
pub enum ClientFrame {
    Join { viewer: Viewer },
    Broadcast { message: SyncMessage },
    Leave,
}

pub fn parse_sync_message(raw: &str) -> Option<SyncMessage> {
    serde_json::from_str(raw).ok()
}

pub fn parse_client_frame(raw: &str) -> Option<ClientFrame> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let obj = value.as_object()?;
    let frame_type = obj.get("type")?.as_str()?;

    match frame_type {
        "join" => {
            let viewer_id = sanitize_viewer_id(obj.get("viewerId")?.as_str()?)?;
            let joined_at = parse_timestamp(obj, "joinedAt")?;
            Some(ClientFrame::Join {
                viewer: Viewer::new(viewer_id, joined_at),
            })
        }
        "broadcast" => {
            let message = serde_json::from_value(obj.get("message")?.clone()).ok()?;
            Some(ClientFrame::Broadcast { message })
        }
        "leave" => Some(ClientFrame::Leave),
        _ => None,
    }
}

fn parse_timestamp(obj: &Map<String, Value>, key: &str) -> Option<u64> {
    let value = obj.get(key)?;
    if let Some(ms) = value.as_u64() {
        return Some(ms);
    }
    let ms = value.as_f64()?;
    if !ms.is_finite() || ms < 0.0 || ms >= u64::MAX as f64 {
        return None;
    }
    Some(ms.floor() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::civ::new_session;

    #[test]
    fn heartbeat_uses_kebab_type_and_camel_fields() {
        let message = SyncMessage::LeaderHeartbeat {
            leader_id: "v1".to_string(),
            joined_at: 100,
            timestamp: 5_000,
        };
        let raw = serde_json::to_string(&message).expect("serializes");
        assert_eq!(
            raw,
            r#"{"type":"leader-heartbeat","leaderId":"v1","joinedAt":100,"timestamp":5000}"#
        );
        assert_eq!(parse_sync_message(&raw), Some(message));
    }

    #[test]
    fn reload_signal_parses() {
        let parsed = parse_sync_message(
            r#"{"type":"turn-update","leaderId":"v1","update":{"kind":"reload-from-db","turn":7}}"#,
        );
        match parsed {
            Some(SyncMessage::TurnUpdate { leader_id, update }) => {
                assert_eq!(leader_id, "v1");
                assert_eq!(update, TurnUpdate::ReloadFromDb { turn: 7 });
                assert_eq!(update.turn(), 7);
            }
            _ => panic!("expected turn-update message"),
        }
    }

    #[test]
    fn unknown_topics_are_rejected() {
        assert!(parse_sync_message(r#"{"type":"lobby_start"}"#).is_none());
        assert!(parse_sync_message("not json").is_none());
    }

    #[test]
    fn targeted_state_sync_only_reaches_target() {
        let message = SyncMessage::StateSync {
            state: Box::new(new_session(3, 1)),
            target: Some("late".to_string()),
        };
        assert_eq!(message.topic(), "state-sync");
        assert!(message.is_for("late"));
        assert!(!message.is_for("other"));

        let open = SyncMessage::StateSync {
            state: Box::new(new_session(3, 1)),
            target: None,
        };
        assert!(open.is_for("anyone"));
    }

    #[test]
    fn join_frame_floors_fractional_timestamps() {
        let parsed = parse_client_frame(r#"{"type":"join","viewerId":" tab-1 ","joinedAt":1700.9}"#);
        match parsed {
            Some(ClientFrame::Join { viewer }) => {
                assert_eq!(viewer, Viewer::new("tab-1", 1700));
            }
            _ => panic!("expected join frame"),
        }
    }

    #[test]
    fn join_frame_rejects_bad_input() {
        assert!(parse_client_frame(r#"{"type":"join","viewerId":"","joinedAt":1}"#).is_none());
        assert!(parse_client_frame(r#"{"type":"join","viewerId":"a","joinedAt":-4}"#).is_none());
        assert!(parse_client_frame(r#"{"type":"join","viewerId":"a","joinedAt":1e100}"#).is_none());
        assert!(parse_client_frame(r#"{"type":"join","viewerId":"a"}"#).is_none());
    }

    #[test]
    fn broadcast_frame_carries_message() {
        let parsed = parse_client_frame(
            r#"{"type":"broadcast","message":{"type":"camera-change","viewIndex":4}}"#,
        );
        assert!(matches!(
            parsed,
            Some(ClientFrame::Broadcast {
                message: SyncMessage::CameraChange { view_index: 4 }
            })
        ));
        assert!(parse_client_frame(r#"{"type":"broadcast","message":{"type":"nope"}}"#).is_none());
        assert!(matches!(
            parse_client_frame(r#"{"type":"leave"}"#),
            Some(ClientFrame::Leave)
        ));
    }
}
