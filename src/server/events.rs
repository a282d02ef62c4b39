//! Wire protocol for the Sonic Canvas coordinator.
//!
//! Every WebSocket frame is a JSON object carrying a kebab-case `type` tag.
//! Inbound events never carry trusted identity or room fields; both are
//! resolved server-side from the connection's registered state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Opaque client-submitted beat payload. The coordinator only echoes and
/// enriches it, never interprets individual fields.
pub type BeatPayload = Map<String, Value>;

/// Events a client may send to the coordinator.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Join (or switch to) a named room. Blank names resolve to the default room.
    JoinRoom { room: Option<String> },
    /// Set the sender's display name. Sanitized, never rejected.
    SetName { name: Option<String> },
    /// Broadcast one timed musical event to the sender's room.
    TriggerBeat {
        #[serde(flatten)]
        payload: BeatPayload,
    },
    /// Send a chat message to the sender's room.
    ChatMessage { text: String },
    /// Start a timed contest in the sender's room, superseding any active one.
    StartContest { duration: Option<u64> },
    /// Request the current contest state, answered by unicast.
    GetContest,
    /// Request the sender's room membership size, answered by unicast.
    GetUserCount,
}

/// One roster line: derived from the registry and profile store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub id: Uuid,
    pub name: String,
    pub beats: u64,
    pub last_action: i64,
}

/// One contest leaderboard line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEntry {
    pub id: Uuid,
    pub name: String,
    pub beats: u64,
    pub peak_cps: u64,
}

/// Why a contest ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContestEndReason {
    #[serde(rename = "timer")]
    Timer,
    #[serde(rename = "room became empty")]
    RoomEmpty,
    #[serde(rename = "cleanup")]
    Cleanup,
}

impl ContestEndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::RoomEmpty => "room became empty",
            Self::Cleanup => "cleanup",
        }
    }
}

impl std::fmt::Display for ContestEndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events the coordinator pushes to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Unicast acknowledgement of a resolved room join.
    RoomJoined { room: String },
    /// Room membership size; also the unicast reply to `get-user-count`.
    UserCount { count: usize },
    /// Full roster snapshot for a room.
    RoomUsers {
        room: String,
        users: Vec<RosterEntry>,
    },
    /// A beat, enriched with the sender's display name.
    ReceiveBeat {
        #[serde(flatten)]
        payload: BeatPayload,
    },
    /// An accepted chat message.
    ChatMessage {
        id: Uuid,
        room: String,
        from: String,
        text: String,
        ts: i64,
    },
    /// A contest began (or superseded a running one).
    ContestStart {
        room: String,
        duration: u64,
        end_time: i64,
    },
    /// Live contest standings after a scoring event.
    ContestUpdate {
        room: String,
        remaining: u64,
        leaderboard: Vec<ScoreEntry>,
        peak_champion: Option<ScoreEntry>,
    },
    /// Unicast reply to `get-contest` when no contest is active.
    ContestNone { room: String },
    /// Final contest results. `winner` is null when the room emptied out.
    ContestEnd {
        room: String,
        winner: Option<ScoreEntry>,
        leaderboard: Vec<ScoreEntry>,
        ended_reason: ContestEndReason,
        peak_champion: Option<ScoreEntry>,
    },
    /// Process-wide notice that an idle room's bookkeeping was purged.
    RoomCleanup { room: String, idle_ms: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_parses_kebab_case_tags() {
        // given:
        let raw = r#"{"type":"join-room","room":"studio"}"#;

        // when:
        let event: ClientEvent = serde_json::from_str(raw).unwrap();

        // then:
        assert!(matches!(event, ClientEvent::JoinRoom { room: Some(r) } if r == "studio"));
    }

    #[test]
    fn test_trigger_beat_collects_opaque_payload() {
        // given:
        let raw = r##"{"type":"trigger-beat","x":0.5,"note":"C4","color":"#ff0044"}"##;

        // when:
        let event: ClientEvent = serde_json::from_str(raw).unwrap();

        // then:
        let ClientEvent::TriggerBeat { payload } = event else {
            panic!("expected trigger-beat");
        };
        assert_eq!(payload.get("note"), Some(&json!("C4")));
        assert_eq!(payload.get("x"), Some(&json!(0.5)));
    }

    #[test]
    fn test_server_event_serializes_camel_case_fields() {
        // given:
        let event = ServerEvent::ContestStart {
            room: "lobby".to_string(),
            duration: 30,
            end_time: 1_000_030_000,
        };

        // when:
        let value = serde_json::to_value(&event).unwrap();

        // then:
        assert_eq!(value["type"], "contest-start");
        assert_eq!(value["endTime"], 1_000_030_000_i64);
    }

    #[test]
    fn test_contest_end_reason_wire_strings() {
        // given / when / then:
        assert_eq!(
            serde_json::to_value(ContestEndReason::RoomEmpty).unwrap(),
            json!("room became empty")
        );
        assert_eq!(
            serde_json::to_value(ContestEndReason::Timer).unwrap(),
            json!("timer")
        );
        assert_eq!(
            serde_json::to_value(ContestEndReason::Cleanup).unwrap(),
            json!("cleanup")
        );
    }

    #[test]
    fn test_null_winner_survives_serialization() {
        // given:
        let event = ServerEvent::ContestEnd {
            room: "lobby".to_string(),
            winner: None,
            leaderboard: vec![],
            ended_reason: ContestEndReason::RoomEmpty,
            peak_champion: None,
        };

        // when:
        let value = serde_json::to_value(&event).unwrap();

        // then:
        assert!(value["winner"].is_null());
        assert_eq!(value["endedReason"], "room became empty");
    }
}
