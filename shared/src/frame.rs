//! Room snapshots pushed on `frame` payloads
//!
//! The server streams whole-room snapshots; each one replaces the previous
//! view entirely. Two string sentinels bracket a stream: `"SOF"` when it
//! starts and `"EOF"` when no more frames will follow.
//!
//! Snapshots are a tagged union keyed by the `state` field. Decoding is
//! defensive: a snapshot that does not fit the known shapes becomes
//! [`Frame::Unrecognized`] with the reason attached, so a newer server never
//! crashes an older client.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Newest snapshot layout this client understands
pub const FRAME_VERSION: u32 = 1;
pub const START_OF_STREAM: &str = "SOF";
pub const END_OF_STREAM: &str = "EOF";

/// Data of a `frame` payload
#[derive(Debug, Clone, PartialEq)]
pub enum FrameData {
    StartOfStream,
    EndOfStream,
    Snapshot(Frame),
}

impl FrameData {
    pub fn from_value(value: Value) -> Self {
        match value.as_str() {
            Some(START_OF_STREAM) => FrameData::StartOfStream,
            Some(END_OF_STREAM) => FrameData::EndOfStream,
            _ => FrameData::Snapshot(Frame::decode(value)),
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, FrameData::EndOfStream)
    }

    pub fn is_start_of_stream(&self) -> bool {
        matches!(self, FrameData::StartOfStream)
    }
}

/// A single snapshot as stored by the client
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Room(RoomFrame),
    /// Kept verbatim so consumers still see the latest snapshot
    Unrecognized { raw: Value, reason: String },
}

impl Frame {
    pub fn decode(raw: Value) -> Self {
        let decoded = RoomFrame::deserialize(&raw);
        match decoded {
            Ok(frame) if frame.version > FRAME_VERSION => Frame::Unrecognized {
                reason: format!("unsupported frame version {}", frame.version),
                raw,
            },
            Ok(frame) => Frame::Room(frame),
            Err(e) => Frame::Unrecognized {
                reason: e.to_string(),
                raw,
            },
        }
    }

    pub fn room(&self) -> Option<&RoomFrame> {
        match self {
            Frame::Room(room) => Some(room),
            Frame::Unrecognized { .. } => None,
        }
    }

    /// Value of the `state` discriminator, even for unrecognized snapshots
    pub fn state_name(&self) -> Option<&str> {
        match self {
            Frame::Room(room) => Some(room.state_name()),
            Frame::Unrecognized { raw, .. } => raw.get("state").and_then(Value::as_str),
        }
    }

    pub fn is_recognized(&self) -> bool {
        matches!(self, Frame::Room(_))
    }
}

/// Decoded room snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomFrame {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub tick: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(flatten)]
    pub phase: RoomPhase,
}

fn default_version() -> u32 {
    FRAME_VERSION
}

impl RoomFrame {
    pub fn state_name(&self) -> &'static str {
        match self.phase {
            RoomPhase::Waiting(_) => "waiting",
            RoomPhase::LobbyCountdown(_) => "lobby-countdown",
            RoomPhase::Running(_) => "running",
            RoomPhase::NextRoundCountdown(_) => "next-round-countdown",
            RoomPhase::Resolved(_) => "resolved",
        }
    }

    pub fn players(&self) -> &BTreeMap<String, PlayerData> {
        match &self.phase {
            RoomPhase::Waiting(room) => &room.players,
            RoomPhase::LobbyCountdown(room) => &room.players,
            RoomPhase::Running(room) => &room.players,
            RoomPhase::NextRoundCountdown(room) => &room.players,
            RoomPhase::Resolved(room) => &room.players,
        }
    }

    /// Seconds left on whichever countdown the current phase runs
    pub fn remaining_seconds(&self) -> Option<u32> {
        match &self.phase {
            RoomPhase::LobbyCountdown(room) => Some(room.break_timer),
            RoomPhase::Running(room) => Some(room.timer),
            RoomPhase::NextRoundCountdown(room) => Some(room.break_timer),
            RoomPhase::Waiting(_) | RoomPhase::Resolved(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum RoomPhase {
    Waiting(WaitingRoom),
    LobbyCountdown(LobbyCountdown),
    Running(RunningRound),
    NextRoundCountdown(NextRoundCountdown),
    Resolved(ResolvedRoom),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingRoom {
    #[serde(default, deserialize_with = "deserialize_players")]
    pub players: BTreeMap<String, PlayerData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyCountdown {
    pub break_timer: u32,
    #[serde(default, deserialize_with = "deserialize_players")]
    pub players: BTreeMap<String, PlayerData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningRound {
    pub timer: u32,
    pub question: Question,
    #[serde(default)]
    pub round: u32,
    /// Player whose turn it is in turn-based modes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, deserialize_with = "deserialize_players")]
    pub players: BTreeMap<String, PlayerData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextRoundCountdown {
    pub break_timer: u32,
    #[serde(default)]
    pub round: u32,
    #[serde(default, deserialize_with = "deserialize_players")]
    pub players: BTreeMap<String, PlayerData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRoom {
    #[serde(default, deserialize_with = "deserialize_players")]
    pub players: BTreeMap<String, PlayerData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub problem: Vec<i64>,
    pub target: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerData {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_uri: Option<String>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub is_ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_status: Option<RoundStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoundStatus {
    Thinking,
    Solved,
    #[serde(other)]
    Unknown,
}

/// Servers send players either keyed by id or as a plain list
#[derive(Deserialize)]
#[serde(untagged)]
enum PlayersRepr {
    Map(BTreeMap<String, PlayerData>),
    List(Vec<PlayerData>),
}

fn deserialize_players<'de, D>(deserializer: D) -> Result<BTreeMap<String, PlayerData>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<PlayersRepr>::deserialize(deserializer)? {
        Some(PlayersRepr::Map(players)) => players,
        Some(PlayersRepr::List(players)) => players
            .into_iter()
            .map(|player| (player.id.clone(), player))
            .collect(),
        None => BTreeMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sentinels() {
        assert!(FrameData::from_value(json!("EOF")).is_end_of_stream());
        assert!(FrameData::from_value(json!("SOF")).is_start_of_stream());

        let other = FrameData::from_value(json!("BOF"));
        assert!(matches!(other, FrameData::Snapshot(Frame::Unrecognized { .. })));
    }

    #[test]
    fn test_waiting_room_with_player_map() {
        let frame = Frame::decode(json!({
            "state": "waiting",
            "tick": 4,
            "code": "ABCD",
            "gameType": "classic",
            "players": {
                "u1": {"id": "u1", "displayName": "Mint", "isReady": true, "score": 0}
            }
        }));

        let room = frame.room().unwrap();
        assert_eq!(room.state_name(), "waiting");
        assert_eq!(room.tick, 4);
        assert_eq!(room.code.as_deref(), Some("ABCD"));
        assert_eq!(room.version, FRAME_VERSION);
        assert!(room.players()["u1"].is_ready);
        assert_eq!(room.remaining_seconds(), None);
    }

    #[test]
    fn test_player_list_is_keyed_by_id() {
        let frame = Frame::decode(json!({
            "state": "resolved",
            "winner": "u2",
            "players": [
                {"id": "u1", "score": 10},
                {"id": "u2", "score": 30}
            ]
        }));

        let room = frame.room().unwrap();
        assert_eq!(room.players().len(), 2);
        assert_eq!(room.players()["u2"].score, 30);
        match &room.phase {
            RoomPhase::Resolved(resolved) => assert_eq!(resolved.winner.as_deref(), Some("u2")),
            other => panic!("unexpected phase {other:?}"),
        }
    }

    #[test]
    fn test_running_round() {
        let frame = Frame::decode(json!({
            "state": "running",
            "timer": 42,
            "round": 2,
            "mode": "classic",
            "turn": "u1",
            "question": {"problem": [1, 3, 4, 6], "target": 24},
            "players": {
                "u1": {"id": "u1", "roundStatus": "thinking"},
                "u2": {"id": "u2", "roundStatus": "solved"}
            }
        }));

        let room = frame.room().unwrap();
        assert_eq!(room.remaining_seconds(), Some(42));
        match &room.phase {
            RoomPhase::Running(running) => {
                assert_eq!(running.question.target, 24);
                assert_eq!(running.question.problem, vec![1, 3, 4, 6]);
                assert_eq!(running.turn.as_deref(), Some("u1"));
                assert_eq!(
                    running.players["u2"].round_status,
                    Some(RoundStatus::Solved)
                );
            }
            other => panic!("unexpected phase {other:?}"),
        }
    }

    #[test]
    fn test_countdowns_use_break_timer() {
        let lobby = Frame::decode(json!({"state": "lobby-countdown", "breakTimer": 5}));
        assert_eq!(lobby.room().unwrap().remaining_seconds(), Some(5));

        let next = Frame::decode(json!({"state": "next-round-countdown", "breakTimer": 3, "round": 1}));
        assert_eq!(next.state_name(), Some("next-round-countdown"));
        assert_eq!(next.room().unwrap().remaining_seconds(), Some(3));
    }

    #[test]
    fn test_missing_required_field_is_unrecognized() {
        let frame = Frame::decode(json!({"state": "running", "timer": 10}));
        assert!(!frame.is_recognized());
        assert_eq!(frame.state_name(), Some("running"));
        match frame {
            Frame::Unrecognized { reason, .. } => assert!(reason.contains("question")),
            Frame::Room(_) => panic!("running frame without question must not decode"),
        }
    }

    #[test]
    fn test_unknown_state_is_unrecognized() {
        let raw = json!({"state": "paused", "tick": 1});
        let frame = Frame::decode(raw.clone());

        assert_eq!(frame.state_name(), Some("paused"));
        match frame {
            Frame::Unrecognized { raw: kept, .. } => assert_eq!(kept, raw),
            Frame::Room(_) => panic!("unknown states must not decode"),
        }
    }

    #[test]
    fn test_newer_version_is_unrecognized() {
        let frame = Frame::decode(json!({"version": 2, "state": "waiting"}));
        match frame {
            Frame::Unrecognized { reason, .. } => assert!(reason.contains("version 2")),
            Frame::Room(_) => panic!("future frame versions must not decode"),
        }
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let frame = Frame::decode(json!({"state": "waiting", "confetti": true}));
        assert!(frame.is_recognized());
    }
}
