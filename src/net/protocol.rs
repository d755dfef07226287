//! JSON wire protocol between the gateway and clients.
//!
//! Every frame is a text envelope `{"type": ..., "payload": {...}}` with
//! camelCase payload fields. Unknown or malformed frames are a protocol
//! error: logged and dropped, never a reason to close the connection.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::command::{Command, CommandPayload};
use crate::game::model::{SlotIndex, StateDelta, StateSnapshot};

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Auth {
        player_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    JoinGame {
        game_id: Uuid,
        player_id: Uuid,
    },
    Command {
        #[serde(flatten)]
        payload: CommandPayload,
        /// Intended tick; the gateway stamps the next tick when omitted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tick: Option<u64>,
    },
    Ping {},
}

/// An AI command echoed inside `state_update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiAction {
    pub actor: Uuid,
    #[serde(flatten)]
    pub payload: CommandPayload,
}

impl AiAction {
    pub fn from_command(command: &Command) -> Self {
        Self {
            actor: command.source_player,
            payload: command.payload.clone(),
        }
    }
}

/// One entry of `game_ended.finalScores`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalScore {
    pub slot: SlotIndex,
    pub score: u32,
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Authenticated { player_id: Uuid },
    #[serde(rename_all = "camelCase")]
    GameStateInit {
        game_state: StateSnapshot,
        your_player_id: Uuid,
        your_slot: SlotIndex,
    },
    #[serde(rename_all = "camelCase")]
    StateUpdate {
        tick: u64,
        deltas: StateDelta,
        ai_actions: Vec<AiAction>,
    },
    /// Full-state resynchronization after missed deltas.
    #[serde(rename_all = "camelCase")]
    StateSync { game_state: StateSnapshot },
    #[serde(rename_all = "camelCase")]
    GameStarted { game_start_time: u64, seed: u64 },
    #[serde(rename_all = "camelCase")]
    PlayerJoined { player_id: Uuid, total_players: usize },
    #[serde(rename_all = "camelCase")]
    PlayerLeft { player_id: Uuid, remaining_players: usize },
    #[serde(rename_all = "camelCase")]
    GameEnded {
        final_scores: Vec<FinalScore>,
        #[serde(skip_serializing_if = "Option::is_none")]
        replay_id: Option<Uuid>,
        /// Session length in ticks.
        duration: u64,
    },
    Error { message: String },
    Pong {},
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Parse one inbound text frame.
pub fn decode(text: &str) -> Result<ClientMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Serialize one outbound frame.
pub fn encode(message: &ServerMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::vec2::Vec2;

    #[test]
    fn test_decode_auth() {
        let text = r#"{"type":"auth","payload":{"playerId":"00000000-0000-0000-0000-000000000001"}}"#;
        let message = decode(text).unwrap();
        assert_eq!(
            message,
            ClientMessage::Auth {
                player_id: Uuid::from_u128(1),
                token: None,
            }
        );
    }

    #[test]
    fn test_decode_command_with_flattened_payload() {
        let text = r#"{
            "type": "command",
            "payload": {
                "commandType": "move",
                "unitIds": [4, 5],
                "position": {"x": 12.0, "y": 8.5},
                "tick": 42
            }
        }"#;
        let message = decode(text).unwrap();
        match message {
            ClientMessage::Command { payload, tick } => {
                assert_eq!(tick, Some(42));
                assert_eq!(
                    payload,
                    CommandPayload::Move {
                        unit_ids: vec![4, 5],
                        position: Vec2::new(12.0, 8.5),
                    }
                );
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        assert!(decode(r#"{"type":"teleport","payload":{}}"#).is_err());
        assert!(decode("not json").is_err());
    }

    #[test]
    fn test_encode_state_update_shape() {
        let message = ServerMessage::StateUpdate {
            tick: 7,
            deltas: StateDelta {
                tick: 7,
                base_tick: 6,
                changed: vec![],
                removed: vec![3],
                players: vec![],
            },
            ai_actions: vec![AiAction {
                actor: Uuid::from_u128(9),
                payload: CommandPayload::BuildUnit {
                    building_id: 2,
                    unit_type: crate::game::command::UnitType::Soldier,
                },
            }],
        };

        let json: serde_json::Value =
            serde_json::from_str(&encode(&message).unwrap()).unwrap();
        assert_eq!(json["type"], "state_update");
        assert_eq!(json["payload"]["tick"], 7);
        assert_eq!(json["payload"]["deltas"]["baseTick"], 6);
        assert_eq!(json["payload"]["deltas"]["removed"][0], 3);
        let action = &json["payload"]["aiActions"][0];
        assert_eq!(action["commandType"], "build_unit");
        assert_eq!(action["unitType"], "soldier");
        assert!(action["actor"].is_string());
    }

    #[test]
    fn test_encode_game_ended_shape() {
        let message = ServerMessage::GameEnded {
            final_scores: vec![
                FinalScore { slot: 0, score: 410 },
                FinalScore { slot: 1, score: 200 },
            ],
            replay_id: Some(Uuid::from_u128(5)),
            duration: 5400,
        };
        let json: serde_json::Value =
            serde_json::from_str(&encode(&message).unwrap()).unwrap();
        assert_eq!(json["type"], "game_ended");
        assert_eq!(json["payload"]["finalScores"][0]["score"], 410);
        assert!(json["payload"]["replayId"].is_string());
        assert_eq!(json["payload"]["duration"], 5400);
    }

    #[test]
    fn test_ping_pong_round_trip() {
        let ping = decode(r#"{"type":"ping","payload":{}}"#).unwrap();
        assert_eq!(ping, ClientMessage::Ping {});

        let pong = encode(&ServerMessage::Pong {}).unwrap();
        let json: serde_json::Value = serde_json::from_str(&pong).unwrap();
        assert_eq!(json["type"], "pong");
    }
}
