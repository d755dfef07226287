//! Player and AI commands with their deterministic ordering key.
//!
//! A command is immutable once enqueued. The ordering key
//! `(session_tick, enqueued_at_micros, source_player)` gives a single total
//! order for every command in a session, identical on every machine that
//! replays the same command log.

use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::model::EntityId;
use crate::util::vec2::Vec2;

/// Unit kinds the reference model knows how to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    Worker,
    Soldier,
}

/// Building kinds the reference model knows how to place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildingType {
    CommandPost,
    Barracks,
    SupplyDepot,
}

/// The action a command requests. Shapes match the wire payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "commandType", rename_all = "snake_case")]
pub enum CommandPayload {
    Move {
        #[serde(rename = "unitIds")]
        unit_ids: Vec<EntityId>,
        position: Vec2,
    },
    Attack {
        #[serde(rename = "unitIds")]
        unit_ids: Vec<EntityId>,
        #[serde(rename = "targetId")]
        target_id: EntityId,
    },
    Gather {
        #[serde(rename = "unitIds")]
        unit_ids: Vec<EntityId>,
        #[serde(rename = "resourceId")]
        resource_id: EntityId,
    },
    BuildUnit {
        #[serde(rename = "buildingId")]
        building_id: EntityId,
        #[serde(rename = "unitType")]
        unit_type: UnitType,
    },
    BuildBuilding {
        #[serde(rename = "buildingType")]
        building_type: BuildingType,
        position: Vec2,
    },
}

impl CommandPayload {
    /// Short name used for logging and replay records.
    pub fn kind(&self) -> &'static str {
        match self {
            CommandPayload::Move { .. } => "move",
            CommandPayload::Attack { .. } => "attack",
            CommandPayload::Gather { .. } => "gather",
            CommandPayload::BuildUnit { .. } => "build_unit",
            CommandPayload::BuildBuilding { .. } => "build_building",
        }
    }
}

/// A single intended action from a player or AI runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// External identity of the issuing player (human or synthetic).
    pub source_player: Uuid,
    /// The tick this command is intended to apply at.
    pub session_tick: u64,
    pub payload: CommandPayload,
    /// Wall-clock receipt time, microseconds since the Unix epoch.
    pub enqueued_at_micros: u64,
}

impl Command {
    pub fn new(source_player: Uuid, session_tick: u64, payload: CommandPayload) -> Self {
        Self {
            source_player,
            session_tick,
            payload,
            enqueued_at_micros: wall_clock_micros(),
        }
    }

    /// Construct with an explicit timestamp (replays and tests).
    pub fn with_timestamp(
        source_player: Uuid,
        session_tick: u64,
        payload: CommandPayload,
        enqueued_at_micros: u64,
    ) -> Self {
        Self {
            source_player,
            session_tick,
            payload,
            enqueued_at_micros,
        }
    }

    /// The deterministic ordering key: tick, then receipt time, then player.
    #[inline]
    pub fn ordering_key(&self) -> (u64, u64, Uuid) {
        (self.session_tick, self.enqueued_at_micros, self.source_player)
    }

    pub fn cmp_order(&self, other: &Command) -> Ordering {
        self.ordering_key().cmp(&other.ordering_key())
    }
}

/// Current wall clock in microseconds since the Unix epoch.
pub fn wall_clock_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
