//! Capability interface over the game state model.
//!
//! The session authority never depends on a concrete simulation type, only
//! on this trait: execute a command, advance one tick, produce a snapshot,
//! produce deltas since a broadcast tick. The reference implementation lives
//! in [`crate::game::rts`].

use serde::{Deserialize, Serialize};

use crate::game::command::CommandPayload;
use crate::util::vec2::Vec2;

/// Stable identifier for an entity inside one session's model.
pub type EntityId = u64;

/// Small integer slot index identifying a participant within the model.
pub type SlotIndex = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Worker,
    Soldier,
    CommandPost,
    Barracks,
    SupplyDepot,
    ResourceNode,
}

impl EntityKind {
    pub fn is_mobile(&self) -> bool {
        matches!(self, EntityKind::Worker | EntityKind::Soldier)
    }

    pub fn is_building(&self) -> bool {
        matches!(
            self,
            EntityKind::CommandPost | EntityKind::Barracks | EntityKind::SupplyDepot
        )
    }
}

/// Full serializable record for one entity. Used both in snapshots and as
/// the changed-entity unit inside deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub id: EntityId,
    /// `None` for neutral entities (resource nodes).
    pub owner: Option<SlotIndex>,
    pub kind: EntityKind,
    pub position: Vec2,
    pub health: f32,
    pub max_health: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_position: Option<Vec2>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_entity: Option<EntityId>,
    /// Remaining stock for resource nodes, zero otherwise.
    pub resources_remaining: u32,
}

/// Per-slot resources and supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotEconomy {
    pub slot: SlotIndex,
    pub resources: u32,
    pub supply_used: u32,
    pub supply_cap: u32,
    pub eliminated: bool,
    /// Cumulative resources gathered, used for final scores.
    pub total_gathered: u32,
}

/// A full, serializable copy of session-visible state at a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub tick: u64,
    pub map_size: u32,
    pub entities: Vec<EntityRecord>,
    pub players: Vec<SlotEconomy>,
}

/// Minimal set of changed-entity records since a previous broadcast tick.
/// Always computed relative to the last broadcast, never an arbitrary
/// baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDelta {
    pub tick: u64,
    pub base_tick: u64,
    pub changed: Vec<EntityRecord>,
    pub removed: Vec<EntityId>,
    pub players: Vec<SlotEconomy>,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

/// What an AI runner is allowed to see about the world for one slot.
#[derive(Debug, Clone, Default)]
pub struct SlotObservation {
    pub slot: SlotIndex,
    pub resources: u32,
    pub supply_used: u32,
    pub supply_cap: u32,
    /// Owned mobile units.
    pub units: Vec<UnitObservation>,
    /// Owned production buildings (barracks and command posts).
    pub production: Vec<(EntityId, EntityKind)>,
    /// Positions of owned command posts.
    pub bases: Vec<Vec2>,
    /// Opposing mobile units and military buildings.
    pub enemies: Vec<EnemyObservation>,
    /// Non-depleted resource nodes.
    pub resource_nodes: Vec<(EntityId, Vec2)>,
}

#[derive(Debug, Clone, Copy)]
pub struct UnitObservation {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: Vec2,
    pub health_frac: f32,
    /// No movement, attack, or gather order outstanding.
    pub idle: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct EnemyObservation {
    pub id: EntityId,
    pub position: Vec2,
    /// Combat weight of this entity (soldiers count more than workers).
    pub strength: f32,
}

/// Internal model failures. Game-rule rejections (can't afford, bad target)
/// are silent no-ops and never surface here.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    #[error("slot {0} has no record in the model")]
    UnknownSlot(SlotIndex),
}

/// The capability interface the session authority consumes.
///
/// One instance per session, exclusively owned by that session's tick loop.
pub trait GameModel: Send {
    /// Register a participant and spawn its starting entities.
    fn add_slot(&mut self, slot: SlotIndex) -> Result<(), ModelError>;

    /// Mark a slot eliminated. Its entities stop acting; the slot index
    /// stays valid so in-flight commands resolve cleanly.
    fn eliminate_slot(&mut self, slot: SlotIndex) -> Result<(), ModelError>;

    /// Apply one command for a slot. Game-rule violations are silent no-ops.
    fn execute_command(&mut self, slot: SlotIndex, payload: &CommandPayload)
        -> Result<(), ModelError>;

    /// Advance the simulation by one tick.
    fn advance_tick(&mut self);

    /// Current model tick (increments on `advance_tick`).
    fn tick(&self) -> u64;

    /// Full state copy at the current tick.
    fn snapshot(&self) -> StateSnapshot;

    /// Changes since `base_tick` (exclusive) up to the current tick.
    /// Deltas are always requested against the last broadcast tick, so the
    /// model may discard removal bookkeeping at or before `base_tick`.
    fn deltas_since(&mut self, base_tick: u64) -> StateDelta;

    /// Observation for an AI runner. `None` when the slot has no record
    /// (e.g. mid-teardown).
    fn observe(&self, slot: SlotIndex) -> Option<SlotObservation>;

    /// Final score per slot, for `game_ended`.
    fn final_scores(&self) -> Vec<(SlotIndex, u32)>;
}
