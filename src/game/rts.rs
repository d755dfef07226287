//! Reference game state model.
//!
//! A deliberately small RTS simulation implementing [`GameModel`]: workers
//! gather from resource nodes, barracks and command posts produce units,
//! soldiers fight. It exists to exercise the session authority (commands,
//! deltas, AI readings, replay determinism), not to be a balanced game.
//!
//! Determinism: entities live in a `BTreeMap` and every per-tick pass walks
//! them in ascending id order; the only randomness is the seeded map jitter,
//! so identical seeds plus identical command logs reproduce identical state.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::game::command::{BuildingType, CommandPayload, UnitType};
use crate::game::constants::rules;
use crate::game::model::{
    EnemyObservation, EntityId, EntityKind, EntityRecord, GameModel, ModelError, SlotEconomy,
    SlotIndex, SlotObservation, StateDelta, StateSnapshot, UnitObservation,
};
use crate::util::vec2::Vec2;

/// Base anchor points as fractions of the map edge, indexed by slot.
const BASE_ANCHORS: [(f32, f32); 8] = [
    (0.15, 0.15),
    (0.85, 0.85),
    (0.15, 0.85),
    (0.85, 0.15),
    (0.50, 0.10),
    (0.50, 0.90),
    (0.10, 0.50),
    (0.90, 0.50),
];

#[derive(Debug, Clone)]
struct Entity {
    id: EntityId,
    owner: Option<SlotIndex>,
    kind: EntityKind,
    position: Vec2,
    health: f32,
    max_health: f32,
    target_position: Option<Vec2>,
    target_entity: Option<EntityId>,
    gather_target: Option<EntityId>,
    resources_remaining: u32,
    last_modified: u64,
}

impl Entity {
    fn to_record(&self) -> EntityRecord {
        EntityRecord {
            id: self.id,
            owner: self.owner,
            kind: self.kind,
            position: self.position,
            health: self.health,
            max_health: self.max_health,
            target_position: self.target_position,
            target_entity: self.target_entity,
            resources_remaining: self.resources_remaining,
        }
    }

    fn speed(&self) -> f32 {
        match self.kind {
            EntityKind::Worker => rules::WORKER_SPEED,
            EntityKind::Soldier => rules::SOLDIER_SPEED,
            _ => 0.0,
        }
    }

    fn damage(&self) -> f32 {
        match self.kind {
            EntityKind::Soldier => rules::SOLDIER_DAMAGE,
            EntityKind::Worker => rules::WORKER_DAMAGE,
            _ => 0.0,
        }
    }

    fn supply_cost(&self) -> u32 {
        match self.kind {
            EntityKind::Worker => rules::WORKER_SUPPLY,
            EntityKind::Soldier => rules::SOLDIER_SUPPLY,
            _ => 0,
        }
    }

    fn strength(&self) -> f32 {
        match self.kind {
            EntityKind::Soldier => 2.0,
            EntityKind::Worker => 0.5,
            EntityKind::Barracks => 1.0,
            _ => 0.0,
        }
    }
}

/// Reference RTS model. One instance per session, owned by its tick loop.
pub struct RtsModel {
    tick: u64,
    map_size: u32,
    next_entity_id: EntityId,
    entities: BTreeMap<EntityId, Entity>,
    economies: BTreeMap<SlotIndex, SlotEconomy>,
    /// `(removal_tick, id)` kept for delta computation; entries at or before
    /// the requested base tick are pruned by `deltas_since`.
    removed: Vec<(u64, EntityId)>,
    /// Slots whose economy changed, with the tick of the change.
    economy_modified: BTreeMap<SlotIndex, u64>,
    rng: StdRng,
}

impl RtsModel {
    pub fn new(map_size: u32, seed: u64) -> Self {
        Self {
            tick: 0,
            map_size,
            next_entity_id: 1,
            entities: BTreeMap::new(),
            economies: BTreeMap::new(),
            removed: Vec::new(),
            economy_modified: BTreeMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn map_size(&self) -> u32 {
        self.map_size
    }

    fn map_max(&self) -> Vec2 {
        Vec2::new(self.map_size as f32, self.map_size as f32)
    }

    fn spawn(&mut self, owner: Option<SlotIndex>, kind: EntityKind, position: Vec2) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;

        let (health, resources) = match kind {
            EntityKind::Worker => (rules::WORKER_HEALTH, 0),
            EntityKind::Soldier => (rules::SOLDIER_HEALTH, 0),
            EntityKind::CommandPost => (rules::POST_HEALTH, 0),
            EntityKind::Barracks => (rules::BARRACKS_HEALTH, 0),
            EntityKind::SupplyDepot => (rules::DEPOT_HEALTH, 0),
            EntityKind::ResourceNode => (1.0, rules::NODE_STOCK),
        };

        self.entities.insert(
            id,
            Entity {
                id,
                owner,
                kind,
                position: position.clamp_to(Vec2::ZERO, self.map_max()),
                health,
                max_health: health,
                target_position: None,
                target_entity: None,
                gather_target: None,
                resources_remaining: resources,
                last_modified: self.tick,
            },
        );
        id
    }

    fn economy_mut(&mut self, slot: SlotIndex) -> Option<&mut SlotEconomy> {
        let tick = self.tick;
        self.economy_modified.insert(slot, tick);
        self.economies.get_mut(&slot)
    }

    fn touch(&mut self, id: EntityId) {
        let tick = self.tick;
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.last_modified = tick;
        }
    }

    fn owned_unit_ids(&self, slot: SlotIndex, ids: &[EntityId]) -> Vec<EntityId> {
        ids.iter()
            .copied()
            .filter(|id| {
                self.entities
                    .get(id)
                    .map(|e| e.owner == Some(slot) && e.kind.is_mobile())
                    .unwrap_or(false)
            })
            .collect()
    }

    fn economies_vec(&self) -> Vec<SlotEconomy> {
        self.economies.values().copied().collect()
    }

    fn remove_entity(&mut self, id: EntityId) {
        if let Some(entity) = self.entities.remove(&id) {
            if let Some(owner) = entity.owner {
                let supply = entity.supply_cost();
                if supply > 0 {
                    if let Some(eco) = self.economy_mut(owner) {
                        eco.supply_used = eco.supply_used.saturating_sub(supply);
                    }
                }
            }
            self.removed.push((self.tick, id));
        }
    }

    /// Movement, gathering, and combat for one tick, resolved in ascending
    /// id order so replays stay byte-identical.
    fn resolve_units(&mut self) {
        let map_max = self.map_max();
        let ids: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| e.kind.is_mobile())
            .map(|e| e.id)
            .collect();

        let mut damage: BTreeMap<EntityId, f32> = BTreeMap::new();
        let mut gathered: BTreeMap<SlotIndex, u32> = BTreeMap::new();

        for id in ids {
            let Some(unit) = self.entities.get(&id) else { continue };
            if unit
                .owner
                .and_then(|o| self.economies.get(&o))
                .map(|eco| eco.eliminated)
                .unwrap_or(true)
            {
                continue;
            }

            let position = unit.position;
            let speed = unit.speed();
            let dmg = unit.damage();

            // Attack target takes priority over gather and plain movement.
            if let Some(target_id) = unit.target_entity {
                match self.entities.get(&target_id) {
                    Some(target) if target.health > 0.0 => {
                        let target_pos = target.position;
                        if position.distance_to(target_pos) <= rules::ATTACK_RANGE {
                            *damage.entry(target_id).or_insert(0.0) += dmg;
                        } else {
                            let stepped = position.step_toward(target_pos, speed);
                            if let Some(unit) = self.entities.get_mut(&id) {
                                unit.position = stepped.clamp_to(Vec2::ZERO, map_max);
                            }
                            self.touch(id);
                        }
                    }
                    _ => {
                        if let Some(unit) = self.entities.get_mut(&id) {
                            unit.target_entity = None;
                        }
                        self.touch(id);
                    }
                }
                continue;
            }

            if let Some(node_id) = unit.gather_target {
                let node = self
                    .entities
                    .get(&node_id)
                    .filter(|n| n.kind == EntityKind::ResourceNode && n.resources_remaining > 0);
                match node {
                    Some(node) => {
                        let node_pos = node.position;
                        if position.distance_to(node_pos) <= rules::GATHER_RANGE {
                            if let Some(owner) = unit.owner {
                                let take = rules::GATHER_RATE
                                    .min(self.entities[&node_id].resources_remaining);
                                if let Some(node) = self.entities.get_mut(&node_id) {
                                    node.resources_remaining -= take;
                                }
                                self.touch(node_id);
                                *gathered.entry(owner).or_insert(0) += take;
                            }
                        } else {
                            let stepped = position.step_toward(node_pos, speed);
                            if let Some(unit) = self.entities.get_mut(&id) {
                                unit.position = stepped.clamp_to(Vec2::ZERO, map_max);
                            }
                            self.touch(id);
                        }
                    }
                    None => {
                        if let Some(unit) = self.entities.get_mut(&id) {
                            unit.gather_target = None;
                        }
                        self.touch(id);
                    }
                }
                continue;
            }

            if let Some(target_pos) = unit.target_position {
                let stepped = position.step_toward(target_pos, speed);
                if let Some(unit) = self.entities.get_mut(&id) {
                    unit.position = stepped.clamp_to(Vec2::ZERO, map_max);
                    if unit.position == target_pos {
                        unit.target_position = None;
                    }
                }
                self.touch(id);
            }
        }

        // Apply accumulated damage, then sweep the dead and empty nodes.
        for (id, amount) in damage {
            if let Some(entity) = self.entities.get_mut(&id) {
                entity.health -= amount;
            }
            self.touch(id);
        }

        let dead: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| {
                e.health <= 0.0
                    || (e.kind == EntityKind::ResourceNode && e.resources_remaining == 0)
            })
            .map(|e| e.id)
            .collect();
        for id in dead {
            self.remove_entity(id);
        }

        for (slot, amount) in gathered {
            if let Some(eco) = self.economy_mut(slot) {
                eco.resources += amount;
                eco.total_gathered += amount;
            }
        }
    }

    /// A slot that has lost its last command post is eliminated.
    fn check_eliminations(&mut self) {
        let slots: Vec<SlotIndex> = self
            .economies
            .values()
            .filter(|e| !e.eliminated)
            .map(|e| e.slot)
            .collect();
        for slot in slots {
            let has_post = self
                .entities
                .values()
                .any(|e| e.owner == Some(slot) && e.kind == EntityKind::CommandPost);
            if !has_post {
                debug!(slot, "slot lost its last command post, eliminating");
                if let Some(eco) = self.economy_mut(slot) {
                    eco.eliminated = true;
                }
            }
        }
    }

    fn apply_move(&mut self, slot: SlotIndex, unit_ids: &[EntityId], position: Vec2) {
        let clamped = position.clamp_to(Vec2::ZERO, self.map_max());
        for id in self.owned_unit_ids(slot, unit_ids) {
            if let Some(unit) = self.entities.get_mut(&id) {
                unit.target_position = Some(clamped);
                unit.target_entity = None;
                unit.gather_target = None;
            }
            self.touch(id);
        }
    }

    fn apply_attack(&mut self, slot: SlotIndex, unit_ids: &[EntityId], target_id: EntityId) {
        let valid_target = self
            .entities
            .get(&target_id)
            .map(|t| t.owner.is_some() && t.owner != Some(slot))
            .unwrap_or(false);
        if !valid_target {
            debug!(slot, target_id, "attack command with invalid target, ignored");
            return;
        }
        for id in self.owned_unit_ids(slot, unit_ids) {
            if let Some(unit) = self.entities.get_mut(&id) {
                unit.target_entity = Some(target_id);
                unit.target_position = None;
                unit.gather_target = None;
            }
            self.touch(id);
        }
    }

    fn apply_gather(&mut self, slot: SlotIndex, unit_ids: &[EntityId], resource_id: EntityId) {
        let valid_node = self
            .entities
            .get(&resource_id)
            .map(|n| n.kind == EntityKind::ResourceNode && n.resources_remaining > 0)
            .unwrap_or(false);
        if !valid_node {
            debug!(slot, resource_id, "gather command with invalid node, ignored");
            return;
        }
        for id in self.owned_unit_ids(slot, unit_ids) {
            let is_worker = self
                .entities
                .get(&id)
                .map(|u| u.kind == EntityKind::Worker)
                .unwrap_or(false);
            if !is_worker {
                continue;
            }
            if let Some(unit) = self.entities.get_mut(&id) {
                unit.gather_target = Some(resource_id);
                unit.target_position = None;
                unit.target_entity = None;
            }
            self.touch(id);
        }
    }

    fn apply_build_unit(&mut self, slot: SlotIndex, building_id: EntityId, unit_type: UnitType) {
        let Some(building) = self.entities.get(&building_id) else {
            return;
        };
        if building.owner != Some(slot) {
            return;
        }

        let (required, kind, cost, supply) = match unit_type {
            UnitType::Worker => (
                EntityKind::CommandPost,
                EntityKind::Worker,
                rules::WORKER_COST,
                rules::WORKER_SUPPLY,
            ),
            UnitType::Soldier => (
                EntityKind::Barracks,
                EntityKind::Soldier,
                rules::SOLDIER_COST,
                rules::SOLDIER_SUPPLY,
            ),
        };
        if building.kind != required {
            debug!(slot, building_id, "build_unit from wrong building kind, ignored");
            return;
        }
        let rally = building.position + Vec2::new(1.5, 1.5);

        let affordable = self
            .economies
            .get(&slot)
            .map(|eco| eco.resources >= cost && eco.supply_used + supply <= eco.supply_cap)
            .unwrap_or(false);
        if !affordable {
            return;
        }

        if let Some(eco) = self.economy_mut(slot) {
            eco.resources -= cost;
            eco.supply_used += supply;
        }
        self.spawn(Some(slot), kind, rally);
    }

    fn apply_build_building(
        &mut self,
        slot: SlotIndex,
        building_type: BuildingType,
        position: Vec2,
    ) {
        let (kind, cost, supply_grant) = match building_type {
            BuildingType::CommandPost => {
                (EntityKind::CommandPost, rules::POST_COST, rules::POST_SUPPLY)
            }
            BuildingType::Barracks => (EntityKind::Barracks, rules::BARRACKS_COST, 0),
            BuildingType::SupplyDepot => {
                (EntityKind::SupplyDepot, rules::DEPOT_COST, rules::DEPOT_SUPPLY)
            }
        };

        let affordable = self
            .economies
            .get(&slot)
            .map(|eco| eco.resources >= cost)
            .unwrap_or(false);
        if !affordable {
            return;
        }

        if let Some(eco) = self.economy_mut(slot) {
            eco.resources -= cost;
            eco.supply_cap += supply_grant;
        }
        self.spawn(Some(slot), kind, position);
    }
}

#[cfg(test)]
impl RtsModel {
    /// Set a unit's health to a fraction of its maximum.
    pub(crate) fn wound_unit_for_test(&mut self, id: EntityId, health_frac: f32) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.health = entity.max_health * health_frac;
        }
        self.touch(id);
    }
}

impl GameModel for RtsModel {
    fn add_slot(&mut self, slot: SlotIndex) -> Result<(), ModelError> {
        if self.economies.contains_key(&slot) {
            return Ok(());
        }

        let anchor = BASE_ANCHORS[slot as usize % BASE_ANCHORS.len()];
        let m = self.map_size as f32;
        let base = Vec2::new(anchor.0 * m, anchor.1 * m);

        self.economies.insert(
            slot,
            SlotEconomy {
                slot,
                resources: rules::START_RESOURCES,
                supply_used: rules::START_WORKERS * rules::WORKER_SUPPLY,
                supply_cap: rules::POST_SUPPLY,
                eliminated: false,
                total_gathered: 0,
            },
        );
        self.economy_modified.insert(slot, self.tick);

        self.spawn(Some(slot), EntityKind::CommandPost, base);
        for i in 0..rules::START_WORKERS {
            let offset = Vec2::new(1.0 + i as f32 * 0.5, 1.5);
            self.spawn(Some(slot), EntityKind::Worker, base + offset);
        }

        // Two resource nodes near the base with a little seeded jitter.
        for _ in 0..2 {
            let jitter = Vec2::new(
                self.rng.gen_range(-2.0..2.0),
                self.rng.gen_range(-2.0..2.0),
            );
            let toward_center = (Vec2::new(m / 2.0, m / 2.0) - base).normalize() * 5.0;
            self.spawn(None, EntityKind::ResourceNode, base + toward_center + jitter);
        }

        Ok(())
    }

    fn eliminate_slot(&mut self, slot: SlotIndex) -> Result<(), ModelError> {
        match self.economy_mut(slot) {
            Some(eco) => {
                eco.eliminated = true;
                Ok(())
            }
            None => Err(ModelError::UnknownSlot(slot)),
        }
    }

    fn execute_command(
        &mut self,
        slot: SlotIndex,
        payload: &CommandPayload,
    ) -> Result<(), ModelError> {
        let eliminated = match self.economies.get(&slot) {
            Some(eco) => eco.eliminated,
            None => return Err(ModelError::UnknownSlot(slot)),
        };
        if eliminated {
            // Commands in flight for a just-eliminated slot resolve to no-ops.
            return Ok(());
        }

        match payload {
            CommandPayload::Move { unit_ids, position } => {
                self.apply_move(slot, unit_ids, *position)
            }
            CommandPayload::Attack { unit_ids, target_id } => {
                self.apply_attack(slot, unit_ids, *target_id)
            }
            CommandPayload::Gather {
                unit_ids,
                resource_id,
            } => self.apply_gather(slot, unit_ids, *resource_id),
            CommandPayload::BuildUnit {
                building_id,
                unit_type,
            } => self.apply_build_unit(slot, *building_id, *unit_type),
            CommandPayload::BuildBuilding {
                building_type,
                position,
            } => self.apply_build_building(slot, *building_type, *position),
        }
        Ok(())
    }

    fn advance_tick(&mut self) {
        self.tick += 1;
        self.resolve_units();
        self.check_eliminations();
    }

    fn tick(&self) -> u64 {
        self.tick
    }

    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            tick: self.tick,
            map_size: self.map_size,
            entities: self.entities.values().map(Entity::to_record).collect(),
            players: self.economies_vec(),
        }
    }

    fn deltas_since(&mut self, base_tick: u64) -> StateDelta {
        let changed = self
            .entities
            .values()
            .filter(|e| e.last_modified > base_tick)
            .map(Entity::to_record)
            .collect();
        let removed: Vec<EntityId> = self
            .removed
            .iter()
            .filter(|(tick, _)| *tick > base_tick)
            .map(|(_, id)| *id)
            .collect();
        // Older removals can never appear in a future delta again.
        self.removed.retain(|(tick, _)| *tick > base_tick);
        let players = self
            .economies
            .values()
            .filter(|eco| {
                self.economy_modified
                    .get(&eco.slot)
                    .map(|t| *t > base_tick)
                    .unwrap_or(false)
            })
            .copied()
            .collect();
        StateDelta {
            tick: self.tick,
            base_tick,
            changed,
            removed,
            players,
        }
    }

    fn observe(&self, slot: SlotIndex) -> Option<SlotObservation> {
        let eco = self.economies.get(&slot)?;

        let mut obs = SlotObservation {
            slot,
            resources: eco.resources,
            supply_used: eco.supply_used,
            supply_cap: eco.supply_cap,
            ..Default::default()
        };

        for entity in self.entities.values() {
            match entity.owner {
                Some(owner) if owner == slot => {
                    if entity.kind.is_mobile() {
                        obs.units.push(UnitObservation {
                            id: entity.id,
                            kind: entity.kind,
                            position: entity.position,
                            health_frac: (entity.health / entity.max_health).max(0.0),
                            idle: entity.target_position.is_none()
                                && entity.target_entity.is_none()
                                && entity.gather_target.is_none(),
                        });
                    }
                    match entity.kind {
                        EntityKind::CommandPost => {
                            obs.bases.push(entity.position);
                            obs.production.push((entity.id, entity.kind));
                        }
                        EntityKind::Barracks => obs.production.push((entity.id, entity.kind)),
                        _ => {}
                    }
                }
                Some(_) => {
                    let strength = entity.strength();
                    if strength > 0.0 {
                        obs.enemies.push(EnemyObservation {
                            id: entity.id,
                            position: entity.position,
                            strength,
                        });
                    }
                }
                None => {
                    if entity.kind == EntityKind::ResourceNode && entity.resources_remaining > 0 {
                        obs.resource_nodes.push((entity.id, entity.position));
                    }
                }
            }
        }

        Some(obs)
    }

    fn final_scores(&self) -> Vec<(SlotIndex, u32)> {
        self.economies
            .values()
            .map(|eco| (eco.slot, eco.total_gathered))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_with_two_slots() -> RtsModel {
        let mut model = RtsModel::new(64, 42);
        model.add_slot(0).unwrap();
        model.add_slot(1).unwrap();
        model
    }

    fn worker_ids(model: &RtsModel, slot: SlotIndex) -> Vec<EntityId> {
        model
            .entities
            .values()
            .filter(|e| e.owner == Some(slot) && e.kind == EntityKind::Worker)
            .map(|e| e.id)
            .collect()
    }

    #[test]
    fn test_add_slot_spawns_base_and_workers() {
        let model = model_with_two_slots();
        let snapshot = model.snapshot();

        let posts = snapshot
            .entities
            .iter()
            .filter(|e| e.kind == EntityKind::CommandPost)
            .count();
        assert_eq!(posts, 2);
        assert_eq!(worker_ids(&model, 0).len(), rules::START_WORKERS as usize);
        assert_eq!(snapshot.players.len(), 2);
        assert_eq!(snapshot.players[0].resources, rules::START_RESOURCES);
    }

    #[test]
    fn test_move_sets_target_and_unit_advances() {
        let mut model = model_with_two_slots();
        let workers = worker_ids(&model, 0);
        let target = Vec2::new(32.0, 32.0);

        model
            .execute_command(
                0,
                &CommandPayload::Move {
                    unit_ids: workers.clone(),
                    position: target,
                },
            )
            .unwrap();

        let before = model.entities[&workers[0]].position;
        model.advance_tick();
        let unit = &model.entities[&workers[0]];
        assert_eq!(unit.target_position, Some(target));
        assert!(unit.position.distance_to(target) < before.distance_to(target));
    }

    #[test]
    fn test_cannot_command_foreign_units() {
        let mut model = model_with_two_slots();
        let enemy_workers = worker_ids(&model, 1);

        model
            .execute_command(
                0,
                &CommandPayload::Move {
                    unit_ids: enemy_workers.clone(),
                    position: Vec2::new(1.0, 1.0),
                },
            )
            .unwrap();

        assert_eq!(model.entities[&enemy_workers[0]].target_position, None);
    }

    #[test]
    fn test_build_unit_deducts_cost_and_respects_supply() {
        let mut model = model_with_two_slots();
        let post = model
            .entities
            .values()
            .find(|e| e.owner == Some(0) && e.kind == EntityKind::CommandPost)
            .map(|e| e.id)
            .unwrap();

        let before = model.economies[&0].resources;
        model
            .execute_command(
                0,
                &CommandPayload::BuildUnit {
                    building_id: post,
                    unit_type: UnitType::Worker,
                },
            )
            .unwrap();
        assert_eq!(model.economies[&0].resources, before - rules::WORKER_COST);
        assert_eq!(
            worker_ids(&model, 0).len(),
            rules::START_WORKERS as usize + 1
        );

        // Exhaust supply: the cap is POST_SUPPLY; further builds are no-ops.
        while model.economies[&0].supply_used + rules::WORKER_SUPPLY
            <= model.economies[&0].supply_cap
        {
            let eco = model.economies.get_mut(&0).unwrap();
            eco.resources += rules::WORKER_COST;
            model
                .execute_command(
                    0,
                    &CommandPayload::BuildUnit {
                        building_id: post,
                        unit_type: UnitType::Worker,
                    },
                )
                .unwrap();
        }
        let count = worker_ids(&model, 0).len();
        model
            .execute_command(
                0,
                &CommandPayload::BuildUnit {
                    building_id: post,
                    unit_type: UnitType::Worker,
                },
            )
            .unwrap();
        assert_eq!(worker_ids(&model, 0).len(), count);
    }

    #[test]
    fn test_unaffordable_building_is_silent_noop() {
        let mut model = model_with_two_slots();
        model.economies.get_mut(&0).unwrap().resources = 0;

        model
            .execute_command(
                0,
                &CommandPayload::BuildBuilding {
                    building_type: BuildingType::Barracks,
                    position: Vec2::new(10.0, 10.0),
                },
            )
            .unwrap();

        let barracks = model
            .entities
            .values()
            .filter(|e| e.kind == EntityKind::Barracks)
            .count();
        assert_eq!(barracks, 0);
    }

    #[test]
    fn test_gather_transfers_resources() {
        let mut model = model_with_two_slots();
        let workers = worker_ids(&model, 0);
        let node = model
            .entities
            .values()
            .find(|e| e.kind == EntityKind::ResourceNode)
            .map(|e| e.id)
            .unwrap();

        model
            .execute_command(
                0,
                &CommandPayload::Gather {
                    unit_ids: workers,
                    resource_id: node,
                },
            )
            .unwrap();

        let before = model.economies[&0].resources;
        for _ in 0..400 {
            model.advance_tick();
        }
        assert!(model.economies[&0].resources > before);
        assert!(model.economies[&0].total_gathered > 0);
    }

    #[test]
    fn test_combat_kills_and_frees_supply() {
        let mut model = model_with_two_slots();
        // Hand slot 0 a soldier right next to an enemy worker.
        let victim = worker_ids(&model, 1)[0];
        let victim_pos = model.entities[&victim].position;
        let soldier = model.spawn(Some(0), EntityKind::Soldier, victim_pos);
        model.economies.get_mut(&0).unwrap().supply_used += rules::SOLDIER_SUPPLY;

        model
            .execute_command(
                0,
                &CommandPayload::Attack {
                    unit_ids: vec![soldier],
                    target_id: victim,
                },
            )
            .unwrap();

        let supply_before = model.economies[&1].supply_used;
        let ticks_to_kill = (rules::WORKER_HEALTH / rules::SOLDIER_DAMAGE) as u32 + 2;
        for _ in 0..ticks_to_kill {
            model.advance_tick();
        }

        assert!(!model.entities.contains_key(&victim));
        assert_eq!(
            model.economies[&1].supply_used,
            supply_before - rules::WORKER_SUPPLY
        );
    }

    #[test]
    fn test_losing_last_post_eliminates_slot() {
        let mut model = model_with_two_slots();
        let post = model
            .entities
            .values()
            .find(|e| e.owner == Some(1) && e.kind == EntityKind::CommandPost)
            .map(|e| e.id)
            .unwrap();
        model.entities.get_mut(&post).unwrap().health = 0.0;

        model.advance_tick();

        assert!(model.economies[&1].eliminated);
    }

    #[test]
    fn test_deltas_relative_to_base_tick() {
        let mut model = model_with_two_slots();
        let workers = worker_ids(&model, 0);
        model
            .execute_command(
                0,
                &CommandPayload::Move {
                    unit_ids: workers.clone(),
                    position: Vec2::new(40.0, 40.0),
                },
            )
            .unwrap();

        model.advance_tick();
        let base = model.tick();
        model.advance_tick();

        let delta = model.deltas_since(base);
        assert_eq!(delta.base_tick, base);
        assert_eq!(delta.tick, base + 1);
        // Only the moving workers changed between the two ticks.
        let changed_ids: Vec<EntityId> = delta.changed.iter().map(|e| e.id).collect();
        assert_eq!(changed_ids, workers);

        // Nothing moved since the current tick: empty delta.
        assert!(model.deltas_since(model.tick()).is_empty());
    }

    #[test]
    fn test_removal_bookkeeping_pruned_after_delta() {
        let mut model = model_with_two_slots();
        let victim = worker_ids(&model, 1)[0];
        model.entities.get_mut(&victim).unwrap().health = 0.0;
        model.advance_tick();

        let delta = model.deltas_since(0);
        assert!(delta.removed.contains(&victim));

        // The next broadcast baseline consumes the entry for good; the
        // bookkeeping does not grow over a session's lifetime.
        let delta = model.deltas_since(model.tick());
        assert!(delta.removed.is_empty());
        assert!(model.removed.is_empty());
    }

    #[test]
    fn test_determinism_same_seed_same_commands() {
        let run = || {
            let mut model = RtsModel::new(64, 7);
            model.add_slot(0).unwrap();
            model.add_slot(1).unwrap();
            let workers = worker_ids(&model, 0);
            let node = model
                .entities
                .values()
                .find(|e| e.kind == EntityKind::ResourceNode)
                .map(|e| e.id)
                .unwrap();
            model
                .execute_command(
                    0,
                    &CommandPayload::Gather {
                        unit_ids: workers,
                        resource_id: node,
                    },
                )
                .unwrap();
            for _ in 0..120 {
                model.advance_tick();
            }
            serde_json::to_string(&model.snapshot()).unwrap()
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn test_observe_reports_enemies_and_nodes() {
        let model = model_with_two_slots();
        let obs = model.observe(0).unwrap();

        assert_eq!(obs.slot, 0);
        assert_eq!(obs.units.len(), rules::START_WORKERS as usize);
        assert_eq!(obs.bases.len(), 1);
        assert!(!obs.enemies.is_empty());
        assert!(!obs.resource_nodes.is_empty());
        assert!(model.observe(9).is_none());
    }

    #[test]
    fn test_eliminated_slot_commands_are_noops() {
        let mut model = model_with_two_slots();
        model.eliminate_slot(0).unwrap();
        let workers = worker_ids(&model, 0);

        model
            .execute_command(
                0,
                &CommandPayload::Move {
                    unit_ids: workers.clone(),
                    position: Vec2::new(5.0, 5.0),
                },
            )
            .unwrap();

        assert_eq!(model.entities[&workers[0]].target_position, None);
        assert!(matches!(
            model.execute_command(7, &CommandPayload::Move {
                unit_ids: vec![],
                position: Vec2::ZERO
            }),
            Err(ModelError::UnknownSlot(7))
        ));
    }
}
