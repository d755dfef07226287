//! AI agent runner: a synthetic player occupying one slot.
//!
//! Strategy selection is a small state machine over named strategies driven
//! by three scalar readings (threat, economy health, military power),
//! re-evaluated only every `decision_interval_ticks`. Between evaluations
//! the runner keeps executing the current strategy. A micro-management pass
//! retreats wounded units every tick regardless of the decision interval.

use uuid::Uuid;

use crate::game::command::{BuildingType, Command, CommandPayload, UnitType};
use crate::game::constants::ai;
use crate::game::model::{EntityKind, GameModel, SlotIndex, SlotObservation};
use crate::util::vec2::Vec2;

/// High-level strategies the runner can pursue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Expansion,
    Defense,
    Aggression,
    Tech,
}

/// Difficulty buckets shared with matchmaking and session config.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// Tunable behavior knobs per difficulty.
#[derive(Debug, Clone, Copy)]
pub struct DifficultyProfile {
    /// High-level strategy is re-evaluated every this many ticks.
    pub decision_interval_ticks: u64,
    /// 0..1, scales the threat ceiling that triggers defense.
    pub aggression_factor: f32,
    /// Ticks before the first strategy evaluation.
    pub reaction_delay_ticks: u64,
    /// 0..1, scales the worker count the AI grows toward.
    pub build_order_quality: f32,
    /// 0..1, caps how many retreat orders the micro pass issues per tick.
    pub micro_skill: f32,
}

impl DifficultyProfile {
    pub fn preset(difficulty: Difficulty) -> Self {
        match difficulty {
            Difficulty::Easy => Self {
                decision_interval_ticks: 120,
                aggression_factor: 0.4,
                reaction_delay_ticks: 90,
                build_order_quality: 0.5,
                micro_skill: 0.25,
            },
            Difficulty::Medium => Self {
                decision_interval_ticks: 60,
                aggression_factor: 0.7,
                reaction_delay_ticks: 45,
                build_order_quality: 0.75,
                micro_skill: 0.5,
            },
            Difficulty::Hard => Self {
                decision_interval_ticks: 30,
                aggression_factor: 1.0,
                reaction_delay_ticks: 15,
                build_order_quality: 1.0,
                micro_skill: 1.0,
            },
        }
    }

    fn defense_threat_ceiling(&self) -> f32 {
        ai::DEFENSE_THREAT_CEILING * (1.5 - self.aggression_factor)
    }

    fn max_micro_orders(&self) -> usize {
        ((self.micro_skill * 4.0).ceil() as usize).max(1)
    }
}

/// Scalar readings computed at each strategy re-evaluation.
#[derive(Debug, Clone, Copy, Default)]
struct Readings {
    /// Opposing military strength, weighted inversely by distance to base.
    threat: f32,
    /// Resource-per-worker, normalized to roughly 0..2.
    economy_health: f32,
    /// Weighted sum over owned units and military buildings.
    military_power: f32,
}

fn compute_readings(obs: &SlotObservation) -> Readings {
    let home = obs.bases.first().copied().unwrap_or(Vec2::ZERO);

    let threat = obs
        .enemies
        .iter()
        .map(|e| e.strength / (1.0 + e.position.distance_to(home) / 10.0))
        .sum();

    let workers = obs
        .units
        .iter()
        .filter(|u| u.kind == EntityKind::Worker)
        .count();
    let economy_health = if workers == 0 {
        0.0
    } else {
        (obs.resources as f32 / workers as f32 / 100.0).min(2.0)
    };

    let military_power = obs
        .units
        .iter()
        .map(|u| match u.kind {
            EntityKind::Soldier => 2.0,
            EntityKind::Worker => 0.5,
            _ => 0.0,
        })
        .sum::<f32>()
        + obs
            .production
            .iter()
            .filter(|(_, kind)| *kind == EntityKind::Barracks)
            .count() as f32;

    Readings {
        threat,
        economy_health,
        military_power,
    }
}

/// Per-slot scripted decision process.
pub struct AiRunner {
    /// Synthetic player identity occupying the slot.
    pub player_id: Uuid,
    pub slot: SlotIndex,
    pub profile: DifficultyProfile,
    strategy: Strategy,
    last_decision_tick: Option<u64>,
}

impl AiRunner {
    pub fn new(player_id: Uuid, slot: SlotIndex, difficulty: Difficulty) -> Self {
        Self {
            player_id,
            slot,
            profile: DifficultyProfile::preset(difficulty),
            strategy: Strategy::Expansion,
            last_decision_tick: None,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Produce this tick's actions. Returns an empty list when the model has
    /// no record for the slot (e.g. mid-teardown).
    pub fn actions(&mut self, session_tick: u64, model: &dyn GameModel) -> Vec<Command> {
        let Some(obs) = model.observe(self.slot) else {
            return Vec::new();
        };

        if self.should_reevaluate(session_tick) {
            let readings = compute_readings(&obs);
            self.strategy = self.select_strategy(readings);
            self.last_decision_tick = Some(session_tick);
        }

        let mut budget = Budget {
            resources: obs.resources,
            supply_free: obs.supply_cap.saturating_sub(obs.supply_used),
        };
        let mut commands = Vec::new();

        match self.strategy {
            Strategy::Expansion => self.run_expansion(session_tick, &obs, &mut budget, &mut commands),
            Strategy::Defense => self.run_defense(session_tick, &obs, &mut budget, &mut commands),
            Strategy::Aggression => {
                self.run_aggression(session_tick, &obs, &mut budget, &mut commands)
            }
            Strategy::Tech => self.run_tech(session_tick, &obs, &mut budget, &mut commands),
        }

        // Micro pass runs every tick, independent of the decision interval.
        self.run_micro(session_tick, &obs, &mut commands);

        commands
    }

    fn should_reevaluate(&self, session_tick: u64) -> bool {
        if session_tick < self.profile.reaction_delay_ticks {
            return false;
        }
        match self.last_decision_tick {
            None => true,
            Some(last) => session_tick.saturating_sub(last) >= self.profile.decision_interval_ticks,
        }
    }

    /// Transition rule, evaluated in priority order: defense, aggression,
    /// tech, expansion fallback.
    fn select_strategy(&self, readings: Readings) -> Strategy {
        if readings.threat > self.profile.defense_threat_ceiling() {
            Strategy::Defense
        } else if readings.military_power >= ai::AGGRESSION_POWER_FLOOR
            && readings.threat < ai::AGGRESSION_THREAT_CEILING
        {
            Strategy::Aggression
        } else if readings.economy_health > ai::TECH_ECONOMY_FLOOR {
            Strategy::Tech
        } else {
            Strategy::Expansion
        }
    }

    fn command(&self, session_tick: u64, payload: CommandPayload) -> Command {
        Command::new(self.player_id, session_tick, payload)
    }

    fn target_worker_count(&self, obs: &SlotObservation) -> u32 {
        let bases = obs.bases.len().max(1) as u32;
        (ai::TARGET_WORKERS_PER_BASE as f32 * self.profile.build_order_quality * bases as f32)
            .round() as u32
    }

    /// Send idle workers to the nearest node; grow the worker line and the
    /// supply cap.
    fn run_expansion(
        &self,
        tick: u64,
        obs: &SlotObservation,
        budget: &mut Budget,
        out: &mut Vec<Command>,
    ) {
        self.assign_idle_workers(tick, obs, out);

        let workers = obs
            .units
            .iter()
            .filter(|u| u.kind == EntityKind::Worker)
            .count() as u32;
        if workers < self.target_worker_count(obs) {
            self.train(tick, obs, budget, UnitType::Worker, out);
        }

        self.extend_supply_if_needed(tick, obs, budget, out);
    }

    /// Pull soldiers home and keep producing military.
    fn run_defense(
        &self,
        tick: u64,
        obs: &SlotObservation,
        budget: &mut Budget,
        out: &mut Vec<Command>,
    ) {
        let Some(home) = obs.bases.first().copied() else {
            return;
        };

        let defenders: Vec<_> = obs
            .units
            .iter()
            .filter(|u| u.kind == EntityKind::Soldier && u.position.distance_to(home) > 6.0)
            .map(|u| u.id)
            .collect();
        if !defenders.is_empty() {
            out.push(self.command(
                tick,
                CommandPayload::Move {
                    unit_ids: defenders,
                    position: home,
                },
            ));
        }

        self.ensure_barracks(tick, obs, budget, home, out);
        self.train(tick, obs, budget, UnitType::Soldier, out);
    }

    /// Throw the army at the closest enemy.
    fn run_aggression(
        &self,
        tick: u64,
        obs: &SlotObservation,
        budget: &mut Budget,
        out: &mut Vec<Command>,
    ) {
        let home = obs.bases.first().copied().unwrap_or(Vec2::ZERO);
        let soldiers: Vec<_> = obs
            .units
            .iter()
            .filter(|u| u.kind == EntityKind::Soldier)
            .map(|u| u.id)
            .collect();

        if let Some(target) = obs
            .enemies
            .iter()
            .min_by(|a, b| {
                a.position
                    .distance_sq_to(home)
                    .total_cmp(&b.position.distance_sq_to(home))
            })
            .map(|e| e.id)
        {
            if !soldiers.is_empty() {
                out.push(self.command(
                    tick,
                    CommandPayload::Attack {
                        unit_ids: soldiers,
                        target_id: target,
                    },
                ));
            }
        }

        self.train(tick, obs, budget, UnitType::Soldier, out);
    }

    /// Invest the surplus: production buildings first, then supply.
    fn run_tech(
        &self,
        tick: u64,
        obs: &SlotObservation,
        budget: &mut Budget,
        out: &mut Vec<Command>,
    ) {
        let Some(home) = obs.bases.first().copied() else {
            return;
        };
        self.assign_idle_workers(tick, obs, out);
        self.ensure_barracks(tick, obs, budget, home, out);
        self.extend_supply_if_needed(tick, obs, budget, out);
    }

    /// Retreat any unit below the health floor toward the nearest owned
    /// base. Capped per tick by micro skill.
    fn run_micro(&self, tick: u64, obs: &SlotObservation, out: &mut Vec<Command>) {
        if obs.bases.is_empty() {
            return;
        }
        let mut issued = 0;
        for unit in &obs.units {
            if unit.health_frac >= ai::RETREAT_HEALTH_FRAC {
                continue;
            }
            let nearest_base = obs
                .bases
                .iter()
                .min_by(|a, b| {
                    a.distance_sq_to(unit.position)
                        .total_cmp(&b.distance_sq_to(unit.position))
                })
                .copied()
                .unwrap_or(Vec2::ZERO);
            if unit.position.distance_to(nearest_base) <= 3.0 {
                continue;
            }
            out.push(self.command(
                tick,
                CommandPayload::Move {
                    unit_ids: vec![unit.id],
                    position: nearest_base,
                },
            ));
            issued += 1;
            if issued >= self.profile.max_micro_orders() {
                break;
            }
        }
    }

    fn assign_idle_workers(&self, tick: u64, obs: &SlotObservation, out: &mut Vec<Command>) {
        let idle: Vec<_> = obs
            .units
            .iter()
            .filter(|u| u.kind == EntityKind::Worker && u.idle)
            .collect();
        if idle.is_empty() {
            return;
        }
        let anchor = idle[0].position;
        if let Some((node_id, _)) = obs
            .resource_nodes
            .iter()
            .min_by(|(_, a), (_, b)| {
                a.distance_sq_to(anchor).total_cmp(&b.distance_sq_to(anchor))
            })
            .copied()
        {
            out.push(self.command(
                tick,
                CommandPayload::Gather {
                    unit_ids: idle.iter().map(|u| u.id).collect(),
                    resource_id: node_id,
                },
            ));
        }
    }

    /// Emit a train order only when the budget still covers it; commands the
    /// player cannot afford are never produced.
    fn train(
        &self,
        tick: u64,
        obs: &SlotObservation,
        budget: &mut Budget,
        unit_type: UnitType,
        out: &mut Vec<Command>,
    ) {
        use crate::game::constants::rules;

        let (required, cost, supply) = match unit_type {
            UnitType::Worker => (EntityKind::CommandPost, rules::WORKER_COST, rules::WORKER_SUPPLY),
            UnitType::Soldier => (EntityKind::Barracks, rules::SOLDIER_COST, rules::SOLDIER_SUPPLY),
        };
        if budget.resources < cost || budget.supply_free < supply {
            return;
        }
        let Some((building_id, _)) = obs.production.iter().find(|(_, kind)| *kind == required)
        else {
            return;
        };

        budget.resources -= cost;
        budget.supply_free -= supply;
        out.push(self.command(
            tick,
            CommandPayload::BuildUnit {
                building_id: *building_id,
                unit_type,
            },
        ));
    }

    fn ensure_barracks(
        &self,
        tick: u64,
        obs: &SlotObservation,
        budget: &mut Budget,
        home: Vec2,
        out: &mut Vec<Command>,
    ) {
        use crate::game::constants::rules;

        let has_barracks = obs
            .production
            .iter()
            .any(|(_, kind)| *kind == EntityKind::Barracks);
        if has_barracks || budget.resources < rules::BARRACKS_COST {
            return;
        }
        budget.resources -= rules::BARRACKS_COST;
        out.push(self.command(
            tick,
            CommandPayload::BuildBuilding {
                building_type: BuildingType::Barracks,
                position: home + Vec2::new(3.0, -3.0),
            },
        ));
    }

    fn extend_supply_if_needed(
        &self,
        tick: u64,
        obs: &SlotObservation,
        budget: &mut Budget,
        out: &mut Vec<Command>,
    ) {
        use crate::game::constants::rules;

        let nearly_capped = obs.supply_used + 2 * rules::WORKER_SUPPLY >= obs.supply_cap;
        if !nearly_capped || budget.resources < rules::DEPOT_COST {
            return;
        }
        let Some(home) = obs.bases.first().copied() else {
            return;
        };
        budget.resources -= rules::DEPOT_COST;
        out.push(self.command(
            tick,
            CommandPayload::BuildBuilding {
                building_type: BuildingType::SupplyDepot,
                position: home + Vec2::new(-3.0, 3.0),
            },
        ));
    }
}

/// Running affordability tally so one tick never emits more orders than the
/// slot can pay for.
struct Budget {
    resources: u32,
    supply_free: u32,
}
