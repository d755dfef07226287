/// Simulation timing constants. The effective tick rate comes from
/// `ServerConfig`; these are only the defaults and derived values.
pub mod timing {
    /// Default server tick rate in Hz.
    pub const TICK_RATE: u32 = 60;
    /// Default full-snapshot checkpoint interval in ticks (once per 5s).
    pub const SNAPSHOT_INTERVAL_TICKS: u64 = 300;
}

/// Rule numbers for the reference model. Deliberately not balance-tuned;
/// the real combat/economy tables belong to the game-model collaborator.
pub mod rules {
    /// Starting resources per slot.
    pub const START_RESOURCES: u32 = 200;
    /// Workers spawned with the starting command post.
    pub const START_WORKERS: u32 = 4;
    /// Supply granted per command post.
    pub const POST_SUPPLY: u32 = 10;
    /// Supply granted per supply depot.
    pub const DEPOT_SUPPLY: u32 = 8;

    pub const WORKER_COST: u32 = 50;
    pub const SOLDIER_COST: u32 = 75;
    pub const BARRACKS_COST: u32 = 150;
    pub const DEPOT_COST: u32 = 100;
    pub const POST_COST: u32 = 400;

    pub const WORKER_SUPPLY: u32 = 1;
    pub const SOLDIER_SUPPLY: u32 = 2;

    pub const WORKER_HEALTH: f32 = 40.0;
    pub const SOLDIER_HEALTH: f32 = 100.0;
    pub const POST_HEALTH: f32 = 800.0;
    pub const BARRACKS_HEALTH: f32 = 400.0;
    pub const DEPOT_HEALTH: f32 = 300.0;

    /// Movement in map units per tick.
    pub const WORKER_SPEED: f32 = 0.08;
    pub const SOLDIER_SPEED: f32 = 0.12;

    /// Distance at which a worker can gather from a node.
    pub const GATHER_RANGE: f32 = 1.5;
    /// Resources transferred per gathering worker per tick.
    pub const GATHER_RATE: u32 = 1;
    /// Stock per resource node.
    pub const NODE_STOCK: u32 = 5_000;

    pub const ATTACK_RANGE: f32 = 2.0;
    /// Soldier damage per tick while in range.
    pub const SOLDIER_DAMAGE: f32 = 2.0;
    /// Worker damage per tick while in range.
    pub const WORKER_DAMAGE: f32 = 0.5;
}

/// AI difficulty presets and thresholds.
pub mod ai {
    /// Units below this health fraction retreat toward the nearest base.
    pub const RETREAT_HEALTH_FRAC: f32 = 0.30;
    /// Military power floor required before switching to aggression.
    pub const AGGRESSION_POWER_FLOOR: f32 = 8.0;
    /// Threat below this is considered safe enough to attack.
    pub const AGGRESSION_THREAT_CEILING: f32 = 2.0;
    /// Economy health floor required before teching.
    pub const TECH_ECONOMY_FLOOR: f32 = 0.75;
    /// Base threat ceiling; scaled by the difficulty aggression factor.
    pub const DEFENSE_THREAT_CEILING: f32 = 6.0;
    /// Worker count the AI grows its economy toward per base.
    pub const TARGET_WORKERS_PER_BASE: u32 = 8;
}

/// Session and networking limits.
pub mod limits {
    /// Outbound messages buffered per member before deltas are dropped.
    pub const OUTBOUND_BUFFER: usize = 64;
    /// Debug-log at most this many protocol errors per connection.
    pub const PROTOCOL_ERROR_LOG_CAP: u32 = 10;
}
