//! Replay recording: append-only command log plus periodic snapshots,
//! sealed into an immutable artifact when the session ends.
//!
//! Consumers treat `commands` as authoritative for deterministic
//! re-simulation; `snapshots` are resynchronization/seek points only.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::game::command::Command;
use crate::game::model::{SlotIndex, StateSnapshot};

/// Artifact format version.
pub const REPLAY_VERSION: u32 = 1;

/// One recorded command with its wall-clock receipt time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedCommand {
    pub tick: u64,
    pub actor: Uuid,
    /// Slot the command applied to, so re-simulation needs no member table.
    pub slot: SlotIndex,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    pub recorded_at: u64,
}

/// One full-state checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedSnapshot {
    pub tick: u64,
    #[serde(flatten)]
    pub state: StateSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayMetadata {
    pub replay_id: Uuid,
    pub session_id: Uuid,
    /// Model seed; with `map_size` this reconstructs the starting world.
    pub seed: u64,
    pub map_size: u32,
    pub started_at: u64,
    pub finalized_at: Option<u64>,
    pub duration_ms: u64,
    pub version: u32,
}

/// The sealed, immutable record of a finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayArtifact {
    pub metadata: ReplayMetadata,
    pub commands: Vec<RecordedCommand>,
    pub snapshots: Vec<RecordedSnapshot>,
}

/// Replay recorder errors. A record after `finalize` is a lifecycle bug
/// upstream, not a recoverable condition.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReplayError {
    #[error("replay {0} already finalized")]
    AlreadyFinalized(Uuid),
    #[error("command payload failed to serialize: {0}")]
    Serialization(String),
}

/// Append-only recorder owned by one session.
pub struct ReplayRecorder {
    metadata: ReplayMetadata,
    commands: Vec<RecordedCommand>,
    snapshots: Vec<RecordedSnapshot>,
    finalized: bool,
}

impl ReplayRecorder {
    pub fn new(session_id: Uuid, seed: u64, map_size: u32) -> Self {
        Self {
            metadata: ReplayMetadata {
                replay_id: Uuid::new_v4(),
                session_id,
                seed,
                map_size,
                started_at: now_millis(),
                finalized_at: None,
                duration_ms: 0,
                version: REPLAY_VERSION,
            },
            commands: Vec::new(),
            snapshots: Vec::new(),
            finalized: false,
        }
    }

    pub fn replay_id(&self) -> Uuid {
        self.metadata.replay_id
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Append an applied command with the slot it resolved to.
    pub fn record_command(&mut self, command: &Command, slot: SlotIndex) -> Result<(), ReplayError> {
        if self.finalized {
            return Err(ReplayError::AlreadyFinalized(self.metadata.replay_id));
        }
        let payload = serde_json::to_value(&command.payload)
            .map_err(|e| ReplayError::Serialization(e.to_string()))?;
        self.commands.push(RecordedCommand {
            tick: command.session_tick,
            actor: command.source_player,
            slot,
            kind: command.payload.kind().to_string(),
            payload,
            recorded_at: now_millis(),
        });
        Ok(())
    }

    /// Append a full-state checkpoint.
    pub fn record_snapshot(&mut self, tick: u64, state: StateSnapshot) -> Result<(), ReplayError> {
        if self.finalized {
            return Err(ReplayError::AlreadyFinalized(self.metadata.replay_id));
        }
        self.snapshots.push(RecordedSnapshot { tick, state });
        Ok(())
    }

    /// Seal the artifact. Must be called exactly once.
    pub fn finalize(&mut self) -> Result<(), ReplayError> {
        if self.finalized {
            return Err(ReplayError::AlreadyFinalized(self.metadata.replay_id));
        }
        let now = now_millis();
        self.metadata.finalized_at = Some(now);
        self.metadata.duration_ms = now.saturating_sub(self.metadata.started_at);
        self.finalized = true;
        Ok(())
    }

    /// The full artifact for persistence or delivery.
    pub fn export(&self) -> ReplayArtifact {
        ReplayArtifact {
            metadata: self.metadata.clone(),
            commands: self.commands.clone(),
            snapshots: self.snapshots.clone(),
        }
    }
}

/// In-memory store of sealed artifacts, shared between sessions (producers)
/// and the REST surface (consumers). Not persisted across restarts.
#[derive(Default)]
pub struct ReplayStore {
    artifacts: RwLock<HashMap<Uuid, ReplayArtifact>>,
}

impl ReplayStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, artifact: ReplayArtifact) {
        self.artifacts
            .write()
            .insert(artifact.metadata.replay_id, artifact);
    }

    pub fn get(&self, replay_id: Uuid) -> Option<ReplayArtifact> {
        self.artifacts.read().get(&replay_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.artifacts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.read().is_empty()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
