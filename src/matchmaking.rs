//! Matchmaking: one FIFO bucket per `(game type, difficulty)` pair.
//!
//! Buckets are scanned in a fixed order (sorted key order via `BTreeMap`),
//! so match-finding is deterministic. Eviction and match-finding never
//! reorder unrelated entries.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::ai::Difficulty;

/// Session game modes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    Pvp,
    Pve,
    Ffa,
}

impl GameType {
    /// Players removed from a bucket per match for this mode.
    pub fn match_size(&self, mode_max: usize) -> usize {
        match self {
            GameType::Pvp | GameType::Pve => 2,
            GameType::Ffa => mode_max.max(2),
        }
    }
}

/// A waiting player.
#[derive(Debug, Clone)]
pub struct MatchmakingEntry {
    pub player_id: Uuid,
    pub game_type: GameType,
    pub difficulty: Difficulty,
    pub enqueued_at: Instant,
}

/// A formed match, ready for session creation.
#[derive(Debug, Clone)]
pub struct Match {
    pub game_type: GameType,
    pub difficulty: Difficulty,
    /// FIFO order preserved from the bucket.
    pub players: Vec<Uuid>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum MatchmakingError {
    #[error("player {0} is already queued")]
    AlreadyQueued(Uuid),
}

/// FIFO matchmaking pools with timeout eviction.
pub struct MatchmakingQueue {
    buckets: BTreeMap<(GameType, Difficulty), VecDeque<MatchmakingEntry>>,
    /// Matched players waiting to learn their session id (poll path).
    matched: HashMap<Uuid, Uuid>,
    timeout: Duration,
    ffa_size: usize,
}

impl MatchmakingQueue {
    pub fn new(timeout: Duration, ffa_size: usize) -> Self {
        Self {
            buckets: BTreeMap::new(),
            matched: HashMap::new(),
            timeout,
            ffa_size,
        }
    }

    /// Append a player to its bucket. Expired entries are evicted first so
    /// position reporting stays accurate.
    pub fn add_player(
        &mut self,
        player_id: Uuid,
        game_type: GameType,
        difficulty: Difficulty,
    ) -> Result<(), MatchmakingError> {
        self.evict_expired();

        let already = self
            .buckets
            .values()
            .any(|bucket| bucket.iter().any(|e| e.player_id == player_id));
        if already {
            return Err(MatchmakingError::AlreadyQueued(player_id));
        }

        self.buckets
            .entry((game_type, difficulty))
            .or_default()
            .push_back(MatchmakingEntry {
                player_id,
                game_type,
                difficulty,
                enqueued_at: Instant::now(),
            });
        Ok(())
    }

    /// Scan buckets in key order and take the first with enough entries,
    /// removing exactly the players needed, in FIFO order.
    pub fn find_match(&mut self) -> Option<Match> {
        self.evict_expired();

        for ((game_type, difficulty), bucket) in self.buckets.iter_mut() {
            let needed = game_type.match_size(self.ffa_size);
            if bucket.len() < 2 {
                continue;
            }

            let take = bucket.len().min(needed);
            let players: Vec<Uuid> = bucket.drain(..take).map(|e| e.player_id).collect();
            return Some(Match {
                game_type: *game_type,
                difficulty: *difficulty,
                players,
            });
        }
        None
    }

    /// 1-based queue position for a still-queued player.
    pub fn get_position(&self, player_id: Uuid) -> Option<usize> {
        for bucket in self.buckets.values() {
            if let Some(index) = bucket.iter().position(|e| e.player_id == player_id) {
                return Some(index + 1);
            }
        }
        None
    }

    pub fn queued_count(&self) -> usize {
        self.buckets.values().map(VecDeque::len).sum()
    }

    /// Remember where a matched player ended up, for the poll endpoint.
    pub fn record_match_result(&mut self, player_id: Uuid, session_id: Uuid) {
        self.matched.insert(player_id, session_id);
    }

    /// Take (and forget) the matched session for a player.
    pub fn take_match_result(&mut self, player_id: Uuid) -> Option<Uuid> {
        self.matched.remove(&player_id)
    }

    pub fn remove_player(&mut self, player_id: Uuid) -> bool {
        for bucket in self.buckets.values_mut() {
            if let Some(index) = bucket.iter().position(|e| e.player_id == player_id) {
                bucket.remove(index);
                return true;
            }
        }
        false
    }

    fn evict_expired(&mut self) {
        let timeout = self.timeout;
        for bucket in self.buckets.values_mut() {
            bucket.retain(|entry| entry.enqueued_at.elapsed() < timeout);
        }
        self.buckets.retain(|_, bucket| !bucket.is_empty());
    }
}
