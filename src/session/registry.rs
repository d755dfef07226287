//! Registry of live session tasks.
//!
//! Thin by design: capacity check, handle bookkeeping, lookup by id or join
//! code. All game-rule checks live in the session itself.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::matchmaking::GameType;
use crate::session::runner::{self, RunnerDeps, SessionHandle};
use crate::session::session::{Session, SessionOptions, SessionState};

#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("server is at capacity ({0} sessions)")]
    AtCapacity(usize),
    #[error("session {0} not found")]
    NotFound(Uuid),
}

/// Filters for listing sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionFilter {
    pub state: Option<SessionState>,
    pub game_type: Option<GameType>,
    /// Only sessions a player could still join.
    pub joinable: bool,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
    max_sessions: usize,
    deps: RunnerDeps,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize, deps: RunnerDeps) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
            deps,
        }
    }

    /// Create a session and spawn its tick-loop task.
    pub fn create(&self, options: SessionOptions) -> Result<SessionHandle, RegistryError> {
        {
            let sessions = self.sessions.read();
            if sessions.len() >= self.max_sessions {
                return Err(RegistryError::AtCapacity(sessions.len()));
            }
        }

        let session = Session::create(options);
        let handle = runner::spawn(session, self.deps.clone());
        info!(session = %handle.id, join_code = %handle.join_code, "session created");
        self.deps
            .metrics
            .sessions_created_total
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.sessions.write().insert(handle.id, handle.clone());
        Ok(handle)
    }

    pub fn get(&self, id: Uuid) -> Result<SessionHandle, RegistryError> {
        self.sessions
            .read()
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }

    pub fn get_by_join_code(&self, code: &str) -> Option<SessionHandle> {
        self.sessions
            .read()
            .values()
            .find(|h| h.join_code.eq_ignore_ascii_case(code))
            .cloned()
    }

    /// Handles matching the filter, in unspecified order.
    pub fn list(&self, filter: SessionFilter) -> Vec<SessionHandle> {
        self.sessions
            .read()
            .values()
            .filter(|h| {
                let state = h.shared.state();
                if let Some(wanted) = filter.state {
                    if state != wanted {
                        return false;
                    }
                }
                if let Some(game_type) = filter.game_type {
                    if h.game_type != game_type {
                        return false;
                    }
                }
                if filter.joinable
                    && (state != SessionState::Created
                        || h.shared.player_count() >= h.max_players)
                {
                    return false;
                }
                true
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Stop and forget a session.
    pub async fn destroy(&self, id: Uuid) -> Result<(), RegistryError> {
        let handle = {
            self.sessions
                .write()
                .remove(&id)
                .ok_or(RegistryError::NotFound(id))?
        };
        handle.stop().await;
        info!(session = %id, "session destroyed");
        Ok(())
    }

    /// Drop handles whose task already finished. Called by the janitor task.
    pub fn remove_ended(&self) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, handle| !handle.is_ended());
        before - sessions.len()
    }
}
