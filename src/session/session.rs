//! Session state machine and the per-tick algorithm.
//!
//! A `Session` exclusively owns its game model, command queue, replay
//! recorder and AI runners. It is a plain synchronous value; the spawned
//! tick-loop task in [`crate::session::runner`] drives it.

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::ai::{AiRunner, Difficulty};
use crate::game::command::Command;
use crate::game::command_queue::{CommandQueue, CommandSender};
use crate::game::model::{GameModel, ModelError, SlotIndex, StateDelta, StateSnapshot};
use crate::game::rts::RtsModel;
use crate::matchmaking::GameType;
use crate::replay::{ReplayArtifact, ReplayError, ReplayRecorder};

/// Lifecycle states. `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Started,
    Ended,
}

/// One seat in the session. Slot indices are assigned in join order,
/// contiguous from 0, and never reused or deleted.
#[derive(Debug, Clone)]
pub struct PlayerSlot {
    pub player_id: Uuid,
    pub slot: SlotIndex,
    pub is_ai: bool,
    pub eliminated: bool,
    /// Humans only; AI seats are always "connected".
    pub connected: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("session is not joinable in state {0:?}")]
    NotJoinable(SessionState),
    #[error("session is full ({0} players)")]
    SessionFull(usize),
    #[error("player {0} already holds a slot")]
    AlreadyJoined(Uuid),
    #[error("player {0} is not a session member")]
    NotAMember(Uuid),
    #[error("need at least 2 players to start, have {0}")]
    NotEnoughPlayers(usize),
    #[error("session has not started")]
    NotStarted,
    #[error("session already ended")]
    AlreadyEnded,
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
}

/// Why a drained command was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandRejection {
    NotAMember,
    SlotEliminated,
}

impl CommandRejection {
    pub fn message(&self) -> &'static str {
        match self {
            CommandRejection::NotAMember => "sender is not a member of this session",
            CommandRejection::SlotEliminated => "sender's slot has been eliminated",
        }
    }
}

/// A command dropped during validation, reported back to its sender.
#[derive(Debug, Clone)]
pub struct RejectedCommand {
    pub source_player: Uuid,
    pub reason: CommandRejection,
}

/// Everything one tick produced, for the runner to broadcast and count.
pub struct TickReport {
    /// The tick that just completed.
    pub tick: u64,
    pub delta: StateDelta,
    pub applied: usize,
    pub rejected: Vec<RejectedCommand>,
    pub newly_eliminated: Vec<SlotIndex>,
    /// AI commands applied this tick, echoed in `state_update`.
    pub ai_commands: Vec<Command>,
    /// Set when a periodic full-state checkpoint was recorded this tick.
    pub checkpointed: bool,
    /// Final scores when this tick decided the game.
    pub ended: Option<Vec<(SlotIndex, u32)>>,
}

/// Creation-time parameters.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub game_type: GameType,
    pub difficulty: Difficulty,
    pub max_players: usize,
    pub map_size: u32,
    pub snapshot_interval_ticks: u64,
}

/// Public description for listings and the REST surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub join_code: String,
    pub game_type: GameType,
    pub difficulty: Difficulty,
    pub state: SessionState,
    pub tick: u64,
    pub max_players: usize,
    pub players: Vec<Uuid>,
    pub created_at: u64,
}

pub struct Session {
    pub id: Uuid,
    pub join_code: String,
    pub options: SessionOptions,
    pub created_at: u64,
    /// Map-generation seed, shared with clients on `game_started`.
    pub seed: u64,
    state: SessionState,
    tick: u64,
    players: Vec<PlayerSlot>,
    model: Box<dyn GameModel>,
    queue: CommandQueue,
    recorder: ReplayRecorder,
    ai_runners: Vec<AiRunner>,
    last_broadcast_tick: u64,
}

impl Session {
    /// Create a session with the reference model, seeded from the session id
    /// so the generated map is reproducible.
    pub fn create(options: SessionOptions) -> Self {
        let id = Uuid::new_v4();
        let seed = u64::from_le_bytes(id.as_bytes()[..8].try_into().unwrap_or([0; 8]));
        let model = Box::new(RtsModel::new(options.map_size, seed));
        Self::with_model(id, options, seed, model)
    }

    /// Create with an explicit model implementation.
    pub fn with_model(
        id: Uuid,
        options: SessionOptions,
        seed: u64,
        model: Box<dyn GameModel>,
    ) -> Self {
        Self {
            id,
            join_code: generate_join_code(),
            seed,
            created_at: crate::game::command::wall_clock_micros() / 1_000,
            state: SessionState::Created,
            tick: 0,
            players: Vec::new(),
            model,
            queue: CommandQueue::new(),
            recorder: ReplayRecorder::new(id, seed, options.map_size),
            ai_runners: Vec::new(),
            last_broadcast_tick: 0,
            options,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn players(&self) -> &[PlayerSlot] {
        &self.players
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.options.max_players
    }

    pub fn connected_humans(&self) -> usize {
        self.players
            .iter()
            .filter(|p| !p.is_ai && p.connected)
            .count()
    }

    /// Producer handle for connection handlers.
    pub fn command_sender(&self) -> CommandSender {
        self.queue.sender()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id,
            join_code: self.join_code.clone(),
            game_type: self.options.game_type,
            difficulty: self.options.difficulty,
            state: self.state,
            tick: self.tick,
            max_players: self.options.max_players,
            players: self.players.iter().map(|p| p.player_id).collect(),
            created_at: self.created_at,
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.model.snapshot()
    }

    pub fn slot_of(&self, player_id: Uuid) -> Option<SlotIndex> {
        self.players
            .iter()
            .find(|p| p.player_id == player_id)
            .map(|p| p.slot)
    }

    /// Seat a human player. Returns the assigned slot and whether the join
    /// filled the session (which auto-starts it).
    pub fn join(&mut self, player_id: Uuid) -> Result<(SlotIndex, bool), SessionError> {
        let slot = self.seat(player_id, false, None)?;
        let auto_started = if self.is_full() {
            self.start()?;
            true
        } else {
            false
        };
        Ok((slot, auto_started))
    }

    /// Seat a synthetic player driven by an AI runner.
    pub fn add_ai(&mut self, difficulty: Difficulty) -> Result<SlotIndex, SessionError> {
        let player_id = Uuid::new_v4();
        let slot = self.seat(player_id, true, Some(difficulty))?;
        Ok(slot)
    }

    fn seat(
        &mut self,
        player_id: Uuid,
        is_ai: bool,
        difficulty: Option<Difficulty>,
    ) -> Result<SlotIndex, SessionError> {
        if self.state != SessionState::Created {
            return Err(SessionError::NotJoinable(self.state));
        }
        if self.is_full() {
            return Err(SessionError::SessionFull(self.players.len()));
        }
        if self.players.iter().any(|p| p.player_id == player_id) {
            return Err(SessionError::AlreadyJoined(player_id));
        }

        let slot = self.players.len() as SlotIndex;
        self.model.add_slot(slot)?;
        self.players.push(PlayerSlot {
            player_id,
            slot,
            is_ai,
            eliminated: false,
            connected: true,
        });
        if is_ai {
            let difficulty = difficulty.unwrap_or(self.options.difficulty);
            self.ai_runners.push(AiRunner::new(player_id, slot, difficulty));
        }
        info!(
            session = %self.id,
            player = %player_id,
            slot,
            is_ai,
            "player seated"
        );
        Ok(slot)
    }

    /// Begin ticking. Requires at least two seated players.
    pub fn start(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Created => {}
            SessionState::Started => return Err(SessionError::NotJoinable(self.state)),
            SessionState::Ended => return Err(SessionError::AlreadyEnded),
        }
        if self.players.len() < 2 {
            return Err(SessionError::NotEnoughPlayers(self.players.len()));
        }
        self.state = SessionState::Started;
        // Initial checkpoint, so even a session shorter than the snapshot
        // interval replays from a known starting state.
        self.recorder.record_snapshot(self.tick, self.model.snapshot())?;
        info!(session = %self.id, players = self.players.len(), "session started");
        Ok(())
    }

    /// Mark a human disconnected. The slot survives so in-flight commands and
    /// the replay stay coherent.
    pub fn leave(&mut self, player_id: Uuid) -> Result<(), SessionError> {
        let slot = self
            .players
            .iter_mut()
            .find(|p| p.player_id == player_id && !p.is_ai)
            .ok_or(SessionError::NotAMember(player_id))?;
        slot.connected = false;
        info!(session = %self.id, player = %player_id, "player left");
        Ok(())
    }

    /// Run exactly one tick of the session algorithm:
    /// drain, validate, apply human commands, apply AI commands, advance the
    /// model, checkpoint if due, compute the broadcast delta.
    pub fn run_tick(&mut self) -> Result<TickReport, SessionError> {
        if self.state != SessionState::Started {
            return Err(SessionError::NotStarted);
        }

        let current = self.tick;
        let drained = self.queue.drain(current);

        let mut applied = 0usize;
        let mut rejected = Vec::new();
        for command in drained {
            match self.validate(&command) {
                Ok(slot) => {
                    // A model failure is contained to the one command; the
                    // tick loop must keep running for everyone else.
                    if let Err(e) = self.model.execute_command(slot, &command.payload) {
                        warn!(
                            session = %self.id,
                            player = %command.source_player,
                            kind = command.payload.kind(),
                            "model failed to apply command, skipped: {}",
                            e
                        );
                        continue;
                    }
                    self.recorder.record_command(&command, slot)?;
                    applied += 1;
                }
                Err(reason) => {
                    debug!(
                        session = %self.id,
                        player = %command.source_player,
                        kind = command.payload.kind(),
                        "command rejected: {}",
                        reason.message()
                    );
                    rejected.push(RejectedCommand {
                        source_player: command.source_player,
                        reason,
                    });
                }
            }
        }

        // AI pass: every runner observes the same post-human-command state,
        // then the emitted commands apply in ascending slot order.
        let mut ai_commands: Vec<Command> = Vec::new();
        let eliminated: Vec<SlotIndex> = self
            .players
            .iter()
            .filter(|p| p.eliminated)
            .map(|p| p.slot)
            .collect();
        for runner in &mut self.ai_runners {
            if eliminated.contains(&runner.slot) {
                continue;
            }
            ai_commands.extend(runner.actions(current, self.model.as_ref()));
        }
        let mut applied_ai = Vec::new();
        for command in ai_commands {
            if let Some(slot) = self.slot_of(command.source_player) {
                if let Err(e) = self.model.execute_command(slot, &command.payload) {
                    warn!(
                        session = %self.id,
                        slot,
                        "model failed to apply AI command, skipped: {}",
                        e
                    );
                    continue;
                }
                self.recorder.record_command(&command, slot)?;
                applied += 1;
                applied_ai.push(command);
            }
        }

        self.model.advance_tick();
        self.tick = self.model.tick();

        let checkpointed = self.tick % self.options.snapshot_interval_ticks == 0;
        if checkpointed {
            self.recorder.record_snapshot(self.tick, self.model.snapshot())?;
        }

        let delta = self.model.deltas_since(self.last_broadcast_tick);
        self.last_broadcast_tick = self.tick;

        // Elimination changes travel through the delta's economy rows.
        let mut newly_eliminated = Vec::new();
        for economy in &delta.players {
            if let Some(seat) = self
                .players
                .iter_mut()
                .find(|p| p.slot == economy.slot && !p.eliminated)
            {
                if economy.eliminated {
                    seat.eliminated = true;
                    newly_eliminated.push(seat.slot);
                    info!(session = %self.id, slot = seat.slot, "slot eliminated");
                }
            }
        }

        let survivors = self.players.iter().filter(|p| !p.eliminated).count();
        let ended = if survivors <= 1 {
            Some(self.end()?)
        } else {
            None
        };

        Ok(TickReport {
            tick: self.tick,
            delta,
            applied,
            rejected,
            newly_eliminated,
            ai_commands: applied_ai,
            checkpointed,
            ended,
        })
    }

    fn validate(&self, command: &Command) -> Result<SlotIndex, CommandRejection> {
        let seat = self
            .players
            .iter()
            .find(|p| p.player_id == command.source_player)
            .ok_or(CommandRejection::NotAMember)?;
        if seat.eliminated {
            return Err(CommandRejection::SlotEliminated);
        }
        Ok(seat.slot)
    }

    /// Seal the session: final scores, finalized replay. Terminal.
    pub fn end(&mut self) -> Result<Vec<(SlotIndex, u32)>, SessionError> {
        if self.state == SessionState::Ended {
            return Err(SessionError::AlreadyEnded);
        }
        self.state = SessionState::Ended;
        self.queue.clear();
        if let Err(e) = self.recorder.finalize() {
            // Recorder lifecycle violation: contain it to this session.
            warn!(session = %self.id, "replay finalize failed: {}", e);
        }
        let scores = self.model.final_scores();
        info!(session = %self.id, tick = self.tick, "session ended");
        Ok(scores)
    }

    /// The sealed replay, once ended.
    pub fn export_replay(&self) -> Option<ReplayArtifact> {
        if self.recorder.is_finalized() {
            Some(self.recorder.export())
        } else {
            None
        }
    }
}

/// Six-character human-readable join code.
fn generate_join_code() -> String {
    use rand::Rng;
    const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}
