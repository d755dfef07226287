//! The spawned tick-loop task behind every live session.
//!
//! One tokio task exclusively owns the [`Session`] value (single-writer
//! discipline); everything else talks to it through the control channel on
//! [`SessionHandle`] or enqueues commands through the cloned sender. Outbound
//! fan-out uses a bounded channel per member with `try_send`: a slow consumer
//! loses deltas, gets flagged, and is resynchronized with a full snapshot on
//! the next send that fits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::ai::Difficulty;
use crate::game::command::{Command, CommandPayload};
use crate::game::command_queue::CommandSender;
use crate::game::constants::limits;
use crate::game::model::{SlotIndex, StateDelta, StateSnapshot};
use crate::matchmaking::GameType;
use crate::metrics::Metrics;
use crate::replay::ReplayStore;
use crate::session::session::{Session, SessionError, SessionInfo, SessionState};

/// Typed outbound events, fanned out to every member's bounded channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Started { tick: u64, seed: u64 },
    PlayerJoined { player_id: Uuid, slot: SlotIndex, total_players: usize },
    PlayerLeft { player_id: Uuid, remaining_players: usize },
    Delta { delta: StateDelta, ai_actions: Vec<Command> },
    /// Full-state resync after this member missed at least one delta.
    Resync(StateSnapshot),
    Ended { scores: Vec<(SlotIndex, u32)>, replay_id: Option<Uuid> },
    Error { code: &'static str, message: String },
}

/// Successful join: everything the gateway needs for the init message.
#[derive(Debug)]
pub struct JoinOk {
    pub slot: SlotIndex,
    pub info: SessionInfo,
    pub snapshot: StateSnapshot,
}

/// Control messages consumed by the tick-loop task.
pub enum SessionControl {
    Join {
        player_id: Uuid,
        events: mpsc::Sender<SessionEvent>,
        respond: oneshot::Sender<Result<JoinOk, SessionError>>,
    },
    AddAi {
        difficulty: Difficulty,
        respond: oneshot::Sender<Result<SlotIndex, SessionError>>,
    },
    Leave {
        player_id: Uuid,
    },
    Start {
        respond: oneshot::Sender<Result<(), SessionError>>,
    },
    Info {
        respond: oneshot::Sender<SessionInfo>,
    },
    Snapshot {
        respond: oneshot::Sender<StateSnapshot>,
    },
    Stop,
}

/// Lock-free mirror of the fields listings and command stamping need.
#[derive(Debug)]
pub struct SessionShared {
    state: AtomicU8,
    tick: AtomicU64,
    player_count: AtomicU64,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(0),
            tick: AtomicU64::new(0),
            player_count: AtomicU64::new(0),
        }
    }

    fn store_state(&self, state: SessionState) {
        let value = match state {
            SessionState::Created => 0,
            SessionState::Started => 1,
            SessionState::Ended => 2,
        };
        self.state.store(value, Ordering::Relaxed);
    }

    pub fn state(&self) -> SessionState {
        match self.state.load(Ordering::Relaxed) {
            0 => SessionState::Created,
            1 => SessionState::Started,
            _ => SessionState::Ended,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed) as usize
    }
}

/// Cheap, clonable reference to a live session task.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub join_code: String,
    pub game_type: GameType,
    pub difficulty: Difficulty,
    pub max_players: usize,
    pub created_at: u64,
    pub shared: Arc<SessionShared>,
    control: mpsc::Sender<SessionControl>,
    commands: CommandSender,
}

impl SessionHandle {
    pub async fn join(
        &self,
        player_id: Uuid,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<JoinOk, SessionError> {
        let (respond, rx) = oneshot::channel();
        self.control
            .send(SessionControl::Join {
                player_id,
                events,
                respond,
            })
            .await
            .map_err(|_| SessionError::AlreadyEnded)?;
        rx.await.map_err(|_| SessionError::AlreadyEnded)?
    }

    pub async fn add_ai(&self, difficulty: Difficulty) -> Result<SlotIndex, SessionError> {
        let (respond, rx) = oneshot::channel();
        self.control
            .send(SessionControl::AddAi { difficulty, respond })
            .await
            .map_err(|_| SessionError::AlreadyEnded)?;
        rx.await.map_err(|_| SessionError::AlreadyEnded)?
    }

    pub async fn start(&self) -> Result<(), SessionError> {
        let (respond, rx) = oneshot::channel();
        self.control
            .send(SessionControl::Start { respond })
            .await
            .map_err(|_| SessionError::AlreadyEnded)?;
        rx.await.map_err(|_| SessionError::AlreadyEnded)?
    }

    pub async fn leave(&self, player_id: Uuid) {
        let _ = self.control.send(SessionControl::Leave { player_id }).await;
    }

    pub async fn info(&self) -> Result<SessionInfo, SessionError> {
        let (respond, rx) = oneshot::channel();
        self.control
            .send(SessionControl::Info { respond })
            .await
            .map_err(|_| SessionError::AlreadyEnded)?;
        rx.await.map_err(|_| SessionError::AlreadyEnded)
    }

    pub async fn snapshot(&self) -> Result<StateSnapshot, SessionError> {
        let (respond, rx) = oneshot::channel();
        self.control
            .send(SessionControl::Snapshot { respond })
            .await
            .map_err(|_| SessionError::AlreadyEnded)?;
        rx.await.map_err(|_| SessionError::AlreadyEnded)
    }

    pub async fn stop(&self) {
        let _ = self.control.send(SessionControl::Stop).await;
    }

    /// Enqueue a command. When the client names no tick, the command is
    /// stamped for the tick after the one currently running.
    pub fn send_command(
        &self,
        player_id: Uuid,
        tick: Option<u64>,
        payload: CommandPayload,
    ) -> Result<(), crate::game::command_queue::CommandQueueError> {
        let tick = tick.unwrap_or_else(|| self.shared.tick() + 1);
        self.commands.send(Command::new(player_id, tick, payload))
    }

    pub fn is_ended(&self) -> bool {
        self.shared.state() == SessionState::Ended
    }
}

/// Shared services the task needs.
#[derive(Clone)]
pub struct RunnerDeps {
    pub metrics: Arc<Metrics>,
    pub replays: Arc<ReplayStore>,
    pub tick_duration: Duration,
    pub empty_grace: Duration,
}

struct Member {
    events: mpsc::Sender<SessionEvent>,
    needs_resync: bool,
}

/// Spawn the tick-loop task and hand back the session's handle.
pub fn spawn(session: Session, deps: RunnerDeps) -> SessionHandle {
    let shared = Arc::new(SessionShared::new());
    shared.store_state(session.state());
    let (control_tx, control_rx) = mpsc::channel(64);

    let handle = SessionHandle {
        id: session.id,
        join_code: session.join_code.clone(),
        game_type: session.options.game_type,
        difficulty: session.options.difficulty,
        max_players: session.options.max_players,
        created_at: session.created_at,
        shared: shared.clone(),
        control: control_tx,
        commands: session.command_sender(),
    };

    tokio::spawn(run(session, shared, control_rx, deps));
    handle
}

async fn run(
    mut session: Session,
    shared: Arc<SessionShared>,
    mut control: mpsc::Receiver<SessionControl>,
    deps: RunnerDeps,
) {
    let session_id = session.id;
    let mut members: HashMap<Uuid, Member> = HashMap::new();
    let mut ai_seats: u64 = 0;

    // Overruns are allowed and counted; no frame is skipped.
    let mut ticker = interval(deps.tick_duration);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
    let mut housekeeping = interval(Duration::from_secs(1));
    let mut empty_since: Option<Instant> = None;

    info!(session = %session_id, "session task started");
    deps.metrics.sessions_active.fetch_add(1, Ordering::Relaxed);

    loop {
        tokio::select! {
            maybe = control.recv() => {
                match maybe {
                    Some(msg) => {
                        if handle_control(
                            msg,
                            &mut session,
                            &shared,
                            &mut members,
                            &mut ai_seats,
                            &mut ticker,
                            &deps,
                        ) {
                            break;
                        }
                    }
                    // Every handle dropped: nothing can reach this session.
                    None => {
                        finish(&mut session, &shared, &mut members, &deps);
                        break;
                    }
                }
            }
            _ = ticker.tick(), if session.state() == SessionState::Started => {
                if run_one_tick(&mut session, &shared, &mut members, &deps) {
                    break;
                }
            }
            _ = housekeeping.tick() => {
                members.retain(|player_id, member| {
                    if member.events.is_closed() {
                        let _ = session.leave(*player_id);
                        false
                    } else {
                        true
                    }
                });
                if session.connected_humans() == 0 {
                    let since = empty_since.get_or_insert_with(Instant::now);
                    if since.elapsed() >= deps.empty_grace {
                        info!(session = %session_id, "empty grace expired, ending session");
                        finish(&mut session, &shared, &mut members, &deps);
                        break;
                    }
                } else {
                    empty_since = None;
                }
            }
        }
    }

    deps.metrics.sessions_active.fetch_sub(1, Ordering::Relaxed);
    deps.metrics
        .ai_runners_active
        .fetch_sub(ai_seats, Ordering::Relaxed);
    shared.store_state(session.state());
    info!(session = %session_id, "session task finished");
}

/// Returns true when the task should exit.
fn handle_control(
    msg: SessionControl,
    session: &mut Session,
    shared: &SessionShared,
    members: &mut HashMap<Uuid, Member>,
    ai_seats: &mut u64,
    ticker: &mut tokio::time::Interval,
    deps: &RunnerDeps,
) -> bool {
    match msg {
        SessionControl::Join { player_id, events, respond } => {
            let result = session.join(player_id).map(|(slot, auto_started)| {
                members.insert(
                    player_id,
                    Member {
                        events,
                        needs_resync: false,
                    },
                );
                shared.player_count.store(session.players().len() as u64, Ordering::Relaxed);
                broadcast_except(
                    members,
                    player_id,
                    SessionEvent::PlayerJoined {
                        player_id,
                        slot,
                        total_players: session.players().len(),
                    },
                );
                if auto_started {
                    shared.store_state(session.state());
                    ticker.reset();
                    broadcast(
                        members,
                        SessionEvent::Started { tick: session.tick(), seed: session.seed },
                        deps,
                    );
                }
                JoinOk {
                    slot,
                    info: session.info(),
                    snapshot: session.snapshot(),
                }
            });
            let _ = respond.send(result);
        }
        SessionControl::AddAi { difficulty, respond } => {
            let result = session.add_ai(difficulty);
            if result.is_ok() {
                *ai_seats += 1;
                deps.metrics.ai_runners_active.fetch_add(1, Ordering::Relaxed);
                shared.player_count.store(session.players().len() as u64, Ordering::Relaxed);
            }
            let _ = respond.send(result);
        }
        SessionControl::Leave { player_id } => {
            if session.leave(player_id).is_ok() {
                members.remove(&player_id);
                let remaining_players = members.len();
                broadcast(
                    members,
                    SessionEvent::PlayerLeft { player_id, remaining_players },
                    deps,
                );
            }
        }
        SessionControl::Start { respond } => {
            let result = session.start();
            if result.is_ok() {
                shared.store_state(session.state());
                ticker.reset();
                broadcast(
                    members,
                    SessionEvent::Started { tick: session.tick(), seed: session.seed },
                    deps,
                );
            }
            let _ = respond.send(result);
        }
        SessionControl::Info { respond } => {
            let _ = respond.send(session.info());
        }
        SessionControl::Snapshot { respond } => {
            let _ = respond.send(session.snapshot());
        }
        SessionControl::Stop => {
            finish(session, shared, members, deps);
            return true;
        }
    }
    false
}

/// Returns true when the session ended this tick.
fn run_one_tick(
    session: &mut Session,
    shared: &SessionShared,
    members: &mut HashMap<Uuid, Member>,
    deps: &RunnerDeps,
) -> bool {
    let started = Instant::now();
    let report = match session.run_tick() {
        Ok(report) => report,
        Err(e) => {
            // A failing tick is contained to this session's teardown.
            warn!(session = %session.id, "tick failed, ending session: {}", e);
            finish(session, shared, members, deps);
            return true;
        }
    };

    let elapsed = started.elapsed();
    deps.metrics.record_tick_time(elapsed);
    if elapsed > deps.tick_duration {
        deps.metrics.tick_overruns_total.fetch_add(1, Ordering::Relaxed);
    }
    shared.tick.store(report.tick, Ordering::Relaxed);
    deps.metrics
        .commands_applied_total
        .fetch_add(report.applied as u64, Ordering::Relaxed);
    deps.metrics
        .commands_rejected_total
        .fetch_add(report.rejected.len() as u64, Ordering::Relaxed);

    for rejection in &report.rejected {
        if let Some(member) = members.get_mut(&rejection.source_player) {
            let _ = member.events.try_send(SessionEvent::Error {
                code: "command_rejected",
                message: rejection.reason.message().to_string(),
            });
        }
    }

    if !report.delta.is_empty() || !report.ai_commands.is_empty() {
        broadcast(
            members,
            SessionEvent::Delta {
                delta: report.delta.clone(),
                ai_actions: report.ai_commands.clone(),
            },
            deps,
        );
    }
    resync_lagging(session, members, deps);

    if let Some(scores) = report.ended {
        seal(session, shared, members, deps, scores);
        return true;
    }
    false
}

/// Fan an event out over every member's bounded channel. Full buffers drop
/// the event and flag the member for a snapshot resync.
fn broadcast(members: &mut HashMap<Uuid, Member>, event: SessionEvent, deps: &RunnerDeps) {
    let is_delta = matches!(event, SessionEvent::Delta { .. });
    for (player_id, member) in members.iter_mut() {
        match member.events.try_send(event.clone()) {
            Ok(()) => {
                if is_delta {
                    deps.metrics.deltas_sent_total.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                if is_delta {
                    member.needs_resync = true;
                    deps.metrics.deltas_dropped_total.fetch_add(1, Ordering::Relaxed);
                    debug!(player = %player_id, "member buffer full, delta dropped");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Housekeeping reaps closed members.
            }
        }
    }
}

fn broadcast_except(members: &mut HashMap<Uuid, Member>, skip: Uuid, event: SessionEvent) {
    for (player_id, member) in members.iter_mut() {
        if *player_id != skip {
            let _ = member.events.try_send(event.clone());
        }
    }
}

/// Members that missed a delta get the next full snapshot that fits their
/// buffer, after which incremental deltas resume.
fn resync_lagging(session: &Session, members: &mut HashMap<Uuid, Member>, deps: &RunnerDeps) {
    if !members.values().any(|m| m.needs_resync) {
        return;
    }
    let snapshot = session.snapshot();
    for member in members.values_mut() {
        if member.needs_resync
            && member
                .events
                .try_send(SessionEvent::Resync(snapshot.clone()))
                .is_ok()
        {
            member.needs_resync = false;
            deps.metrics.snapshots_sent_total.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Explicit stop or grace teardown: end the session if still live, then seal.
fn finish(
    session: &mut Session,
    shared: &SessionShared,
    members: &mut HashMap<Uuid, Member>,
    deps: &RunnerDeps,
) {
    match session.end() {
        Ok(scores) => seal(session, shared, members, deps, scores),
        Err(SessionError::AlreadyEnded) => {}
        Err(e) => warn!(session = %session.id, "session end failed: {}", e),
    }
}

/// Broadcast the final event and publish the sealed replay.
fn seal(
    session: &Session,
    shared: &SessionShared,
    members: &mut HashMap<Uuid, Member>,
    deps: &RunnerDeps,
    scores: Vec<(SlotIndex, u32)>,
) {
    shared.store_state(SessionState::Ended);
    let replay_id = session.export_replay().map(|artifact| {
        let id = artifact.metadata.replay_id;
        deps.replays.insert(artifact);
        deps.metrics
            .replays_stored
            .store(deps.replays.len() as u64, Ordering::Relaxed);
        id
    });
    deps.metrics.sessions_ended_total.fetch_add(1, Ordering::Relaxed);
    broadcast(members, SessionEvent::Ended { scores, replay_id }, deps);
}

/// Bounded per-member event channel sized for broadcast fan-out.
pub fn event_channel() -> (mpsc::Sender<SessionEvent>, mpsc::Receiver<SessionEvent>) {
    mpsc::channel(limits::OUTBOUND_BUFFER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::model::EntityKind;
    use crate::session::session::SessionOptions;

    fn deps() -> RunnerDeps {
        RunnerDeps {
            metrics: Arc::new(Metrics::new()),
            replays: Arc::new(ReplayStore::new()),
            tick_duration: Duration::from_millis(2),
            empty_grace: Duration::from_secs(60),
        }
    }

    fn options() -> SessionOptions {
        SessionOptions {
            game_type: GameType::Pvp,
            difficulty: Difficulty::Medium,
            max_players: 2,
            map_size: 64,
            snapshot_interval_ticks: 300,
        }
    }

    #[tokio::test]
    async fn test_join_auto_start_and_deltas_flow() {
        let deps = deps();
        let handle = spawn(Session::create(options()), deps.clone());

        let (tx_a, mut rx_a) = event_channel();
        let joined = handle.join(Uuid::from_u128(1), tx_a).await.unwrap();
        assert_eq!(joined.slot, 0);
        assert!(!joined.snapshot.entities.is_empty());

        let (tx_b, _rx_b) = event_channel();
        let second = handle.join(Uuid::from_u128(2), tx_b).await.unwrap();
        assert_eq!(second.slot, 1);

        // Player A hears about B, then the auto-start.
        let mut saw_joined = false;
        let mut saw_started = false;
        for _ in 0..4 {
            match tokio::time::timeout(Duration::from_secs(1), rx_a.recv())
                .await
                .unwrap()
            {
                Some(SessionEvent::PlayerJoined { slot, .. }) => {
                    assert_eq!(slot, 1);
                    saw_joined = true;
                }
                Some(SessionEvent::Started { .. }) => {
                    saw_started = true;
                    break;
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert!(saw_joined && saw_started);

        // Move a worker so the tick loop produces a delta.
        let worker = joined
            .snapshot
            .entities
            .iter()
            .find(|e| e.kind == EntityKind::Worker && e.owner == Some(0))
            .map(|e| e.id)
            .unwrap();
        handle
            .send_command(
                Uuid::from_u128(1),
                None,
                CommandPayload::Move {
                    unit_ids: vec![worker],
                    position: crate::util::vec2::Vec2::new(20.0, 20.0),
                },
            )
            .unwrap();

        let mut saw_delta = false;
        for _ in 0..200 {
            match tokio::time::timeout(Duration::from_secs(1), rx_a.recv())
                .await
                .unwrap()
            {
                Some(SessionEvent::Delta { delta, .. }) if !delta.changed.is_empty() => {
                    saw_delta = true;
                    break;
                }
                Some(_) => {}
                None => panic!("event channel closed early"),
            }
        }
        assert!(saw_delta, "no delta observed after a move command");

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_publishes_replay() {
        let deps = deps();
        let handle = spawn(Session::create(options()), deps.clone());

        let (tx_a, mut rx_a) = event_channel();
        handle.join(Uuid::from_u128(1), tx_a).await.unwrap();
        let (tx_b, _rx_b) = event_channel();
        handle.join(Uuid::from_u128(2), tx_b).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.stop().await;

        let mut replay_id = None;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_secs(1), rx_a.recv()).await
        {
            if let SessionEvent::Ended { replay_id: id, scores } = event {
                assert_eq!(scores.len(), 2);
                replay_id = id;
                break;
            }
        }
        let replay_id = replay_id.expect("no ended event with replay id");
        assert!(deps.replays.get(replay_id).is_some());
        assert!(handle.is_ended());
    }

    // A session whose last human disconnects is torn down once the grace
    // period expires, even though it never started ticking.
    #[tokio::test(start_paused = true)]
    async fn test_empty_grace_ends_session() {
        let deps = RunnerDeps {
            empty_grace: Duration::from_millis(500),
            ..deps()
        };
        let handle = spawn(Session::create(options()), deps.clone());

        let (tx, rx) = event_channel();
        handle.join(Uuid::from_u128(1), tx).await.unwrap();
        // Dropping the receiver is how a vanished connection looks to the
        // runner: housekeeping reaps the member, then the grace clock runs.
        drop(rx);

        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(handle.is_ended());
        assert_eq!(deps.metrics.sessions_ended_total.load(Ordering::Relaxed), 1);
        assert_eq!(deps.replays.len(), 1);
    }

    #[tokio::test]
    async fn test_info_reflects_members() {
        let handle = spawn(Session::create(options()), deps());
        let (tx, _rx) = event_channel();
        handle.join(Uuid::from_u128(7), tx).await.unwrap();

        let info = handle.info().await.unwrap();
        assert_eq!(info.players, vec![Uuid::from_u128(7)]);
        assert_eq!(info.max_players, 2);
        assert_eq!(handle.shared.player_count(), 1);
        handle.stop().await;
    }
}
