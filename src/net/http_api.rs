//! REST surface for session and matchmaking management.
//!
//! Not the hot path: a small hand-rolled HTTP/1.1 server over a raw
//! `TcpListener`, one task per request, `Connection: close` semantics.
//!
//! Routes:
//! - `POST /sessions`                create a session
//! - `POST /sessions/join`           resolve a join code to a session
//! - `GET  /sessions`                list sessions (`?joinable=true` filters)
//! - `GET  /sessions/{id}`           public session state (spectating)
//! - `GET  /replays/{id}`            sealed replay artifact
//! - `POST /matchmaking`             enqueue a matchmaking request
//! - `GET  /matchmaking/{playerId}`  poll queue position / match result

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::ai::Difficulty;
use crate::matchmaking::{GameType, MatchmakingQueue};
use crate::metrics::Metrics;
use crate::replay::ReplayStore;
use crate::session::runner::SessionHandle;
use crate::session::{SessionFilter, SessionOptions, SessionRegistry};

/// Shared dependencies for request handling.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<SessionRegistry>,
    pub replays: Arc<ReplayStore>,
    pub matchmaking: Arc<Mutex<MatchmakingQueue>>,
    pub metrics: Arc<Metrics>,
    /// Session defaults applied when a create request omits fields.
    pub default_max_players: usize,
    pub default_map_size: u32,
    pub snapshot_interval_ticks: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    game_type: GameType,
    #[serde(default)]
    difficulty: Option<Difficulty>,
    #[serde(default)]
    max_players: Option<usize>,
    #[serde(default)]
    map_size: Option<u32>,
    /// AI seats filled at creation time (pve).
    #[serde(default)]
    ai_opponents: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinCodeRequest {
    join_code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnqueueRequest {
    player_id: Uuid,
    game_type: GameType,
    difficulty: Difficulty,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionSummary {
    session_id: Uuid,
    join_code: String,
    game_type: GameType,
    difficulty: Difficulty,
    state: crate::session::SessionState,
    tick: u64,
    players: usize,
    max_players: usize,
}

impl SessionSummary {
    fn from_handle(handle: &SessionHandle) -> Self {
        Self {
            session_id: handle.id,
            join_code: handle.join_code.clone(),
            game_type: handle.game_type,
            difficulty: handle.difficulty,
            state: handle.shared.state(),
            tick: handle.shared.tick(),
            players: handle.shared.player_count(),
            max_players: handle.max_players,
        }
    }
}

/// Accept and answer requests forever.
pub async fn serve(listener: TcpListener, state: ApiState) -> anyhow::Result<()> {
    info!(
        "REST API listening on http://{}",
        listener.local_addr().map(|a| a.to_string()).unwrap_or_default()
    );

    loop {
        let (socket, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_request(socket, &state).await {
                debug!("API request from {} failed: {}", peer, e);
            }
        });
    }
}

/// Bind and serve.
pub async fn run(addr: SocketAddr, state: ApiState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state).await
}

async fn handle_request(mut socket: TcpStream, state: &ApiState) -> std::io::Result<()> {
    let mut buffer = vec![0u8; 16 * 1024];
    let n = socket.read(&mut buffer).await?;
    if n == 0 {
        return Ok(());
    }
    let request = String::from_utf8_lossy(&buffer[..n]).into_owned();

    let (method, path, query, body) = match parse_request(&request) {
        Some(parts) => parts,
        None => {
            socket
                .write_all(response(400, &json!({"error": "malformed request"})).as_bytes())
                .await?;
            return Ok(());
        }
    };

    let reply = route(method, path, query, body, state).await;
    socket.write_all(reply.as_bytes()).await?;
    Ok(())
}

/// Split the raw request into method, path, query string, and body.
fn parse_request(raw: &str) -> Option<(&str, &str, &str, &str)> {
    let mut lines = raw.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    };
    let body = raw.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("");
    Some((method, path, query, body))
}

async fn route(method: &str, path: &str, query: &str, body: &str, state: &ApiState) -> String {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match (method, segments.as_slice()) {
        ("POST", ["sessions"]) => create_session(body, state).await,
        ("POST", ["sessions", "join"]) => resolve_join_code(body, state),
        ("GET", ["sessions"]) => list_sessions(query, state),
        ("GET", ["sessions", id]) => session_state(id, state).await,
        ("GET", ["replays", id]) => replay(id, state),
        ("POST", ["matchmaking"]) => enqueue_matchmaking(body, state).await,
        ("GET", ["matchmaking", player_id]) => matchmaking_status(player_id, state),
        _ => response(404, &json!({"error": "not found"})),
    }
}

async fn create_session(body: &str, state: &ApiState) -> String {
    let request: CreateSessionRequest = match serde_json::from_str(body) {
        Ok(request) => request,
        Err(e) => return response(400, &json!({"error": e.to_string()})),
    };

    let difficulty = request.difficulty.unwrap_or(Difficulty::Medium);
    let options = SessionOptions {
        game_type: request.game_type,
        difficulty,
        max_players: request.max_players.unwrap_or(state.default_max_players),
        map_size: request.map_size.unwrap_or(state.default_map_size),
        snapshot_interval_ticks: state.snapshot_interval_ticks,
    };
    if options.max_players < 2 || request.ai_opponents >= options.max_players {
        return response(400, &json!({"error": "invalid player counts"}));
    }

    let handle = match state.registry.create(options) {
        Ok(handle) => handle,
        Err(e) => return response(503, &json!({"error": e.to_string()})),
    };
    for _ in 0..request.ai_opponents {
        if let Err(e) = handle.add_ai(difficulty).await {
            warn!(session = %handle.id, "failed to seat AI opponent: {}", e);
            break;
        }
    }

    response(201, &SessionSummary::from_handle(&handle))
}

fn resolve_join_code(body: &str, state: &ApiState) -> String {
    let request: JoinCodeRequest = match serde_json::from_str(body) {
        Ok(request) => request,
        Err(e) => return response(400, &json!({"error": e.to_string()})),
    };
    match state.registry.get_by_join_code(&request.join_code) {
        Some(handle) => response(200, &SessionSummary::from_handle(&handle)),
        None => response(404, &json!({"error": "unknown join code"})),
    }
}

fn list_sessions(query: &str, state: &ApiState) -> String {
    let filter = SessionFilter {
        joinable: query
            .split('&')
            .any(|pair| pair == "joinable=true"),
        ..Default::default()
    };
    let sessions: Vec<SessionSummary> = state
        .registry
        .list(filter)
        .iter()
        .map(SessionSummary::from_handle)
        .collect();
    response(200, &json!({ "sessions": sessions }))
}

async fn session_state(id: &str, state: &ApiState) -> String {
    let Ok(id) = Uuid::parse_str(id) else {
        return response(400, &json!({"error": "invalid session id"}));
    };
    let handle = match state.registry.get(id) {
        Ok(handle) => handle,
        Err(e) => return response(404, &json!({"error": e.to_string()})),
    };
    match handle.snapshot().await {
        Ok(snapshot) => response(
            200,
            &json!({
                "session": SessionSummary::from_handle(&handle),
                "gameState": snapshot,
            }),
        ),
        Err(e) => response(410, &json!({"error": e.to_string()})),
    }
}

fn replay(id: &str, state: &ApiState) -> String {
    let Ok(id) = Uuid::parse_str(id) else {
        return response(400, &json!({"error": "invalid replay id"}));
    };
    match state.replays.get(id) {
        Some(artifact) => response(200, &artifact),
        None => response(404, &json!({"error": "replay not found"})),
    }
}

async fn enqueue_matchmaking(body: &str, state: &ApiState) -> String {
    let request: EnqueueRequest = match serde_json::from_str(body) {
        Ok(request) => request,
        Err(e) => return response(400, &json!({"error": e.to_string()})),
    };

    let position = {
        let mut queue = state.matchmaking.lock();
        if let Err(e) = queue.add_player(request.player_id, request.game_type, request.difficulty)
        {
            return response(409, &json!({"error": e.to_string()}));
        }
        state
            .metrics
            .matchmaking_queued
            .store(queue.queued_count() as u64, Ordering::Relaxed);
        queue.get_position(request.player_id)
    };

    // Eagerly try to form a match so the fast path needs no background timer.
    if try_form_match(state).await.is_some() {
        let mut queue = state.matchmaking.lock();
        if let Some(session_id) = queue.take_match_result(request.player_id) {
            return response(200, &json!({"status": "matched", "sessionId": session_id}));
        }
    }

    response(202, &json!({"status": "queued", "position": position}))
}

fn matchmaking_status(player_id: &str, state: &ApiState) -> String {
    let Ok(player_id) = Uuid::parse_str(player_id) else {
        return response(400, &json!({"error": "invalid player id"}));
    };

    let mut queue = state.matchmaking.lock();
    if let Some(session_id) = queue.take_match_result(player_id) {
        state
            .metrics
            .matchmaking_queued
            .store(queue.queued_count() as u64, Ordering::Relaxed);
        return response(200, &json!({"status": "matched", "sessionId": session_id}));
    }
    match queue.get_position(player_id) {
        Some(position) => response(200, &json!({"status": "queued", "position": position})),
        None => response(404, &json!({"status": "unknown"})),
    }
}

/// Form at most one match and create its session. Returns the session id.
pub async fn try_form_match(state: &ApiState) -> Option<Uuid> {
    let formed = state.matchmaking.lock().find_match()?;

    let is_pve = formed.game_type == GameType::Pve;
    let max_players = formed.players.len() + usize::from(is_pve);
    let options = SessionOptions {
        game_type: formed.game_type,
        difficulty: formed.difficulty,
        max_players,
        map_size: state.default_map_size,
        snapshot_interval_ticks: state.snapshot_interval_ticks,
    };

    let handle = match state.registry.create(options) {
        Ok(handle) => handle,
        Err(e) => {
            // Requeueing would reorder the bucket; drop the match and let the
            // players re-enqueue.
            warn!("matchmaking session creation failed: {}", e);
            return None;
        }
    };
    if is_pve {
        if let Err(e) = handle.add_ai(formed.difficulty).await {
            warn!(session = %handle.id, "failed to seat AI opponent: {}", e);
        }
    }

    {
        let mut queue = state.matchmaking.lock();
        for player in &formed.players {
            queue.record_match_result(*player, handle.id);
        }
        state
            .metrics
            .matchmaking_queued
            .store(queue.queued_count() as u64, Ordering::Relaxed);
    }
    state.metrics.matches_formed_total.fetch_add(1, Ordering::Relaxed);
    info!(session = %handle.id, players = formed.players.len(), "match formed");
    Some(handle.id)
}

fn response<T: Serialize>(status: u16, body: &T) -> String {
    let reason = match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        400 => "Bad Request",
        404 => "Not Found",
        409 => "Conflict",
        410 => "Gone",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    };
    let body = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::runner::RunnerDeps;
    use std::time::Duration;

    fn test_state() -> ApiState {
        let metrics = Arc::new(Metrics::new());
        let replays = Arc::new(ReplayStore::new());
        let deps = RunnerDeps {
            metrics: metrics.clone(),
            replays: replays.clone(),
            tick_duration: Duration::from_millis(5),
            empty_grace: Duration::from_secs(60),
        };
        ApiState {
            registry: Arc::new(SessionRegistry::new(8, deps)),
            replays,
            matchmaking: Arc::new(Mutex::new(MatchmakingQueue::new(
                Duration::from_secs(300),
                4,
            ))),
            metrics,
            default_max_players: 8,
            default_map_size: 128,
            snapshot_interval_ticks: 300,
        }
    }

    fn body_of(reply: &str) -> serde_json::Value {
        let body = reply.split("\r\n\r\n").nth(1).unwrap();
        serde_json::from_str(body).unwrap()
    }

    fn status_of(reply: &str) -> u16 {
        reply
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap()
    }

    #[test]
    fn test_parse_request() {
        let raw = "POST /sessions?x=1 HTTP/1.1\r\nHost: h\r\nContent-Length: 2\r\n\r\n{}";
        let (method, path, query, body) = parse_request(raw).unwrap();
        assert_eq!(method, "POST");
        assert_eq!(path, "/sessions");
        assert_eq!(query, "x=1");
        assert_eq!(body, "{}");
    }

    #[tokio::test]
    async fn test_create_and_list_sessions() {
        let state = test_state();
        let reply = route(
            "POST",
            "/sessions",
            "",
            r#"{"gameType":"pvp","maxPlayers":2,"mapSize":64}"#,
            &state,
        )
        .await;
        assert_eq!(status_of(&reply), 201);
        let created = body_of(&reply);
        assert_eq!(created["maxPlayers"], 2);
        assert_eq!(created["state"], "created");
        assert!(created["joinCode"].is_string());

        let listed = route("GET", "/sessions", "joinable=true", "", &state).await;
        assert_eq!(body_of(&listed)["sessions"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_session_rejects_bad_body() {
        let state = test_state();
        let reply = route("POST", "/sessions", "", "not json", &state).await;
        assert_eq!(status_of(&reply), 400);
    }

    #[tokio::test]
    async fn test_join_code_resolution() {
        let state = test_state();
        let created = body_of(
            &route(
                "POST",
                "/sessions",
                "",
                r#"{"gameType":"ffa","maxPlayers":4}"#,
                &state,
            )
            .await,
        );
        let code = created["joinCode"].as_str().unwrap();

        let resolved = route(
            "POST",
            "/sessions/join",
            "",
            &format!(r#"{{"joinCode":"{}"}}"#, code.to_lowercase()),
            &state,
        )
        .await;
        assert_eq!(status_of(&resolved), 200);
        assert_eq!(body_of(&resolved)["sessionId"], created["sessionId"]);

        let missing = route("POST", "/sessions/join", "", r#"{"joinCode":"ZZZZZZ"}"#, &state).await;
        assert_eq!(status_of(&missing), 404);
    }

    #[tokio::test]
    async fn test_session_state_spectator_view() {
        let state = test_state();
        let created = body_of(
            &route(
                "POST",
                "/sessions",
                "",
                r#"{"gameType":"pve","maxPlayers":2,"aiOpponents":1}"#,
                &state,
            )
            .await,
        );
        let id = created["sessionId"].as_str().unwrap();

        let reply = route("GET", &format!("/sessions/{}", id), "", "", &state).await;
        assert_eq!(status_of(&reply), 200);
        let body = body_of(&reply);
        // The AI seat already spawned its starting entities.
        assert!(!body["gameState"]["entities"].as_array().unwrap().is_empty());
        assert_eq!(body["session"]["players"], 1);
    }

    #[tokio::test]
    async fn test_replay_not_found() {
        let state = test_state();
        let reply = route(
            "GET",
            &format!("/replays/{}", Uuid::from_u128(1)),
            "",
            "",
            &state,
        )
        .await;
        assert_eq!(status_of(&reply), 404);
    }

    #[tokio::test]
    async fn test_matchmaking_enqueue_and_poll() {
        let state = test_state();
        let alice = Uuid::from_u128(1);
        let bob = Uuid::from_u128(2);

        let first = route(
            "POST",
            "/matchmaking",
            "",
            &format!(
                r#"{{"playerId":"{}","gameType":"pvp","difficulty":"medium"}}"#,
                alice
            ),
            &state,
        )
        .await;
        assert_eq!(status_of(&first), 202);
        assert_eq!(body_of(&first)["position"], 1);

        let second = route(
            "POST",
            "/matchmaking",
            "",
            &format!(
                r#"{{"playerId":"{}","gameType":"pvp","difficulty":"medium"}}"#,
                bob
            ),
            &state,
        )
        .await;
        // Second enqueue formed the match; both players can poll it.
        let _ = second;

        let polled = route("GET", &format!("/matchmaking/{}", alice), "", "", &state).await;
        assert_eq!(status_of(&polled), 200);
        let body = body_of(&polled);
        assert_eq!(body["status"], "matched");
        assert!(body["sessionId"].is_string());
        assert_eq!(state.registry.len(), 1);

        // Polling again after consumption reports unknown.
        let again = route("GET", &format!("/matchmaking/{}", alice), "", "", &state).await;
        assert_eq!(status_of(&again), 404);
    }

    #[tokio::test]
    async fn test_duplicate_matchmaking_enqueue_conflicts() {
        let state = test_state();
        let player = Uuid::from_u128(1);
        let body = format!(
            r#"{{"playerId":"{}","gameType":"ffa","difficulty":"easy"}}"#,
            player
        );
        route("POST", "/matchmaking", "", &body, &state).await;
        let duplicate = route("POST", "/matchmaking", "", &body, &state).await;
        assert_eq!(status_of(&duplicate), 409);
    }
}
