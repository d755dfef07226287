//! WebSocket gateway: accept loop, authentication, and per-connection
//! routing between the wire protocol and session tasks.
//!
//! The gateway is deliberately thin. It parses frames, checks identity, and
//! forwards; every game-rule decision happens inside the session task.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::command_queue::CommandQueueError;
use crate::game::constants::limits;
use crate::metrics::Metrics;
use crate::net::protocol::{self, AiAction, ClientMessage, FinalScore, ServerMessage};
use crate::session::runner::{self, SessionEvent, SessionHandle};
use crate::session::SessionRegistry;

/// Shared dependencies for every connection task.
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<SessionRegistry>,
    pub metrics: Arc<Metrics>,
}

/// Accept connections forever. Each connection gets its own task.
pub async fn serve(listener: TcpListener, state: GatewayState) -> anyhow::Result<()> {
    info!(
        "Gateway listening on ws://{}",
        listener.local_addr().map(|a| a.to_string()).unwrap_or_default()
    );

    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer, state).await;
        });
    }
}

/// Bind and serve.
pub async fn run(addr: SocketAddr, state: GatewayState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state).await
}

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Per-connection state: who the peer is and where they are seated.
struct Connection {
    player_id: Option<Uuid>,
    session: Option<SessionHandle>,
    protocol_errors: u32,
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: GatewayState) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
    };
    debug!("Client connected from {}", peer);
    state.metrics.connections_active.fetch_add(1, Ordering::Relaxed);

    let (mut ws_write, mut ws_read) = ws_stream.split();
    // Created up front so the select loop always has a live receiver; the
    // session only learns the sender on join.
    let (event_tx, mut event_rx) = runner::event_channel();

    let mut conn = Connection {
        player_id: None,
        session: None,
        protocol_errors: 0,
    };

    loop {
        tokio::select! {
            frame = ws_read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        state.metrics.messages_received.fetch_add(1, Ordering::Relaxed);
                        handle_text(&text, peer, &mut conn, &event_tx, &state, &mut ws_write).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {
                        // Binary and other frames are protocol errors too.
                        log_protocol_error(&mut conn, peer, "non-text frame");
                    }
                }
            }
            event = event_rx.recv() => {
                match event {
                    Some(event) => {
                        let message = message_for_event(event, &conn);
                        if send(&mut ws_write, &message, &state).await.is_err() {
                            break;
                        }
                    }
                    // Session task gone; the ended message was already sent.
                    None => break,
                }
            }
        }
    }

    if let (Some(player_id), Some(session)) = (conn.player_id, conn.session.as_ref()) {
        session.leave(player_id).await;
        state.metrics.players_connected.fetch_sub(1, Ordering::Relaxed);
    }
    state.metrics.connections_active.fetch_sub(1, Ordering::Relaxed);
    debug!("Client {} disconnected", peer);
}

async fn handle_text(
    text: &str,
    peer: SocketAddr,
    conn: &mut Connection,
    event_tx: &tokio::sync::mpsc::Sender<SessionEvent>,
    state: &GatewayState,
    ws_write: &mut WsSink,
) {
    let message = match protocol::decode(text) {
        Ok(message) => message,
        Err(e) => {
            log_protocol_error(conn, peer, &e.to_string());
            return;
        }
    };

    match message {
        ClientMessage::Auth { player_id, token: _ } => {
            conn.player_id = Some(player_id);
            let _ = send(ws_write, &ServerMessage::Authenticated { player_id }, state).await;
        }
        ClientMessage::JoinGame { game_id, player_id } => {
            if conn.player_id != Some(player_id) {
                let _ = send_error(ws_write, "authenticate before joining", state).await;
                return;
            }
            let handle = match state.registry.get(game_id) {
                Ok(handle) => handle,
                Err(e) => {
                    let _ = send_error(ws_write, &e.to_string(), state).await;
                    return;
                }
            };
            match handle.join(player_id, event_tx.clone()).await {
                Ok(joined) => {
                    state.metrics.players_connected.fetch_add(1, Ordering::Relaxed);
                    conn.session = Some(handle);
                    let init = ServerMessage::GameStateInit {
                        game_state: joined.snapshot,
                        your_player_id: player_id,
                        your_slot: joined.slot,
                    };
                    let _ = send(ws_write, &init, state).await;
                }
                Err(e) => {
                    let _ = send_error(ws_write, &e.to_string(), state).await;
                }
            }
        }
        ClientMessage::Command { payload, tick } => {
            let (Some(player_id), Some(session)) = (conn.player_id, conn.session.as_ref())
            else {
                let _ = send_error(ws_write, "join a game before sending commands", state).await;
                return;
            };
            match session.send_command(player_id, tick, payload) {
                Ok(()) => {}
                Err(CommandQueueError::Disconnected) => {
                    let _ = send_error(ws_write, "session has ended", state).await;
                }
                Err(CommandQueueError::Full) => {
                    let _ = send_error(ws_write, "command queue is full", state).await;
                }
            }
        }
        ClientMessage::Ping {} => {
            let _ = send(ws_write, &ServerMessage::Pong {}, state).await;
        }
    }
}

fn message_for_event(event: SessionEvent, conn: &Connection) -> ServerMessage {
    match event {
        SessionEvent::Started { tick: _, seed } => ServerMessage::GameStarted {
            game_start_time: crate::game::command::wall_clock_micros() / 1_000,
            seed,
        },
        SessionEvent::PlayerJoined { player_id, total_players, .. } => {
            ServerMessage::PlayerJoined { player_id, total_players }
        }
        SessionEvent::PlayerLeft { player_id, remaining_players } => {
            ServerMessage::PlayerLeft { player_id, remaining_players }
        }
        SessionEvent::Delta { delta, ai_actions } => ServerMessage::StateUpdate {
            tick: delta.tick,
            ai_actions: ai_actions.iter().map(AiAction::from_command).collect(),
            deltas: delta,
        },
        SessionEvent::Resync(snapshot) => ServerMessage::StateSync { game_state: snapshot },
        SessionEvent::Ended { scores, replay_id } => ServerMessage::GameEnded {
            final_scores: scores
                .into_iter()
                .map(|(slot, score)| FinalScore { slot, score })
                .collect(),
            replay_id,
            duration: conn
                .session
                .as_ref()
                .map(|s| s.shared.tick())
                .unwrap_or(0),
        },
        SessionEvent::Error { message, .. } => ServerMessage::Error { message },
    }
}

async fn send(
    ws_write: &mut WsSink,
    message: &ServerMessage,
    state: &GatewayState,
) -> Result<(), ()> {
    let text = match protocol::encode(message) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode server message: {}", e);
            return Ok(());
        }
    };
    match ws_write.send(Message::Text(text.into())).await {
        Ok(()) => {
            state.metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        Err(_) => Err(()),
    }
}

async fn send_error(ws_write: &mut WsSink, message: &str, state: &GatewayState) -> Result<(), ()> {
    send(
        ws_write,
        &ServerMessage::Error { message: message.to_string() },
        state,
    )
    .await
}

/// Debug-log the first few protocol errors per connection, then stay quiet.
fn log_protocol_error(conn: &mut Connection, peer: SocketAddr, detail: &str) {
    conn.protocol_errors += 1;
    if conn.protocol_errors <= limits::PROTOCOL_ERROR_LOG_CAP {
        debug!(
            "Protocol error from {} ({} so far): {}",
            peer, conn.protocol_errors, detail
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ai::Difficulty;
    use crate::matchmaking::GameType;
    use crate::replay::ReplayStore;
    use crate::session::runner::RunnerDeps;
    use crate::session::session::SessionOptions;
    use futures_util::StreamExt;
    use std::time::Duration;
    use tokio_tungstenite::connect_async;

    fn test_state() -> GatewayState {
        let metrics = Arc::new(Metrics::new());
        let deps = RunnerDeps {
            metrics: metrics.clone(),
            replays: Arc::new(ReplayStore::new()),
            tick_duration: Duration::from_millis(5),
            empty_grace: Duration::from_secs(60),
        };
        GatewayState {
            registry: Arc::new(SessionRegistry::new(8, deps)),
            metrics,
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

    async fn recv_json(
        ws: &mut WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>,
    ) -> serde_json::Value {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("connection closed")
                .expect("read error");
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_auth_join_and_init_flow() {
        let state = test_state();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state.clone()));

        let session = state.registry.create(options()).unwrap();
        let url = format!("ws://{}", addr);
        let (mut ws, _) = connect_async(&url).await.unwrap();

        let player = Uuid::from_u128(42);
        ws.send(Message::Text(
            format!(
                r#"{{"type":"auth","payload":{{"playerId":"{}"}}}}"#,
                player
            )
            .into(),
        ))
        .await
        .unwrap();
        let authed = recv_json(&mut ws).await;
        assert_eq!(authed["type"], "authenticated");

        ws.send(Message::Text(
            format!(
                r#"{{"type":"join_game","payload":{{"gameId":"{}","playerId":"{}"}}}}"#,
                session.id, player
            )
            .into(),
        ))
        .await
        .unwrap();
        let init = recv_json(&mut ws).await;
        assert_eq!(init["type"], "game_state_init");
        assert_eq!(init["payload"]["yourSlot"], 0);
        assert!(init["payload"]["gameState"]["entities"].is_array());

        session.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection() {
        let state = test_state();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state));

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        ws.send(Message::Text("this is not json".to_string().into()))
            .await
            .unwrap();
        ws.send(Message::Text(r#"{"type":"ping","payload":{}}"#.to_string().into()))
            .await
            .unwrap();

        // The ping after the garbage still gets its pong.
        let pong = recv_json(&mut ws).await;
        assert_eq!(pong["type"], "pong");
    }

    #[tokio::test]
    async fn test_command_before_join_rejected() {
        let state = test_state();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state));

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        ws.send(Message::Text(
            r#"{"type":"command","payload":{"commandType":"move","unitIds":[1],"position":{"x":1.0,"y":1.0}}}"#
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

        let error = recv_json(&mut ws).await;
        assert_eq!(error["type"], "error");
    }
}
