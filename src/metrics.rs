//! Prometheus-compatible metrics endpoint
//!
//! Exposes session server metrics in Prometheus format for Grafana dashboards.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Metrics registry for the session server
#[derive(Debug)]
pub struct Metrics {
    // Session counts
    pub sessions_active: AtomicU64,
    pub sessions_created_total: AtomicU64,
    pub sessions_ended_total: AtomicU64,

    // Player counts
    pub players_connected: AtomicU64,
    pub ai_runners_active: AtomicU64,

    // Tick timing (microseconds), aggregated across all session loops
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,
    pub tick_overruns_total: AtomicU64,

    // Command pipeline
    pub commands_applied_total: AtomicU64,
    pub commands_rejected_total: AtomicU64,

    // Broadcast pipeline
    pub deltas_sent_total: AtomicU64,
    pub deltas_dropped_total: AtomicU64,
    pub snapshots_sent_total: AtomicU64,

    // Network stats
    pub connections_active: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,

    // Matchmaking
    pub matchmaking_queued: AtomicU64,
    pub matches_formed_total: AtomicU64,

    // Replays
    pub replays_stored: AtomicU64,

    // Server uptime
    start_time: Instant,

    // Rolling tick times for percentile calculation (VecDeque for O(1) pop_front)
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            sessions_active: AtomicU64::new(0),
            sessions_created_total: AtomicU64::new(0),
            sessions_ended_total: AtomicU64::new(0),
            players_connected: AtomicU64::new(0),
            ai_runners_active: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            tick_overruns_total: AtomicU64::new(0),
            commands_applied_total: AtomicU64::new(0),
            commands_rejected_total: AtomicU64::new(0),
            deltas_sent_total: AtomicU64::new(0),
            deltas_dropped_total: AtomicU64::new(0),
            snapshots_sent_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            matchmaking_queued: AtomicU64::new(0),
            matches_formed_total: AtomicU64::new(0),
            replays_stored: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(1000)),
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        // Update rolling history for percentiles
        let mut history = self.tick_history.write();
        history.push_back(us);

        // Keep last 1000 samples - O(1) with VecDeque
        while history.len() > 1000 {
            history.pop_front();
        }

        // Calculate percentiles
        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us.store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us.store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us.store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        // Helper macro for metrics
        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        // Session metrics
        metric!("stronghold_sessions_active", "Number of live sessions", "gauge",
            self.sessions_active.load(Ordering::Relaxed));
        metric!("stronghold_sessions_created_total", "Total sessions created", "counter",
            self.sessions_created_total.load(Ordering::Relaxed));
        metric!("stronghold_sessions_ended_total", "Total sessions ended", "counter",
            self.sessions_ended_total.load(Ordering::Relaxed));

        // Player metrics
        metric!("stronghold_players_connected", "Connected human players", "gauge",
            self.players_connected.load(Ordering::Relaxed));
        metric!("stronghold_ai_runners_active", "Active AI agent runners", "gauge",
            self.ai_runners_active.load(Ordering::Relaxed));

        // Performance metrics
        metric!("stronghold_tick_time_microseconds", "Most recent tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("stronghold_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("stronghold_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("stronghold_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("stronghold_tick_count", "Total ticks processed across all sessions", "counter",
            self.tick_count.load(Ordering::Relaxed));
        metric!("stronghold_tick_overruns_total", "Ticks whose work exceeded the tick budget", "counter",
            self.tick_overruns_total.load(Ordering::Relaxed));

        // Command metrics
        metric!("stronghold_commands_applied_total", "Commands applied to session models", "counter",
            self.commands_applied_total.load(Ordering::Relaxed));
        metric!("stronghold_commands_rejected_total", "Commands rejected before application", "counter",
            self.commands_rejected_total.load(Ordering::Relaxed));

        // Broadcast metrics
        metric!("stronghold_deltas_sent_total", "State deltas delivered to members", "counter",
            self.deltas_sent_total.load(Ordering::Relaxed));
        metric!("stronghold_deltas_dropped_total", "State deltas dropped on full member buffers", "counter",
            self.deltas_dropped_total.load(Ordering::Relaxed));
        metric!("stronghold_snapshots_sent_total", "Full snapshots delivered to members", "counter",
            self.snapshots_sent_total.load(Ordering::Relaxed));

        // Network metrics
        metric!("stronghold_connections_active", "Active WebSocket connections", "gauge",
            self.connections_active.load(Ordering::Relaxed));
        metric!("stronghold_messages_sent_total", "Total messages sent", "counter",
            self.messages_sent.load(Ordering::Relaxed));
        metric!("stronghold_messages_received_total", "Total messages received", "counter",
            self.messages_received.load(Ordering::Relaxed));

        // Matchmaking metrics
        metric!("stronghold_matchmaking_queued", "Players waiting in matchmaking", "gauge",
            self.matchmaking_queued.load(Ordering::Relaxed));
        metric!("stronghold_matches_formed_total", "Matches formed", "counter",
            self.matches_formed_total.load(Ordering::Relaxed));

        // Replay metrics
        metric!("stronghold_replays_stored", "Sealed replay artifacts held in memory", "gauge",
            self.replays_stored.load(Ordering::Relaxed));

        metric!("stronghold_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);

                    // Parse the request line
                    let response = if request.starts_with("GET /metrics") {
                        let body = metrics.to_prometheus();
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else if request.starts_with("GET /health") || request.starts_with("GET /") {
                        let body = "OK";
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    };

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.sessions_active.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_tick_time() {
        let metrics = Metrics::new();

        // Record some tick times
        for i in 0..100 {
            metrics.record_tick_time(Duration::from_micros(100 + i * 10));
        }

        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 100);
        assert!(metrics.tick_time_p95_us.load(Ordering::Relaxed) > 0);
        assert!(metrics.tick_time_p99_us.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.sessions_active.store(7, Ordering::Relaxed);
        metrics.players_connected.store(12, Ordering::Relaxed);
        metrics.tick_overruns_total.store(3, Ordering::Relaxed);

        let output = metrics.to_prometheus();

        assert!(output.contains("stronghold_sessions_active 7"));
        assert!(output.contains("stronghold_players_connected 12"));
        assert!(output.contains("stronghold_tick_overruns_total 3"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_uptime() {
        let metrics = Metrics::new();
        std::thread::sleep(Duration::from_millis(10));
        let _ = metrics.uptime_seconds();
    }
}
