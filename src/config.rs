use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind all listeners to
    pub bind_address: IpAddr,
    /// WebSocket gateway port
    pub port: u16,
    /// REST API port
    pub http_port: u16,
    /// Prometheus metrics port
    pub metrics_port: u16,
    /// Simulation tick rate in Hz
    pub tick_rate: u32,
    /// Full-snapshot checkpoint interval in ticks
    pub snapshot_interval_ticks: u64,
    /// Maximum number of concurrent sessions
    pub max_sessions: usize,
    /// Default maximum players per session when a create request omits it
    pub default_max_players: usize,
    /// Seconds a started session may sit with zero connected humans before teardown
    pub empty_grace_secs: u64,
    /// Seconds an unmatched matchmaking entry survives
    pub matchmaking_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            // Use const to avoid runtime parsing
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 9000,
            http_port: 8080,
            metrics_port: 9090,
            tick_rate: crate::game::constants::timing::TICK_RATE,
            snapshot_interval_ticks: crate::game::constants::timing::SNAPSHOT_INTERVAL_TICKS,
            max_sessions: 100,
            default_max_players: 8,
            empty_grace_secs: 30,
            matchmaking_timeout_secs: 300,
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BIND_ADDRESS") {
            if let Ok(parsed) = addr.parse() {
                config.bind_address = parsed;
            } else {
                tracing::warn!("Invalid BIND_ADDRESS '{}', using default", addr);
            }
        }

        if let Ok(port) = std::env::var("PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                if parsed > 0 {
                    config.port = parsed;
                } else {
                    tracing::warn!("PORT must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid PORT '{}', using default", port);
            }
        }

        if let Ok(port) = std::env::var("HTTP_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                if parsed > 0 {
                    config.http_port = parsed;
                } else {
                    tracing::warn!("HTTP_PORT must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid HTTP_PORT '{}', using default", port);
            }
        }

        if let Ok(port) = std::env::var("METRICS_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                if parsed > 0 {
                    config.metrics_port = parsed;
                } else {
                    tracing::warn!("METRICS_PORT must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid METRICS_PORT '{}', using default", port);
            }
        }

        if let Ok(rate) = std::env::var("TICK_RATE") {
            if let Ok(parsed) = rate.parse::<u32>() {
                if parsed > 0 && parsed <= 240 {
                    config.tick_rate = parsed;
                } else {
                    tracing::warn!("TICK_RATE must be 1-240, using default");
                }
            } else {
                tracing::warn!("Invalid TICK_RATE '{}', using default", rate);
            }
        }

        if let Ok(interval) = std::env::var("SNAPSHOT_INTERVAL_TICKS") {
            if let Ok(parsed) = interval.parse::<u64>() {
                if parsed > 0 {
                    config.snapshot_interval_ticks = parsed;
                } else {
                    tracing::warn!("SNAPSHOT_INTERVAL_TICKS must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid SNAPSHOT_INTERVAL_TICKS '{}', using default", interval);
            }
        }

        if let Ok(max_sessions) = std::env::var("MAX_SESSIONS") {
            if let Ok(parsed) = max_sessions.parse::<usize>() {
                if parsed > 0 && parsed <= 10000 {
                    config.max_sessions = parsed;
                } else {
                    tracing::warn!("MAX_SESSIONS must be 1-10000, using default");
                }
            } else {
                tracing::warn!("Invalid MAX_SESSIONS '{}', using default", max_sessions);
            }
        }

        if let Ok(grace) = std::env::var("EMPTY_GRACE_SECS") {
            if let Ok(parsed) = grace.parse::<u64>() {
                config.empty_grace_secs = parsed;
            } else {
                tracing::warn!("Invalid EMPTY_GRACE_SECS '{}', using default", grace);
            }
        }

        if let Ok(timeout) = std::env::var("MATCHMAKING_TIMEOUT_SECS") {
            if let Ok(parsed) = timeout.parse::<u64>() {
                if parsed > 0 {
                    config.matchmaking_timeout_secs = parsed;
                } else {
                    tracing::warn!("MATCHMAKING_TIMEOUT_SECS must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid MATCHMAKING_TIMEOUT_SECS '{}', using default", timeout);
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 || self.http_port == 0 || self.metrics_port == 0 {
            return Err("Ports cannot be 0".to_string());
        }
        if self.port == self.http_port || self.port == self.metrics_port {
            return Err("PORT, HTTP_PORT and METRICS_PORT must all differ".to_string());
        }
        if self.tick_rate == 0 {
            return Err("tick_rate must be at least 1".to_string());
        }
        if self.max_sessions == 0 {
            return Err("max_sessions must be at least 1".to_string());
        }
        if self.default_max_players < 2 {
            return Err("default_max_players must be at least 2".to_string());
        }
        Ok(())
    }

    /// Duration of one simulation tick at the configured rate
    pub fn tick_duration(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.tick_rate as u64)
    }
}
