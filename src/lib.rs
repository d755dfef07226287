//! Stronghold Server Library
//!
//! The authoritative session server for a real-time strategy game:
//! connection and session lifecycle, a deterministic command queue, a
//! fixed-tick simulation loop, AI agent runners, state delta broadcast,
//! replay recording, and matchmaking.

pub mod config;
pub mod util;
pub mod game;
pub mod matchmaking;
pub mod metrics;
pub mod net;
pub mod replay;
pub mod session;
