//! Arcade Server - authoritative real-time match server
//!
//! Hosts two-player rooms for a continuous game (Pong) and a discrete
//! game (Tetris):
//! - Session registry with player slots, spectators and promotion
//! - Fixed 60 Hz simulation and per-tick snapshot broadcast
//! - Match lifecycle with ready-up, termination and Supabase persistence

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod session;
pub mod store;
pub mod util;
pub mod ws;
