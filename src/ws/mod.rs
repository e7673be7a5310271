//! WebSocket transport and wire protocol

pub mod handler;
pub mod protocol;

pub use handler::{pong_ws_handler, tetris_ws_handler};
