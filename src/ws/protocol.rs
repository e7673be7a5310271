//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Game variants hosted by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    /// Continuous physics, anonymous players
    Pong,
    /// Discrete grid, identity-bound players
    Tetris,
}

impl GameKind {
    pub fn name(self) -> &'static str {
        match self {
            GameKind::Pong => "pong",
            GameKind::Tetris => "tetris",
        }
    }

    /// Whether connections must carry a verified identity
    pub fn identity_bound(self) -> bool {
        matches!(self, GameKind::Tetris)
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "pong" => Some(GameKind::Pong),
            "tetris" => Some(GameKind::Tetris),
            _ => None,
        }
    }
}

impl std::fmt::Display for GameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One of the two player slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    A,
    B,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::A, Side::B];

    pub fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }

    pub fn opponent(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

/// Role assigned to a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    PlayerA,
    PlayerB,
    Spectator,
}

impl Role {
    pub fn player(side: Side) -> Self {
        match side {
            Side::A => Role::PlayerA,
            Side::B => Role::PlayerB,
        }
    }

    pub fn side(self) -> Option<Side> {
        match self {
            Role::PlayerA => Some(Side::A),
            Role::PlayerB => Some(Side::B),
            Role::Spectator => None,
        }
    }
}

/// Why a match left the active phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Score threshold or game over
    Completed,
    /// A player left mid-match
    PlayerDisconnected,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::Completed => "completed",
            EndReason::PlayerDisconnected => "player_disconnected",
        }
    }
}

/// Partial input update. Absent fields leave the stored input untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPatch {
    #[serde(default, deserialize_with = "lenient_flag", skip_serializing_if = "Option::is_none")]
    pub up: Option<bool>,
    #[serde(default, deserialize_with = "lenient_flag", skip_serializing_if = "Option::is_none")]
    pub down: Option<bool>,
    #[serde(default, deserialize_with = "lenient_flag", skip_serializing_if = "Option::is_none")]
    pub left: Option<bool>,
    #[serde(default, deserialize_with = "lenient_flag", skip_serializing_if = "Option::is_none")]
    pub right: Option<bool>,
    #[serde(default, deserialize_with = "lenient_flag", skip_serializing_if = "Option::is_none")]
    pub rotate: Option<bool>,
    #[serde(default, deserialize_with = "lenient_flag", skip_serializing_if = "Option::is_none")]
    pub drop: Option<bool>,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Overwrite part of the held input vector
    Input {
        #[serde(default, deserialize_with = "lenient_patch")]
        input: InputPatch,
    },

    /// Mark a side ready (or not)
    Ready {
        side: Side,
        #[serde(default, deserialize_with = "lenient_bool")]
        ready: bool,
    },

    /// Ask for role, ready flags and the latest snapshot
    RequestState,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        connection_id: Uuid,
        game: GameKind,
        server_time: u64,
    },

    /// Role for this connection (sent on join and on promotion)
    RoleAssigned {
        role: Role,
    },

    /// Per-side ready flags
    ReadyState {
        a: bool,
        b: bool,
    },

    /// Match has started
    MatchStarted {
        players: Vec<ParticipantInfo>,
    },

    /// Full game state, sent every tick while a match is active
    GameState {
        tick: u64,
        state: GameSnapshot,
    },

    /// Match aborted without a result
    MatchStopped {
        reason: EndReason,
    },

    /// Match finished (or was abandoned with a record)
    MatchEnded {
        reason: EndReason,
        winner: Option<String>,
    },

    /// Identity verification failed; the connection will be closed
    AuthFailed {
        message: String,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

/// Participant announced at match start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub side: Side,
    pub name: String,
    pub registered: bool,
}

/// Public projection of a match, one variant per game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "game", rename_all = "snake_case")]
pub enum GameSnapshot {
    Pong(PongSnapshot),
    Tetris(TetrisSnapshot),
}

/// Pong arena view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PongSnapshot {
    pub width: f32,
    pub height: f32,
    pub paddle_width: f32,
    pub paddle_height: f32,
    pub ball_radius: f32,
    /// Top edge of the left paddle
    pub paddle_a_y: f32,
    /// Top edge of the right paddle
    pub paddle_b_y: f32,
    /// Ball centre
    pub ball: BallView,
    pub score: ScoreView,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BallView {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreView {
    pub a: u32,
    pub b: u32,
}

/// Tetrominoes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PieceKind {
    I,
    O,
    T,
    S,
    Z,
    J,
    L,
}

impl PieceKind {
    pub const ALL: [PieceKind; 7] = [
        PieceKind::I,
        PieceKind::O,
        PieceKind::T,
        PieceKind::S,
        PieceKind::Z,
        PieceKind::J,
        PieceKind::L,
    ];

    /// Non-zero cell value used on the board grid
    pub fn cell(self) -> u8 {
        match self {
            PieceKind::I => 1,
            PieceKind::O => 2,
            PieceKind::T => 3,
            PieceKind::S => 4,
            PieceKind::Z => 5,
            PieceKind::J => 6,
            PieceKind::L => 7,
        }
    }
}

/// Both boards of a Tetris duel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TetrisSnapshot {
    pub width: usize,
    pub height: usize,
    /// Ticks between forced drops, shared by both boards
    pub gravity_interval: u32,
    pub a: BoardSnapshot,
    pub b: BoardSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    /// Row-major grid, row 0 at the top; 0 is empty
    pub cells: Vec<Vec<u8>>,
    pub active: Option<PieceView>,
    pub next: PieceKind,
    pub score: u32,
    pub lines: u32,
    pub level: u32,
    pub game_over: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PieceView {
    pub kind: PieceKind,
    /// (column, row) of each occupied cell
    pub cells: Vec<[i32; 2]>,
}

/// Interpret loosely typed client values as a flag
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        ),
        _ => false,
    }
}

fn lenient_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.map(|v| truthy(&v)))
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map_or(false, truthy))
}

fn lenient_patch<'de, D>(deserializer: D) -> Result<InputPatch, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}
