//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Supabase project URL
    pub supabase_url: String,
    /// Supabase service role key (bypasses RLS - server only!)
    pub supabase_service_role_key: String,
    /// Supabase JWT secret for token verification
    pub supabase_jwt_secret: String,

    /// Allowed client origin for CORS
    pub client_origin: String,

    /// Game tuning shared by every room
    pub rooms: RoomSettings,
}

/// Per-room tuning knobs
#[derive(Clone, Debug)]
pub struct RoomSettings {
    /// Score that ends a Pong match
    pub pong_points_to_win: u32,
    /// Delay before a spectator is promoted into a freed player slot
    pub promotion_grace: Duration,
    /// Optional session cap for identity-bound (Tetris) rooms; unset means
    /// spectators are never turned away
    pub tetris_max_sessions: Option<usize>,
    /// Upper bound on one match-record write before the room gives up on it
    pub save_timeout: Duration,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            pong_points_to_win: 11,
            promotion_grace: Duration::from_millis(1000),
            tetris_max_sessions: None,
            save_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let defaults = RoomSettings::default();
        let rooms = RoomSettings {
            pong_points_to_win: parse_or("PONG_POINTS_TO_WIN", defaults.pong_points_to_win)?,
            promotion_grace: Duration::from_millis(parse_or(
                "PROMOTION_GRACE_MS",
                defaults.promotion_grace.as_millis() as u64,
            )?),
            tetris_max_sessions: parse_opt("TETRIS_MAX_SESSIONS")?,
            save_timeout: Duration::from_millis(parse_or(
                "MATCH_SAVE_TIMEOUT_MS",
                defaults.save_timeout.as_millis() as u64,
            )?),
        };

        if rooms.pong_points_to_win == 0 {
            return Err(ConfigError::Invalid("PONG_POINTS_TO_WIN"));
        }
        if rooms.save_timeout.is_zero() {
            return Err(ConfigError::Invalid("MATCH_SAVE_TIMEOUT_MS"));
        }
        if rooms.tetris_max_sessions.is_some_and(|max| max < 2) {
            return Err(ConfigError::Invalid("TETRIS_MAX_SESSIONS"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            supabase_url: env::var("SUPABASE_URL")
                .map_err(|_| ConfigError::Missing("SUPABASE_URL"))?,
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .map_err(|_| ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY"))?,
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .map_err(|_| ConfigError::Missing("SUPABASE_JWT_SECRET"))?,

            client_origin: env::var("CLIENT_ORIGIN")
                .map_err(|_| ConfigError::Missing("CLIENT_ORIGIN"))?,

            rooms,
        })
    }
}

/// Read an optional numeric variable, keeping the default when unset
fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Read an optional numeric variable
fn parse_opt<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
