//! Finished-match records and the persistence collaborator

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ws::protocol::{EndReason, GameKind, ParticipantInfo, Side};

use super::supabase::{SupabaseClient, SupabaseError};

/// One side of a match record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    /// True when the player connected with a verified identity
    pub registered: bool,
    pub user_id: Option<Uuid>,
}

impl Participant {
    pub fn info(&self, side: Side) -> ParticipantInfo {
        ParticipantInfo {
            side,
            name: self.name.clone(),
            registered: self.registered,
        }
    }
}

/// Summary of one completed or abandoned match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: Uuid,
    pub game: GameKind,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub player_a: Participant,
    pub player_b: Participant,
    pub winner: Option<String>,
    pub reason: Option<EndReason>,
    /// Serialized per-player statistics
    pub stats: String,
}

impl MatchRecord {
    /// Open a record when a match becomes active
    pub fn open(game: GameKind, player_a: Participant, player_b: Participant) -> Self {
        Self {
            id: Uuid::new_v4(),
            game,
            started_at: Utc::now(),
            ended_at: None,
            player_a,
            player_b,
            winner: None,
            reason: None,
            stats: String::new(),
        }
    }

    pub fn participant(&self, side: Side) -> &Participant {
        match side {
            Side::A => &self.player_a,
            Side::B => &self.player_b,
        }
    }

    /// Stamp the end of the match
    pub fn finalize(mut self, reason: EndReason, winner: Option<Side>, stats: &serde_json::Value) -> Self {
        self.ended_at = Some(Utc::now());
        self.winner = winner.map(|side| self.participant(side).name.clone());
        self.reason = Some(reason);
        self.stats = stats.to_string();
        self
    }
}

/// Persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Supabase(#[from] SupabaseError),

    #[error("Match store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence collaborator for finished matches
pub trait MatchStore: Send + Sync {
    fn save_match_record<'a>(&'a self, record: &'a MatchRecord) -> BoxFuture<'a, Result<(), StoreError>>;
}

/// Row layout of the `match_records` table
#[derive(Debug, Serialize)]
struct MatchRecordRow<'a> {
    id: Uuid,
    game: &'static str,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    player_a_name: &'a str,
    player_a_registered: bool,
    player_a_user_id: Option<Uuid>,
    player_b_name: &'a str,
    player_b_registered: bool,
    player_b_user_id: Option<Uuid>,
    winner: Option<&'a str>,
    reason: Option<&'static str>,
    stats: &'a str,
}

impl<'a> From<&'a MatchRecord> for MatchRecordRow<'a> {
    fn from(record: &'a MatchRecord) -> Self {
        Self {
            id: record.id,
            game: record.game.name(),
            started_at: record.started_at,
            ended_at: record.ended_at,
            player_a_name: &record.player_a.name,
            player_a_registered: record.player_a.registered,
            player_a_user_id: record.player_a.user_id,
            player_b_name: &record.player_b.name,
            player_b_registered: record.player_b.registered,
            player_b_user_id: record.player_b.user_id,
            winner: record.winner.as_deref(),
            reason: record.reason.map(EndReason::as_str),
            stats: &record.stats,
        }
    }
}

/// Writes match records through the Supabase REST API
#[derive(Clone)]
pub struct SupabaseMatchStore {
    client: SupabaseClient,
}

impl SupabaseMatchStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

impl MatchStore for SupabaseMatchStore {
    fn save_match_record<'a>(&'a self, record: &'a MatchRecord) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let row = MatchRecordRow::from(record);
            self.client.insert_minimal("match_records", &row).await?;
            Ok(())
        })
    }
}

/// In-process store, handy for local runs and tests
#[derive(Clone, Default)]
pub struct MemoryMatchStore {
    records: Arc<Mutex<Vec<MatchRecord>>>,
    failing: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
}

impl MemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Make every subsequent save hang without ever completing
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::Relaxed);
    }

    pub fn records(&self) -> Vec<MatchRecord> {
        self.records.lock().clone()
    }
}

impl MatchStore for MemoryMatchStore {
    fn save_match_record<'a>(&'a self, record: &'a MatchRecord) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            if self.stalled.load(Ordering::Relaxed) {
                std::future::pending::<()>().await;
            }
            if self.failing.load(Ordering::Relaxed) {
                return Err(StoreError::Unavailable("memory store set to fail".to_string()));
            }
            self.records.lock().push(record.clone());
            Ok(())
        })
    }
}
