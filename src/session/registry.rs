//! Live connections of one match, their roles and held inputs

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::game::{InputState, SideInputs};
use crate::ws::protocol::{InputPatch, Role, ServerMsg, Side};

/// Outbound message channel of one connection
pub type SessionSender = mpsc::Sender<ServerMsg>;

/// Verified external identity of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub display_name: String,
}

/// One live connection
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub role: Role,
    /// Display name used in match announcements and records
    pub name: String,
    pub identity: Option<Identity>,
    pub input: InputState,
    /// Taken when the session is cut off; dropping it ends the connection's writer
    tx: Mutex<Option<SessionSender>>,
}

impl Session {
    /// Queue a message for this connection.
    ///
    /// A full queue drops snapshots, since the next tick supersedes them. Any
    /// other message that does not fit closes the session so the client
    /// reconnects and re-syncs instead of silently missing a transition.
    pub fn send(&self, msg: ServerMsg) {
        let mut tx = self.tx.lock();
        let Some(sender) = tx.as_ref() else {
            return;
        };
        match sender.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(ServerMsg::GameState { .. })) => {
                debug!(conn_id = %self.id, "Skipping snapshot for slow client");
            }
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = %self.id, "Closing slow client, control message could not be queued");
                *tx = None;
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn_id = %self.id, "Skipping message to closed client");
            }
        }
    }

    /// False once the session has been cut off for falling behind
    pub fn is_open(&self) -> bool {
        self.tx.lock().is_some()
    }
}

/// Outcome of a successful registration
#[derive(Debug)]
pub struct Registration {
    pub role: Role,
    /// Connection that was replaced because it carried the same identity
    pub evicted: Option<Uuid>,
}

/// Registry errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Room is full ({0} sessions)")]
    Full(usize),
}

/// Connection -> session map, kept in insertion order
pub struct SessionRegistry {
    sessions: Vec<Session>,
    /// Cap applied to identity-bound rooms; `None` means unlimited spectators
    max_sessions: Option<usize>,
}

impl SessionRegistry {
    pub fn new(max_sessions: Option<usize>) -> Self {
        Self {
            sessions: Vec::new(),
            max_sessions,
        }
    }

    /// Assign the first free player slot, else spectator.
    ///
    /// A session with the same identity is evicted first so a reconnecting
    /// user inherits the slot it held.
    pub fn register(
        &mut self,
        id: Uuid,
        name: String,
        identity: Option<Identity>,
        tx: SessionSender,
    ) -> Result<Registration, RegistryError> {
        let mut evicted = None;
        if let Some(identity) = &identity {
            if let Some(pos) = self
                .sessions
                .iter()
                .position(|s| s.identity.as_ref().map(|i| i.user_id) == Some(identity.user_id))
            {
                let stale = self.sessions.remove(pos);
                stale.send(ServerMsg::Error {
                    code: "session_replaced".to_string(),
                    message: "Signed in from another connection".to_string(),
                });
                evicted = Some(stale.id);
            }
        }

        if evicted.is_none() {
            if let Some(max) = self.max_sessions {
                if self.sessions.len() >= max {
                    return Err(RegistryError::Full(max));
                }
            }
        }

        let role = self
            .free_side()
            .map(Role::player)
            .unwrap_or(Role::Spectator);

        self.sessions.push(Session {
            id,
            role,
            name,
            identity,
            input: InputState::default(),
            tx: Mutex::new(Some(tx)),
        });

        Ok(Registration { role, evicted })
    }

    /// Remove a session. Returns the freed slot when it held a player role.
    pub fn unregister(&mut self, id: Uuid) -> Option<Side> {
        let pos = self.sessions.iter().position(|s| s.id == id)?;
        self.sessions.remove(pos).role.side()
    }

    /// Overwrite the provided fields of a player's input. Spectators are ignored.
    pub fn set_input(&mut self, id: Uuid, patch: &InputPatch) -> bool {
        match self.sessions.iter_mut().find(|s| s.id == id) {
            Some(session) if session.role != Role::Spectator => {
                session.input.apply(patch);
                true
            }
            _ => false,
        }
    }

    /// Move the oldest spectator into a free slot and tell it so
    pub fn promote_spectator(&mut self, side: Side) -> Option<Uuid> {
        if self.holder(side).is_some() {
            return None;
        }
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.role == Role::Spectator)?;
        session.role = Role::player(side);
        session.send(ServerMsg::RoleAssigned { role: session.role });
        Some(session.id)
    }

    /// Inputs of both player slots; empty slots read as idle
    pub fn inputs(&self) -> SideInputs {
        let mut inputs = SideInputs::default();
        for session in &self.sessions {
            if let Some(side) = session.role.side() {
                inputs[side.index()] = session.input;
            }
        }
        inputs
    }

    /// Clear held inputs after they have been consumed by a step
    pub fn clear_inputs(&mut self) {
        for session in &mut self.sessions {
            session.input = InputState::default();
        }
    }

    pub fn get(&self, id: Uuid) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    /// Session currently holding a player slot
    pub fn holder(&self, side: Side) -> Option<&Session> {
        let role = Role::player(side);
        self.sessions.iter().find(|s| s.role == role)
    }

    pub fn both_slots_filled(&self) -> bool {
        Side::BOTH.iter().all(|side| self.holder(*side).is_some())
    }

    fn free_side(&self) -> Option<Side> {
        Side::BOTH.into_iter().find(|side| self.holder(*side).is_none())
    }

    pub fn send_to(&self, id: Uuid, msg: ServerMsg) {
        if let Some(session) = self.get(id) {
            session.send(msg);
        }
    }

    /// Push a message to every session of the match
    pub fn broadcast(&self, msg: &ServerMsg) {
        for session in &self.sessions {
            session.send(msg.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn spectator_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.role == Role::Spectator)
            .count()
    }
}
