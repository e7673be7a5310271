//! Per-tick snapshot broadcasting

use crate::session::SessionRegistry;
use crate::ws::protocol::ServerMsg;

use super::Simulation;

/// Builds the public game-state message and pushes it to every session.
///
/// Always full state: no delta compression, no loss recovery.
#[derive(Debug, Default)]
pub struct SnapshotBroadcaster {
    /// Steps taken in the current match
    tick: u64,
}

impl SnapshotBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting from zero for a new match
    pub fn reset(&mut self) {
        self.tick = 0;
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Record that the simulation advanced one step
    pub fn advance(&mut self) {
        self.tick += 1;
    }

    /// Build a game-state message from the engine's public view
    pub fn build(&self, sim: &dyn Simulation) -> ServerMsg {
        ServerMsg::GameState {
            tick: self.tick,
            state: sim.public_snapshot(),
        }
    }

    pub fn broadcast(&self, sim: &dyn Simulation, sessions: &SessionRegistry) {
        sessions.broadcast(&self.build(sim));
    }
}
