//! Game simulation modules

pub mod lifecycle;
pub mod r#match;
pub mod pong;
pub mod scheduler;
pub mod snapshot;
pub mod tetris;

pub use lifecycle::{LifecycleManager, MatchPhase, RoomStatus};
pub use r#match::{GameMatch, JoinError, MatchCommand, MatchHandle, MatchRegistry};
pub use pong::PongSimulation;
pub use tetris::TetrisSimulation;

use crate::config::RoomSettings;
use crate::ws::protocol::{GameKind, GameSnapshot, InputPatch};

/// Held input vector of one session. Overwritten in place, never queued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub rotate: bool,
    pub drop: bool,
}

impl InputState {
    /// Overwrite only the fields present in the patch
    pub fn apply(&mut self, patch: &InputPatch) {
        if let Some(v) = patch.up {
            self.up = v;
        }
        if let Some(v) = patch.down {
            self.down = v;
        }
        if let Some(v) = patch.left {
            self.left = v;
        }
        if let Some(v) = patch.right {
            self.right = v;
        }
        if let Some(v) = patch.rotate {
            self.rotate = v;
        }
        if let Some(v) = patch.drop {
            self.drop = v;
        }
    }
}

/// Inputs of both player slots for one step, indexed by `Side::index`
pub type SideInputs = [InputState; 2];

/// Authoritative simulation of one match.
///
/// The lifecycle manager is written once against this interface; each
/// game variant owns its canonical state behind it.
pub trait Simulation: Send {
    fn kind(&self) -> GameKind;

    /// Restore the initial state of a fresh match
    fn reset(&mut self);

    /// Advance exactly one tick
    fn step(&mut self, inputs: &SideInputs);

    /// Read-only projection sent to clients
    fn public_snapshot(&self) -> GameSnapshot;

    /// Per-side "this player has lost" flags. The engine only reports
    /// them; deciding the winner is left to the lifecycle manager.
    fn defeated(&self) -> [bool; 2];

    fn is_terminal(&self) -> bool {
        self.defeated().iter().any(|lost| *lost)
    }

    /// Per-player statistics for the match record
    fn stats(&self) -> serde_json::Value;

    /// Whether held inputs are cleared after every step (one action per message)
    fn consumes_input(&self) -> bool {
        false
    }
}

/// Build the simulation for a game variant
pub fn new_simulation(kind: GameKind, settings: &RoomSettings, seed: u64) -> Box<dyn Simulation> {
    match kind {
        GameKind::Pong => Box::new(PongSimulation::new(
            pong::PongConfig {
                points_to_win: settings.pong_points_to_win,
                ..Default::default()
            },
            seed,
        )),
        GameKind::Tetris => Box::new(TetrisSimulation::new(seed)),
    }
}
