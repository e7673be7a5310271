//! Match lifecycle: formation, ready-up, play, termination and reset

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::RoomSettings;
use crate::session::{Identity, RegistryError, SessionRegistry, SessionSender};
use crate::store::{MatchRecord, MatchStore, Participant, StoreError};
use crate::ws::protocol::{EndReason, GameKind, InputPatch, Role, ServerMsg, Side};

use super::snapshot::SnapshotBroadcaster;
use super::{new_simulation, Simulation};

/// Lifecycle phase of a room. Cyclic: a finished match goes back to `Forming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// Fewer than two player slots filled
    Forming,
    /// Both slots filled, waiting for both ready flags
    AwaitingReady,
    /// Simulation is being stepped
    Active,
    /// Finalizing the record before resetting
    Ending,
}

/// Point-in-time view of a room for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct RoomStatus {
    pub game: GameKind,
    pub phase: MatchPhase,
    pub ready_a: bool,
    pub ready_b: bool,
    pub players: usize,
    pub spectators: usize,
}

/// Winner from per-side defeat flags. Both sides losing in the same tick is a draw.
pub fn decide_winner(defeated: [bool; 2]) -> Option<Side> {
    match defeated {
        [true, false] => Some(Side::B),
        [false, true] => Some(Side::A),
        _ => None,
    }
}

/// Orchestrates one match instance on top of its session registry and engine
pub struct LifecycleManager {
    kind: GameKind,
    phase: MatchPhase,
    ready: [bool; 2],
    record: Option<MatchRecord>,
    sim: Box<dyn Simulation>,
    sessions: SessionRegistry,
    broadcaster: SnapshotBroadcaster,
    store: Arc<dyn MatchStore>,
    promotion_grace: std::time::Duration,
    save_timeout: std::time::Duration,
    /// Freed slots waiting for the grace delay before a spectator fills them
    pending_promotions: Vec<(Side, Instant)>,
}

impl LifecycleManager {
    pub fn new(
        kind: GameKind,
        settings: &RoomSettings,
        store: Arc<dyn MatchStore>,
        seed: u64,
    ) -> Self {
        Self::with_simulation(new_simulation(kind, settings, seed), settings, store)
    }

    pub fn with_simulation(
        sim: Box<dyn Simulation>,
        settings: &RoomSettings,
        store: Arc<dyn MatchStore>,
    ) -> Self {
        let kind = sim.kind();
        let max_sessions = if kind.identity_bound() {
            settings.tetris_max_sessions
        } else {
            None
        };
        Self {
            kind,
            phase: MatchPhase::Forming,
            ready: [false; 2],
            record: None,
            sim,
            sessions: SessionRegistry::new(max_sessions),
            broadcaster: SnapshotBroadcaster::new(),
            store,
            promotion_grace: settings.promotion_grace,
            save_timeout: settings.save_timeout,
            pending_promotions: Vec::new(),
        }
    }

    pub fn kind(&self) -> GameKind {
        self.kind
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == MatchPhase::Active
    }

    pub fn ready_flags(&self) -> [bool; 2] {
        self.ready
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn status(&self) -> RoomStatus {
        let spectators = self.sessions.spectator_count();
        RoomStatus {
            game: self.kind,
            phase: self.phase,
            ready_a: self.ready[0],
            ready_b: self.ready[1],
            players: self.sessions.len() - spectators,
            spectators,
        }
    }

    /// Register a new connection and re-evaluate formation
    pub fn connect(
        &mut self,
        id: Uuid,
        name: String,
        identity: Option<Identity>,
        tx: SessionSender,
    ) -> Result<Role, RegistryError> {
        let registration = self.sessions.register(id, name, identity, tx)?;
        if let Some(evicted) = registration.evicted {
            info!(game = %self.kind, conn_id = %evicted, replaced_by = %id, "Evicted stale session");
        }

        info!(game = %self.kind, conn_id = %id, role = ?registration.role, "Session registered");
        self.sessions.send_to(
            id,
            ServerMsg::RoleAssigned {
                role: registration.role,
            },
        );
        self.sessions.send_to(id, self.ready_msg());

        self.evaluate_formation();
        Ok(registration.role)
    }

    /// Remove a connection. A player leaving mid-match ends the match.
    pub async fn disconnect(&mut self, id: Uuid, now: Instant) -> Result<(), StoreError> {
        let Some(side) = self.sessions.unregister(id) else {
            debug!(game = %self.kind, conn_id = %id, "Non-player session left");
            return Ok(());
        };
        info!(game = %self.kind, conn_id = %id, side = ?side, phase = ?self.phase, "Player slot freed");

        self.pending_promotions.push((side, now + self.promotion_grace));

        match self.phase {
            MatchPhase::Active if self.kind.identity_bound() => {
                self.end_match(EndReason::PlayerDisconnected, None).await
            }
            MatchPhase::Active => {
                self.abort_match();
                Ok(())
            }
            MatchPhase::AwaitingReady | MatchPhase::Ending => {
                self.phase = MatchPhase::Forming;
                self.ready = [false; 2];
                self.sessions.broadcast(&self.ready_msg());
                Ok(())
            }
            MatchPhase::Forming => {
                self.ready[side.index()] = false;
                self.sessions.broadcast(&self.ready_msg());
                Ok(())
            }
        }
    }

    /// Overwrite a player's held input. Ignored while no match is active.
    pub fn input(&mut self, id: Uuid, patch: &InputPatch) -> bool {
        self.is_active() && self.sessions.set_input(id, patch)
    }

    /// Set a ready flag. Only the session holding `side` may set it.
    pub fn set_ready(&mut self, id: Uuid, side: Side, ready: bool) -> bool {
        let holds_side = self
            .sessions
            .get(id)
            .is_some_and(|s| s.role == Role::player(side));
        if !holds_side {
            self.sessions.send_to(
                id,
                ServerMsg::Error {
                    code: "not_your_side".to_string(),
                    message: "Only the player holding this side can change its ready state"
                        .to_string(),
                },
            );
            return false;
        }
        if matches!(self.phase, MatchPhase::Active | MatchPhase::Ending) {
            return false;
        }

        self.ready[side.index()] = ready;
        self.sessions.broadcast(&self.ready_msg());

        if self.phase == MatchPhase::AwaitingReady && self.ready == [true; 2] {
            self.start_match();
        }
        true
    }

    /// Send role, ready flags and the current state to one session
    pub fn request_state(&self, id: Uuid) {
        let Some(session) = self.sessions.get(id) else {
            return;
        };
        session.send(ServerMsg::RoleAssigned { role: session.role });
        session.send(self.ready_msg());
        session.send(self.broadcaster.build(self.sim.as_ref()));
    }

    /// One scheduler callback: step, broadcast, check for termination
    pub async fn tick(&mut self) -> Result<(), StoreError> {
        if !self.is_active() {
            return Ok(());
        }

        let inputs = self.sessions.inputs();
        self.sim.step(&inputs);
        if self.sim.consumes_input() {
            self.sessions.clear_inputs();
        }

        self.broadcaster.advance();
        self.broadcaster.broadcast(self.sim.as_ref(), &self.sessions);

        if self.sim.is_terminal() {
            let winner = decide_winner(self.sim.defeated());
            return self.end_match(EndReason::Completed, winner).await;
        }
        Ok(())
    }

    /// Earliest pending promotion deadline
    pub fn next_promotion(&self) -> Option<Instant> {
        self.pending_promotions.iter().map(|(_, at)| *at).min()
    }

    /// Fill freed slots whose grace delay has elapsed. Returns promoted sessions.
    pub fn promote_due(&mut self, now: Instant) -> Vec<Uuid> {
        let (due, waiting): (Vec<_>, Vec<_>) = self
            .pending_promotions
            .drain(..)
            .partition(|(_, at)| *at <= now);
        self.pending_promotions = waiting;

        let mut promoted = Vec::new();
        for (side, _) in due {
            if let Some(id) = self.sessions.promote_spectator(side) {
                info!(game = %self.kind, conn_id = %id, side = ?side, "Spectator promoted");
                promoted.push(id);
            }
        }
        if !promoted.is_empty() {
            self.evaluate_formation();
        }
        promoted
    }

    fn ready_msg(&self) -> ServerMsg {
        ServerMsg::ReadyState {
            a: self.ready[0],
            b: self.ready[1],
        }
    }

    fn evaluate_formation(&mut self) {
        if self.phase == MatchPhase::Forming && self.sessions.both_slots_filled() {
            self.phase = MatchPhase::AwaitingReady;
            info!(game = %self.kind, "Match formed, awaiting ready");
            self.sessions.broadcast(&self.ready_msg());
        }
    }

    fn participant(&self, side: Side) -> Participant {
        match self.sessions.holder(side) {
            Some(session) => Participant {
                name: session.name.clone(),
                registered: session.identity.is_some(),
                user_id: session.identity.as_ref().map(|i| i.user_id),
            },
            None => Participant {
                name: format!("Player {:?}", side),
                registered: false,
                user_id: None,
            },
        }
    }

    fn start_match(&mut self) {
        self.sim.reset();
        self.broadcaster.reset();

        let record = MatchRecord::open(
            self.kind,
            self.participant(Side::A),
            self.participant(Side::B),
        );
        let players = Side::BOTH
            .iter()
            .map(|side| record.participant(*side).info(*side))
            .collect();
        info!(game = %self.kind, match_id = %record.id, "Match started");
        self.record = Some(record);
        self.phase = MatchPhase::Active;

        self.sessions.broadcast(&ServerMsg::MatchStarted { players });
        self.broadcaster.broadcast(self.sim.as_ref(), &self.sessions);
    }

    /// Clear match state and ready flags, keeping sessions
    fn reset_to_forming(&mut self) {
        self.sim.reset();
        self.broadcaster.reset();
        self.ready = [false; 2];
        self.record = None;
        self.phase = MatchPhase::Forming;
    }

    /// Stop without a result (continuous variant)
    fn abort_match(&mut self) {
        info!(game = %self.kind, "Match stopped");
        self.reset_to_forming();
        self.sessions.broadcast(&ServerMsg::MatchStopped {
            reason: EndReason::PlayerDisconnected,
        });
        self.sessions.broadcast(&self.ready_msg());
        self.evaluate_formation();
    }

    /// Finalize the record, reset, then hand the record to the store.
    /// The reset happens even when the save fails; the save itself is bounded
    /// by `save_timeout` so a stalled store cannot hold the room.
    async fn end_match(&mut self, reason: EndReason, winner: Option<Side>) -> Result<(), StoreError> {
        self.phase = MatchPhase::Ending;
        let stats = self.sim.stats();
        let record = self
            .record
            .take()
            .map(|record| record.finalize(reason, winner, &stats));
        let winner_name = record.as_ref().and_then(|r| r.winner.clone());

        self.reset_to_forming();
        self.sessions.broadcast(&ServerMsg::MatchEnded {
            reason,
            winner: winner_name,
        });
        self.sessions.broadcast(&self.ready_msg());
        self.evaluate_formation();

        let Some(record) = record else {
            return Ok(());
        };
        let saved = tokio::time::timeout(self.save_timeout, self.store.save_match_record(&record))
            .await
            .unwrap_or_else(|_| {
                Err(StoreError::Unavailable(format!(
                    "save timed out after {:?}",
                    self.save_timeout
                )))
            });
        match saved {
            Ok(()) => {
                info!(
                    game = %self.kind,
                    match_id = %record.id,
                    reason = reason.as_str(),
                    winner = ?record.winner,
                    "Match record saved"
                );
                Ok(())
            }
            Err(e) => {
                error!(game = %self.kind, match_id = %record.id, error = %e, "Failed to save match record");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryMatchStore;
    use crate::ws::protocol::{GameSnapshot, ScoreView};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_test::{assert_err, assert_ok};

    type Rx = mpsc::Receiver<ServerMsg>;

    fn settings() -> RoomSettings {
        RoomSettings {
            promotion_grace: Duration::from_millis(500),
            ..Default::default()
        }
    }

    fn manager(kind: GameKind) -> (LifecycleManager, MemoryMatchStore) {
        let store = MemoryMatchStore::new();
        let manager = LifecycleManager::new(kind, &settings(), Arc::new(store.clone()), 7);
        (manager, store)
    }

    fn join(manager: &mut LifecycleManager, identity: Option<Identity>) -> (Uuid, Role, Rx) {
        let (tx, rx) = mpsc::channel(512);
        let id = Uuid::new_v4();
        let name = identity
            .as_ref()
            .map(|i| i.display_name.clone())
            .unwrap_or_else(|| format!("guest-{}", &id.to_string()[..4]));
        let role = manager.connect(id, name, identity, tx).unwrap();
        (id, role, rx)
    }

    fn user(name: &str) -> Identity {
        Identity {
            user_id: Uuid::new_v4(),
            display_name: name.to_string(),
        }
    }

    fn drain(rx: &mut Rx) -> Vec<ServerMsg> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn start(manager: &mut LifecycleManager, a: Uuid, b: Uuid) {
        assert!(manager.set_ready(a, Side::A, true));
        assert!(manager.set_ready(b, Side::B, true));
        assert_eq!(manager.phase(), MatchPhase::Active);
    }

    /// Engine double that reports fixed defeat flags after its first step
    struct ScriptedSim {
        defeated: [bool; 2],
        steps: u32,
    }

    impl Simulation for ScriptedSim {
        fn kind(&self) -> GameKind {
            GameKind::Tetris
        }
        fn reset(&mut self) {
            self.steps = 0;
        }
        fn step(&mut self, _inputs: &crate::game::SideInputs) {
            self.steps += 1;
        }
        fn public_snapshot(&self) -> GameSnapshot {
            crate::game::TetrisSimulation::new(1).public_snapshot()
        }
        fn defeated(&self) -> [bool; 2] {
            if self.steps > 0 {
                self.defeated
            } else {
                [false; 2]
            }
        }
        fn stats(&self) -> serde_json::Value {
            serde_json::json!({ "steps": self.steps })
        }
    }

    fn scripted(defeated: [bool; 2]) -> (LifecycleManager, MemoryMatchStore) {
        let store = MemoryMatchStore::new();
        let sim = ScriptedSim { defeated, steps: 0 };
        let manager = LifecycleManager::with_simulation(Box::new(sim), &settings(), Arc::new(store.clone()));
        (manager, store)
    }

    #[test]
    fn connections_fill_slots_then_form() {
        let (mut manager, _) = manager(GameKind::Pong);
        let (_, x, mut rx) = join(&mut manager, None);
        assert_eq!(manager.phase(), MatchPhase::Forming);
        let (_, y, _ry) = join(&mut manager, None);
        let (_, z, _rz) = join(&mut manager, None);

        assert_eq!((x, y, z), (Role::PlayerA, Role::PlayerB, Role::Spectator));
        assert_eq!(manager.phase(), MatchPhase::AwaitingReady);

        let msgs = drain(&mut rx);
        assert!(matches!(msgs[0], ServerMsg::RoleAssigned { role: Role::PlayerA }));
        assert!(matches!(msgs[1], ServerMsg::ReadyState { a: false, b: false }));
    }

    #[tokio::test]
    async fn ready_up_starts_match_with_fresh_snapshot() {
        let (mut manager, _) = manager(GameKind::Pong);
        let (a, _, mut ra) = join(&mut manager, None);
        let (b, _, _rb) = join(&mut manager, None);
        drain(&mut ra);

        assert!(manager.set_ready(a, Side::A, true));
        assert_eq!(manager.phase(), MatchPhase::AwaitingReady);
        assert!(manager.set_ready(b, Side::B, true));
        assert_eq!(manager.phase(), MatchPhase::Active);

        let msgs = drain(&mut ra);
        let started = msgs
            .iter()
            .position(|m| matches!(m, ServerMsg::MatchStarted { .. }))
            .expect("match_started broadcast");
        match &msgs[started + 1] {
            ServerMsg::GameState {
                tick: 0,
                state: GameSnapshot::Pong(view),
            } => {
                assert_eq!(view.score, ScoreView { a: 0, b: 0 });
                assert_eq!((view.ball.x, view.ball.y), (320.0, 180.0));
            }
            other => panic!("expected initial snapshot, got {other:?}"),
        }

        assert_ok!(manager.tick().await);
        assert!(matches!(
            drain(&mut ra).as_slice(),
            [ServerMsg::GameState { tick: 1, .. }]
        ));
    }

    #[test]
    fn only_the_holder_may_ready_a_side() {
        let (mut manager, _) = manager(GameKind::Pong);
        let (a, _, _ra) = join(&mut manager, None);
        let (_b, _, _rb) = join(&mut manager, None);
        let (s, _, mut rs) = join(&mut manager, None);
        drain(&mut rs);

        assert!(!manager.set_ready(a, Side::B, true));
        assert!(!manager.set_ready(s, Side::A, true));
        assert_eq!(manager.ready_flags(), [false, false]);
        assert!(matches!(
            drain(&mut rs).as_slice(),
            [ServerMsg::Error { code, .. }] if code == "not_your_side"
        ));
    }

    #[tokio::test]
    async fn idle_room_does_no_work_per_tick() {
        let (mut manager, _) = manager(GameKind::Pong);
        let (a, _, mut ra) = join(&mut manager, None);
        drain(&mut ra);

        assert_ok!(manager.tick().await);
        assert!(drain(&mut ra).is_empty());
        assert!(!manager.input(
            a,
            &InputPatch {
                up: Some(true),
                ..Default::default()
            }
        ));
    }

    #[tokio::test]
    async fn input_moves_paddle_on_next_tick() {
        let (mut manager, _) = manager(GameKind::Pong);
        let (a, _, mut ra) = join(&mut manager, None);
        let (b, _, _rb) = join(&mut manager, None);
        start(&mut manager, a, b);
        drain(&mut ra);

        assert!(manager.input(
            a,
            &InputPatch {
                up: Some(true),
                ..Default::default()
            }
        ));
        for _ in 0..3 {
            assert_ok!(manager.tick().await);
        }
        let last = drain(&mut ra).pop();
        let Some(ServerMsg::GameState {
            state: GameSnapshot::Pong(view),
            ..
        }) = last
        else {
            panic!("expected pong snapshot");
        };
        assert_eq!(view.paddle_a_y, 122.0);
    }

    #[tokio::test]
    async fn pong_disconnect_stops_match_and_promotes_after_grace() {
        let (mut manager, store) = manager(GameKind::Pong);
        let (x, _, _rx) = join(&mut manager, None);
        let (y, _, mut ry) = join(&mut manager, None);
        let (z, _, mut rz) = join(&mut manager, None);
        start(&mut manager, x, y);
        drain(&mut ry);
        drain(&mut rz);

        let now = Instant::now();
        assert_ok!(manager.disconnect(x, now).await);

        assert_eq!(manager.phase(), MatchPhase::Forming);
        assert_eq!(manager.ready_flags(), [false, false]);
        assert!(store.records().is_empty());
        let msgs = drain(&mut ry);
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMsg::MatchStopped {
                reason: EndReason::PlayerDisconnected
            }
        )));

        assert_eq!(manager.next_promotion(), Some(now + Duration::from_millis(500)));
        assert!(manager.promote_due(now + Duration::from_millis(100)).is_empty());
        assert_eq!(manager.promote_due(now + Duration::from_millis(500)), vec![z]);
        assert_eq!(manager.sessions().get(z).map(|s| s.role), Some(Role::PlayerA));
        assert_eq!(manager.phase(), MatchPhase::AwaitingReady);
        assert!(drain(&mut rz)
            .iter()
            .any(|m| matches!(m, ServerMsg::RoleAssigned { role: Role::PlayerA })));
        assert_eq!(manager.next_promotion(), None);
    }

    #[tokio::test]
    async fn fresh_connection_takes_slot_before_grace_elapses() {
        let (mut manager, _) = manager(GameKind::Pong);
        let (x, _, _rx) = join(&mut manager, None);
        let (_y, _, _ry) = join(&mut manager, None);
        let (z, _, _rz) = join(&mut manager, None);

        let now = Instant::now();
        assert_ok!(manager.disconnect(x, now).await);
        let (w, role, _rw) = join(&mut manager, None);
        assert_eq!(role, Role::PlayerA);

        assert!(manager.promote_due(now + Duration::from_secs(1)).is_empty());
        assert_eq!(manager.sessions().get(z).map(|s| s.role), Some(Role::Spectator));
        assert_eq!(manager.sessions().get(w).map(|s| s.role), Some(Role::PlayerA));
    }

    #[tokio::test]
    async fn tetris_disconnect_persists_abandoned_record_once() {
        let (mut manager, store) = manager(GameKind::Tetris);
        let (a, _, _ra) = join(&mut manager, Some(user("alice")));
        let (b, _, mut rb) = join(&mut manager, Some(user("bob")));
        start(&mut manager, a, b);
        for _ in 0..10 {
            assert_ok!(manager.tick().await);
        }
        drain(&mut rb);

        assert_ok!(manager.disconnect(a, Instant::now()).await);

        let records = store.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.reason, Some(EndReason::PlayerDisconnected));
        assert_eq!(record.winner, None);
        assert_eq!(record.player_a.name, "alice");
        assert!(record.player_a.registered);
        assert_eq!(record.player_b.name, "bob");
        let stats: serde_json::Value = serde_json::from_str(&record.stats).unwrap();
        assert_eq!(stats["a"]["score"], 0);
        assert_eq!(stats["b"]["lines"], 0);

        assert_eq!(manager.phase(), MatchPhase::Forming);
        assert!(drain(&mut rb).iter().any(|m| matches!(
            m,
            ServerMsg::MatchEnded {
                reason: EndReason::PlayerDisconnected,
                winner: None
            }
        )));

        // Later ticks and a second disconnect never persist again
        assert_ok!(manager.tick().await);
        assert_ok!(manager.disconnect(b, Instant::now()).await);
        assert_eq!(store.records().len(), 1);

        // A new match can form
        let (c, _, _rc) = join(&mut manager, Some(user("carol")));
        let (d, _, _rd) = join(&mut manager, Some(user("dave")));
        start(&mut manager, c, d);
    }

    #[tokio::test]
    async fn failed_save_still_resets() {
        let (mut manager, store) = manager(GameKind::Tetris);
        store.set_failing(true);
        let (a, _, _ra) = join(&mut manager, Some(user("alice")));
        let (b, _, _rb) = join(&mut manager, Some(user("bob")));
        start(&mut manager, a, b);

        assert_err!(manager.disconnect(b, Instant::now()).await);
        assert_eq!(manager.phase(), MatchPhase::Forming);
        assert_eq!(manager.ready_flags(), [false, false]);
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn stalled_save_gives_up_and_resets() {
        let store = MemoryMatchStore::new();
        store.set_stalled(true);
        let settings = RoomSettings {
            save_timeout: Duration::from_millis(50),
            ..settings()
        };
        let mut manager = LifecycleManager::new(GameKind::Tetris, &settings, Arc::new(store.clone()), 7);
        let (a, _, _ra) = join(&mut manager, Some(user("alice")));
        let (b, _, mut rb) = join(&mut manager, Some(user("bob")));
        start(&mut manager, a, b);

        let outcome = tokio::time::timeout(Duration::from_secs(2), manager.disconnect(a, Instant::now()))
            .await
            .expect("save must be bounded by the room's save timeout");
        assert!(matches!(outcome, Err(StoreError::Unavailable(_))));

        assert_eq!(manager.phase(), MatchPhase::Forming);
        assert!(store.records().is_empty());
        assert!(drain(&mut rb)
            .iter()
            .any(|m| matches!(m, ServerMsg::MatchEnded { .. })));

        // The room keeps serving its sessions
        manager.request_state(b);
        assert_eq!(drain(&mut rb).len(), 3);
    }

    #[tokio::test]
    async fn pong_match_ends_when_a_side_reaches_the_target() {
        let store = MemoryMatchStore::new();
        let settings = RoomSettings {
            pong_points_to_win: 1,
            ..settings()
        };
        let mut manager = LifecycleManager::new(GameKind::Pong, &settings, Arc::new(store.clone()), 7);
        let (a, _, mut ra) = join(&mut manager, None);
        let (b, _, _rb) = join(&mut manager, None);
        let names = [
            manager.sessions().get(a).map(|s| s.name.clone()),
            manager.sessions().get(b).map(|s| s.name.clone()),
        ];
        start(&mut manager, a, b);

        // Idle paddles let the first serve through
        let mut ticks = 0;
        while store.records().is_empty() {
            assert!(ticks < 1_000, "no goal scored");
            assert_ok!(manager.tick().await);
            ticks += 1;
        }
        assert_ok!(manager.tick().await);

        let records = store.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.game, GameKind::Pong);
        assert_eq!(record.reason, Some(EndReason::Completed));
        assert!(!record.player_a.registered && !record.player_b.registered);
        assert!(record.player_a.user_id.is_none());

        let stats: serde_json::Value = serde_json::from_str(&record.stats).unwrap();
        let points = [stats["a"]["points"].as_u64(), stats["b"]["points"].as_u64()];
        let scorer = match points {
            [Some(1), Some(0)] => Side::A,
            [Some(0), Some(1)] => Side::B,
            other => panic!("expected exactly one goal, got {other:?}"),
        };
        assert!(stats["a"]["paddle_hits"].is_u64());
        assert!(stats["b"]["paddle_hits"].is_u64());
        assert_eq!(record.winner, names[scorer.index()]);

        assert!(drain(&mut ra).iter().any(|m| matches!(
            m,
            ServerMsg::MatchEnded { reason: EndReason::Completed, winner } if *winner == record.winner
        )));
        assert_eq!(manager.phase(), MatchPhase::AwaitingReady);
        assert_eq!(manager.ready_flags(), [false, false]);
    }

    #[tokio::test]
    async fn reconnect_with_same_identity_keeps_match_running() {
        let (mut manager, store) = manager(GameKind::Tetris);
        let alice = user("alice");
        let (a, _, _ra) = join(&mut manager, Some(alice.clone()));
        let (b, _, _rb) = join(&mut manager, Some(user("bob")));
        start(&mut manager, a, b);

        let (a2, role, _ra2) = join(&mut manager, Some(alice));
        assert_eq!(role, Role::PlayerA);
        assert!(manager.is_active());

        // The stale connection closing later is a no-op
        assert_ok!(manager.disconnect(a, Instant::now()).await);
        assert!(manager.is_active());
        assert!(store.records().is_empty());
        assert!(manager.sessions().get(a2).is_some());
    }

    #[tokio::test]
    async fn natural_end_names_the_surviving_player() {
        let (mut manager, store) = scripted([false, true]);
        let (a, _, mut ra) = join(&mut manager, Some(user("alice")));
        let (b, _, _rb) = join(&mut manager, Some(user("bob")));
        start(&mut manager, a, b);

        assert_ok!(manager.tick().await);

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].winner.as_deref(), Some("alice"));
        assert_eq!(records[0].reason, Some(EndReason::Completed));
        assert_eq!(records[0].stats, r#"{"steps":1}"#);

        // Both players are still seated, so the room re-forms immediately
        assert_eq!(manager.phase(), MatchPhase::AwaitingReady);
        assert_eq!(manager.ready_flags(), [false, false]);
        assert!(drain(&mut ra).iter().any(|m| matches!(
            m,
            ServerMsg::MatchEnded { reason: EndReason::Completed, winner: Some(w) } if w == "alice"
        )));
    }

    #[tokio::test]
    async fn simultaneous_game_over_is_a_draw() {
        let (mut manager, store) = scripted([true, true]);
        let (a, _, _ra) = join(&mut manager, Some(user("alice")));
        let (b, _, _rb) = join(&mut manager, Some(user("bob")));
        start(&mut manager, a, b);

        assert_ok!(manager.tick().await);
        assert_eq!(store.records()[0].winner, None);
    }

    #[test]
    fn winner_decision_table() {
        assert_eq!(decide_winner([true, false]), Some(Side::B));
        assert_eq!(decide_winner([false, true]), Some(Side::A));
        assert_eq!(decide_winner([true, true]), None);
        assert_eq!(decide_winner([false, false]), None);
    }

    #[test]
    fn tetris_rooms_accept_spectators_by_default() {
        let (mut manager, _) = manager(GameKind::Tetris);
        let mut receivers = Vec::new();
        for i in 0..6 {
            let (_, _, rx) = join(&mut manager, Some(user(&format!("u{i}"))));
            receivers.push(rx);
        }
        assert_eq!(manager.status().spectators, 4);
    }

    #[test]
    fn tetris_rooms_honour_a_configured_cap() {
        let settings = RoomSettings {
            tetris_max_sessions: Some(4),
            ..settings()
        };
        let store = Arc::new(MemoryMatchStore::new());
        let mut manager = LifecycleManager::new(GameKind::Tetris, &settings, store, 7);
        let mut receivers = Vec::new();
        for i in 0..4 {
            let (_, _, rx) = join(&mut manager, Some(user(&format!("u{i}"))));
            receivers.push(rx);
        }
        let (tx, _rx) = mpsc::channel(4);
        let result = manager.connect(Uuid::new_v4(), "late".to_string(), Some(user("late")), tx);
        assert_eq!(result.unwrap_err(), RegistryError::Full(4));
        assert_eq!(manager.status().spectators, 2);
        assert_eq!(manager.status().players, 2);
    }

    #[test]
    fn request_state_answers_only_the_asker() {
        let (mut manager, _) = manager(GameKind::Pong);
        let (a, _, mut ra) = join(&mut manager, None);
        let (_b, _, mut rb) = join(&mut manager, None);
        drain(&mut ra);
        drain(&mut rb);

        manager.request_state(a);
        let msgs = drain(&mut ra);
        assert_eq!(msgs.len(), 3);
        assert!(matches!(msgs[0], ServerMsg::RoleAssigned { role: Role::PlayerA }));
        assert!(matches!(msgs[2], ServerMsg::GameState { .. }));
        assert!(drain(&mut rb).is_empty());
    }
}
