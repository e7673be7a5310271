//! End-to-end match flows through the room registry

use std::sync::Arc;
use std::time::Duration;

use arcade_server::config::RoomSettings;
use arcade_server::game::{MatchCommand, MatchHandle, MatchPhase, MatchRegistry};
use arcade_server::session::Identity;
use arcade_server::store::MemoryMatchStore;
use arcade_server::ws::protocol::{
    ClientMsg, EndReason, GameKind, GameSnapshot, Role, ServerMsg, Side,
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(3);

struct Client {
    id: Uuid,
    role: Role,
    handle: MatchHandle,
    rx: mpsc::Receiver<ServerMsg>,
}

impl Client {
    async fn join(
        registry: &MatchRegistry,
        kind: GameKind,
        room: &str,
        name: &str,
        identity: Option<Identity>,
    ) -> Client {
        let (tx, rx) = mpsc::channel(1024);
        let id = Uuid::new_v4();
        let (handle, role) = registry
            .join(kind, room, id, name.to_string(), identity, tx)
            .await
            .expect("join should succeed");
        Client { id, role, handle, rx }
    }

    async fn send(&self, msg: ClientMsg) {
        let cmd = MatchCommand::Client {
            conn_id: self.id,
            msg,
        };
        assert!(self.handle.send(cmd).await);
    }

    async fn send_json(&self, raw: &str) {
        let msg: ClientMsg = serde_json::from_str(raw).expect("valid client message");
        self.send(msg).await;
    }

    async fn ready(&self, side: Side) {
        self.send(ClientMsg::Ready { side, ready: true }).await;
    }

    async fn leave(&self) {
        let cmd = MatchCommand::Disconnect { conn_id: self.id };
        assert!(self.handle.send(cmd).await);
    }

    async fn expect<F>(&mut self, mut pred: F) -> ServerMsg
    where
        F: FnMut(&ServerMsg) -> bool,
    {
        timeout(WAIT, async {
            loop {
                let msg = self.rx.recv().await.expect("session channel closed");
                if pred(&msg) {
                    return msg;
                }
            }
        })
        .await
        .expect("timed out waiting for message")
    }
}

fn user(name: &str) -> Identity {
    Identity {
        user_id: Uuid::new_v4(),
        display_name: name.to_string(),
    }
}

fn setup(grace_ms: u64) -> (MatchRegistry, MemoryMatchStore) {
    let store = MemoryMatchStore::new();
    let settings = RoomSettings {
        promotion_grace: Duration::from_millis(grace_ms),
        ..Default::default()
    };
    (MatchRegistry::new(settings, Arc::new(store.clone())), store)
}

async fn wait_for_records(store: &MemoryMatchStore, count: usize) {
    timeout(WAIT, async {
        while store.records().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("match record should be saved");
}

#[tokio::test]
async fn pong_ready_up_starts_from_a_clean_state() {
    let (registry, _) = setup(1000);
    let mut a = Client::join(&registry, GameKind::Pong, "r1", "left", None).await;
    let b = Client::join(&registry, GameKind::Pong, "r1", "right", None).await;
    assert_eq!((a.role, b.role), (Role::PlayerA, Role::PlayerB));

    a.ready(Side::A).await;
    b.ready(Side::B).await;

    let started = a
        .expect(|m| matches!(m, ServerMsg::MatchStarted { .. }))
        .await;
    let ServerMsg::MatchStarted { players } = started else {
        unreachable!()
    };
    assert_eq!(players[0].name, "left");
    assert_eq!(players[1].name, "right");
    assert!(!players[0].registered);

    let first = a.expect(|m| matches!(m, ServerMsg::GameState { .. })).await;
    let ServerMsg::GameState {
        tick,
        state: GameSnapshot::Pong(view),
    } = first
    else {
        panic!("expected a pong snapshot");
    };
    assert_eq!(tick, 0);
    assert_eq!((view.score.a, view.score.b), (0, 0));
    assert_eq!((view.ball.x, view.ball.y), (320.0, 180.0));
}

#[tokio::test]
async fn pong_input_is_applied_by_the_simulation() {
    let (registry, _) = setup(1000);
    let mut a = Client::join(&registry, GameKind::Pong, "input", "left", None).await;
    let b = Client::join(&registry, GameKind::Pong, "input", "right", None).await;
    a.ready(Side::A).await;
    b.ready(Side::B).await;
    a.expect(|m| matches!(m, ServerMsg::MatchStarted { .. })).await;

    // Numeric flag is coerced to true
    a.send_json(r#"{"type":"input","input":{"down":1}}"#).await;

    let moved = a
        .expect(|m| match m {
            ServerMsg::GameState {
                state: GameSnapshot::Pong(view),
                ..
            } => view.paddle_a_y > 140.0,
            _ => false,
        })
        .await;
    assert!(matches!(moved, ServerMsg::GameState { .. }));
}

#[tokio::test]
async fn spectator_is_promoted_after_grace() {
    let (registry, store) = setup(50);
    let x = Client::join(&registry, GameKind::Pong, "promo", "x", None).await;
    let mut y = Client::join(&registry, GameKind::Pong, "promo", "y", None).await;
    let mut z = Client::join(&registry, GameKind::Pong, "promo", "z", None).await;
    assert_eq!(
        (x.role, y.role, z.role),
        (Role::PlayerA, Role::PlayerB, Role::Spectator)
    );

    x.ready(Side::A).await;
    y.ready(Side::B).await;
    y.expect(|m| matches!(m, ServerMsg::MatchStarted { .. })).await;

    x.leave().await;
    y.expect(|m| {
        matches!(
            m,
            ServerMsg::MatchStopped {
                reason: EndReason::PlayerDisconnected
            }
        )
    })
    .await;

    z.expect(|m| matches!(m, ServerMsg::RoleAssigned { role: Role::PlayerA }))
        .await;

    let status = registry.status(GameKind::Pong, "promo").await.unwrap();
    assert_eq!(status.phase, MatchPhase::AwaitingReady);
    assert_eq!((status.ready_a, status.ready_b), (false, false));
    assert_eq!(status.spectators, 0);

    // Continuous matches are never persisted when aborted
    assert!(store.records().is_empty());
}

#[tokio::test]
async fn tetris_disconnect_persists_exactly_once() {
    let (registry, store) = setup(1000);
    let a = Client::join(&registry, GameKind::Tetris, "duel", "alice", Some(user("alice"))).await;
    let mut b = Client::join(&registry, GameKind::Tetris, "duel", "bob", Some(user("bob"))).await;

    a.ready(Side::A).await;
    b.ready(Side::B).await;
    b.expect(|m| matches!(m, ServerMsg::GameState { tick, .. } if *tick >= 5))
        .await;

    a.leave().await;
    b.expect(|m| {
        matches!(
            m,
            ServerMsg::MatchEnded {
                reason: EndReason::PlayerDisconnected,
                winner: None
            }
        )
    })
    .await;

    wait_for_records(&store, 1).await;
    b.leave().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let records = store.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.game, GameKind::Tetris);
    assert_eq!(record.reason, Some(EndReason::PlayerDisconnected));
    assert_eq!(record.winner, None);
    assert!(record.player_a.registered && record.player_b.registered);
    assert!(record.ended_at.is_some());
}

#[tokio::test]
async fn failed_save_still_returns_room_to_forming() {
    let (registry, store) = setup(1000);
    store.set_failing(true);

    let a = Client::join(&registry, GameKind::Tetris, "flaky", "alice", Some(user("alice"))).await;
    let mut b = Client::join(&registry, GameKind::Tetris, "flaky", "bob", Some(user("bob"))).await;
    a.ready(Side::A).await;
    b.ready(Side::B).await;
    b.expect(|m| matches!(m, ServerMsg::MatchStarted { .. })).await;

    a.leave().await;
    b.expect(|m| matches!(m, ServerMsg::MatchEnded { .. })).await;

    let status = registry.status(GameKind::Tetris, "flaky").await.unwrap();
    assert_eq!(status.phase, MatchPhase::Forming);
    assert!(store.records().is_empty());

    // The room keeps working: a new opponent can form and start a match
    store.set_failing(false);
    let c = Client::join(&registry, GameKind::Tetris, "flaky", "carol", Some(user("carol"))).await;
    assert_eq!(c.role, Role::PlayerA);
    c.ready(Side::A).await;
    b.ready(Side::B).await;
    b.expect(|m| matches!(m, ServerMsg::MatchStarted { .. })).await;
}

#[tokio::test]
async fn stalled_save_does_not_freeze_the_room() {
    let store = MemoryMatchStore::new();
    store.set_stalled(true);
    let settings = RoomSettings {
        save_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let registry = MatchRegistry::new(settings, Arc::new(store.clone()));

    let a = Client::join(&registry, GameKind::Tetris, "stall", "alice", Some(user("alice"))).await;
    let mut b = Client::join(&registry, GameKind::Tetris, "stall", "bob", Some(user("bob"))).await;
    a.ready(Side::A).await;
    b.ready(Side::B).await;
    b.expect(|m| matches!(m, ServerMsg::MatchStarted { .. })).await;

    a.leave().await;
    b.expect(|m| matches!(m, ServerMsg::MatchEnded { .. })).await;

    b.send(ClientMsg::Ping { t: 7 }).await;
    b.expect(|m| matches!(m, ServerMsg::Pong { t: 7 })).await;

    let status = timeout(WAIT, registry.status(GameKind::Tetris, "stall"))
        .await
        .expect("room should answer status after a stalled save")
        .unwrap();
    assert_eq!(status.phase, MatchPhase::Forming);
    assert!(store.records().is_empty());
}

#[tokio::test]
async fn reconnect_with_same_identity_replaces_old_session() {
    let (registry, _) = setup(1000);
    let alice = user("alice");
    let mut first = Client::join(&registry, GameKind::Tetris, "re", "alice", Some(alice.clone())).await;
    let second = Client::join(&registry, GameKind::Tetris, "re", "alice", Some(alice)).await;
    assert_eq!(second.role, Role::PlayerA);

    first
        .expect(|m| matches!(m, ServerMsg::Error { code, .. } if code == "session_replaced"))
        .await;
    // The registry dropped the old sender, so the channel drains and closes
    let closed = timeout(WAIT, async { while first.rx.recv().await.is_some() {} }).await;
    assert!(closed.is_ok());

    let status = registry.status(GameKind::Tetris, "re").await.unwrap();
    assert_eq!(status.players, 1);
}

#[tokio::test]
async fn tetris_room_rejects_connections_beyond_configured_cap() {
    let settings = RoomSettings {
        tetris_max_sessions: Some(4),
        ..Default::default()
    };
    let registry = MatchRegistry::new(settings, Arc::new(MemoryMatchStore::new()));
    let mut seated = Vec::new();
    for i in 0..4 {
        let name = format!("p{i}");
        seated.push(Client::join(&registry, GameKind::Tetris, "cap", &name, Some(user(&name))).await);
    }

    let (tx, _rx) = mpsc::channel(8);
    let result = registry
        .join(GameKind::Tetris, "cap", Uuid::new_v4(), "late".into(), Some(user("late")), tx)
        .await;
    assert!(result.is_err());
}
