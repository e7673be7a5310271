//! Match task, its command channel and the room registry

use dashmap::DashMap;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::RoomSettings;
use crate::session::{Identity, RegistryError, SessionSender};
use crate::store::MatchStore;
use crate::util::time::tick_duration;
use crate::ws::protocol::{ClientMsg, GameKind, Role, ServerMsg};

use super::lifecycle::{LifecycleManager, MatchPhase, RoomStatus};
use super::scheduler::{wait_tick, TickScheduler};

/// Rooms are keyed by game variant and client-chosen name
pub type RoomKey = (GameKind, String);

/// Commands delivered to a running match task
#[derive(Debug)]
pub enum MatchCommand {
    Connect {
        conn_id: Uuid,
        name: String,
        identity: Option<Identity>,
        tx: SessionSender,
        reply: oneshot::Sender<Result<Role, RegistryError>>,
    },
    Disconnect {
        conn_id: Uuid,
    },
    Client {
        conn_id: Uuid,
        msg: ClientMsg,
    },
    Status {
        reply: oneshot::Sender<RoomStatus>,
    },
}

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    /// Identifies this task instance; a room name can be reused by a later task
    pub id: Uuid,
    pub kind: GameKind,
    pub room: String,
    pub cmd_tx: mpsc::Sender<MatchCommand>,
    pub session_count: Arc<AtomicUsize>,
}

impl MatchHandle {
    pub fn session_count(&self) -> usize {
        self.session_count.load(Ordering::Relaxed)
    }

    pub async fn send(&self, cmd: MatchCommand) -> bool {
        self.cmd_tx.send(cmd).await.is_ok()
    }
}

/// Join errors
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error(transparent)]
    Rejected(#[from] RegistryError),

    #[error("Room {0} is not accepting connections")]
    Unavailable(String),
}

/// Registry of all live rooms
#[derive(Clone)]
pub struct MatchRegistry {
    rooms: Arc<DashMap<RoomKey, MatchHandle>>,
    settings: RoomSettings,
    store: Arc<dyn MatchStore>,
}

impl MatchRegistry {
    pub fn new(settings: RoomSettings, store: Arc<dyn MatchStore>) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            settings,
            store,
        }
    }

    pub fn get(&self, kind: GameKind, room: &str) -> Option<MatchHandle> {
        self.rooms
            .get(&(kind, room.to_string()))
            .map(|m| m.value().clone())
    }

    /// Running room for the key, spawning its task on first use
    pub fn get_or_spawn(&self, kind: GameKind, room: &str) -> MatchHandle {
        self.rooms
            .entry((kind, room.to_string()))
            .or_insert_with(|| {
                let (game_match, handle) = GameMatch::new(
                    kind,
                    room.to_string(),
                    &self.settings,
                    self.store.clone(),
                    self.rooms.clone(),
                );
                tokio::spawn(game_match.run());
                handle
            })
            .value()
            .clone()
    }

    /// Register a connection with a room. Retries when the room closed
    /// between lookup and delivery.
    pub async fn join(
        &self,
        kind: GameKind,
        room: &str,
        conn_id: Uuid,
        name: String,
        identity: Option<Identity>,
        tx: SessionSender,
    ) -> Result<(MatchHandle, Role), JoinError> {
        for _ in 0..3 {
            let handle = self.get_or_spawn(kind, room);
            let (reply, reply_rx) = oneshot::channel();
            let cmd = MatchCommand::Connect {
                conn_id,
                name: name.clone(),
                identity: identity.clone(),
                tx: tx.clone(),
                reply,
            };
            if !handle.send(cmd).await {
                self.remove(&handle);
                continue;
            }
            match reply_rx.await {
                Ok(Ok(role)) => return Ok((handle, role)),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    self.remove(&handle);
                    continue;
                }
            }
        }
        Err(JoinError::Unavailable(room.to_string()))
    }

    /// Lifecycle status of a live room
    pub async fn status(&self, kind: GameKind, room: &str) -> Option<RoomStatus> {
        let handle = self.get(kind, room)?;
        let (reply, reply_rx) = oneshot::channel();
        if !handle.send(MatchCommand::Status { reply }).await {
            return None;
        }
        reply_rx.await.ok()
    }

    /// Drop a room entry, only if it still points at this task instance
    pub fn remove(&self, handle: &MatchHandle) {
        remove_room(&self.rooms, handle.kind, &handle.room, handle.id);
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_sessions(&self) -> usize {
        self.rooms
            .iter()
            .map(|m| m.value().session_count())
            .sum()
    }
}

fn remove_room(rooms: &DashMap<RoomKey, MatchHandle>, kind: GameKind, room: &str, id: Uuid) {
    rooms.remove_if(&(kind, room.to_string()), |_, current| current.id == id);
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// One match instance: a single event loop over commands, ticks and promotions
pub struct GameMatch {
    id: Uuid,
    kind: GameKind,
    room: String,
    session_count: Arc<AtomicUsize>,
    lifecycle: LifecycleManager,
    cmd_rx: mpsc::Receiver<MatchCommand>,
    scheduler: Option<TickScheduler>,
    tick_period: Duration,
    rooms: Arc<DashMap<RoomKey, MatchHandle>>,
}

impl GameMatch {
    pub fn new(
        kind: GameKind,
        room: String,
        settings: &RoomSettings,
        store: Arc<dyn MatchStore>,
        rooms: Arc<DashMap<RoomKey, MatchHandle>>,
    ) -> (Self, MatchHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let seed: u64 = rand::thread_rng().gen();

        let handle = MatchHandle {
            id: Uuid::new_v4(),
            kind,
            room,
            cmd_tx,
            session_count: Arc::new(AtomicUsize::new(0)),
        };

        let game_match = Self {
            id: handle.id,
            kind,
            room: handle.room.clone(),
            session_count: handle.session_count.clone(),
            lifecycle: LifecycleManager::new(kind, settings, store, seed),
            cmd_rx,
            scheduler: None,
            tick_period: tick_duration(),
            rooms,
        };

        (game_match, handle)
    }

    /// Run until the room is empty and idle
    pub async fn run(mut self) {
        info!(room = %self.room, game = %self.kind, "Room opened");

        loop {
            let promotion = self.lifecycle.next_promotion();

            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    self.handle_command(cmd).await;
                    if self.is_abandoned() {
                        break;
                    }
                }
                _ = wait_tick(&mut self.scheduler) => {
                    // Save failures are logged by the lifecycle; the room carries on
                    let _ = self.lifecycle.tick().await;
                }
                _ = wait_until(promotion) => {
                    self.lifecycle.promote_due(Instant::now());
                }
            }

            self.arm_scheduler();
            self.publish_session_count();
        }

        remove_room(&self.rooms, self.kind, &self.room, self.id);
        self.cmd_rx.close();
        // Queued joins see their reply dropped and retry against a fresh room
        while self.cmd_rx.try_recv().is_ok() {}

        info!(room = %self.room, game = %self.kind, "Room closed");
    }

    async fn handle_command(&mut self, cmd: MatchCommand) {
        match cmd {
            MatchCommand::Connect {
                conn_id,
                name,
                identity,
                tx,
                reply,
            } => {
                let result = self.lifecycle.connect(conn_id, name, identity, tx);
                self.publish_session_count();
                if let Err(Ok(_)) = reply.send(result) {
                    debug!(conn_id = %conn_id, "Joiner went away before registration completed");
                    let _ = self.lifecycle.disconnect(conn_id, Instant::now()).await;
                }
            }
            MatchCommand::Disconnect { conn_id } => {
                let _ = self.lifecycle.disconnect(conn_id, Instant::now()).await;
            }
            MatchCommand::Client { conn_id, msg } => self.handle_client(conn_id, msg),
            MatchCommand::Status { reply } => {
                let _ = reply.send(self.lifecycle.status());
            }
        }
    }

    fn handle_client(&mut self, conn_id: Uuid, msg: ClientMsg) {
        match msg {
            ClientMsg::Input { input } => {
                self.lifecycle.input(conn_id, &input);
            }
            ClientMsg::Ready { side, ready } => {
                self.lifecycle.set_ready(conn_id, side, ready);
            }
            ClientMsg::RequestState => self.lifecycle.request_state(conn_id),
            ClientMsg::Ping { t } => {
                self.lifecycle
                    .sessions()
                    .send_to(conn_id, ServerMsg::Pong { t });
            }
        }
    }

    /// The scheduler starts on first formation and then keeps running
    fn arm_scheduler(&mut self) {
        if self.scheduler.is_none() && self.lifecycle.phase() != MatchPhase::Forming {
            debug!(room = %self.room, "Arming tick scheduler");
            self.scheduler = Some(TickScheduler::start(self.tick_period));
        }
    }

    fn publish_session_count(&self) {
        self.session_count.store(self.lifecycle.sessions().len(), Ordering::Relaxed);
    }

    fn is_abandoned(&self) -> bool {
        self.lifecycle.sessions().is_empty() && self.lifecycle.phase() == MatchPhase::Forming
    }
}
