//! Server network layer handling TCP connections and session coordination
//!
//! One reader task and one writer task per socket; everything else runs on
//! a single coordinator loop that owns the world, the session, and every
//! connection. Reader tasks forward decoded frames over a channel, writer
//! tasks drain per-connection byte queues, and the coordinator never
//! touches a socket directly.

use crate::connection::{ConnState, Connection, SyncOutcome};
use crate::ledger::ResourceLedger;
use crate::lockstep::{Action, ConfirmOutcome, Lockstep};
use crate::session::{Session, SessionState};
use crate::visibility::Notice;
use crate::world::{World, MAX_MAP_EDGE};
use log::{debug, error, info, warn};
use shared::{
    DownReason, Frame, Message, ProtocolError, RejectReason, MAX_PLAYERS, PROTOCOL_VERSION,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub required_players: usize,
    pub map_width: u32,
    pub map_height: u32,
    pub map_seed: u64,
    /// How long to wait on the lockstep barrier before tearing the session
    /// down. None waits forever.
    pub tick_timeout: Option<Duration>,
    /// Run the two-round clock probe during the handshake.
    pub time_sync: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7777,
            required_players: 2,
            map_width: 32,
            map_height: 32,
            map_seed: 0,
            tick_timeout: Some(Duration::from_secs(30)),
            time_sync: true,
        }
    }
}

/// Messages sent from connection tasks to the coordinator loop
#[derive(Debug)]
pub enum Event {
    FrameReceived {
        conn_id: u32,
        frame: Frame,
    },
    ConnectionClosed {
        conn_id: u32,
        /// None for an orderly close, the framing or transport error
        /// otherwise.
        error: Option<ProtocolError>,
    },
}

/// Main server coordinating connections and the lockstep simulation
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    event_tx: mpsc::UnboundedSender<Event>,
    event_rx: mpsc::UnboundedReceiver<Event>,
    connections: HashMap<u32, Connection>,
    next_conn_id: u32,
    session: Session,
    world: World,
    ledger: ResourceLedger,
    lockstep: Lockstep,
    tick_deadline: Option<Instant>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        if config.required_players < 1 || config.required_players > MAX_PLAYERS {
            return Err(format!(
                "required players must be between 1 and {}, got {}",
                MAX_PLAYERS, config.required_players
            )
            .into());
        }
        if config.map_width < 8 || config.map_height < 8 {
            return Err(format!(
                "map must be at least 8x8, got {}x{}",
                config.map_width, config.map_height
            )
            .into());
        }
        if config.map_width > MAX_MAP_EDGE || config.map_height > MAX_MAP_EDGE {
            return Err(format!(
                "map must be at most {}x{}, got {}x{}",
                MAX_MAP_EDGE, MAX_MAP_EDGE, config.map_width, config.map_height
            )
            .into());
        }

        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let world = World::generate(
            config.map_width,
            config.map_height,
            config.required_players,
            config.map_seed,
        );
        let ledger = ResourceLedger::new(config.required_players);
        let session = Session::new(config.required_players);

        Ok(Server {
            listener,
            config,
            event_tx,
            event_rx,
            connections: HashMap::new(),
            next_conn_id: 1,
            session,
            world,
            ledger,
            lockstep: Lockstep::new(),
            tick_deadline: None,
        })
    }

    /// The bound address; useful when the configured port was 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Main loop. Returns once the session is torn down.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!(
            "Waiting for {} players, map {}x{}",
            self.config.required_players, self.config.map_width, self.config.map_height
        );

        while self.session.state() != SessionState::Down {
            let deadline = self.tick_deadline.unwrap_or_else(far_future);
            tokio::select! {
                result = self.listener.accept() => match result {
                    Ok((stream, addr)) => self.handle_accept(stream, addr),
                    Err(e) => warn!("Accept failed: {}", e),
                },
                event = self.event_rx.recv() => match event {
                    Some(Event::FrameReceived { conn_id, frame }) => {
                        self.handle_frame(conn_id, frame);
                    }
                    Some(Event::ConnectionClosed { conn_id, error }) => {
                        self.handle_closed(conn_id, error);
                    }
                    None => break,
                },
                _ = sleep_until(deadline), if self.tick_deadline.is_some() => {
                    warn!(
                        "Tick {} was not confirmed within {:?}",
                        self.lockstep.tick(),
                        self.config.tick_timeout
                    );
                    self.shut_down(DownReason::TickTimeout);
                }
            }
        }

        // Let writer tasks drain the teardown frames before sockets drop.
        tokio::time::sleep(Duration::from_millis(100)).await;
        info!("Session over, server exiting");
        Ok(())
    }

    fn handle_accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        let conn_id = self.next_conn_id;
        self.next_conn_id += 1;
        info!("Connection {} accepted from {}", conn_id, addr);

        let (read_half, write_half) = stream.into_split();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        spawn_reader(conn_id, read_half, self.event_tx.clone());
        spawn_writer(conn_id, write_half, writer_rx);

        self.connections
            .insert(conn_id, Connection::new(conn_id, addr, writer_tx));
    }

    fn handle_frame(&mut self, conn_id: u32, frame: Frame) {
        let state = match self.connections.get(&conn_id) {
            Some(conn) => conn.state,
            None => return, // dropped earlier this iteration
        };

        let message = match Message::decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                // Unrecognized tags and malformed payloads end the
                // connection in any state, same as a framing error.
                warn!("Connection {} sent an undecodable frame: {}", conn_id, e);
                if state == ConnState::ConnectOk {
                    self.drop_connection(conn_id, "undecodable frame");
                } else {
                    self.reject_and_close(conn_id, RejectReason::HandshakeViolation);
                }
                return;
            }
        };
        debug!("Connection {} -> {:?}", conn_id, message);

        if state == ConnState::ConnectOk {
            self.handle_established(conn_id, message);
        } else {
            self.handle_handshake(conn_id, message);
        }
    }

    fn handle_handshake(&mut self, conn_id: u32, message: Message) {
        match message {
            Message::JoinRequest { version } => self.handle_join(conn_id, version),
            Message::TimeSyncAck { round, token } => self.handle_sync_ack(conn_id, round, token),
            other => {
                warn!(
                    "Connection {} sent tag {} before finishing the handshake",
                    conn_id,
                    other.tag()
                );
                self.reject_and_close(conn_id, RejectReason::HandshakeViolation);
            }
        }
    }

    fn handle_join(&mut self, conn_id: u32, version: u32) {
        let state = match self.connections.get(&conn_id) {
            Some(conn) => conn.state,
            None => return,
        };
        if state != ConnState::Init {
            self.reject_and_close(conn_id, RejectReason::HandshakeViolation);
            return;
        }
        if version != PROTOCOL_VERSION {
            info!(
                "Connection {} rejected: protocol version {} (want {})",
                conn_id, version, PROTOCOL_VERSION
            );
            self.reject_and_close(conn_id, RejectReason::BadVersion);
            return;
        }
        let slot = match self.session.reserve_slot(conn_id) {
            Some(slot) => slot,
            None => {
                info!("Connection {} rejected: no free slot", conn_id);
                self.reject_and_close(conn_id, RejectReason::ServerFull);
                return;
            }
        };

        let time_sync = self.config.time_sync;
        let accept = Message::JoinAccept {
            client_id: conn_id,
            slot: slot as u32,
            required: self.config.required_players as u32,
            map_width: self.config.map_width,
            map_height: self.config.map_height,
        };
        let mut ok = false;
        if let Some(conn) = self.connections.get_mut(&conn_id) {
            conn.slot = Some(slot);
            ok = conn.enqueue(&accept).is_ok();
            if time_sync {
                let probe = conn.begin_time_sync();
                ok = ok && conn.enqueue(&probe).is_ok();
            } else {
                conn.state = ConnState::ConnectOk;
            }
            ok = ok && conn.flush();
        }
        if !ok {
            self.drop_connection(conn_id, "write failed during join");
            return;
        }
        if !time_sync {
            self.on_connected(conn_id, slot);
        }
    }

    fn handle_sync_ack(&mut self, conn_id: u32, round: u32, token: u32) {
        let outcome = match self.connections.get_mut(&conn_id) {
            Some(conn) => conn.handle_sync_ack(round, token),
            None => return,
        };
        match outcome {
            SyncOutcome::Continue(probe) => {
                let mut ok = false;
                if let Some(conn) = self.connections.get_mut(&conn_id) {
                    ok = conn.enqueue(&probe).is_ok() && conn.flush();
                }
                if !ok {
                    self.drop_connection(conn_id, "write failed during time sync");
                }
            }
            SyncOutcome::Complete => {
                if let Some(slot) = self.connections.get(&conn_id).and_then(|c| c.slot) {
                    self.on_connected(conn_id, slot);
                }
            }
            SyncOutcome::Violation => {
                warn!("Connection {} failed the time sync", conn_id);
                self.reject_and_close(conn_id, RejectReason::HandshakeViolation);
            }
        }
    }

    fn on_connected(&mut self, conn_id: u32, slot: usize) {
        info!(
            "Connection {} completed the handshake for slot {}",
            conn_id, slot
        );
        self.session.mark_ready(slot);
        self.broadcast_lobby_status();
        if self.session.all_ready() {
            self.start_game();
        }
    }

    fn handle_established(&mut self, conn_id: u32, message: Message) {
        let slot = match self.connections.get(&conn_id).and_then(|c| c.slot) {
            Some(slot) => slot,
            None => {
                self.fault(conn_id, "gameplay traffic without a slot");
                return;
            }
        };
        let playing = self.session.state() == SessionState::Playing;

        match message {
            Message::TickConfirm { tick } if playing => match self.lockstep.confirm(slot, tick) {
                ConfirmOutcome::Accepted => {
                    if let Some(conn) = self.connections.get_mut(&conn_id) {
                        conn.last_confirmed_tick = tick;
                    }
                    self.try_advance();
                }
                ConfirmOutcome::Duplicate => self.fault(conn_id, "duplicate tick confirm"),
                ConfirmOutcome::WrongTick => self.fault(conn_id, "confirm for the wrong tick"),
            },
            Message::BuildOrder { kind, x, y } if playing => {
                self.lockstep.queue_action(slot, Action::Build { kind, x, y });
            }
            Message::MoveOrder { unit, x, y } if playing => {
                self.lockstep.queue_action(slot, Action::Move { unit, x, y });
            }
            Message::AttackOrder { unit, target } if playing => {
                self.lockstep.queue_action(slot, Action::Attack { unit, target });
            }
            other => {
                let what = format!(
                    "tag {} is not acceptable in session state {:?}",
                    other.tag(),
                    self.session.state()
                );
                self.fault(conn_id, &what);
            }
        }
    }

    fn try_advance(&mut self) {
        if !self.lockstep.all_confirmed(self.session.required()) {
            return;
        }
        debug!("Tick {} confirmed by all players", self.lockstep.tick());
        let events = self
            .lockstep
            .advance(&mut self.world, &mut self.ledger, &mut self.session);
        self.dispatch(events);
        self.arm_tick_deadline();
    }

    fn start_game(&mut self) {
        let events = self
            .lockstep
            .start_game(&mut self.world, &mut self.ledger, &mut self.session);
        self.dispatch(events);
        self.arm_tick_deadline();
    }

    fn arm_tick_deadline(&mut self) {
        self.tick_deadline = self.config.tick_timeout.map(|t| Instant::now() + t);
    }

    /// Routes per-slot notifications into connection outboxes, then flushes
    /// each connection once, so a tick's worth of events travels as one
    /// write.
    fn dispatch(&mut self, events: Vec<Notice>) {
        let mut dead = Vec::new();
        for (slot, message) in events {
            let conn = self
                .connections
                .values_mut()
                .find(|c| c.slot == Some(slot) && c.state == ConnState::ConnectOk);
            if let Some(conn) = conn {
                if let Err(e) = conn.enqueue(&message) {
                    error!("Connection {} outbox failed: {}", conn.id, e);
                    dead.push(conn.id);
                }
            }
        }
        for conn in self.connections.values_mut() {
            if conn.state == ConnState::ConnectOk && !conn.flush() {
                dead.push(conn.id);
            }
        }
        dead.sort_unstable();
        dead.dedup();
        for conn_id in dead {
            self.drop_connection(conn_id, "outbox failure");
        }
    }

    fn broadcast_lobby_status(&mut self) {
        let status = Message::LobbyStatus {
            connected: self.session.ready_count() as u32,
            required: self.session.required() as u32,
        };
        let mut dead = Vec::new();
        for conn in self.connections.values_mut() {
            if conn.state != ConnState::ConnectOk {
                continue;
            }
            if conn.enqueue(&status).is_err() || !conn.flush() {
                dead.push(conn.id);
            }
        }
        for conn_id in dead {
            self.drop_connection(conn_id, "write failed");
        }
    }

    fn handle_closed(&mut self, conn_id: u32, error: Option<ProtocolError>) {
        match error {
            Some(e) => warn!("Connection {} closed: {}", conn_id, e),
            None => info!("Connection {} closed by peer", conn_id),
        }
        self.drop_connection(conn_id, "peer gone");
    }

    fn reject_and_close(&mut self, conn_id: u32, reason: RejectReason) {
        if let Some(conn) = self.connections.get_mut(&conn_id) {
            if conn.enqueue(&Message::Reject { reason }).is_ok() {
                conn.flush();
            }
        }
        self.drop_connection(conn_id, "rejected");
    }

    fn fault(&mut self, conn_id: u32, what: &str) {
        let close = match self.connections.get_mut(&conn_id) {
            Some(conn) => conn.record_fault(what),
            None => return,
        };
        if close {
            self.drop_connection(conn_id, "too many protocol faults");
        }
    }

    fn drop_connection(&mut self, conn_id: u32, why: &str) {
        let conn = match self.connections.remove(&conn_id) {
            Some(conn) => conn,
            None => return,
        };
        info!("Dropping connection {} ({}): {}", conn_id, conn.addr, why);

        if let Some(slot) = conn.slot {
            match self.session.state() {
                // Lockstep cannot continue without every player.
                SessionState::Playing => self.shut_down(DownReason::PeerDisconnected),
                SessionState::Init | SessionState::Waiting => {
                    self.session.release_slot(slot);
                    self.broadcast_lobby_status();
                }
                SessionState::Down => {}
            }
        }
    }

    /// Tells every established connection the session is over and marks the
    /// session down, which ends the run loop.
    fn shut_down(&mut self, reason: DownReason) {
        if self.session.state() == SessionState::Down {
            return;
        }
        warn!("Session down: {}", reason);
        let down = Message::SessionDown { reason };
        for conn in self.connections.values_mut() {
            if conn.state != ConnState::ConnectOk {
                continue;
            }
            if conn.enqueue(&down).is_ok() {
                conn.flush();
            }
        }
        self.session.take_down();
        self.tick_deadline = None;
    }
}

/// Spawns the task that reads frames off one socket and forwards them to
/// the coordinator.
fn spawn_reader(conn_id: u32, mut read_half: OwnedReadHalf, events: mpsc::UnboundedSender<Event>) {
    tokio::spawn(async move {
        loop {
            match Frame::read_from(&mut read_half).await {
                Ok(frame) => {
                    if events.send(Event::FrameReceived { conn_id, frame }).is_err() {
                        break; // coordinator is gone
                    }
                }
                Err(ProtocolError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    let _ = events.send(Event::ConnectionClosed {
                        conn_id,
                        error: None,
                    });
                    break;
                }
                Err(e) => {
                    let _ = events.send(Event::ConnectionClosed {
                        conn_id,
                        error: Some(e),
                    });
                    break;
                }
            }
        }
    });
}

/// Spawns the task that writes flushed outbox batches to one socket. Ends
/// when the connection is dropped and its channel closes.
fn spawn_writer(
    conn_id: u32,
    mut write_half: OwnedWriteHalf,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    tokio::spawn(async move {
        while let Some(bytes) = outgoing.recv().await {
            if let Err(e) = write_half.write_all(&bytes).await {
                debug!("Writer for connection {} stopped: {}", conn_id, e);
                break;
            }
        }
    });
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.required_players, 2);
        assert_eq!(config.map_width, 32);
        assert_eq!(config.map_height, 32);
        assert_eq!(config.tick_timeout, Some(Duration::from_secs(30)));
        assert!(config.time_sync);
    }

    #[test]
    fn test_event_channel_roundtrip() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let frame = Message::TickConfirm { tick: 3 }.encode();

        tx.send(Event::FrameReceived { conn_id: 1, frame }).unwrap();

        match rx.try_recv().unwrap() {
            Event::FrameReceived { conn_id, frame } => {
                assert_eq!(conn_id, 1);
                assert_eq!(
                    Message::decode(&frame).unwrap(),
                    Message::TickConfirm { tick: 3 }
                );
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_config() {
        let config = ServerConfig {
            port: 0,
            required_players: 0,
            ..ServerConfig::default()
        };
        assert!(Server::bind(config).await.is_err());

        let config = ServerConfig {
            port: 0,
            required_players: MAX_PLAYERS + 1,
            ..ServerConfig::default()
        };
        assert!(Server::bind(config).await.is_err());

        let config = ServerConfig {
            port: 0,
            map_width: 4,
            ..ServerConfig::default()
        };
        assert!(Server::bind(config).await.is_err());

        let config = ServerConfig {
            port: 0,
            map_width: 100_000,
            map_height: 100_000,
            ..ServerConfig::default()
        };
        assert!(Server::bind(config).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_to_ephemeral_port() {
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        let server = Server::bind(config).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_far_future_outlives_any_tick_timeout() {
        assert!(far_future() > Instant::now() + Duration::from_secs(3600));
    }
}
