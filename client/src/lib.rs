//! # Game Client Library
//!
//! This library provides the client-side implementation for the lockstep
//! strategy game. It handles the connection handshake, the lockstep
//! confirm/advance heartbeat, and a local mirror of everything the server
//! has chosen to reveal.
//!
//! ## Architecture Overview
//!
//! The client is deliberately thin. The server owns the simulation and
//! only reports what each player is allowed to perceive, so there is
//! nothing to predict and nothing to reconcile:
//!
//! ### Event Mirror
//! The [`Mirror`] is a pure fold over server events. Visible units, units
//! remembered at their last known position, explored ground, and resource
//! balances all change only when a server message says so. A remembered
//! unit may no longer exist; the server deliberately does not say.
//!
//! ### Lockstep Heartbeat
//! [`GameClient::next_tick`] confirms the current tick and then reads
//! events until the server advances. The server does not move until every
//! player has confirmed, so a slow client slows everyone; it never
//! desyncs anyone.
//!
//! ### Orders
//! Build, move, and attack orders are fire-and-forget. The server
//! validates them against the authoritative state and silently drops
//! anything illegal; their effects come back as ordinary events.
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::GameClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = GameClient::connect("127.0.0.1:7777").await?;
//!     client.wait_for_start().await?;
//!     loop {
//!         let report = client.next_tick().await?;
//!         if report.down.is_some() {
//!             break;
//!         }
//!         println!("tick {}: {} events", report.tick, report.events.len());
//!     }
//!     Ok(())
//! }
//! ```

use log::{debug, info, warn};
use shared::{DownReason, Frame, Message, ProtocolError, PROTOCOL_VERSION};
use std::collections::HashMap;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// A unit the player currently perceives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownUnit {
    pub kind: u32,
    pub owner: u32,
    pub pos: (u32, u32),
}

/// One explored cell. Terrain is remembered forever; `visible` tracks
/// whether the cell is inside a sensor circle right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellView {
    pub terrain: u32,
    pub visible: bool,
}

/// Client-side copy of everything the server has revealed so far.
#[derive(Debug, Default)]
pub struct Mirror {
    pub units: HashMap<u32, KnownUnit>,
    /// Units that slipped out of view, kept at their last known position.
    pub remembered: HashMap<u32, KnownUnit>,
    pub cells: HashMap<(u32, u32), CellView>,
    pub minerals: u32,
    pub energy: u32,
}

impl Mirror {
    /// Folds one server event into the mirror. Non-gameplay messages are
    /// ignored.
    pub fn apply(&mut self, message: &Message) {
        match *message {
            Message::EntityCreated {
                id,
                kind,
                owner,
                x,
                y,
            } => {
                self.units.insert(
                    id,
                    KnownUnit {
                        kind,
                        owner,
                        pos: (x, y),
                    },
                );
            }
            Message::EntityDestroyed { id } => {
                self.units.remove(&id);
                self.remembered.remove(&id);
            }
            Message::EntityMoved { id, x, y } => {
                if let Some(unit) = self.units.get_mut(&id) {
                    unit.pos = (x, y);
                }
            }
            Message::EntityHidden { id } => {
                if let Some(unit) = self.units.remove(&id) {
                    self.remembered.insert(id, unit);
                }
            }
            Message::EntityUnhidden { id, x, y } => {
                if let Some(mut unit) = self.remembered.remove(&id) {
                    unit.pos = (x, y);
                    self.units.insert(id, unit);
                } else {
                    warn!("Unhide for unit {} that was never hidden", id);
                }
            }
            Message::CellRevealed { x, y, terrain } => {
                self.cells.insert(
                    (x, y),
                    CellView {
                        terrain,
                        visible: true,
                    },
                );
            }
            Message::CellUnhidden { x, y } => {
                if let Some(cell) = self.cells.get_mut(&(x, y)) {
                    cell.visible = true;
                }
            }
            Message::CellHidden { x, y } => {
                if let Some(cell) = self.cells.get_mut(&(x, y)) {
                    cell.visible = false;
                }
            }
            Message::ResourceUpdate { minerals, energy } => {
                self.minerals = minerals;
                self.energy = energy;
            }
            _ => {}
        }
    }

    /// Cells currently inside some sensor circle.
    pub fn visible_cells(&self) -> usize {
        self.cells.values().filter(|c| c.visible).count()
    }
}

/// Everything one lockstep tick delivered.
#[derive(Debug)]
pub struct TickReport {
    pub tick: u32,
    pub events: Vec<Message>,
    /// Set when the server tore the session down instead of advancing.
    pub down: Option<DownReason>,
}

/// A connected game client.
pub struct GameClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    pub client_id: u32,
    pub slot: u32,
    pub required: u32,
    pub map_width: u32,
    pub map_height: u32,
    pub mirror: Mirror,
    tick: u32,
}

impl GameClient {
    /// Connects and performs the full handshake: join request, any
    /// time-sync rounds the server runs, up to the first lobby status.
    pub async fn connect(addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let mut client = GameClient {
            reader: BufReader::new(read_half),
            writer: write_half,
            client_id: 0,
            slot: 0,
            required: 0,
            map_width: 0,
            map_height: 0,
            mirror: Mirror::default(),
            tick: 0,
        };

        client
            .send(&Message::JoinRequest {
                version: PROTOCOL_VERSION,
            })
            .await?;

        loop {
            match client.read_message().await? {
                Message::JoinAccept {
                    client_id,
                    slot,
                    required,
                    map_width,
                    map_height,
                } => {
                    info!(
                        "Joined as client {} in slot {} ({} players required)",
                        client_id, slot, required
                    );
                    client.client_id = client_id;
                    client.slot = slot;
                    client.required = required;
                    client.map_width = map_width;
                    client.map_height = map_height;
                }
                Message::TimeSync { round, token } => {
                    debug!("Answering time sync round {}", round);
                    client.send(&Message::TimeSyncAck { round, token }).await?;
                }
                Message::Reject { reason } => {
                    return Err(format!("server rejected the connection: {}", reason).into());
                }
                Message::LobbyStatus {
                    connected,
                    required,
                } => {
                    info!("Lobby: {}/{} players ready", connected, required);
                    return Ok(client);
                }
                other => {
                    return Err(format!("unexpected handshake message: {:?}", other).into());
                }
            }
        }
    }

    /// The tick the client is currently allowed to confirm.
    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Blocks until the game starts, folding the opening batch into the
    /// mirror. Lobby chatter while other players join is reported but
    /// otherwise ignored.
    pub async fn wait_for_start(&mut self) -> Result<TickReport, Box<dyn std::error::Error>> {
        let mut events = Vec::new();
        loop {
            match self.read_message().await? {
                Message::LobbyStatus {
                    connected,
                    required,
                } => {
                    info!("Lobby: {}/{} players ready", connected, required);
                }
                Message::GameStart { tick } => {
                    info!("Game starting at tick {}", tick);
                    self.tick = tick;
                }
                Message::SessionDown { reason } => {
                    warn!("Session ended before the game started: {}", reason);
                    return Ok(TickReport {
                        tick: self.tick,
                        events,
                        down: Some(reason),
                    });
                }
                Message::TickAdvance { tick } => {
                    self.tick = tick;
                    return Ok(TickReport {
                        tick,
                        events,
                        down: None,
                    });
                }
                event => {
                    self.mirror.apply(&event);
                    events.push(event);
                }
            }
        }
    }

    /// Confirms the current tick and collects everything the next one
    /// delivers. This is the lockstep heartbeat: the server does not move
    /// until every player has made this call.
    pub async fn next_tick(&mut self) -> Result<TickReport, Box<dyn std::error::Error>> {
        self.send(&Message::TickConfirm { tick: self.tick }).await?;

        let mut events = Vec::new();
        loop {
            match self.read_message().await? {
                Message::TickAdvance { tick } => {
                    debug!("Advanced to tick {}", tick);
                    self.tick = tick;
                    return Ok(TickReport {
                        tick,
                        events,
                        down: None,
                    });
                }
                Message::SessionDown { reason } => {
                    warn!("Session down: {}", reason);
                    return Ok(TickReport {
                        tick: self.tick,
                        events,
                        down: Some(reason),
                    });
                }
                event => {
                    self.mirror.apply(&event);
                    events.push(event);
                }
            }
        }
    }

    /// Asks the server to place a structure. Illegal orders are dropped
    /// server-side; nothing comes back on failure.
    pub async fn order_build(&mut self, kind: u32, x: u32, y: u32) -> Result<(), ProtocolError> {
        self.send(&Message::BuildOrder { kind, x, y }).await
    }

    pub async fn order_move(&mut self, unit: u32, x: u32, y: u32) -> Result<(), ProtocolError> {
        self.send(&Message::MoveOrder { unit, x, y }).await
    }

    pub async fn order_attack(&mut self, unit: u32, target: u32) -> Result<(), ProtocolError> {
        self.send(&Message::AttackOrder { unit, target }).await
    }

    async fn send(&mut self, message: &Message) -> Result<(), ProtocolError> {
        let bytes = message.encode().encode()?;
        self.writer.write_all(&bytes).await?;
        Ok(())
    }

    async fn read_message(&mut self) -> Result<Message, ProtocolError> {
        let frame = Frame::read_from(&mut self.reader).await?;
        Message::decode(&frame)
    }
}
