//! Typed messages layered over the wire framing
//!
//! Tags are banded: handshake control below 16, session dialog below 32,
//! gameplay from 32 up. Gameplay tags are grouped by concern (construction,
//! movement, combat, resources, lockstep) so each group owns a small range.
//! Orders carry no tick word; the server binds an order to the tick during
//! which it arrived.

use crate::frame::{Frame, ProtocolError};
use std::fmt;

pub mod tag {
    // control band
    pub const JOIN_REQUEST: u32 = 1;
    pub const JOIN_ACCEPT: u32 = 2;
    pub const TIME_SYNC: u32 = 3;
    pub const TIME_SYNC_ACK: u32 = 4;
    pub const REJECT: u32 = 5;

    // dialog band
    pub const LOBBY_STATUS: u32 = 16;
    pub const GAME_START: u32 = 17;
    pub const SESSION_DOWN: u32 = 18;

    // gameplay: construction
    pub const BUILD_ORDER: u32 = 32;
    pub const ENTITY_CREATED: u32 = 33;
    pub const ENTITY_DESTROYED: u32 = 34;

    // gameplay: movement and fog of war
    pub const MOVE_ORDER: u32 = 40;
    pub const ENTITY_MOVED: u32 = 41;
    pub const ENTITY_HIDDEN: u32 = 42;
    pub const ENTITY_UNHIDDEN: u32 = 43;
    pub const CELL_REVEALED: u32 = 44;
    pub const CELL_UNHIDDEN: u32 = 45;
    pub const CELL_HIDDEN: u32 = 46;

    // gameplay: combat
    pub const ATTACK_ORDER: u32 = 48;

    // gameplay: resources
    pub const RESOURCE_UPDATE: u32 = 56;

    // gameplay: lockstep barrier
    pub const TICK_CONFIRM: u32 = 64;
    pub const TICK_ADVANCE: u32 = 65;
}

/// Why the server refused a connection during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    ServerFull,
    BadVersion,
    HandshakeViolation,
}

impl RejectReason {
    pub fn code(self) -> u32 {
        match self {
            RejectReason::ServerFull => 1,
            RejectReason::BadVersion => 2,
            RejectReason::HandshakeViolation => 3,
        }
    }

    fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(RejectReason::ServerFull),
            2 => Some(RejectReason::BadVersion),
            3 => Some(RejectReason::HandshakeViolation),
            _ => None,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectReason::ServerFull => "server full",
            RejectReason::BadVersion => "protocol version mismatch",
            RejectReason::HandshakeViolation => "handshake violation",
        };
        write!(f, "{}", text)
    }
}

/// Why a running session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownReason {
    PeerDisconnected,
    TickTimeout,
    ServerClosing,
}

impl DownReason {
    pub fn code(self) -> u32 {
        match self {
            DownReason::PeerDisconnected => 1,
            DownReason::TickTimeout => 2,
            DownReason::ServerClosing => 3,
        }
    }

    fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(DownReason::PeerDisconnected),
            2 => Some(DownReason::TickTimeout),
            3 => Some(DownReason::ServerClosing),
            _ => None,
        }
    }
}

impl fmt::Display for DownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DownReason::PeerDisconnected => "a player disconnected",
            DownReason::TickTimeout => "tick confirmation timed out",
            DownReason::ServerClosing => "server closing",
        };
        write!(f, "{}", text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    // Connection handshake
    JoinRequest {
        version: u32,
    },
    JoinAccept {
        client_id: u32,
        slot: u32,
        required: u32,
        map_width: u32,
        map_height: u32,
    },
    TimeSync {
        round: u32,
        token: u32,
    },
    TimeSyncAck {
        round: u32,
        token: u32,
    },
    Reject {
        reason: RejectReason,
    },

    // Session dialog
    LobbyStatus {
        connected: u32,
        required: u32,
    },
    GameStart {
        tick: u32,
    },
    SessionDown {
        reason: DownReason,
    },

    // Gameplay: construction
    BuildOrder {
        kind: u32,
        x: u32,
        y: u32,
    },
    EntityCreated {
        id: u32,
        kind: u32,
        owner: u32,
        x: u32,
        y: u32,
    },
    EntityDestroyed {
        id: u32,
    },

    // Gameplay: movement and fog of war
    MoveOrder {
        unit: u32,
        x: u32,
        y: u32,
    },
    EntityMoved {
        id: u32,
        x: u32,
        y: u32,
    },
    EntityHidden {
        id: u32,
    },
    EntityUnhidden {
        id: u32,
        x: u32,
        y: u32,
    },
    CellRevealed {
        x: u32,
        y: u32,
        terrain: u32,
    },
    CellUnhidden {
        x: u32,
        y: u32,
    },
    CellHidden {
        x: u32,
        y: u32,
    },

    // Gameplay: combat
    AttackOrder {
        unit: u32,
        target: u32,
    },

    // Gameplay: resources
    ResourceUpdate {
        minerals: u32,
        energy: u32,
    },

    // Gameplay: lockstep barrier
    TickConfirm {
        tick: u32,
    },
    TickAdvance {
        tick: u32,
    },
}

impl Message {
    pub fn tag(&self) -> u32 {
        match self {
            Message::JoinRequest { .. } => tag::JOIN_REQUEST,
            Message::JoinAccept { .. } => tag::JOIN_ACCEPT,
            Message::TimeSync { .. } => tag::TIME_SYNC,
            Message::TimeSyncAck { .. } => tag::TIME_SYNC_ACK,
            Message::Reject { .. } => tag::REJECT,
            Message::LobbyStatus { .. } => tag::LOBBY_STATUS,
            Message::GameStart { .. } => tag::GAME_START,
            Message::SessionDown { .. } => tag::SESSION_DOWN,
            Message::BuildOrder { .. } => tag::BUILD_ORDER,
            Message::EntityCreated { .. } => tag::ENTITY_CREATED,
            Message::EntityDestroyed { .. } => tag::ENTITY_DESTROYED,
            Message::MoveOrder { .. } => tag::MOVE_ORDER,
            Message::EntityMoved { .. } => tag::ENTITY_MOVED,
            Message::EntityHidden { .. } => tag::ENTITY_HIDDEN,
            Message::EntityUnhidden { .. } => tag::ENTITY_UNHIDDEN,
            Message::CellRevealed { .. } => tag::CELL_REVEALED,
            Message::CellUnhidden { .. } => tag::CELL_UNHIDDEN,
            Message::CellHidden { .. } => tag::CELL_HIDDEN,
            Message::AttackOrder { .. } => tag::ATTACK_ORDER,
            Message::ResourceUpdate { .. } => tag::RESOURCE_UPDATE,
            Message::TickConfirm { .. } => tag::TICK_CONFIRM,
            Message::TickAdvance { .. } => tag::TICK_ADVANCE,
        }
    }

    pub fn encode(&self) -> Frame {
        let payload = match *self {
            Message::JoinRequest { version } => vec![version],
            Message::JoinAccept {
                client_id,
                slot,
                required,
                map_width,
                map_height,
            } => vec![client_id, slot, required, map_width, map_height],
            Message::TimeSync { round, token } => vec![round, token],
            Message::TimeSyncAck { round, token } => vec![round, token],
            Message::Reject { reason } => vec![reason.code()],
            Message::LobbyStatus {
                connected,
                required,
            } => vec![connected, required],
            Message::GameStart { tick } => vec![tick],
            Message::SessionDown { reason } => vec![reason.code()],
            Message::BuildOrder { kind, x, y } => vec![kind, x, y],
            Message::EntityCreated {
                id,
                kind,
                owner,
                x,
                y,
            } => vec![id, kind, owner, x, y],
            Message::EntityDestroyed { id } => vec![id],
            Message::MoveOrder { unit, x, y } => vec![unit, x, y],
            Message::EntityMoved { id, x, y } => vec![id, x, y],
            Message::EntityHidden { id } => vec![id],
            Message::EntityUnhidden { id, x, y } => vec![id, x, y],
            Message::CellRevealed { x, y, terrain } => vec![x, y, terrain],
            Message::CellUnhidden { x, y } => vec![x, y],
            Message::CellHidden { x, y } => vec![x, y],
            Message::AttackOrder { unit, target } => vec![unit, target],
            Message::ResourceUpdate { minerals, energy } => vec![minerals, energy],
            Message::TickConfirm { tick } => vec![tick],
            Message::TickAdvance { tick } => vec![tick],
        };
        Frame::new(self.tag(), payload)
    }

    pub fn decode(frame: &Frame) -> Result<Message, ProtocolError> {
        let message = match frame.tag {
            tag::JOIN_REQUEST => {
                let w = expect_words(frame, 1)?;
                Message::JoinRequest { version: w[0] }
            }
            tag::JOIN_ACCEPT => {
                let w = expect_words(frame, 5)?;
                Message::JoinAccept {
                    client_id: w[0],
                    slot: w[1],
                    required: w[2],
                    map_width: w[3],
                    map_height: w[4],
                }
            }
            tag::TIME_SYNC => {
                let w = expect_words(frame, 2)?;
                Message::TimeSync {
                    round: w[0],
                    token: w[1],
                }
            }
            tag::TIME_SYNC_ACK => {
                let w = expect_words(frame, 2)?;
                Message::TimeSyncAck {
                    round: w[0],
                    token: w[1],
                }
            }
            tag::REJECT => {
                let w = expect_words(frame, 1)?;
                Message::Reject {
                    reason: RejectReason::from_code(w[0]).ok_or_else(|| bad_payload(frame))?,
                }
            }
            tag::LOBBY_STATUS => {
                let w = expect_words(frame, 2)?;
                Message::LobbyStatus {
                    connected: w[0],
                    required: w[1],
                }
            }
            tag::GAME_START => {
                let w = expect_words(frame, 1)?;
                Message::GameStart { tick: w[0] }
            }
            tag::SESSION_DOWN => {
                let w = expect_words(frame, 1)?;
                Message::SessionDown {
                    reason: DownReason::from_code(w[0]).ok_or_else(|| bad_payload(frame))?,
                }
            }
            tag::BUILD_ORDER => {
                let w = expect_words(frame, 3)?;
                Message::BuildOrder {
                    kind: w[0],
                    x: w[1],
                    y: w[2],
                }
            }
            tag::ENTITY_CREATED => {
                let w = expect_words(frame, 5)?;
                Message::EntityCreated {
                    id: w[0],
                    kind: w[1],
                    owner: w[2],
                    x: w[3],
                    y: w[4],
                }
            }
            tag::ENTITY_DESTROYED => {
                let w = expect_words(frame, 1)?;
                Message::EntityDestroyed { id: w[0] }
            }
            tag::MOVE_ORDER => {
                let w = expect_words(frame, 3)?;
                Message::MoveOrder {
                    unit: w[0],
                    x: w[1],
                    y: w[2],
                }
            }
            tag::ENTITY_MOVED => {
                let w = expect_words(frame, 3)?;
                Message::EntityMoved {
                    id: w[0],
                    x: w[1],
                    y: w[2],
                }
            }
            tag::ENTITY_HIDDEN => {
                let w = expect_words(frame, 1)?;
                Message::EntityHidden { id: w[0] }
            }
            tag::ENTITY_UNHIDDEN => {
                let w = expect_words(frame, 3)?;
                Message::EntityUnhidden {
                    id: w[0],
                    x: w[1],
                    y: w[2],
                }
            }
            tag::CELL_REVEALED => {
                let w = expect_words(frame, 3)?;
                Message::CellRevealed {
                    x: w[0],
                    y: w[1],
                    terrain: w[2],
                }
            }
            tag::CELL_UNHIDDEN => {
                let w = expect_words(frame, 2)?;
                Message::CellUnhidden { x: w[0], y: w[1] }
            }
            tag::CELL_HIDDEN => {
                let w = expect_words(frame, 2)?;
                Message::CellHidden { x: w[0], y: w[1] }
            }
            tag::ATTACK_ORDER => {
                let w = expect_words(frame, 2)?;
                Message::AttackOrder {
                    unit: w[0],
                    target: w[1],
                }
            }
            tag::RESOURCE_UPDATE => {
                let w = expect_words(frame, 2)?;
                Message::ResourceUpdate {
                    minerals: w[0],
                    energy: w[1],
                }
            }
            tag::TICK_CONFIRM => {
                let w = expect_words(frame, 1)?;
                Message::TickConfirm { tick: w[0] }
            }
            tag::TICK_ADVANCE => {
                let w = expect_words(frame, 1)?;
                Message::TickAdvance { tick: w[0] }
            }
            other => return Err(ProtocolError::UnknownTag { tag: other }),
        };
        Ok(message)
    }
}

fn expect_words(frame: &Frame, want: usize) -> Result<&[u32], ProtocolError> {
    if frame.payload.len() != want {
        return Err(bad_payload(frame));
    }
    Ok(&frame.payload)
}

fn bad_payload(frame: &Frame) -> ProtocolError {
    ProtocolError::BadPayload {
        tag: frame.tag,
        words: frame.payload.len(),
    }
}
