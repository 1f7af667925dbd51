//! Per-connection bookkeeping
//!
//! Each accepted socket gets a [`Connection`]: its handshake state, the slot
//! it eventually binds to, a fault counter for protocol misuse, and an
//! [`Outbox`] that batches encoded frames until the coordinator decides to
//! flush. Batching keeps a tick's worth of events in one write to the
//! socket instead of one write per event.

use log::{debug, warn};
use shared::{Message, ProtocolError};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::sync::mpsc;

/// Encoded bytes an outbox may hold between flushes. Overflow means the
/// peer is not draining its socket and the connection is torn down.
pub const OUTBOX_CAPACITY: usize = 64 * 1024;

/// Protocol faults tolerated after the handshake before the connection is
/// closed.
pub const MAX_PROTOCOL_FAULTS: u32 = 3;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("outbox full: {queued} bytes queued, {incoming} incoming, capacity {capacity}")]
    Overflow {
        queued: usize,
        incoming: usize,
        capacity: usize,
    },
    #[error(transparent)]
    Encode(#[from] ProtocolError),
}

/// Buffers encoded frames for one connection until flushed.
#[derive(Debug, Default)]
pub struct Outbox {
    buf: Vec<u8>,
}

impl Outbox {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn enqueue(&mut self, message: &Message) -> Result<(), OutboxError> {
        let frame = message.encode();
        let bytes = frame.encode()?;
        if self.buf.len() + bytes.len() > OUTBOX_CAPACITY {
            return Err(OutboxError::Overflow {
                queued: self.buf.len(),
                incoming: bytes.len(),
                capacity: OUTBOX_CAPACITY,
            });
        }
        self.buf.extend_from_slice(&bytes);
        Ok(())
    }

    /// Takes everything queued. Flushing an empty outbox is a no-op.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            debug!("skipping flush of empty outbox");
            return None;
        }
        Some(std::mem::take(&mut self.buf))
    }
}

/// Handshake progress. Gameplay traffic is only legal in `ConnectOk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accepted, no valid join yet.
    Init,
    /// Join accepted, first time-sync round in flight.
    SyncMe,
    /// First round acknowledged, second in flight.
    SyncOther,
    /// Fully connected.
    ConnectOk,
}

#[derive(Debug)]
pub enum SyncOutcome {
    /// Round one acknowledged; send the next probe.
    Continue(Message),
    /// Round two acknowledged; the connection is established.
    Complete,
    /// Ack for a round or token that was never sent.
    Violation,
}

#[derive(Debug)]
pub struct Connection {
    pub id: u32,
    pub addr: SocketAddr,
    pub state: ConnState,
    pub slot: Option<usize>,
    pub last_confirmed_tick: u32,
    pub outbox: Outbox,
    writer: mpsc::UnboundedSender<Vec<u8>>,
    faults: u32,
    expected_sync: Option<(u32, u32)>,
}

impl Connection {
    pub fn new(id: u32, addr: SocketAddr, writer: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self {
            id,
            addr,
            state: ConnState::Init,
            slot: None,
            last_confirmed_tick: 0,
            outbox: Outbox::new(),
            writer,
            faults: 0,
            expected_sync: None,
        }
    }

    /// Starts the two-round clock probe. The token is random so a client
    /// cannot ack rounds it never received.
    pub fn begin_time_sync(&mut self) -> Message {
        let token: u32 = rand::random();
        self.state = ConnState::SyncMe;
        self.expected_sync = Some((1, token));
        Message::TimeSync { round: 1, token }
    }

    pub fn handle_sync_ack(&mut self, round: u32, token: u32) -> SyncOutcome {
        match (self.state, self.expected_sync) {
            (ConnState::SyncMe, Some((1, expected))) if round == 1 && token == expected => {
                let token: u32 = rand::random();
                self.state = ConnState::SyncOther;
                self.expected_sync = Some((2, token));
                SyncOutcome::Continue(Message::TimeSync { round: 2, token })
            }
            (ConnState::SyncOther, Some((2, expected))) if round == 2 && token == expected => {
                self.state = ConnState::ConnectOk;
                self.expected_sync = None;
                SyncOutcome::Complete
            }
            _ => SyncOutcome::Violation,
        }
    }

    /// Counts a protocol fault. Returns true once the connection has used
    /// up its tolerance and must be closed.
    pub fn record_fault(&mut self, what: &str) -> bool {
        self.faults += 1;
        warn!(
            "connection {} fault {}/{}: {}",
            self.id, self.faults, MAX_PROTOCOL_FAULTS, what
        );
        self.faults >= MAX_PROTOCOL_FAULTS
    }

    pub fn enqueue(&mut self, message: &Message) -> Result<(), OutboxError> {
        self.outbox.enqueue(message)
    }

    /// Hands queued bytes to the writer task. Returns false when the writer
    /// is gone, which means the socket already failed.
    pub fn flush(&mut self) -> bool {
        match self.outbox.flush() {
            Some(bytes) => self.writer.send(bytes).is_ok(),
            None => true,
        }
    }
}
