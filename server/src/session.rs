//! Session lifecycle and player slots
//!
//! One server process hosts one session. Slots are reserved when a join is
//! accepted and become ready when the handshake completes; the game starts
//! once every slot is ready. A session that reaches `Down` never restarts.

use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No player has completed the handshake yet.
    Init,
    /// At least one player ready, waiting for the rest.
    Waiting,
    /// Lockstep simulation running.
    Playing,
    /// Torn down; terminal.
    Down,
}

#[derive(Debug, Default)]
pub struct PlayerSlot {
    pub client_id: Option<u32>,
    pub ready: bool,
    pub units_built: u32,
    pub units_lost: u32,
}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
    slots: Vec<PlayerSlot>,
}

impl Session {
    pub fn new(required: usize) -> Self {
        let mut slots = Vec::with_capacity(required);
        slots.resize_with(required, PlayerSlot::default);
        Self {
            state: SessionState::Init,
            slots,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn required(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> &PlayerSlot {
        &self.slots[index]
    }

    /// Assigns the lowest free slot, or None when the lobby is full or the
    /// game already started.
    pub fn reserve_slot(&mut self, client_id: u32) -> Option<usize> {
        if !matches!(self.state, SessionState::Init | SessionState::Waiting) {
            return None;
        }
        let index = self.slots.iter().position(|s| s.client_id.is_none())?;
        self.slots[index] = PlayerSlot {
            client_id: Some(client_id),
            ..PlayerSlot::default()
        };
        info!("client {} reserved slot {}", client_id, index);
        Some(index)
    }

    /// Frees a slot whose client left before the game started.
    pub fn release_slot(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            info!("slot {} released", index);
            *slot = PlayerSlot::default();
        }
    }

    pub fn mark_ready(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.ready = true;
            if self.state == SessionState::Init {
                self.state = SessionState::Waiting;
            }
        }
    }

    pub fn slot_of_client(&self, client_id: u32) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.client_id == Some(client_id))
    }

    pub fn ready_count(&self) -> usize {
        self.slots.iter().filter(|s| s.ready).count()
    }

    pub fn all_ready(&self) -> bool {
        self.slots.iter().all(|s| s.ready)
    }

    pub fn begin_playing(&mut self) {
        info!("all {} players ready, game starting", self.slots.len());
        self.state = SessionState::Playing;
    }

    pub fn take_down(&mut self) {
        self.state = SessionState::Down;
    }

    pub fn record_built(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.units_built += 1;
        }
    }

    pub fn record_lost(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.units_lost += 1;
        }
    }
}
