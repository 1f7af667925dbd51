//! Lockstep barrier and tick pipeline
//!
//! The simulation advances one tick at a time and only when every player
//! has confirmed the current tick. Orders received during a tick are bound
//! to it and applied in arrival order at the start of the next advance, so
//! every client that replays the same order stream reaches the same state.
//!
//! Each advance runs the same pipeline: apply orders, move everything, then
//! sweep visibility once positions are final, resolve combat, pay income,
//! and finally announce the new tick.

use crate::ledger::ResourceLedger;
use crate::session::Session;
use crate::visibility::{self, Notice};
use crate::world::{UnitId, World};
use log::{debug, warn};
use shared::Message;
use std::collections::HashSet;

/// Orders buffered for one player across one tick. A client has no reason
/// to exceed this; one that does is flooding and gets its extras dropped.
const MAX_PENDING_ACTIONS: usize = 1024;

/// A player order, already validated for shape but not yet for legality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Build { kind: u32, x: u32, y: u32 },
    Move { unit: UnitId, x: u32, y: u32 },
    Attack { unit: UnitId, target: UnitId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Accepted,
    /// This slot already confirmed the current tick.
    Duplicate,
    /// Confirm for some other tick than the current one.
    WrongTick,
}

#[derive(Debug, Default)]
pub struct Lockstep {
    tick: u32,
    confirmed: HashSet<usize>,
    pending: Vec<(usize, Action)>,
}

impl Lockstep {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn confirm(&mut self, slot: usize, tick: u32) -> ConfirmOutcome {
        if tick != self.tick {
            return ConfirmOutcome::WrongTick;
        }
        if !self.confirmed.insert(slot) {
            return ConfirmOutcome::Duplicate;
        }
        ConfirmOutcome::Accepted
    }

    pub fn all_confirmed(&self, players: usize) -> bool {
        self.confirmed.len() >= players
    }

    pub fn queue_action(&mut self, slot: usize, action: Action) {
        // The cap is per player, so one flooder cannot crowd out orders
        // already accepted from anyone else.
        let queued = self.pending.iter().filter(|(s, _)| *s == slot).count();
        if queued >= MAX_PENDING_ACTIONS {
            warn!("dropping action from slot {}: queue full", slot);
            return;
        }
        self.pending.push((slot, action));
    }

    /// Transitions the session into play and produces the opening batch:
    /// for each player a `GameStart`, everything their starting units can
    /// see, their opening balances, and the first `TickAdvance`.
    pub fn start_game(
        &mut self,
        world: &mut World,
        ledger: &mut ResourceLedger,
        session: &mut Session,
    ) -> Vec<Notice> {
        self.tick = 1;
        self.confirmed.clear();
        session.begin_playing();

        let mut placement = Vec::new();
        for slot in 0..world.player_count() {
            for id in world.place_starting_units(slot) {
                placement.extend(visibility::sweep_place(world, id));
            }
        }

        let balances = ledger.take_dirty();
        let mut out = Vec::new();
        for slot in 0..world.player_count() {
            out.push((slot, Message::GameStart { tick: self.tick }));
            out.extend(placement.iter().filter(|(s, _)| *s == slot).cloned());
            if let Some(&(_, minerals, energy)) = balances.iter().find(|(s, _, _)| *s == slot) {
                out.push((slot, Message::ResourceUpdate { minerals, energy }));
            }
            out.push((slot, Message::TickAdvance { tick: self.tick }));
        }
        out
    }

    /// Runs one tick of the simulation and returns every notification it
    /// produced, ending with a `TickAdvance` for each player. The caller
    /// must have seen the barrier met.
    pub fn advance(
        &mut self,
        world: &mut World,
        ledger: &mut ResourceLedger,
        session: &mut Session,
    ) -> Vec<Notice> {
        let mut events: Vec<Notice> = Vec::new();

        // Orders, in the order they arrived. Illegal ones are dropped.
        let pending = std::mem::take(&mut self.pending);
        for (slot, action) in pending {
            match action {
                Action::Build { kind, x, y } => {
                    match world.try_build(slot, kind, (x, y), ledger) {
                        Ok(id) => {
                            session.record_built(slot);
                            events.extend(visibility::sweep_place(world, id));
                        }
                        Err(err) => debug!("dropping build order from slot {}: {}", slot, err),
                    }
                }
                Action::Move { unit, x, y } => {
                    if let Err(err) = world.order_move(slot, unit, (x, y)) {
                        debug!("dropping move order from slot {}: {}", slot, err);
                    }
                }
                Action::Attack { unit, target } => {
                    if let Err(err) = world.order_attack(slot, unit, target) {
                        debug!("dropping attack order from slot {}: {}", slot, err);
                    }
                }
            }
        }

        // Move everything first; sweeps must see final positions so a cell
        // two movers trade places over stays covered.
        for (id, from) in world.step_movement() {
            events.extend(visibility::sweep_move(world, id, from));
        }

        for unit in world.step_combat() {
            session.record_lost(unit.owner);
            events.extend(visibility::sweep_destroy(world, &unit));
        }

        world.income_into(ledger);
        for (slot, minerals, energy) in ledger.take_dirty() {
            events.push((slot, Message::ResourceUpdate { minerals, energy }));
        }

        self.tick += 1;
        self.confirmed.clear();
        for slot in 0..world.player_count() {
            events.push((slot, Message::TickAdvance { tick: self.tick }));
        }
        events
    }
}
