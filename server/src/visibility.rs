//! Fog-of-war tracking
//!
//! Every cell and every unit carries a [`VisibilitySet`]: two per-player
//! bitmasks, `exists` (the player has seen this thing at least once) and
//! `known` (the player perceives it right now). `known` is always a subset
//! of `exists`. The distinction drives the wire protocol: the first time a
//! player sees something they get a created/revealed notification carrying
//! full detail, later re-sightings only get an unhidden notification.
//!
//! The sweep functions translate one world change (a unit placed, moved, or
//! destroyed) into the complete set of per-player notifications. Because
//! reveal and conceal only report actual bit flips, overlapping sensor
//! circles cannot double-notify: each transition is reported exactly once
//! no matter how many sweeps brush the same cell.
//!
//! Sensor coverage is a squared-distance comparison against the unit's
//! sensor radius; nothing here takes a square root.

use crate::world::{dist2, UnitId, World};
use shared::{Message, MAX_PLAYERS};

/// What a successful reveal means for the notified player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reveal {
    /// Never seen before: send the full created/revealed form.
    First,
    /// Seen before and re-entering view: the short unhidden form suffices.
    Again,
}

/// Paired exists/known player masks for one cell or unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisibilitySet {
    exists: u8,
    known: u8,
}

impl VisibilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the thing perceived by `slot`. Returns which notification the
    /// player is owed, or `None` when they already perceive it.
    pub fn reveal(&mut self, slot: usize) -> Option<Reveal> {
        let bit = Self::bit(slot);
        if self.known & bit != 0 {
            return None;
        }
        let outcome = if self.exists & bit == 0 {
            Reveal::First
        } else {
            Reveal::Again
        };
        self.exists |= bit;
        self.known |= bit;
        self.check();
        Some(outcome)
    }

    /// Clears current perception for `slot`, keeping the seen-before bit.
    /// Returns true when the player actually lost sight (a hidden
    /// notification is owed).
    pub fn conceal(&mut self, slot: usize) -> bool {
        let bit = Self::bit(slot);
        let was_known = self.known & bit != 0;
        self.known &= !bit;
        self.check();
        was_known
    }

    pub fn is_known(&self, slot: usize) -> bool {
        self.known & Self::bit(slot) != 0
    }

    pub fn ever_seen(&self, slot: usize) -> bool {
        self.exists & Self::bit(slot) != 0
    }

    /// Slots that currently perceive the thing.
    pub fn knowers(&self) -> impl Iterator<Item = usize> {
        let known = self.known;
        (0..MAX_PLAYERS).filter(move |slot| known & (1 << slot) != 0)
    }

    fn bit(slot: usize) -> u8 {
        debug_assert!(slot < MAX_PLAYERS);
        1 << slot
    }

    fn check(&self) {
        debug_assert_eq!(self.known & !self.exists, 0, "known must imply exists");
    }
}

/// A notification bound for one player's connection.
pub type Notice = (usize, Message);

/// Notifications for a unit that just entered the world: the owner learns
/// the covered ground and anything standing on it, and enemies whose
/// sensors cover the spawn point learn about the new unit.
pub fn sweep_place(world: &mut World, unit_id: UnitId) -> Vec<Notice> {
    let mut out = Vec::new();
    let Some(unit) = world.unit(unit_id) else {
        return out;
    };
    let owner = unit.owner;
    let radius = unit.kind.stats().sensor_radius;
    let pos = unit.pos;

    reveal_cells(world, owner, pos, radius, &mut out);
    reveal_units(world, owner, pos, radius, &mut out);
    cross_player_update(world, unit_id, &mut out);
    out
}

/// Notifications for a unit that moved from `from` to its current position
/// this tick. Call after all movement for the tick has been applied so
/// coverage checks see final positions.
pub fn sweep_move(world: &mut World, unit_id: UnitId, from: (u32, u32)) -> Vec<Notice> {
    let mut out = Vec::new();
    let Some(unit) = world.unit(unit_id) else {
        return out;
    };
    let owner = unit.owner;
    let radius = unit.kind.stats().sensor_radius;
    let to = unit.pos;
    let knew_before: Vec<usize> = unit.vis.knowers().collect();

    // Ground and units gained by the move.
    reveal_cells(world, owner, to, radius, &mut out);
    reveal_units(world, owner, to, radius, &mut out);

    // Ground that fell out of every sensor of the owner.
    let r2 = (radius as u64) * (radius as u64);
    for (x, y) in world.cells_in_radius(from, radius) {
        if dist2((x, y), to) <= r2 {
            continue; // still inside the moved sensor
        }
        if world.covered_by_any_sensor(owner, (x, y)) {
            continue;
        }
        if world.cell_vis_mut(x, y).conceal(owner) {
            out.push((owner, Message::CellHidden { x, y }));
        }
    }

    // Units the owner can no longer see.
    for other_id in world.unit_ids_in_radius(from, radius) {
        let Some(other) = world.unit(other_id) else {
            continue;
        };
        let other_pos = other.pos;
        if world.covered_by_any_sensor(owner, other_pos) {
            continue;
        }
        if let Some(other) = world.unit_mut(other_id) {
            if other.vis.conceal(owner) {
                out.push((owner, Message::EntityHidden { id: other_id }));
            }
        }
    }

    // How the move looks to every other player.
    cross_player_update(world, unit_id, &mut out);

    // Players that tracked the unit across the move get the new position.
    if let Some(unit) = world.unit(unit_id) {
        let (x, y) = unit.pos;
        for slot in knew_before {
            if unit.vis.is_known(slot) {
                out.push((slot, Message::EntityMoved { id: unit_id, x, y }));
            }
        }
    }
    out
}

/// Notifications for a unit that was just removed from the world. Every
/// player that currently perceives it hears about the destruction, range
/// notwithstanding; afterwards the owner's view shrinks by whatever only
/// this unit's sensor was covering.
pub fn sweep_destroy(world: &mut World, unit: &crate::world::Unit) -> Vec<Notice> {
    let mut out = Vec::new();
    for slot in unit.vis.knowers() {
        out.push((slot, Message::EntityDestroyed { id: unit.id }));
    }

    let owner = unit.owner;
    let radius = unit.kind.stats().sensor_radius;

    for (x, y) in world.cells_in_radius(unit.pos, radius) {
        if world.covered_by_any_sensor(owner, (x, y)) {
            continue;
        }
        if world.cell_vis_mut(x, y).conceal(owner) {
            out.push((owner, Message::CellHidden { x, y }));
        }
    }

    for other_id in world.unit_ids_in_radius(unit.pos, radius) {
        let Some(other) = world.unit(other_id) else {
            continue;
        };
        let other_pos = other.pos;
        if world.covered_by_any_sensor(owner, other_pos) {
            continue;
        }
        if let Some(other) = world.unit_mut(other_id) {
            if other.vis.conceal(owner) {
                out.push((owner, Message::EntityHidden { id: other_id }));
            }
        }
    }
    out
}

/// Reveals to `owner` every cell within `radius` of `center`.
fn reveal_cells(
    world: &mut World,
    owner: usize,
    center: (u32, u32),
    radius: u32,
    out: &mut Vec<Notice>,
) {
    for (x, y) in world.cells_in_radius(center, radius) {
        let terrain = world.terrain_at(x, y).code();
        match world.cell_vis_mut(x, y).reveal(owner) {
            Some(Reveal::First) => out.push((owner, Message::CellRevealed { x, y, terrain })),
            Some(Reveal::Again) => out.push((owner, Message::CellUnhidden { x, y })),
            None => {}
        }
    }
}

/// Reveals to `owner` every unit within `radius` of `center`.
fn reveal_units(
    world: &mut World,
    owner: usize,
    center: (u32, u32),
    radius: u32,
    out: &mut Vec<Notice>,
) {
    for other_id in world.unit_ids_in_radius(center, radius) {
        let Some(other) = world.unit_mut(other_id) else {
            continue;
        };
        let (x, y) = other.pos;
        let kind = other.kind.code();
        let other_owner = other.owner as u32;
        match other.vis.reveal(owner) {
            Some(Reveal::First) => out.push((
                owner,
                Message::EntityCreated {
                    id: other_id,
                    kind,
                    owner: other_owner,
                    x,
                    y,
                },
            )),
            Some(Reveal::Again) => {
                out.push((owner, Message::EntityUnhidden { id: other_id, x, y }))
            }
            None => {}
        }
    }
}

/// Reveals or conceals `unit_id` for every player other than its owner,
/// according to whether any of that player's sensors currently cover it.
fn cross_player_update(world: &mut World, unit_id: UnitId, out: &mut Vec<Notice>) {
    let Some(unit) = world.unit(unit_id) else {
        return;
    };
    let owner = unit.owner;
    let pos = unit.pos;
    let kind = unit.kind.code();

    for slot in 0..world.player_count() {
        if slot == owner {
            continue;
        }
        let covered = world.covered_by_any_sensor(slot, pos);
        let Some(unit) = world.unit_mut(unit_id) else {
            return;
        };
        if covered {
            match unit.vis.reveal(slot) {
                Some(Reveal::First) => out.push((
                    slot,
                    Message::EntityCreated {
                        id: unit_id,
                        kind,
                        owner: owner as u32,
                        x: pos.0,
                        y: pos.1,
                    },
                )),
                Some(Reveal::Again) => out.push((
                    slot,
                    Message::EntityUnhidden {
                        id: unit_id,
                        x: pos.0,
                        y: pos.1,
                    },
                )),
                None => {}
            }
        } else if unit.vis.conceal(slot) {
            out.push((slot, Message::EntityHidden { id: unit_id }));
        }
    }
}
