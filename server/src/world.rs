//! Authoritative world state
//!
//! A rectangular cell grid with terrain, plus every live unit. Movement is
//! one cell per tick toward a target, eight directions; water blocks both
//! placement and movement, and a blocked step halts the move rather than
//! pathing around. Units are stored in a `BTreeMap` so every per-tick
//! iteration runs in ascending id order; the simulation must apply the same
//! work in the same order every tick for every replay of the same inputs.

use crate::ledger::{Resource, ResourceLedger};
use crate::visibility::VisibilitySet;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::MAX_PLAYERS;
use std::collections::BTreeMap;
use thiserror::Error;

pub type UnitId = u32;
pub type CellPos = (u32, u32);

/// Cells around each start anchor that are forced to plains so starting
/// units always have room.
pub const SPAWN_CLEARING_RADIUS: u32 = 3;

const SPAWN_MARGIN: u32 = 2;

/// Upper bound on either map dimension. Keeps the cell count, and every
/// index computed from it, comfortably inside `u32`.
pub const MAX_MAP_EDGE: u32 = 1024;

/// Squared distance between two cells. All range checks compare against a
/// squared radius.
pub fn dist2(a: CellPos, b: CellPos) -> u64 {
    let dx = a.0 as i64 - b.0 as i64;
    let dy = a.1 as i64 - b.1 as i64;
    (dx * dx + dy * dy) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terrain {
    Plains,
    Forest,
    Water,
}

impl Terrain {
    pub fn code(self) -> u32 {
        match self {
            Terrain::Plains => 0,
            Terrain::Forest => 1,
            Terrain::Water => 2,
        }
    }

    pub fn passable(self) -> bool {
        !matches!(self, Terrain::Water)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnitKind {
    Headquarters,
    PowerPlant,
    Worker,
    Soldier,
}

/// Static per-kind numbers. Costs only matter for buildable kinds.
pub struct UnitStats {
    pub sensor_radius: u32,
    pub max_hp: u32,
    pub mineral_cost: u32,
    pub energy_cost: u32,
    pub damage: u32,
    pub attack_range: u32,
    pub mineral_income: u32,
    pub energy_income: u32,
    pub mobile: bool,
}

const HEADQUARTERS: UnitStats = UnitStats {
    sensor_radius: 4,
    max_hp: 500,
    mineral_cost: 0,
    energy_cost: 0,
    damage: 0,
    attack_range: 0,
    mineral_income: 2,
    energy_income: 0,
    mobile: false,
};

const POWER_PLANT: UnitStats = UnitStats {
    sensor_radius: 2,
    max_hp: 200,
    mineral_cost: 100,
    energy_cost: 0,
    damage: 0,
    attack_range: 0,
    mineral_income: 0,
    energy_income: 1,
    mobile: false,
};

const WORKER: UnitStats = UnitStats {
    sensor_radius: 2,
    max_hp: 60,
    mineral_cost: 50,
    energy_cost: 0,
    damage: 0,
    attack_range: 0,
    mineral_income: 0,
    energy_income: 0,
    mobile: true,
};

const SOLDIER: UnitStats = UnitStats {
    sensor_radius: 3,
    max_hp: 100,
    mineral_cost: 75,
    energy_cost: 10,
    damage: 10,
    attack_range: 2,
    mineral_income: 0,
    energy_income: 0,
    mobile: true,
};

impl UnitKind {
    pub fn code(self) -> u32 {
        match self {
            UnitKind::Headquarters => 1,
            UnitKind::PowerPlant => 2,
            UnitKind::Worker => 3,
            UnitKind::Soldier => 4,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(UnitKind::Headquarters),
            2 => Some(UnitKind::PowerPlant),
            3 => Some(UnitKind::Worker),
            4 => Some(UnitKind::Soldier),
            _ => None,
        }
    }

    pub fn stats(self) -> &'static UnitStats {
        match self {
            UnitKind::Headquarters => &HEADQUARTERS,
            UnitKind::PowerPlant => &POWER_PLANT,
            UnitKind::Worker => &WORKER,
            UnitKind::Soldier => &SOLDIER,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Unit {
    pub id: UnitId,
    pub kind: UnitKind,
    pub owner: usize,
    pub pos: CellPos,
    pub hp: u32,
    pub vis: VisibilitySet,
    pub move_target: Option<CellPos>,
    pub attack_target: Option<UnitId>,
}

/// Why a player order was dropped. Dropped orders are logged and skipped;
/// they are never an error for the connection that sent them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    #[error("unit {0} does not exist")]
    NoSuchUnit(UnitId),
    #[error("unit {unit} belongs to player {owner}")]
    NotYours { unit: UnitId, owner: usize },
    #[error("unit {0} is a structure and cannot move")]
    Immobile(UnitId),
    #[error("unit {0} has no weapon")]
    Unarmed(UnitId),
    #[error("target {0} does not exist")]
    NoSuchTarget(UnitId),
    #[error("a unit cannot attack itself")]
    SelfTarget,
    #[error("cell ({0}, {1}) is out of bounds")]
    OutOfBounds(u32, u32),
    #[error("cell ({0}, {1}) is not buildable")]
    BadTerrain(u32, u32),
    #[error("cell ({0}, {1}) is occupied")]
    Occupied(u32, u32),
    #[error("unit kind code {0} is not buildable")]
    NotBuildable(u32),
    #[error("player {slot} cannot afford a {kind:?}")]
    CantAfford { slot: usize, kind: UnitKind },
}

pub struct World {
    width: u32,
    height: u32,
    players: usize,
    terrain: Vec<Terrain>,
    cell_vis: Vec<VisibilitySet>,
    units: BTreeMap<UnitId, Unit>,
    next_unit_id: UnitId,
}

impl World {
    /// Builds a map from a seed: mostly plains, some forest, a sprinkle of
    /// water, with the ground around every start anchor forced passable.
    pub fn generate(width: u32, height: u32, players: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut terrain = Vec::with_capacity((width * height) as usize);
        for _ in 0..width * height {
            let roll: f64 = rng.gen();
            terrain.push(if roll < 0.08 {
                Terrain::Water
            } else if roll < 0.25 {
                Terrain::Forest
            } else {
                Terrain::Plains
            });
        }

        let mut world = Self::with_terrain(width, height, players, terrain);
        for slot in 0..players {
            let anchor = world.spawn_anchor(slot);
            for (x, y) in world.cells_in_radius(anchor, SPAWN_CLEARING_RADIUS) {
                let index = world.index(x, y);
                world.terrain[index] = Terrain::Plains;
            }
        }
        world
    }

    pub fn with_terrain(width: u32, height: u32, players: usize, terrain: Vec<Terrain>) -> Self {
        assert_eq!(terrain.len(), (width * height) as usize);
        assert!(players >= 1 && players <= MAX_PLAYERS);
        Self {
            width,
            height,
            players,
            cell_vis: vec![VisibilitySet::new(); terrain.len()],
            terrain,
            units: BTreeMap::new(),
            next_unit_id: 1,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn player_count(&self) -> usize {
        self.players
    }

    pub fn in_bounds(&self, pos: CellPos) -> bool {
        pos.0 < self.width && pos.1 < self.height
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y * self.width + x) as usize
    }

    pub fn terrain_at(&self, x: u32, y: u32) -> Terrain {
        self.terrain[self.index(x, y)]
    }

    pub fn cell_vis(&self, x: u32, y: u32) -> &VisibilitySet {
        &self.cell_vis[self.index(x, y)]
    }

    pub fn cell_vis_mut(&mut self, x: u32, y: u32) -> &mut VisibilitySet {
        let index = self.index(x, y);
        &mut self.cell_vis[index]
    }

    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(&id)
    }

    pub fn unit_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
        self.units.get_mut(&id)
    }

    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn unit_at(&self, pos: CellPos) -> Option<UnitId> {
        self.units.values().find(|u| u.pos == pos).map(|u| u.id)
    }

    pub fn remove_unit(&mut self, id: UnitId) -> Option<Unit> {
        self.units.remove(&id)
    }

    /// Places a unit if the cell is in bounds, passable, and free.
    pub fn spawn(&mut self, kind: UnitKind, owner: usize, pos: CellPos) -> Option<UnitId> {
        if !self.in_bounds(pos) || !self.terrain_at(pos.0, pos.1).passable() {
            return None;
        }
        if self.unit_at(pos).is_some() {
            return None;
        }
        Some(self.insert_unit(kind, owner, pos))
    }

    fn insert_unit(&mut self, kind: UnitKind, owner: usize, pos: CellPos) -> UnitId {
        let id = self.next_unit_id;
        self.next_unit_id += 1;
        self.units.insert(
            id,
            Unit {
                id,
                kind,
                owner,
                pos,
                hp: kind.stats().max_hp,
                vis: VisibilitySet::new(),
                move_target: None,
                attack_target: None,
            },
        );
        id
    }

    /// Start corner (or edge midpoint, for slots past the corners) for a
    /// player slot.
    pub fn spawn_anchor(&self, slot: usize) -> CellPos {
        let m = SPAWN_MARGIN;
        let (right, bottom) = (self.width - 1 - m, self.height - 1 - m);
        let (cx, cy) = (self.width / 2, self.height / 2);
        match slot {
            0 => (m, m),
            1 => (right, bottom),
            2 => (right, m),
            3 => (m, bottom),
            4 => (cx, m),
            5 => (cx, bottom),
            6 => (m, cy),
            7 => (right, cy),
            _ => (cx, cy),
        }
    }

    /// One headquarters plus two workers beside it.
    pub fn place_starting_units(&mut self, slot: usize) -> Vec<UnitId> {
        let (ax, ay) = self.spawn_anchor(slot);
        let mut placed = Vec::new();
        if let Some(id) = self.spawn(UnitKind::Headquarters, slot, (ax, ay)) {
            placed.push(id);
        }
        let offsets: [(i64, i64); 6] = [(1, 0), (0, 1), (-1, 0), (0, -1), (1, 1), (-1, -1)];
        for (dx, dy) in offsets {
            if placed.len() == 3 {
                break;
            }
            let x = ax as i64 + dx;
            let y = ay as i64 + dy;
            if x < 0 || y < 0 {
                continue;
            }
            if let Some(id) = self.spawn(UnitKind::Worker, slot, (x as u32, y as u32)) {
                placed.push(id);
            }
        }
        placed
    }

    pub fn order_move(
        &mut self,
        slot: usize,
        unit_id: UnitId,
        target: CellPos,
    ) -> Result<(), OrderError> {
        if !self.in_bounds(target) {
            return Err(OrderError::OutOfBounds(target.0, target.1));
        }
        let unit = self
            .units
            .get_mut(&unit_id)
            .ok_or(OrderError::NoSuchUnit(unit_id))?;
        if unit.owner != slot {
            return Err(OrderError::NotYours {
                unit: unit_id,
                owner: unit.owner,
            });
        }
        if !unit.kind.stats().mobile {
            return Err(OrderError::Immobile(unit_id));
        }
        unit.move_target = Some(target);
        Ok(())
    }

    pub fn order_attack(
        &mut self,
        slot: usize,
        unit_id: UnitId,
        target_id: UnitId,
    ) -> Result<(), OrderError> {
        if unit_id == target_id {
            return Err(OrderError::SelfTarget);
        }
        if !self.units.contains_key(&target_id) {
            return Err(OrderError::NoSuchTarget(target_id));
        }
        let unit = self
            .units
            .get_mut(&unit_id)
            .ok_or(OrderError::NoSuchUnit(unit_id))?;
        if unit.owner != slot {
            return Err(OrderError::NotYours {
                unit: unit_id,
                owner: unit.owner,
            });
        }
        if unit.kind.stats().damage == 0 {
            return Err(OrderError::Unarmed(unit_id));
        }
        unit.attack_target = Some(target_id);
        Ok(())
    }

    /// Validates a build order, charges the player, and places the unit.
    /// The debit happens last so a rejected order never touches the ledger.
    pub fn try_build(
        &mut self,
        slot: usize,
        kind_code: u32,
        pos: CellPos,
        ledger: &mut ResourceLedger,
    ) -> Result<UnitId, OrderError> {
        let kind = UnitKind::from_code(kind_code).ok_or(OrderError::NotBuildable(kind_code))?;
        if kind == UnitKind::Headquarters {
            return Err(OrderError::NotBuildable(kind_code));
        }
        if !self.in_bounds(pos) {
            return Err(OrderError::OutOfBounds(pos.0, pos.1));
        }
        if !self.terrain_at(pos.0, pos.1).passable() {
            return Err(OrderError::BadTerrain(pos.0, pos.1));
        }
        if self.unit_at(pos).is_some() {
            return Err(OrderError::Occupied(pos.0, pos.1));
        }
        let stats = kind.stats();
        if !ledger.debit_cost(slot, stats.mineral_cost, stats.energy_cost) {
            return Err(OrderError::CantAfford { slot, kind });
        }
        Ok(self.insert_unit(kind, slot, pos))
    }

    /// Advances every moving unit one step toward its target. Returns the
    /// movers as `(id, previous position)` so visibility sweeps can run
    /// after all positions are final. Units do not block each other.
    pub fn step_movement(&mut self) -> Vec<(UnitId, CellPos)> {
        let ids: Vec<UnitId> = self.units.keys().copied().collect();
        let mut moved = Vec::new();
        for id in ids {
            let (from, target) = match self.units.get(&id) {
                Some(unit) => match unit.move_target {
                    Some(target) if unit.kind.stats().mobile => (unit.pos, target),
                    _ => continue,
                },
                None => continue,
            };
            if from == target {
                if let Some(unit) = self.units.get_mut(&id) {
                    unit.move_target = None;
                }
                continue;
            }
            let next = step_toward(from, target);
            let blocked = !self.in_bounds(next) || !self.terrain_at(next.0, next.1).passable();
            if let Some(unit) = self.units.get_mut(&id) {
                if blocked {
                    debug!("unit {} halted at ({}, {})", id, from.0, from.1);
                    unit.move_target = None;
                } else {
                    unit.pos = next;
                    if next == target {
                        unit.move_target = None;
                    }
                    moved.push((id, from));
                }
            }
        }
        moved
    }

    /// Applies every standing attack order. Returns the units destroyed
    /// this tick, already removed from the world. Ascending id order keeps
    /// mutual kills deterministic.
    pub fn step_combat(&mut self) -> Vec<Unit> {
        let ids: Vec<UnitId> = self.units.keys().copied().collect();
        let mut killed = Vec::new();
        for id in ids {
            let (target_id, damage, range, pos) = match self.units.get(&id) {
                Some(unit) => match unit.attack_target {
                    Some(target) => (
                        target,
                        unit.kind.stats().damage,
                        unit.kind.stats().attack_range,
                        unit.pos,
                    ),
                    None => continue,
                },
                None => continue, // destroyed earlier this phase
            };

            let in_range = match self.units.get(&target_id) {
                Some(target) => dist2(pos, target.pos) <= (range as u64) * (range as u64),
                None => {
                    if let Some(unit) = self.units.get_mut(&id) {
                        unit.attack_target = None;
                    }
                    continue;
                }
            };
            if !in_range {
                continue; // keep the target, try again next tick
            }

            let mut dead = None;
            if let Some(target) = self.units.get_mut(&target_id) {
                target.hp = target.hp.saturating_sub(damage);
                if target.hp == 0 {
                    dead = Some(target_id);
                }
            }
            if let Some(dead_id) = dead {
                if let Some(unit) = self.units.remove(&dead_id) {
                    debug!("unit {} destroyed by unit {}", dead_id, id);
                    killed.push(unit);
                }
            }
        }
        killed
    }

    /// Credits this tick's production to every owner.
    pub fn income_into(&self, ledger: &mut ResourceLedger) {
        for unit in self.units.values() {
            let stats = unit.kind.stats();
            ledger.credit(unit.owner, Resource::Minerals, stats.mineral_income);
            ledger.credit(unit.owner, Resource::Energy, stats.energy_income);
        }
    }

    /// All cells within `radius` of `center`, clipped to the map.
    pub fn cells_in_radius(&self, center: CellPos, radius: u32) -> Vec<CellPos> {
        let r = radius as i64;
        let r2 = (radius as u64) * (radius as u64);
        let mut cells = Vec::new();
        for dy in -r..=r {
            for dx in -r..=r {
                let x = center.0 as i64 + dx;
                let y = center.1 as i64 + dy;
                if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
                    continue;
                }
                let cell = (x as u32, y as u32);
                if dist2(cell, center) <= r2 {
                    cells.push(cell);
                }
            }
        }
        cells
    }

    pub fn unit_ids_in_radius(&self, center: CellPos, radius: u32) -> Vec<UnitId> {
        let r2 = (radius as u64) * (radius as u64);
        self.units
            .values()
            .filter(|unit| dist2(unit.pos, center) <= r2)
            .map(|unit| unit.id)
            .collect()
    }

    /// True when any of `slot`'s units has `pos` inside its sensor radius.
    pub fn covered_by_any_sensor(&self, slot: usize, pos: CellPos) -> bool {
        self.units.values().any(|unit| {
            if unit.owner != slot {
                return false;
            }
            let r = unit.kind.stats().sensor_radius as u64;
            dist2(unit.pos, pos) <= r * r
        })
    }
}

fn step_toward(from: CellPos, target: CellPos) -> CellPos {
    let dx = (target.0 as i64 - from.0 as i64).signum();
    let dy = (target.1 as i64 - from.1 as i64).signum();
    ((from.0 as i64 + dx) as u32, (from.1 as i64 + dy) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(width: u32, height: u32, players: usize) -> World {
        World::with_terrain(
            width,
            height,
            players,
            vec![Terrain::Plains; (width * height) as usize],
        )
    }

    #[test]
    fn test_kind_codes_roundtrip() {
        for kind in [
            UnitKind::Headquarters,
            UnitKind::PowerPlant,
            UnitKind::Worker,
            UnitKind::Soldier,
        ] {
            assert_eq!(UnitKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(UnitKind::from_code(0), None);
        assert_eq!(UnitKind::from_code(99), None);
    }

    #[test]
    fn test_spawn_validates_cell() {
        let mut world = flat(8, 8, 1);
        let mut wet = vec![Terrain::Plains; 64];
        wet[8 * 3 + 3] = Terrain::Water;
        let mut water_world = World::with_terrain(8, 8, 1, wet);

        assert!(world.spawn(UnitKind::Worker, 0, (9, 0)).is_none(), "oob");
        assert!(water_world.spawn(UnitKind::Worker, 0, (3, 3)).is_none());

        let id = world.spawn(UnitKind::Worker, 0, (2, 2)).unwrap();
        assert!(world.spawn(UnitKind::Worker, 0, (2, 2)).is_none(), "occupied");
        assert_eq!(world.unit(id).unwrap().hp, WORKER.max_hp);
    }

    #[test]
    fn test_move_order_validation() {
        let mut world = flat(8, 8, 2);
        let worker = world.spawn(UnitKind::Worker, 0, (1, 1)).unwrap();
        let hq = world.spawn(UnitKind::Headquarters, 0, (5, 5)).unwrap();

        assert_eq!(
            world.order_move(0, 99, (2, 2)),
            Err(OrderError::NoSuchUnit(99))
        );
        assert_eq!(
            world.order_move(1, worker, (2, 2)),
            Err(OrderError::NotYours {
                unit: worker,
                owner: 0
            })
        );
        assert_eq!(world.order_move(0, hq, (2, 2)), Err(OrderError::Immobile(hq)));
        assert_eq!(
            world.order_move(0, worker, (8, 0)),
            Err(OrderError::OutOfBounds(8, 0))
        );
        assert_eq!(world.order_move(0, worker, (3, 3)), Ok(()));
    }

    #[test]
    fn test_movement_steps_diagonally_then_straight() {
        let mut world = flat(16, 16, 1);
        let worker = world.spawn(UnitKind::Worker, 0, (2, 2)).unwrap();
        world.order_move(0, worker, (5, 4)).unwrap();

        let mut positions = Vec::new();
        for _ in 0..5 {
            world.step_movement();
            positions.push(world.unit(worker).unwrap().pos);
        }

        assert_eq!(positions[0], (3, 3));
        assert_eq!(positions[1], (4, 4));
        assert_eq!(positions[2], (5, 4));
        assert_eq!(positions[3], (5, 4), "arrived units stay put");
        assert_eq!(world.unit(worker).unwrap().move_target, None);
    }

    #[test]
    fn test_water_halts_movement() {
        let mut terrain = vec![Terrain::Plains; 64];
        for y in 0..8 {
            terrain[(y * 8 + 4) as usize] = Terrain::Water; // wall at x=4
        }
        let mut world = World::with_terrain(8, 8, 1, terrain);
        let worker = world.spawn(UnitKind::Worker, 0, (2, 3)).unwrap();
        world.order_move(0, worker, (6, 3)).unwrap();

        world.step_movement(); // (3, 3)
        let moved = world.step_movement(); // blocked by the wall
        assert!(moved.is_empty());
        assert_eq!(world.unit(worker).unwrap().pos, (3, 3));
        assert_eq!(
            world.unit(worker).unwrap().move_target, None,
            "a blocked move is dropped, not retried"
        );
    }

    #[test]
    fn test_attack_order_validation() {
        let mut world = flat(8, 8, 2);
        let soldier = world.spawn(UnitKind::Soldier, 0, (1, 1)).unwrap();
        let worker = world.spawn(UnitKind::Worker, 0, (2, 1)).unwrap();
        let enemy = world.spawn(UnitKind::Worker, 1, (3, 1)).unwrap();

        assert_eq!(
            world.order_attack(0, soldier, soldier),
            Err(OrderError::SelfTarget)
        );
        assert_eq!(
            world.order_attack(0, soldier, 99),
            Err(OrderError::NoSuchTarget(99))
        );
        assert_eq!(
            world.order_attack(0, worker, enemy),
            Err(OrderError::Unarmed(worker))
        );
        assert_eq!(world.order_attack(0, soldier, enemy), Ok(()));
    }

    #[test]
    fn test_combat_kills_in_range_target() {
        let mut world = flat(8, 8, 2);
        let soldier = world.spawn(UnitKind::Soldier, 0, (1, 1)).unwrap();
        let victim = world.spawn(UnitKind::Worker, 1, (2, 1)).unwrap();
        world.order_attack(0, soldier, victim).unwrap();

        // Worker hp 60, soldier damage 10.
        for _ in 0..5 {
            assert!(world.step_combat().is_empty());
        }
        let killed = world.step_combat();
        assert_eq!(killed.len(), 1);
        assert_eq!(killed[0].id, victim);
        assert!(world.unit(victim).is_none());
    }

    #[test]
    fn test_combat_waits_for_range() {
        let mut world = flat(16, 16, 2);
        let soldier = world.spawn(UnitKind::Soldier, 0, (1, 1)).unwrap();
        let victim = world.spawn(UnitKind::Worker, 1, (9, 1)).unwrap();
        world.order_attack(0, soldier, victim).unwrap();

        assert!(world.step_combat().is_empty());
        assert_eq!(world.unit(victim).unwrap().hp, WORKER.max_hp);
        assert_eq!(
            world.unit(soldier).unwrap().attack_target,
            Some(victim),
            "out-of-range targets are kept for later ticks"
        );
    }

    #[test]
    fn test_combat_clears_vanished_target() {
        let mut world = flat(8, 8, 2);
        let soldier = world.spawn(UnitKind::Soldier, 0, (1, 1)).unwrap();
        let victim = world.spawn(UnitKind::Worker, 1, (2, 1)).unwrap();
        world.order_attack(0, soldier, victim).unwrap();
        world.remove_unit(victim);

        world.step_combat();
        assert_eq!(world.unit(soldier).unwrap().attack_target, None);
    }

    #[test]
    fn test_income_credits_producers() {
        let mut world = flat(16, 16, 2);
        world.spawn(UnitKind::Headquarters, 0, (2, 2)).unwrap();
        world.spawn(UnitKind::PowerPlant, 0, (4, 2)).unwrap();
        world.spawn(UnitKind::Worker, 1, (10, 10)).unwrap();

        let mut ledger = ResourceLedger::new(2);
        ledger.take_dirty();
        world.income_into(&mut ledger);

        assert_eq!(
            ledger.balance(0, Resource::Minerals),
            crate::ledger::START_MINERALS + 2
        );
        assert_eq!(
            ledger.balance(0, Resource::Energy),
            crate::ledger::START_ENERGY + 1
        );
        assert_eq!(
            ledger.balance(1, Resource::Minerals),
            crate::ledger::START_MINERALS,
            "workers produce nothing"
        );
    }

    #[test]
    fn test_build_charges_and_places() {
        let mut world = flat(16, 16, 1);
        let mut ledger = ResourceLedger::new(1);
        ledger.take_dirty();

        let id = world
            .try_build(0, UnitKind::PowerPlant.code(), (5, 5), &mut ledger)
            .unwrap();
        assert_eq!(world.unit(id).unwrap().kind, UnitKind::PowerPlant);
        assert_eq!(
            ledger.balance(0, Resource::Minerals),
            crate::ledger::START_MINERALS - POWER_PLANT.mineral_cost
        );
    }

    #[test]
    fn test_build_rejections_leave_ledger_alone() {
        let mut wet = vec![Terrain::Plains; 64];
        wet[8 * 2 + 2] = Terrain::Water;
        let mut world = World::with_terrain(8, 8, 1, wet);
        let mut ledger = ResourceLedger::new(1);
        ledger.take_dirty();

        let occupied = world.spawn(UnitKind::Worker, 0, (4, 4)).unwrap();
        let _ = occupied;

        assert_eq!(
            world.try_build(0, UnitKind::Headquarters.code(), (5, 5), &mut ledger),
            Err(OrderError::NotBuildable(1))
        );
        assert_eq!(
            world.try_build(0, 77, (5, 5), &mut ledger),
            Err(OrderError::NotBuildable(77))
        );
        assert_eq!(
            world.try_build(0, UnitKind::Worker.code(), (2, 2), &mut ledger),
            Err(OrderError::BadTerrain(2, 2))
        );
        assert_eq!(
            world.try_build(0, UnitKind::Worker.code(), (4, 4), &mut ledger),
            Err(OrderError::Occupied(4, 4))
        );
        assert_eq!(ledger.balance(0, Resource::Minerals), crate::ledger::START_MINERALS);

        // Drain the account, then fail on price.
        assert!(ledger.debit(0, Resource::Minerals, crate::ledger::START_MINERALS));
        assert_eq!(
            world.try_build(0, UnitKind::Worker.code(), (6, 6), &mut ledger),
            Err(OrderError::CantAfford {
                slot: 0,
                kind: UnitKind::Worker
            })
        );
        assert_eq!(world.unit_at((6, 6)), None);
    }

    #[test]
    fn test_generate_is_deterministic_and_clears_spawns() {
        let a = World::generate(32, 32, 4, 7);
        let b = World::generate(32, 32, 4, 7);

        for y in 0..32 {
            for x in 0..32 {
                assert_eq!(a.terrain_at(x, y), b.terrain_at(x, y));
            }
        }

        for slot in 0..4 {
            let anchor = a.spawn_anchor(slot);
            for (x, y) in a.cells_in_radius(anchor, SPAWN_CLEARING_RADIUS) {
                assert_eq!(a.terrain_at(x, y), Terrain::Plains);
            }
        }
    }

    #[test]
    fn test_starting_units_fit_on_generated_maps() {
        for seed in [1, 2, 3, 99, 1234] {
            let mut world = World::generate(32, 32, 8, seed);
            for slot in 0..8 {
                let placed = world.place_starting_units(slot);
                assert_eq!(placed.len(), 3, "seed {} slot {}", seed, slot);
                assert_eq!(
                    world.unit(placed[0]).unwrap().kind,
                    UnitKind::Headquarters
                );
            }
        }
    }

    #[test]
    fn test_cells_in_radius_counts() {
        let world = flat(32, 32, 1);
        // dx^2 + dy^2 <= 9 admits 29 cells around an interior point.
        assert_eq!(world.cells_in_radius((16, 16), 3).len(), 29);
        // Clipped at the corner.
        assert!(world.cells_in_radius((0, 0), 3).len() < 29);
    }

    #[test]
    fn test_sensor_coverage() {
        let mut world = flat(32, 32, 2);
        world.spawn(UnitKind::Soldier, 0, (10, 10)).unwrap();

        assert!(world.covered_by_any_sensor(0, (12, 10)));
        assert!(!world.covered_by_any_sensor(0, (14, 10)));
        assert!(!world.covered_by_any_sensor(1, (12, 10)), "not player 1's sensor");
    }
}
