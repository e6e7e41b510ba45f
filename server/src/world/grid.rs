// world_map_core/server/src/world/grid.rs
use super::cell::{GridCell, VisitMask};
use super::coords::{CellCoord, GridCoord};
use super::object::MapObject;
use crate::core::constants::{ACTIVE_GRID_RECHECK_FACTOR, MAX_NUMBER_OF_CELLS};
use crate::core::error::{WorldError, WorldResult};
use crate::core::timer::{CountdownTimer, PeriodicTimer};
use crate::core::types::{ContainerKind, ObjectGuid, ObjectKind};
use ahash::AHashSet;
use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GridState {
    Invalid,
    Active,
    Idle,
    Removal,
}

impl GridState {
    /// The only forward edges of the lifecycle.
    fn may_become(self, next: GridState) -> bool {
        matches!(
            (self, next),
            (GridState::Invalid, GridState::Active)
                | (GridState::Active, GridState::Idle)
                | (GridState::Idle, GridState::Removal)
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GridUpdateOutcome {
    Unchanged,
    BecameIdle,
    BecameRemoval,
    /// Removal timer expired with no unload lock held; the map decides.
    RequestUnload,
}

/// What a grid needs to know about its surroundings to go idle.
pub trait GridHost {
    fn active_objects_near(&self, grid: GridCoord) -> bool;
}

/// Holds a grid resident until dropped.
#[derive(Debug)]
pub struct UnloadLockGuard {
    counter: Arc<AtomicU32>,
}

impl Drop for UnloadLockGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug)]
pub struct Grid {
    coord: GridCoord,
    state: GridState,
    timer: CountdownTimer,
    expiry: Duration,
    unload_active_locks: Arc<AtomicU32>,
    unload_explicit_lock: bool,
    relocation_timer: PeriodicTimer,
    pending_relocations: Vec<(ObjectGuid, ObjectKind)>,
    simulation_active: bool,
    cells: Vec<GridCell>,
    world_counts: [u32; ObjectKind::COUNT],
}

impl Grid {
    pub fn new(coord: GridCoord, expiry: Duration, unload_explicit_lock: bool, relocation_period: Duration) -> Self {
        let period_ms = relocation_period.as_millis() as u64;
        // random phase so grids loaded together do not relocate on the same tick
        let phase = Duration::from_millis(rand::thread_rng().gen_range(0..=period_ms));
        let cell_count = (MAX_NUMBER_OF_CELLS * MAX_NUMBER_OF_CELLS) as usize;
        Grid {
            coord,
            state: GridState::Invalid,
            timer: CountdownTimer::new(expiry),
            expiry,
            unload_active_locks: Arc::new(AtomicU32::new(0)),
            unload_explicit_lock,
            relocation_timer: PeriodicTimer::new(relocation_period, phase),
            pending_relocations: Vec::new(),
            simulation_active: false,
            cells: (0..cell_count).map(|_| GridCell::new()).collect(),
            world_counts: [0; ObjectKind::COUNT],
        }
    }

    pub fn coord(&self) -> GridCoord {
        self.coord
    }

    pub fn state(&self) -> GridState {
        self.state
    }

    pub fn is_simulation_active(&self) -> bool {
        self.simulation_active
    }

    fn transition(&mut self, next: GridState) {
        if !self.state.may_become(next) {
            warn!("Grid [{}, {}] refused transition {:?} -> {:?}", self.coord.x, self.coord.y, self.state, next);
            return;
        }
        trace!("Grid [{}, {}] {:?} -> {:?}", self.coord.x, self.coord.y, self.state, next);
        self.state = next;
    }

    /// First touch by the owning map.
    pub fn activate(&mut self) {
        if self.state != GridState::Invalid {
            return;
        }
        self.transition(GridState::Active);
        self.simulation_active = true;
        self.reset_expiry_scaled(ACTIVE_GRID_RECHECK_FACTOR);
    }

    /// Replaces an Idle or Removal grid with a fresh Active grid that owns the
    /// same cells. The old state machine is consumed, never rewound.
    pub fn rebuild_active(self) -> Grid {
        let mut rebuilt = Grid {
            coord: self.coord,
            state: GridState::Invalid,
            timer: CountdownTimer::new(self.expiry),
            expiry: self.expiry,
            unload_active_locks: self.unload_active_locks,
            unload_explicit_lock: self.unload_explicit_lock,
            relocation_timer: self.relocation_timer,
            pending_relocations: self.pending_relocations,
            simulation_active: false,
            cells: self.cells,
            world_counts: self.world_counts,
        };
        rebuilt.activate();
        rebuilt
    }

    pub fn reset_expiry(&mut self) {
        self.timer.reset(self.expiry);
    }

    pub fn reset_expiry_scaled(&mut self, factor: f32) {
        self.timer.reset(self.expiry.mul_f32(factor));
    }

    // --- unload lock ---

    pub fn acquire_unload_lock(&self) -> UnloadLockGuard {
        self.unload_active_locks.fetch_add(1, Ordering::AcqRel);
        UnloadLockGuard { counter: Arc::clone(&self.unload_active_locks) }
    }

    pub fn unload_lock_count(&self) -> u32 {
        self.unload_active_locks.load(Ordering::Acquire)
    }

    pub fn set_unload_explicit_lock(&mut self, locked: bool) {
        self.unload_explicit_lock = locked;
    }

    pub fn is_unload_locked(&self) -> bool {
        self.unload_explicit_lock || self.unload_lock_count() > 0
    }

    // --- lifecycle ---

    pub fn update<H: GridHost + ?Sized>(&mut self, host: &H, diff: Duration) -> GridUpdateOutcome {
        match self.state {
            GridState::Invalid => GridUpdateOutcome::Unchanged,
            GridState::Active => {
                self.timer.update(diff);
                if !self.timer.passed() {
                    return GridUpdateOutcome::Unchanged;
                }
                if self.world_object_count(ObjectKind::Player) == 0 && !host.active_objects_near(self.coord) {
                    let stopped = self.stop_simulation();
                    self.transition(GridState::Idle);
                    self.reset_expiry();
                    debug!("Grid [{}, {}] is idle ({} objects stopped)", self.coord.x, self.coord.y, stopped);
                    GridUpdateOutcome::BecameIdle
                } else {
                    self.reset_expiry_scaled(ACTIVE_GRID_RECHECK_FACTOR);
                    GridUpdateOutcome::Unchanged
                }
            }
            GridState::Idle => {
                self.timer.update(diff);
                if !self.timer.passed() {
                    return GridUpdateOutcome::Unchanged;
                }
                self.transition(GridState::Removal);
                self.reset_expiry();
                GridUpdateOutcome::BecameRemoval
            }
            GridState::Removal => {
                if self.is_unload_locked() {
                    return GridUpdateOutcome::Unchanged;
                }
                self.timer.update(diff);
                if self.timer.passed() {
                    GridUpdateOutcome::RequestUnload
                } else {
                    GridUpdateOutcome::Unchanged
                }
            }
        }
    }

    /// Runs when the grid goes idle. Walks every cell once and keeps one queued
    /// relocation per object still stored here; the rest are dropped. The
    /// survivors wait for `take_relocations`, since the relocation timer no
    /// longer fires once simulation stops. Returns the objects visited.
    fn stop_simulation(&mut self) -> usize {
        let present: AHashSet<ObjectGuid> =
            self.cells.iter().flat_map(|cell| cell.objects()).map(|object| object.guid).collect();
        let queued = self.pending_relocations.len();
        let mut kept = AHashSet::with_capacity(queued);
        self.pending_relocations
            .retain(|(guid, _)| present.contains(guid) && kept.insert(*guid));
        if queued != self.pending_relocations.len() {
            trace!(
                "Grid [{}, {}] dropped {} stale relocations",
                self.coord.x,
                self.coord.y,
                queued - self.pending_relocations.len()
            );
        }
        self.simulation_active = false;
        present.len()
    }

    // --- relocation ---

    pub fn queue_relocation(&mut self, guid: ObjectGuid, kind: ObjectKind) {
        self.pending_relocations.push((guid, kind));
    }

    /// Hands back every queued relocation regardless of the timer.
    pub fn take_relocations(&mut self) -> Vec<(ObjectGuid, ObjectKind)> {
        std::mem::take(&mut self.pending_relocations)
    }

    /// Advances the relocation cadence and hands back the batch when it fires.
    pub fn poll_relocations(&mut self, diff: Duration) -> Vec<(ObjectGuid, ObjectKind)> {
        if self.relocation_timer.update(diff) && self.simulation_active {
            std::mem::take(&mut self.pending_relocations)
        } else {
            Vec::new()
        }
    }

    // --- objects ---

    fn cell_for(&self, cell: &CellCoord) -> WorldResult<usize> {
        if cell.grid() != self.coord {
            return Err(WorldError::Internal(format!(
                "cell ({}, {}) does not belong to grid [{}, {}]",
                cell.x, cell.y, self.coord.x, self.coord.y
            )));
        }
        Ok(cell.local_index())
    }

    pub fn insert(&mut self, cell: &CellCoord, object: MapObject) -> WorldResult<()> {
        let idx = self.cell_for(cell)?;
        let kind = object.kind;
        let container = object.container;
        self.cells[idx].insert(object)?;
        if container == ContainerKind::World {
            self.world_counts[kind.index()] += 1;
        }
        Ok(())
    }

    pub fn remove(&mut self, cell: &CellCoord, container: ContainerKind, kind: ObjectKind, guid: ObjectGuid) -> Option<MapObject> {
        let idx = self.cell_for(cell).ok()?;
        let removed = self.cells[idx].remove(container, kind, guid)?;
        if container == ContainerKind::World {
            self.world_counts[kind.index()] = self.world_counts[kind.index()].saturating_sub(1);
        }
        Some(removed)
    }

    pub fn get(&self, cell: &CellCoord, container: ContainerKind, kind: ObjectKind, guid: ObjectGuid) -> Option<&MapObject> {
        let idx = self.cell_for(cell).ok()?;
        self.cells[idx].get(container, kind, guid)
    }

    pub fn get_mut(&mut self, cell: &CellCoord, container: ContainerKind, kind: ObjectKind, guid: ObjectGuid) -> Option<&mut MapObject> {
        let idx = self.cell_for(cell).ok()?;
        self.cells[idx].get_mut(container, kind, guid)
    }

    pub fn world_object_count(&self, kind: ObjectKind) -> u32 {
        self.world_counts[kind.index()]
    }

    pub fn object_count(&self) -> usize {
        self.cells.iter().map(|cell| cell.object_count()).sum()
    }

    pub fn visit_cell<F>(&self, cell: &CellCoord, mask: VisitMask, visitor: &mut F) -> WorldResult<()>
    where
        F: FnMut(&MapObject),
    {
        let idx = self.cell_for(cell)?;
        self.cells[idx].visit(mask, visitor)
    }

    pub fn visit_all<F>(&self, mask: VisitMask, visitor: &mut F) -> WorldResult<()>
    where
        F: FnMut(&MapObject),
    {
        mask.container()?;
        for cell in &self.cells {
            cell.visit(mask, visitor)?;
        }
        Ok(())
    }

    /// Empties every cell; used when the grid is unloaded.
    pub fn drain(&mut self) -> Vec<MapObject> {
        self.world_counts = [0; ObjectKind::COUNT];
        self.pending_relocations.clear();
        self.cells.iter_mut().flat_map(|cell| cell.drain()).collect()
    }
}
