// world_map_core/server/src/world/map.rs
use super::cell::VisitMask;
use super::coords::{CellArea, CellCoord, GridCoord};
use super::grid::{Grid, GridHost, GridState, GridUpdateOutcome, UnloadLockGuard};
use super::object::MapObject;
use super::template::MapTemplate;
use crate::core::config::WorldConfig;
use crate::core::constants::{CONTINENT_INSTANCE_ID, DEFAULT_RELOCATION_PERIOD, MAX_NUMBER_OF_GRIDS};
use crate::core::error::{WorldError, WorldResult};
use crate::core::timer::CountdownTimer;
use crate::core::types::{ContainerKind, InstanceId, LockOwner, MapId, MapKey, ObjectGuid, ObjectKind, Position};
use crate::navigation::NavMeshStore;
use ahash::{AHashMap, AHashSet};
use crossbeam_queue::SegQueue;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace};

/// Per-map slice of the world configuration.
#[derive(Debug, Clone)]
pub struct MapSettings {
    pub grid_expiry: Duration,
    pub grid_unload: bool,
    pub instance_unload_delay: Duration,
    pub relocation_period: Duration,
    pub data_path: PathBuf,
}

impl MapSettings {
    pub fn from_config(config: &WorldConfig) -> Self {
        MapSettings {
            grid_expiry: config.grid_expiry(),
            grid_unload: config.grid_unload,
            instance_unload_delay: config.instance_unload_delay(),
            relocation_period: DEFAULT_RELOCATION_PERIOD,
            data_path: config.data_path.clone(),
        }
    }
}

impl Default for MapSettings {
    fn default() -> Self {
        MapSettings::from_config(&WorldConfig::default())
    }
}

#[derive(Clone, Copy, Debug)]
struct ObjectEntry {
    kind: ObjectKind,
    container: ContainerKind,
    cell: CellCoord,
    active: bool,
}

impl ObjectEntry {
    /// Players and active objects change cell immediately and hold the grids
    /// around them Active.
    fn keeps_grids_active(&self) -> bool {
        self.kind == ObjectKind::Player || self.active
    }
}

/// Players and active objects by current grid. A grid with one of them in
/// itself or a neighbouring grid never leaves Active.
#[derive(Debug, Default)]
struct ActiveObjects(AHashMap<ObjectGuid, GridCoord>);

impl GridHost for ActiveObjects {
    fn active_objects_near(&self, grid: GridCoord) -> bool {
        self.0.values().any(|at| at.is_adjacent_or_same(&grid))
    }
}

/// One live copy of a world map: its grid matrix, participants and objects.
pub struct Map {
    key: MapKey,
    template: MapTemplate,
    settings: MapSettings,
    nav: Option<Arc<NavMeshStore>>,
    grids: Vec<Option<Grid>>,
    loaded_grids: BTreeSet<GridCoord>,
    objects: AHashMap<ObjectGuid, ObjectEntry>,
    players: AHashSet<ObjectGuid>,
    active_objects: ActiveObjects,
    removal_queue: SegQueue<ObjectGuid>,
    unload_timer: Option<CountdownTimer>,
    lock_owner: Option<LockOwner>,
    respawn_times: HashMap<ObjectGuid, u64>,
    update_ticks: u64,
}

impl Map {
    pub fn new(key: MapKey, template: MapTemplate, settings: MapSettings, nav: Option<Arc<NavMeshStore>>) -> Self {
        if let Some(store) = &nav {
            store.load_map_instance(&settings.data_path, template.navigation_map_id(), key.map_id, key.instance_id);
        }
        // instanced maps that nobody enters still go away
        let unload_timer = template
            .is_instanced()
            .then(|| CountdownTimer::new(settings.instance_unload_delay));
        let grid_slots = (MAX_NUMBER_OF_GRIDS * MAX_NUMBER_OF_GRIDS) as usize;
        info!("Map {} ({:?} '{}') created", key, template.kind, template.name);
        Map {
            key,
            template,
            settings,
            nav,
            grids: (0..grid_slots).map(|_| None).collect(),
            loaded_grids: BTreeSet::new(),
            objects: AHashMap::new(),
            players: AHashSet::new(),
            active_objects: ActiveObjects::default(),
            removal_queue: SegQueue::new(),
            unload_timer,
            lock_owner: None,
            respawn_times: HashMap::new(),
            update_ticks: 0,
        }
    }

    pub fn key(&self) -> MapKey {
        self.key
    }

    pub fn map_id(&self) -> MapId {
        self.key.map_id
    }

    pub fn instance_id(&self) -> InstanceId {
        self.key.instance_id
    }

    pub fn template(&self) -> &MapTemplate {
        &self.template
    }

    pub fn lock_owner(&self) -> Option<LockOwner> {
        self.lock_owner
    }

    pub fn set_lock_owner(&mut self, owner: Option<LockOwner>) {
        self.lock_owner = owner;
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn has_player(&self, guid: ObjectGuid) -> bool {
        self.players.contains(&guid)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn loaded_grid_count(&self) -> usize {
        self.loaded_grids.len()
    }

    pub fn update_ticks(&self) -> u64 {
        self.update_ticks
    }

    pub fn grid(&self, coord: GridCoord) -> Option<&Grid> {
        self.grids[coord.index()].as_ref()
    }

    pub fn grid_state(&self, coord: GridCoord) -> Option<GridState> {
        self.grid(coord).map(Grid::state)
    }

    pub fn acquire_grid_unload_lock(&self, coord: GridCoord) -> Option<UnloadLockGuard> {
        self.grid(coord).map(Grid::acquire_unload_lock)
    }

    pub fn object(&self, guid: ObjectGuid) -> Option<&MapObject> {
        let entry = self.objects.get(&guid)?;
        self.grid(entry.cell.grid())?
            .get(&entry.cell, entry.container, entry.kind, guid)
    }

    /// Cell the object is currently binned in; lags its position until the
    /// next relocation pass for batched objects.
    pub fn object_cell(&self, guid: ObjectGuid) -> Option<CellCoord> {
        self.objects.get(&guid).map(|entry| entry.cell)
    }

    // --- grids ---

    fn ensure_grid_loaded(&mut self, coord: GridCoord) -> &mut Grid {
        let Map { key, template, settings, nav, grids, loaded_grids, .. } = self;
        grids[coord.index()].get_or_insert_with(|| {
            debug!("Loading grid [{}, {}] for map {}", coord.x, coord.y, key);
            loaded_grids.insert(coord);
            if let Some(store) = nav {
                store.load_map(&settings.data_path, template.navigation_map_id(), coord.x, coord.y);
            }
            let mut grid = Grid::new(coord, settings.grid_expiry, !settings.grid_unload, settings.relocation_period);
            grid.activate();
            grid
        })
    }

    /// Loads the grid, or swaps an Idle/Removal grid for a fresh Active one.
    fn ensure_grid_active(&mut self, coord: GridCoord) -> &mut Grid {
        let slot = coord.index();
        if let Some(grid) = self.grids[slot].take() {
            let grid = match grid.state() {
                GridState::Idle | GridState::Removal => {
                    debug!("Reactivating grid [{}, {}] on map {}", coord.x, coord.y, self.key);
                    grid.rebuild_active()
                }
                _ => grid,
            };
            self.grids[slot] = Some(grid);
        }
        self.ensure_grid_loaded(coord)
    }

    /// Loads every grid the template declares terrain for.
    pub fn load_all_grids(&mut self) {
        let Some(bounds) = self.template.grid_bounds else {
            debug!("Map {} declares no grid bounds, nothing to preload", self.key);
            return;
        };
        for coord in bounds.grids() {
            self.ensure_grid_loaded(coord);
        }
        info!("Map {} preloaded {} grids", self.key, self.loaded_grids.len());
    }

    /// Frees a grid and its contents. Without `unload_all` the grid is refused
    /// while players, mobile creatures or active objects keep it busy.
    pub fn unload_grid(&mut self, coord: GridCoord, unload_all: bool) -> bool {
        let Some(grid) = self.grids[coord.index()].as_ref() else {
            return false;
        };
        if !unload_all
            && (grid.world_object_count(ObjectKind::Player) > 0
                || grid.world_object_count(ObjectKind::Creature) > 0
                || self.active_objects.active_objects_near(coord))
        {
            return false;
        }
        let Some(mut grid) = self.grids[coord.index()].take() else {
            return false;
        };
        let dropped = grid.drain();
        for object in &dropped {
            self.objects.remove(&object.guid);
            self.players.remove(&object.guid);
            self.active_objects.0.remove(&object.guid);
        }
        self.loaded_grids.remove(&coord);

        // instances keep their tiles until the whole map goes away
        if self.key.instance_id == CONTINENT_INSTANCE_ID && self.template.is_continent() {
            if let Some(store) = &self.nav {
                store.unload_map_tile(self.template.navigation_map_id(), coord.x, coord.y);
            }
        }
        debug!("Unloaded grid [{}, {}] of map {} ({} objects dropped)", coord.x, coord.y, self.key, dropped.len());
        true
    }

    pub fn unload_all(&mut self) {
        let players: Vec<ObjectGuid> = self.players.iter().copied().collect();
        for guid in players {
            self.remove_object(guid);
        }
        while self.removal_queue.pop().is_some() {}
        let loaded: Vec<GridCoord> = self.loaded_grids.iter().copied().collect();
        for coord in loaded {
            self.unload_grid(coord, true);
        }
    }

    // --- participants and objects ---

    pub fn add_player(&mut self, guid: ObjectGuid, position: Position) -> WorldResult<()> {
        self.add_object(MapObject::player(guid, position))
    }

    pub fn remove_player(&mut self, guid: ObjectGuid) -> Option<MapObject> {
        if !self.players.contains(&guid) {
            debug!("Player {} is not on map {}", guid, self.key);
            return None;
        }
        self.remove_object(guid)
    }

    pub fn add_object(&mut self, object: MapObject) -> WorldResult<()> {
        let cell = CellCoord::from_world(object.position.x, object.position.y)?;
        if self.objects.contains_key(&object.guid) {
            return Err(WorldError::DuplicateObject(object.guid));
        }
        if !object.kind.storable_in(object.container) {
            return Err(WorldError::NotStorable { guid: object.guid, kind: object.kind, container: object.container });
        }
        let is_player = object.kind == ObjectKind::Player;
        let entry = ObjectEntry {
            kind: object.kind,
            container: object.container,
            cell,
            active: object.keeps_grid_active,
        };
        let guid = object.guid;
        let grid = if entry.keeps_grids_active() {
            self.ensure_grid_active(cell.grid())
        } else {
            self.ensure_grid_loaded(cell.grid())
        };
        grid.insert(&cell, object)?;
        self.objects.insert(guid, entry);
        if entry.keeps_grids_active() {
            self.active_objects.0.insert(guid, cell.grid());
        }
        if is_player {
            self.players.insert(guid);
            self.unload_timer = None;
            debug!("Player {} entered map {} ({} players)", guid, self.key, self.players.len());
        }
        Ok(())
    }

    pub fn remove_object(&mut self, guid: ObjectGuid) -> Option<MapObject> {
        let entry = self.objects.remove(&guid)?;
        let removed = self
            .grids[entry.cell.grid().index()]
            .as_mut()
            .and_then(|grid| grid.remove(&entry.cell, entry.container, entry.kind, guid));
        self.active_objects.0.remove(&guid);
        if self.players.remove(&guid) {
            debug!("Player {} left map {} ({} players)", guid, self.key, self.players.len());
            if self.players.is_empty() && self.template.is_instanced() {
                self.unload_timer = Some(CountdownTimer::new(self.settings.instance_unload_delay));
            }
        }
        if removed.is_none() {
            error!("Object {} was indexed on map {} but missing from its cell", guid, self.key);
        }
        removed
    }

    /// Defers removal to the delayed-update pass.
    pub fn schedule_removal(&self, guid: ObjectGuid) {
        self.removal_queue.push(guid);
    }

    /// Updates the position now. Players and active objects change cell
    /// immediately; everything else is re-binned when its grid's relocation
    /// timer fires.
    pub fn relocate_object(&mut self, guid: ObjectGuid, position: Position) -> WorldResult<()> {
        let new_cell = CellCoord::from_world(position.x, position.y)?;
        let entry = *self.objects.get(&guid).ok_or(WorldError::ObjectNotFound(guid))?;
        let grid = self.grids[entry.cell.grid().index()]
            .as_mut()
            .ok_or_else(|| WorldError::Internal(format!("object {} indexed in an unloaded grid", guid)))?;
        let object = grid
            .get_mut(&entry.cell, entry.container, entry.kind, guid)
            .ok_or(WorldError::ObjectNotFound(guid))?;
        object.position = position;
        if new_cell == entry.cell {
            return Ok(());
        }
        if entry.keeps_grids_active() {
            return self.move_to_cell(guid, new_cell);
        }
        grid.queue_relocation(guid, entry.kind);
        Ok(())
    }

    fn move_to_cell(&mut self, guid: ObjectGuid, new_cell: CellCoord) -> WorldResult<()> {
        let entry = *self.objects.get(&guid).ok_or(WorldError::ObjectNotFound(guid))?;
        if entry.cell == new_cell {
            return Ok(());
        }
        let object = self.grids[entry.cell.grid().index()]
            .as_mut()
            .and_then(|grid| grid.remove(&entry.cell, entry.container, entry.kind, guid))
            .ok_or(WorldError::ObjectNotFound(guid))?;
        let target = if entry.keeps_grids_active() {
            self.ensure_grid_active(new_cell.grid())
        } else {
            self.ensure_grid_loaded(new_cell.grid())
        };
        if let Err(e) = target.insert(&new_cell, object) {
            self.objects.remove(&guid);
            self.players.remove(&guid);
            self.active_objects.0.remove(&guid);
            return Err(e);
        }
        self.objects.insert(guid, ObjectEntry { cell: new_cell, ..entry });
        if entry.keeps_grids_active() {
            self.active_objects.0.insert(guid, new_cell.grid());
        }
        trace!("Object {} moved to cell ({}, {}) on map {}", guid, new_cell.x, new_cell.y, self.key);
        Ok(())
    }

    fn process_relocations(&mut self, diff: Duration) {
        let loaded: Vec<GridCoord> = self.loaded_grids.iter().copied().collect();
        for coord in loaded {
            let Some(grid) = self.grids[coord.index()].as_mut() else {
                continue;
            };
            let batch = grid.poll_relocations(diff);
            self.apply_relocations(batch);
        }
    }

    /// Re-bins each object into the cell of its current position.
    fn apply_relocations(&mut self, batch: Vec<(ObjectGuid, ObjectKind)>) {
        for (guid, _) in batch {
            let Some(position) = self.object(guid).map(|o| o.position) else {
                continue;
            };
            let target = CellCoord::from_world_clamped(position.x, position.y);
            if let Err(e) = self.move_to_cell(guid, target) {
                error!("Relocation of object {} on map {} failed: {}", guid, self.key, e);
            }
        }
    }

    /// Visits one container of every loaded cell in the area.
    pub fn visit_area<F>(&self, area: &CellArea, mask: VisitMask, mut visitor: F) -> WorldResult<()>
    where
        F: FnMut(&MapObject),
    {
        mask.container()?;
        for cell in area.cells() {
            if let Some(grid) = self.grid(cell.grid()) {
                grid.visit_cell(&cell, mask, &mut visitor)?;
            }
        }
        Ok(())
    }

    // --- persistence ---

    pub fn load_respawn_times(&mut self, respawn_times: HashMap<ObjectGuid, u64>) {
        debug!("Map {} loaded {} respawn times", self.key, respawn_times.len());
        self.respawn_times = respawn_times;
    }

    pub fn respawn_time(&self, guid: ObjectGuid) -> Option<u64> {
        self.respawn_times.get(&guid).copied()
    }

    pub fn load_corpses<I: IntoIterator<Item = MapObject>>(&mut self, corpses: I) -> usize {
        let mut loaded = 0;
        for corpse in corpses {
            let guid = corpse.guid;
            match self.add_object(corpse) {
                Ok(()) => loaded += 1,
                Err(e) => error!("Map {} could not place corpse {}: {}", self.key, guid, e),
            }
        }
        loaded
    }

    // --- ticking ---

    pub fn update(&mut self, diff: Duration) {
        self.update_ticks += 1;
        self.process_relocations(diff);

        let loaded: Vec<GridCoord> = self.loaded_grids.iter().copied().collect();
        for coord in loaded {
            let outcome = match self.grids[coord.index()].as_mut() {
                Some(grid) => grid.update(&self.active_objects, diff),
                None => continue,
            };
            match outcome {
                // idle grids no longer poll, so queued moves land now
                GridUpdateOutcome::BecameIdle => {
                    let batch = self.grids[coord.index()].as_mut().map(Grid::take_relocations).unwrap_or_default();
                    self.apply_relocations(batch);
                }
                GridUpdateOutcome::RequestUnload if !self.unload_grid(coord, false) => {
                    if let Some(grid) = self.grids[coord.index()].as_mut() {
                        trace!("Map {} refused unload of grid [{}, {}]", self.key, coord.x, coord.y);
                        grid.reset_expiry();
                    }
                }
                _ => {}
            }
        }
    }

    /// Second pass after every map has run `update`; drains deferred removals.
    pub fn delayed_update(&mut self, _diff: Duration) -> usize {
        let mut removed = 0;
        while let Some(guid) = self.removal_queue.pop() {
            if self.remove_object(guid).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Counts the unload timer down; true once an empty instanced map may go.
    pub fn can_unload(&mut self, diff: Duration) -> bool {
        if !self.players.is_empty() {
            return false;
        }
        match self.unload_timer.as_mut() {
            Some(timer) => {
                timer.update(diff);
                timer.passed()
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for Map {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Map")
            .field("key", &self.key)
            .field("kind", &self.template.kind)
            .field("players", &self.players.len())
            .field("objects", &self.objects.len())
            .field("loaded_grids", &self.loaded_grids.len())
            .finish()
    }
}
