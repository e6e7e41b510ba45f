// world_map_core/server/tests/integration/grid_lifecycle.rs

use world_map_core::core::config::WorldConfig;
use world_map_core::core::types::{MapKey, MapRequester, ObjectKind, Position};
use world_map_core::server::instance_lock::InMemoryInstanceLocks;
use world_map_core::server::persistence::InMemoryPersistence;
use world_map_core::server::MapRegistry;
use world_map_core::world::coords::{CellCoord, GridCoord};
use world_map_core::world::grid::GridState;
use world_map_core::world::object::MapObject;
use world_map_core::world::template::{GridBounds, MapCatalog, MapKind, MapTemplate};
use world_map_core::world::{Map, MapSettings};

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const STEP: Duration = Duration::from_millis(200);
const PLAYER: u64 = 1;

fn test_settings(grid_unload: bool) -> MapSettings {
    MapSettings {
        grid_expiry: Duration::from_secs(1),
        grid_unload,
        instance_unload_delay: Duration::from_secs(1),
        relocation_period: Duration::from_secs(1),
        data_path: std::env::temp_dir(),
    }
}

fn setup_continent(grid_unload: bool) -> Map {
    let template = MapTemplate::new(0, MapKind::Continent).with_name("Test Continent");
    Map::new(MapKey::new(0, 0), template, test_settings(grid_unload), None)
}

fn origin_grid() -> GridCoord {
    GridCoord::from_world(0.0, 0.0).expect("origin is on the map")
}

/// Ticks the map until the grid leaves `state` or `max_steps` run out.
fn tick_while_in(map: &mut Map, coord: GridCoord, state: GridState, max_steps: usize) -> Option<GridState> {
    for _ in 0..max_steps {
        if map.grid_state(coord) != Some(state) {
            break;
        }
        map.update(STEP);
    }
    map.grid_state(coord)
}

/// Lets a player touch the origin grid and leave again.
fn visit_and_leave(map: &mut Map) {
    map.add_player(PLAYER, Position::new(0.0, 0.0, 0.0)).expect("player should enter");
    map.remove_player(PLAYER).expect("player should leave");
}

// --- Test Cases ---

#[test]
fn grid_walks_forward_to_unload() {
    let mut map = setup_continent(true);
    let coord = origin_grid();
    visit_and_leave(&mut map);

    let mut seen = vec![map.grid_state(coord).expect("grid loaded by the visit")];
    for _ in 0..100 {
        map.update(STEP);
        match map.grid_state(coord) {
            Some(state) if seen.last() != Some(&state) => seen.push(state),
            Some(_) => {}
            None => break,
        }
    }

    assert_eq!(seen, vec![GridState::Active, GridState::Idle, GridState::Removal], "States must only move forward");
    assert!(map.grid(coord).is_none(), "Empty grid should be unloaded after Removal");
    assert_eq!(map.loaded_grid_count(), 0);
    info!("[Test Result] Grid lifecycle observed: {:?}", seen);
}

#[test]
fn players_keep_their_grid_active() {
    let mut map = setup_continent(true);
    let coord = origin_grid();
    map.add_player(PLAYER, Position::new(10.0, 10.0, 0.0)).unwrap();

    for _ in 0..50 {
        map.update(STEP);
    }
    assert_eq!(map.grid_state(coord), Some(GridState::Active));
    assert!(map.grid(coord).unwrap().is_simulation_active());
}

#[test]
fn unload_lock_vetoes_removal() {
    let mut map = setup_continent(true);
    let coord = origin_grid();
    visit_and_leave(&mut map);
    assert_eq!(tick_while_in(&mut map, coord, GridState::Active, 20), Some(GridState::Idle));
    assert_eq!(tick_while_in(&mut map, coord, GridState::Idle, 20), Some(GridState::Removal));

    let guard = map.acquire_grid_unload_lock(coord).expect("grid is loaded");
    for _ in 0..50 {
        map.update(STEP);
    }
    assert_eq!(map.grid_state(coord), Some(GridState::Removal), "Locked grid must stay resident");

    drop(guard);
    assert_eq!(tick_while_in(&mut map, coord, GridState::Removal, 20), None, "Released grid should unload");
}

#[test]
fn disabled_grid_unload_keeps_grids_forever() {
    let mut map = setup_continent(false);
    let coord = origin_grid();
    visit_and_leave(&mut map);

    for _ in 0..100 {
        map.update(STEP);
    }
    assert_eq!(map.grid_state(coord), Some(GridState::Removal));
    assert_eq!(map.loaded_grid_count(), 1);
}

#[test]
fn active_object_in_neighbouring_grid_keeps_grid_active() {
    let mut map = setup_continent(true);
    let coord = origin_grid();
    visit_and_leave(&mut map);

    let far_sight = MapObject::far_sight(50, Position::new(540.0, 0.0, 0.0));
    let neighbour = GridCoord::from_world(540.0, 0.0).unwrap();
    assert_ne!(neighbour, coord);
    map.add_object(far_sight).unwrap();

    for _ in 0..30 {
        map.update(STEP);
    }
    assert_eq!(map.grid_state(coord), Some(GridState::Active), "Nearby active object should hold the grid");

    map.remove_object(50).unwrap();
    assert_eq!(tick_while_in(&mut map, coord, GridState::Active, 20), Some(GridState::Idle));
}

#[test]
fn player_in_neighbouring_grid_keeps_grid_active() {
    let mut map = setup_continent(true);
    let coord = origin_grid();
    map.add_object(MapObject::grid_bound(60, ObjectKind::GameObject, Position::new(5.0, 5.0, 0.0))).unwrap();
    map.add_player(PLAYER, Position::new(540.0, 0.0, 0.0)).unwrap();
    assert_ne!(GridCoord::from_world(540.0, 0.0).unwrap(), coord, "Player must stand in the next grid");

    for _ in 0..50 {
        map.update(STEP);
    }
    assert_eq!(map.grid_state(coord), Some(GridState::Active), "Player next door should hold the grid");
    assert!(map.object(60).is_some(), "Grid contents survive while the player is near");

    map.relocate_object(PLAYER, Position::new(2000.0, 0.0, 0.0)).unwrap();
    assert_eq!(tick_while_in(&mut map, coord, GridState::Active, 20), Some(GridState::Idle));
    info!("[Test Result] Neighbouring player held grid [{}, {}] active until they walked away", coord.x, coord.y);
}

#[test]
fn reentering_an_idle_grid_rebuilds_it_active() {
    let mut map = setup_continent(true);
    let coord = origin_grid();
    map.add_object(MapObject::grid_bound(70, ObjectKind::GameObject, Position::new(5.0, 5.0, 0.0))).unwrap();
    visit_and_leave(&mut map);
    assert_eq!(tick_while_in(&mut map, coord, GridState::Active, 20), Some(GridState::Idle));
    assert!(!map.grid(coord).unwrap().is_simulation_active());

    map.add_player(PLAYER, Position::new(0.0, 0.0, 0.0)).unwrap();
    let grid = map.grid(coord).unwrap();
    assert_eq!(grid.state(), GridState::Active);
    assert!(grid.is_simulation_active());
    assert!(map.object(70).is_some(), "Rebuilt grid keeps its contents");
    assert_eq!(map.object_count(), 2);
}

#[test]
fn grid_with_mobile_creature_is_not_unloaded() {
    let mut map = setup_continent(true);
    let coord = origin_grid();
    map.add_object(MapObject::creature(80, Position::new(5.0, 5.0, 0.0))).unwrap();

    for _ in 0..60 {
        map.update(STEP);
    }
    assert_eq!(map.grid_state(coord), Some(GridState::Removal), "Creature does not keep the grid active");
    assert!(map.object(80).is_some(), "Unload is refused while the creature is there");

    map.remove_object(80).unwrap();
    assert_eq!(tick_while_in(&mut map, coord, GridState::Removal, 20), None);
}

#[test]
fn grid_bound_relocation_waits_for_the_relocation_timer() {
    let mut map = setup_continent(true);
    map.add_player(PLAYER, Position::new(0.0, 0.0, 0.0)).unwrap();
    map.add_object(MapObject::grid_bound(90, ObjectKind::GameObject, Position::new(5.0, 5.0, 0.0))).unwrap();
    let old_cell = CellCoord::from_world(5.0, 5.0).unwrap();
    let new_cell = CellCoord::from_world(80.0, 5.0).unwrap();
    assert_ne!(old_cell, new_cell);

    map.relocate_object(90, Position::new(80.0, 5.0, 0.0)).unwrap();
    assert_eq!(map.object_cell(90), Some(old_cell), "Grid-bound objects move on the relocation tick");
    assert_eq!(map.object(90).unwrap().position, Position::new(80.0, 5.0, 0.0));

    for _ in 0..11 {
        map.update(STEP);
    }
    assert_eq!(map.object_cell(90), Some(new_cell));
}

#[test]
fn players_change_cell_immediately() {
    let mut map = setup_continent(true);
    map.add_player(PLAYER, Position::new(0.0, 0.0, 0.0)).unwrap();
    map.relocate_object(PLAYER, Position::new(600.0, 0.0, 0.0)).unwrap();

    let target = CellCoord::from_world(600.0, 0.0).unwrap();
    assert_eq!(map.object_cell(PLAYER), Some(target));
    assert_eq!(map.grid_state(target.grid()), Some(GridState::Active));
}

#[test]
fn deferred_removal_happens_in_delayed_update() {
    let mut map = setup_continent(true);
    map.add_object(MapObject::creature(100, Position::new(5.0, 5.0, 0.0))).unwrap();
    map.schedule_removal(100);
    map.update(STEP);
    assert!(map.object(100).is_some(), "Removal waits for the delayed pass");

    assert_eq!(map.delayed_update(STEP), 1);
    assert!(map.object(100).is_none());
}

#[test]
fn preloaded_continent_grids_stay_loaded() {
    let config = WorldConfig {
        preload_base_maps: true,
        map_update_interval_ms: 100,
        grid_clean_up_delay_ms: 200,
        ..WorldConfig::default()
    };
    let bounds = GridBounds { min_x: 31, min_y: 31, max_x: 33, max_y: 32 };
    let catalog = MapCatalog::from_templates([MapTemplate::new(0, MapKind::Continent).with_grid_bounds(bounds)]);
    let registry = MapRegistry::new(
        config,
        catalog,
        Arc::new(InMemoryInstanceLocks::new()),
        Arc::new(InMemoryPersistence::new()),
    )
    .unwrap();
    assert!(!registry.config().grid_unload, "Preloading turns grid unload off");

    let map = registry.create_map(0, &MapRequester::default()).unwrap();
    assert_eq!(map.lock().loaded_grid_count(), 6);

    for _ in 0..50 {
        registry.update(Duration::from_millis(100));
    }
    assert_eq!(map.lock().loaded_grid_count(), 6, "Preloaded grids are never unloaded");
}
