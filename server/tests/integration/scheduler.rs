// world_map_core/server/tests/integration/scheduler.rs

use world_map_core::core::config::{ThreadPoolConfig, WorldConfig};
use world_map_core::core::types::{MapKey, MapRequester, Position};
use world_map_core::server::instance_lock::InMemoryInstanceLocks;
use world_map_core::server::persistence::InMemoryPersistence;
use world_map_core::server::{run_driver_loop, MapRegistry, MapUpdateHook};
use world_map_core::world::object::MapObject;
use world_map_core::world::template::{MapCatalog, MapKind, MapTemplate};
use world_map_core::world::Map;

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const INTERVAL: Duration = Duration::from_millis(100);
const DUNGEON: u32 = 33;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Update,
    Delayed,
}

#[derive(Default)]
struct RecordingHook {
    events: Mutex<Vec<(Phase, MapKey, Duration)>>,
}

impl RecordingHook {
    fn events(&self) -> Vec<(Phase, MapKey, Duration)> {
        self.events.lock().clone()
    }

    fn keys_in(&self, phase: Phase) -> Vec<MapKey> {
        self.events().into_iter().filter(|(p, _, _)| *p == phase).map(|(_, key, _)| key).collect()
    }
}

impl MapUpdateHook for RecordingHook {
    fn on_update(&self, map: &mut Map, diff: Duration) {
        self.events.lock().push((Phase::Update, map.key(), diff));
    }

    fn on_delayed_update(&self, map: &mut Map, diff: Duration) {
        self.events.lock().push((Phase::Delayed, map.key(), diff));
    }
}

/// Panics while updating one map id.
struct PanickingHook(u32);

impl MapUpdateHook for PanickingHook {
    fn on_update(&self, map: &mut Map, _diff: Duration) {
        if map.map_id() == self.0 {
            panic!("hook failure on map {}", map.key());
        }
    }
}

/// Schedules a removal from inside the primary update pass.
struct RemovalHook(u64);

impl MapUpdateHook for RemovalHook {
    fn on_update(&self, map: &mut Map, _diff: Duration) {
        if map.object(self.0).is_some() {
            map.schedule_removal(self.0);
            assert!(map.object(self.0).is_some(), "Removal must wait for the delayed pass");
        }
    }
}

fn setup_registry(threads: usize) -> MapRegistry {
    let config = WorldConfig {
        map_update_interval_ms: INTERVAL.as_millis() as u64,
        instance_unload_delay_ms: 60_000,
        thread_pools: ThreadPoolConfig { map_update_threads: threads },
        ..WorldConfig::default()
    };
    let catalog = MapCatalog::from_templates([
        MapTemplate::new(0, MapKind::Continent),
        MapTemplate::new(1, MapKind::Continent),
        MapTemplate::new(DUNGEON, MapKind::Dungeon),
    ]);
    let registry = MapRegistry::new(
        config,
        catalog,
        Arc::new(InMemoryInstanceLocks::new()),
        Arc::new(InMemoryPersistence::new()),
    )
    .expect("Failed to create registry for test");
    registry.initialize();
    registry
}

fn populate(registry: &MapRegistry, dungeons: u64) {
    registry.create_map(0, &MapRequester::default()).unwrap();
    registry.create_map(1, &MapRequester::default()).unwrap();
    for player in 0..dungeons {
        registry.create_map(DUNGEON, &MapRequester::player(player + 1)).unwrap();
    }
}

fn assert_updates_precede_delayed(hook: &RecordingHook, map_count: usize) {
    let events = hook.events();
    let first_delayed = events
        .iter()
        .position(|(phase, _, _)| *phase == Phase::Delayed)
        .expect("delayed pass should run");
    assert!(
        events[first_delayed..].iter().all(|(phase, _, _)| *phase == Phase::Delayed),
        "An update ran after the delayed pass started: {:?}",
        events
    );
    let updated = hook.keys_in(Phase::Update);
    let delayed = hook.keys_in(Phase::Delayed);
    assert_eq!(updated.len(), map_count, "Every map updates once per tick");
    assert_eq!(delayed.len(), map_count, "Every map runs its delayed update once per tick");

    let mut sorted = delayed.clone();
    sorted.sort();
    assert_eq!(delayed, sorted, "Delayed pass runs in key order");
}

// --- Test Cases ---

#[test]
fn serial_updates_precede_delayed_updates() {
    let registry = setup_registry(0);
    populate(&registry, 4);
    let hook = Arc::new(RecordingHook::default());
    registry.add_hook(hook.clone());

    assert!(registry.update(INTERVAL));
    assert_updates_precede_delayed(&hook, registry.map_count());
}

#[test]
fn pooled_updates_precede_delayed_updates() {
    let registry = setup_registry(4);
    assert!(registry.scheduler().executor().is_pooled());
    populate(&registry, 12);
    let hook = Arc::new(RecordingHook::default());
    registry.add_hook(hook.clone());

    for _ in 0..3 {
        hook.events.lock().clear();
        assert!(registry.update(INTERVAL));
        assert_updates_precede_delayed(&hook, registry.map_count());
    }
    registry.do_for_all_maps(|map| assert_eq!(map.update_ticks(), 3));
    info!("[Test Result] {} pooled maps kept update/delayed ordering over 3 ticks", registry.map_count());
}

#[test]
fn sub_interval_calls_only_accumulate() {
    let registry = setup_registry(0);
    populate(&registry, 1);
    let hook = Arc::new(RecordingHook::default());
    registry.add_hook(hook.clone());

    assert!(!registry.update(Duration::from_millis(40)));
    assert!(!registry.update(Duration::from_millis(40)));
    assert!(hook.events().is_empty(), "No map may run before the interval is reached");
    assert_eq!(registry.scheduler().ticks(), 0);

    assert!(registry.update(Duration::from_millis(40)));
    assert_eq!(registry.scheduler().ticks(), 1);
    assert!(
        hook.events().iter().all(|(_, _, diff)| *diff == Duration::from_millis(120)),
        "Maps receive the accumulated time"
    );

    hook.events.lock().clear();
    assert!(!registry.update(Duration::from_millis(60)), "Accumulator restarts after a tick");
    assert!(hook.events().is_empty());
}

#[test]
fn panicking_update_does_not_stop_other_maps() {
    let registry = setup_registry(2);
    populate(&registry, 3);
    let hook = Arc::new(RecordingHook::default());
    registry.add_hook(hook.clone());
    registry.add_hook(Arc::new(PanickingHook(DUNGEON)));

    assert!(registry.update(INTERVAL), "Tick completes despite failing jobs");
    assert_eq!(hook.keys_in(Phase::Update).len(), registry.map_count());
    assert_eq!(hook.keys_in(Phase::Delayed).len(), registry.map_count(), "Delayed pass still runs for every map");

    assert!(registry.update(INTERVAL), "Failing maps do not wedge later ticks");
}

#[test]
fn removals_from_the_update_pass_apply_in_the_same_tick() {
    let registry = setup_registry(0);
    let map = registry.create_map(0, &MapRequester::default()).unwrap();
    map.lock().add_object(MapObject::creature(500, Position::new(5.0, 5.0, 0.0))).unwrap();
    registry.add_hook(Arc::new(RemovalHook(500)));

    assert!(registry.update(INTERVAL));
    assert!(map.lock().object(500).is_none());
}

#[test]
fn unloadable_maps_are_destroyed_after_the_delayed_pass() {
    let config = WorldConfig {
        map_update_interval_ms: INTERVAL.as_millis() as u64,
        instance_unload_delay_ms: INTERVAL.as_millis() as u64,
        ..WorldConfig::default()
    };
    let catalog = MapCatalog::from_templates([MapTemplate::new(DUNGEON, MapKind::Dungeon)]);
    let registry = MapRegistry::new(
        config,
        catalog,
        Arc::new(InMemoryInstanceLocks::new()),
        Arc::new(InMemoryPersistence::new()),
    )
    .unwrap();
    let hook = Arc::new(RecordingHook::default());
    registry.add_hook(hook.clone());
    let key = registry.create_map(DUNGEON, &MapRequester::player(1)).unwrap().lock().key();

    assert!(registry.update(INTERVAL));
    assert_eq!(hook.keys_in(Phase::Delayed), vec![key], "Map finished its tick before destruction");
    assert!(registry.find_map(key.map_id, key.instance_id).is_none());
    assert_eq!(registry.map_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn driver_loop_stops_on_shutdown_request() {
    let registry = Arc::new(setup_registry(0));
    populate(&registry, 2);
    let stopper = Arc::clone(&registry);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        stopper.request_shutdown();
    });

    let driven = Arc::clone(&registry);
    tokio::time::timeout(Duration::from_secs(10), run_driver_loop(driven, Duration::from_millis(20)))
        .await
        .expect("driver loop should stop after a shutdown request");

    assert!(registry.scheduler().ticks() >= 1, "Driver loop should have ticked");
    assert_eq!(registry.map_count(), 0, "Driver loop unloads every map on the way out");
}
