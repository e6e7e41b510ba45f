// world_map_core/server/tests/integration/registry.rs

use world_map_core::concurrent::id_allocator::InstanceIdAllocator;
use world_map_core::core::config::WorldConfig;
use world_map_core::core::error::WorldError;
use world_map_core::core::types::{LockOwner, MapKey, MapRequester, Position, Team};
use world_map_core::server::instance_lock::{InMemoryInstanceLocks, InstanceLockStore, RecentInstancePolicy};
use world_map_core::server::persistence::{CorpseRecord, InMemoryPersistence, WorldPersistence};
use world_map_core::server::MapRegistry;
use world_map_core::world::template::{MapCatalog, MapKind, MapTemplate};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const CONTINENT: u32 = 0;
const SPLIT_CONTINENT: u32 = 1;
const DUNGEON: u32 = 33;
const RAID: u32 = 533;
const BATTLEGROUND: u32 = 489;

struct TestRegistryContext {
    registry: MapRegistry,
    locks: Arc<InMemoryInstanceLocks>,
    persistence: Arc<InMemoryPersistence>,
}

fn test_config() -> WorldConfig {
    WorldConfig {
        map_update_interval_ms: 50,
        instance_unload_delay_ms: 200,
        ..WorldConfig::default()
    }
}

fn test_catalog() -> MapCatalog {
    MapCatalog::from_templates([
        MapTemplate::new(CONTINENT, MapKind::Continent).with_name("Eastern Kingdoms"),
        MapTemplate::new(SPLIT_CONTINENT, MapKind::Continent).team_partitioned(),
        MapTemplate::new(DUNGEON, MapKind::Dungeon).with_name("Shadowfang Keep"),
        MapTemplate::new(RAID, MapKind::Raid).lock_bound(),
        MapTemplate::new(BATTLEGROUND, MapKind::Battleground),
    ])
}

fn setup_registry_with(config: WorldConfig, persistence: InMemoryPersistence) -> TestRegistryContext {
    let locks = Arc::new(InMemoryInstanceLocks::new());
    let persistence = Arc::new(persistence);
    let registry = MapRegistry::new(config, test_catalog(), locks.clone(), persistence.clone())
        .expect("Failed to create registry for test");
    registry.initialize();
    TestRegistryContext { registry, locks, persistence }
}

fn setup_registry() -> TestRegistryContext {
    setup_registry_with(test_config(), InMemoryPersistence::new())
}

fn group(id: u64) -> MapRequester {
    MapRequester::player(id * 100).with_group(id)
}

/// Feeds `total` of time to the registry in `step` increments.
fn run_for(registry: &MapRegistry, total: Duration, step: Duration) {
    let mut elapsed = Duration::ZERO;
    while elapsed < total {
        registry.update(step);
        elapsed += step;
    }
}

// --- Test Cases ---

#[test]
fn generate_free_generate_scenario() {
    let ctx = setup_registry();
    let ids: Vec<u32> = (0..3).map(|_| ctx.registry.generate_instance_id().unwrap()).collect();
    assert_eq!(ids, vec![1, 2, 3], "Fresh allocator should hand out 1, 2, 3");

    ctx.registry.free_instance_id(2);
    assert_eq!(ctx.registry.generate_instance_id().unwrap(), 2, "Freed id should be reused first");
    assert_eq!(ctx.registry.generate_instance_id().unwrap(), 4);
    info!("[Test Result] generate/free/generate handed out {:?} then 2, 4", ids);
}

#[test]
fn persisted_instance_ids_seed_the_allocator() {
    let persistence = InMemoryPersistence::new();
    persistence.set_used_instance_ids(vec![1, 3]);
    let ctx = setup_registry_with(test_config(), persistence);

    assert!(ctx.registry.is_instance_id_in_use(1));
    assert!(ctx.registry.is_instance_id_in_use(3));
    let first = ctx.registry.create_map(DUNGEON, &MapRequester::player(1)).unwrap();
    let second = ctx.registry.create_map(DUNGEON, &MapRequester::player(2)).unwrap();
    assert_eq!(first.lock().instance_id(), 2);
    assert_eq!(second.lock().instance_id(), 4);
}

#[test]
fn live_map_keys_are_unique_under_concurrent_creation() {
    let ctx = setup_registry();
    let registry = &ctx.registry;
    let created: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| scope.spawn(move || registry.create_map(CONTINENT, &MapRequester::player(i)).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(ctx.registry.map_count(), 1, "Exactly one continent copy should exist");
    for map in &created[1..] {
        assert!(Arc::ptr_eq(&created[0], map), "All callers should receive the same map");
    }
}

#[test]
fn dungeon_instances_get_distinct_ids() {
    let ctx = setup_registry();
    let mut seen = HashSet::new();
    for player in 1..=5 {
        let map = ctx.registry.create_map(DUNGEON, &MapRequester::player(player)).unwrap();
        let key = map.lock().key();
        assert!(seen.insert(key), "Instance {} handed out twice", key);
        assert!(ctx.registry.is_instance_id_in_use(key.instance_id));
    }
    assert_eq!(ctx.registry.map_count(), 5);
    assert_eq!(ctx.registry.instance_ids_in_use(), 5);
}

#[test]
fn same_party_reenters_its_dungeon_copy() {
    let ctx = setup_registry();
    let solo = MapRequester::player(7);

    // no lock yet: new id and a lock bound to it
    let first = ctx.registry.create_map(DUNGEON, &solo).unwrap();
    let first_key = first.lock().key();
    let lock = ctx.locks.find_lock(LockOwner::Player(7), DUNGEON).expect("Entering a dungeon should create a lock");
    assert_eq!(lock.instance_id, first_key.instance_id);
    assert_eq!(first.lock().lock_owner(), Some(LockOwner::Player(7)));

    // same party again: the same copy, nothing new allocated
    let again = ctx.registry.create_map(DUNGEON, &solo).unwrap();
    assert!(Arc::ptr_eq(&first, &again), "Re-entry should return the party's live copy");
    assert_eq!(ctx.registry.map_count(), 1);
    assert_eq!(ctx.registry.instance_ids_in_use(), 1);

    let party = group(3);
    let group_first = ctx.registry.create_map(DUNGEON, &party).unwrap();
    let group_again = ctx.registry.create_map(DUNGEON, &MapRequester::player(301).with_group(3)).unwrap();
    assert!(Arc::ptr_eq(&group_first, &group_again), "Every member of a group shares its lock");
    assert!(!Arc::ptr_eq(&first, &group_first));
    assert_eq!(ctx.registry.map_count(), 2);
    info!("[Test Result] Dungeon re-entry kept {} for the solo player", first_key);
}

#[test]
fn recycled_dungeon_id_does_not_capture_a_stale_lock() {
    let ctx = setup_registry();
    let solo = MapRequester::player(7);
    let first_key = ctx.registry.create_map(DUNGEON, &solo).unwrap().lock().key();

    // dungeon ids go back to the allocator with their map
    assert!(ctx.registry.destroy_map(first_key));
    assert!(!ctx.registry.is_instance_id_in_use(first_key.instance_id));
    let stranger = ctx.registry.create_map(DUNGEON, &MapRequester::player(8)).unwrap();
    assert_eq!(stranger.lock().key(), first_key, "Freed id is handed out again");

    // player 7's lock still names that id but the copy now belongs to player 8
    let back = ctx.registry.create_map(DUNGEON, &solo).unwrap();
    let back_key = back.lock().key();
    assert!(!Arc::ptr_eq(&back, &stranger), "A stale lock must not lead into another party's copy");
    assert_eq!(
        ctx.locks.find_lock(LockOwner::Player(7), DUNGEON).map(|l| l.instance_id),
        Some(back_key.instance_id)
    );
    assert_eq!(ctx.registry.map_count(), 2);
    assert_eq!(ctx.registry.instance_ids_in_use(), 2);

    // a lock whose copy is simply gone moves to a fresh one
    assert!(ctx.registry.destroy_map(back_key));
    let rebuilt = ctx.registry.create_map(DUNGEON, &solo).unwrap();
    assert_eq!(
        ctx.locks.find_lock(LockOwner::Player(7), DUNGEON).map(|l| l.instance_id),
        Some(rebuilt.lock().instance_id())
    );
    assert_eq!(ctx.registry.instance_ids_in_use(), 2, "Destroyed dungeon ids are not leaked");
}

#[test]
fn recent_instance_policy_lets_a_group_join_a_members_copy() {
    let locks = Arc::new(InMemoryInstanceLocks::new());
    let registry = MapRegistry::new(test_config(), test_catalog(), locks.clone(), Arc::new(InMemoryPersistence::new()))
        .unwrap()
        .with_reuse_policy(Box::new(RecentInstancePolicy::new()));
    registry.initialize();

    let solo = registry.create_map(DUNGEON, &MapRequester::player(7)).unwrap();
    let key = solo.lock().key();

    // player 7 forms group 5; the group has no lock and follows them in
    let grouped = registry.create_map(DUNGEON, &MapRequester::player(7).with_group(5)).unwrap();
    assert!(Arc::ptr_eq(&solo, &grouped), "Group should join the member's live copy");
    assert_eq!(locks.find_lock(LockOwner::Group(5), DUNGEON).map(|l| l.instance_id), Some(key.instance_id));
    let member = registry.create_map(DUNGEON, &MapRequester::player(8).with_group(5)).unwrap();
    assert!(Arc::ptr_eq(&solo, &member), "Other members follow the group lock");
    assert_eq!(registry.map_count(), 1);

    let other = registry.create_map(DUNGEON, &MapRequester::player(9)).unwrap();
    assert!(!Arc::ptr_eq(&solo, &other), "Unrelated players get their own copy");

    // raids never share
    let raid = registry.create_map(RAID, &MapRequester::player(7)).unwrap();
    let raid_group = registry.create_map(RAID, &MapRequester::player(7).with_group(5)).unwrap();
    assert!(!Arc::ptr_eq(&raid, &raid_group));

    assert!(registry.destroy_map(key));
    let fresh = registry.create_map(DUNGEON, &MapRequester::player(7).with_group(5)).unwrap();
    assert!(!Arc::ptr_eq(&solo, &fresh), "Destroyed instances are not handed out again");
}

#[test]
fn instanceable_lock_scenario() {
    let ctx = setup_registry();
    let owner = group(1);

    // no lock yet: new id and a lock bound to it
    let first = ctx.registry.create_map(RAID, &owner).unwrap();
    let first_key = first.lock().key();
    let lock = ctx.locks.find_lock(LockOwner::Group(1), RAID).expect("lock should be created");
    assert_eq!(lock.instance_id, first_key.instance_id);
    assert_eq!(first.lock().lock_owner(), Some(LockOwner::Group(1)));

    // same party, live map: the same copy
    let again = ctx.registry.create_map(RAID, &owner).unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    // another party gets its own copy
    let other = ctx.registry.create_map(RAID, &group(2)).unwrap();
    assert_ne!(other.lock().key(), first_key);

    // lock-bound ids survive map destruction
    assert!(ctx.registry.destroy_map(first_key));
    assert!(ctx.registry.is_instance_id_in_use(first_key.instance_id));

    // lock whose map is gone: fresh id, lock rebound, stale id released
    let rebuilt = ctx.registry.create_map(RAID, &owner).unwrap();
    let rebuilt_key = rebuilt.lock().key();
    assert_ne!(rebuilt_key.instance_id, first_key.instance_id);
    assert_eq!(
        ctx.locks.find_lock(LockOwner::Group(1), RAID).map(|l| l.instance_id),
        Some(rebuilt_key.instance_id)
    );
    assert!(!ctx.registry.is_instance_id_in_use(first_key.instance_id));
    info!("[Test Result] lock moved from {} to {}", first_key, rebuilt_key);
}

#[test]
fn lock_pointing_at_foreign_instance_is_rebound() {
    let ctx = setup_registry();
    let foreign = ctx.registry.create_map(RAID, &group(1)).unwrap();
    let foreign_key = foreign.lock().key();

    // party 2 carries a lock onto party 1's live copy
    ctx.locks.create_lock(LockOwner::Group(2), RAID, foreign_key.instance_id);
    let own = ctx.registry.create_map(RAID, &group(2)).unwrap();
    let own_key = own.lock().key();

    assert_ne!(own_key, foreign_key);
    assert_eq!(
        ctx.locks.find_lock(LockOwner::Group(2), RAID).map(|l| l.instance_id),
        Some(own_key.instance_id)
    );
    assert!(ctx.registry.is_instance_id_in_use(foreign_key.instance_id), "Live map keeps its id");
}

#[test]
fn battleground_and_continent_keys() {
    let ctx = setup_registry();
    assert!(matches!(
        ctx.registry.create_map(BATTLEGROUND, &MapRequester::player(1)),
        Err(WorldError::MissingBattlegroundInstance { .. })
    ));

    let bg_id = ctx.registry.generate_instance_id().unwrap();
    let bg = ctx
        .registry
        .create_map(BATTLEGROUND, &MapRequester::player(1).with_battleground_instance(bg_id))
        .unwrap();
    assert_eq!(bg.lock().key(), MapKey::new(BATTLEGROUND, bg_id));

    let alliance = ctx.registry.create_map(SPLIT_CONTINENT, &MapRequester::player(1).with_team(Team::Alliance)).unwrap();
    let horde = ctx.registry.create_map(SPLIT_CONTINENT, &MapRequester::player(2).with_team(Team::Horde)).unwrap();
    assert_ne!(alliance.lock().instance_id(), horde.lock().instance_id());
    let plain = ctx.registry.create_map(CONTINENT, &MapRequester::player(3).with_team(Team::Horde)).unwrap();
    assert_eq!(plain.lock().instance_id(), 0);

    assert!(matches!(ctx.registry.create_map(4242, &MapRequester::player(1)), Err(WorldError::UnknownMap(4242))));
    assert_eq!(ctx.registry.map_count(), 4);
}

#[test]
fn empty_instances_are_destroyed_after_the_unload_delay() {
    let ctx = setup_registry();
    let dungeon = ctx.registry.create_map(DUNGEON, &MapRequester::player(1)).unwrap();
    let raid = ctx.registry.create_map(RAID, &group(1)).unwrap();
    let continent = ctx.registry.create_map(CONTINENT, &MapRequester::player(1)).unwrap();
    let dungeon_key = dungeon.lock().key();
    let raid_key = raid.lock().key();

    dungeon.lock().add_player(1, Position::default()).unwrap();
    run_for(&ctx.registry, Duration::from_millis(500), Duration::from_millis(50));
    assert!(ctx.registry.find_map(DUNGEON, dungeon_key.instance_id).is_some(), "Occupied dungeon stays");
    assert!(ctx.registry.find_map(RAID, raid_key.instance_id).is_none(), "Empty raid is destroyed");
    assert!(ctx.registry.is_instance_id_in_use(raid_key.instance_id), "Lock-bound id is kept");

    dungeon.lock().remove_player(1).unwrap();
    run_for(&ctx.registry, Duration::from_millis(500), Duration::from_millis(50));
    assert!(ctx.registry.find_map(DUNGEON, dungeon_key.instance_id).is_none());
    assert!(!ctx.registry.is_instance_id_in_use(dungeon_key.instance_id), "Dungeon id is released");
    assert!(ctx.registry.find_map(CONTINENT, 0).is_some(), "Continents never unload");
    drop(continent);
}

#[test]
fn destroying_a_map_removes_its_participants() {
    let ctx = setup_registry();
    let dungeon = ctx.registry.create_map(DUNGEON, &MapRequester::player(1)).unwrap();
    let key = dungeon.lock().key();
    dungeon.lock().add_player(1, Position::new(10.0, 10.0, 0.0)).unwrap();

    assert!(ctx.registry.destroy_map(key));
    let map = dungeon.lock();
    assert_eq!(map.player_count(), 0);
    assert_eq!(map.loaded_grid_count(), 0);
    assert_eq!(ctx.registry.map_count(), 0);
}

#[test]
fn id_exhaustion_requests_shutdown() {
    let ctx = setup_registry();
    let registry = ctx.registry.with_allocator(InstanceIdAllocator::with_ceiling(3));
    registry.create_map(DUNGEON, &MapRequester::player(1)).unwrap();
    registry.create_map(DUNGEON, &MapRequester::player(2)).unwrap();
    assert!(!registry.shutdown_requested());

    let err = registry.create_map(DUNGEON, &MapRequester::player(3)).unwrap_err();
    assert!(matches!(err, WorldError::InstanceIdsExhausted));
    assert!(registry.shutdown_requested(), "Exhaustion must request an orderly shutdown");
    assert_eq!(registry.map_count(), 2);
}

#[test]
fn maps_restore_corpses_and_respawns_on_creation() {
    let persistence = InMemoryPersistence::new();
    let key = MapKey::new(CONTINENT, 0);
    persistence.add_corpse(key, CorpseRecord { guid: 900, position: Position::new(100.0, 100.0, 0.0) });
    persistence.set_respawn_time(key, 12, 1_700_000_000);
    let ctx = setup_registry_with(test_config(), persistence);

    let map = ctx.registry.create_map(CONTINENT, &MapRequester::player(1)).unwrap();
    let map = map.lock();
    assert!(map.object(900).is_some(), "Corpse should be placed on its map");
    assert_eq!(map.respawn_time(12), Some(1_700_000_000));
    assert_eq!(ctx.persistence.load_corpses(key).len(), 1, "Stored corpses are left untouched");
}

#[test]
fn do_for_all_maps_visits_each_live_map() {
    let ctx = setup_registry();
    ctx.registry.create_map(CONTINENT, &MapRequester::player(1)).unwrap();
    ctx.registry.create_map(DUNGEON, &MapRequester::player(1)).unwrap();
    ctx.registry.create_map(DUNGEON, &MapRequester::player(2)).unwrap();

    let mut all = 0;
    ctx.registry.do_for_all_maps(|_| all += 1);
    let mut dungeons = Vec::new();
    ctx.registry.do_for_all_maps_with_map_id(DUNGEON, |map| dungeons.push(map.key()));
    assert_eq!(all, 3);
    assert_eq!(dungeons.len(), 2);
    assert!(dungeons.iter().all(|k| k.map_id == DUNGEON));

    ctx.registry.unload_all();
    assert_eq!(ctx.registry.map_count(), 0);
    assert_eq!(ctx.registry.instance_ids_in_use(), 0);
}
