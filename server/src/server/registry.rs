// world_map_core/server/src/server/registry.rs
use super::instance_lock::{InstanceLockStore, InstanceReusePolicy, NeverReuse};
use super::persistence::WorldPersistence;
use super::scheduler::MapUpdateScheduler;
use crate::concurrent::id_allocator::InstanceIdAllocator;
use crate::concurrent::thread_pools::UpdateExecutor;
use crate::core::config::WorldConfig;
use crate::core::error::{WorldError, WorldResult};
use crate::core::types::{InstanceId, LockOwner, MapId, MapKey, MapRequester};
use crate::navigation::NavMeshStore;
use crate::world::map::{Map, MapSettings};
use crate::world::template::{MapCatalog, MapTemplate};
use metrics::gauge;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub type MapRef = Arc<Mutex<Map>>;

/// Observes map ticks. `on_update` runs inside the (possibly pooled) primary
/// pass, `on_delayed_update` in the serial pass that follows it.
pub trait MapUpdateHook: Send + Sync {
    fn on_update(&self, _map: &mut Map, _diff: Duration) {}

    fn on_delayed_update(&self, _map: &mut Map, _diff: Duration) {}
}

struct RegistryState {
    maps: BTreeMap<MapKey, MapRef>,
    /// Lock owners whose lock resolves to each live instance.
    bindings: HashMap<MapKey, Vec<LockOwner>>,
    allocator: InstanceIdAllocator,
}

/// Owns every live map, hands out instance ids and drives the map tick.
pub struct MapRegistry {
    config: WorldConfig,
    settings: MapSettings,
    catalog: MapCatalog,
    state: Mutex<RegistryState>,
    scheduler: MapUpdateScheduler,
    locks: Arc<dyn InstanceLockStore>,
    persistence: Arc<dyn WorldPersistence>,
    reuse_policy: Box<dyn InstanceReusePolicy>,
    nav: Option<Arc<NavMeshStore>>,
    hooks: RwLock<Vec<Arc<dyn MapUpdateHook>>>,
    shutdown_requested: AtomicBool,
}

impl MapRegistry {
    pub fn new(
        config: WorldConfig,
        catalog: MapCatalog,
        locks: Arc<dyn InstanceLockStore>,
        persistence: Arc<dyn WorldPersistence>,
    ) -> WorldResult<Self> {
        let config = config.normalize();
        let executor = UpdateExecutor::from_config(&config.thread_pools)?;
        Ok(MapRegistry {
            settings: MapSettings::from_config(&config),
            scheduler: MapUpdateScheduler::new(executor, config.map_update_interval()),
            config,
            catalog,
            state: Mutex::new(RegistryState {
                maps: BTreeMap::new(),
                bindings: HashMap::new(),
                allocator: InstanceIdAllocator::new(),
            }),
            locks,
            persistence,
            reuse_policy: Box::new(NeverReuse),
            nav: None,
            hooks: RwLock::new(Vec::new()),
            shutdown_requested: AtomicBool::new(false),
        })
    }

    pub fn with_navigation(mut self, store: Arc<NavMeshStore>) -> Self {
        store.set_parent_maps(self.catalog.parent_map_links());
        self.nav = Some(store);
        self
    }

    pub fn with_reuse_policy(mut self, policy: Box<dyn InstanceReusePolicy>) -> Self {
        self.reuse_policy = policy;
        self
    }

    pub fn with_allocator(self, allocator: InstanceIdAllocator) -> Self {
        self.state.lock().allocator = allocator;
        self
    }

    pub fn with_map_settings(mut self, settings: MapSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn add_hook(&self, hook: Arc<dyn MapUpdateHook>) {
        self.hooks.write().push(hook);
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn catalog(&self) -> &MapCatalog {
        &self.catalog
    }

    pub fn navigation(&self) -> Option<&Arc<NavMeshStore>> {
        self.nav.as_ref()
    }

    /// Seeds the id allocator from persisted instances.
    pub fn initialize(&self) {
        let used = self.persistence.load_used_instance_ids();
        let max_id = used.iter().copied().max().unwrap_or(0);
        let mut state = self.state.lock();
        state.allocator.init(max_id);
        for id in &used {
            state.allocator.register(*id);
        }
        gauge!("world_instance_ids_in_use").set(state.allocator.in_use_count() as f64);
        info!(
            "MapRegistry initialized: {} persisted instance ids (max {}), next free id {}",
            used.len(),
            max_id,
            state.allocator.next_id()
        );
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
    }

    pub fn map_count(&self) -> usize {
        self.state.lock().maps.len()
    }

    pub fn instance_ids_in_use(&self) -> usize {
        self.state.lock().allocator.in_use_count()
    }

    pub fn is_instance_id_in_use(&self, instance_id: InstanceId) -> bool {
        self.state.lock().allocator.is_in_use(instance_id)
    }

    // --- instance ids ---

    fn allocate_id(&self, state: &mut RegistryState) -> WorldResult<InstanceId> {
        match state.allocator.generate() {
            Ok(id) => {
                gauge!("world_instance_ids_in_use").set(state.allocator.in_use_count() as f64);
                Ok(id)
            }
            Err(e) => {
                error!("Instance id space exhausted, requesting server shutdown");
                self.request_shutdown();
                Err(e)
            }
        }
    }

    /// Id for a map the caller builds itself, e.g. a battleground.
    pub fn generate_instance_id(&self) -> WorldResult<InstanceId> {
        let mut state = self.state.lock();
        self.allocate_id(&mut state)
    }

    pub fn free_instance_id(&self, instance_id: InstanceId) {
        let mut state = self.state.lock();
        state.allocator.free(instance_id);
        gauge!("world_instance_ids_in_use").set(state.allocator.in_use_count() as f64);
    }

    // --- lookup ---

    pub fn find_map(&self, map_id: MapId, instance_id: InstanceId) -> Option<MapRef> {
        self.state.lock().maps.get(&MapKey::new(map_id, instance_id)).cloned()
    }

    /// Live maps in key order. The registry lock is released before returning.
    pub fn snapshot(&self) -> Vec<(MapKey, MapRef)> {
        self.state
            .lock()
            .maps
            .iter()
            .map(|(key, map)| (*key, Arc::clone(map)))
            .collect()
    }

    pub fn do_for_all_maps<F: FnMut(&mut Map)>(&self, mut f: F) {
        for (_, map) in self.snapshot() {
            f(&mut map.lock());
        }
    }

    pub fn do_for_all_maps_with_map_id<F: FnMut(&mut Map)>(&self, map_id: MapId, mut f: F) {
        for (key, map) in self.snapshot() {
            if key.map_id == map_id {
                f(&mut map.lock());
            }
        }
    }

    pub(crate) fn hooks(&self) -> Vec<Arc<dyn MapUpdateHook>> {
        self.hooks.read().clone()
    }

    // --- creation ---

    pub fn create_map(&self, map_id: MapId, requester: &MapRequester) -> WorldResult<MapRef> {
        let Some(template) = self.catalog.get(map_id) else {
            error!("create_map: no template for map {}", map_id);
            return Err(WorldError::UnknownMap(map_id));
        };
        let mut state = self.state.lock();

        if template.is_battleground_or_arena() {
            let instance_id = requester
                .battleground_instance_id
                .ok_or(WorldError::MissingBattlegroundInstance { map_id })?;
            return Ok(self.find_or_construct(&mut state, template, instance_id, None));
        }
        if template.is_instanceable() {
            return self.create_instance(&mut state, template, requester);
        }
        let instance_id = template.continent_instance_id(requester.team);
        Ok(self.find_or_construct(&mut state, template, instance_id, None))
    }

    fn create_instance(
        &self,
        state: &mut RegistryState,
        template: &MapTemplate,
        requester: &MapRequester,
    ) -> WorldResult<MapRef> {
        let owner = requester.lock_owner();
        let map_id = template.id;

        let Some(lock) = self.locks.find_lock(owner, map_id) else {
            return self.bind_new_lock(state, template, requester);
        };

        let key = MapKey::new(map_id, lock.instance_id);
        let bound = state.bindings.get(&key).map_or(false, |owners| owners.contains(&owner));
        match state.maps.get(&key) {
            Some(map) if bound => return Ok(Arc::clone(map)),
            Some(_) if template.lock_bound => warn!(
                "Instance {} is bound to another lock than {:?}, moving the lock to a fresh instance",
                key, owner
            ),
            // dungeon ids are recycled once their map is destroyed
            Some(_) => debug!("Instance id of {} was reused by another party, moving {:?}'s lock", key, owner),
            None => debug!("Instance {} of {:?}'s lock is not live, moving the lock to a fresh instance", key, owner),
        }
        let map_missing = !state.maps.contains_key(&key);

        let instance_id = self.allocate_id(state)?;
        self.locks.rebind_lock(owner, map_id, instance_id);
        // other instanceable ids were already released by destroy_map
        if template.lock_bound && map_missing && !self.locks.is_instance_referenced(map_id, lock.instance_id) {
            state.allocator.free(lock.instance_id);
        }
        if !template.lock_bound {
            self.reuse_policy.record_instance(requester, map_id, instance_id);
        }
        Ok(self.find_or_construct(state, template, instance_id, Some(owner)))
    }

    /// First request of a party without a lock. A non lock-bound dungeon may
    /// join a live copy offered by the reuse policy; otherwise a new id is
    /// allocated. Either way the party leaves with a lock.
    fn bind_new_lock(
        &self,
        state: &mut RegistryState,
        template: &MapTemplate,
        requester: &MapRequester,
    ) -> WorldResult<MapRef> {
        let owner = requester.lock_owner();
        let map_id = template.id;

        if !template.lock_bound {
            if let Some(reused) = self.reuse_policy.reusable_instance(requester, map_id) {
                let key = MapKey::new(map_id, reused);
                if let Some(map) = state.maps.get(&key).cloned() {
                    self.locks.create_lock(owner, map_id, reused);
                    state.bindings.entry(key).or_default().push(owner);
                    info!("Bound {:?} to live instance {}", owner, key);
                    return Ok(map);
                }
            }
        }

        let instance_id = self.allocate_id(state)?;
        self.locks.create_lock(owner, map_id, instance_id);
        if !template.lock_bound {
            self.reuse_policy.record_instance(requester, map_id, instance_id);
        }
        info!("Bound {:?} to new instance {:03}:{}", owner, map_id, instance_id);
        Ok(self.find_or_construct(state, template, instance_id, Some(owner)))
    }

    fn find_or_construct(
        &self,
        state: &mut RegistryState,
        template: &MapTemplate,
        instance_id: InstanceId,
        owner: Option<LockOwner>,
    ) -> MapRef {
        let key = MapKey::new(template.id, instance_id);
        if let Some(map) = state.maps.get(&key) {
            return Arc::clone(map);
        }
        let map = Arc::new(Mutex::new(self.construct_map(key, template, owner)));
        state.maps.insert(key, Arc::clone(&map));
        if let Some(owner) = owner {
            state.bindings.insert(key, vec![owner]);
        }
        gauge!("world_maps_live").set(state.maps.len() as f64);
        map
    }

    fn construct_map(&self, key: MapKey, template: &MapTemplate, owner: Option<LockOwner>) -> Map {
        let mut map = Map::new(key, template.clone(), self.settings.clone(), self.nav.clone());
        map.set_lock_owner(owner);
        map.load_respawn_times(self.persistence.load_respawn_times(key));
        let corpses = self.persistence.load_corpses(key);
        if !corpses.is_empty() {
            let placed = map.load_corpses(corpses.into_iter().map(|c| c.to_object()));
            debug!("Map {} restored {} corpses", key, placed);
        }
        let preload = if template.is_continent() {
            self.config.preload_base_maps
        } else {
            self.config.preload_instance_maps
        };
        if preload {
            map.load_all_grids();
        }
        map
    }

    // --- destruction ---

    /// Removes a map from the registry and tears it down. Returns false when
    /// no map is registered under `key`.
    pub fn destroy_map(&self, key: MapKey) -> bool {
        let (map, nav_map_id, last_of_nav_map) = {
            let mut state = self.state.lock();
            let Some(map) = state.maps.remove(&key) else {
                debug!("destroy_map: {} is not live", key);
                return false;
            };
            state.bindings.remove(&key);
            let Some(template) = self.catalog.get(key.map_id) else {
                error!("destroy_map: {} has no template", key);
                return false;
            };
            if template.frees_instance_id_on_destroy() && key.instance_id != 0 {
                state.allocator.free(key.instance_id);
            }
            let nav_map_id = template.navigation_map_id();
            let last = !state.maps.keys().any(|other| {
                self.catalog
                    .get(other.map_id)
                    .map_or(false, |t| t.navigation_map_id() == nav_map_id)
            });
            gauge!("world_maps_live").set(state.maps.len() as f64);
            gauge!("world_instance_ids_in_use").set(state.allocator.in_use_count() as f64);
            (map, nav_map_id, last)
        };

        map.lock().unload_all();
        if let Some(store) = &self.nav {
            store.unload_map_instance(nav_map_id, key.map_id, key.instance_id);
            if last_of_nav_map {
                store.unload_map(nav_map_id);
            }
        }
        self.reuse_policy.forget_instance(key.map_id, key.instance_id);
        info!("Map {} destroyed", key);
        true
    }

    /// Destroys every map whose unload timer has run out.
    pub(crate) fn destroy_unloadable(&self, diff: Duration) -> usize {
        let mut destroyed = 0;
        for (key, map) in self.snapshot() {
            let unloadable = map.lock().can_unload(diff);
            if unloadable && self.destroy_map(key) {
                destroyed += 1;
            }
        }
        destroyed
    }

    /// Tears down every map; used at shutdown.
    pub fn unload_all(&self) {
        let keys: Vec<MapKey> = self.snapshot().into_iter().map(|(key, _)| key).collect();
        for key in &keys {
            self.destroy_map(*key);
        }
        info!("MapRegistry unloaded {} maps", keys.len());
    }

    // --- ticking ---

    /// Feeds elapsed time to the scheduler. Returns true when a tick ran.
    pub fn update(&self, diff: Duration) -> bool {
        self.scheduler.update(self, diff)
    }

    pub fn scheduler(&self) -> &MapUpdateScheduler {
        &self.scheduler
    }
}
