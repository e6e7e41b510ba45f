// world_map_core/server/src/navigation/store.rs
use super::format::{self, MeshParams, NavFormatError};
use super::mesh::{NavMesh, TileRef};
use super::query::NavMeshQuery;
use crate::core::config::WorldConfig;
use crate::core::constants::DEFAULT_QUERY_MAX_NODES;
use crate::core::types::{InstanceId, MapId};
use bytes::Bytes;
use metrics::gauge;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

#[inline]
pub fn tile_key(x: u32, y: u32) -> u32 {
    (x << 16) | y
}

struct MeshEntry {
    mesh: Arc<RwLock<NavMesh>>,
    loaded_tiles: HashMap<u32, TileRef>,
    queries: HashMap<(MapId, InstanceId), Arc<Mutex<NavMeshQuery>>>,
}

impl MeshEntry {
    fn new(mesh: NavMesh) -> Self {
        MeshEntry {
            mesh: Arc::new(RwLock::new(mesh)),
            loaded_tiles: HashMap::new(),
            queries: HashMap::new(),
        }
    }
}

/// Navigation meshes per base map and query handles per map instance.
///
/// Meshes are read lazily from `<base>/mmaps/` and never duplicated. Loading
/// and unloading happen on the cold path (grid and map creation/destruction)
/// under the write lock; queries hand out their own `Arc<Mutex<_>>`.
pub struct NavMeshStore {
    enabled: bool,
    disabled_maps: HashSet<MapId>,
    parent_maps: RwLock<HashMap<MapId, MapId>>,
    meshes: RwLock<HashMap<MapId, MeshEntry>>,
    loaded_tiles: AtomicU32,
}

impl Default for NavMeshStore {
    fn default() -> Self {
        NavMeshStore::new(true, HashSet::new())
    }
}

impl NavMeshStore {
    pub fn new(enabled: bool, disabled_maps: HashSet<MapId>) -> Self {
        NavMeshStore {
            enabled,
            disabled_maps,
            parent_maps: RwLock::new(HashMap::new()),
            meshes: RwLock::new(HashMap::new()),
            loaded_tiles: AtomicU32::new(0),
        }
    }

    pub fn from_config(config: &WorldConfig) -> Self {
        NavMeshStore::new(config.pathfinding_enabled, config.pathfinding_disabled_maps.clone())
    }

    pub fn set_parent_maps(&self, links: HashMap<MapId, MapId>) {
        *self.parent_maps.write() = links;
    }

    pub fn is_enabled_for(&self, map_id: MapId) -> bool {
        self.enabled && !self.disabled_maps.contains(&map_id)
    }

    pub fn loaded_tiles_count(&self) -> u32 {
        self.loaded_tiles.load(Ordering::Acquire)
    }

    pub fn loaded_maps_count(&self) -> usize {
        self.meshes.read().len()
    }

    pub fn tile_loaded(&self, map_id: MapId, x: u32, y: u32) -> bool {
        self.meshes
            .read()
            .get(&map_id)
            .map_or(false, |entry| entry.loaded_tiles.contains_key(&tile_key(x, y)))
    }

    fn publish_tile_count(&self) {
        gauge!("world_navmesh_tiles_loaded").set(self.loaded_tiles_count() as f64);
    }

    /// Ensures the mesh of `map_id` is resident; the caller holds the write lock.
    fn load_map_data(&self, meshes: &mut HashMap<MapId, MeshEntry>, base_path: &Path, map_id: MapId) -> bool {
        if meshes.contains_key(&map_id) {
            return true;
        }
        let path = format::mesh_file_path(base_path, map_id);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("NavMeshStore: could not open mesh file {}: {}", path.display(), e);
                return false;
            }
        };
        let params = match MeshParams::decode(&raw) {
            Ok(params) => params,
            Err(e) => {
                error!("NavMeshStore: bad mesh file {}: {}", path.display(), e);
                return false;
            }
        };
        let mesh = match NavMesh::new(params) {
            Ok(mesh) => mesh,
            Err(e) => {
                error!("NavMeshStore: failed to initialize mesh for map {:03} from {}: {}", map_id, path.display(), e);
                return false;
            }
        };
        info!("NavMeshStore: loaded mesh {:03} ({} tile slots)", map_id, params.max_tiles);
        meshes.insert(map_id, MeshEntry::new(mesh));
        true
    }

    fn read_tile(&self, base_path: &Path, map_id: MapId, x: u32, y: u32) -> Option<Result<Bytes, NavFormatError>> {
        let path = format::tile_file_path(base_path, map_id, x, y);
        match std::fs::read(&path) {
            Ok(raw) => return Some(Ok(Bytes::from(raw))),
            Err(e) => debug!("NavMeshStore: could not open tile file {}: {}", path.display(), e),
        }
        let parent = *self.parent_maps.read().get(&map_id)?;
        let parent_path = format::tile_file_path(base_path, parent, x, y);
        match std::fs::read(&parent_path) {
            Ok(raw) => Some(Ok(Bytes::from(raw))),
            Err(e) => {
                debug!("NavMeshStore: could not open parent tile file {}: {}", parent_path.display(), e);
                None
            }
        }
    }

    /// Loads tile `(x, y)` of `map_id`, loading the mesh first if needed.
    /// Returns false when the tile is already loaded, missing, or rejected.
    pub fn load_map(&self, base_path: &Path, map_id: MapId, x: u32, y: u32) -> bool {
        if !self.is_enabled_for(map_id) {
            return false;
        }
        let mut meshes = self.meshes.write();
        if !self.load_map_data(&mut meshes, base_path, map_id) {
            return false;
        }
        let key = tile_key(x, y);
        let Some(entry) = meshes.get_mut(&map_id) else {
            return false;
        };
        if entry.loaded_tiles.contains_key(&key) {
            return false;
        }

        let raw = match self.read_tile(base_path, map_id, x, y) {
            Some(Ok(raw)) => raw,
            Some(Err(e)) => {
                error!("NavMeshStore: failed reading tile {:03}[{:02}, {:02}]: {}", map_id, x, y, e);
                return false;
            }
            None => return false,
        };
        let (header, payload) = match format::decode_tile(raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!("NavMeshStore: rejected tile {:03}[{:02}, {:02}]: {}", map_id, x, y, e);
                return false;
            }
        };

        match entry.mesh.write().add_tile(x as i32, y as i32, header, payload) {
            Ok(tile_ref) => {
                entry.loaded_tiles.insert(key, tile_ref);
                self.loaded_tiles.fetch_add(1, Ordering::AcqRel);
                debug!("NavMeshStore: loaded tile {:03}[{:02}, {:02}]", map_id, x, y);
            }
            Err(e) => {
                error!("NavMeshStore: could not add tile {:03}[{:02}, {:02}] to the mesh: {}", map_id, x, y, e);
                return false;
            }
        }
        drop(meshes);
        self.publish_tile_count();
        true
    }

    /// Creates the query handle of one instance over the mesh of `mesh_map_id`.
    pub fn load_map_instance(
        &self,
        base_path: &Path,
        mesh_map_id: MapId,
        instance_map_id: MapId,
        instance_id: InstanceId,
    ) -> bool {
        if !self.is_enabled_for(mesh_map_id) {
            return false;
        }
        let mut meshes = self.meshes.write();
        if !self.load_map_data(&mut meshes, base_path, mesh_map_id) {
            return false;
        }
        let Some(entry) = meshes.get_mut(&mesh_map_id) else {
            return false;
        };
        let key = (instance_map_id, instance_id);
        if entry.queries.contains_key(&key) {
            return true;
        }
        match NavMeshQuery::new(Arc::clone(&entry.mesh), DEFAULT_QUERY_MAX_NODES) {
            Some(query) => {
                entry.queries.insert(key, Arc::new(Mutex::new(query)));
                debug!(
                    "NavMeshStore: created query for mesh {:03}, map {:03} instance {}",
                    mesh_map_id, instance_map_id, instance_id
                );
                true
            }
            None => {
                error!(
                    "NavMeshStore: failed to initialize query for mesh {:03}, map {:03} instance {}",
                    mesh_map_id, instance_map_id, instance_id
                );
                false
            }
        }
    }

    /// Unloads tile `(x, y)` of `map_id`. Returns true when a tile was removed.
    /// Unloading a tile or mesh that is not loaded is logged at debug level and
    /// returns false. A tracked tile the mesh refuses to remove is fatal.
    pub fn unload_map_tile(&self, map_id: MapId, x: u32, y: u32) -> bool {
        let mut meshes = self.meshes.write();
        let Some(entry) = meshes.get_mut(&map_id) else {
            debug!("NavMeshStore: asked to unload tile of unloaded mesh {:03}", map_id);
            return false;
        };
        let key = tile_key(x, y);
        let Some(tile_ref) = entry.loaded_tiles.get(&key).copied() else {
            debug!("NavMeshStore: asked to unload unloaded tile {:03}[{:02}, {:02}]", map_id, x, y);
            return false;
        };
        if let Err(e) = entry.mesh.write().remove_tile(tile_ref) {
            error!("NavMeshStore: could not unload tracked tile {:03}[{:02}, {:02}]: {}", map_id, x, y, e);
            panic!("navigation mesh lost track of tile {:03}[{:02}, {:02}]", map_id, x, y);
        }
        entry.loaded_tiles.remove(&key);
        self.loaded_tiles.fetch_sub(1, Ordering::AcqRel);
        drop(meshes);
        self.publish_tile_count();
        debug!("NavMeshStore: unloaded tile {:03}[{:02}, {:02}]", map_id, x, y);
        true
    }

    /// Drops the mesh of `map_id` with every tile and query on it. Returns
    /// false, after a debug log, when the mesh is not loaded. A tracked tile the
    /// mesh refuses to remove is fatal.
    pub fn unload_map(&self, map_id: MapId) -> bool {
        let Some(entry) = self.meshes.write().remove(&map_id) else {
            debug!("NavMeshStore: asked to unload unloaded mesh {:03}", map_id);
            return false;
        };
        let mut mesh = entry.mesh.write();
        for (key, tile_ref) in entry.loaded_tiles {
            let (x, y) = (key >> 16, key & 0xffff);
            match mesh.remove_tile(tile_ref) {
                Ok(_) => {
                    self.loaded_tiles.fetch_sub(1, Ordering::AcqRel);
                    debug!("NavMeshStore: unloaded tile {:03}[{:02}, {:02}]", map_id, x, y);
                }
                Err(e) => {
                    error!("NavMeshStore: could not unload tracked tile {:03}[{:02}, {:02}]: {}", map_id, x, y, e);
                    panic!("navigation mesh lost track of tile {:03}[{:02}, {:02}]", map_id, x, y);
                }
            }
        }
        drop(mesh);
        self.publish_tile_count();
        info!("NavMeshStore: unloaded mesh {:03}", map_id);
        true
    }

    pub fn unload_map_instance(&self, mesh_map_id: MapId, instance_map_id: MapId, instance_id: InstanceId) -> bool {
        let mut meshes = self.meshes.write();
        let Some(entry) = meshes.get_mut(&mesh_map_id) else {
            debug!("NavMeshStore: asked to unload query of unloaded mesh {:03}", mesh_map_id);
            return false;
        };
        if entry.queries.remove(&(instance_map_id, instance_id)).is_none() {
            debug!(
                "NavMeshStore: asked to unload missing query for map {:03} instance {}",
                instance_map_id, instance_id
            );
            return false;
        }
        debug!("NavMeshStore: unloaded query for map {:03} instance {}", instance_map_id, instance_id);
        true
    }

    pub fn nav_mesh(&self, map_id: MapId) -> Option<Arc<RwLock<NavMesh>>> {
        self.meshes.read().get(&map_id).map(|entry| Arc::clone(&entry.mesh))
    }

    pub fn nav_mesh_query(
        &self,
        mesh_map_id: MapId,
        instance_map_id: MapId,
        instance_id: InstanceId,
    ) -> Option<Arc<Mutex<NavMeshQuery>>> {
        self.meshes
            .read()
            .get(&mesh_map_id)?
            .queries
            .get(&(instance_map_id, instance_id))
            .cloned()
    }
}
