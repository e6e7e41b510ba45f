// world_map_core/server/src/server/persistence.rs
use crate::core::types::{InstanceId, MapKey, ObjectGuid, Position};
use crate::world::object::MapObject;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CorpseRecord {
    pub guid: ObjectGuid,
    pub position: Position,
}

impl CorpseRecord {
    pub fn to_object(self) -> MapObject {
        MapObject::corpse(self.guid, self.position)
    }
}

/// Read side of world persistence used while maps are created.
pub trait WorldPersistence: Send + Sync {
    /// Respawn timestamps of spawned objects, by guid.
    fn load_respawn_times(&self, key: MapKey) -> HashMap<ObjectGuid, u64>;

    fn load_corpses(&self, key: MapKey) -> Vec<CorpseRecord>;

    /// Instance ids still referenced by saved instances; seeds the allocator.
    fn load_used_instance_ids(&self) -> Vec<InstanceId>;
}

#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    respawn_times: DashMap<MapKey, HashMap<ObjectGuid, u64>>,
    corpses: DashMap<MapKey, Vec<CorpseRecord>>,
    used_instance_ids: Mutex<Vec<InstanceId>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_respawn_time(&self, key: MapKey, guid: ObjectGuid, respawn_at: u64) {
        self.respawn_times.entry(key).or_default().insert(guid, respawn_at);
    }

    pub fn add_corpse(&self, key: MapKey, corpse: CorpseRecord) {
        self.corpses.entry(key).or_default().push(corpse);
    }

    pub fn set_used_instance_ids(&self, ids: Vec<InstanceId>) {
        *self.used_instance_ids.lock() = ids;
    }
}

impl WorldPersistence for InMemoryPersistence {
    fn load_respawn_times(&self, key: MapKey) -> HashMap<ObjectGuid, u64> {
        self.respawn_times.get(&key).map(|entry| entry.value().clone()).unwrap_or_default()
    }

    fn load_corpses(&self, key: MapKey) -> Vec<CorpseRecord> {
        self.corpses.get(&key).map(|entry| entry.value().clone()).unwrap_or_default()
    }

    fn load_used_instance_ids(&self) -> Vec<InstanceId> {
        self.used_instance_ids.lock().clone()
    }
}
