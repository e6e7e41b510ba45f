// world_map_core/server/src/world/cell.rs
use super::object::MapObject;
use crate::core::error::{WorldError, WorldResult};
use crate::core::types::{ContainerKind, ObjectGuid, ObjectKind};
use ahash::AHashMap;

/// Selects which container of a cell a visit walks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VisitMask(pub u8);

impl VisitMask {
    pub const WORLD_OBJECTS: VisitMask = VisitMask(0b01);
    pub const GRID_OBJECTS: VisitMask = VisitMask(0b10);

    pub fn container(self) -> WorldResult<ContainerKind> {
        match self {
            VisitMask::WORLD_OBJECTS => Ok(ContainerKind::World),
            VisitMask::GRID_OBJECTS => Ok(ContainerKind::Grid),
            VisitMask(other) => Err(WorldError::UnsupportedVisitMask(other)),
        }
    }
}

/// Objects bucketed by kind so insert, remove and per-kind counts are O(1).
#[derive(Debug)]
pub struct TypeContainer {
    buckets: [AHashMap<ObjectGuid, MapObject>; ObjectKind::COUNT],
}

impl TypeContainer {
    pub fn new() -> Self {
        TypeContainer {
            buckets: std::array::from_fn(|_| AHashMap::new()),
        }
    }

    /// Returns false when an object with the same guid and kind is already stored.
    pub fn insert(&mut self, object: MapObject) -> bool {
        let bucket = &mut self.buckets[object.kind.index()];
        if bucket.contains_key(&object.guid) {
            return false;
        }
        bucket.insert(object.guid, object);
        true
    }

    pub fn remove(&mut self, kind: ObjectKind, guid: ObjectGuid) -> Option<MapObject> {
        self.buckets[kind.index()].remove(&guid)
    }

    pub fn get(&self, kind: ObjectKind, guid: ObjectGuid) -> Option<&MapObject> {
        self.buckets[kind.index()].get(&guid)
    }

    pub fn get_mut(&mut self, kind: ObjectKind, guid: ObjectGuid) -> Option<&mut MapObject> {
        self.buckets[kind.index()].get_mut(&guid)
    }

    pub fn count(&self, kind: ObjectKind) -> usize {
        self.buckets[kind.index()].len()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|bucket| bucket.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = &MapObject> {
        self.buckets.iter().flat_map(|bucket| bucket.values())
    }

    pub fn drain(&mut self) -> Vec<MapObject> {
        self.buckets
            .iter_mut()
            .flat_map(|bucket| bucket.drain().map(|(_, object)| object))
            .collect()
    }
}

impl Default for TypeContainer {
    fn default() -> Self {
        Self::new()
    }
}

/// Smallest spatial unit: world-visible objects and grid-bound objects.
#[derive(Debug, Default)]
pub struct GridCell {
    world_objects: TypeContainer,
    grid_objects: TypeContainer,
}

impl GridCell {
    pub fn new() -> Self {
        GridCell::default()
    }

    fn container(&self, container: ContainerKind) -> &TypeContainer {
        match container {
            ContainerKind::World => &self.world_objects,
            ContainerKind::Grid => &self.grid_objects,
        }
    }

    fn container_mut(&mut self, container: ContainerKind) -> &mut TypeContainer {
        match container {
            ContainerKind::World => &mut self.world_objects,
            ContainerKind::Grid => &mut self.grid_objects,
        }
    }

    pub fn insert(&mut self, object: MapObject) -> WorldResult<()> {
        if !object.kind.storable_in(object.container) {
            return Err(WorldError::NotStorable {
                guid: object.guid,
                kind: object.kind,
                container: object.container,
            });
        }
        let guid = object.guid;
        if !self.container_mut(object.container).insert(object) {
            return Err(WorldError::DuplicateObject(guid));
        }
        Ok(())
    }

    pub fn remove(&mut self, container: ContainerKind, kind: ObjectKind, guid: ObjectGuid) -> Option<MapObject> {
        self.container_mut(container).remove(kind, guid)
    }

    pub fn get(&self, container: ContainerKind, kind: ObjectKind, guid: ObjectGuid) -> Option<&MapObject> {
        self.container(container).get(kind, guid)
    }

    pub fn get_mut(&mut self, container: ContainerKind, kind: ObjectKind, guid: ObjectGuid) -> Option<&mut MapObject> {
        self.container_mut(container).get_mut(kind, guid)
    }

    pub fn count(&self, container: ContainerKind, kind: ObjectKind) -> usize {
        self.container(container).count(kind)
    }

    pub fn object_count(&self) -> usize {
        self.world_objects.len() + self.grid_objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.world_objects.is_empty() && self.grid_objects.is_empty()
    }

    /// World objects first, then grid-bound objects.
    pub fn objects(&self) -> impl Iterator<Item = &MapObject> {
        self.world_objects.iter().chain(self.grid_objects.iter())
    }

    pub fn visit<F>(&self, mask: VisitMask, visitor: &mut F) -> WorldResult<()>
    where
        F: FnMut(&MapObject),
    {
        let container = mask.container()?;
        self.container(container).iter().for_each(|object| visitor(object));
        Ok(())
    }

    pub fn drain(&mut self) -> Vec<MapObject> {
        let mut out = self.world_objects.drain();
        out.extend(self.grid_objects.drain());
        out
    }
}
