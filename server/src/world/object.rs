// world_map_core/server/src/world/object.rs
use crate::core::types::{ContainerKind, ObjectGuid, ObjectKind, Position};

/// The spatial footprint of an entity, as seen by the grid layer.
///
/// Gameplay state lives with the owning systems; the grid only needs identity,
/// kind, position and whether the object forces nearby grids to stay loaded.
#[derive(Clone, Debug, PartialEq)]
pub struct MapObject {
    pub guid: ObjectGuid,
    pub kind: ObjectKind,
    pub container: ContainerKind,
    pub position: Position,
    pub keeps_grid_active: bool,
}

impl MapObject {
    pub fn player(guid: ObjectGuid, position: Position) -> Self {
        MapObject {
            guid,
            kind: ObjectKind::Player,
            container: ContainerKind::World,
            position,
            keeps_grid_active: false,
        }
    }

    /// Mobile actor tracked for visibility (pets, escorted npcs, vehicles).
    pub fn creature(guid: ObjectGuid, position: Position) -> Self {
        MapObject {
            guid,
            kind: ObjectKind::Creature,
            container: ContainerKind::World,
            position,
            keeps_grid_active: false,
        }
    }

    /// Object bound to its cell: static spawns, game objects, area triggers.
    pub fn grid_bound(guid: ObjectGuid, kind: ObjectKind, position: Position) -> Self {
        MapObject {
            guid,
            kind,
            container: ContainerKind::Grid,
            position,
            keeps_grid_active: false,
        }
    }

    pub fn corpse(guid: ObjectGuid, position: Position) -> Self {
        MapObject {
            guid,
            kind: ObjectKind::Corpse,
            container: ContainerKind::World,
            position,
            keeps_grid_active: false,
        }
    }

    /// Far-sight proxy; keeps the grid it looks at resident.
    pub fn far_sight(guid: ObjectGuid, position: Position) -> Self {
        MapObject {
            guid,
            kind: ObjectKind::DynamicObject,
            container: ContainerKind::World,
            position,
            keeps_grid_active: true,
        }
    }

    pub fn keeping_grid_active(mut self) -> Self {
        self.keeps_grid_active = true;
        self
    }
}
