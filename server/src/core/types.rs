// world_map_core/server/src/core/types.rs
use serde::Deserialize;
use std::fmt;

pub type ObjectGuid = u64;
pub type MapId = u32;
pub type InstanceId = u32;

/// Identity of one live map copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MapKey {
    pub map_id: MapId,
    pub instance_id: InstanceId,
}

impl MapKey {
    pub fn new(map_id: MapId, instance_id: InstanceId) -> Self {
        MapKey { map_id, instance_id }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}:{}", self.map_id, self.instance_id)
    }
}

// --- Basic Geometric Types ---
#[derive(Clone, Debug, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32) -> Self { Position { x, y, z } }
}

// --- Object kinds ---
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Player,
    Creature,
    Corpse,
    DynamicObject,
    GameObject,
    AreaTrigger,
}

impl ObjectKind {
    pub const COUNT: usize = 6;
    pub const ALL: [ObjectKind; ObjectKind::COUNT] = [
        ObjectKind::Player,
        ObjectKind::Creature,
        ObjectKind::Corpse,
        ObjectKind::DynamicObject,
        ObjectKind::GameObject,
        ObjectKind::AreaTrigger,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether objects of this kind may live in the given container.
    pub fn storable_in(self, container: ContainerKind) -> bool {
        match container {
            ContainerKind::World => matches!(
                self,
                ObjectKind::Player | ObjectKind::Creature | ObjectKind::Corpse | ObjectKind::DynamicObject
            ),
            ContainerKind::Grid => !matches!(self, ObjectKind::Player),
        }
    }
}

/// The two disjoint containers of a grid cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    World,
    Grid,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Default)]
pub enum Team {
    #[default]
    Alliance,
    Horde,
}

/// Who an instance lock belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockOwner {
    Player(ObjectGuid),
    Group(u64),
}

/// The party asking for a map to be created or looked up.
#[derive(Clone, Debug, Default)]
pub struct MapRequester {
    pub player_guid: ObjectGuid,
    pub group_id: Option<u64>,
    pub team: Team,
    /// Assigned by the battleground collaborator before requesting a battleground/arena map.
    pub battleground_instance_id: Option<InstanceId>,
}

impl MapRequester {
    pub fn player(player_guid: ObjectGuid) -> Self {
        MapRequester { player_guid, ..Default::default() }
    }

    pub fn with_group(mut self, group_id: u64) -> Self {
        self.group_id = Some(group_id);
        self
    }

    pub fn with_team(mut self, team: Team) -> Self {
        self.team = team;
        self
    }

    pub fn with_battleground_instance(mut self, instance_id: InstanceId) -> Self {
        self.battleground_instance_id = Some(instance_id);
        self
    }

    /// Groups own locks for their members; solo players own their own.
    pub fn lock_owner(&self) -> LockOwner {
        match self.group_id {
            Some(group_id) => LockOwner::Group(group_id),
            None => LockOwner::Player(self.player_guid),
        }
    }
}
