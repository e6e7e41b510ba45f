// world_map_core/server/src/navigation/mesh.rs
use super::format::{MeshParams, TileHeader};
use ahash::AHashMap;
use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NavMeshError {
    #[error("Invalid mesh parameters")]
    InvalidParams,

    #[error("No free tile slot left")]
    OutOfSlots,

    #[error("Tile location ({x}, {y}) is already occupied")]
    AlreadyOccupied { x: i32, y: i32 },

    #[error("Tile reference {0:?} is stale or invalid")]
    InvalidRef(TileRef),
}

/// Salted slot handle; once its tile is removed the slot salt changes and the
/// ref no longer resolves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileRef(u64);

impl TileRef {
    fn new(salt: u32, index: usize) -> Self {
        TileRef(((salt as u64) << 32) | index as u64)
    }

    fn salt(self) -> u32 {
        (self.0 >> 32) as u32
    }

    fn index(self) -> usize {
        (self.0 & 0xffff_ffff) as usize
    }
}

#[derive(Debug, Clone)]
pub struct MeshTile {
    pub x: i32,
    pub y: i32,
    pub header: TileHeader,
    pub data: Bytes,
}

#[derive(Debug)]
struct TileSlot {
    salt: u32,
    tile: Option<MeshTile>,
}

/// Tile table of one base map's navigation mesh.
#[derive(Debug)]
pub struct NavMesh {
    params: MeshParams,
    slots: Vec<TileSlot>,
    free_slots: Vec<usize>,
    locations: AHashMap<(i32, i32), usize>,
}

impl NavMesh {
    pub fn new(params: MeshParams) -> Result<Self, NavMeshError> {
        if params.validate().is_err() {
            return Err(NavMeshError::InvalidParams);
        }
        let max_tiles = params.max_tiles as usize;
        Ok(NavMesh {
            params,
            slots: (0..max_tiles).map(|_| TileSlot { salt: 1, tile: None }).collect(),
            // popped from the back, so slot 0 is handed out first
            free_slots: (0..max_tiles).rev().collect(),
            locations: AHashMap::new(),
        })
    }

    pub fn params(&self) -> &MeshParams {
        &self.params
    }

    pub fn max_tiles(&self) -> usize {
        self.slots.len()
    }

    pub fn tile_count(&self) -> usize {
        self.locations.len()
    }

    pub fn add_tile(&mut self, x: i32, y: i32, header: TileHeader, data: Bytes) -> Result<TileRef, NavMeshError> {
        if self.locations.contains_key(&(x, y)) {
            return Err(NavMeshError::AlreadyOccupied { x, y });
        }
        let index = self.free_slots.pop().ok_or(NavMeshError::OutOfSlots)?;
        let slot = &mut self.slots[index];
        slot.tile = Some(MeshTile { x, y, header, data });
        self.locations.insert((x, y), index);
        Ok(TileRef::new(slot.salt, index))
    }

    pub fn remove_tile(&mut self, tile_ref: TileRef) -> Result<MeshTile, NavMeshError> {
        let index = tile_ref.index();
        let slot = self
            .slots
            .get_mut(index)
            .filter(|slot| slot.salt == tile_ref.salt() && slot.tile.is_some())
            .ok_or(NavMeshError::InvalidRef(tile_ref))?;
        let tile = slot.tile.take().ok_or(NavMeshError::InvalidRef(tile_ref))?;
        slot.salt = slot.salt.wrapping_add(1).max(1);
        self.locations.remove(&(tile.x, tile.y));
        self.free_slots.push(index);
        Ok(tile)
    }

    pub fn tile_at(&self, x: i32, y: i32) -> Option<&MeshTile> {
        let index = *self.locations.get(&(x, y))?;
        self.slots[index].tile.as_ref()
    }

    pub fn tile_ref_at(&self, x: i32, y: i32) -> Option<TileRef> {
        let index = *self.locations.get(&(x, y))?;
        Some(TileRef::new(self.slots[index].salt, index))
    }

    /// Tile location containing the world position; `z` is the horizontal axis
    /// paired with `x` in mesh space.
    pub fn calc_tile_loc(&self, x: f32, z: f32) -> (i32, i32) {
        let tx = ((x - self.params.origin[0]) / self.params.tile_width).floor() as i32;
        let ty = ((z - self.params.origin[2]) / self.params.tile_height).floor() as i32;
        (tx, ty)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &MeshTile> {
        self.slots.iter().filter_map(|slot| slot.tile.as_ref())
    }
}
