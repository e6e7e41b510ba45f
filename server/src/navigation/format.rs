// world_map_core/server/src/navigation/format.rs
//! On-disk layout of navigation mesh files.
//!
//! `mmaps/MMM.mmap` holds the mesh parameters, `mmaps/MMMXXYY.mmtile` holds one
//! tile: a fixed little-endian header followed by the opaque tile payload.
use crate::core::constants::{
    MAX_MESH_TILES, MESH_PARAMS_SIZE, MMAPS_DIRECTORY, MMAP_MAGIC, MMAP_VERSION, NAVMESH_DATA_VERSION,
    TILE_HEADER_SIZE,
};
use crate::core::types::MapId;
use bytes::{Buf, BufMut, Bytes};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NavFormatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Expected at least {expected} bytes, found {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("Bad magic {0:#010x}")]
    BadMagic(u32),

    #[error("Format version {found} does not match {expected}")]
    FormatVersion { found: u32, expected: u32 },

    #[error("Data version {found} does not match {expected}")]
    DataVersion { found: u32, expected: u32 },

    #[error("Payload declares {declared} bytes but only {available} are present")]
    Truncated { declared: usize, available: usize },

    #[error("Invalid mesh parameters: {0}")]
    InvalidParams(String),
}

pub fn mesh_file_path(base_path: &Path, map_id: MapId) -> PathBuf {
    base_path.join(MMAPS_DIRECTORY).join(format!("{:03}.mmap", map_id))
}

pub fn tile_file_path(base_path: &Path, map_id: MapId, x: u32, y: u32) -> PathBuf {
    base_path
        .join(MMAPS_DIRECTORY)
        .join(format!("{:03}{:02}{:02}.mmtile", map_id, x, y))
}

/// `f32 origin[3]; f32 tile_width; f32 tile_height; i32 max_tiles; i32 max_polys`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshParams {
    pub origin: [f32; 3],
    pub tile_width: f32,
    pub tile_height: f32,
    pub max_tiles: i32,
    pub max_polys: i32,
}

impl MeshParams {
    pub fn decode(mut buf: &[u8]) -> Result<Self, NavFormatError> {
        if buf.len() < MESH_PARAMS_SIZE {
            return Err(NavFormatError::TooShort { expected: MESH_PARAMS_SIZE, actual: buf.len() });
        }
        let origin = [buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()];
        let params = MeshParams {
            origin,
            tile_width: buf.get_f32_le(),
            tile_height: buf.get_f32_le(),
            max_tiles: buf.get_i32_le(),
            max_polys: buf.get_i32_le(),
        };
        params.validate()?;
        Ok(params)
    }

    /// Tile slots are allocated up front, so `max_tiles` must lie in
    /// `1..=MAX_MESH_TILES`.
    pub fn validate(&self) -> Result<(), NavFormatError> {
        if self.max_tiles <= 0 || self.max_tiles > MAX_MESH_TILES {
            return Err(NavFormatError::InvalidParams(format!("max_tiles {}", self.max_tiles)));
        }
        if !(self.tile_width > 0.0 && self.tile_height > 0.0) {
            return Err(NavFormatError::InvalidParams(format!(
                "tile size {}x{}",
                self.tile_width, self.tile_height
            )));
        }
        Ok(())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MESH_PARAMS_SIZE);
        for v in self.origin {
            out.put_f32_le(v);
        }
        out.put_f32_le(self.tile_width);
        out.put_f32_le(self.tile_height);
        out.put_i32_le(self.max_tiles);
        out.put_i32_le(self.max_polys);
        out
    }
}

/// `u32 magic; u32 data_version; u32 format_version; u32 payload_size; u8 uses_liquids` plus 3 pad bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileHeader {
    pub magic: u32,
    pub data_version: u32,
    pub format_version: u32,
    pub payload_size: u32,
    pub uses_liquids: bool,
}

impl TileHeader {
    pub fn new(payload_size: u32, uses_liquids: bool) -> Self {
        TileHeader {
            magic: MMAP_MAGIC,
            data_version: NAVMESH_DATA_VERSION,
            format_version: MMAP_VERSION,
            payload_size,
            uses_liquids,
        }
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, NavFormatError> {
        if buf.len() < TILE_HEADER_SIZE {
            return Err(NavFormatError::TooShort { expected: TILE_HEADER_SIZE, actual: buf.len() });
        }
        Ok(TileHeader {
            magic: buf.get_u32_le(),
            data_version: buf.get_u32_le(),
            format_version: buf.get_u32_le(),
            payload_size: buf.get_u32_le(),
            uses_liquids: buf.get_u8() != 0,
        })
    }

    pub fn validate(&self) -> Result<(), NavFormatError> {
        if self.magic != MMAP_MAGIC {
            return Err(NavFormatError::BadMagic(self.magic));
        }
        if self.format_version != MMAP_VERSION {
            return Err(NavFormatError::FormatVersion { found: self.format_version, expected: MMAP_VERSION });
        }
        if self.data_version != NAVMESH_DATA_VERSION {
            return Err(NavFormatError::DataVersion {
                found: self.data_version,
                expected: NAVMESH_DATA_VERSION,
            });
        }
        Ok(())
    }

    pub fn encode_into<B: BufMut>(&self, out: &mut B) {
        out.put_u32_le(self.magic);
        out.put_u32_le(self.data_version);
        out.put_u32_le(self.format_version);
        out.put_u32_le(self.payload_size);
        out.put_u8(self.uses_liquids as u8);
        out.put_bytes(0, 3);
    }
}

/// Decodes a full tile file, returning the header and exactly `payload_size` bytes.
pub fn decode_tile(raw: Bytes) -> Result<(TileHeader, Bytes), NavFormatError> {
    let header = TileHeader::decode(&raw)?;
    header.validate()?;
    let available = raw.len() - TILE_HEADER_SIZE;
    let declared = header.payload_size as usize;
    if declared > available {
        return Err(NavFormatError::Truncated { declared, available });
    }
    let payload = raw.slice(TILE_HEADER_SIZE..TILE_HEADER_SIZE + declared);
    Ok((header, payload))
}

pub fn encode_tile(header: &TileHeader, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(TILE_HEADER_SIZE + payload.len());
    header.encode_into(&mut out);
    out.extend_from_slice(payload);
    out
}
