// world_map_core/server/src/core/constants.rs
use std::time::Duration;

// Grid geometry
pub const MAX_NUMBER_OF_GRIDS: u32 = 64;
pub const SIZE_OF_GRIDS: f32 = 533.333_3;
pub const CENTER_GRID_ID: u32 = MAX_NUMBER_OF_GRIDS / 2;
pub const CENTER_GRID_OFFSET: f32 = SIZE_OF_GRIDS / 2.0;

pub const MAX_NUMBER_OF_CELLS: u32 = 8;
pub const SIZE_OF_GRID_CELL: f32 = SIZE_OF_GRIDS / MAX_NUMBER_OF_CELLS as f32;
pub const CENTER_GRID_CELL_ID: u32 = MAX_NUMBER_OF_CELLS * MAX_NUMBER_OF_GRIDS / 2;
pub const CENTER_GRID_CELL_OFFSET: f32 = SIZE_OF_GRID_CELL / 2.0;
pub const TOTAL_NUMBER_OF_CELLS_PER_MAP: u32 = MAX_NUMBER_OF_GRIDS * MAX_NUMBER_OF_CELLS;

pub const MAP_SIZE: f32 = SIZE_OF_GRIDS * MAX_NUMBER_OF_GRIDS as f32;
pub const MAP_HALFSIZE: f32 = MAP_SIZE / 2.0;

// Grid lifecycle
pub const DEFAULT_GRID_EXPIRY: Duration = Duration::from_secs(5 * 60);
pub const ACTIVE_GRID_RECHECK_FACTOR: f32 = 0.1;
pub const DEFAULT_RELOCATION_PERIOD: Duration = Duration::from_millis(1000);

// Scheduler
pub const DEFAULT_MAP_UPDATE_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_INSTANCE_UNLOAD_DELAY: Duration = Duration::from_secs(30 * 60);
pub const SLOW_MAP_UPDATE_LOG_MS: u64 = 50;

// Instance ids
pub const INSTANCE_ID_CEILING: u32 = u32::MAX;
pub const CONTINENT_INSTANCE_ID: u32 = 0;

// Navigation mesh files
pub const MMAP_MAGIC: u32 = 0x4d4d_4150; // 'MMAP'
pub const MMAP_VERSION: u32 = 15;
pub const NAVMESH_DATA_VERSION: u32 = 7;
pub const MESH_PARAMS_SIZE: usize = 28;
pub const TILE_HEADER_SIZE: usize = 20;
pub const DEFAULT_QUERY_MAX_NODES: usize = 1024;
// one tile per grid
pub const MAX_MESH_TILES: i32 = (MAX_NUMBER_OF_GRIDS * MAX_NUMBER_OF_GRIDS) as i32;
pub const MMAPS_DIRECTORY: &str = "mmaps";
