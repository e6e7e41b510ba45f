// world_map_core/server/src/world/coords.rs
use crate::core::constants::{
    CENTER_GRID_CELL_ID, CENTER_GRID_CELL_OFFSET, CENTER_GRID_ID, CENTER_GRID_OFFSET, MAP_HALFSIZE,
    MAX_NUMBER_OF_CELLS, MAX_NUMBER_OF_GRIDS, SIZE_OF_GRIDS, SIZE_OF_GRID_CELL,
    TOTAL_NUMBER_OF_CELLS_PER_MAP,
};
use crate::core::error::{WorldError, WorldResult};
use smallvec::SmallVec;

#[inline]
fn compute(x: f32, y: f32, center_offset: f32, size: f32, center_val: u32) -> (i64, i64) {
    // double precision so results match the offline content tools
    let x_offset = (x as f64 - center_offset as f64) / size as f64;
    let y_offset = (y as f64 - center_offset as f64) / size as f64;
    let x_val = (x_offset + center_val as f64 + 0.5).floor() as i64;
    let y_val = (y_offset + center_val as f64 + 0.5).floor() as i64;
    (x_val, y_val)
}

pub fn is_valid_map_coord(x: f32, y: f32) -> bool {
    x.is_finite() && y.is_finite() && x.abs() <= MAP_HALFSIZE - 0.5 && y.abs() <= MAP_HALFSIZE - 0.5
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridCoord {
    pub x: u32,
    pub y: u32,
}

impl GridCoord {
    pub fn new(x: u32, y: u32) -> WorldResult<Self> {
        if x >= MAX_NUMBER_OF_GRIDS || y >= MAX_NUMBER_OF_GRIDS {
            return Err(WorldError::InvalidGrid { x, y });
        }
        Ok(GridCoord { x, y })
    }

    pub fn from_world(x: f32, y: f32) -> WorldResult<Self> {
        if !is_valid_map_coord(x, y) {
            return Err(WorldError::InvalidCoordinate { x, y });
        }
        let (gx, gy) = compute(x, y, CENTER_GRID_OFFSET, SIZE_OF_GRIDS, CENTER_GRID_ID);
        if gx < 0 || gy < 0 || gx >= MAX_NUMBER_OF_GRIDS as i64 || gy >= MAX_NUMBER_OF_GRIDS as i64 {
            return Err(WorldError::InvalidCoordinate { x, y });
        }
        Ok(GridCoord { x: gx as u32, y: gy as u32 })
    }

    /// Index into a row-major `MAX_NUMBER_OF_GRIDS²` matrix.
    #[inline]
    pub fn index(&self) -> usize {
        (self.y * MAX_NUMBER_OF_GRIDS + self.x) as usize
    }

    /// This grid and its up to eight neighbours.
    pub fn with_neighbors(&self) -> SmallVec<[GridCoord; 9]> {
        let mut out = SmallVec::new();
        let max = MAX_NUMBER_OF_GRIDS - 1;
        for y in self.y.saturating_sub(1)..=(self.y + 1).min(max) {
            for x in self.x.saturating_sub(1)..=(self.x + 1).min(max) {
                out.push(GridCoord { x, y });
            }
        }
        out
    }

    /// Whether `other` is this grid or one of its neighbours.
    pub fn is_adjacent_or_same(&self, other: &GridCoord) -> bool {
        self.x.abs_diff(other.x) <= 1 && self.y.abs_diff(other.y) <= 1
    }
}

/// Global cell coordinate within a map (`TOTAL_NUMBER_OF_CELLS_PER_MAP²`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellCoord {
    pub x: u32,
    pub y: u32,
}

impl CellCoord {
    pub fn from_world(x: f32, y: f32) -> WorldResult<Self> {
        if !is_valid_map_coord(x, y) {
            return Err(WorldError::InvalidCoordinate { x, y });
        }
        let (cx, cy) = compute(x, y, CENTER_GRID_CELL_OFFSET, SIZE_OF_GRID_CELL, CENTER_GRID_CELL_ID);
        let total = TOTAL_NUMBER_OF_CELLS_PER_MAP as i64;
        if cx < 0 || cy < 0 || cx >= total || cy >= total {
            return Err(WorldError::InvalidCoordinate { x, y });
        }
        Ok(CellCoord { x: cx as u32, y: cy as u32 })
    }

    /// Like `from_world`, but clamps to the cell matrix instead of failing.
    pub fn from_world_clamped(x: f32, y: f32) -> Self {
        let (cx, cy) = compute(x, y, CENTER_GRID_CELL_OFFSET, SIZE_OF_GRID_CELL, CENTER_GRID_CELL_ID);
        let max = TOTAL_NUMBER_OF_CELLS_PER_MAP as i64 - 1;
        CellCoord {
            x: cx.clamp(0, max) as u32,
            y: cy.clamp(0, max) as u32,
        }
    }

    #[inline]
    pub fn grid(&self) -> GridCoord {
        GridCoord {
            x: self.x / MAX_NUMBER_OF_CELLS,
            y: self.y / MAX_NUMBER_OF_CELLS,
        }
    }

    /// Cell position inside its grid.
    #[inline]
    pub fn local(&self) -> (u32, u32) {
        (self.x % MAX_NUMBER_OF_CELLS, self.y % MAX_NUMBER_OF_CELLS)
    }

    #[inline]
    pub fn local_index(&self) -> usize {
        let (lx, ly) = self.local();
        (ly * MAX_NUMBER_OF_CELLS + lx) as usize
    }
}

/// Inclusive rectangle of cells, used for range visits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellArea {
    pub low: CellCoord,
    pub high: CellCoord,
}

impl CellArea {
    pub fn around(x: f32, y: f32, radius: f32) -> Self {
        let radius = radius.max(0.0);
        CellArea {
            low: CellCoord::from_world_clamped(x - radius, y - radius),
            high: CellCoord::from_world_clamped(x + radius, y + radius),
        }
    }

    pub fn contains(&self, cell: &CellCoord) -> bool {
        (self.low.x..=self.high.x).contains(&cell.x) && (self.low.y..=self.high.y).contains(&cell.y)
    }

    pub fn cells(&self) -> impl Iterator<Item = CellCoord> + '_ {
        (self.low.y..=self.high.y)
            .flat_map(move |y| (self.low.x..=self.high.x).map(move |x| CellCoord { x, y }))
    }

    /// Grids touched by this area, in row-major order.
    pub fn grids(&self) -> impl Iterator<Item = GridCoord> {
        let low = self.low.grid();
        let high = self.high.grid();
        (low.y..=high.y).flat_map(move |y| (low.x..=high.x).map(move |x| GridCoord { x, y }))
    }
}
