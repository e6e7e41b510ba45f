// world_map_core/server/src/world/mod.rs
pub mod cell;
pub mod coords;
pub mod grid;
pub mod map;
pub mod object;
pub mod template;

pub use map::{Map, MapSettings};
pub use template::{MapCatalog, MapKind, MapTemplate};
