// world_map_core/server/src/navigation/mod.rs
pub mod format;
pub mod mesh;
pub mod query;
pub mod store;

pub use store::NavMeshStore;
