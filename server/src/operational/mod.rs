// world_map_core/server/src/operational/mod.rs
pub mod monitoring;
