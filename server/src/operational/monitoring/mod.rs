// world_map_core/server/src/operational/monitoring/mod.rs
pub mod metrics;
