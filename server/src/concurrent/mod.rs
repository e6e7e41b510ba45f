// world_map_core/server/src/concurrent/mod.rs
pub mod id_allocator;
pub mod thread_pools;
