// world_map_core/server/src/server/mod.rs
pub mod instance_lock;
pub mod persistence;
pub mod registry;
pub mod scheduler;

pub use registry::{MapRef, MapRegistry, MapUpdateHook};
pub use scheduler::run_driver_loop;
