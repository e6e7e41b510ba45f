// world_map_core/server/src/lib.rs

pub mod core;
pub mod concurrent;
pub mod world;
pub mod navigation;
pub mod server;
pub mod operational;

pub use crate::core::config::WorldConfig;
pub use crate::core::error::{WorldError, WorldResult};
pub use crate::core::types::{InstanceId, MapId, MapKey, MapRequester};
pub use crate::server::registry::MapRegistry;
