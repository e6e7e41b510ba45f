// world_map_core/server/src/core/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorldError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unknown map template {0}")]
    UnknownMap(u32),

    #[error("Map {map_id} is a battleground/arena and requires an externally assigned instance id")]
    MissingBattlegroundInstance { map_id: u32 },

    #[error("Coordinate ({x}, {y}) is outside of the map")]
    InvalidCoordinate { x: f32, y: f32 },

    #[error("Grid ({x}, {y}) is outside of the grid matrix")]
    InvalidGrid { x: u32, y: u32 },

    #[error("Instance id space exhausted")]
    InstanceIdsExhausted,

    #[error("Visit mask {0:#04b} is not supported, use exactly one of WORLD_OBJECTS or GRID_OBJECTS")]
    UnsupportedVisitMask(u8),

    #[error("Object {guid} of kind {kind:?} cannot be stored in the {container:?} container")]
    NotStorable {
        guid: u64,
        kind: crate::core::types::ObjectKind,
        container: crate::core::types::ContainerKind,
    },

    #[error("Object {0} is already present on the map")]
    DuplicateObject(u64),

    #[error("Object {0} not found")]
    ObjectNotFound(u64),

    #[error("Threading error: {0}")]
    ThreadingError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type WorldResult<T> = Result<T, WorldError>;
