// world_map_core/server/src/core/config.rs
use super::constants::{
    DEFAULT_GRID_EXPIRY, DEFAULT_INSTANCE_UNLOAD_DELAY, DEFAULT_MAP_UPDATE_INTERVAL,
};
use super::error::{WorldError, WorldResult};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThreadPoolConfig {
    /// Worker threads for map updates. 0 runs every map on the driver thread.
    pub map_update_threads: usize,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        ThreadPoolConfig { map_update_threads: 0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub grid_unload: bool,
    pub grid_clean_up_delay_ms: u64,
    pub preload_base_maps: bool,
    pub preload_instance_maps: bool,
    pub map_update_interval_ms: u64,
    pub instance_unload_delay_ms: u64,
    pub thread_pools: ThreadPoolConfig,
    pub pathfinding_enabled: bool,
    pub pathfinding_disabled_maps: HashSet<u32>,
    pub data_path: PathBuf,
    pub metrics_listen_addr: Option<String>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        WorldConfig {
            grid_unload: true,
            grid_clean_up_delay_ms: DEFAULT_GRID_EXPIRY.as_millis() as u64,
            preload_base_maps: false,
            preload_instance_maps: false,
            map_update_interval_ms: DEFAULT_MAP_UPDATE_INTERVAL.as_millis() as u64,
            instance_unload_delay_ms: DEFAULT_INSTANCE_UNLOAD_DELAY.as_millis() as u64,
            thread_pools: ThreadPoolConfig::default(),
            pathfinding_enabled: true,
            pathfinding_disabled_maps: HashSet::new(),
            data_path: PathBuf::from("./data"),
            metrics_listen_addr: None,
        }
    }
}

impl WorldConfig {
    pub fn from_yaml_str(source: &str) -> WorldResult<Self> {
        let config: WorldConfig = serde_yaml::from_str(source)
            .map_err(|e| WorldError::ConfigError(format!("invalid world config: {}", e)))?;
        Ok(config.normalize())
    }

    pub fn load(path: &Path) -> WorldResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&source)
    }

    /// Preloaded grids are never unloaded, so preloading switches grid unload off.
    pub fn normalize(mut self) -> Self {
        if (self.preload_base_maps || self.preload_instance_maps) && self.grid_unload {
            warn!("Grid preloading is enabled, disabling grid unload (the two are mutually exclusive)");
            self.grid_unload = false;
        }
        self
    }

    pub fn grid_expiry(&self) -> Duration {
        Duration::from_millis(self.grid_clean_up_delay_ms)
    }

    pub fn map_update_interval(&self) -> Duration {
        Duration::from_millis(self.map_update_interval_ms)
    }

    pub fn instance_unload_delay(&self) -> Duration {
        Duration::from_millis(self.instance_unload_delay_ms)
    }

    pub fn is_pathfinding_enabled(&self, map_id: u32) -> bool {
        self.pathfinding_enabled && !self.pathfinding_disabled_maps.contains(&map_id)
    }
}
