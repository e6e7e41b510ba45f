// world_map_core/server/src/main.rs
use world_map_core::core::config::WorldConfig;
use world_map_core::core::types::MapRequester;
use world_map_core::navigation::NavMeshStore;
use world_map_core::operational::monitoring::metrics::{init_logging, MetricsSystem};
use world_map_core::server::instance_lock::{InMemoryInstanceLocks, RecentInstancePolicy};
use world_map_core::server::persistence::InMemoryPersistence;
use world_map_core::server::{run_driver_loop, MapRegistry};
use world_map_core::world::template::{MapCatalog, MapKind, MapTemplate};

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

const CONFIG_FILE: &str = "world.yaml";
const CATALOG_FILE: &str = "maps.yaml";

fn load_config(path: Option<PathBuf>) -> anyhow::Result<WorldConfig> {
    match path {
        Some(path) => WorldConfig::load(&path).with_context(|| format!("Failed to load {}", path.display())),
        None if PathBuf::from(CONFIG_FILE).exists() => {
            WorldConfig::load(&PathBuf::from(CONFIG_FILE)).context("Failed to load world.yaml")
        }
        None => {
            info!("No {} found, using default configuration", CONFIG_FILE);
            Ok(WorldConfig::default().normalize())
        }
    }
}

fn load_catalog(config: &WorldConfig) -> anyhow::Result<MapCatalog> {
    let path = config.data_path.join(CATALOG_FILE);
    if path.exists() {
        return MapCatalog::load(&path).with_context(|| format!("Failed to load {}", path.display()));
    }
    warn!("No map catalog at {}, serving a single continent", path.display());
    Ok(MapCatalog::from_templates([MapTemplate::new(0, MapKind::Continent).with_name("Default Continent")]))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {:?}", e);
        return Err(e);
    }

    info!("World map server starting up...");

    let config = load_config(std::env::args().nth(1).map(PathBuf::from))?;
    info!(
        "Configuration loaded. Map update interval: {:?}, update threads: {}, grid unload: {}",
        config.map_update_interval(),
        config.thread_pools.map_update_threads,
        config.grid_unload
    );

    let metrics = match &config.metrics_listen_addr {
        Some(addr) => match MetricsSystem::install(addr) {
            Ok(system) => {
                info!("Prometheus exporter listening on {}", addr);
                Some(system)
            }
            Err(e) => {
                error!("Metrics disabled: {:?}", e);
                None
            }
        },
        None => None,
    };

    let catalog = load_catalog(&config)?;
    info!("Map catalog loaded with {} templates", catalog.len());

    let navigation = Arc::new(NavMeshStore::from_config(&config));
    let registry = MapRegistry::new(
        config.clone(),
        catalog,
        Arc::new(InMemoryInstanceLocks::new()),
        Arc::new(InMemoryPersistence::new()),
    )
    .map_err(|e| anyhow::anyhow!("Map registry initialization failed: {}", e))?
    .with_navigation(navigation)
    .with_reuse_policy(Box::new(RecentInstancePolicy::new()));
    registry.initialize();

    // continents are always up
    let continents: Vec<u32> = registry.catalog().iter().filter(|t| t.is_continent()).map(|t| t.id).collect();
    for map_id in continents {
        if let Err(e) = registry.create_map(map_id, &MapRequester::default()) {
            error!("Failed to create continent {}: {}", map_id, e);
        }
    }
    info!("{} maps live", registry.map_count());

    let registry = Arc::new(registry);
    let tick = config.map_update_interval();
    run_driver_loop(Arc::clone(&registry), tick).await;

    if let Some(metrics) = metrics {
        metrics.record_uptime();
    }
    info!("World map server shut down.");
    Ok(())
}
