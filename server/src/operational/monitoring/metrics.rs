// world_map_core/server/src/operational/monitoring/metrics.rs
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;
use anyhow::{Context, Result};

pub struct MetricsSystem {
    start_time: Instant,
}

impl MetricsSystem {
    /// Installs the Prometheus exporter on `listen_addr` and describes the world metrics.
    pub fn install(listen_addr: &str) -> Result<Self> {
        let addr: SocketAddr = listen_addr
            .parse()
            .with_context(|| format!("Invalid metrics listen address '{}'", listen_addr))?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;

        Self::describe();
        Ok(MetricsSystem { start_time: Instant::now() })
    }

    pub fn describe() {
        describe_counter!("world_map_updates_total", "Map updates run by the scheduler");
        describe_gauge!("world_maps_live", "Maps currently registered");
        describe_gauge!("world_instance_ids_in_use", "Instance ids currently allocated");
        describe_gauge!("world_navmesh_tiles_loaded", "Navigation mesh tiles resident in memory");
        describe_histogram!("world_map_tick_seconds", "Duration of a full map tick in seconds");
        describe_gauge!("world_uptime_seconds", "Seconds since the metrics system started");
    }

    pub fn record_uptime(&self) {
        gauge!("world_uptime_seconds").set(self.start_time.elapsed().as_secs_f64());
    }
}

// Logging setup
pub fn init_logging() -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, fmt};

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "world_map_core=info,warn".into()),
        )
        .with(fmt::layer())
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
