// world_map_core/server/src/server/scheduler.rs
use super::registry::MapRegistry;
use crate::concurrent::thread_pools::{UpdateExecutor, UpdateJob};
use crate::core::constants::SLOW_MAP_UPDATE_LOG_MS;
use crate::core::timer::IntervalTimer;
use metrics::{counter, histogram};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, error, info, trace, warn};

/// Coarse map tick: sub-interval calls only accumulate time. When the
/// interval is reached every map runs `update` (one job per map), then every
/// map runs `delayed_update` serially, then unloadable maps are destroyed.
pub struct MapUpdateScheduler {
    executor: UpdateExecutor,
    timer: Mutex<IntervalTimer>,
    ticks: AtomicU64,
}

impl MapUpdateScheduler {
    pub fn new(executor: UpdateExecutor, interval: Duration) -> Self {
        MapUpdateScheduler {
            executor,
            timer: Mutex::new(IntervalTimer::new(interval)),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn executor(&self) -> &UpdateExecutor {
        &self.executor
    }

    pub fn interval(&self) -> Duration {
        self.timer.lock().interval()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    pub fn update(&self, registry: &MapRegistry, diff: Duration) -> bool {
        let tick_diff = {
            let mut timer = self.timer.lock();
            timer.update(diff);
            if !timer.passed() {
                return false;
            }
            let accumulated = timer.current();
            timer.set_current(Duration::ZERO);
            accumulated
        };
        let tick_start = Instant::now();
        let tick = self.ticks.fetch_add(1, Ordering::AcqRel) + 1;

        let maps = registry.snapshot();
        let hooks = registry.hooks();
        let hooks_ref = &hooks;

        let jobs: Vec<UpdateJob<'_>> = maps
            .iter()
            .map(|(key, map)| {
                let key = *key;
                let map = Arc::clone(map);
                Box::new(move || {
                    let started = Instant::now();
                    let mut map = map.lock();
                    map.update(tick_diff);
                    for hook in hooks_ref {
                        hook.on_update(&mut map, tick_diff);
                    }
                    let elapsed = started.elapsed();
                    counter!("world_map_updates_total").increment(1);
                    if elapsed.as_millis() as u64 > SLOW_MAP_UPDATE_LOG_MS {
                        warn!("Map {} update took {:?}", key, elapsed);
                    }
                }) as UpdateJob<'_>
            })
            .collect();
        let failed = self.executor.run_batch(jobs);
        if failed > 0 {
            error!("Tick {}: {} map updates failed", tick, failed);
        }

        // every primary update has finished before any delayed update starts
        for (key, map) in &maps {
            let mut map = map.lock();
            let removed = map.delayed_update(tick_diff);
            for hook in &hooks {
                hook.on_delayed_update(&mut map, tick_diff);
            }
            if removed > 0 {
                trace!("Map {} removed {} objects in delayed update", key, removed);
            }
        }
        drop(maps);

        let destroyed = registry.destroy_unloadable(tick_diff);
        let elapsed = tick_start.elapsed();
        histogram!("world_map_tick_seconds").record(elapsed.as_secs_f64());
        debug!(
            "Tick {} updated maps over {:?} in {:?} ({} destroyed)",
            tick, tick_diff, elapsed, destroyed
        );
        true
    }
}

/// Feeds wall-clock time to the registry until Ctrl-C or until the registry
/// asks for shutdown, then unloads every map.
pub async fn run_driver_loop(registry: Arc<MapRegistry>, tick: Duration) {
    let mut ticker = interval(tick);
    let mut last_tick = Instant::now();
    info!("Driver loop started. Tick: {:?}, map update interval: {:?}", tick, registry.scheduler().interval());

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, stopping driver loop");
                break;
            }
        }
        let now = Instant::now();
        let diff = now - last_tick;
        last_tick = now;

        let registry_for_tick = Arc::clone(&registry);
        // map updates block on the worker pool barrier
        tokio::task::block_in_place(move || {
            registry_for_tick.update(diff);
        });

        if registry.shutdown_requested() {
            warn!("Shutdown requested by the map registry");
            break;
        }
    }

    let registry_for_unload = Arc::clone(&registry);
    tokio::task::block_in_place(move || registry_for_unload.unload_all());
    info!("Driver loop stopped");
}
