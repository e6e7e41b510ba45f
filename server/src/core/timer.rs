// world_map_core/server/src/core/timer.rs
//! Countdown timers advanced by caller supplied elapsed time. Nothing here reads
//! the wall clock, so every state machine built on them can be driven with
//! synthetic time steps.
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownTimer {
    remaining: Duration,
}

impl CountdownTimer {
    pub fn new(duration: Duration) -> Self {
        CountdownTimer { remaining: duration }
    }

    pub fn update(&mut self, diff: Duration) {
        self.remaining = self.remaining.saturating_sub(diff);
    }

    pub fn passed(&self) -> bool {
        self.remaining.is_zero()
    }

    pub fn reset(&mut self, duration: Duration) {
        self.remaining = duration;
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }
}

/// Fires once per `period`, carrying the overshoot into the next period.
#[derive(Debug, Clone, Copy)]
pub struct PeriodicTimer {
    period: Duration,
    expire_in: Duration,
}

impl PeriodicTimer {
    pub fn new(period: Duration, start_phase: Duration) -> Self {
        PeriodicTimer { period, expire_in: start_phase.min(period) }
    }

    pub fn update(&mut self, diff: Duration) -> bool {
        if diff < self.expire_in {
            self.expire_in -= diff;
            return false;
        }
        let overshoot = diff - self.expire_in;
        self.expire_in = if self.period.is_zero() {
            Duration::ZERO
        } else {
            let over_ns = overshoot.as_nanos() % self.period.as_nanos();
            self.period - Duration::from_nanos(over_ns as u64)
        };
        true
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

/// Accumulates elapsed time until an interval is reached.
#[derive(Debug, Clone, Copy)]
pub struct IntervalTimer {
    interval: Duration,
    current: Duration,
}

impl IntervalTimer {
    pub fn new(interval: Duration) -> Self {
        IntervalTimer { interval, current: Duration::ZERO }
    }

    pub fn update(&mut self, diff: Duration) {
        self.current += diff;
    }

    pub fn passed(&self) -> bool {
        self.current >= self.interval
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn set_current(&mut self, current: Duration) {
        self.current = current;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
