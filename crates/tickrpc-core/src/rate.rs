//! ---
//! trpc_section: "01-core-functionality"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Tick engine, scheduling, and streaming."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
use std::time::Duration;

use tickrpc_common::RateControlConfig;
use tracing::trace;

/// Hysteresis controller for the per-tick execution budget.
///
/// Over-target ticks shrink the budget by one step down to the floor. Near
/// idle ticks snap it to the idle value. Busy ticks that still meet the target
/// grow it by one step up to the ceiling.
#[derive(Debug, Clone)]
pub struct RateController {
    config: RateControlConfig,
    budget: Duration,
}

impl RateController {
    pub fn new(config: RateControlConfig, initial: Duration) -> Self {
        let budget = initial
            .max(config.min_time_per_tick)
            .min(config.max_time_per_tick);
        Self { config, budget }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn config(&self) -> &RateControlConfig {
        &self.config
    }

    /// Swap in new tuning, keeping the budget within the new bounds.
    pub fn reconfigure(&mut self, config: RateControlConfig) {
        self.budget = self
            .budget
            .max(config.min_time_per_tick)
            .min(config.max_time_per_tick);
        self.config = config;
    }

    /// Feed one tick's measurements and return the budget for the next tick.
    ///
    /// `elapsed` is the wall time since the previous update, `exec_time` the
    /// time spent executing calls in this one.
    pub fn adjust(&mut self, elapsed: Duration, exec_time: Duration) -> Duration {
        let config = &self.config;
        let next = if elapsed > config.target_tick_duration() {
            self.budget
                .saturating_sub(config.step)
                .max(config.min_time_per_tick)
        } else if exec_time < config.idle_threshold {
            config.idle_time_per_tick
        } else {
            (self.budget + config.step).min(config.max_time_per_tick)
        };
        if next != self.budget {
            trace!(
                previous_us = self.budget.as_micros() as u64,
                budget_us = next.as_micros() as u64,
                elapsed_us = elapsed.as_micros() as u64,
                "tick budget adjusted"
            );
        }
        self.budget = next;
        next
    }
}
