//! ---
//! trpc_section: "01-core-functionality"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Shared primitives and utilities for the tick engine."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMicroSeconds};
use tracing::debug;

use crate::logging::LogFormat;
use crate::metrics::DEFAULT_SMOOTHING;

fn default_true() -> bool {
    true
}

fn default_max_time_per_tick() -> Duration {
    Duration::from_micros(10_000)
}

fn default_receive_timeout() -> Duration {
    Duration::from_micros(1_000)
}

fn default_event_queue_capacity() -> usize {
    1024
}

fn default_smoothing() -> f64 {
    DEFAULT_SMOOTHING
}

fn default_target_tick_rate() -> f64 {
    59.0
}

fn default_min_time_per_tick() -> Duration {
    Duration::from_micros(1_000)
}

fn default_ceiling_time_per_tick() -> Duration {
    Duration::from_micros(25_000)
}

fn default_idle_time_per_tick() -> Duration {
    Duration::from_micros(10_000)
}

fn default_rate_step() -> Duration {
    Duration::from_micros(100)
}

fn default_idle_threshold() -> Duration {
    Duration::from_micros(1_000)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_listen() -> SocketAddr {
    "127.0.0.1:9899"
        .parse()
        .expect("valid default metrics address")
}

fn default_host_tick_rate() -> f64 {
    60.0
}

fn default_stats_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_simulated_clients() -> usize {
    4
}

fn default_countdown_steps() -> u64 {
    3
}

/// Primary configuration object for a tickrpc host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "TICKRPC_CONFIG";

    /// Load configuration from disk, respecting the `TICKRPC_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        if !(self.host.tick_rate_hz.is_finite() && self.host.tick_rate_hz > 0.0) {
            return Err(anyhow!("host.tick_rate_hz must be a positive number"));
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Execution settings for the tick engine. Durations are stored in
/// microseconds on disk.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Stop executing once a single call has completed in a tick.
    #[serde(default)]
    pub one_call_per_tick: bool,
    /// Static execution budget per tick, and the starting point for adaptive control.
    #[serde(default = "default_max_time_per_tick")]
    #[serde_as(as = "DurationMicroSeconds<u64>")]
    pub max_time_per_tick: Duration,
    #[serde(default = "default_true")]
    pub adaptive_rate_control: bool,
    /// Keep polling for requests until one arrives, the receive timeout expires,
    /// or the tick budget runs out.
    #[serde(default = "default_true")]
    pub blocking_receive: bool,
    #[serde(default = "default_receive_timeout")]
    #[serde_as(as = "DurationMicroSeconds<u64>")]
    pub receive_timeout: Duration,
    /// Include error kinds and detail text in error responses.
    #[serde(default)]
    pub verbose_errors: bool,
    /// Smoothing factor for the engine statistics.
    #[serde(default = "default_smoothing")]
    pub smoothing: f64,
    #[serde(default)]
    pub rate_control: RateControlConfig,
    /// Engine events kept until the host drains them; the oldest are dropped
    /// beyond this. `0` turns event collection off.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            one_call_per_tick: false,
            max_time_per_tick: default_max_time_per_tick(),
            adaptive_rate_control: true,
            blocking_receive: true,
            receive_timeout: default_receive_timeout(),
            verbose_errors: false,
            smoothing: default_smoothing(),
            rate_control: RateControlConfig::default(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.smoothing > 0.0 && self.smoothing <= 1.0) {
            return Err(anyhow!(
                "engine.smoothing must be within (0, 1], got {}",
                self.smoothing
            ));
        }
        if self.max_time_per_tick.is_zero() {
            return Err(anyhow!("engine.max_time_per_tick must be non-zero"));
        }
        self.rate_control.validate()
    }
}

/// Tuning for the adaptive budget controller.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateControlConfig {
    /// Host tick rate the controller tries to preserve.
    #[serde(default = "default_target_tick_rate")]
    pub target_tick_rate_hz: f64,
    #[serde(default = "default_min_time_per_tick")]
    #[serde_as(as = "DurationMicroSeconds<u64>")]
    pub min_time_per_tick: Duration,
    #[serde(default = "default_ceiling_time_per_tick")]
    #[serde_as(as = "DurationMicroSeconds<u64>")]
    pub max_time_per_tick: Duration,
    /// Budget restored when the engine is close to idle.
    #[serde(default = "default_idle_time_per_tick")]
    #[serde_as(as = "DurationMicroSeconds<u64>")]
    pub idle_time_per_tick: Duration,
    #[serde(default = "default_rate_step")]
    #[serde_as(as = "DurationMicroSeconds<u64>")]
    pub step: Duration,
    /// Execution time below which a tick counts as idle.
    #[serde(default = "default_idle_threshold")]
    #[serde_as(as = "DurationMicroSeconds<u64>")]
    pub idle_threshold: Duration,
}

impl Default for RateControlConfig {
    fn default() -> Self {
        Self {
            target_tick_rate_hz: default_target_tick_rate(),
            min_time_per_tick: default_min_time_per_tick(),
            max_time_per_tick: default_ceiling_time_per_tick(),
            idle_time_per_tick: default_idle_time_per_tick(),
            step: default_rate_step(),
            idle_threshold: default_idle_threshold(),
        }
    }
}

impl RateControlConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.target_tick_rate_hz.is_finite() && self.target_tick_rate_hz > 0.0) {
            return Err(anyhow!(
                "engine.rate_control.target_tick_rate_hz must be a positive number"
            ));
        }
        if self.min_time_per_tick > self.max_time_per_tick {
            return Err(anyhow!(
                "engine.rate_control.min_time_per_tick ({:?}) exceeds max_time_per_tick ({:?})",
                self.min_time_per_tick,
                self.max_time_per_tick
            ));
        }
        if self.idle_time_per_tick < self.min_time_per_tick
            || self.idle_time_per_tick > self.max_time_per_tick
        {
            return Err(anyhow!(
                "engine.rate_control.idle_time_per_tick must lie between the floor and the ceiling"
            ));
        }
        Ok(())
    }

    /// Wall-clock duration of one host tick at the target rate. A
    /// non-positive rate never counts as overrun.
    pub fn target_tick_duration(&self) -> Duration {
        crate::time::period_from_hz(self.target_tick_rate_hz).unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default)]
    pub file_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            file_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

/// Settings for the reference host loop driving `Engine::update`.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_host_tick_rate")]
    pub tick_rate_hz: f64,
    #[serde(default = "default_stats_interval")]
    #[serde_as(as = "DurationMicroSeconds<u64>")]
    pub stats_interval: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: default_host_tick_rate(),
            stats_interval: default_stats_interval(),
        }
    }
}

/// Synthetic client load generated by the reference host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_simulated_clients")]
    pub clients: usize,
    /// Number of ticks the demo countdown procedure suspends for.
    #[serde(default = "default_countdown_steps")]
    pub countdown_steps: u64,
    #[serde(default = "default_true")]
    pub stream_clock: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            clients: default_simulated_clients(),
            countdown_steps: default_countdown_steps(),
            stream_clock: true,
        }
    }
}
