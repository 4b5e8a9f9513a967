//! ---
//! trpc_section: "01-core-functionality"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Shared primitives and utilities for the tick engine."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
//! Core shared primitives for the tickrpc workspace.
//! This crate exposes configuration loading, logging, and the moving-average
//! counters consumed by the engine and its host.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod time;

pub use config::{
    AppConfig, EngineConfig, HostConfig, LoadedAppConfig, LoggingConfig, MetricsConfig,
    RateControlConfig, SimulationConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use metrics::ExponentialMovingAverage;
