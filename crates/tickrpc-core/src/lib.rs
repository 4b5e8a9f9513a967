//! ---
//! trpc_section: "01-core-functionality"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Tick engine, scheduling, and streaming."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
//! Tick-driven RPC engine: round-robin client polling, multi-tick request
//! continuations, adaptive execution budget, and change-only streams.

pub mod clients;
mod continuation;
pub mod engine;
pub mod error;
pub mod events;
pub mod krpc;
pub mod rate;
pub mod scheduler;
pub mod stats;
pub mod streams;

pub use clients::ClientRegistry;
pub use engine::Engine;
pub use error::{SchedulerError, StreamError};
pub use events::{EngineEvent, EventTrigger};
pub use rate::RateController;
pub use scheduler::RoundRobinScheduler;
pub use stats::{EngineStats, StatsSnapshot, TickSample};
pub use streams::{EventPredicate, StreamManager, StreamTick, StreamTickReport};
