//! ---
//! trpc_section: "01-core-functionality"
//! trpc_subsection: "binary"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Binary entrypoint for the tickrpc reference host."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
mod demo;
mod simulation;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tickrpc_common::time::period_from_hz;
use tickrpc_common::{init_tracing, AppConfig};
use tickrpc_core::{Engine, EngineEvent};
use tickrpc_metrics::{new_registry, spawn_http_server, EngineMetrics};
use tickrpc_msg::InMemoryServer;
use tickrpc_service::ServiceCatalog;
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::demo::HostClock;
use crate::simulation::Simulation;

const DEFAULT_CONFIG: &str = "configs/example.toml";

#[derive(Debug, Parser)]
#[command(author, version, about = "tickrpc reference host", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Stop after this many host ticks")]
    ticks: Option<u64>,

    #[arg(long, help = "Override the number of simulated clients")]
    clients: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // An explicit --config must exist; otherwise fall back to built-in defaults.
    let (mut config, source) = match &cli.config {
        Some(path) => {
            let loaded = AppConfig::load_with_source(&[path])?;
            (loaded.config, Some(loaded.source))
        }
        None => match AppConfig::load_with_source(&[DEFAULT_CONFIG]) {
            Ok(loaded) => (loaded.config, Some(loaded.source)),
            Err(_) => (AppConfig::default(), None),
        },
    };
    if let Some(clients) = cli.clients {
        config.simulation.clients = clients;
    }
    config.validate()?;

    init_tracing("tickrpcd", &config.logging)?;
    match &source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => warn!("no configuration file found; using defaults"),
    }

    run(config, cli.ticks).await
}

async fn run(config: AppConfig, tick_limit: Option<u64>) -> Result<()> {
    let registry = new_registry();
    let metrics = EngineMetrics::new(registry.clone())?;
    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry, config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let clock = HostClock::default();
    let mut catalog = ServiceCatalog::new();
    demo::register(&mut catalog, clock.clone());
    let mut engine = Engine::new(config.engine.clone(), catalog);
    let server = InMemoryServer::new("simulation");
    engine.add_server(server.clone());
    engine.start_all().context("failed to start servers")?;

    let mut simulation = Simulation::connect(&server, &config.simulation)?;
    let period = period_from_hz(config.host.tick_rate_hz)
        .context("host.tick_rate_hz must be a positive number")?;
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        tick_rate_hz = config.host.tick_rate_hz,
        clients = config.simulation.clients,
        "host loop running; waiting for termination signal"
    );

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticks: u64 = 0;
    let mut last_report = Instant::now();
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            result = &mut shutdown => {
                result?;
                info!("ctrl-c received; shutting down");
                break;
            }
        }

        clock.advance(period);
        simulation.issue();
        engine.update();
        simulation.collect();
        for event in engine.drain_events() {
            match event {
                EngineEvent::ClientActivity { .. } => {}
                other => debug!(event = ?other, "engine event"),
            }
        }

        let stats = engine.stats();
        metrics.observe(&stats);
        if last_report.elapsed() >= config.host.stats_interval {
            last_report = Instant::now();
            info!(
                calls_executed = stats.calls_executed,
                call_rate = stats.call_rate,
                exec_time_us = stats.exec_time_secs * 1e6,
                budget_us = engine.budget().as_micros() as u64,
                streams = stats.stream_calls,
                stream_call_rate = stats.stream_call_rate,
                rpc_clients = stats.rpc_clients,
                "engine statistics"
            );
        }

        ticks += 1;
        if tick_limit.is_some_and(|limit| ticks >= limit) {
            info!(ticks, "tick limit reached; shutting down");
            break;
        }
    }

    engine.stop_all();
    simulation.collect();
    info!(summary = ?simulation.summary(), "simulation finished");
    println!("{}", serde_json::to_string_pretty(&engine.stats())?);

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}
