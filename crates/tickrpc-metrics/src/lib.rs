//! ---
//! trpc_section: "04-observability"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Metrics collection and export utilities."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use tickrpc_core::StatsSnapshot;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the host.
pub type SharedRegistry = Arc<Registry>;

pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let addr = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Bound address; resolves port `0` to the port actually chosen.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Prometheus mirror of the engine statistics, refreshed from a
/// [`StatsSnapshot`] once per host tick.
#[derive(Clone, Debug)]
pub struct EngineMetrics {
    registry: SharedRegistry,
    calls_executed: IntCounter,
    call_rate: Gauge,
    time_per_tick: Gauge,
    poll_time: Gauge,
    exec_time: Gauge,
    max_time_per_tick: Gauge,
    stream_calls: IntGauge,
    stream_calls_executed: IntCounter,
    stream_call_rate: Gauge,
    time_per_stream_tick: Gauge,
    bytes_read: IntCounter,
    bytes_written: IntCounter,
    bytes_read_rate: Gauge,
    bytes_written_rate: Gauge,
    rpc_clients: IntGauge,
    stream_clients: IntGauge,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let metric = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<Gauge> {
    let metric = Gauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

fn int_gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge> {
    let metric = IntGauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

/// Move a counter to an absolute total. Totals that went backwards (stats
/// were cleared) restart the counter.
fn set_total(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total < current {
        counter.reset();
        counter.inc_by(total);
    } else {
        counter.inc_by(total - current);
    }
}

fn clamp_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl EngineMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let r = registry.as_ref();
        Ok(Self {
            calls_executed: counter(r, "tickrpc_calls_executed_total", "Procedure calls completed")?,
            call_rate: gauge(r, "tickrpc_call_rate", "Smoothed procedure calls per second")?,
            time_per_tick: gauge(
                r,
                "tickrpc_time_per_tick_seconds",
                "Smoothed time spent on requests per tick",
            )?,
            poll_time: gauge(
                r,
                "tickrpc_poll_time_seconds",
                "Smoothed time spent polling clients per tick",
            )?,
            exec_time: gauge(
                r,
                "tickrpc_exec_time_seconds",
                "Smoothed time spent executing calls per tick",
            )?,
            max_time_per_tick: gauge(
                r,
                "tickrpc_max_time_per_tick_seconds",
                "Execution budget of the last tick",
            )?,
            stream_calls: int_gauge(r, "tickrpc_stream_calls", "Registered streams")?,
            stream_calls_executed: counter(
                r,
                "tickrpc_stream_calls_executed_total",
                "Stream evaluations performed",
            )?,
            stream_call_rate: gauge(r, "tickrpc_stream_call_rate", "Smoothed stream evaluations per second")?,
            time_per_stream_tick: gauge(
                r,
                "tickrpc_time_per_stream_tick_seconds",
                "Smoothed time spent updating streams per tick",
            )?,
            bytes_read: counter(r, "tickrpc_bytes_read_total", "Bytes read from clients")?,
            bytes_written: counter(r, "tickrpc_bytes_written_total", "Bytes written to clients")?,
            bytes_read_rate: gauge(r, "tickrpc_bytes_read_rate", "Smoothed bytes read per second")?,
            bytes_written_rate: gauge(
                r,
                "tickrpc_bytes_written_rate",
                "Smoothed bytes written per second",
            )?,
            rpc_clients: int_gauge(r, "tickrpc_rpc_clients", "Connected request clients")?,
            stream_clients: int_gauge(r, "tickrpc_stream_clients", "Connected stream clients")?,
            registry,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn observe(&self, snapshot: &StatsSnapshot) {
        set_total(&self.calls_executed, snapshot.calls_executed);
        set_total(&self.stream_calls_executed, snapshot.stream_calls_executed);
        set_total(&self.bytes_read, snapshot.bytes_read);
        set_total(&self.bytes_written, snapshot.bytes_written);
        self.call_rate.set(snapshot.call_rate);
        self.time_per_tick.set(snapshot.time_per_tick_secs);
        self.poll_time.set(snapshot.poll_time_secs);
        self.exec_time.set(snapshot.exec_time_secs);
        self.max_time_per_tick.set(snapshot.max_time_per_tick_secs);
        self.stream_calls.set(clamp_i64(snapshot.stream_calls));
        self.stream_call_rate.set(snapshot.stream_call_rate);
        self.time_per_stream_tick
            .set(snapshot.time_per_stream_tick_secs);
        self.bytes_read_rate.set(snapshot.bytes_read_rate);
        self.bytes_written_rate.set(snapshot.bytes_written_rate);
        self.rpc_clients.set(clamp_i64(snapshot.rpc_clients));
        self.stream_clients.set(clamp_i64(snapshot.stream_clients));
    }
}
