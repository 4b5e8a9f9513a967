//! ---
//! trpc_section: "01-core-functionality"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Tick engine, scheduling, and streaming."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tickrpc_common::EngineConfig;
use tickrpc_core::Engine;
use tickrpc_msg::{
    InMemoryServer, ProcedureCall, Request, RequestPeer, Response, StreamPeer, Value, ValueKind,
};
use tickrpc_service::{CallError, Outcome, ServiceCatalog};

/// Engine wired to an in-memory server plus the shared state behind the
/// `Test` service.
pub struct Harness {
    pub engine: Engine,
    pub server: InMemoryServer,
    /// Number of `Test.Sleep` calls that ran.
    pub sleeps: Arc<AtomicUsize>,
    /// Value served by `Test.Gauge`.
    pub gauge: Arc<AtomicI64>,
}

/// Non-blocking, fixed-budget settings so tests control every tick.
pub fn config() -> EngineConfig {
    EngineConfig {
        adaptive_rate_control: false,
        blocking_receive: false,
        max_time_per_tick: Duration::from_millis(50),
        ..EngineConfig::default()
    }
}

fn catalog(sleeps: Arc<AtomicUsize>, gauge: Arc<AtomicI64>) -> ServiceCatalog {
    let mut catalog = ServiceCatalog::new();
    catalog
        .service("Test")
        .procedure("Add")
        .param("a", ValueKind::Int)
        .param("b", ValueKind::Int)
        .returns(ValueKind::Int)
        .handler(|_, args| Outcome::from(args.i64(0).and_then(|a| Ok(a + args.i64(1)?))))
        .procedure("Countdown")
        .param("steps", ValueKind::Int)
        .returns(ValueKind::Int)
        .handler(|_, args| {
            let remaining = match args.progress() {
                Some(progress) => progress.as_i64().unwrap_or(0),
                None => args.i64(0).unwrap_or(0),
            };
            if remaining > 0 {
                Outcome::yield_with(remaining - 1)
            } else {
                Outcome::ok(0i64)
            }
        })
        .procedure("Sleep")
        .param("ms", ValueKind::Int)
        .handler(move |_, args| {
            let ms = args.i64(0).unwrap_or(0).max(0) as u64;
            std::thread::sleep(Duration::from_millis(ms));
            sleeps.fetch_add(1, Ordering::SeqCst);
            Outcome::ok(())
        })
        .procedure("Fail")
        .handler(|_, _| {
            Outcome::err(CallError::failed("Test", "Boom", "went wrong").with_detail("at the bottom"))
        })
        .procedure("Gauge")
        .returns(ValueKind::Int)
        .handler(move |_, _| Outcome::ok(gauge.load(Ordering::SeqCst)))
        .procedure("Stream")
        .handler(|ctx, _| Outcome::from(ctx.add_stream(&ProcedureCall::new("Test", "Gauge"), true)));
    catalog
}

impl Harness {
    pub fn new(config: EngineConfig) -> Self {
        let sleeps = Arc::new(AtomicUsize::new(0));
        let gauge = Arc::new(AtomicI64::new(0));
        let mut engine = Engine::new(config, catalog(Arc::clone(&sleeps), Arc::clone(&gauge)));
        let server = InMemoryServer::new("tests");
        engine.add_server(server.clone());
        engine.start_all().expect("start servers");
        Self {
            engine,
            server,
            sleeps,
            gauge,
        }
    }

    /// Connect a request client; it is accepted on the next update.
    pub fn connect(&self, name: &str) -> RequestPeer {
        self.server.connect(name).expect("connect")
    }

    pub fn connect_with_stream(&self, name: &str) -> (RequestPeer, StreamPeer) {
        let peer = self.connect(name);
        let stream = self.server.connect_stream(peer.id()).expect("connect stream");
        (peer, stream)
    }

    pub fn tick(&mut self, count: usize) {
        for _ in 0..count {
            self.engine.update();
        }
    }

    pub fn sleeps(&self) -> usize {
        self.sleeps.load(Ordering::SeqCst)
    }

    pub fn set_gauge(&self, value: i64) {
        self.gauge.store(value, Ordering::SeqCst);
    }
}

pub fn call(procedure: &str) -> ProcedureCall {
    ProcedureCall::new("Test", procedure)
}

pub fn send(peer: &RequestPeer, call: ProcedureCall) {
    peer.send(&Request::single(call)).expect("send request");
}

/// Value of the only result in a response.
pub fn single_value(response: &Response) -> &Value {
    assert!(response.error.is_none(), "request failed: {:?}", response.error);
    assert_eq!(response.results.len(), 1);
    response.results[0]
        .value
        .as_ref()
        .expect("result should carry a value")
}
