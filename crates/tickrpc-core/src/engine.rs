//! ---
//! trpc_section: "01-core-functionality"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Tick engine, scheduling, and streaming."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
//! The tick engine. The host calls [`Engine::update`] once per tick; each
//! update accepts connections, polls clients round robin, runs requests within
//! the tick budget, and pushes stream updates.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tickrpc_common::EngineConfig;
use tickrpc_msg::{
    log_request, log_response, ClientId, Connection, ProcedureCall, Response, RpcError, Server,
    ServerId, TransportError, Value,
};
use tickrpc_service::{CallContext, CallError, EngineServices, Objects, ServiceCatalog};
use tracing::{debug, error, info, warn};

use crate::clients::ClientRegistry;
use crate::continuation::{Continuation, Step};
use crate::error::StreamError;
use crate::events::{EngineEvent, EventQueue};
use crate::krpc;
use crate::rate::RateController;
use crate::scheduler::RoundRobinScheduler;
use crate::stats::{EngineStats, StatsSnapshot, TickSample};
use crate::streams::{StreamManager, StreamTick};

#[derive(Debug, Default, Clone, Copy)]
struct RpcTick {
    calls_executed: u64,
    rpc_time: Duration,
    poll_time: Duration,
    exec_time: Duration,
}

struct PollPass {
    /// Every scheduled client was visited.
    complete: bool,
    polled: usize,
}

/// Engine operations exposed to procedures running inside a request.
struct RequestServices<'a> {
    streams: &'a mut StreamManager,
    clients: &'a ClientRegistry,
    catalog: &'a ServiceCatalog,
    stats: &'a EngineStats,
}

impl EngineServices for RequestServices<'_> {
    fn status(&self) -> Value {
        self.stats
            .snapshot(
                self.clients.rpc_count(),
                self.clients.stream_count(),
                self.streams.len(),
            )
            .to_value()
    }

    fn add_stream(
        &mut self,
        client: ClientId,
        call: &ProcedureCall,
        start: bool,
    ) -> Result<u64, CallError> {
        Ok(self
            .streams
            .add_call_stream(self.clients, self.catalog, client, call, start, false)?)
    }

    fn start_stream(&mut self, client: ClientId, id: u64) -> Result<(), CallError> {
        Ok(self.streams.start(client, id)?)
    }

    fn set_stream_rate(&mut self, client: ClientId, id: u64, hz: f32) -> Result<(), CallError> {
        Ok(self.streams.set_rate(client, id, hz)?)
    }

    fn remove_stream(&mut self, client: ClientId, id: u64) -> Result<(), CallError> {
        Ok(self.streams.remove(client, id)?)
    }
}

pub struct Engine {
    config: EngineConfig,
    catalog: Arc<ServiceCatalog>,
    servers: Vec<Box<dyn Server>>,
    clients: ClientRegistry,
    scheduler: RoundRobinScheduler<ClientId>,
    /// Requests carried over from earlier ticks, in execution order.
    continuations: Vec<Continuation>,
    streams: StreamManager,
    objects: Objects,
    rate: RateController,
    stats: EngineStats,
    events: EventQueue,
    last_update: Option<Instant>,
    last_exec_time: Duration,
}

impl Engine {
    /// Build an engine serving `catalog`. The built-in `KRPC` service is
    /// added when the catalog does not already carry it.
    pub fn new(config: EngineConfig, mut catalog: ServiceCatalog) -> Self {
        if catalog.get_service(krpc::SERVICE).is_none() {
            krpc::register(&mut catalog);
        }
        let rate = RateController::new(config.rate_control.clone(), config.max_time_per_tick);
        let stats = EngineStats::new(config.smoothing);
        let events = EventQueue::new(config.event_queue_capacity);
        Self {
            config,
            catalog: Arc::new(catalog),
            servers: Vec::new(),
            clients: ClientRegistry::new(),
            scheduler: RoundRobinScheduler::new(),
            continuations: Vec::new(),
            streams: StreamManager::new(),
            objects: Objects::new(),
            rate,
            stats,
            events,
            last_update: None,
            last_exec_time: Duration::ZERO,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Settings changed here take effect on the next update.
    pub fn config_mut(&mut self) -> &mut EngineConfig {
        &mut self.config
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    pub fn objects(&mut self) -> &mut Objects {
        &mut self.objects
    }

    /// Execution budget the next tick will use.
    pub fn budget(&self) -> Duration {
        if self.config.adaptive_rate_control {
            self.rate.budget()
        } else {
            self.config.max_time_per_tick
        }
    }

    pub fn add_server(&mut self, server: impl Server + 'static) -> ServerId {
        let id = server.id();
        info!(server = %id, name = server.name(), "server added");
        self.servers.push(Box::new(server));
        id
    }

    /// Stop and drop a server. Its clients are disconnected.
    pub fn remove_server(&mut self, id: ServerId) -> bool {
        let Some(index) = self.servers.iter().position(|server| server.id() == id) else {
            return false;
        };
        let mut server = self.servers.remove(index);
        if server.running() {
            server.stop();
            self.events.push(EngineEvent::ServerStopped(id));
        }
        info!(server = %id, "server removed");
        self.purge_disconnected();
        true
    }

    /// Start every stopped server. Keeps going past failures and returns the
    /// first one.
    pub fn start_all(&mut self) -> tickrpc_msg::Result<()> {
        let mut first_error = None;
        for server in self.servers.iter_mut().filter(|server| !server.running()) {
            match server.start() {
                Ok(()) => {
                    info!(server = %server.id(), name = server.name(), "server started");
                    self.events.push(EngineEvent::ServerStarted(server.id()));
                }
                Err(err) => {
                    error!(server = %server.id(), name = server.name(), error = %err, "server failed to start");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn stop_all(&mut self) {
        for server in self.servers.iter_mut().filter(|server| server.running()) {
            server.stop();
            info!(server = %server.id(), name = server.name(), "server stopped");
            self.events.push(EngineEvent::ServerStopped(server.id()));
        }
        self.purge_disconnected();
    }

    pub fn any_running(&self) -> bool {
        self.servers.iter().any(|server| server.running())
    }

    pub fn rpc_client_count(&self) -> usize {
        self.clients.rpc_count()
    }

    pub fn stream_client_count(&self) -> usize {
        self.clients.stream_count()
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        self.clients.rpc_ids().collect()
    }

    pub fn streams(&self) -> &StreamManager {
        &self.streams
    }

    /// Requests waiting to resume on a later tick.
    pub fn pending_requests(&self) -> usize {
        self.continuations.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(
            self.clients.rpc_count(),
            self.clients.stream_count(),
            self.streams.len(),
        )
    }

    pub fn clear_stats(&mut self) {
        self.stats.reset();
        for server in &mut self.servers {
            server.clear_stats();
        }
    }

    /// Take the events queued since the last drain.
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        self.events.drain()
    }

    /// Events queued and not yet drained.
    pub fn queued_events(&self) -> usize {
        self.events.len()
    }

    pub fn add_stream(
        &mut self,
        client: ClientId,
        call: &ProcedureCall,
        start: bool,
    ) -> Result<u64, StreamError> {
        self.streams
            .add_call_stream(&self.clients, &self.catalog, client, call, start, false)
    }

    /// Like [`Engine::add_stream`], but an equal stream already registered for
    /// `client` is an `AlreadyExists` error instead of being shared.
    pub fn add_unique_stream(
        &mut self,
        client: ClientId,
        call: &ProcedureCall,
        start: bool,
    ) -> Result<u64, StreamError> {
        self.streams
            .add_call_stream(&self.clients, &self.catalog, client, call, start, true)
    }

    pub fn start_stream(&mut self, client: ClientId, id: u64) -> Result<(), StreamError> {
        self.streams.start(client, id)
    }

    pub fn set_stream_rate(&mut self, client: ClientId, id: u64, hz: f32) -> Result<(), StreamError> {
        self.streams.set_rate(client, id, hz)
    }

    pub fn remove_stream(&mut self, client: ClientId, id: u64) -> Result<(), StreamError> {
        self.streams.remove(client, id)
    }

    /// Stage stream `id` for removal whichever client owns it. Returns false
    /// for an unknown id.
    pub fn remove_stream_any(&mut self, id: u64) -> bool {
        self.streams.remove_any(id)
    }

    /// Register a host event for `client`. The stream reports `true` on the
    /// tick after `predicate` first returns true, then reverts to `false`.
    pub fn add_event(
        &mut self,
        client: ClientId,
        predicate: impl FnMut() -> bool + Send + 'static,
    ) -> Result<u64, StreamError> {
        if !self.clients.has_rpc(&client) {
            return Err(StreamError::NoRequestClient(client));
        }
        if !self.clients.has_stream(&client) {
            return Err(StreamError::NoStreamClient(client));
        }
        Ok(self.streams.register_event(client, Box::new(predicate)))
    }

    /// Run one tick.
    pub fn update(&mut self) {
        let now = Instant::now();
        let elapsed = self.last_update.map(|last| now.duration_since(last));
        self.last_update = Some(now);

        self.events.set_capacity(self.config.event_queue_capacity);
        if self.config.rate_control != *self.rate.config() {
            self.rate.reconfigure(self.config.rate_control.clone());
        }
        if self.config.adaptive_rate_control {
            if let Some(elapsed) = elapsed {
                self.rate.adjust(elapsed, self.last_exec_time);
            }
        }
        let budget = self.budget();

        self.accept_connections();
        self.purge_disconnected();

        let rpc = self.rpc_tick(budget);
        self.last_exec_time = rpc.exec_time;

        let stream_start = Instant::now();
        let status = self.stats().to_value();
        let streams = self.streams.tick(StreamTick {
            clients: &mut self.clients,
            catalog: &self.catalog,
            objects: &mut self.objects,
            status,
            verbose_errors: self.config.verbose_errors,
            now: stream_start,
        });
        let stream_time = stream_start.elapsed();

        let (bytes_read, bytes_written) = self
            .servers
            .iter()
            .fold((0, 0), |(read, written), server| {
                (read + server.bytes_read(), written + server.bytes_written())
            });
        self.stats.record(&TickSample {
            elapsed: elapsed.unwrap_or_default(),
            calls_executed: rpc.calls_executed,
            rpc_time: rpc.rpc_time,
            poll_time: rpc.poll_time,
            exec_time: rpc.exec_time,
            stream_calls_executed: streams.calls_executed,
            stream_time,
            bytes_read,
            bytes_written,
            budget,
        });
    }

    fn accept_connections(&mut self) {
        for server in self.servers.iter_mut().filter(|server| server.running()) {
            for connection in server.accept() {
                match connection {
                    Connection::Request(client) => {
                        let id = client.id();
                        let address = client.address().to_owned();
                        if let Err(mut rejected) = self.clients.insert_rpc(client) {
                            warn!(client = %id, %address, "duplicate request connection closed");
                            rejected.close();
                            continue;
                        }
                        let _ = self.scheduler.add(id);
                        info!(client = %id, name = self.clients.name(&id), %address, "client connected");
                        self.events
                            .push(EngineEvent::ClientConnected { client: id, address });
                    }
                    Connection::Stream(mut client) => {
                        let id = client.id();
                        if !self.clients.has_rpc(&id) {
                            warn!(client = %id, address = client.address(), "stream connection without request connection closed");
                            client.close();
                            continue;
                        }
                        if let Err(mut rejected) = self.clients.insert_stream(client) {
                            warn!(client = %id, "duplicate stream connection closed");
                            rejected.close();
                            continue;
                        }
                        info!(client = %id, "stream client connected");
                    }
                }
            }
        }
    }

    fn purge_disconnected(&mut self) {
        for id in self.clients.disconnected_rpc() {
            self.disconnect_client(id);
        }
        for id in self.clients.disconnected_streams() {
            if let Some(mut client) = self.clients.remove_stream(&id) {
                client.close();
                info!(client = %id, "stream client disconnected");
            }
        }
    }

    fn disconnect_client(&mut self, id: ClientId) {
        let removed = self.clients.remove(&id);
        if removed.rpc.is_none() && removed.stream.is_none() {
            return;
        }
        if let Some(mut client) = removed.rpc {
            client.close();
        }
        if let Some(mut client) = removed.stream {
            client.close();
        }
        let _ = self.scheduler.remove(&id);
        self.continuations.retain(|continuation| continuation.client() != id);
        let streams = self.streams.remove_client(&id);
        info!(client = %id, streams, "client disconnected");
        self.events
            .push(EngineEvent::ClientDisconnected { client: id });
    }

    fn rpc_tick(&mut self, budget: Duration) -> RpcTick {
        let start = Instant::now();
        let mut tick = RpcTick::default();
        let mut carried: Vec<Continuation> = Vec::new();
        let mut completed = 0usize;
        let mut full_pass;

        loop {
            let poll_start = Instant::now();
            loop {
                let pass = self.poll_requests(&carried, start, budget);
                full_pass = pass.complete;
                if !self.config.blocking_receive
                    || !self.continuations.is_empty()
                    || pass.polled == 0
                    || poll_start.elapsed() >= self.config.receive_timeout
                    || start.elapsed() >= budget
                {
                    break;
                }
                std::thread::yield_now();
            }
            tick.poll_time += poll_start.elapsed();

            if self.continuations.is_empty() {
                break;
            }

            let exec_start = Instant::now();
            for continuation in std::mem::take(&mut self.continuations) {
                let client = continuation.client();
                if !self.clients.is_connected(&client) {
                    debug!(client = %client, "dropping request from disconnected client");
                    continue;
                }
                if start.elapsed() > budget || (self.config.one_call_per_tick && completed > 0) {
                    carried.push(continuation);
                    continue;
                }
                match self.execute(continuation, &mut tick.calls_executed) {
                    Step::Complete(client, response) => {
                        completed += 1;
                        self.send_response(client, response);
                    }
                    Step::Suspended(continuation) => carried.push(continuation),
                }
            }
            tick.exec_time += exec_start.elapsed();

            if (self.config.one_call_per_tick && completed > 0) || start.elapsed() > budget {
                break;
            }
        }

        if full_pass {
            self.scheduler.rotate();
        }
        self.continuations = carried;
        tick.rpc_time = start.elapsed();
        tick
    }

    /// Read at most one request from each idle client, starting where the
    /// previous pass left off.
    fn poll_requests(&mut self, carried: &[Continuation], start: Instant, budget: Duration) -> PollPass {
        let busy: HashSet<ClientId> = self
            .continuations
            .iter()
            .chain(carried)
            .map(Continuation::client)
            .collect();
        let mut pass = PollPass {
            complete: true,
            polled: 0,
        };
        let mut dropped = Vec::new();

        for id in self.scheduler.round() {
            if start.elapsed() > budget {
                pass.complete = false;
                break;
            }
            if busy.contains(&id) {
                continue;
            }
            let Some(client) = self.clients.rpc_mut(&id) else {
                continue;
            };
            self.scheduler.mark_polled(&id);
            pass.polled += 1;
            if !client.connected() {
                dropped.push(id);
                continue;
            }
            if !client.data_available() {
                continue;
            }
            match client.read() {
                Ok(request) => {
                    log_request(id, client.name(), &request);
                    self.events
                        .push(EngineEvent::ClientActivity { client: id });
                    if request.calls.is_empty() {
                        let response = Response::request_error(RpcError::new("request contained no calls"));
                        if let Err(err) = client.write(&response) {
                            warn!(client = %id, error = %err, "failed to send response");
                        }
                    } else {
                        self.continuations.push(Continuation::new(id, request));
                    }
                }
                Err(TransportError::NoRequest) => {}
                Err(TransportError::ClientDisconnected) => dropped.push(id),
                Err(err) => {
                    error!(client = %id, address = client.address(), error = %err, "failed to read request; closing client");
                    client.close();
                    dropped.push(id);
                }
            }
        }

        for id in dropped {
            self.disconnect_client(id);
        }
        pass
    }

    fn execute(&mut self, continuation: Continuation, executed: &mut u64) -> Step {
        let client = continuation.client();
        let catalog = Arc::clone(&self.catalog);
        let mut services = RequestServices {
            streams: &mut self.streams,
            clients: &self.clients,
            catalog: &catalog,
            stats: &self.stats,
        };
        let mut ctx = CallContext::new(
            client,
            self.clients.name(&client),
            &catalog,
            &mut services,
            &mut self.objects,
        );
        continuation.run(&catalog, &mut ctx, self.config.verbose_errors, executed)
    }

    fn send_response(&mut self, client: ClientId, response: Response) {
        let Some(connection) = self.clients.rpc_mut(&client) else {
            return;
        };
        log_response(client, connection.name(), &response);
        if let Err(err) = connection.write(&response) {
            warn!(client = %client, error = %err, "failed to send response");
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        for server in self.servers.iter_mut().filter(|server| server.running()) {
            server.stop();
        }
    }
}
