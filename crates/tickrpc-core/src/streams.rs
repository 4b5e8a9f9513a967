//! ---
//! trpc_section: "01-core-functionality"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Tick engine, scheduling, and streaming."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
//! Standing subscriptions re-evaluated every tick, delivering only changes.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use tickrpc_common::time::period_from_hz;
use tickrpc_msg::{
    log_stream_update, ClientId, ProcedureCall, ProcedureResult, StreamResult, StreamUpdate, Value,
};
use tickrpc_service::{
    BoundCall, CallContext, DetachedServices, Invocation, Objects, ResumeState, ServiceCatalog,
};
use tracing::{debug, warn};

use crate::clients::ClientRegistry;
use crate::error::StreamError;

/// Host predicate driving an event stream.
pub type EventPredicate = Box<dyn FnMut() -> bool + Send>;

enum StreamSource {
    Call(BoundCall),
    Event(EventPredicate),
}

struct Stream {
    id: u64,
    client: ClientId,
    source: StreamSource,
    result: Option<ProcedureResult>,
    resume: Option<ResumeState>,
    changed: bool,
    started: bool,
    /// `None` re-evaluates every tick.
    interval: Option<Duration>,
    last_evaluated: Option<Instant>,
}

impl Stream {
    fn due(&self, now: Instant) -> bool {
        match (self.interval, self.last_evaluated) {
            (Some(interval), Some(last)) => now.saturating_duration_since(last) >= interval,
            _ => true,
        }
    }

    fn record(&mut self, result: ProcedureResult) {
        if self.result.as_ref() != Some(&result) {
            self.changed = true;
        }
        self.result = Some(result);
    }
}

/// Everything a stream tick needs from the engine.
pub struct StreamTick<'a> {
    pub clients: &'a mut ClientRegistry,
    pub catalog: &'a ServiceCatalog,
    pub objects: &'a mut Objects,
    /// Served to `GetStatus` calls made by streams.
    pub status: Value,
    pub verbose_errors: bool,
    pub now: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamTickReport {
    pub calls_executed: u64,
    pub updates_sent: usize,
}

#[derive(Default)]
pub struct StreamManager {
    streams: IndexMap<u64, Stream>,
    next_id: u64,
    removals: HashSet<u64>,
}

impl StreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.streams.contains_key(&id)
    }

    pub fn is_started(&self, id: u64) -> bool {
        self.streams.get(&id).is_some_and(|stream| stream.started)
    }

    /// Whether `id` is staged for removal at the start of the next tick.
    pub fn is_pending_removal(&self, id: u64) -> bool {
        self.removals.contains(&id)
    }

    pub fn client_streams(&self, client: &ClientId) -> Vec<u64> {
        self.streams
            .values()
            .filter(|stream| stream.client == *client)
            .map(|stream| stream.id)
            .collect()
    }

    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Register a bound call for `client`. An equal registration returns the
    /// existing id and cancels any pending removal of it, unless
    /// `require_new` is set.
    pub fn register_call(
        &mut self,
        client: ClientId,
        call: BoundCall,
        require_new: bool,
    ) -> Result<u64, StreamError> {
        let existing = self.streams.values().find(|stream| {
            stream.client == client
                && matches!(&stream.source, StreamSource::Call(bound) if *bound == call)
        });
        if let Some(stream) = existing {
            let id = stream.id;
            if require_new {
                return Err(StreamError::AlreadyExists(id));
            }
            self.removals.remove(&id);
            return Ok(id);
        }
        let id = self.allocate();
        debug!(client = %client, stream = id, procedure = %call.source.qualified_name(), "stream registered");
        self.insert(id, client, StreamSource::Call(call));
        Ok(id)
    }

    /// Register an event stream. Event streams start immediately.
    pub fn register_event(&mut self, client: ClientId, predicate: EventPredicate) -> u64 {
        let id = self.allocate();
        self.insert(id, client, StreamSource::Event(predicate));
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.started = true;
        }
        debug!(client = %client, stream = id, "event stream registered");
        id
    }

    fn insert(&mut self, id: u64, client: ClientId, source: StreamSource) {
        self.streams.insert(
            id,
            Stream {
                id,
                client,
                source,
                result: None,
                resume: None,
                changed: false,
                started: false,
                interval: None,
                last_evaluated: None,
            },
        );
    }

    /// Validate and register `call` on behalf of a connected client.
    pub fn add_call_stream(
        &mut self,
        clients: &ClientRegistry,
        catalog: &ServiceCatalog,
        client: ClientId,
        call: &ProcedureCall,
        start: bool,
        require_new: bool,
    ) -> Result<u64, StreamError> {
        if !clients.has_rpc(&client) {
            return Err(StreamError::NoRequestClient(client));
        }
        if !clients.has_stream(&client) {
            return Err(StreamError::NoStreamClient(client));
        }
        let bound = catalog.bind(call)?;
        let id = self.register_call(client, bound, require_new)?;
        if start {
            self.start(client, id)?;
        }
        Ok(id)
    }

    fn owned_mut(&mut self, client: ClientId, id: u64) -> Result<&mut Stream, StreamError> {
        self.streams
            .get_mut(&id)
            .filter(|stream| stream.client == client)
            .ok_or(StreamError::UnknownStream(id))
    }

    /// Begin evaluating. A stream that already holds a result re-sends it.
    pub fn start(&mut self, client: ClientId, id: u64) -> Result<(), StreamError> {
        let stream = self.owned_mut(client, id)?;
        stream.started = true;
        if stream.result.is_some() {
            stream.changed = true;
        }
        Ok(())
    }

    /// Limit re-evaluation to `hz` times per second; `0` means every tick.
    pub fn set_rate(&mut self, client: ClientId, id: u64, hz: f32) -> Result<(), StreamError> {
        let stream = self.owned_mut(client, id)?;
        stream.interval = period_from_hz(f64::from(hz));
        Ok(())
    }

    /// Stage a client's stream for removal on the next tick.
    pub fn remove(&mut self, client: ClientId, id: u64) -> Result<(), StreamError> {
        self.owned_mut(client, id)?;
        self.removals.insert(id);
        Ok(())
    }

    /// Stage a stream for removal whoever owns it.
    pub fn remove_any(&mut self, id: u64) -> bool {
        if self.streams.contains_key(&id) {
            self.removals.insert(id);
            true
        } else {
            false
        }
    }

    /// Drop every stream owned by `client` immediately.
    pub fn remove_client(&mut self, client: &ClientId) -> usize {
        let before = self.streams.len();
        let removals = &mut self.removals;
        self.streams.retain(|id, stream| {
            let keep = stream.client != *client;
            if !keep {
                removals.remove(id);
            }
            keep
        });
        before - self.streams.len()
    }

    fn apply_removals(&mut self) {
        for id in self.removals.drain() {
            if self.streams.shift_remove(&id).is_some() {
                debug!(stream = id, "stream removed");
            }
        }
    }

    /// Re-evaluate due streams and push changed results to their owners.
    pub fn tick(&mut self, tick: StreamTick<'_>) -> StreamTickReport {
        let StreamTick {
            clients,
            catalog,
            objects,
            status,
            verbose_errors,
            now,
        } = tick;
        let mut report = StreamTickReport::default();

        self.apply_removals();

        let mut failed = Vec::new();
        let mut services = DetachedServices::with_status(status);
        for stream in self.streams.values_mut() {
            if !stream.started || !clients.is_connected(&stream.client) || !stream.due(now) {
                continue;
            }
            stream.last_evaluated = Some(now);
            match &mut stream.source {
                StreamSource::Call(call) => {
                    report.calls_executed += 1;
                    let mut ctx = CallContext::new(
                        stream.client,
                        clients.name(&stream.client),
                        catalog,
                        &mut services,
                        objects,
                    );
                    let invocation = match stream.resume.take() {
                        Some(state) => catalog.resume(&mut ctx, state),
                        None => catalog.invoke(&mut ctx, call),
                    };
                    match invocation {
                        Invocation::Complete(Ok(value)) => stream.record(ProcedureResult::ok(value)),
                        Invocation::Complete(Err(error)) => {
                            debug!(stream = stream.id, error = %error, "stream evaluation failed");
                            stream.result =
                                Some(ProcedureResult::err(error.to_rpc_error(verbose_errors)));
                            stream.changed = true;
                            failed.push(stream.id);
                        }
                        Invocation::Suspended(state) => stream.resume = Some(state),
                    }
                }
                StreamSource::Event(predicate) => {
                    if predicate() {
                        stream.result = Some(ProcedureResult::ok(Value::Bool(true)));
                        stream.changed = true;
                    }
                }
            }
        }

        let mut pending: IndexMap<ClientId, Vec<u64>> = IndexMap::new();
        for stream in self.streams.values() {
            if stream.started && stream.changed {
                pending.entry(stream.client).or_default().push(stream.id);
            }
        }

        let mut delivered = Vec::new();
        for (client, ids) in pending {
            if !clients.is_connected(&client) {
                continue;
            }
            let Some(connection) = clients.stream_mut(&client) else {
                continue;
            };
            let update = StreamUpdate {
                results: ids
                    .iter()
                    .filter_map(|id| self.streams.get(id))
                    .filter_map(|stream| {
                        stream.result.clone().map(|result| StreamResult {
                            id: stream.id,
                            result,
                        })
                    })
                    .collect(),
            };
            if update.is_empty() {
                continue;
            }
            match connection.write(&update) {
                Ok(()) => {
                    log_stream_update(client, &update);
                    report.updates_sent += 1;
                    delivered.extend(ids);
                }
                Err(err) => {
                    warn!(client = %client, error = %err, "failed to send stream update");
                }
            }
        }

        for id in delivered {
            if let Some(stream) = self.streams.get_mut(&id) {
                stream.changed = false;
                if matches!(stream.source, StreamSource::Event(_)) {
                    stream.result = Some(ProcedureResult::ok(Value::Bool(false)));
                }
            }
        }

        for id in failed {
            self.removals.remove(&id);
            if self.streams.shift_remove(&id).is_some() {
                debug!(stream = id, "stream removed after error");
            }
        }

        report
    }
}
