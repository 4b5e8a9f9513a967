//! ---
//! trpc_section: "01-core-functionality"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Tick engine, scheduling, and streaming."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tickrpc_msg::{ClientId, ServerId};
use tracing::warn;

/// Lifecycle notifications queued by the engine for the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    ServerStarted(ServerId),
    ServerStopped(ServerId),
    ClientConnected { client: ClientId, address: String },
    ClientDisconnected { client: ClientId },
    /// A request was read from the client.
    ClientActivity { client: ClientId },
}

/// Bounded queue of engine events waiting for the host. Once full, the
/// oldest event makes room for the newest.
#[derive(Debug)]
pub(crate) struct EventQueue {
    events: VecDeque<EngineEvent>,
    capacity: usize,
    dropped: u64,
}

impl EventQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity,
            dropped: 0,
        }
    }

    pub(crate) fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.events.len() > capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
    }

    pub(crate) fn push(&mut self, event: EngineEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.events.len() >= self.capacity {
            self.events.pop_front();
            if self.dropped == 0 {
                warn!(capacity = self.capacity, "engine event queue full; dropping oldest events");
            }
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    /// Take every queued event and forget earlier overflow.
    pub(crate) fn drain(&mut self) -> Vec<EngineEvent> {
        self.dropped = 0;
        self.events.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    #[cfg(test)]
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Host-side trigger for an event stream. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct EventTrigger {
    fired: Arc<AtomicBool>,
}

impl EventTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the event as occurred; delivered once on the next stream tick.
    pub fn fire(&self) {
        self.fired.store(true, Ordering::Release);
    }

    /// Predicate suitable for `Engine::add_event`. Each occurrence is
    /// reported once.
    pub fn predicate(&self) -> impl FnMut() -> bool + Send + 'static {
        let fired = Arc::clone(&self.fired);
        move || fired.swap(false, Ordering::AcqRel)
    }
}
