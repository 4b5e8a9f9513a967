//! ---
//! trpc_section: "01-core-functionality"
//! trpc_subsection: "binary"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Simulated in-process clients for the reference host."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tickrpc_common::SimulationConfig;
use tickrpc_msg::{InMemoryServer, ProcedureCall, Request, RequestPeer, Response, StreamPeer};
use tracing::{debug, warn};

use crate::demo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Awaiting {
    Nothing,
    Setup,
    Call,
}

struct SimulatedClient {
    peer: RequestPeer,
    stream: StreamPeer,
    awaiting: Awaiting,
    counter: Option<u64>,
    configured: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationSummary {
    pub clients: usize,
    pub responses: u64,
    pub call_errors: u64,
    pub stream_updates: u64,
}

/// Drives a fixed set of in-memory clients, one outstanding request each.
pub struct Simulation {
    clients: Vec<SimulatedClient>,
    config: SimulationConfig,
    rng: StdRng,
    summary: SimulationSummary,
}

impl Simulation {
    pub fn connect(server: &InMemoryServer, config: &SimulationConfig) -> Result<Self> {
        let mut clients = Vec::with_capacity(config.clients);
        for index in 0..config.clients {
            let peer = server.connect(format!("sim-{index}"))?;
            let stream = server.connect_stream(peer.id())?;
            clients.push(SimulatedClient {
                peer,
                stream,
                awaiting: Awaiting::Nothing,
                counter: None,
                configured: false,
            });
        }
        Ok(Self {
            clients,
            config: config.clone(),
            rng: StdRng::from_entropy(),
            summary: SimulationSummary {
                clients: config.clients,
                ..SimulationSummary::default()
            },
        })
    }

    /// Queue the next request for every idle client.
    pub fn issue(&mut self) {
        for client in &mut self.clients {
            if client.awaiting != Awaiting::Nothing || !client.peer.connected() {
                continue;
            }
            let (request, awaiting) = if client.configured {
                let call = next_call(&mut self.rng, client.counter, self.config.countdown_steps);
                (Request::single(call), Awaiting::Call)
            } else {
                (setup_request(self.config.stream_clock), Awaiting::Setup)
            };
            match client.peer.send(&request) {
                Ok(()) => client.awaiting = awaiting,
                Err(err) => warn!(client = %client.peer.id(), error = %err, "simulated client failed to send"),
            }
        }
    }

    /// Consume responses and stream updates written during the last tick.
    pub fn collect(&mut self) {
        for client in &mut self.clients {
            while let Some(response) = client.peer.recv() {
                self.summary.responses += 1;
                self.summary.call_errors += error_count(&response);
                if client.awaiting == Awaiting::Setup {
                    client.counter = response
                        .results
                        .last()
                        .and_then(|result| result.value.as_ref())
                        .and_then(|value| value.as_object());
                    client.configured = true;
                    debug!(client = %client.peer.id(), counter = ?client.counter, "simulated client configured");
                }
                client.awaiting = Awaiting::Nothing;
            }
            self.summary.stream_updates += client.stream.drain().len() as u64;
        }
    }

    pub fn summary(&self) -> &SimulationSummary {
        &self.summary
    }
}

/// Optional clock stream plus a server-side counter for later increments.
fn setup_request(stream_clock: bool) -> Request {
    let mut calls = Vec::new();
    if stream_clock {
        calls.push(
            ProcedureCall::new("KRPC", "AddStream").arg(ProcedureCall::new(demo::SERVICE, "Clock")),
        );
    }
    calls.push(ProcedureCall::new(demo::SERVICE, "NewCounter"));
    Request { calls }
}

fn next_call(rng: &mut StdRng, counter: Option<u64>, countdown_steps: u64) -> ProcedureCall {
    match (rng.gen_range(0..3), counter) {
        (0, _) => ProcedureCall::new(demo::SERVICE, "Countdown")
            .arg(i64::try_from(countdown_steps).unwrap_or(i64::MAX)),
        (1, Some(handle)) => {
            ProcedureCall::new(demo::SERVICE, "Increment").arg(tickrpc_msg::Value::Object(handle))
        }
        _ => ProcedureCall::new(demo::SERVICE, "Add")
            .arg(rng.gen_range(-1000i64..1000))
            .arg(rng.gen_range(-1000i64..1000)),
    }
}

fn error_count(response: &Response) -> u64 {
    let call_errors = response
        .results
        .iter()
        .filter(|result| result.is_error())
        .count() as u64;
    call_errors + u64::from(response.error.is_some())
}
