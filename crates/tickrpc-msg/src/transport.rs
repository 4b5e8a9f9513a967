//! ---
//! trpc_section: "02-messaging-ipc-data-model"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Message schema helpers and transport seam."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::codec;
use crate::types::{ClientId, NoMessage, Request, Response, StreamUpdate};
use crate::{Result, TransportError};

/// One side of a client connection as seen by the engine.
///
/// `I` is the inbound message type and `O` the outbound one. Implementations
/// must never block: `read` returns [`TransportError::NoRequest`] when nothing
/// is queued.
pub trait Client<I, O>: Send {
    /// Identity shared by the client's request and stream connections.
    fn id(&self) -> ClientId;
    /// Name the client supplied on connect; may be empty.
    fn name(&self) -> &str;
    /// Transport-specific remote address.
    fn address(&self) -> &str;
    /// Whether the peer is still attached.
    fn connected(&self) -> bool;
    /// Whether at least one inbound message is queued.
    fn data_available(&self) -> bool;
    /// Take the next inbound message.
    fn read(&mut self) -> Result<I>;
    /// Queue an outbound message.
    fn write(&mut self, message: &O) -> Result<()>;
    /// Detach the peer. Idempotent.
    fn close(&mut self);
}

/// Request/response connection.
pub type RequestClient = Box<dyn Client<Request, Response>>;
/// Push-only stream connection.
pub type StreamClient = Box<dyn Client<NoMessage, StreamUpdate>>;

/// A newly accepted connection handed to the engine.
pub enum Connection {
    /// Connection carrying requests and responses.
    Request(RequestClient),
    /// Connection receiving stream updates.
    Stream(StreamClient),
}

impl Connection {
    /// Identity of the client behind the connection.
    pub fn client_id(&self) -> ClientId {
        match self {
            Connection::Request(client) => client.id(),
            Connection::Stream(client) => client.id(),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connection::Request(client) => f
                .debug_struct("Request")
                .field("id", &client.id())
                .field("address", &client.address())
                .finish(),
            Connection::Stream(client) => f
                .debug_struct("Stream")
                .field("id", &client.id())
                .field("address", &client.address())
                .finish(),
        }
    }
}

/// Identifier of a server registered with the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerId(pub Uuid);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Listener abstraction used by all transport backends.
pub trait Server: Send {
    /// Unique identifier.
    fn id(&self) -> ServerId;
    /// Human-readable server name for logging.
    fn name(&self) -> &str;
    /// Begin accepting connections.
    fn start(&mut self) -> Result<()>;
    /// Stop accepting and detach every connection made through this server.
    fn stop(&mut self);
    /// Whether the server is accepting connections.
    fn running(&self) -> bool;
    /// Drain connections accepted since the last call.
    fn accept(&mut self) -> Vec<Connection>;
    /// Total bytes read from clients.
    fn bytes_read(&self) -> u64;
    /// Total bytes written to clients.
    fn bytes_written(&self) -> u64;
    /// Reset the byte counters.
    fn clear_stats(&mut self);
}

#[derive(Debug, Default)]
struct Pipe {
    to_server: VecDeque<Vec<u8>>,
    to_peer: VecDeque<Vec<u8>>,
    connected: bool,
    reject_writes: bool,
}

type SharedPipe = Arc<Mutex<Pipe>>;

#[derive(Debug, Default)]
struct ByteCounters {
    read: AtomicU64,
    written: AtomicU64,
}

/// Engine-side end of an in-memory connection.
struct InMemoryClient<I, O> {
    id: ClientId,
    name: String,
    address: String,
    pipe: SharedPipe,
    counters: Arc<ByteCounters>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O> Client<I, O> for InMemoryClient<I, O>
where
    I: DeserializeOwned,
    O: Serialize,
{
    fn id(&self) -> ClientId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn connected(&self) -> bool {
        self.pipe.lock().connected
    }

    fn data_available(&self) -> bool {
        !self.pipe.lock().to_server.is_empty()
    }

    fn read(&mut self) -> Result<I> {
        let frame = {
            let mut pipe = self.pipe.lock();
            match pipe.to_server.pop_front() {
                Some(frame) => frame,
                None if !pipe.connected => return Err(TransportError::ClientDisconnected),
                None => return Err(TransportError::NoRequest),
            }
        };
        self.counters
            .read
            .fetch_add(frame.len() as u64, Ordering::Relaxed);
        codec::decode(&frame)
    }

    fn write(&mut self, message: &O) -> Result<()> {
        let frame = codec::encode(message)?;
        let mut pipe = self.pipe.lock();
        if !pipe.connected {
            return Err(TransportError::ClientDisconnected);
        }
        if pipe.reject_writes {
            return Err(TransportError::WriteRejected(format!(
                "peer {} is not accepting data",
                self.address
            )));
        }
        self.counters
            .written
            .fetch_add(frame.len() as u64, Ordering::Relaxed);
        pipe.to_peer.push_back(frame);
        Ok(())
    }

    fn close(&mut self) {
        let mut pipe = self.pipe.lock();
        if pipe.connected {
            debug!(client = %self.id, address = %self.address, "in-memory connection closed");
        }
        pipe.connected = false;
    }
}

/// Remote end of an in-memory connection, held by tests and simulated clients.
///
/// `S` is what the peer sends and `R` what it receives.
pub struct InMemoryPeer<S, R> {
    id: ClientId,
    pipe: SharedPipe,
    _marker: PhantomData<fn(S) -> R>,
}

/// Peer side of a request connection.
pub type RequestPeer = InMemoryPeer<Request, Response>;
/// Peer side of a stream connection.
pub type StreamPeer = InMemoryPeer<NoMessage, StreamUpdate>;

impl<S, R> InMemoryPeer<S, R>
where
    S: Serialize,
    R: DeserializeOwned,
{
    /// Client identity assigned at connect.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Queue a message towards the engine.
    pub fn send(&self, message: &S) -> Result<()> {
        let frame = codec::encode(message)?;
        self.send_raw(frame)
    }

    /// Queue raw bytes towards the engine, bypassing the encoder.
    pub fn send_raw(&self, frame: impl Into<Vec<u8>>) -> Result<()> {
        let mut pipe = self.pipe.lock();
        if !pipe.connected {
            return Err(TransportError::ClientDisconnected);
        }
        pipe.to_server.push_back(frame.into());
        Ok(())
    }

    /// Take the next message written by the engine.
    pub fn recv(&self) -> Option<R> {
        let frame = self.pipe.lock().to_peer.pop_front()?;
        match codec::decode(&frame) {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(client = %self.id, error = %err, "dropping undecodable frame");
                None
            }
        }
    }

    /// Take every message written by the engine so far.
    pub fn drain(&self) -> Vec<R> {
        std::iter::from_fn(|| {
            let frame = self.pipe.lock().to_peer.pop_front()?;
            Some(codec::decode(&frame).ok())
        })
        .flatten()
        .collect()
    }

    /// Number of undelivered messages written by the engine.
    pub fn pending(&self) -> usize {
        self.pipe.lock().to_peer.len()
    }

    /// Whether the connection is still attached.
    pub fn connected(&self) -> bool {
        self.pipe.lock().connected
    }

    /// Detach from the engine.
    pub fn disconnect(&self) {
        self.pipe.lock().connected = false;
    }

    /// Make subsequent engine writes fail while `reject` is set.
    pub fn reject_writes(&self, reject: bool) {
        self.pipe.lock().reject_writes = reject;
    }
}

struct ServerInner {
    id: ServerId,
    name: String,
    running: AtomicBool,
    next_port: AtomicU64,
    pending: Mutex<Vec<Connection>>,
    pipes: Mutex<Vec<SharedPipe>>,
    counters: Arc<ByteCounters>,
}

/// In-process server. Cloned handles share state, so a test can keep one
/// handle for connecting peers while the engine owns another.
#[derive(Clone)]
pub struct InMemoryServer {
    inner: Arc<ServerInner>,
}

impl InMemoryServer {
    /// Create a stopped server.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                id: ServerId(Uuid::new_v4()),
                name: name.into(),
                running: AtomicBool::new(false),
                next_port: AtomicU64::new(1),
                pending: Mutex::new(Vec::new()),
                pipes: Mutex::new(Vec::new()),
                counters: Arc::new(ByteCounters::default()),
            }),
        }
    }

    /// Open a request connection under a fresh client identity.
    pub fn connect(&self, client_name: impl Into<String>) -> Result<RequestPeer> {
        let id = ClientId::new();
        let (client, peer) = self.open::<Request, Response>(id, client_name.into())?;
        self.inner
            .pending
            .lock()
            .push(Connection::Request(Box::new(client)));
        Ok(peer)
    }

    /// Open the stream connection belonging to an existing client identity.
    pub fn connect_stream(&self, client: ClientId) -> Result<StreamPeer> {
        let (client, peer) = self.open::<NoMessage, StreamUpdate>(client, String::new())?;
        self.inner
            .pending
            .lock()
            .push(Connection::Stream(Box::new(client)));
        Ok(peer)
    }

    fn open<I, O>(
        &self,
        id: ClientId,
        name: String,
    ) -> Result<(InMemoryClient<I, O>, InMemoryPeer<I, O>)> {
        if !self.inner.running.load(Ordering::Acquire) {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("server {} is not running", self.inner.name),
            )));
        }
        let port = self.inner.next_port.fetch_add(1, Ordering::Relaxed);
        let pipe: SharedPipe = Arc::new(Mutex::new(Pipe {
            connected: true,
            ..Pipe::default()
        }));
        self.inner.pipes.lock().push(Arc::clone(&pipe));
        let client = InMemoryClient {
            id,
            name,
            address: format!("memory://{}/{}", self.inner.name, port),
            pipe: Arc::clone(&pipe),
            counters: Arc::clone(&self.inner.counters),
            _marker: PhantomData,
        };
        let peer = InMemoryPeer {
            id,
            pipe,
            _marker: PhantomData,
        };
        Ok((client, peer))
    }

    /// Connections still attached through this server.
    pub fn open_connections(&self) -> usize {
        self.inner
            .pipes
            .lock()
            .iter()
            .filter(|pipe| pipe.lock().connected)
            .count()
    }
}

impl Server for InMemoryServer {
    fn id(&self) -> ServerId {
        self.inner.id
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn start(&mut self) -> Result<()> {
        self.inner.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self) {
        self.inner.running.store(false, Ordering::Release);
        self.inner.pending.lock().clear();
        let mut pipes = self.inner.pipes.lock();
        for pipe in pipes.drain(..) {
            pipe.lock().connected = false;
        }
    }

    fn running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    fn accept(&mut self) -> Vec<Connection> {
        self.inner.pipes.lock().retain(|pipe| pipe.lock().connected);
        std::mem::take(&mut *self.inner.pending.lock())
    }

    fn bytes_read(&self) -> u64 {
        self.inner.counters.read.load(Ordering::Relaxed)
    }

    fn bytes_written(&self) -> u64 {
        self.inner.counters.written.load(Ordering::Relaxed)
    }

    fn clear_stats(&mut self) {
        self.inner.counters.read.store(0, Ordering::Relaxed);
        self.inner.counters.written.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProcedureCall;

    #[test]
    fn connect_requires_running_server() {
        let server = InMemoryServer::new("local");
        assert!(matches!(server.connect("a"), Err(TransportError::Io(_))));
    }

    #[test]
    fn request_flows_both_ways() {
        let mut server = InMemoryServer::new("local");
        server.start().unwrap();
        let peer = server.connect("rover").unwrap();
        let mut accepted = server.accept();
        assert_eq!(accepted.len(), 1);
        let Connection::Request(mut client) = accepted.remove(0) else {
            panic!("expected request connection");
        };
        assert_eq!(client.name(), "rover");
        assert!(matches!(client.read(), Err(TransportError::NoRequest)));

        peer.send(&Request::single(ProcedureCall::new("KRPC", "GetStatus")))
            .unwrap();
        assert!(client.data_available());
        let request = client.read().unwrap();
        assert_eq!(request.calls[0].procedure, "GetStatus");

        client.write(&Response::default()).unwrap();
        assert_eq!(peer.drain().len(), 1);
        assert!(server.bytes_read() > 0);
        assert!(server.bytes_written() > 0);
    }

    #[test]
    fn stop_disconnects_clients() {
        let mut server = InMemoryServer::new("local");
        server.start().unwrap();
        let peer = server.connect("rover").unwrap();
        let accepted = server.accept();
        server.stop();
        assert!(!peer.connected());
        let Some(Connection::Request(client)) = accepted.into_iter().next() else {
            panic!("expected request connection");
        };
        assert!(!client.connected());
    }

    #[test]
    fn rejected_writes_surface_as_errors() {
        let mut server = InMemoryServer::new("local");
        server.start().unwrap();
        let peer = server.connect("rover").unwrap();
        let Some(Connection::Request(mut client)) = server.accept().into_iter().next() else {
            panic!("expected request connection");
        };
        peer.reject_writes(true);
        assert!(matches!(
            client.write(&Response::default()),
            Err(TransportError::WriteRejected(_))
        ));
    }

    #[test]
    fn accept_forgets_closed_connections() {
        let mut server = InMemoryServer::new("local");
        server.start().unwrap();
        let peers: Vec<_> = (0..3)
            .map(|i| server.connect(format!("rover-{i}")).unwrap())
            .collect();
        assert_eq!(server.accept().len(), 3);
        assert_eq!(server.open_connections(), 3);

        peers[0].disconnect();
        peers[2].disconnect();
        assert!(server.accept().is_empty());
        assert_eq!(server.open_connections(), 1);
        assert_eq!(server.inner.pipes.lock().len(), 1);
    }
}
