//! ---
//! trpc_section: "02-messaging-ipc-data-model"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Message schema helpers and transport seam."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Wire data model and transport abstractions shared by the engine and its
//! transports.

pub mod codec;
pub mod logging;
pub mod transport;
pub mod types;
pub mod value;

/// Shared result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Failures surfaced by a client connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No complete request is waiting on the connection.
    #[error("no request available")]
    NoRequest,
    /// The peer has gone away.
    #[error("client disconnected")]
    ClientDisconnected,
    /// Bytes arrived that do not decode into a request.
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    /// The connection refused an outbound message.
    #[error("write rejected: {0}")]
    WriteRejected(String),
    /// Wrapper for IO errors encountered by socket transports.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for encoding problems on outbound messages.
    #[error("encoding error: {0}")]
    Codec(#[from] serde_json::Error),
}

pub use logging::{log_request, log_response, log_stream_update, MessageDirection};
pub use transport::{
    Client, Connection, InMemoryPeer, InMemoryServer, RequestClient, RequestPeer, Server,
    ServerId, StreamClient, StreamPeer,
};
pub use types::{
    Argument, ClientId, NoMessage, ProcedureCall, ProcedureResult, Request, Response, RpcError,
    StreamResult, StreamUpdate,
};
pub use value::{Value, ValueKind};
