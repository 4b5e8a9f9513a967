//! ---
//! trpc_section: "02-messaging-ipc-data-model"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Message schema helpers and transport seam."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
use tracing::debug;

use crate::types::{ClientId, Request, Response, StreamUpdate};

/// Direction of the message movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Request read from a client.
    Inbound,
    /// Response written to a client.
    Outbound,
    /// Stream update pushed to a stream client.
    Stream,
}

/// Emit a structured log entry for a received request.
pub fn log_request(client: ClientId, client_name: &str, request: &Request) {
    debug!(
        client = %client,
        client_name,
        calls = request.calls.len(),
        first = request.calls.first().map(|c| c.qualified_name()).unwrap_or_default(),
        direction = ?MessageDirection::Inbound,
        "request received"
    );
}

/// Emit a structured log entry for a response about to be written.
pub fn log_response(client: ClientId, client_name: &str, response: &Response) {
    debug!(
        client = %client,
        client_name,
        results = response.results.len(),
        failed = response.results.iter().filter(|r| r.is_error()).count(),
        request_error = response.error.is_some(),
        direction = ?MessageDirection::Outbound,
        "response sent"
    );
}

/// Emit a structured log entry for a stream update.
pub fn log_stream_update(client: ClientId, update: &StreamUpdate) {
    debug!(
        client = %client,
        streams = update.results.len(),
        direction = ?MessageDirection::Stream,
        "stream update sent"
    );
}
