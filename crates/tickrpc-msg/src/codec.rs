//! ---
//! trpc_section: "02-messaging-ipc-data-model"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Message schema helpers and transport seam."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
//! JSON frame codec shared by transports. One frame carries one message.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Result, TransportError};

/// Encode a message into a single frame.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Decode one frame. Undecodable input maps to
/// [`TransportError::MalformedRequest`].
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T> {
    serde_json::from_slice(frame).map_err(|err| TransportError::MalformedRequest(err.to_string()))
}
