//! ---
//! trpc_section: "01-core-functionality"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Tick engine, scheduling, and streaming."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
use thiserror::Error;
use tickrpc_msg::ClientId;
use tickrpc_service::CallError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("item is already scheduled")]
    AlreadyScheduled,
    #[error("item is not scheduled")]
    NotScheduled,
    #[error("scheduler is empty")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    #[error("client {0} has no request connection")]
    NoRequestClient(ClientId),
    #[error("client {0} has no stream connection")]
    NoStreamClient(ClientId),
    #[error("stream {0} already exists")]
    AlreadyExists(u64),
    #[error("stream {0} does not exist")]
    UnknownStream(u64),
    #[error(transparent)]
    Call(#[from] CallError),
}

impl From<StreamError> for CallError {
    fn from(error: StreamError) -> Self {
        match error {
            StreamError::Call(inner) => inner,
            other => CallError::failed("KRPC", "StreamError", other.to_string()),
        }
    }
}
