//! ---
//! trpc_section: "03-service-catalog"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Procedure registration, binding, and invocation."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
use thiserror::Error;
use tickrpc_msg::{RpcError, ValueKind};

/// Failures resolving an object handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleError {
    /// The slot was freed (and possibly reused) since the handle was issued.
    #[error("object handle {0:#x} is stale")]
    Stale(u64),
    /// The handle never referred to a slot in this store.
    #[error("object handle {0:#x} is invalid")]
    Invalid(u64),
}

/// Failure of a single procedure call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    #[error("service {0} not found")]
    UnknownService(String),
    #[error("procedure {service}.{procedure} not found")]
    UnknownProcedure { service: String, procedure: String },
    #[error("{procedure} takes {expected} arguments, got an argument at position {position}")]
    TooManyArguments {
        procedure: String,
        expected: usize,
        position: u32,
    },
    #[error("argument {position} of {procedure} was supplied more than once")]
    DuplicateArgument { procedure: String, position: u32 },
    #[error("argument {parameter} of {procedure} is required")]
    MissingArgument { procedure: String, parameter: String },
    #[error("argument {parameter} of {procedure} must be {expected}, got {actual}")]
    ArgumentType {
        procedure: String,
        parameter: String,
        expected: ValueKind,
        actual: ValueKind,
    },
    #[error(transparent)]
    Handle(#[from] HandleError),
    #[error("object {handle:#x} is not a {expected}")]
    ObjectType { handle: u64, expected: &'static str },
    #[error("{0}")]
    Unavailable(String),
    /// Error raised by the procedure itself, tagged with a service-defined
    /// type name.
    #[error("{description}")]
    Procedure {
        service: String,
        name: String,
        description: String,
        detail: String,
    },
    #[error("{procedure} panicked: {message}")]
    Panicked { procedure: String, message: String },
}

impl CallError {
    /// Procedure error tagged with `service.name`.
    pub fn failed(
        service: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        CallError::Procedure {
            service: service.into(),
            name: name.into(),
            description: description.into(),
            detail: String::new(),
        }
    }

    /// Attach diagnostic detail, shown only in verbose error mode.
    pub fn with_detail(self, detail: impl Into<String>) -> Self {
        match self {
            CallError::Procedure {
                service,
                name,
                description,
                ..
            } => CallError::Procedure {
                service,
                name,
                description,
                detail: detail.into(),
            },
            other => other,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            CallError::UnknownService(_) => "UnknownService",
            CallError::UnknownProcedure { .. } => "UnknownProcedure",
            CallError::TooManyArguments { .. } => "TooManyArguments",
            CallError::DuplicateArgument { .. } => "DuplicateArgument",
            CallError::MissingArgument { .. } => "MissingArgument",
            CallError::ArgumentType { .. } => "ArgumentType",
            CallError::Handle(_) => "Handle",
            CallError::ObjectType { .. } => "ObjectType",
            CallError::Unavailable(_) => "Unavailable",
            CallError::Procedure { .. } => "Procedure",
            CallError::Panicked { .. } => "Panicked",
        }
    }

    /// Convert into the wire error. In verbose mode the error kind and any
    /// detail text travel in `stack_trace`.
    pub fn to_rpc_error(&self, verbose: bool) -> RpcError {
        let mut error = match self {
            CallError::Procedure {
                service,
                name,
                description,
                ..
            } => RpcError::typed(service.as_str(), name.as_str(), description.as_str()),
            other => RpcError::new(other.to_string()),
        };
        if verbose {
            error.stack_trace = match self {
                CallError::Procedure { detail, .. } if !detail.is_empty() => {
                    format!("{}: {}", self.kind(), detail)
                }
                _ => format!("{}: {:?}", self.kind(), self),
            };
        }
        error
    }
}
