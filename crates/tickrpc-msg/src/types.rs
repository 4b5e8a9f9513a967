//! ---
//! trpc_section: "02-messaging-ipc-data-model"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Message schema helpers and transport seam."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::Value;

/// Stable identity of a connected client, shared by its request and stream
/// connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub Uuid);

impl ClientId {
    /// Allocate a fresh random identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Raw identifier bytes, as returned to clients by `GetClientID`.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Positional argument of a procedure call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    /// Zero-based parameter position.
    pub position: u32,
    /// Argument value.
    pub value: Value,
}

/// A single procedure invocation addressed by service and procedure name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureCall {
    /// Service owning the procedure.
    pub service: String,
    /// Procedure name within the service.
    pub procedure: String,
    /// Supplied arguments; omitted positions fall back to parameter defaults.
    #[serde(default)]
    pub arguments: Vec<Argument>,
}

impl ProcedureCall {
    /// Build a call without arguments.
    pub fn new(service: impl Into<String>, procedure: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            procedure: procedure.into(),
            arguments: Vec::new(),
        }
    }

    /// Append an argument at the next free position.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        let position = self.arguments.len() as u32;
        self.arguments.push(Argument {
            position,
            value: value.into(),
        });
        self
    }

    /// Set an argument at an explicit position.
    pub fn arg_at(mut self, position: u32, value: impl Into<Value>) -> Self {
        self.arguments.push(Argument {
            position,
            value: value.into(),
        });
        self
    }

    /// `Service.Procedure` label used in logs and errors.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.service, self.procedure)
    }
}

/// A request carrying one or more calls, executed in order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Request {
    /// Calls in execution order.
    pub calls: Vec<ProcedureCall>,
}

impl Request {
    /// Request consisting of exactly one call.
    pub fn single(call: ProcedureCall) -> Self {
        Self { calls: vec![call] }
    }
}

/// Structured error returned to a client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RpcError {
    /// Service that defines the error type; empty for engine errors.
    #[serde(default)]
    pub service: String,
    /// Error type name; empty for engine errors.
    #[serde(default)]
    pub name: String,
    /// Human readable description.
    pub description: String,
    /// Diagnostic detail, only populated when verbose errors are enabled.
    #[serde(default)]
    pub stack_trace: String,
}

impl RpcError {
    /// Engine-level error with only a description.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    /// Error tagged with a service-defined type.
    pub fn typed(
        service: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            name: name.into(),
            description: description.into(),
            stack_trace: String::new(),
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            f.write_str(&self.description)
        } else {
            write!(f, "{}.{}: {}", self.service, self.name, self.description)
        }
    }
}

/// Outcome of a single call: either a value or an error.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcedureResult {
    /// Return value; `None` when the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Error; `None` when the call succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl ProcedureResult {
    /// Successful result.
    pub fn ok(value: Value) -> Self {
        Self {
            value: Some(value),
            error: None,
        }
    }

    /// Failed result.
    pub fn err(error: RpcError) -> Self {
        Self {
            value: None,
            error: Some(error),
        }
    }

    /// Whether the result carries an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Reply to a [`Request`]: one result per call, or a request-level error.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Response {
    /// Request-level error; when set `results` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    /// Per-call results in request order.
    #[serde(default)]
    pub results: Vec<ProcedureResult>,
}

impl Response {
    /// Response carrying per-call results.
    pub fn with_results(results: Vec<ProcedureResult>) -> Self {
        Self {
            error: None,
            results,
        }
    }

    /// Response rejecting the whole request.
    pub fn request_error(error: RpcError) -> Self {
        Self {
            error: Some(error),
            results: Vec::new(),
        }
    }
}

/// Latest result of one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamResult {
    /// Stream identifier assigned at registration.
    pub id: u64,
    /// Most recent evaluation outcome.
    pub result: ProcedureResult,
}

/// Batch of changed stream results pushed to a stream client.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamUpdate {
    /// Changed results, at most one per stream.
    pub results: Vec<StreamResult>,
}

impl StreamUpdate {
    /// Whether the update has nothing to deliver.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Placeholder inbound message type for connections that never receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NoMessage;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_assigns_positions() {
        let call = ProcedureCall::new("Demo", "Add").arg(1i64).arg_at(3, 2i64);
        assert_eq!(call.arguments[0].position, 0);
        assert_eq!(call.arguments[1].position, 3);
        assert_eq!(call.qualified_name(), "Demo.Add");
    }

    #[test]
    fn response_serialises_without_empty_fields() {
        let response = Response::with_results(vec![ProcedureResult::ok(Value::Int(4))]);
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("error").is_none());
        assert!(json["results"][0].get("error").is_none());

        let error = Response::request_error(RpcError::new("empty request"));
        let round: Response = serde_json::from_slice(&serde_json::to_vec(&error).unwrap()).unwrap();
        assert_eq!(round, error);
    }

    #[test]
    fn rpc_error_display() {
        assert_eq!(RpcError::new("boom").to_string(), "boom");
        assert_eq!(
            RpcError::typed("Demo", "Overflow", "too big").to_string(),
            "Demo.Overflow: too big"
        );
    }
}
