//! ---
//! trpc_section: "03-service-catalog"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Procedure registration, binding, and invocation."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
use tickrpc_msg::{ProcedureCall, Value, ValueKind};

use crate::catalog::ProcedureDescriptor;
use crate::error::CallError;

/// Index of a procedure in the catalog's registration table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcedureId(pub(crate) usize);

impl ProcedureId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A call resolved against the catalog with every parameter filled in.
///
/// Two bound calls are equal when they target the same procedure with
/// structurally equal arguments.
#[derive(Debug, Clone)]
pub struct BoundCall {
    pub procedure: ProcedureId,
    pub arguments: Vec<Value>,
    /// The call as the client sent it.
    pub source: ProcedureCall,
}

impl PartialEq for BoundCall {
    fn eq(&self, other: &Self) -> bool {
        self.procedure == other.procedure && self.arguments == other.arguments
    }
}

/// Progress of a call that has not finished yet. Consumed by exactly one
/// resume.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeState {
    pub procedure: ProcedureId,
    pub arguments: Vec<Value>,
    /// Opaque token chosen by the procedure when it yielded.
    pub progress: Value,
}

/// Result of invoking or resuming a call through the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Complete(Result<Value, CallError>),
    Suspended(ResumeState),
}

impl Invocation {
    pub fn is_suspended(&self) -> bool {
        matches!(self, Invocation::Suspended(_))
    }
}

/// What a handler returns: a final result, or a request to be called again
/// on a later tick with `progress` available through [`Arguments::progress`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done(Result<Value, CallError>),
    Yield(Value),
}

impl Outcome {
    pub fn ok(value: impl Into<Value>) -> Self {
        Outcome::Done(Ok(value.into()))
    }

    pub fn err(error: CallError) -> Self {
        Outcome::Done(Err(error))
    }

    pub fn yield_with(progress: impl Into<Value>) -> Self {
        Outcome::Yield(progress.into())
    }
}

impl<T: Into<Value>> From<Result<T, CallError>> for Outcome {
    fn from(result: Result<T, CallError>) -> Self {
        Outcome::Done(result.map(Into::into))
    }
}

static NULL: Value = Value::Null;

/// Bound argument view handed to a procedure handler.
pub struct Arguments<'a> {
    descriptor: &'a ProcedureDescriptor,
    values: &'a [Value],
    progress: Option<&'a Value>,
}

impl<'a> Arguments<'a> {
    pub(crate) fn new(
        descriptor: &'a ProcedureDescriptor,
        values: &'a [Value],
        progress: Option<&'a Value>,
    ) -> Self {
        Self {
            descriptor,
            values,
            progress,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Argument at `position`; `Null` past the end.
    pub fn get(&self, position: usize) -> &'a Value {
        self.values.get(position).unwrap_or(&NULL)
    }

    /// Progress token from the previous yield, `None` on the first attempt.
    pub fn progress(&self) -> Option<&'a Value> {
        self.progress
    }

    fn mismatch(&self, position: usize, expected: ValueKind) -> CallError {
        CallError::ArgumentType {
            procedure: self.descriptor.qualified_name(),
            parameter: self
                .descriptor
                .parameters
                .get(position)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| position.to_string()),
            expected,
            actual: self.get(position).kind(),
        }
    }

    pub fn bool(&self, position: usize) -> Result<bool, CallError> {
        self.get(position)
            .as_bool()
            .ok_or_else(|| self.mismatch(position, ValueKind::Bool))
    }

    pub fn i64(&self, position: usize) -> Result<i64, CallError> {
        self.get(position)
            .as_i64()
            .ok_or_else(|| self.mismatch(position, ValueKind::Int))
    }

    pub fn u64(&self, position: usize) -> Result<u64, CallError> {
        self.get(position)
            .as_u64()
            .ok_or_else(|| self.mismatch(position, ValueKind::UInt))
    }

    pub fn f64(&self, position: usize) -> Result<f64, CallError> {
        self.get(position)
            .as_f64()
            .ok_or_else(|| self.mismatch(position, ValueKind::Float))
    }

    pub fn str(&self, position: usize) -> Result<&'a str, CallError> {
        self.get(position)
            .as_str()
            .ok_or_else(|| self.mismatch(position, ValueKind::String))
    }

    pub fn object(&self, position: usize) -> Result<u64, CallError> {
        self.get(position)
            .as_object()
            .ok_or_else(|| self.mismatch(position, ValueKind::Object))
    }

    pub fn call(&self, position: usize) -> Result<&'a ProcedureCall, CallError> {
        self.get(position)
            .as_call()
            .ok_or_else(|| self.mismatch(position, ValueKind::Call))
    }
}
