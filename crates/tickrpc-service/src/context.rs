//! ---
//! trpc_section: "03-service-catalog"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Procedure registration, binding, and invocation."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
use tickrpc_msg::{ClientId, ProcedureCall, Value};

use crate::catalog::ServiceCatalog;
use crate::error::CallError;
use crate::objects::Objects;

/// Engine operations reachable from inside a procedure.
pub trait EngineServices {
    /// Server status as a map of named values.
    fn status(&self) -> Value;
    /// Register a stream for `client`, returning its id.
    fn add_stream(
        &mut self,
        client: ClientId,
        call: &ProcedureCall,
        start: bool,
    ) -> Result<u64, CallError>;
    fn start_stream(&mut self, client: ClientId, id: u64) -> Result<(), CallError>;
    fn set_stream_rate(&mut self, client: ClientId, id: u64, hz: f32) -> Result<(), CallError>;
    fn remove_stream(&mut self, client: ClientId, id: u64) -> Result<(), CallError>;
}

/// Services for contexts that must not touch engine state, such as stream
/// evaluation.
#[derive(Debug, Clone, Default)]
pub struct DetachedServices {
    status: Value,
}

impl DetachedServices {
    pub fn with_status(status: Value) -> Self {
        Self { status }
    }

    fn unavailable(operation: &str) -> CallError {
        CallError::Unavailable(format!("{operation} is not available in this context"))
    }
}

impl EngineServices for DetachedServices {
    fn status(&self) -> Value {
        self.status.clone()
    }

    fn add_stream(&mut self, _: ClientId, _: &ProcedureCall, _: bool) -> Result<u64, CallError> {
        Err(Self::unavailable("AddStream"))
    }

    fn start_stream(&mut self, _: ClientId, _: u64) -> Result<(), CallError> {
        Err(Self::unavailable("StartStream"))
    }

    fn set_stream_rate(&mut self, _: ClientId, _: u64, _: f32) -> Result<(), CallError> {
        Err(Self::unavailable("SetStreamRate"))
    }

    fn remove_stream(&mut self, _: ClientId, _: u64) -> Result<(), CallError> {
        Err(Self::unavailable("RemoveStream"))
    }
}

/// Handle passed to every procedure invocation in place of global state.
pub struct CallContext<'a> {
    client: ClientId,
    client_name: &'a str,
    catalog: &'a ServiceCatalog,
    services: &'a mut dyn EngineServices,
    objects: &'a mut Objects,
}

impl<'a> CallContext<'a> {
    pub fn new(
        client: ClientId,
        client_name: &'a str,
        catalog: &'a ServiceCatalog,
        services: &'a mut dyn EngineServices,
        objects: &'a mut Objects,
    ) -> Self {
        Self {
            client,
            client_name,
            catalog,
            services,
            objects,
        }
    }

    /// Client on whose behalf the call runs.
    pub fn client(&self) -> ClientId {
        self.client
    }

    pub fn client_name(&self) -> &str {
        self.client_name
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        self.catalog
    }

    pub fn objects(&mut self) -> &mut Objects {
        self.objects
    }

    pub fn status(&self) -> Value {
        self.services.status()
    }

    pub fn add_stream(&mut self, call: &ProcedureCall, start: bool) -> Result<u64, CallError> {
        self.services.add_stream(self.client, call, start)
    }

    pub fn start_stream(&mut self, id: u64) -> Result<(), CallError> {
        self.services.start_stream(self.client, id)
    }

    pub fn set_stream_rate(&mut self, id: u64, hz: f32) -> Result<(), CallError> {
        self.services.set_stream_rate(self.client, id, hz)
    }

    pub fn remove_stream(&mut self, id: u64) -> Result<(), CallError> {
        self.services.remove_stream(self.client, id)
    }
}
