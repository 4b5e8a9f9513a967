//! ---
//! trpc_section: "03-service-catalog"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Procedure registration, binding, and invocation."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
//! Explicit registration table for procedures, argument binding, the
//! invocation result types, and the object handle arena.

pub mod catalog;
pub mod context;
pub mod error;
pub mod invocation;
pub mod objects;

pub use catalog::{
    Handler, Parameter, ProcedureBuilder, ProcedureDescriptor, ServiceBuilder, ServiceCatalog,
    ServiceDescriptor,
};
pub use context::{CallContext, DetachedServices, EngineServices};
pub use error::{CallError, HandleError};
pub use invocation::{Arguments, BoundCall, Invocation, Outcome, ProcedureId, ResumeState};
pub use objects::{ObjectStore, Objects};
