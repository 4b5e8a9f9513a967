//! ---
//! trpc_section: "03-service-catalog"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Procedure registration, binding, and invocation."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use indexmap::IndexMap;
use tickrpc_msg::{ProcedureCall, Value, ValueKind};
use tracing::{debug, warn};

use crate::context::CallContext;
use crate::error::CallError;
use crate::invocation::{Arguments, BoundCall, Invocation, Outcome, ProcedureId, ResumeState};

/// Procedure implementation.
pub type Handler = Box<dyn Fn(&mut CallContext<'_>, &Arguments<'_>) -> Outcome + Send + Sync>;

/// Declared parameter of a procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub kind: ValueKind,
    /// Used when the caller omits the argument.
    pub default: Option<Value>,
    /// Whether `Null` is accepted regardless of `kind`.
    pub nullable: bool,
}

impl Parameter {
    pub fn accepts(&self, value: &Value) -> bool {
        (self.nullable && matches!(value, Value::Null)) || self.kind.accepts(value)
    }
}

/// Entry of the registration table.
pub struct ProcedureDescriptor {
    pub id: ProcedureId,
    pub service: String,
    pub name: String,
    pub parameters: Vec<Parameter>,
    /// `None` for procedures that return nothing.
    pub returns: Option<ValueKind>,
    pub documentation: String,
    handler: Handler,
}

impl ProcedureDescriptor {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.service, self.name)
    }
}

impl fmt::Debug for ProcedureDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcedureDescriptor")
            .field("id", &self.id)
            .field("service", &self.service)
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceDescriptor {
    pub name: String,
    pub documentation: String,
    procedures: IndexMap<String, ProcedureId>,
}

impl ServiceDescriptor {
    pub fn procedures(&self) -> impl Iterator<Item = ProcedureId> + '_ {
        self.procedures.values().copied()
    }
}

/// Registration table mapping `(service, procedure)` names to handlers.
/// Built once at startup, read-only afterwards.
#[derive(Default)]
pub struct ServiceCatalog {
    services: IndexMap<String, ServiceDescriptor>,
    procedures: Vec<ProcedureDescriptor>,
}

impl fmt::Debug for ServiceCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCatalog")
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .field("procedures", &self.procedures.len())
            .finish()
    }
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or create) a service for registration.
    pub fn service(&mut self, name: impl Into<String>) -> ServiceBuilder<'_> {
        let name = name.into();
        self.services
            .entry(name.clone())
            .or_insert_with(|| ServiceDescriptor {
                name: name.clone(),
                ..ServiceDescriptor::default()
            });
        ServiceBuilder {
            catalog: self,
            service: name,
        }
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.values()
    }

    pub fn get_service(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.get(name)
    }

    pub fn procedure(&self, id: ProcedureId) -> Option<&ProcedureDescriptor> {
        self.procedures.get(id.0)
    }

    pub fn procedure_count(&self) -> usize {
        self.procedures.len()
    }

    pub fn resolve(&self, service: &str, procedure: &str) -> Result<&ProcedureDescriptor, CallError> {
        let descriptor = self
            .services
            .get(service)
            .ok_or_else(|| CallError::UnknownService(service.to_owned()))?;
        descriptor
            .procedures
            .get(procedure)
            .and_then(|id| self.procedures.get(id.0))
            .ok_or_else(|| CallError::UnknownProcedure {
                service: service.to_owned(),
                procedure: procedure.to_owned(),
            })
    }

    /// Resolve `call` and produce a complete, type-checked argument list.
    /// Omitted arguments take their parameter default.
    pub fn bind(&self, call: &ProcedureCall) -> Result<BoundCall, CallError> {
        let descriptor = self.resolve(&call.service, &call.procedure)?;
        let mut slots: Vec<Option<Value>> = vec![None; descriptor.parameters.len()];
        for argument in &call.arguments {
            let slot = slots.get_mut(argument.position as usize).ok_or_else(|| {
                CallError::TooManyArguments {
                    procedure: descriptor.qualified_name(),
                    expected: descriptor.parameters.len(),
                    position: argument.position,
                }
            })?;
            if slot.is_some() {
                return Err(CallError::DuplicateArgument {
                    procedure: descriptor.qualified_name(),
                    position: argument.position,
                });
            }
            *slot = Some(argument.value.clone());
        }

        let arguments = descriptor
            .parameters
            .iter()
            .zip(slots)
            .map(|(parameter, slot)| {
                let value = match slot.or_else(|| parameter.default.clone()) {
                    Some(value) => value,
                    None => {
                        return Err(CallError::MissingArgument {
                            procedure: descriptor.qualified_name(),
                            parameter: parameter.name.clone(),
                        })
                    }
                };
                if !parameter.accepts(&value) {
                    return Err(CallError::ArgumentType {
                        procedure: descriptor.qualified_name(),
                        parameter: parameter.name.clone(),
                        expected: parameter.kind,
                        actual: value.kind(),
                    });
                }
                Ok(value)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(BoundCall {
            procedure: descriptor.id,
            arguments,
            source: call.clone(),
        })
    }

    /// Run a bound call from the start.
    pub fn invoke(&self, ctx: &mut CallContext<'_>, call: &BoundCall) -> Invocation {
        self.run(ctx, call.procedure, call.arguments.clone(), None)
    }

    /// Continue a suspended call, consuming its resume state.
    pub fn resume(&self, ctx: &mut CallContext<'_>, state: ResumeState) -> Invocation {
        self.run(ctx, state.procedure, state.arguments, Some(state.progress))
    }

    fn run(
        &self,
        ctx: &mut CallContext<'_>,
        procedure: ProcedureId,
        arguments: Vec<Value>,
        progress: Option<Value>,
    ) -> Invocation {
        let Some(descriptor) = self.procedures.get(procedure.0) else {
            return Invocation::Complete(Err(CallError::UnknownProcedure {
                service: String::new(),
                procedure: format!("#{}", procedure.0),
            }));
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let args = Arguments::new(descriptor, &arguments, progress.as_ref());
            (descriptor.handler)(ctx, &args)
        }));

        match outcome {
            Ok(Outcome::Done(result)) => Invocation::Complete(result),
            Ok(Outcome::Yield(progress)) => {
                debug!(procedure = %descriptor.qualified_name(), "call suspended");
                Invocation::Suspended(ResumeState {
                    procedure,
                    arguments,
                    progress,
                })
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(
                    procedure = %descriptor.qualified_name(),
                    error = %message,
                    "procedure panicked"
                );
                Invocation::Complete(Err(CallError::Panicked {
                    procedure: descriptor.qualified_name(),
                    message,
                }))
            }
        }
    }

    /// Catalog contents as a value, for introspection by clients.
    pub fn describe(&self) -> Value {
        let text = |s: &str| Value::String(s.to_owned());
        let services = self
            .services
            .values()
            .map(|service| {
                let procedures = service
                    .procedures()
                    .filter_map(|id| self.procedure(id))
                    .map(|procedure| {
                        let parameters = procedure
                            .parameters
                            .iter()
                            .map(|parameter| {
                                let mut entry = vec![
                                    (text("name"), text(&parameter.name)),
                                    (text("type"), text(&parameter.kind.to_string())),
                                    (text("nullable"), Value::Bool(parameter.nullable)),
                                ];
                                if let Some(default) = &parameter.default {
                                    entry.push((text("default"), default.clone()));
                                }
                                Value::Map(entry)
                            })
                            .collect();
                        let returns = procedure
                            .returns
                            .map(|kind| text(&kind.to_string()))
                            .unwrap_or(Value::Null);
                        Value::Map(vec![
                            (text("name"), text(&procedure.name)),
                            (text("parameters"), Value::List(parameters)),
                            (text("return_type"), returns),
                            (text("documentation"), text(&procedure.documentation)),
                        ])
                    })
                    .collect();
                Value::Map(vec![
                    (text("name"), text(&service.name)),
                    (text("procedures"), Value::List(procedures)),
                    (text("documentation"), text(&service.documentation)),
                ])
            })
            .collect();
        Value::List(services)
    }

    fn register(&mut self, service: &str, mut descriptor: ProcedureDescriptor) -> ProcedureId {
        let id = ProcedureId(self.procedures.len());
        descriptor.id = id;
        let name = descriptor.name.clone();
        self.procedures.push(descriptor);
        if let Some(entry) = self.services.get_mut(service) {
            if entry.procedures.insert(name.clone(), id).is_some() {
                warn!(service, procedure = %name, "procedure registered twice; keeping the latest");
            }
        }
        id
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// Registration handle for one service.
pub struct ServiceBuilder<'a> {
    catalog: &'a mut ServiceCatalog,
    service: String,
}

impl<'a> ServiceBuilder<'a> {
    pub fn documentation(self, text: impl Into<String>) -> Self {
        if let Some(service) = self.catalog.services.get_mut(&self.service) {
            service.documentation = text.into();
        }
        self
    }

    pub fn procedure(self, name: impl Into<String>) -> ProcedureBuilder<'a> {
        ProcedureBuilder {
            service: self,
            name: name.into(),
            parameters: Vec::new(),
            returns: None,
            documentation: String::new(),
        }
    }
}

/// Registration handle for one procedure; finished by [`ProcedureBuilder::handler`].
pub struct ProcedureBuilder<'a> {
    service: ServiceBuilder<'a>,
    name: String,
    parameters: Vec<Parameter>,
    returns: Option<ValueKind>,
    documentation: String,
}

impl<'a> ProcedureBuilder<'a> {
    /// Required parameter.
    pub fn param(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            kind,
            default: None,
            nullable: false,
        });
        self
    }

    /// Parameter with a default value.
    pub fn optional(
        mut self,
        name: impl Into<String>,
        kind: ValueKind,
        default: impl Into<Value>,
    ) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            kind,
            default: Some(default.into()),
            nullable: false,
        });
        self
    }

    /// Parameter that also accepts `Null`.
    pub fn nullable(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            kind,
            default: None,
            nullable: true,
        });
        self
    }

    pub fn returns(mut self, kind: ValueKind) -> Self {
        self.returns = Some(kind);
        self
    }

    pub fn documentation(mut self, text: impl Into<String>) -> Self {
        self.documentation = text.into();
        self
    }

    /// Attach the implementation and add the procedure to the table.
    pub fn handler<F>(self, handler: F) -> ServiceBuilder<'a>
    where
        F: Fn(&mut CallContext<'_>, &Arguments<'_>) -> Outcome + Send + Sync + 'static,
    {
        let ProcedureBuilder {
            service,
            name,
            parameters,
            returns,
            documentation,
        } = self;
        let descriptor = ProcedureDescriptor {
            id: ProcedureId(0),
            service: service.service.clone(),
            name,
            parameters,
            returns,
            documentation,
            handler: Box::new(handler),
        };
        let ServiceBuilder { catalog, service } = service;
        catalog.register(&service, descriptor);
        ServiceBuilder { catalog, service }
    }
}
