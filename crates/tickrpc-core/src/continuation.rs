//! ---
//! trpc_section: "01-core-functionality"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Tick engine, scheduling, and streaming."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
use tickrpc_msg::{ClientId, ProcedureResult, Request, Response};
use tickrpc_service::{CallContext, Invocation, ResumeState, ServiceCatalog};
use tracing::debug;

/// A request part-way through execution. Calls run in order; results for
/// completed calls are kept until the whole request finishes.
#[derive(Debug)]
pub(crate) struct Continuation {
    client: ClientId,
    request: Request,
    results: Vec<ProcedureResult>,
    resume: Option<ResumeState>,
}

pub(crate) enum Step {
    Complete(ClientId, Response),
    /// A call yielded; run again next tick from the same call.
    Suspended(Continuation),
}

impl Continuation {
    pub(crate) fn new(client: ClientId, request: Request) -> Self {
        let results = Vec::with_capacity(request.calls.len());
        Self {
            client,
            request,
            results,
            resume: None,
        }
    }

    pub(crate) fn client(&self) -> ClientId {
        self.client
    }

    /// Run the remaining calls. `executed` counts calls that completed.
    pub(crate) fn run(
        mut self,
        catalog: &ServiceCatalog,
        ctx: &mut CallContext<'_>,
        verbose_errors: bool,
        executed: &mut u64,
    ) -> Step {
        while let Some(call) = self.request.calls.get(self.results.len()) {
            let invocation = match self.resume.take() {
                Some(state) => catalog.resume(ctx, state),
                None => match catalog.bind(call) {
                    Ok(bound) => catalog.invoke(ctx, &bound),
                    Err(error) => Invocation::Complete(Err(error)),
                },
            };
            match invocation {
                Invocation::Complete(result) => {
                    *executed += 1;
                    let result = match result {
                        Ok(value) => ProcedureResult::ok(value),
                        Err(error) => {
                            debug!(
                                client = %self.client,
                                procedure = %call.qualified_name(),
                                error = %error,
                                "call failed"
                            );
                            ProcedureResult::err(error.to_rpc_error(verbose_errors))
                        }
                    };
                    self.results.push(result);
                }
                Invocation::Suspended(state) => {
                    self.resume = Some(state);
                    return Step::Suspended(self);
                }
            }
        }
        Step::Complete(self.client, Response::with_results(self.results))
    }
}
