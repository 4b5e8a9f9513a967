//! ---
//! trpc_section: "01-core-functionality"
//! trpc_subsection: "binary"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Demo service exposed by the reference host."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tickrpc_common::time::duration_to_micros;
use tickrpc_msg::{Value, ValueKind};
use tickrpc_service::{Arguments, CallContext, CallError, Outcome, ServiceCatalog};

pub const SERVICE: &str = "Demo";

/// Simulated host clock, advanced once per host tick.
#[derive(Debug, Clone, Default)]
pub struct HostClock {
    micros: Arc<AtomicU64>,
}

impl HostClock {
    pub fn advance(&self, by: Duration) {
        self.micros
            .fetch_add(duration_to_micros(by), Ordering::Relaxed);
    }

    pub fn seconds(&self) -> f64 {
        self.micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }
}

struct Counter {
    value: i64,
}

pub fn register(catalog: &mut ServiceCatalog, clock: HostClock) {
    catalog
        .service(SERVICE)
        .documentation("Procedures exercised by the simulated clients.")
        .procedure("Add")
        .param("a", ValueKind::Int)
        .param("b", ValueKind::Int)
        .returns(ValueKind::Int)
        .handler(|_, args| add(args).into())
        .procedure("Countdown")
        .param("steps", ValueKind::Int)
        .returns(ValueKind::Int)
        .documentation("Suspends for `steps` ticks, then returns `steps`.")
        .handler(countdown)
        .procedure("Clock")
        .returns(ValueKind::Float)
        .documentation("Host clock in seconds.")
        .handler(move |_, _| Outcome::ok(clock.seconds()))
        .procedure("NewCounter")
        .returns(ValueKind::Object)
        .handler(|ctx, _| {
            let handle = ctx.objects().insert(Box::new(Counter { value: 0 }));
            Outcome::ok(Value::Object(handle))
        })
        .procedure("Increment")
        .param("counter", ValueKind::Object)
        .returns(ValueKind::Int)
        .handler(|ctx, args| increment(ctx, args).into())
        .procedure("DropCounter")
        .param("counter", ValueKind::Object)
        .handler(|ctx, args| drop_counter(ctx, args).into());
}

fn add(args: &Arguments<'_>) -> Result<i64, CallError> {
    let (a, b) = (args.i64(0)?, args.i64(1)?);
    a.checked_add(b)
        .ok_or_else(|| CallError::failed(SERVICE, "Overflow", format!("{a} + {b} overflows")))
}

fn countdown(_: &mut CallContext<'_>, args: &Arguments<'_>) -> Outcome {
    let steps = match args.i64(0) {
        Ok(steps) => steps,
        Err(err) => return Outcome::err(err),
    };
    let remaining = args
        .progress()
        .and_then(Value::as_i64)
        .unwrap_or(steps);
    if remaining > 0 {
        Outcome::yield_with(remaining - 1)
    } else {
        Outcome::ok(steps)
    }
}

fn increment(ctx: &mut CallContext<'_>, args: &Arguments<'_>) -> Result<i64, CallError> {
    let counter = ctx.objects().downcast_mut::<Counter>(args.object(0)?)?;
    counter.value += 1;
    Ok(counter.value)
}

fn drop_counter(ctx: &mut CallContext<'_>, args: &Arguments<'_>) -> Result<(), CallError> {
    let handle = args.object(0)?;
    ctx.objects().remove(handle)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tickrpc_msg::{ClientId, ProcedureCall};
    use tickrpc_service::{DetachedServices, Invocation, Objects};

    use super::*;

    #[test]
    fn countdown_suspends_for_each_step() {
        let mut catalog = ServiceCatalog::new();
        register(&mut catalog, HostClock::default());
        let mut objects = Objects::new();
        let mut services = DetachedServices::default();
        let mut ctx = CallContext::new(ClientId::new(), "demo", &catalog, &mut services, &mut objects);

        let bound = catalog
            .bind(&ProcedureCall::new(SERVICE, "Countdown").arg(2i64))
            .unwrap();
        let mut invocation = catalog.invoke(&mut ctx, &bound);
        let mut suspensions = 0;
        while let Invocation::Suspended(state) = invocation {
            suspensions += 1;
            invocation = catalog.resume(&mut ctx, state);
        }
        assert_eq!(suspensions, 2);
        assert_eq!(invocation, Invocation::Complete(Ok(Value::Int(2))));
    }

    #[test]
    fn add_reports_overflow_as_procedure_error() {
        let mut catalog = ServiceCatalog::new();
        register(&mut catalog, HostClock::default());
        let mut objects = Objects::new();
        let mut services = DetachedServices::default();
        let mut ctx = CallContext::new(ClientId::new(), "demo", &catalog, &mut services, &mut objects);
        let bound = catalog
            .bind(&ProcedureCall::new(SERVICE, "Add").arg(i64::MAX).arg(1i64))
            .unwrap();
        let Invocation::Complete(Err(err)) = catalog.invoke(&mut ctx, &bound) else {
            panic!("expected an error");
        };
        assert_eq!(err.to_rpc_error(false).name, "Overflow");
    }

    #[test]
    fn clock_follows_host_ticks() {
        let clock = HostClock::default();
        clock.advance(Duration::from_millis(1500));
        assert!((clock.seconds() - 1.5).abs() < 1e-9);
    }
}
