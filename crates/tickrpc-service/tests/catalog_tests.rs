//! ---
//! trpc_section: "03-service-catalog"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Procedure registration, binding, and invocation."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
use tickrpc_msg::{ClientId, ProcedureCall, Value, ValueKind};
use tickrpc_service::{
    CallContext, CallError, DetachedServices, Invocation, Objects, Outcome, ServiceCatalog,
};

struct Counter(i64);

fn catalog() -> ServiceCatalog {
    let mut catalog = ServiceCatalog::new();
    catalog
        .service("Test")
        .documentation("Procedures used by the catalog tests")
        .procedure("Add")
        .param("a", ValueKind::Int)
        .optional("b", ValueKind::Int, 10i64)
        .returns(ValueKind::Int)
        .handler(|_, args| Outcome::from(args.i64(0).and_then(|a| Ok(a + args.i64(1)?))))
        .procedure("Greet")
        .nullable("name", ValueKind::String)
        .returns(ValueKind::String)
        .handler(|ctx, args| {
            let name = args.get(0).as_str().unwrap_or(ctx.client_name()).to_owned();
            Outcome::ok(format!("hello {name}"))
        })
        .procedure("Countdown")
        .param("steps", ValueKind::Int)
        .returns(ValueKind::Int)
        .handler(|_, args| {
            let remaining = match args.progress() {
                Some(progress) => progress.as_i64().unwrap_or(0),
                None => args.i64(0).unwrap_or(0),
            };
            if remaining > 0 {
                Outcome::yield_with(remaining - 1)
            } else {
                Outcome::ok(0i64)
            }
        })
        .procedure("Explode")
        .handler(|_, _| panic!("kaboom"))
        .procedure("NewCounter")
        .returns(ValueKind::Object)
        .handler(|ctx, _| Outcome::ok(Value::Object(ctx.objects().insert(Box::new(Counter(0))))))
        .procedure("Increment")
        .param("counter", ValueKind::Object)
        .returns(ValueKind::Int)
        .handler(|ctx, args| {
            let handle = match args.object(0) {
                Ok(handle) => handle,
                Err(err) => return Outcome::err(err),
            };
            Outcome::from(ctx.objects().downcast_mut::<Counter>(handle).map(|counter| {
                counter.0 += 1;
                counter.0
            }))
        })
        .procedure("Stream")
        .handler(|ctx, _| {
            Outcome::from(ctx.add_stream(&ProcedureCall::new("Test", "Add").arg(1i64), true))
        });
    catalog
}

fn with_context<R>(
    catalog: &ServiceCatalog,
    objects: &mut Objects,
    f: impl FnOnce(&mut CallContext<'_>) -> R,
) -> R {
    let mut services = DetachedServices::default();
    let mut ctx = CallContext::new(ClientId::new(), "tester", catalog, &mut services, objects);
    f(&mut ctx)
}

fn invoke(catalog: &ServiceCatalog, objects: &mut Objects, call: ProcedureCall) -> Invocation {
    let bound = match catalog.bind(&call) {
        Ok(bound) => bound,
        Err(err) => return Invocation::Complete(Err(err)),
    };
    with_context(catalog, objects, |ctx| catalog.invoke(ctx, &bound))
}

#[test]
fn defaults_fill_missing_arguments() {
    let catalog = catalog();
    let mut objects = Objects::new();
    let result = invoke(&catalog, &mut objects, ProcedureCall::new("Test", "Add").arg(5i64));
    assert_eq!(result, Invocation::Complete(Ok(Value::Int(15))));
}

#[test]
fn binding_rejects_bad_calls() {
    let catalog = catalog();
    assert!(matches!(
        catalog.bind(&ProcedureCall::new("Nope", "Add")),
        Err(CallError::UnknownService(_))
    ));
    assert!(matches!(
        catalog.bind(&ProcedureCall::new("Test", "Nope")),
        Err(CallError::UnknownProcedure { .. })
    ));
    assert!(matches!(
        catalog.bind(&ProcedureCall::new("Test", "Add")),
        Err(CallError::MissingArgument { .. })
    ));
    assert!(matches!(
        catalog.bind(&ProcedureCall::new("Test", "Add").arg("x")),
        Err(CallError::ArgumentType { .. })
    ));
    assert!(matches!(
        catalog.bind(&ProcedureCall::new("Test", "Add").arg(1i64).arg(2i64).arg(3i64)),
        Err(CallError::TooManyArguments { .. })
    ));
    assert!(matches!(
        catalog.bind(&ProcedureCall::new("Test", "Add").arg_at(0, 1i64).arg_at(0, 2i64)),
        Err(CallError::DuplicateArgument { .. })
    ));
}

#[test]
fn nullable_parameters_accept_null() {
    let catalog = catalog();
    let mut objects = Objects::new();
    let result = invoke(
        &catalog,
        &mut objects,
        ProcedureCall::new("Test", "Greet").arg(Value::Null),
    );
    assert_eq!(result, Invocation::Complete(Ok(Value::from("hello tester"))));
}

#[test]
fn yielding_calls_resume_with_progress() {
    let catalog = catalog();
    let mut objects = Objects::new();
    let mut invocation = invoke(
        &catalog,
        &mut objects,
        ProcedureCall::new("Test", "Countdown").arg(3i64),
    );
    let mut suspensions = 0;
    while let Invocation::Suspended(state) = invocation {
        suspensions += 1;
        invocation = with_context(&catalog, &mut objects, |ctx| catalog.resume(ctx, state));
    }
    assert_eq!(suspensions, 3);
    assert_eq!(invocation, Invocation::Complete(Ok(Value::Int(0))));
}

#[test]
fn panics_become_errors() {
    let catalog = catalog();
    let mut objects = Objects::new();
    let result = invoke(&catalog, &mut objects, ProcedureCall::new("Test", "Explode"));
    match result {
        Invocation::Complete(Err(CallError::Panicked { message, .. })) => {
            assert_eq!(message, "kaboom")
        }
        other => panic!("unexpected invocation {other:?}"),
    }
}

#[test]
fn object_handles_round_trip_through_calls() {
    let catalog = catalog();
    let mut objects = Objects::new();
    let Invocation::Complete(Ok(Value::Object(handle))) =
        invoke(&catalog, &mut objects, ProcedureCall::new("Test", "NewCounter"))
    else {
        panic!("expected object handle");
    };
    for expected in 1..=2 {
        let result = invoke(
            &catalog,
            &mut objects,
            ProcedureCall::new("Test", "Increment").arg(Value::Object(handle)),
        );
        assert_eq!(result, Invocation::Complete(Ok(Value::Int(expected))));
    }
    objects.remove(handle).expect("remove counter");
    let stale = invoke(
        &catalog,
        &mut objects,
        ProcedureCall::new("Test", "Increment").arg(Value::Object(handle)),
    );
    assert!(matches!(stale, Invocation::Complete(Err(CallError::Handle(_)))));
}

#[test]
fn detached_services_refuse_stream_mutation() {
    let catalog = catalog();
    let mut objects = Objects::new();
    let result = invoke(&catalog, &mut objects, ProcedureCall::new("Test", "Stream"));
    assert!(matches!(
        result,
        Invocation::Complete(Err(CallError::Unavailable(_)))
    ));
}

#[test]
fn describe_lists_services_in_registration_order() {
    let catalog = catalog();
    let Value::List(services) = catalog.describe() else {
        panic!("describe returns a list");
    };
    assert_eq!(services.len(), 1);
    let Value::Map(entries) = &services[0] else {
        panic!("service entry is a map");
    };
    assert!(entries.contains(&(Value::from("name"), Value::from("Test"))));
    assert_eq!(catalog.procedure_count(), 7);
}
