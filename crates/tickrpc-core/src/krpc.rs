//! ---
//! trpc_section: "01-core-functionality"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Tick engine, scheduling, and streaming."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
//! Built-in `KRPC` service: client identity, server status, introspection,
//! and stream management.

use tickrpc_msg::{Value, ValueKind};
use tickrpc_service::{Arguments, CallContext, CallError, Outcome, ServiceCatalog};

pub const SERVICE: &str = "KRPC";

pub fn register(catalog: &mut ServiceCatalog) {
    catalog
        .service(SERVICE)
        .documentation("Main server functionality.")
        .procedure("GetClientID")
        .returns(ValueKind::Bytes)
        .documentation("Identifier of the calling client.")
        .handler(|ctx, _| Outcome::ok(Value::Bytes(ctx.client().as_bytes().to_vec())))
        .procedure("GetClientName")
        .returns(ValueKind::String)
        .documentation("Name the calling client gave on connect.")
        .handler(|ctx, _| Outcome::ok(ctx.client_name().to_owned()))
        .procedure("GetStatus")
        .returns(ValueKind::Map)
        .documentation("Server version and statistics.")
        .handler(|ctx, _| Outcome::ok(ctx.status()))
        .procedure("GetServices")
        .returns(ValueKind::List)
        .documentation("Every service and procedure the server offers.")
        .handler(|ctx, _| Outcome::ok(ctx.catalog().describe()))
        .procedure("AddStream")
        .param("call", ValueKind::Call)
        .optional("start", ValueKind::Bool, true)
        .returns(ValueKind::UInt)
        .documentation("Re-evaluate a call every tick and push changed results.")
        .handler(|ctx, args| add_stream(ctx, args).into())
        .procedure("StartStream")
        .param("id", ValueKind::UInt)
        .handler(|ctx, args| start_stream(ctx, args).into())
        .procedure("SetStreamRate")
        .param("id", ValueKind::UInt)
        .param("rate", ValueKind::Float)
        .documentation("Limit a stream to `rate` updates per second; zero removes the limit.")
        .handler(|ctx, args| set_stream_rate(ctx, args).into())
        .procedure("RemoveStream")
        .param("id", ValueKind::UInt)
        .handler(|ctx, args| remove_stream(ctx, args).into());
}

fn add_stream(ctx: &mut CallContext<'_>, args: &Arguments<'_>) -> Result<u64, CallError> {
    let call = args.call(0)?;
    let start = args.bool(1)?;
    ctx.add_stream(call, start)
}

fn start_stream(ctx: &mut CallContext<'_>, args: &Arguments<'_>) -> Result<(), CallError> {
    ctx.start_stream(args.u64(0)?)
}

fn set_stream_rate(ctx: &mut CallContext<'_>, args: &Arguments<'_>) -> Result<(), CallError> {
    let id = args.u64(0)?;
    let rate = args.f64(1)?;
    ctx.set_stream_rate(id, rate as f32)
}

fn remove_stream(ctx: &mut CallContext<'_>, args: &Arguments<'_>) -> Result<(), CallError> {
    ctx.remove_stream(args.u64(0)?)
}
