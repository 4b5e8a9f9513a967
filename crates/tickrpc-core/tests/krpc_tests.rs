//! ---
//! trpc_section: "01-core-functionality"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Tick engine, scheduling, and streaming."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
mod support;

use support::{call, config, send, single_value, Harness};
use tickrpc_msg::{ProcedureCall, RequestPeer, Response, Value};

fn krpc(procedure: &str) -> ProcedureCall {
    ProcedureCall::new("KRPC", procedure)
}

fn lookup<'a>(map: &'a Value, key: &str) -> Option<&'a Value> {
    match map {
        Value::Map(entries) => entries
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v),
        _ => None,
    }
}

fn roundtrip(harness: &mut Harness, peer: &RequestPeer, call: ProcedureCall) -> Response {
    send(peer, call);
    harness.tick(1);
    peer.recv().expect("response")
}

#[test]
fn identifies_the_calling_client() {
    let mut harness = Harness::new(config());
    let peer = harness.connect("navigator");

    let response = roundtrip(&mut harness, &peer, krpc("GetClientID"));
    assert_eq!(
        single_value(&response),
        &Value::Bytes(peer.id().as_bytes().to_vec())
    );
    let response = roundtrip(&mut harness, &peer, krpc("GetClientName"));
    assert_eq!(single_value(&response), &Value::from("navigator"));
}

#[test]
fn status_reports_version_and_counters() {
    let mut harness = Harness::new(config());
    let peer = harness.connect("status");
    send(&peer, call("Add").arg(1i64).arg(1i64));
    harness.tick(1);
    peer.recv().expect("add response");

    let response = roundtrip(&mut harness, &peer, krpc("GetStatus"));
    let status = single_value(&response);
    assert!(matches!(lookup(status, "version"), Some(Value::String(_))));
    assert_eq!(lookup(status, "calls_executed"), Some(&Value::UInt(1)));
    assert_eq!(lookup(status, "rpc_clients"), Some(&Value::UInt(1)));
}

#[test]
fn services_listing_includes_builtin_and_registered_services() {
    let mut harness = Harness::new(config());
    let peer = harness.connect("explorer");
    let response = roundtrip(&mut harness, &peer, krpc("GetServices"));
    let Value::List(services) = single_value(&response) else {
        panic!("expected a list of services");
    };
    let names: Vec<_> = services
        .iter()
        .filter_map(|service| lookup(service, "name").and_then(Value::as_str))
        .collect();
    assert!(names.contains(&"KRPC"));
    assert!(names.contains(&"Test"));
}

#[test]
fn stream_lifecycle_through_requests() {
    let mut harness = Harness::new(config());
    let (peer, stream) = harness.connect_with_stream("streamer");

    let response = roundtrip(
        &mut harness,
        &peer,
        krpc("AddStream").arg(call("Gauge")).arg(false),
    );
    let id = single_value(&response).as_u64().expect("stream id");
    assert!(!harness.engine.streams().is_started(id));
    assert_eq!(stream.pending(), 0);

    let response = roundtrip(
        &mut harness,
        &peer,
        krpc("SetStreamRate").arg(id).arg(0.0f64),
    );
    assert_eq!(single_value(&response), &Value::Null);

    roundtrip(&mut harness, &peer, krpc("StartStream").arg(id));
    assert_eq!(stream.drain().len(), 1);

    roundtrip(&mut harness, &peer, krpc("RemoveStream").arg(id));
    harness.tick(1);
    assert!(!harness.engine.streams().contains(id));
}

#[test]
fn unknown_stream_id_is_a_typed_error() {
    let mut harness = Harness::new(config());
    let (peer, _stream) = harness.connect_with_stream("streamer");
    let response = roundtrip(&mut harness, &peer, krpc("StartStream").arg(99u64));
    let error = response.results[0].error.as_ref().expect("error result");
    assert_eq!(error.service, "KRPC");
    assert_eq!(error.name, "StreamError");
    assert_eq!(error.description, "stream 99 does not exist");
}

#[test]
fn stream_evaluation_cannot_manage_streams() {
    let mut harness = Harness::new(config());
    let (peer, stream) = harness.connect_with_stream("recursive");
    harness.tick(1);
    let nested = krpc("AddStream").arg(call("Gauge"));
    harness
        .engine
        .add_stream(peer.id(), &nested, true)
        .expect("add stream");

    harness.tick(1);
    let updates = stream.drain();
    assert_eq!(updates.len(), 1);
    let error = updates[0].results[0]
        .result
        .error
        .as_ref()
        .expect("error result");
    assert!(error.description.contains("not available"));
    assert_eq!(harness.engine.streams().len(), 0);
}

#[test]
fn status_stream_sees_engine_statistics() {
    let mut harness = Harness::new(config());
    let (peer, stream) = harness.connect_with_stream("dashboard");
    harness.tick(1);
    harness
        .engine
        .add_stream(peer.id(), &krpc("GetStatus"), true)
        .expect("add stream");
    harness.tick(1);
    let update = stream.recv().expect("update");
    let status = update.results[0].result.value.as_ref().expect("status");
    assert_eq!(lookup(status, "stream_calls"), Some(&Value::UInt(1)));
}
