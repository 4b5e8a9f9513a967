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

use std::thread;
use std::time::{Duration, Instant};

use support::{call, config, send, single_value, Harness};
use tickrpc_common::EngineConfig;
use tickrpc_core::EngineEvent;
use tickrpc_msg::{ClientId, Request, Value};

#[test]
fn yielding_request_does_not_hold_up_other_clients() {
    let mut harness = Harness::new(config());
    let slow = harness.connect("slow");
    let quick = harness.connect("quick");
    send(&slow, call("Countdown").arg(3i64));
    send(&quick, call("Add").arg(1i64).arg(2i64));

    harness.tick(1);
    assert_eq!(single_value(&quick.recv().expect("quick response")), &Value::Int(3));
    assert_eq!(slow.pending(), 0);
    assert_eq!(harness.engine.pending_requests(), 1);

    harness.tick(2);
    assert_eq!(slow.pending(), 0);

    harness.tick(1);
    let responses = slow.drain();
    assert_eq!(responses.len(), 1);
    assert_eq!(single_value(&responses[0]), &Value::Int(0));
    assert_eq!(harness.engine.pending_requests(), 0);
    assert_eq!(harness.engine.stats().calls_executed, 2);
}

#[test]
fn budget_allows_one_overrunning_call_per_tick() {
    let mut harness = Harness::new(EngineConfig {
        max_time_per_tick: Duration::from_millis(5),
        ..config()
    });
    let peers: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|name| harness.connect(name))
        .collect();
    for peer in &peers {
        send(peer, call("Sleep").arg(10i64));
    }

    for tick in 1..=3 {
        harness.tick(1);
        assert_eq!(harness.sleeps(), tick, "one call per overrunning tick");
    }
    for peer in &peers {
        assert_eq!(peer.drain().len(), 1);
    }
}

#[test]
fn disconnect_discards_pending_request() {
    let mut harness = Harness::new(config());
    let peer = harness.connect("leaver");
    let id = peer.id();
    send(&peer, call("Countdown").arg(5i64));
    harness.tick(1);
    assert_eq!(harness.engine.pending_requests(), 1);

    peer.disconnect();
    harness.tick(1);
    assert_eq!(harness.engine.pending_requests(), 0);
    assert_eq!(harness.engine.rpc_client_count(), 0);
    assert_eq!(peer.pending(), 0);

    let events = harness.engine.drain_events();
    assert!(events.contains(&EngineEvent::ClientDisconnected { client: id }));
    assert!(events
        .iter()
        .any(|event| matches!(event, EngineEvent::ClientConnected { client, .. } if *client == id)));
}

#[test]
fn one_call_per_tick_serves_a_single_request() {
    let mut harness = Harness::new(EngineConfig {
        one_call_per_tick: true,
        ..config()
    });
    let first = harness.connect("first");
    let second = harness.connect("second");
    send(&first, call("Add").arg(1i64).arg(1i64));
    send(&second, call("Add").arg(2i64).arg(2i64));

    harness.tick(1);
    assert_eq!(first.pending(), 1);
    assert_eq!(second.pending(), 0);
    assert_eq!(harness.engine.stats().calls_executed, 1);

    harness.tick(1);
    assert_eq!(single_value(&second.recv().expect("second response")), &Value::Int(4));
}

#[test]
fn round_robin_shares_ticks_between_busy_clients() {
    let mut harness = Harness::new(EngineConfig {
        one_call_per_tick: true,
        ..config()
    });
    let peers: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|name| harness.connect(name))
        .collect();
    for peer in &peers {
        for _ in 0..4 {
            send(peer, call("Add").arg(0i64).arg(0i64));
        }
    }

    harness.tick(3);
    assert!(peers.iter().all(|peer| peer.pending() == 1));
    harness.tick(3);
    assert!(peers.iter().all(|peer| peer.pending() == 2));
}

#[test]
fn procedure_errors_follow_verbosity() {
    let mut terse = Harness::new(config());
    let peer = terse.connect("terse");
    send(&peer, call("Fail"));
    terse.tick(1);
    let response = peer.recv().expect("response");
    let error = response.results[0].error.as_ref().expect("error result");
    assert_eq!(error.service, "Test");
    assert_eq!(error.name, "Boom");
    assert_eq!(error.description, "went wrong");
    assert!(error.stack_trace.is_empty());

    let mut verbose = Harness::new(EngineConfig {
        verbose_errors: true,
        ..config()
    });
    let peer = verbose.connect("verbose");
    send(&peer, call("Fail"));
    verbose.tick(1);
    let response = peer.recv().expect("response");
    let error = response.results[0].error.as_ref().expect("error result");
    assert_eq!(error.stack_trace, "Procedure: at the bottom");
}

#[test]
fn unknown_procedure_is_reported_per_call() {
    let mut harness = Harness::new(config());
    let peer = harness.connect("lost");
    send(&peer, call("Missing"));
    harness.tick(1);
    let response = peer.recv().expect("response");
    assert!(response.error.is_none());
    let error = response.results[0].error.as_ref().expect("error result");
    assert_eq!(error.description, "procedure Test.Missing not found");
}

#[test]
fn malformed_request_closes_the_client() {
    let mut harness = Harness::new(config());
    let peer = harness.connect("garbled");
    peer.send_raw(b"not a request".to_vec()).expect("send raw");
    harness.tick(1);
    assert!(!peer.connected());
    assert_eq!(harness.engine.rpc_client_count(), 0);
}

#[test]
fn multi_call_request_answers_once_with_every_result() {
    let mut harness = Harness::new(config());
    let peer = harness.connect("batch");
    let request = Request {
        calls: vec![
            call("Add").arg(1i64).arg(2i64),
            call("Countdown").arg(1i64),
            call("Add").arg(3i64).arg(4i64),
        ],
    };
    peer.send(&request).expect("send");

    harness.tick(1);
    assert_eq!(peer.pending(), 0);
    harness.tick(1);
    let response = peer.recv().expect("response");
    let values: Vec<_> = response
        .results
        .iter()
        .map(|result| result.value.clone())
        .collect();
    assert_eq!(
        values,
        vec![Some(Value::Int(3)), Some(Value::Int(0)), Some(Value::Int(7))]
    );
}

#[test]
fn empty_request_gets_request_level_error() {
    let mut harness = Harness::new(config());
    let peer = harness.connect("empty");
    peer.send(&Request { calls: Vec::new() }).expect("send");
    harness.tick(1);
    let response = peer.recv().expect("response");
    assert!(response.error.is_some());
    assert!(response.results.is_empty());
    assert_eq!(harness.engine.rpc_client_count(), 1);
}

#[test]
fn stream_connection_without_request_side_is_closed() {
    let mut harness = Harness::new(config());
    let orphan = harness
        .server
        .connect_stream(ClientId::new())
        .expect("connect stream");
    harness.tick(1);
    assert!(!orphan.connected());
    assert_eq!(harness.engine.stream_client_count(), 0);
}

#[test]
fn stopping_servers_disconnects_clients() {
    let mut harness = Harness::new(config());
    let peer = harness.connect("bystander");
    harness.tick(1);
    assert_eq!(harness.engine.rpc_client_count(), 1);

    harness.engine.stop_all();
    assert!(!harness.engine.any_running());
    assert!(!peer.connected());
    assert_eq!(harness.engine.rpc_client_count(), 0);
    let events = harness.engine.drain_events();
    assert!(events
        .iter()
        .any(|event| matches!(event, EngineEvent::ServerStopped(_))));
    assert!(events.contains(&EngineEvent::ClientDisconnected { client: peer.id() }));
}

#[test]
fn adaptive_budget_settles_at_idle_value_without_load() {
    let mut harness = Harness::new(EngineConfig {
        adaptive_rate_control: true,
        ..config()
    });
    harness.tick(3);
    assert_eq!(
        harness.engine.budget(),
        harness.engine.config().rate_control.idle_time_per_tick
    );
}

#[test]
fn clear_stats_resets_counters() {
    let mut harness = Harness::new(config());
    let peer = harness.connect("counter");
    send(&peer, call("Add").arg(1i64).arg(1i64));
    harness.tick(1);
    assert_eq!(harness.engine.stats().calls_executed, 1);
    assert!(harness.engine.stats().bytes_read > 0);

    harness.engine.clear_stats();
    let stats = harness.engine.stats();
    assert_eq!(stats.calls_executed, 0);
    assert_eq!(stats.bytes_read, 0);
    assert_eq!(stats.rpc_clients, 1);
}

fn blocking(receive_timeout: Duration, budget: Duration) -> EngineConfig {
    EngineConfig {
        blocking_receive: true,
        receive_timeout,
        max_time_per_tick: budget,
        ..config()
    }
}

fn timed_update(harness: &mut Harness) -> Duration {
    let start = Instant::now();
    harness.tick(1);
    start.elapsed()
}

#[test]
fn blocking_receive_stops_at_the_tick_budget() {
    let mut harness = Harness::new(blocking(Duration::from_millis(200), Duration::from_millis(5)));
    let _idle = harness.connect("idle");
    harness.tick(1);

    let elapsed = timed_update(&mut harness);
    assert!(elapsed >= Duration::from_millis(5), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(150), "returned after {elapsed:?}");
}

#[test]
fn blocking_receive_stops_at_the_receive_timeout() {
    let mut harness = Harness::new(blocking(Duration::from_millis(2), Duration::from_millis(100)));
    let _idle = harness.connect("idle");
    harness.tick(1);

    let elapsed = timed_update(&mut harness);
    assert!(elapsed >= Duration::from_millis(2), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(80), "returned after {elapsed:?}");
}

#[test]
fn blocking_receive_does_not_wait_without_clients() {
    let mut harness = Harness::new(blocking(Duration::from_millis(200), Duration::from_millis(200)));
    let elapsed = timed_update(&mut harness);
    assert!(elapsed < Duration::from_millis(150), "returned after {elapsed:?}");
}

#[test]
fn blocking_receive_serves_a_request_arriving_mid_tick() {
    let mut harness = Harness::new(blocking(Duration::from_millis(500), Duration::from_millis(500)));
    let peer = harness.connect("late");
    harness.tick(1);

    let elapsed = thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(10));
            send(&peer, call("Add").arg(2i64).arg(3i64));
        });
        timed_update(&mut harness)
    });
    assert!(elapsed < Duration::from_millis(400), "returned after {elapsed:?}");
    assert_eq!(single_value(&peer.recv().expect("response")), &Value::Int(5));
}

#[test]
fn undrained_events_stay_bounded() {
    let mut harness = Harness::new(EngineConfig {
        event_queue_capacity: 8,
        ..config()
    });
    let peer = harness.connect("chatty");
    for _ in 0..50 {
        send(&peer, call("Add").arg(1i64).arg(1i64));
        harness.tick(1);
    }
    assert_eq!(peer.drain().len(), 50);
    assert_eq!(harness.engine.queued_events(), 8);
    let events = harness.engine.drain_events();
    assert!(events
        .iter()
        .all(|event| matches!(event, EngineEvent::ClientActivity { .. })));
    assert_eq!(harness.engine.queued_events(), 0);

    harness.engine.config_mut().event_queue_capacity = 0;
    send(&peer, call("Add").arg(1i64).arg(1i64));
    harness.tick(1);
    assert_eq!(harness.engine.queued_events(), 0);
    assert_eq!(peer.drain().len(), 1);
}
