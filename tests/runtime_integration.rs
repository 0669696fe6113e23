//! End-to-end tests of the block execution loop: dispatch, rule protocol,
//! generator lifecycle and the shutdown handshake, over real threads.

use blockflow::blocks::{Mask, Ticker, ToFile};
use blockflow::fabric::Fabric;
use blockflow::{runtime, Message, Payload, Route};
use serde_json::json;
use std::time::Duration;

fn map(v: serde_json::Value) -> Payload {
    v.as_object().unwrap().clone()
}

const TICK: Duration = Duration::from_secs(1);

#[test]
fn test_rule_round_trip_over_mailboxes() {
    blockflow::telemetry::init();
    let mask = runtime::spawn("mask", Box::new(Mask::new())).unwrap();

    let initial = mask.rule(TICK).unwrap();
    assert_eq!(initial["Mask"], json!({}));

    mask.set_rule(map(json!({"Mask": {"a": ""}, "Bogus": 1}))).unwrap();
    let updated = mask.rule(TICK).unwrap();
    assert_eq!(updated["Mask"], json!({"a": ""}));
    assert!(!updated.contains_key("Bogus"));

    mask.quit(TICK).unwrap();
}

#[test]
fn test_transform_pipeline_through_fabric() {
    blockflow::telemetry::init();
    let mut upstream = runtime::spawn("up", Box::new(Mask::new())).unwrap();
    let downstream = runtime::spawn("down", Box::new(Mask::new())).unwrap();
    upstream.set_rule(map(json!({"Mask": {"a": "", "b": ""}}))).unwrap();
    downstream.set_rule(map(json!({"Mask": {"a": ""}}))).unwrap();

    let mut fabric = Fabric::new();
    fabric.connect(&mut upstream, &downstream).unwrap();

    upstream
        .send(Message::data(map(json!({"a": 1, "b": 2, "c": 3}))))
        .unwrap();

    let out = downstream.outbound().unwrap().recv_timeout(TICK).unwrap();
    assert_eq!(out.route, Route::Data);
    assert_eq!(out.payload, map(json!({"a": 1})));

    upstream.quit(TICK).unwrap();
    downstream.quit(TICK).unwrap();
    fabric.join();
}

#[test]
fn test_fabric_fans_out_to_every_subscriber() {
    blockflow::telemetry::init();
    let mut source = runtime::spawn("src", Box::new(Mask::new())).unwrap();
    source.set_rule(map(json!({"Mask": {"n": ""}}))).unwrap();
    let left = runtime::spawn("left", Box::new(Mask::new())).unwrap();
    let right = runtime::spawn("right", Box::new(Mask::new())).unwrap();
    for sink in [&left, &right] {
        sink.set_rule(map(json!({"Mask": {"n": ""}}))).unwrap();
    }

    let mut fabric = Fabric::new();
    fabric.connect(&mut source, &left).unwrap();
    fabric.connect(&mut source, &right).unwrap();

    source.send(Message::data(map(json!({"n": 7})))).unwrap();

    for sink in [&left, &right] {
        let out = sink.outbound().unwrap().recv_timeout(TICK).unwrap();
        assert_eq!(out.payload, map(json!({"n": 7})));
    }

    source.quit(TICK).unwrap();
    left.quit(TICK).unwrap();
    right.quit(TICK).unwrap();
    fabric.join();
}

#[test]
fn test_ticker_emits_and_reconfigures() {
    blockflow::telemetry::init();
    let ticker = runtime::spawn("ticker", Box::new(Ticker::new())).unwrap();
    ticker.set_rule(map(json!({"Interval": "50ms"}))).unwrap();

    let outbound = ticker.outbound().unwrap();
    let first = outbound.recv_timeout(TICK).unwrap();
    let stamp = first.payload["time"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());

    // A second tick arrives well within the timeout at 50ms cadence.
    outbound.recv_timeout(TICK).unwrap();

    // An invalid interval is rejected and ticking continues.
    ticker.set_rule(map(json!({"Interval": "whenever"}))).unwrap();
    let fault = ticker.errors().recv_timeout(TICK).unwrap();
    assert!(fault.error.to_string().contains("invalid duration"));
    outbound.recv_timeout(TICK).unwrap();

    ticker.quit(TICK).unwrap();
}

#[test]
fn test_shutdown_flushes_file_sink() {
    blockflow::telemetry::init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sink.jsonl");

    let sink = runtime::spawn("sink", Box::new(ToFile::new())).unwrap();
    sink.set_rule(map(json!({"Filename": path.to_str().unwrap()}))).unwrap();

    for i in 0..10 {
        sink.send(Message::data(map(json!({"i": i})))).unwrap();
    }
    // quit returns only after tidy_up flushed and the loop thread joined.
    sink.quit(TICK).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 10);
    assert!(text.lines().next().unwrap().contains("\"i\":0"));
}

#[test]
fn test_quit_races_with_inbound_traffic() {
    blockflow::telemetry::init();
    for _ in 0..20 {
        let mask = runtime::spawn("mask", Box::new(Mask::new())).unwrap();
        let sender = mask.sender();
        let pusher = std::thread::spawn(move || {
            for i in 0..100 {
                let msg = Message::data(map(json!({"i": i})));
                if sender.send(blockflow::Delivery::Message(msg)).is_err() {
                    break;
                }
            }
        });
        // Quit concurrently with the pushes; the handshake must still
        // complete exactly once.
        mask.quit(TICK).unwrap();
        pusher.join().unwrap();
    }
}

#[test]
fn test_unroutable_messages_are_dropped_silently() {
    blockflow::telemetry::init();
    let mask = runtime::spawn("mask", Box::new(Mask::new())).unwrap();
    mask.send(Message {
        payload: map(json!({"a": 1})),
        route: Route::Unknown("rewire".to_string()),
    })
    .unwrap();
    mask.send(Message {
        payload: Payload::new(),
        route: Route::Connect,
    })
    .unwrap();

    assert!(mask
        .outbound()
        .unwrap()
        .recv_timeout(Duration::from_millis(200))
        .is_err());
    assert!(mask.errors().try_recv().is_err());
    mask.quit(TICK).unwrap();
}
