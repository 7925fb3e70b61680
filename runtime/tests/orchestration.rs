//! End-to-end orchestration tests.
//!
//! Every engine here is built with a [`ManualScheduler`] and a [`MockTransport`],
//! so each test decides when transports answer and when spawned work runs.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use courier_core::cache::StorageClass;
use courier_core::config::{BehaviorConfig, ConfigSource, LayerConfig, TransportConfig};
use courier_core::processor::Flow;
use courier_core::retry::{RetryRule, RetryScope};
use courier_core::transport::{Outcome, Response, TransportError};
use courier_runtime::{ChainError, Courier, CourierError};
use courier_testing::{Event, EventLog, ManualScheduler, MockTransport, init_test_tracing};
use futures::channel::oneshot;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn engine(transport: &MockTransport) -> (Courier, ManualScheduler) {
    init_test_tracing();
    let scheduler = ManualScheduler::new();
    let courier = Courier::builder()
        .scheduler(scheduler.clone())
        .transport(transport.clone())
        .build();
    (courier, scheduler)
}

fn unauthorized_then_retry(scope: RetryScope) -> RetryRule<Response> {
    RetryRule::builder()
        .condition(|response: &Response| response.status == 401)
        .scope(scope)
        .build()
}

#[test]
fn test_success_runs_loading_success_finally_in_order() {
    let transport = MockTransport::new();
    let (courier, scheduler) = engine(&transport);
    courier.set_global_config(LayerConfig::transport(
        TransportConfig::new().base_url("/api").header("accept", "application/json"),
    ));
    let users = courier.create_module(LayerConfig::transport(
        TransportConfig::new().base_url("/users").header("x-module", "users"),
    ));

    let log = EventLog::new();
    let _chain = log.attach(users.request(TransportConfig::new().url("/42")));
    scheduler.run_until_idle();
    assert_eq!(log.names(), vec!["loading(true)"]);
    assert_eq!(courier.in_flight_count(), 1);

    assert!(transport.resolve_next(Ok(Response::ok(json!({"id": 42})))));
    scheduler.run_until_idle();

    assert_eq!(log.names(), vec!["loading(true)", "loading(false)", "success", "finally"]);
    assert_eq!(log.successes(), vec![json!({"id": 42})]);
    assert_eq!(courier.in_flight_count(), 0);

    let request = &transport.calls()[0];
    assert_eq!(request.endpoint(), "/api/users/42");
    assert_eq!(request.headers.get("accept").map(String::as_str), Some("application/json"));
    assert_eq!(request.headers.get("x-module").map(String::as_str), Some("users"));
}

#[test]
fn test_predicate_and_extractor_shape_the_result() {
    let transport = MockTransport::new();
    let (courier, scheduler) = engine(&transport);
    courier.set_global_config(LayerConfig::behavior(
        BehaviorConfig::new()
            .predicate(|response| response.body["code"] == 0)
            .extractor(|response| response.body["data"].clone()),
    ));
    let module = courier.create_module(LayerConfig::default());

    let accepted = EventLog::new();
    let _a = accepted.attach(module.request(TransportConfig::new().url("/ok")));
    let rejected = EventLog::new();
    let _b = rejected.attach(module.request(TransportConfig::new().url("/rejected")));

    transport.resolve(0, Ok(Response::ok(json!({"code": 0, "data": {"id": 1}}))));
    transport.resolve(1, Ok(Response::ok(json!({"code": 5, "message": "nope"}))));
    scheduler.run_until_idle();

    assert_eq!(accepted.successes(), vec![json!({"id": 1})]);
    assert_eq!(rejected.names(), vec!["loading(true)", "loading(false)", "error", "finally"]);
    assert!(matches!(
        &rejected.events()[2],
        Event::Error(response) if response.body["code"] == 5
    ));
}

#[test]
fn test_transport_error_reaches_transport_error_processors() {
    let transport = MockTransport::always(Err(TransportError::Network("connection reset".into())));
    let (courier, scheduler) = engine(&transport);
    let module = courier.create_module(LayerConfig::default());

    let log = EventLog::new();
    let _chain = log.attach(module.request(TransportConfig::new().url("/flaky")));
    scheduler.run_until_idle();

    assert_eq!(
        log.names(),
        vec!["loading(true)", "loading(false)", "transport_error", "finally"]
    );
    assert!(matches!(
        log.events().last(),
        Some(Event::Finally(Outcome::Failed(TransportError::Network(_))))
    ));
}

#[test]
fn test_processors_run_nearest_first_and_stop_short_circuits() {
    let transport = MockTransport::always(Ok(Response::ok(json!("done"))));
    let (courier, scheduler) = engine(&transport);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = |label: &'static str| {
        let seen = Arc::clone(&seen);
        move |_: &Value| seen.lock().unwrap().push(label)
    };

    courier.set_global_config(LayerConfig::behavior(BehaviorConfig::new().success(record("global"))));
    let module_seen = Arc::clone(&seen);
    let module = courier.create_module(LayerConfig::behavior(BehaviorConfig::new().success(
        move |_| {
            module_seen.lock().unwrap().push("module");
            Flow::Stop
        },
    )));

    let _chain = module
        .request_with(
            TransportConfig::new().url("/x"),
            BehaviorConfig::new().success(record("call")),
        )
        .success(record("handle"));
    scheduler.run_until_idle();

    assert_eq!(*seen.lock().unwrap(), vec!["handle", "call", "module"]);
}

#[test]
fn test_layer_loading_processors_see_start_and_end() {
    let transport = MockTransport::new();
    let (courier, scheduler) = engine(&transport);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    courier.set_global_config(LayerConfig::behavior(
        BehaviorConfig::new().loading(move |on| sink.lock().unwrap().push(on)),
    ));
    let module = courier.create_module(LayerConfig::default());

    let _chain = module.request(TransportConfig::new().url("/slow"));
    assert_eq!(*seen.lock().unwrap(), vec![true]);

    transport.resolve_next(Ok(Response::ok(Value::Null)));
    scheduler.run_until_idle();
    assert_eq!(*seen.lock().unwrap(), vec![true, false]);
}

#[test]
fn test_finally_receives_the_resolved_request() {
    let transport = MockTransport::always(Ok(Response::ok(json!({}))));
    let (courier, scheduler) = engine(&transport);
    let endpoint = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&endpoint);
    let module = courier.create_module(LayerConfig::transport(TransportConfig::new().base_url("/orders")));

    let _chain = module
        .request(TransportConfig::new().url("/7"))
        .finally(move |_, request| *sink.lock().unwrap() = request.map(|r| (r.endpoint(), r.request_id)));
    scheduler.run_until_idle();

    let (path, request_id) = endpoint.lock().unwrap().clone().unwrap();
    assert_eq!(path, "/orders/7");
    assert_eq!(request_id, transport.calls()[0].request_id);
}

#[test]
fn test_cache_hit_skips_transport_and_replays_over_three_ticks() {
    let transport = MockTransport::always(Ok(Response::ok(json!({"name": "Ada"}))));
    let (courier, scheduler) = engine(&transport);
    let profile = courier.create_module(LayerConfig::behavior(
        BehaviorConfig::new().cache(StorageClass::Memory, "profile"),
    ));

    let first = EventLog::new();
    let _a = first.attach(profile.request(TransportConfig::new().url("/me")));
    scheduler.run_until_idle();
    assert_eq!(first.successes(), vec![json!({"name": "Ada"})]);
    assert_eq!(transport.call_count(), 1);

    let second = EventLog::new();
    let _b = second.attach(profile.request(TransportConfig::new().url("/me")));
    assert_eq!(second.names(), vec!["loading(true)"]);

    scheduler.tick();
    assert_eq!(second.names(), vec!["loading(true)", "loading(false)"]);
    scheduler.tick();
    assert_eq!(second.names(), vec!["loading(true)", "loading(false)", "success"]);
    scheduler.tick();
    assert_eq!(
        second.events().last(),
        Some(&Event::Finally(Outcome::Cached(json!({"name": "Ada"}))))
    );
    assert_eq!(transport.call_count(), 1);
}

#[test]
fn test_aborting_a_cache_replay_before_it_runs_cancels_it() {
    let transport = MockTransport::always(Ok(Response::ok(json!(1))));
    let (courier, scheduler) = engine(&transport);
    let module = courier.create_module(LayerConfig::behavior(
        BehaviorConfig::new().cache(StorageClass::Session, "count"),
    ));
    let _warm = module.request(TransportConfig::new());
    scheduler.run_until_idle();

    let log = EventLog::new();
    let chain = log.attach(module.request(TransportConfig::new()));
    chain.abort();
    scheduler.run_until_idle();

    assert_eq!(log.names(), vec!["loading(true)", "loading(false)", "finally"]);
    assert!(log.successes().is_empty());
}

#[test]
fn test_abort_ends_with_loading_false_and_cancelled_finally_only() {
    let transport = MockTransport::new();
    let (courier, scheduler) = engine(&transport);
    let module = courier.create_module(LayerConfig::default());

    let log = EventLog::new();
    let chain = log.attach(module.request(TransportConfig::new().url("/never")));
    scheduler.run_until_idle();

    chain.abort();
    chain.abort();
    scheduler.run_until_idle();

    assert_eq!(log.names(), vec!["loading(true)", "loading(false)", "finally"]);
    assert_eq!(log.events().last(), Some(&Event::Finally(Outcome::Cancelled)));
    assert_eq!(courier.in_flight_count(), 0);
    assert!(!transport.resolve(0, Ok(Response::ok(json!("late")))));
}

#[test]
fn test_cancel_all_skips_non_cancelable_requests() {
    let transport = MockTransport::new();
    let (courier, scheduler) = engine(&transport);
    let module = courier.create_module(LayerConfig::default());

    let plain = EventLog::new();
    let _a = plain.attach(module.request(TransportConfig::new().url("/a")));
    let pinned = EventLog::new();
    let _b = pinned.attach(module.request_with(
        TransportConfig::new().url("/b"),
        BehaviorConfig::new().cancelable(false),
    ));
    assert_eq!(courier.in_flight_count(), 2);

    assert_eq!(courier.cancel_all(), 1);
    scheduler.run_until_idle();
    assert_eq!(plain.events().last(), Some(&Event::Finally(Outcome::Cancelled)));

    assert!(transport.resolve(1, Ok(Response::ok(json!("kept")))));
    scheduler.run_until_idle();
    assert_eq!(pinned.successes(), vec![json!("kept")]);
}

#[test]
fn test_retry_stops_after_max_attempts() {
    let transport = MockTransport::always(Err(TransportError::Timeout(std::time::Duration::from_secs(1))));
    let (courier, scheduler) = engine(&transport);
    let module = courier.create_module(LayerConfig::behavior(
        BehaviorConfig::new().retry_on_error(RetryRule::builder().max_attempts(3).build()),
    ));

    let log = EventLog::new();
    let _chain = log.attach(module.request(TransportConfig::new().url("/slow")));
    scheduler.run_until_idle();

    assert_eq!(transport.call_count(), 3);
    assert_eq!(
        log.names(),
        vec![
            "loading(true)",
            "loading(false)",
            "loading(true)",
            "loading(false)",
            "loading(true)",
            "loading(false)",
            "transport_error",
            "finally",
        ]
    );
    let ids: Vec<u64> = transport.calls().iter().map(|r| r.request_id).collect();
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_retry_condition_false_settles_normally() {
    let transport = MockTransport::always(Ok(Response::new(500, json!({}))));
    let (courier, scheduler) = engine(&transport);
    let module = courier.create_module(LayerConfig::behavior(
        BehaviorConfig::new()
            .predicate(Response::is_success)
            .retry_on_success(unauthorized_then_retry(RetryScope::Instance)),
    ));

    let log = EventLog::new();
    let _chain = log.attach(module.request(TransportConfig::new()));
    scheduler.run_until_idle();

    assert_eq!(transport.call_count(), 1);
    assert_eq!(log.count("error"), 1);
}

#[test]
fn test_module_scope_retry_sweeps_siblings_only() {
    let transport = MockTransport::new();
    let (courier, scheduler) = engine(&transport);
    let accounts = courier.create_module(LayerConfig::behavior(
        BehaviorConfig::new().retry_on_success(unauthorized_then_retry(RetryScope::Module)),
    ));
    let reports = courier.create_module(LayerConfig::default());

    let trigger = EventLog::new();
    let _a = trigger.attach(accounts.request(TransportConfig::new().url("/a")));
    let sibling = EventLog::new();
    let _b = sibling.attach(accounts.request(TransportConfig::new().url("/b")));
    let other = EventLog::new();
    let _c = other.attach(reports.request(TransportConfig::new().url("/c")));
    scheduler.run_until_idle();

    assert!(transport.resolve(0, Ok(Response::new(401, json!({})))));
    scheduler.run_until_idle();

    assert_eq!(transport.call_count(), 5);
    let reissued: Vec<String> = transport.calls()[3..].iter().map(|r| r.endpoint()).collect();
    assert_eq!(reissued, vec!["/a", "/b"]);
    assert_eq!(transport.pending(), vec![2, 3, 4]);
    assert!(!transport.resolve(1, Ok(Response::ok(json!("stale")))));

    assert_eq!(trigger.names(), vec!["loading(true)", "loading(false)", "loading(true)"]);
    assert_eq!(
        sibling.names(),
        vec!["loading(true)", "loading(false)", "finally", "loading(true)"]
    );
    assert_eq!(sibling.events()[2], Event::Finally(Outcome::Cancelled));
    assert_eq!(other.names(), vec!["loading(true)"]);

    transport.resolve(3, Ok(Response::ok(json!("a"))));
    transport.resolve(4, Ok(Response::ok(json!("b"))));
    transport.resolve(2, Ok(Response::ok(json!("c"))));
    scheduler.run_until_idle();

    assert_eq!(trigger.successes(), vec![json!("a")]);
    assert_eq!(sibling.successes(), vec![json!("b")]);
    assert_eq!(other.successes(), vec![json!("c")]);
    assert_eq!(trigger.count("finally"), 1);
    assert_eq!(sibling.count("finally"), 2);
    assert_eq!(
        sibling.names()[3..],
        ["loading(true)", "loading(false)", "success", "finally"]
    );
}

#[test]
fn test_declined_gate_settles_swept_siblings_once() {
    let transport = MockTransport::new();
    let (courier, scheduler) = engine(&transport);
    let rule = RetryRule::builder()
        .condition(|response: &Response| response.status == 401)
        .scope(RetryScope::Module)
        .before_retry(|| async { Ok(false) })
        .build();
    let accounts = courier.create_module(LayerConfig::behavior(BehaviorConfig::new().retry_on_success(rule)));

    let trigger = EventLog::new();
    let a = trigger.attach(accounts.request(TransportConfig::new().url("/a")));
    let sibling = EventLog::new();
    let b = sibling.attach(accounts.request(TransportConfig::new().url("/b")));
    let joined = EventLog::new();
    let _all = joined.attach(courier.all([a, b]));
    scheduler.run_until_idle();

    transport.resolve(0, Ok(Response::new(401, Value::Null)));
    scheduler.run_until_idle();

    assert_eq!(transport.call_count(), 2);
    assert_eq!(trigger.names(), vec!["loading(true)", "loading(false)", "finally"]);
    assert_eq!(sibling.names(), vec!["loading(true)", "loading(false)", "finally"]);
    assert_eq!(joined.names(), vec!["loading(true)", "loading(false)", "finally"]);
    assert_eq!(courier.in_flight_count(), 0);
}

#[test]
fn test_global_scope_retry_sweeps_every_module() {
    let transport = MockTransport::new();
    let (courier, scheduler) = engine(&transport);
    courier.set_global_config(LayerConfig::behavior(
        BehaviorConfig::new().retry_on_success(unauthorized_then_retry(RetryScope::Global)),
    ));
    let first = courier.create_module(LayerConfig::default());
    let second = courier.create_module(LayerConfig::default());

    let _a = first.request(TransportConfig::new().url("/a"));
    let _b = second.request(TransportConfig::new().url("/b"));
    scheduler.run_until_idle();

    transport.resolve(1, Ok(Response::new(401, Value::Null)));
    scheduler.run_until_idle();

    assert_eq!(transport.call_count(), 4);
    assert_eq!(transport.pending(), vec![2, 3]);
    assert_eq!(courier.in_flight_count(), 2);
}

#[test]
fn test_instance_scope_leaves_siblings_running() {
    let transport = MockTransport::new();
    let (courier, scheduler) = engine(&transport);
    let module = courier.create_module(LayerConfig::behavior(
        BehaviorConfig::new().retry_on_success(unauthorized_then_retry(RetryScope::Instance)),
    ));

    let _a = module.request(TransportConfig::new().url("/a"));
    let _b = module.request(TransportConfig::new().url("/b"));
    scheduler.run_until_idle();

    transport.resolve(0, Ok(Response::new(401, Value::Null)));
    scheduler.run_until_idle();

    assert_eq!(transport.call_count(), 3);
    assert_eq!(transport.pending(), vec![1, 2]);
}

#[test]
fn test_gated_retry_waits_for_the_gate() {
    let transport = MockTransport::new();
    let (courier, scheduler) = engine(&transport);
    let (open, gate) = oneshot::channel::<bool>();
    let gate = Arc::new(Mutex::new(Some(gate)));

    let rule = RetryRule::builder()
        .condition(|response: &Response| response.status == 401)
        .before_retry(move || {
            let gate = gate.lock().unwrap().take();
            async move {
                match gate {
                    Some(gate) => gate.await.map_err(|e| e.to_string()),
                    None => Ok(true),
                }
            }
        })
        .build();
    let module = courier.create_module(LayerConfig::behavior(BehaviorConfig::new().retry_on_success(rule)));

    let log = EventLog::new();
    let _chain = log.attach(module.request(TransportConfig::new().url("/secure")));
    transport.resolve_next(Ok(Response::new(401, Value::Null)));
    scheduler.run_until_idle();

    assert_eq!(courier.queued_retries(), 1);
    assert_eq!(transport.call_count(), 1);
    assert_eq!(log.names(), vec!["loading(true)", "loading(false)"]);

    open.send(true).unwrap();
    scheduler.run_until_idle();
    assert_eq!(courier.queued_retries(), 0);
    assert_eq!(transport.call_count(), 2);
    assert_eq!(log.names(), vec!["loading(true)", "loading(false)", "loading(true)"]);

    transport.resolve_next(Ok(Response::ok(json!("granted"))));
    scheduler.run_until_idle();
    assert_eq!(log.successes(), vec![json!("granted")]);
}

#[test]
fn test_declined_or_failed_gate_ends_queued_requests_as_cancelled() {
    for declined in [true, false] {
        let transport = MockTransport::new();
        let (courier, scheduler) = engine(&transport);
        let rule = RetryRule::builder()
            .condition(|response: &Response| response.status == 401)
            .before_retry(move || async move {
                if declined { Ok(false) } else { Err("refresh endpoint down".to_string()) }
            })
            .build();
        let module = courier.create_module(LayerConfig::behavior(BehaviorConfig::new().retry_on_success(rule)));

        let log = EventLog::new();
        let _chain = log.attach(module.request(TransportConfig::new()));
        transport.resolve_next(Ok(Response::new(401, Value::Null)));
        scheduler.run_until_idle();

        assert_eq!(transport.call_count(), 1);
        assert_eq!(courier.queued_retries(), 0);
        assert_eq!(log.names(), vec!["loading(true)", "loading(false)", "finally"]);
        assert_eq!(log.events().last(), Some(&Event::Finally(Outcome::Cancelled)));
    }
}

#[test]
fn test_panicking_gate_ends_queued_request_as_cancelled() {
    let transport = MockTransport::new();
    let (courier, scheduler) = engine(&transport);
    let rule = RetryRule::builder()
        .condition(|response: &Response| response.status == 401)
        .before_retry(|| -> futures::future::Ready<Result<bool, String>> { panic!("refresh bug") })
        .build();
    let module = courier.create_module(LayerConfig::behavior(BehaviorConfig::new().retry_on_success(rule)));

    let log = EventLog::new();
    let _chain = log.attach(module.request(TransportConfig::new()));
    transport.resolve_next(Ok(Response::new(401, Value::Null)));
    scheduler.run_until_idle();

    assert_eq!(courier.queued_retries(), 0);
    assert_eq!(log.names(), vec!["loading(true)", "loading(false)", "finally"]);
    assert_eq!(log.events().last(), Some(&Event::Finally(Outcome::Cancelled)));
}

#[test]
fn test_panicking_predicate_ends_as_business_error() {
    let transport = MockTransport::always(Ok(Response::ok(json!({"id": 1}))));
    let (courier, scheduler) = engine(&transport);
    let module = courier.create_module(LayerConfig::behavior(
        BehaviorConfig::new().predicate(|_| panic!("predicate bug")),
    ));

    let log = EventLog::new();
    let _chain = log.attach(module.request(TransportConfig::new()));
    scheduler.run_until_idle();

    assert_eq!(log.names(), vec!["loading(true)", "loading(false)", "error", "finally"]);
    assert_eq!(courier.in_flight_count(), 0);
}

#[test]
fn test_panicking_retry_condition_settles_without_retry() {
    let transport = MockTransport::always(Ok(Response::ok(json!("ok"))));
    let (courier, scheduler) = engine(&transport);
    let module = courier.create_module(LayerConfig::behavior(BehaviorConfig::new().retry_on_success(
        RetryRule::builder()
            .condition(|_: &Response| panic!("condition bug"))
            .build(),
    )));

    let log = EventLog::new();
    let _chain = log.attach(module.request(TransportConfig::new()));
    scheduler.run_until_idle();

    assert_eq!(transport.call_count(), 1);
    assert_eq!(log.successes(), vec![json!("ok")]);
}

#[test]
fn test_request_without_runtime_fails_as_unscheduled() {
    let transport = MockTransport::always(Ok(Response::ok(json!("never"))));
    let courier = Courier::builder().transport(transport).build();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (loading, failed, finished) = (Arc::clone(&seen), Arc::clone(&seen), Arc::clone(&seen));
    let module = courier.create_module(LayerConfig::behavior(
        BehaviorConfig::new()
            .loading(move |on| loading.lock().unwrap().push(format!("loading({on})")))
            .transport_error(move |error| {
                let unscheduled = matches!(error, TransportError::Unscheduled(_));
                failed.lock().unwrap().push(format!("transport_error({unscheduled})"));
            })
            .finally(move |_, _| finished.lock().unwrap().push("finally".to_string())),
    ));

    let _chain = module.request(TransportConfig::new().url("/x"));

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["loading(true)", "loading(false)", "transport_error(true)", "finally"]
    );
    assert_eq!(courier.in_flight_count(), 0);
}

#[test]
fn test_producers_are_re_read_on_retry() {
    let transport = MockTransport::new();
    let (courier, scheduler) = engine(&transport);
    let token = Arc::new(AtomicUsize::new(0));

    let current = Arc::clone(&token);
    courier.set_global_config(LayerConfig::transport(ConfigSource::producer(move || {
        TransportConfig::new().header("authorization", format!("Bearer {}", current.load(Ordering::SeqCst)))
    })));

    let refresh = Arc::clone(&token);
    let rule = RetryRule::builder()
        .condition(|response: &Response| response.status == 401)
        .before_retry(move || {
            refresh.fetch_add(1, Ordering::SeqCst);
            async { Ok(true) }
        })
        .build();
    let module = courier.create_module(LayerConfig::behavior(BehaviorConfig::new().retry_on_success(rule)));

    let _chain = module.request(TransportConfig::new().url("/me"));
    transport.resolve_next(Ok(Response::new(401, Value::Null)));
    scheduler.run_until_idle();

    let headers: Vec<String> = transport
        .calls()
        .iter()
        .map(|request| request.headers["authorization"].clone())
        .collect();
    assert_eq!(headers, vec!["Bearer 0", "Bearer 1"]);
}

#[test]
fn test_layer_transport_overrides_engine_transport() {
    let engine_transport = MockTransport::new();
    let (courier, scheduler) = engine(&engine_transport);
    let upload = MockTransport::always(Ok(Response::ok(json!("stored"))));
    let module = courier.create_module(LayerConfig::behavior(
        BehaviorConfig::new().transport(Arc::new(upload.clone())),
    ));

    let log = EventLog::new();
    let _chain = log.attach(module.request(TransportConfig::new().url("/upload")));
    scheduler.run_until_idle();

    assert_eq!(engine_transport.call_count(), 0);
    assert_eq!(upload.call_count(), 1);
    assert_eq!(log.successes(), vec![json!("stored")]);
}

#[test]
fn test_race_and_all_over_module_calls() {
    let transport = MockTransport::new();
    let (courier, scheduler) = engine(&transport);
    let module = courier.create_module(LayerConfig::default());

    let raced = EventLog::new();
    let _race = raced.attach(courier.race([
        module.request(TransportConfig::new().url("/slow")),
        module.request(TransportConfig::new().url("/fast")),
    ]));
    let joined = EventLog::new();
    let _all = joined.attach(courier.all([
        module.request(TransportConfig::new().url("/one")),
        module.request(TransportConfig::new().url("/two")),
    ]));

    transport.resolve(1, Ok(Response::ok(json!("fast"))));
    transport.resolve(3, Ok(Response::ok(json!("two"))));
    scheduler.run_until_idle();
    assert_eq!(raced.successes(), vec![json!("fast")]);
    assert_eq!(raced.count("finally"), 0);
    assert!(joined.successes().is_empty());

    transport.resolve(0, Ok(Response::ok(json!("slow"))));
    transport.resolve(2, Ok(Response::ok(json!("one"))));
    scheduler.run_until_idle();

    assert_eq!(raced.successes(), vec![json!("fast")]);
    assert_eq!(raced.count("finally"), 1);
    assert_eq!(joined.successes(), vec![json!(["one", "two"])]);
    assert_eq!(joined.events().last(), Some(&Event::Finally(Outcome::Combined)));
}

#[test]
fn test_aborting_a_race_cancels_its_members() {
    let transport = MockTransport::new();
    let (courier, scheduler) = engine(&transport);
    let module = courier.create_module(LayerConfig::default());

    let log = EventLog::new();
    let race = log.attach(courier.race([
        module.request(TransportConfig::new().url("/a")),
        module.request(TransportConfig::new().url("/b")),
    ]));
    race.abort();
    scheduler.run_until_idle();

    assert_eq!(log.names(), vec!["loading(true)", "loading(false)", "finally"]);
    assert!(transport.pending().is_empty());
}

#[test]
fn test_load_global_transport_from_json() {
    let courier = Courier::builder().scheduler(ManualScheduler::new()).build();

    courier
        .load_global_transport(r#"{"base_url": "https://api.example.com", "timeout": 2500}"#)
        .unwrap();
    let transport = courier.global_config().transport.resolve();
    assert_eq!(transport.base_url.as_deref(), Some("https://api.example.com"));
    assert_eq!(transport.timeout, Some(std::time::Duration::from_millis(2500)));

    let error = courier.load_global_transport("{not json").unwrap_err();
    assert!(matches!(error, CourierError::Config(_)));
}

#[test]
fn test_unconfigured_engine_reports_transport_error() {
    let scheduler = ManualScheduler::new();
    let courier = Courier::builder().scheduler(scheduler.clone()).build();
    let module = courier.create_module(LayerConfig::default());

    let log = EventLog::new();
    let _chain = log.attach(module.request(TransportConfig::new().url("/x")));
    scheduler.run_until_idle();

    assert!(matches!(
        log.events()[2],
        Event::TransportError(TransportError::NotConfigured)
    ));
}

#[test]
fn test_process_wide_engine_free_functions() {
    courier_runtime::set_global_config(LayerConfig::transport(TransportConfig::new().base_url("/v2")));
    assert_eq!(
        courier_runtime::global().global_config().transport.resolve().base_url.as_deref(),
        Some("/v2")
    );

    courier_runtime::reset_global_config();
    assert_eq!(courier_runtime::global().global_config().transport.resolve().base_url, None);

    let a = courier_runtime::create_module(LayerConfig::default());
    let b = courier_runtime::create_module(LayerConfig::default());
    assert_ne!(a.id(), b.id());
}

#[tokio::test]
async fn test_to_promise_with_tokio_scheduler() {
    let transport = MockTransport::always(Ok(Response::ok(json!({"id": 9}))));
    let courier = Courier::builder().transport(transport).build();
    let module = courier.create_module(LayerConfig::default());

    let value = courier_runtime::to_promise(module.request(TransportConfig::new().url("/9"))).await;
    assert_eq!(value, Ok(json!({"id": 9})));
}

#[tokio::test]
async fn test_to_promise_rejects_with_chain_error() {
    let transport = MockTransport::always(Ok(Response::new(404, Value::Null)));
    let courier = Courier::builder().transport(transport).build();
    let module = courier.create_module(LayerConfig::behavior(
        BehaviorConfig::new().predicate(Response::is_success),
    ));

    let error = courier_runtime::to_promise(module.request(TransportConfig::new())).await;
    assert!(matches!(error, Err(ChainError::Business(response)) if response.status == 404));
}

#[tokio::test]
async fn test_watch_state_follows_a_real_request() {
    let transport = MockTransport::always(Ok(Response::ok(json!([1, 2, 3]))));
    let courier = Courier::builder().transport(transport).build();
    let module = courier.create_module(LayerConfig::default());

    let mut state = courier_runtime::watch_state(module.request(TransportConfig::new()));
    state.wait_for(|state| state.data.is_some()).await.unwrap();

    let snapshot = state.borrow().clone();
    assert_eq!(snapshot.data, Some(json!([1, 2, 3])));
    assert_eq!(snapshot.error, None);
}
