//! Courier walkthrough binary
//!
//! Runs a handful of requests against an in-process fake API (or a real
//! server when `COURIER_DEMO_ORIGIN` is set) to show layered configuration,
//! a token-refresh retry gate, caching, `race`/`all` and cancellation.

use anyhow::Context;
use courier_core::cache::StorageClass;
use courier_core::config::{BehaviorConfig, ConfigSource, LayerConfig, TransportConfig};
use courier_core::retry::{RetryRule, RetryScope};
use courier_core::transport::{Outcome, RequestConfig, Response, Transport, TransportFuture};
use courier_http::ReqwestTransport;
use courier_runtime::Courier;
use courier_runtime::metrics::{MetricsExporter, register_metrics};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ORIGIN: &str = "https://api.example.test";

/// In-process API. Tokens older than `valid_token` are rejected with a 401.
#[derive(Clone, Default)]
struct FakeApi {
    valid_token: Arc<AtomicUsize>,
    hits: Arc<AtomicUsize>,
}

impl FakeApi {
    fn answer(&self, config: &RequestConfig) -> Response {
        let token = config
            .headers
            .get("authorization")
            .and_then(|value| value.strip_prefix("Bearer "))
            .and_then(|token| token.parse::<usize>().ok());
        if token.is_none_or(|token| token < self.valid_token.load(Ordering::SeqCst)) {
            return Response::new(401, json!({"code": 401, "message": "token expired"}));
        }

        let endpoint = config.endpoint();
        let resource = endpoint.rsplit('/').next().unwrap_or_default();
        match resource {
            "404" => Response::ok(json!({"code": 404, "message": "no such user"})),
            "profile" => Response::ok(json!({"code": 0, "data": {"theme": "dark", "locale": "en"}})),
            id => Response::ok(json!({"code": 0, "data": {"id": id, "name": format!("user-{id}")}})),
        }
    }
}

impl Transport for FakeApi {
    fn request(&self, config: RequestConfig) -> TransportFuture {
        let api = self.clone();
        Box::pin(async move {
            api.hits.fetch_add(1, Ordering::SeqCst);
            let latency = if config.url.as_deref() == Some("/slow") { 300 } else { 20 };
            tokio::time::sleep(Duration::from_millis(latency)).await;
            Ok(api.answer(&config))
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier_demo=info,courier_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut exporter = MetricsExporter::new();
    exporter.install().context("installing metrics exporter")?;
    register_metrics();

    println!("=== Courier: request orchestration walkthrough ===\n");

    let api = FakeApi::default();
    api.valid_token.store(1, Ordering::SeqCst);

    let courier = match std::env::var("COURIER_DEMO_ORIGIN") {
        Ok(origin) => {
            println!("Using HTTP transport against {origin}");
            Courier::builder()
                .transport(ReqwestTransport::builder().origin(&origin)?.build()?)
                .build()
        },
        Err(_) => Courier::builder().transport(api.clone()).build(),
    };

    // The client starts with a stale token; the retry gate refreshes it.
    let token = Arc::new(AtomicUsize::new(0));
    let current = Arc::clone(&token);
    let refreshed = Arc::clone(&token);

    courier.set_global_config(LayerConfig::new(
        ConfigSource::producer(move || {
            TransportConfig::new()
                .base_url(format!("{ORIGIN}/v1"))
                .header("authorization", format!("Bearer {}", current.load(Ordering::SeqCst)))
                .timeout(Duration::from_secs(5))
        }),
        BehaviorConfig::new()
            .predicate(|response| response.status == 200 && response.body["code"] == 0)
            .extractor(|response| response.body["data"].clone())
            .retry_on_success(
                RetryRule::builder()
                    .condition(|response: &Response| response.status == 401)
                    .scope(RetryScope::Global)
                    .before_retry(move || {
                        let token = Arc::clone(&refreshed);
                        async move {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            let next = token.fetch_add(1, Ordering::SeqCst) + 1;
                            tracing::info!(token = next, "Token refreshed");
                            Ok(true)
                        }
                    })
                    .build(),
            )
            .error(|response| println!("  ! business error: {}", response.body["message"]))
            .transport_error(|error| println!("  ! transport error: {error}")),
    ));

    let users = courier.create_module(LayerConfig::transport(TransportConfig::new().base_url("/users")));
    let account = courier.create_module(LayerConfig::new(
        TransportConfig::new().base_url("/account"),
        BehaviorConfig::new().cache(StorageClass::Memory, "profile"),
    ));

    println!(">>> Two concurrent calls with a stale token (one 401 retries both)");
    let (first, second) = tokio::join!(
        courier_runtime::to_promise(users.request(TransportConfig::new().url("/1"))),
        courier_runtime::to_promise(users.request(TransportConfig::new().url("/2"))),
    );
    println!("  user 1: {}", first?);
    println!("  user 2: {}", second?);

    println!("\n>>> Cached profile");
    for attempt in 1..=2 {
        let before = api.hits.load(Ordering::SeqCst);
        let profile = courier_runtime::to_promise(
            account
                .request(TransportConfig::new().url("/profile"))
                .finally(|outcome, _| {
                    if matches!(outcome, Outcome::Cached(_)) {
                        println!("  (served from cache)");
                    }
                }),
        )
        .await?;
        let calls = api.hits.load(Ordering::SeqCst) - before;
        println!("  attempt {attempt}: {profile} ({calls} transport call(s))");
    }

    println!("\n>>> race and all");
    let winner = courier_runtime::to_promise(courier.race([
        users.request(TransportConfig::new().url("/slow")),
        users.request(TransportConfig::new().url("/3")),
    ]))
    .await?;
    println!("  race winner: {winner}");

    let everyone = courier_runtime::to_promise(courier.all(
        ["/4", "/5", "/6"].map(|url| users.request(TransportConfig::new().url(url))),
    ))
    .await?;
    println!("  all: {everyone}");

    println!("\n>>> Business error");
    let missing = courier_runtime::to_promise(users.request(TransportConfig::new().url("/404"))).await;
    println!("  rejected: {}", missing.is_err());

    println!("\n>>> Cancellation");
    let pinned = users.request_with(
        TransportConfig::new().url("/slow"),
        BehaviorConfig::new().cancelable(false),
    );
    let mut cancelled = courier_runtime::watch_state(
        users
            .request(TransportConfig::new().url("/slow"))
            .finally(|outcome, _| println!("  finally: cancelled = {}", outcome.is_cancelled())),
    );
    println!("  cancel_all aborted {} request(s)", courier.cancel_all());
    cancelled.wait_for(|state| !state.loading).await?;
    let kept = courier_runtime::to_promise(pinned).await?;
    println!("  non-cancelable request still finished: {kept}");

    if let Some(snapshot) = exporter.render() {
        println!("\n=== Metrics ===\n{snapshot}");
    }

    Ok(())
}
