//! End-to-end verification runs: a scripted engine drives the intercepting
//! proxy the way the real verifier would, against a live provider.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use pactgate_proxy::FilterOutcome;
use pactgate_state::{HandlerError, StateHandler, StateResult};
use pactgate_types::JsonMap;
use pactgate_verifier::{
    EngineError, EngineOptions, EngineResult, VerificationEngine, Verifier, VerifierConfig, VerifierError,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Calls = Arc<Mutex<Vec<(Option<bool>, Option<JsonMap>)>>>;

/// Start a provider that echoes selected request details back as JSON.
async fn start_provider() -> String {
    let app = Router::new().route(
        "/users/1",
        get(|request: Request| async move {
            let header_value = |name: &str| {
                request
                    .headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            };
            axum::Json(json!({
                "id": 1,
                "host": header_value("host"),
                "auth": header_value("authorization"),
            }))
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind provider");
    let addr = listener.local_addr().expect("provider addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("provider server");
    });
    format!("http://localhost:{}", addr.port())
}

fn recording_handler(calls: Calls) -> impl StateHandler {
    move |setup: Option<bool>, params: Option<JsonMap>| {
        calls.lock().unwrap().push((setup, params));
        std::future::ready(StateResult::Ok(None))
    }
}

/// An engine that posts `descriptor` to the state-setup URL, then fetches
/// `/users/1` through the proxy.
fn scripted_engine(descriptor: Value, seen_base: Arc<Mutex<Option<String>>>) -> impl VerificationEngine {
    move |options: EngineOptions, _timeout: Option<Duration>| {
        *seen_base.lock().unwrap() = Some(options.provider_base_url.clone());
        replay(options, descriptor.clone())
    }
}

/// Reports the setup status and body plus the provider's answer.
async fn replay(options: EngineOptions, descriptor: Value) -> EngineResult {
    let client = reqwest::Client::new();
    let setup = client
        .post(&options.provider_states_setup_url)
        .json(&descriptor)
        .send()
        .await
        .map_err(|e| EngineError::Failed(e.to_string()))?;
    let setup_status = setup.status().as_u16();
    let setup_body = setup.text().await.unwrap_or_default();
    if setup_status != 200 {
        return Err(EngineError::Failed(format!(
            "state setup returned {setup_status}: {setup_body}"
        )));
    }

    let provider = client
        .get(format!("{}/users/1", options.provider_base_url))
        .send()
        .await
        .map_err(|e| EngineError::Failed(e.to_string()))?;
    let provider_status = provider.status().as_u16();
    let provider_body: Value = provider.json().await.unwrap_or(Value::Null);

    Ok(Some(json!({
        "setupStatus": setup_status,
        "setupBody": setup_body,
        "providerStatus": provider_status,
        "provider": provider_body,
    })))
}

async fn assert_proxy_closed(base: &Arc<Mutex<Option<String>>>) {
    let base = base.lock().unwrap().clone().expect("engine saw the proxy URL");
    let result = reqwest::Client::new()
        .get(format!("{base}/users/1"))
        .timeout(Duration::from_secs(2))
        .send()
        .await;
    assert!(result.is_err(), "proxy at {base} still answering after the run");
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn versioned_state_setup_reaches_handler_then_proxy_closes() {
    let calls = Calls::default();
    let seen_base = Arc::new(Mutex::new(None));
    let config = VerifierConfig::new("P", "http://localhost:9999")
        .with_pact_urls(["file.json"])
        .with_state_handler("user exists", recording_handler(calls.clone()));
    let engine = scripted_engine(
        json!({ "action": "setup", "state": "user exists", "params": { "id": 1 } }),
        seen_base.clone(),
    );

    let result = Verifier::new(config, engine).verify_provider().await.unwrap();

    assert_eq!(result["setupStatus"], 200);
    assert_eq!(result["setupBody"], "");
    // Nothing listens on :9999, so the forwarded call fails upstream.
    assert_eq!(result["providerStatus"], 502);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let mut expected = JsonMap::new();
    expected.insert("id".into(), json!(1));
    assert_eq!(calls[0], (Some(true), Some(expected)));
    drop(calls);

    assert_proxy_closed(&seen_base).await;
}

#[tokio::test]
async fn legacy_states_invoke_each_registered_handler() {
    let first = Calls::default();
    let second = Calls::default();
    let seen_base = Arc::new(Mutex::new(None));
    let provider = start_provider().await;
    let config = VerifierConfig::new("P", provider)
        .with_pact_urls(["file.json"])
        .with_state_handler("first", recording_handler(first.clone()))
        .with_state_handler("second", recording_handler(second.clone()));
    let engine = scripted_engine(
        json!({ "states": ["first", "unknown", "second"] }),
        seen_base.clone(),
    );

    let result = Verifier::new(config, engine).verify_provider().await.unwrap();

    assert_eq!(result["setupStatus"], 200);
    assert_eq!(result["providerStatus"], 200);
    assert_eq!(result["provider"]["id"], 1);
    let no_args: Vec<(Option<bool>, Option<JsonMap>)> = vec![(None, None)];
    assert_eq!(*first.lock().unwrap(), no_args);
    assert_eq!(*second.lock().unwrap(), no_args);
    assert_proxy_closed(&seen_base).await;
}

#[tokio::test]
async fn failing_handler_fails_run_and_still_closes_proxy() {
    let seen_base = Arc::new(Mutex::new(None));
    let config = VerifierConfig::new("P", "http://localhost:9999")
        .with_pact_urls(["file.json"])
        .with_state_handler(
            "user exists",
            |_setup: Option<bool>, _params: Option<JsonMap>| async {
                StateResult::Err(HandlerError::new("fixture load failed"))
            },
        );
    let engine = scripted_engine(
        json!({ "action": "setup", "state": "user exists", "params": {} }),
        seen_base.clone(),
    );

    let err = Verifier::new(config, engine).verify_provider().await.unwrap_err();

    match err {
        VerifierError::Engine(EngineError::Failed(message)) => {
            assert!(message.contains("500"), "{message}");
            assert!(message.contains("fixture load failed"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_proxy_closed(&seen_base).await;
}

#[tokio::test]
async fn request_filter_applies_to_provider_traffic() {
    let seen_base = Arc::new(Mutex::new(None));
    let provider = start_provider().await;
    let config = VerifierConfig::new("P", provider)
        .with_pact_urls(["file.json"])
        .with_request_filter(|mut request: Request| async move {
            request
                .headers_mut()
                .insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer test"));
            FilterOutcome::Forward(request)
        });
    let engine = scripted_engine(json!({ "states": [] }), seen_base.clone());

    let result = Verifier::new(config, engine).verify_provider().await.unwrap();

    assert_eq!(result["provider"]["auth"], "Bearer test");
    assert_proxy_closed(&seen_base).await;
}

#[tokio::test]
async fn change_origin_rewrites_host_header() {
    let seen_base = Arc::new(Mutex::new(None));
    let provider = start_provider().await;
    let mut config = VerifierConfig::new("P", provider.clone()).with_pact_urls(["file.json"]);
    config.change_origin = Some(true);
    let engine = scripted_engine(json!({}), seen_base.clone());

    let result = Verifier::new(config, engine).verify_provider().await.unwrap();

    let expected_host = provider.trim_start_matches("http://");
    assert_eq!(result["provider"]["host"], expected_host);
    assert_proxy_closed(&seen_base).await;
}

#[tokio::test]
async fn engine_failure_is_returned_after_teardown() {
    let seen_base = Arc::new(Mutex::new(None));
    let sink = seen_base.clone();
    let config = VerifierConfig::new("P", "http://localhost:9999").with_pact_urls(["file.json"]);
    let engine = move |options: EngineOptions, _timeout: Option<Duration>| {
        *sink.lock().unwrap() = Some(options.provider_base_url);
        async { EngineResult::Err(EngineError::Failed("interaction mismatch".into())) }
    };

    let err = Verifier::new(config, engine).verify_provider().await.unwrap_err();

    assert_eq!(err.to_string(), "verification failed: interaction mismatch");
    assert_proxy_closed(&seen_base).await;
}

#[tokio::test]
async fn no_proxy_is_started_for_invalid_configuration() {
    let started = Arc::new(Mutex::new(false));
    let flag = started.clone();
    let engine = move |_options: EngineOptions, _timeout: Option<Duration>| {
        *flag.lock().unwrap() = true;
        async { EngineResult::Ok(Some(json!(true))) }
    };

    let err = Verifier::new(VerifierConfig::default(), engine)
        .verify_provider()
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "No configuration provided to verifier");
    assert!(!*started.lock().unwrap());
}

#[tokio::test]
async fn concurrent_state_requests_are_independent() {
    let calls = Calls::default();
    let config = VerifierConfig::new("P", "http://localhost:9999")
        .with_pact_urls(["file.json"])
        .with_state_handler("slow", {
            let calls = calls.clone();
            move |setup: Option<bool>, params: Option<JsonMap>| {
                let calls = calls.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    calls.lock().unwrap().push((setup, params));
                    StateResult::Ok(None)
                }
            }
        });
    let engine = |options: EngineOptions, _timeout: Option<Duration>| async move {
        let client = reqwest::Client::new();
        let send = |action: &'static str| {
            client
                .post(&options.provider_states_setup_url)
                .json(&json!({ "action": action, "state": "slow", "params": {} }))
                .send()
        };
        let (a, b) = tokio::join!(send("setup"), send("teardown"));
        let ok = a.map(|r| r.status() == StatusCode::OK).unwrap_or(false)
            && b.map(|r| r.status() == StatusCode::OK).unwrap_or(false);
        EngineResult::Ok(Some(json!(ok)))
    };

    let result = Verifier::new(config, engine).verify_provider().await.unwrap();

    assert_eq!(result, json!(true));
    let mut flags: Vec<_> = calls.lock().unwrap().iter().map(|(setup, _)| *setup).collect();
    flags.sort();
    assert_eq!(flags, vec![Some(false), Some(true)]);
}
