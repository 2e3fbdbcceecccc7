//! The intercepting proxy server.
//!
//! Lifecycle:
//! 1. [`InterceptingProxy::start`] validates the options and spawns the
//!    server task, which binds an ephemeral port on the loopback interface.
//! 2. [`InterceptingProxy::ready`] resolves with the bound address once the
//!    listener is up (or with the bind error).
//! 3. [`InterceptingProxy::close`] stops the server and releases the port.
//!    Closing twice is a no-op; dropping an unclosed proxy aborts the task.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use pactgate_state::StateSetupDispatcher;
use pactgate_types::StateDescriptor;

use crate::error::ProxyError;
use crate::filter::{FilterOutcome, RequestFilter};
use crate::forward::{Upstream, MAX_BODY_BYTES};
use crate::shutdown::ShutdownController;

/// How long `close` waits for in-flight connections before aborting them.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Everything the proxy needs for one verification run.
#[derive(Clone)]
pub struct ProxyOptions {
    pub provider_base_url: String,
    /// Reserved path answered by the dispatcher, e.g. `/_pactSetup`.
    pub state_setup_path: String,
    pub dispatcher: StateSetupDispatcher,
    pub request_filter: Option<Arc<dyn RequestFilter>>,
    pub validate_ssl: bool,
    pub change_origin: bool,
    /// Where to listen. Defaults to an OS-assigned port on 127.0.0.1.
    pub bind_addr: SocketAddr,
}

impl ProxyOptions {
    pub fn new(
        provider_base_url: impl Into<String>,
        state_setup_path: impl Into<String>,
        dispatcher: StateSetupDispatcher,
    ) -> Self {
        Self {
            provider_base_url: provider_base_url.into(),
            state_setup_path: state_setup_path.into(),
            dispatcher,
            request_filter: None,
            validate_ssl: true,
            change_origin: false,
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
        }
    }
}

struct ProxyState {
    dispatcher: StateSetupDispatcher,
    request_filter: Option<Arc<dyn RequestFilter>>,
    upstream: Upstream,
}

/// Build the proxy's router: the state-setup path plus a catch-all that
/// forwards to the provider.
pub fn router(options: &ProxyOptions) -> Result<Router, ProxyError> {
    let upstream = Upstream::new(
        &options.provider_base_url,
        options.validate_ssl,
        options.change_origin,
    )?;
    let state = Arc::new(ProxyState {
        dispatcher: options.dispatcher.clone(),
        request_filter: options.request_filter.clone(),
        upstream,
    });

    Ok(Router::new()
        .route(
            &options.state_setup_path,
            any(state_setup).layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .fallback(forward)
        .with_state(state)
        .layer(TraceLayer::new_for_http()))
}

/// Answer a state-setup request: 200 with no body when every handler
/// succeeded, 500 with the failure otherwise.
async fn state_setup(State(state): State<Arc<ProxyState>>, body: Bytes) -> Response {
    let descriptor = StateDescriptor::from_body(&body);
    debug!(?descriptor, "state setup request");

    match state.dispatcher.dispatch(&descriptor).await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => {
            warn!(error = %e, "state setup failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn forward(State(state): State<Arc<ProxyState>>, request: Request) -> Response {
    let request = match &state.request_filter {
        Some(filter) => match filter.filter(request).await {
            FilterOutcome::Forward(request) => request,
            FilterOutcome::Respond(response) => return response,
        },
        None => request,
    };

    match state.upstream.forward(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "forwarding to provider failed");
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

/// A running proxy for one verification run.
pub struct InterceptingProxy {
    state_setup_path: String,
    shutdown: ShutdownController,
    ready_rx: Mutex<Option<oneshot::Receiver<Result<SocketAddr, ProxyError>>>>,
    local_addr: OnceLock<SocketAddr>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl InterceptingProxy {
    /// Spawn the proxy server. Must be called inside a Tokio runtime.
    ///
    /// Fails without spawning anything if the provider base URL is unusable.
    pub fn start(options: ProxyOptions) -> Result<Self, ProxyError> {
        let app = router(&options)?;
        let shutdown = ShutdownController::new();
        let mut shutdown_rx = shutdown.subscribe();
        let (ready_tx, ready_rx) = oneshot::channel();
        let bind_addr = options.bind_addr;

        let task = tokio::spawn(async move {
            let listener = match TcpListener::bind(bind_addr).await {
                Ok(listener) => listener,
                Err(source) => {
                    let _ = ready_tx.send(Err(ProxyError::Bind {
                        addr: bind_addr,
                        source,
                    }));
                    return;
                }
            };
            let addr = match listener.local_addr() {
                Ok(addr) => addr,
                Err(source) => {
                    let _ = ready_tx.send(Err(ProxyError::Bind {
                        addr: bind_addr,
                        source,
                    }));
                    return;
                }
            };
            info!("state proxy listening on {}", addr);
            let _ = ready_tx.send(Ok(addr));

            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await;
            if let Err(e) = served {
                warn!("state proxy server error: {}", e);
            }
            debug!("state proxy stopped");
        });

        Ok(Self {
            state_setup_path: options.state_setup_path,
            shutdown,
            ready_rx: Mutex::new(Some(ready_rx)),
            local_addr: OnceLock::new(),
            task: Mutex::new(Some(task)),
        })
    }

    /// Wait until the listener is bound and return its address.
    pub async fn ready(&self, timeout: Duration) -> Result<SocketAddr, ProxyError> {
        if let Some(addr) = self.local_addr.get() {
            return Ok(*addr);
        }

        let rx = self
            .ready_rx
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or(ProxyError::NotStarted)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(addr))) => Ok(*self.local_addr.get_or_init(|| addr)),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(ProxyError::NotStarted),
            Err(_) => Err(ProxyError::ReadyTimeout(timeout)),
        }
    }

    /// The bound address, once [`ready`](Self::ready) has succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub fn state_setup_path(&self) -> &str {
        &self.state_setup_path
    }

    /// Base URL the verification engine should use instead of the provider's.
    pub fn base_url(&self) -> Option<String> {
        self.local_addr().map(|addr| format!("http://{addr}"))
    }

    /// Full URL of the state-setup path.
    pub fn state_setup_url(&self) -> Option<String> {
        self.base_url()
            .map(|base| format!("{base}{}", self.state_setup_path))
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Stop the server and release its port. Later calls do nothing.
    pub async fn close(&self) {
        if !self.shutdown.shutdown() {
            return;
        }

        let task = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(mut task) = task {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                warn!("state proxy did not drain within {:?}, aborting", CLOSE_GRACE);
                task.abort();
                let _ = task.await;
            }
        }
        debug!("state proxy closed");
    }
}

impl Drop for InterceptingProxy {
    fn drop(&mut self) {
        if self.shutdown.shutdown() {
            if let Some(task) = self.task.get_mut().ok().and_then(Option::take) {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::routing::post;
    use pactgate_state::{HandlerError, StateHandlerRegistry, StateResult};
    use pactgate_types::JsonMap;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    const SETUP_PATH: &str = "/_pactSetup";

    fn options(registry: StateHandlerRegistry) -> ProxyOptions {
        ProxyOptions::new(
            "http://localhost:1",
            SETUP_PATH,
            StateSetupDispatcher::new(Arc::new(registry)),
        )
    }

    fn setup_request(body: serde_json::Value) -> Request {
        Request::builder()
            .method("POST")
            .uri(SETUP_PATH)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn state_setup_success_is_200_with_empty_body() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = StateHandlerRegistry::new().with_handler(
            "user exists",
            move |setup: Option<bool>, _params: Option<JsonMap>| {
                assert_eq!(setup, Some(true));
                counter.fetch_add(1, Ordering::SeqCst);
                async { StateResult::Ok(None) }
            },
        );
        let app = router(&options(registry)).unwrap();

        let response = app
            .oneshot(setup_request(json!({ "action": "setup", "state": "user exists", "params": {} })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn state_setup_failure_is_500_with_error_body() {
        let registry = StateHandlerRegistry::new().with_handler(
            "broken",
            |_setup: Option<bool>, _params: Option<JsonMap>| async {
                StateResult::Err(HandlerError::new("database unavailable"))
            },
        );
        let app = router(&options(registry)).unwrap();

        let response = app
            .oneshot(setup_request(json!({ "states": ["broken"] })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("database unavailable"));
    }

    #[tokio::test]
    async fn large_state_params_reach_the_handler() {
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = seen.clone();
        let registry = StateHandlerRegistry::new().with_handler(
            "bulk import",
            move |_setup: Option<bool>, params: Option<JsonMap>| {
                let blob_len = params
                    .as_ref()
                    .and_then(|p| p.get("blob"))
                    .and_then(|v| v.as_str())
                    .map_or(0, str::len);
                sink.store(blob_len, Ordering::SeqCst);
                async { StateResult::Ok(None) }
            },
        );
        let app = router(&options(registry)).unwrap();
        let blob = "x".repeat(3 * 1024 * 1024);

        let response = app
            .oneshot(setup_request(json!({
                "action": "setup",
                "state": "bulk import",
                "params": { "blob": blob },
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(seen.load(Ordering::SeqCst), 3 * 1024 * 1024);
    }

    #[tokio::test]
    async fn malformed_state_setup_body_succeeds() {
        let app = router(&options(StateHandlerRegistry::new())).unwrap();
        let request = Request::builder()
            .method("POST")
            .uri(SETUP_PATH)
            .body(Body::from("{oops"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn filter_can_short_circuit_forwarding() {
        let mut opts = options(StateHandlerRegistry::new());
        opts.request_filter = Some(Arc::new(|_request: Request| async {
            FilterOutcome::Respond((StatusCode::IM_A_TEAPOT, "filtered").into_response())
        }));
        let app = router(&opts).unwrap();

        let response = app
            .oneshot(Request::builder().uri("/users/1").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }

    #[tokio::test]
    async fn filter_is_not_applied_to_state_setup_path() {
        let filtered = Arc::new(AtomicUsize::new(0));
        let counter = filtered.clone();
        let mut opts = options(StateHandlerRegistry::new());
        opts.request_filter = Some(Arc::new(move |_request: Request| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { FilterOutcome::Respond(StatusCode::FORBIDDEN.into_response()) }
        }));
        let app = router(&opts).unwrap();

        let response = app
            .oneshot(setup_request(json!({ "states": [] })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(filtered.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unreachable_provider_is_bad_gateway() {
        let app = router(&options(StateHandlerRegistry::new())).unwrap();

        let response = app
            .oneshot(Request::builder().uri("/anything").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn forwards_method_path_and_body_unchanged() {
        let provider = Router::new().route(
            "/orders",
            post(|request: Request| async move {
                let query = request.uri().query().unwrap_or_default().to_string();
                let body = to_bytes(request.into_body(), usize::MAX).await.unwrap();
                (
                    StatusCode::CREATED,
                    format!("{query}|{}", String::from_utf8_lossy(&body)),
                )
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let provider_addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, provider).await.unwrap();
        });

        let mut opts = options(StateHandlerRegistry::new());
        opts.provider_base_url = format!("http://{provider_addr}");
        let proxy = InterceptingProxy::start(opts).unwrap();
        let addr = proxy.ready(Duration::from_secs(5)).await.unwrap();

        let response = reqwest::Client::new()
            .post(format!("http://{addr}/orders?id=7"))
            .body(r#"{"qty":2}"#)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.text().await.unwrap(), r#"id=7|{"qty":2}"#);
        proxy.close().await;
    }

    #[tokio::test]
    async fn ready_reports_bound_port_and_urls() {
        let proxy = InterceptingProxy::start(options(StateHandlerRegistry::new())).unwrap();
        assert!(proxy.local_addr().is_none());

        let addr = proxy.ready(Duration::from_secs(5)).await.unwrap();

        assert_ne!(addr.port(), 0);
        assert_eq!(proxy.ready(Duration::from_secs(5)).await.unwrap(), addr);
        assert_eq!(
            proxy.state_setup_url().unwrap(),
            format!("http://127.0.0.1:{}/_pactSetup", addr.port())
        );
        proxy.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent_and_releases_port() {
        let proxy = InterceptingProxy::start(options(StateHandlerRegistry::new())).unwrap();
        let addr = proxy.ready(Duration::from_secs(5)).await.unwrap();

        proxy.close().await;
        proxy.close().await;

        assert!(proxy.is_closed());
        assert!(TcpListener::bind(addr).await.is_ok());
    }

    #[tokio::test]
    async fn occupied_port_fails_readiness() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut opts = options(StateHandlerRegistry::new());
        opts.bind_addr = taken.local_addr().unwrap();

        let proxy = InterceptingProxy::start(opts).unwrap();
        let err = proxy.ready(Duration::from_secs(5)).await.unwrap_err();

        assert!(matches!(err, ProxyError::Bind { .. }));
        proxy.close().await;
    }

    #[tokio::test]
    async fn invalid_provider_url_fails_before_spawning() {
        let mut opts = options(StateHandlerRegistry::new());
        opts.provider_base_url = "nowhere".into();
        assert!(matches!(
            InterceptingProxy::start(opts),
            Err(ProxyError::InvalidUpstream { .. })
        ));
    }
}
