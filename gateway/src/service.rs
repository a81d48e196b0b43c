use crate::api;
use crate::bypass::should_bypass;
use crate::config::GatewayConfig;
use crate::forward::{Forwarder, SANDBOX_ORIGIN_HEADER, compose_upstream_url};
use crate::metrics_defs::{NO_BACKEND, REWRITES};
use crate::resolve::resolve_backend;
use crate::{GatewayError, HOP_NAME};
use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use store::StateStore;
use watchdog::RotationController;

pub(crate) struct GatewayInner {
    pub(crate) config: GatewayConfig,
    pub(crate) store: Option<Arc<dyn StateStore>>,
    pub(crate) controller: Option<Arc<RotationController>>,
    pub(crate) forwarder: Forwarder,
    pub(crate) started_at: Instant,
    pub(crate) store_ready: Arc<AtomicBool>,
}

/// The edge service. Per request: bypass check, then either the locally
/// served API surface or a rewrite to the designated sandbox backend. Never
/// fails a request; everything degrades to a status response.
#[derive(Clone)]
pub struct GatewayService {
    inner: Arc<GatewayInner>,
}

impl GatewayService {
    pub fn new(
        config: GatewayConfig,
        store: Option<Arc<dyn StateStore>>,
        controller: Option<Arc<RotationController>>,
    ) -> Self {
        GatewayService {
            inner: Arc::new(GatewayInner {
                config,
                store,
                controller,
                forwarder: Forwarder::new(HOP_NAME),
                started_at: Instant::now(),
                store_ready: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    /// Readiness flag for the admin listener: true once a store read has
    /// succeeded.
    pub fn ready_flag(&self) -> Arc<AtomicBool> {
        self.inner.store_ready.clone()
    }
}

impl<B> Service<Request<B>> for GatewayService
where
    B: BodyExt<Data = Bytes> + Send + Sync + Unpin + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    type Response = Response<Full<Bytes>>;
    type Error = GatewayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move {
            let response = if should_bypass(&req, &inner.config) {
                api::handle_local(&inner, &req).await
            } else {
                handle_rewrite(&inner, req).await
            };
            Ok(response)
        })
    }
}

async fn handle_rewrite<B>(inner: &GatewayInner, req: Request<B>) -> Response<Full<Bytes>>
where
    B: BodyExt<Data = Bytes> + Send + Sync + Unpin + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let Some(store) = &inner.store else {
        metrics::counter!(NO_BACKEND.name).increment(1);
        return no_backend_response();
    };

    let Some(backend) = resolve_backend(store.as_ref()).await else {
        metrics::counter!(NO_BACKEND.name).increment(1);
        return no_backend_response();
    };
    inner.store_ready.store(true, Ordering::Relaxed);

    let (parts, body) = req.into_parts();
    let method = parts.method.clone();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();

    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to read request body");
            return status_response(StatusCode::BAD_REQUEST, "bad request");
        }
    };

    let upstream_url = compose_upstream_url(&backend.url, &path_and_query);
    let origin = backend.url.origin().ascii_serialization();
    let request = Request::from_parts(parts, body_bytes);

    let mut response = match inner.forwarder.forward(upstream_url.clone(), request).await {
        Ok(response) => response.map(Full::new),
        Err(e) => {
            tracing::error!(error = %e, origin = %origin, "upstream hop failed");
            return status_response(StatusCode::SERVICE_UNAVAILABLE, "upstream request failed");
        }
    };

    metrics::counter!(REWRITES.name, "routing" => backend.label.routing_header()).increment(1);

    let headers = response.headers_mut();
    if let Ok(value) = origin.parse() {
        headers.insert(SANDBOX_ORIGIN_HEADER, value);
    }
    headers.insert(
        "x-sandbox-routing",
        http::HeaderValue::from_static(backend.label.routing_header()),
    );

    if inner.config.debug_routing {
        let (status, error) = inner.forwarder.debug_probe(&method, upstream_url).await;
        if let Ok(value) = status.to_string().parse() {
            response.headers_mut().insert("x-sandbox-probe-status", value);
        }
        if let Some(error) = error
            && let Ok(value) = error.parse()
        {
            response.headers_mut().insert("x-sandbox-probe-error", value);
        }
    }

    response
}

fn no_backend_response() -> Response<Full<Bytes>> {
    status_response(StatusCode::SERVICE_UNAVAILABLE, "No healthy sandbox available")
}

fn status_response(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CACHE_CONTROL, "no-store")
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from_static(message.as_bytes())))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SelfHost;
    use async_trait::async_trait;
    use provider::{
        Command, CommandOutcome, ProviderError, SandboxHandle, SandboxProvider, SandboxSpec,
    };
    use serde_json::{Value, json};
    use std::time::Duration;
    use store::{MemoryStore, StoreOp, keys};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> GatewayConfig {
        GatewayConfig {
            self_host: SelfHost::None,
            self_url: None,
            disable_rewrite: false,
            debug_routing: false,
            monitoring_routes_disabled: false,
            keepalive_token: Some("ka-secret".into()),
        }
    }

    fn service_with(config: GatewayConfig, store: Arc<MemoryStore>) -> GatewayService {
        GatewayService::new(config, Some(store), None)
    }

    fn get(path_and_query: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .uri(path_and_query)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    async fn seed_active(store: &MemoryStore, url: &str) {
        store
            .apply(vec![StoreOp::upsert(keys::ACTIVE_URL, json!(url))])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rewrite_preserves_path_and_query() {
        let upstream = MockServer::start().await;
        let origin = upstream.uri();
        Mock::given(method("GET"))
            .and(path("/dashboard/settings"))
            .and(query_param("tab", "keys"))
            .and(header("x-sandbox-origin", origin.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string("upstream-ok"))
            .expect(1)
            .mount(&upstream)
            .await;

        let store = Arc::new(MemoryStore::new());
        seed_active(&store, &origin).await;
        let service = service_with(test_config(), store);

        let response = service
            .call(get("/dashboard/settings?tab=keys"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-sandbox-routing").unwrap(),
            "edge-rewrite"
        );
        assert_eq!(
            response.headers().get("x-sandbox-origin").unwrap(),
            origin.as_str()
        );
        assert!(response.headers().contains_key("via"));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"upstream-ok");
    }

    #[tokio::test]
    async fn test_stale_fallback_is_labelled() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&upstream)
            .await;

        let store = Arc::new(MemoryStore::new());
        store
            .apply(vec![StoreOp::upsert(
                keys::LAST_KNOWN_GOOD_URL,
                json!(upstream.uri()),
            )])
            .await
            .unwrap();
        let service = service_with(test_config(), store);

        let response = service.call(get("/page")).await.unwrap();
        assert_eq!(
            response.headers().get("x-sandbox-routing").unwrap(),
            "edge-rewrite-stale"
        );
    }

    #[tokio::test]
    async fn test_no_backend_yields_503() {
        let service = service_with(test_config(), Arc::new(MemoryStore::new()));

        let response = service.call(get("/dashboard")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(CACHE_CONTROL).unwrap(), "no-store");
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"No healthy sandbox available");
    }

    #[tokio::test]
    async fn test_bypassed_paths_are_served_locally() {
        let service = service_with(test_config(), Arc::new(MemoryStore::new()));

        let response = service.call(get("/favicon.ico")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_debug_probe_headers() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&upstream)
            .await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&upstream)
            .await;

        let store = Arc::new(MemoryStore::new());
        seed_active(&store, &upstream.uri()).await;
        let mut config = test_config();
        config.debug_routing = true;
        let service = service_with(config, store);

        let response = service.call(get("/page")).await.unwrap();
        assert_eq!(
            response.headers().get("x-sandbox-probe-status").unwrap(),
            "200"
        );
        assert!(!response.headers().contains_key("x-sandbox-probe-error"));
    }

    #[tokio::test]
    async fn test_health_route_reports_env_and_watchdog_state() {
        let store = Arc::new(MemoryStore::new());
        let state = store::SandboxState {
            last_check_at: Some(chrono::Utc::now()),
            ..Default::default()
        };
        store
            .apply(vec![store::state_upsert(&state).unwrap()])
            .await
            .unwrap();
        let service = service_with(test_config(), store);

        let response = service.call(get("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], json!("ok"));
        assert_eq!(parsed["service"], json!("next-app"));
        assert_eq!(parsed["env"], json!("router"));
        assert!(parsed["watchdogLastCheckAt"].is_string());
        assert!(parsed["watchdogLastRotationAt"].is_null());
        assert!(parsed["uptimeSeconds"].is_u64());

        // a request carrying the origin header reports the sandbox env
        let req = Request::builder()
            .uri("/api/health")
            .header("x-sandbox-origin", "https://sbx-1.example")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = service.call(req).await.unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["env"], json!("sandbox"));
        assert_eq!(parsed["sandboxOrigin"], json!("https://sbx-1.example"));
    }

    #[tokio::test]
    async fn test_health_route_disabled_by_flag() {
        let mut config = test_config();
        config.monitoring_routes_disabled = true;
        let service = service_with(config, Arc::new(MemoryStore::new()));

        let response = service.call(get("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_keepalive_token_check() {
        let service = service_with(test_config(), Arc::new(MemoryStore::new()));

        let req = Request::builder()
            .uri("/internal/keepalive")
            .header("x-keepalive-token", "ka-secret")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = service.call(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(CACHE_CONTROL).unwrap(), "no-store");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], json!("ok"));

        let req = Request::builder()
            .uri("/internal/keepalive")
            .header("x-keepalive-token", "wrong")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = service.call(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], json!("unauthorized"));
    }

    #[tokio::test]
    async fn test_watchdog_route_disabled_by_flag() {
        let mut config = test_config();
        config.monitoring_routes_disabled = true;
        let service = service_with(config, Arc::new(MemoryStore::new()));

        let response = service.call(get("/watchdog")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"watchdog routes disabled");
    }

    /// Provider double for the end-to-end trigger test.
    struct OneShotProvider {
        url: String,
    }

    #[async_trait]
    impl SandboxProvider for OneShotProvider {
        async fn create(&self, _spec: &SandboxSpec) -> Result<SandboxHandle, ProviderError> {
            Ok(SandboxHandle {
                id: "sbx-e2e".into(),
                url: self.url.clone(),
            })
        }
        async fn get(&self, id: &str) -> Result<SandboxHandle, ProviderError> {
            Ok(SandboxHandle {
                id: id.to_string(),
                url: self.url.clone(),
            })
        }
        async fn stop(&self, _handle: &SandboxHandle) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn run_command(
            &self,
            _handle: &SandboxHandle,
            _step: &str,
            command: Command,
        ) -> Result<CommandOutcome, ProviderError> {
            Ok(if command.detached {
                CommandOutcome::Running
            } else {
                CommandOutcome::Exited(0)
            })
        }
    }

    #[tokio::test]
    async fn test_forced_trigger_promotes_and_reroutes() {
        let sandbox = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .mount(&sandbox)
            .await;
        Mock::given(method("GET"))
            .and(path("/app"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello from sandbox"))
            .mount(&sandbox)
            .await;

        let store = Arc::new(MemoryStore::new());
        let controller = Arc::new(RotationController::new(
            store.clone(),
            Arc::new(OneShotProvider {
                url: sandbox.uri(),
            }),
            watchdog::WatchdogConfig {
                readiness_deadline: Duration::from_millis(200),
                readiness_poll: Duration::from_millis(10),
                provision_backoff_base: Duration::from_millis(1),
                ..Default::default()
            },
            provider::BootstrapConfig {
                repo: "https://github.com/acme/next-app.git".into(),
                git_ref: "main".into(),
                workdir: "/tmp/next-sandbox-app".into(),
                port: 3000,
                keepalive_token: "ka-secret".into(),
            },
        ));

        let service = GatewayService::new(test_config(), Some(store.clone()), Some(controller));

        let response = service.call(get("/watchdog?force=true")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"ok");

        // the promotion is immediately visible to the rewrite path
        let response = service.call(get("/app")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-sandbox-routing").unwrap(),
            "edge-rewrite"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"hello from sandbox");
    }
}
