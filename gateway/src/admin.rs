use crate::GatewayError;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use shared::http::boxed_status_response;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Ops surface on its own listener: liveness at `/health`, readiness at
/// `/ready` (503 until the gateway has completed one successful store read).
pub struct AdminService {
    ready: Arc<AtomicBool>,
}

impl AdminService {
    pub fn new(ready: Arc<AtomicBool>) -> Self {
        AdminService { ready }
    }
}

impl Service<Request<Incoming>> for AdminService {
    type Response = Response<BoxBody<Bytes, std::convert::Infallible>>;
    type Error = GatewayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let is_ready = self.ready.load(Ordering::Relaxed);

        Box::pin(async move {
            let ok_body = || Full::new(Bytes::from("ok\n")).boxed();

            let res = match req.uri().path() {
                "/health" => Response::new(ok_body()),
                "/ready" => match is_ready {
                    true => Response::new(ok_body()),
                    false => boxed_status_response(StatusCode::SERVICE_UNAVAILABLE),
                },
                _ => boxed_status_response(StatusCode::NOT_FOUND),
            };
            Ok(res)
        })
    }
}

/// Serves the admin listener alongside the gateway.
pub async fn serve_admin(
    host: &str,
    port: u16,
    ready: Arc<AtomicBool>,
) -> Result<(), GatewayError> {
    tracing::info!(host, port, "starting admin listener");
    shared::http::serve_http(host, port, AdminService::new(ready)).await
}
