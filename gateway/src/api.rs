use crate::service::GatewayInner;
use chrono::{DateTime, Utc};
use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use std::sync::atomic::Ordering;

/// Routes a bypassed request to the locally served endpoints. Anything else
/// on the pass-through surface is a plain 404.
pub(crate) async fn handle_local<B>(inner: &GatewayInner, req: &Request<B>) -> Response<Full<Bytes>> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/api/health") => health(inner, req).await,
        (&Method::GET, "/internal/keepalive") => keepalive(inner, req),
        (&Method::GET, "/watchdog") | (&Method::POST, "/watchdog") => trigger(inner, req).await,
        (_, "/watchdog") => text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
        _ => text_response(StatusCode::NOT_FOUND, "not found"),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthBody {
    status: &'static str,
    service: &'static str,
    sandbox_origin: Option<String>,
    env: &'static str,
    uptime_seconds: u64,
    timestamp: DateTime<Utc>,
    watchdog_last_check_at: Option<DateTime<Utc>>,
    watchdog_last_rotation_at: Option<DateTime<Utc>>,
}

async fn health<B>(inner: &GatewayInner, req: &Request<B>) -> Response<Full<Bytes>> {
    if inner.config.monitoring_routes_disabled {
        return empty_response(StatusCode::NOT_FOUND);
    }

    let origin_header = req
        .headers()
        .get("x-sandbox-origin")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let env = if origin_header.is_some() || inner.config.self_url.is_some() {
        "sandbox"
    } else {
        "router"
    };

    let mut last_check_at = None;
    let mut last_rotation_at = None;
    if let Some(store) = &inner.store {
        match store::load_state(store.as_ref()).await {
            Ok(state) => {
                inner.store_ready.store(true, Ordering::Relaxed);
                last_check_at = state.last_check_at;
                last_rotation_at = state.last_rotation_at;
            }
            Err(e) => tracing::warn!(error = %e, "health route could not load watchdog state"),
        }
    }

    json_response(
        StatusCode::OK,
        &HealthBody {
            status: "ok",
            service: "next-app",
            sandbox_origin: origin_header.or_else(|| inner.config.self_url.clone()),
            env,
            uptime_seconds: inner.started_at.elapsed().as_secs(),
            timestamp: Utc::now(),
            watchdog_last_check_at: last_check_at,
            watchdog_last_rotation_at: last_rotation_at,
        },
    )
}

#[derive(Serialize)]
struct KeepaliveBody {
    status: &'static str,
    detail: &'static str,
    timestamp: DateTime<Utc>,
}

fn keepalive<B>(inner: &GatewayInner, req: &Request<B>) -> Response<Full<Bytes>> {
    let provided = req
        .headers()
        .get("x-keepalive-token")
        .and_then(|v| v.to_str().ok());

    let authorized = match (&inner.config.keepalive_token, provided) {
        (Some(expected), Some(token)) => expected == token,
        _ => false,
    };

    if !authorized {
        return json_response(
            StatusCode::UNAUTHORIZED,
            &KeepaliveBody {
                status: "unauthorized",
                detail: "invalid keepalive token",
                timestamp: Utc::now(),
            },
        );
    }

    json_response(
        StatusCode::OK,
        &KeepaliveBody {
            status: "ok",
            detail: "keepalive acknowledged",
            timestamp: Utc::now(),
        },
    )
}

async fn trigger<B>(inner: &GatewayInner, req: &Request<B>) -> Response<Full<Bytes>> {
    if inner.config.monitoring_routes_disabled {
        return text_response(StatusCode::OK, "watchdog routes disabled");
    }

    let force = force_requested(req.uri().query());

    let Some(controller) = &inner.controller else {
        tracing::error!("watchdog trigger hit but no controller is wired");
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "watchdog failure");
    };

    match controller.tick(force).await {
        Ok(()) => text_response(StatusCode::OK, "ok"),
        Err(e) => {
            tracing::error!(error = %e, force, "watchdog tick failed");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "watchdog failure")
        }
    }
}

/// `?force`, `?force=true` and `?force=1` all request a forced provision.
fn force_requested(query: Option<&str>) -> bool {
    let Some(query) = query else {
        return false;
    };

    url::form_urlencoded::parse(query.as_bytes())
        .any(|(key, value)| key == "force" && matches!(&*value, "" | "true" | "1"))
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .header(CACHE_CONTROL, "no-store")
        .body(Full::new(Bytes::from(bytes)))
        .unwrap()
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(CACHE_CONTROL, "no-store")
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap()
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .unwrap()
}
