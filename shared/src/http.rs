use http::header::{
    self, CONNECTION, HeaderMap, HeaderName, HeaderValue, TE, TRAILER, TRANSFER_ENCODING, UPGRADE,
    VIA,
};
use http::Version;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::{Body, Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Binds `host:port` and serves the given service until the process exits.
/// Every accepted socket gets its own task; hyper auto-detects h1/h2 per
/// connection. A failed accept is logged and the loop keeps going.
pub async fn serve_http<S, B, E>(host: &str, port: u16, service: S) -> Result<(), E>
where
    E: From<std::io::Error> + std::error::Error + Send + Sync + 'static,
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: std::error::Error + Send + Sync,
    S: Service<Request<Incoming>, Response = Response<B>, Error = E> + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    let listener = TcpListener::bind((host, port)).await?;
    let service = Arc::new(service);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        let _ = stream.set_nodelay(true);

        let service = service.clone();
        tokio::spawn(async move {
            let served = auto::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), service)
                .await;
            if let Err(e) = served {
                tracing::debug!(peer = %peer, error = %e, "connection ended with error");
            }
        });
    }
}

/// Collects every header name that must not cross this hop: the standard
/// hop-by-hop set, anything listed in the Connection header value, and
/// keep-alive on pre-1.1 connections.
fn hop_header_drops(headers: &HeaderMap, version: Version) -> Vec<HeaderName> {
    let mut drops = vec![
        CONNECTION,
        TRANSFER_ENCODING,
        TE,
        TRAILER,
        UPGRADE,
        header::PROXY_AUTHORIZATION,
        header::PROXY_AUTHENTICATE,
    ];

    if let Some(listed) = headers.get(CONNECTION).and_then(|v| v.to_str().ok()) {
        drops.extend(
            listed
                .split(',')
                .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok()),
        );
    }

    if matches!(version, Version::HTTP_09 | Version::HTTP_10) {
        drops.push(HeaderName::from_static("keep-alive"));
    }

    drops
}

/// Strips hop-by-hop headers before forwarding. Only HTTP/1.x traffic is
/// touched; HTTP/2 and HTTP/3 carry no hop-by-hop headers. Applied to
/// proxied requests and responses in both directions.
pub fn strip_hop_headers(headers: &mut HeaderMap, version: Version) {
    if !matches!(
        version,
        Version::HTTP_09 | Version::HTTP_10 | Version::HTTP_11
    ) {
        return;
    }

    for name in hop_header_drops(headers, version) {
        headers.remove(&name);
    }
}

/// Records this hop in the Via header, appending to any existing entries.
pub fn append_via(headers: &mut HeaderMap, version: Version, hop_name: &str) {
    let Some(token) = version_token(version) else {
        tracing::warn!(?version, "unknown HTTP version, skipping Via header");
        return;
    };

    let entry = format!("{token} {hop_name}");
    let combined = match headers.get(VIA).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {entry}"),
        None => entry,
    };

    if let Ok(value) = HeaderValue::from_str(&combined) {
        headers.insert(VIA, value);
    }
}

fn version_token(version: Version) -> Option<&'static str> {
    match version {
        Version::HTTP_09 => Some("0.9"),
        Version::HTTP_10 => Some("1.0"),
        Version::HTTP_11 => Some("1.1"),
        Version::HTTP_2 => Some("2"),
        Version::HTTP_3 => Some("3"),
        _ => None,
    }
}

/// Canned plain-text response carrying the status line's reason phrase.
pub fn boxed_status_response<E>(status: StatusCode) -> Response<BoxBody<Bytes, E>>
where
    E: 'static,
{
    let reason = status.canonical_reason().unwrap_or("error");
    let body = Full::new(Bytes::from_static(reason.as_bytes()))
        .map_err(|never| match never {})
        .boxed();

    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}
