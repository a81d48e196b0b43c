use crate::metrics_defs::UPSTREAM_REQUEST_DURATION;
use http::header::HOST;
use hyper::body::Bytes;
use hyper::{Method, Request, Response};
use shared::http::{append_via, strip_hop_headers};
use std::time::{Duration, Instant};
use url::Url;

pub const SANDBOX_ORIGIN_HEADER: &str = "x-sandbox-origin";

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);
const DEBUG_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
pub enum ForwardError {
    #[error("upstream request failed for {0}: {1}")]
    UpstreamRequestFailed(String, String),

    #[error("upstream response body error: {0}")]
    ResponseBodyError(String),
}

/// Composes the upstream URL from the backend's scheme and host with the
/// incoming request's path and query, verbatim.
pub fn compose_upstream_url(backend: &Url, path_and_query: &str) -> Url {
    let mut url = backend.clone();
    if let Some((path, query)) = path_and_query.split_once('?') {
        url.set_path(path);
        url.set_query(Some(query));
    } else {
        url.set_path(path_and_query);
        url.set_query(None);
    }
    url
}

/// One forwarded hop to the chosen backend. The request and response bodies
/// are collected into bytes; streaming responses (SSE, long polls) are not
/// supported on this path.
pub struct Forwarder {
    client: reqwest::Client,
    hop_name: String,
}

impl Forwarder {
    pub fn new(hop_name: &str) -> Self {
        Forwarder {
            client: reqwest::Client::new(),
            hop_name: hop_name.to_string(),
        }
    }

    pub async fn forward(
        &self,
        upstream_url: Url,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, ForwardError> {
        let upstream_identifier = upstream_url
            .host_str()
            .unwrap_or(upstream_url.as_str())
            .to_string();
        let origin = upstream_url.origin().ascii_serialization();

        let (mut parts, body) = request.into_parts();
        let request_version = parts.version;
        strip_hop_headers(&mut parts.headers, request_version);
        append_via(&mut parts.headers, request_version, &self.hop_name);
        // The upstream host comes from the composed URL; the inbound Host
        // would route the sandbox's edge back at us.
        parts.headers.remove(HOST);
        if let Ok(value) = origin.parse() {
            parts.headers.insert(SANDBOX_ORIGIN_HEADER, value);
        }

        let start = Instant::now();
        let upstream_response = self
            .client
            .request(parts.method, upstream_url)
            .headers(parts.headers)
            .body(body)
            .timeout(UPSTREAM_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                ForwardError::UpstreamRequestFailed(upstream_identifier.clone(), e.to_string())
            })?;

        let status = upstream_response.status();
        let response_version = upstream_response.version();
        let mut headers = upstream_response.headers().clone();
        strip_hop_headers(&mut headers, response_version);
        append_via(&mut headers, response_version, &self.hop_name);

        let body = upstream_response
            .bytes()
            .await
            .map_err(|e| ForwardError::ResponseBodyError(e.to_string()))?;

        metrics::histogram!(UPSTREAM_REQUEST_DURATION.name, "status" => status.as_u16().to_string())
            .record(start.elapsed().as_secs_f64());

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }

    /// Debug-mode reachability probe against the composed URL: HEAD for
    /// GET/HEAD requests, OPTIONS otherwise. Failure maps to status -1 with
    /// the error message.
    pub async fn debug_probe(
        &self,
        request_method: &Method,
        upstream_url: Url,
    ) -> (i32, Option<String>) {
        let probe_method = if matches!(*request_method, Method::GET | Method::HEAD) {
            Method::HEAD
        } else {
            Method::OPTIONS
        };

        match self
            .client
            .request(probe_method, upstream_url)
            .timeout(DEBUG_PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => (i32::from(response.status().as_u16()), None),
            Err(e) => (-1, Some(e.to_string())),
        }
    }
}
