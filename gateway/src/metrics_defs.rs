//! Metrics definitions for the gateway.

use shared::metrics_defs::MetricDef;

pub const REWRITES: MetricDef = MetricDef::counter(
    "gateway.rewrites",
    "Requests rewritten to a sandbox backend, tagged by routing label",
);

pub const NO_BACKEND: MetricDef = MetricDef::counter(
    "gateway.no_backend",
    "Requests answered 503 because no backend URL was known",
);

pub const UPSTREAM_REQUEST_DURATION: MetricDef = MetricDef::histogram(
    "gateway.upstream.duration",
    "Time spent on the forwarded upstream hop in seconds",
);

pub const ALL_METRICS: &[MetricDef] = &[REWRITES, NO_BACKEND, UPSTREAM_REQUEST_DURATION];
