//! Metric definition tables shared by the service crates.
//!
//! Each crate lists its emitted metrics as `MetricDef` constants in its own
//! `metrics_defs` module; the CLI renders those tables into METRICS.md and
//! keeps them in sync.

/// One emitted metric: statsd name, kind, and the description shown in the
/// documentation table.
#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub kind: MetricKind,
    pub help: &'static str,
}

impl MetricDef {
    pub const fn counter(name: &'static str, help: &'static str) -> Self {
        MetricDef {
            name,
            kind: MetricKind::Counter,
            help,
        }
    }

    pub const fn gauge(name: &'static str, help: &'static str) -> Self {
        MetricDef {
            name,
            kind: MetricKind::Gauge,
            help,
        }
    }

    pub const fn histogram(name: &'static str, help: &'static str) -> Self {
        MetricDef {
            name,
            kind: MetricKind::Histogram,
            help,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    pub const fn label(self) -> &'static str {
        match self {
            MetricKind::Counter => "Counter",
            MetricKind::Gauge => "Gauge",
            MetricKind::Histogram => "Histogram",
        }
    }
}
