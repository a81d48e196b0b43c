//! Metrics definitions for the watchdog.

use shared::metrics_defs::MetricDef;

pub const TICK_DURATION: MetricDef = MetricDef::histogram(
    "watchdog.tick.duration",
    "Time to complete a watchdog tick in seconds, tagged by status",
);

pub const PROVISION_ATTEMPTS: MetricDef = MetricDef::counter(
    "watchdog.provision.attempts",
    "Number of sandbox provision attempts, tagged by outcome",
);

pub const DRAIN_OUTCOMES: MetricDef = MetricDef::counter(
    "watchdog.drain.outcomes",
    "Decommission outcomes for aged-out draining sandboxes",
);

pub const ALL_METRICS: &[MetricDef] = &[TICK_DURATION, PROVISION_ATTEMPTS, DRAIN_OUTCOMES];
