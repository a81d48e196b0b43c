use std::time::Duration;

/// Timing and provisioning knobs for the rotation controller. The defaults
/// are the production values; tests shrink them.
#[derive(Clone, Debug)]
pub struct WatchdogConfig {
    /// Scheduled replacement cadence for the active sandbox.
    pub rotation_interval: Duration,
    /// How long a superseded instance keeps serving in-flight work before it
    /// is stopped.
    pub drain_grace: Duration,
    /// Upper bound on retrying a failed stop of an aged-out draining record,
    /// measured from `drainStartedAt`. Past this the record is dropped even
    /// if the provider still reports the instance.
    pub drain_retention_max: Duration,
    /// How long a new sandbox gets to pass its first health check.
    pub readiness_deadline: Duration,
    pub readiness_poll: Duration,
    pub probe_timeout: Duration,
    /// Total provision attempts (1 initial + retries).
    pub provision_attempts: u32,
    /// First retry backoff; doubles per attempt.
    pub provision_backoff_base: Duration,
    pub sandbox_port: u16,
    pub sandbox_runtime: String,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        WatchdogConfig {
            rotation_interval: Duration::from_secs(5 * 60 * 60),
            drain_grace: Duration::from_secs(10 * 60),
            drain_retention_max: Duration::from_secs(60 * 60),
            readiness_deadline: Duration::from_secs(10 * 60),
            readiness_poll: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(8),
            provision_attempts: 5,
            provision_backoff_base: Duration::from_secs(2),
            sandbox_port: 3000,
            sandbox_runtime: "node22".to_string(),
        }
    }
}
