use crate::config::WatchdogConfig;
use crate::keepalive::KeepalivePinger;
use crate::metrics_defs::{DRAIN_OUTCOMES, PROVISION_ATTEMPTS, TICK_DURATION};
use crate::probe::{HealthCheck, HealthProber};
use crate::{Result, WatchdogError};
use chrono::{DateTime, Utc};
use provider::{BootstrapConfig, SandboxHandle, SandboxProvider, SandboxSpec};
use std::sync::Arc;
use std::time::{Duration, Instant};
use store::types::{DrainingSandboxRecord, SandboxRecord, SandboxStatus, TickFailure};
use store::{SandboxState, StateStore, StoreOp, keys};
use tokio::sync::Semaphore;
use tokio::time::sleep;

pub const REASON_FORCE: &str = "force-provision-request";
pub const REASON_NO_ACTIVE: &str = "no-active-sandbox";
pub const REASON_ROTATION_DUE: &str = "rotation-due";

/// The watchdog tick: decides whether to keep, rotate or replace the active
/// sandbox, manages the draining list, and persists the outcome.
///
/// A tick walks Load -> Assess -> (Provision -> WaitReady -> Promote)? ->
/// Drain -> Persist. Overlapping ticks in this process serialize on an
/// internal permit; ticks racing from another process are tolerated, the
/// store's atomic PATCH is the serialization point.
pub struct RotationController {
    store: Arc<dyn StateStore>,
    provider: Arc<dyn SandboxProvider>,
    prober: HealthProber,
    pinger: KeepalivePinger,
    config: WatchdogConfig,
    bootstrap: BootstrapConfig,
    tick_lock: Semaphore,
}

impl RotationController {
    pub fn new(
        store: Arc<dyn StateStore>,
        provider: Arc<dyn SandboxProvider>,
        config: WatchdogConfig,
        bootstrap: BootstrapConfig,
    ) -> Self {
        RotationController {
            prober: HealthProber::new(config.probe_timeout),
            pinger: KeepalivePinger::new(&bootstrap.keepalive_token),
            store,
            provider,
            config,
            bootstrap,
            tick_lock: Semaphore::new(1),
        }
    }

    /// Runs one watchdog tick. On a fatal error the failure is recorded on
    /// the persisted state best-effort and the error surfaces to the
    /// trigger.
    pub async fn tick(&self, force_provision: bool) -> Result<()> {
        let _permit = self.tick_lock.acquire().await?;

        let start = Instant::now();
        let result = self.run_tick(force_provision).await;

        let status = if result.is_ok() { "success" } else { "failure" };
        metrics::histogram!(TICK_DURATION.name, "status" => status)
            .record(start.elapsed().as_secs_f64());

        result
    }

    async fn run_tick(&self, force_provision: bool) -> Result<()> {
        let loaded = store::load_state(self.store.as_ref()).await?;
        // Work on a structurally independent copy; `loaded` stays pristine
        // for the failure record.
        let mut state = loaded.clone();

        match self.advance(&mut state, force_provision).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.record_failure(loaded, &e).await;
                Err(e)
            }
        }
    }

    async fn advance(&self, state: &mut SandboxState, force_provision: bool) -> Result<()> {
        let now = Utc::now();

        // Rotation is never due while lastRotationAt is unset; the first
        // provision arises from the missing active instead.
        let rotation_due = state
            .last_rotation_at
            .map(|at| elapsed_since(now, at) >= self.config.rotation_interval)
            .unwrap_or(false);

        let health = if force_provision {
            HealthCheck::unhealthy(REASON_FORCE)
        } else {
            match &state.active {
                None => HealthCheck::unhealthy(REASON_NO_ACTIVE),
                Some(active) => self.prober.probe(&active.url, "active").await,
            }
        };

        if health.is_healthy()
            && let Some(active) = &state.active
        {
            self.pinger.ping(&active.url).await;
        }

        let should_provision = force_provision || !health.is_healthy() || rotation_due;

        if should_provision {
            let reason = if force_provision {
                REASON_FORCE
            } else if let HealthCheck::Unhealthy { reason } = &health {
                reason.as_str()
            } else {
                REASON_ROTATION_DUE
            };
            tracing::info!(reason, rotation_due, "provisioning replacement sandbox");

            let new = self.provision_with_retry(reason).await?;
            let created_at = Utc::now();
            self.wait_for_readiness(&new).await?;
            self.promote(state, new, created_at).await?;
        }

        self.drain(state).await;

        state.last_check_at = Some(Utc::now());
        state.last_failure = None;
        self.store.apply(vec![store::state_upsert(state)?]).await?;

        Ok(())
    }

    /// Publishes the new backend atomically, then updates the in-memory
    /// state. The pointer batch must precede the state write so a reader
    /// never observes a completed rotation pointing at an unpromoted URL.
    async fn promote(
        &self,
        state: &mut SandboxState,
        new: SandboxHandle,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut ops = vec![
            StoreOp::upsert(keys::ACTIVE_URL, new.url.clone()),
            StoreOp::upsert(keys::LAST_KNOWN_GOOD_URL, new.url.clone()),
        ];
        if let Some(previous) = &state.active {
            ops.push(StoreOp::upsert(keys::PREVIOUS_URL, previous.url.clone()));
        }
        self.store.apply(ops).await?;

        let promoted_at = Utc::now();
        let previous = state.active.take();
        tracing::info!(
            id = %new.id,
            url = %new.url,
            previous = previous.as_ref().map(|p| p.id.as_str()).unwrap_or("none"),
            "promoted sandbox"
        );

        state.active = Some(SandboxRecord {
            id: new.id,
            url: new.url,
            created_at,
            status: SandboxStatus::Healthy,
        });
        state.last_rotation_at = Some(promoted_at);
        if let Some(previous) = previous {
            state.draining.push(DrainingSandboxRecord {
                record: previous,
                drain_started_at: promoted_at,
            });
        }

        Ok(())
    }

    async fn provision_with_retry(&self, reason: &str) -> Result<SandboxHandle> {
        let spec = SandboxSpec {
            port: self.config.sandbox_port,
            runtime: self.config.sandbox_runtime.clone(),
            max_lifetime: self.config.rotation_interval,
        };

        let attempts = self.config.provision_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match provider::provision(self.provider.as_ref(), &spec, &self.bootstrap).await {
                Ok(handle) => {
                    metrics::counter!(PROVISION_ATTEMPTS.name, "outcome" => "success").increment(1);
                    return Ok(handle);
                }
                Err(e) => {
                    metrics::counter!(PROVISION_ATTEMPTS.name, "outcome" => "failure").increment(1);
                    let remaining = attempts - attempt;
                    if remaining == 0 {
                        tracing::error!(reason, attempt, error = %e, "sandbox provision exhausted retries");
                        return Err(e.into());
                    }

                    let backoff = self.config.provision_backoff_base * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        reason,
                        attempt,
                        remaining,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "sandbox provision attempt failed"
                    );
                    sleep(backoff).await;
                }
            }
        }
    }

    /// Polls the new instance's health endpoint until it answers or the
    /// readiness deadline elapses. Timeout is fatal for the tick; the
    /// previous active stays in place.
    async fn wait_for_readiness(&self, handle: &SandboxHandle) -> Result<()> {
        let deadline = Instant::now() + self.config.readiness_deadline;

        loop {
            match self.prober.probe(&handle.url, "readiness").await {
                HealthCheck::Healthy { .. } => {
                    tracing::info!(id = %handle.id, "sandbox passed readiness");
                    return Ok(());
                }
                HealthCheck::Unhealthy { reason } => {
                    tracing::debug!(id = %handle.id, reason = %reason, "sandbox not ready yet");
                }
            }

            if Instant::now() >= deadline {
                return Err(WatchdogError::HealthTimeout {
                    id: handle.id.clone(),
                });
            }
            sleep(self.config.readiness_poll).await;
        }
    }

    /// Stops instances whose drain grace elapsed. Never fatal: stop errors
    /// keep the record for a later tick, bounded by the retention cap; a
    /// provider 404 means the instance is already gone.
    async fn drain(&self, state: &mut SandboxState) {
        let now = Utc::now();
        let mut survivors = Vec::with_capacity(state.draining.len());

        for draining in state.draining.drain(..) {
            let age = elapsed_since(now, draining.drain_started_at);
            if age < self.config.drain_grace {
                survivors.push(draining);
                continue;
            }

            let id = draining.record.id.as_str();
            match self.stop_sandbox(id).await {
                Ok(()) => {
                    metrics::counter!(DRAIN_OUTCOMES.name, "outcome" => "stopped").increment(1);
                    tracing::info!(id, "stopped drained sandbox");
                }
                Err(e) if e.is_not_found() => {
                    metrics::counter!(DRAIN_OUTCOMES.name, "outcome" => "not_found").increment(1);
                    tracing::warn!(id, "drained sandbox already gone");
                }
                Err(e) if age >= self.config.drain_retention_max => {
                    metrics::counter!(DRAIN_OUTCOMES.name, "outcome" => "abandoned").increment(1);
                    tracing::error!(id, error = %e, "giving up on draining sandbox past retention cap");
                }
                Err(e) => {
                    metrics::counter!(DRAIN_OUTCOMES.name, "outcome" => "error").increment(1);
                    tracing::error!(id, error = %e, "failed to stop drained sandbox, will retry");
                    survivors.push(draining);
                }
            }
        }

        state.draining = survivors;
    }

    async fn stop_sandbox(&self, id: &str) -> Result<(), provider::ProviderError> {
        let handle = self.provider.get(id).await?;
        self.provider.stop(&handle).await
    }

    async fn record_failure(&self, mut state: SandboxState, error: &WatchdogError) {
        state.last_failure = Some(TickFailure {
            reason: error.to_string(),
            at: Utc::now(),
        });

        let write = match store::state_upsert(&state) {
            Ok(op) => self.store.apply(vec![op]).await,
            Err(e) => Err(e),
        };
        if let Err(e) = write {
            tracing::warn!(error = %e, "failed to record tick failure");
        }
    }
}

/// Wall-clock elapsed between two store timestamps; clock skew into the
/// future counts as zero.
fn elapsed_since(now: DateTime<Utc>, earlier: DateTime<Utc>) -> Duration {
    now.signed_duration_since(earlier)
        .to_std()
        .unwrap_or_default()
}
