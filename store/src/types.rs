use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical description of one provisioned sandbox instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxRecord {
    /// Opaque id assigned by the provider; stable for the sandbox's life.
    pub id: String,
    /// Absolute base URL (scheme + host), externally reachable.
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub status: SandboxStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    Provisioning,
    Healthy,
    Unhealthy,
}

/// A superseded instance retained for its drain grace period.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainingSandboxRecord {
    #[serde(flatten)]
    pub record: SandboxRecord,
    pub drain_started_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickFailure {
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// The single persisted state document. `draining` is insertion-ordered,
/// oldest first. Cloning yields a structurally independent copy; nothing in
/// here is shared.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxState {
    pub active: Option<SandboxRecord>,
    pub draining: Vec<DrainingSandboxRecord>,
    /// Set on each successful promotion.
    pub last_rotation_at: Option<DateTime<Utc>>,
    /// Set on each tick that completes successfully.
    pub last_check_at: Option<DateTime<Utc>>,
    /// Cleared on any successful tick.
    pub last_failure: Option<TickFailure>,
}
