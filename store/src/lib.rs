pub mod edge_config;
pub mod keys;
pub mod memory;
pub mod types;

use async_trait::async_trait;
use serde_json::Value;

pub use edge_config::EdgeConfigStore;
pub use memory::MemoryStore;
pub use types::SandboxState;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Errors surfaced by the state store adapter.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store read failed: {0}")]
    Read(String),

    #[error("store write failed: {0}")]
    Write(String),

    #[error("store write rejected with status {status}: {body}")]
    WriteStatus { status: u16, body: String },

    #[error("failed to decode value for key {key}: {reason}")]
    Decode { key: String, reason: String },
}

/// A single mutation in an [`StateStore::apply`] batch.
///
/// Serializes to the wire shape of the config store's PATCH items API:
/// `{"operation": "upsert", "key": ..., "value": ...}`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum StoreOp {
    Upsert { key: String, value: Value },
    Delete { key: String },
}

impl StoreOp {
    pub fn upsert(key: &str, value: impl Into<Value>) -> Self {
        StoreOp::Upsert {
            key: key.to_string(),
            value: value.into(),
        }
    }

    pub fn delete(key: &str) -> Self {
        StoreOp::Delete {
            key: key.to_string(),
        }
    }
}

/// Shared contract between the rotation controller (writer) and the routing
/// gateway (reader). Reads may return stale data; writes become visible to
/// subsequent reads within seconds.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns the current value for `key`. A missing key is `None`, not an
    /// error.
    async fn read(&self, key: &str) -> Result<Option<Value>>;

    /// Atomically applies a batch of mutations. All-or-nothing from the
    /// caller's viewpoint: one request to the backing store. A failed apply
    /// leaves the store unchanged and is retryable.
    async fn apply(&self, ops: Vec<StoreOp>) -> Result<()>;

    /// Tries `keys` in order and returns the first non-null value. Used for
    /// legacy-key read fallbacks.
    async fn read_first(&self, keys: &[&str]) -> Result<Option<Value>> {
        for key in keys {
            if let Some(value) = self.read(key).await? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

/// Loads the persisted state document, falling back to the legacy dotted key
/// and then to an empty document.
pub async fn load_state(store: &dyn StateStore) -> Result<SandboxState> {
    match store
        .read_first(&[keys::STATE, keys::LEGACY_STATE])
        .await?
    {
        Some(value) => serde_json::from_value(value).map_err(|e| StoreError::Decode {
            key: keys::STATE.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(SandboxState::default()),
    }
}

/// Builds the upsert that persists the state document. Writes always target
/// the underscore key, never the legacy dotted form.
pub fn state_upsert(state: &SandboxState) -> Result<StoreOp> {
    let value = serde_json::to_value(state).map_err(|e| StoreError::Write(e.to_string()))?;
    Ok(StoreOp::upsert(keys::STATE, value))
}
