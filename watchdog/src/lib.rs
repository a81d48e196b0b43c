pub mod config;
pub mod controller;
pub mod keepalive;
pub mod metrics_defs;
pub mod probe;

pub use config::WatchdogConfig;
pub use controller::RotationController;

use provider::ProviderError;
use store::StoreError;

pub type Result<T, E = WatchdogError> = std::result::Result<T, E>;

/// Fatal tick errors. Per-probe failures and keepalive failures are not in
/// here; they only steer the tick.
#[derive(thiserror::Error, Debug)]
pub enum WatchdogError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("sandbox {id} failed to become healthy in time")]
    HealthTimeout { id: String },

    #[error("tick serialization failed: {0}")]
    TickLock(#[from] tokio::sync::AcquireError),
}
