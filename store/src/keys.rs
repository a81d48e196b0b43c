//! Named keys in the shared config store.
//!
//! The underscore forms are canonical; the dotted forms are read-only legacy
//! fallbacks and must never be written.

/// URL of the current backend, read by the gateway on every rewrite.
pub const ACTIVE_URL: &str = "sandbox_active_url";

/// URL of the most recent instance that ever passed health. Advanced on
/// promotion, never cleared on failure.
pub const LAST_KNOWN_GOOD_URL: &str = "sandbox_last_known_good_url";

/// URL of the immediately prior backend. Informational.
pub const PREVIOUS_URL: &str = "sandbox_previous_url";

/// The persisted [`crate::types::SandboxState`] document.
pub const STATE: &str = "sandbox_state";

pub const LEGACY_ACTIVE_URL: &str = "sandbox.activeUrl";
pub const LEGACY_LAST_KNOWN_GOOD_URL: &str = "sandbox.lastKnownGoodUrl";
pub const LEGACY_STATE: &str = "sandbox.state";
