use serde_json::Value;
use store::{StateStore, keys};
use url::Url;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendLabel {
    /// The designated active backend.
    Active,
    /// Last-known-good fallback; the active pointer was unset.
    Fallback,
}

impl BackendLabel {
    pub const fn routing_header(&self) -> &'static str {
        match self {
            BackendLabel::Active => "edge-rewrite",
            BackendLabel::Fallback => "edge-rewrite-stale",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Backend {
    pub url: Url,
    pub label: BackendLabel,
}

/// Picks the backend for a rewrite: the active pointer first, then the
/// last-known-good pointer, each with its legacy-key fallback. Store errors
/// and unusable values collapse to `None`, which the caller answers with 503.
pub async fn resolve_backend(store: &dyn StateStore) -> Option<Backend> {
    let candidates: [(&[&str], BackendLabel); 2] = [
        (
            &[keys::ACTIVE_URL, keys::LEGACY_ACTIVE_URL],
            BackendLabel::Active,
        ),
        (
            &[keys::LAST_KNOWN_GOOD_URL, keys::LEGACY_LAST_KNOWN_GOOD_URL],
            BackendLabel::Fallback,
        ),
    ];

    for (lookup, label) in candidates {
        let value = match store.read_first(lookup).await {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(error = %e, "backend lookup failed");
                return None;
            }
        };

        let Some(value) = value else {
            continue;
        };

        let Value::String(raw) = value else {
            tracing::warn!(keys = ?lookup, "backend pointer is not a string");
            continue;
        };

        match Url::parse(&raw) {
            Ok(url) => return Some(Backend { url, label }),
            Err(e) => {
                tracing::warn!(raw = %raw, error = %e, "backend pointer is not a valid URL");
                continue;
            }
        }
    }

    None
}
