use reqwest::header::USER_AGENT;
use serde_json::Value;
use std::time::Duration;

pub const PROBE_USER_AGENT: &str = "sandbox-watchdog/1.0";

/// Outcome of one health probe. Unhealthy carries the reason string that
/// becomes the provision reason when the active instance fails.
#[derive(Clone, Debug, PartialEq)]
pub enum HealthCheck {
    Healthy { payload: Value },
    Unhealthy { reason: String },
}

impl HealthCheck {
    pub fn unhealthy(reason: &str) -> Self {
        HealthCheck::Unhealthy {
            reason: reason.to_string(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthCheck::Healthy { .. })
    }
}

/// Issues `GET {base}/api/health` with a hard timeout and classifies the
/// result. The bypass header keeps the target's own edge middleware from
/// rewriting the probe back at us.
pub struct HealthProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HealthProber {
    pub fn new(timeout: Duration) -> Self {
        HealthProber {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    pub async fn probe(&self, base_url: &str, role: &str) -> HealthCheck {
        let url = format!("{}/api/health", base_url.trim_end_matches('/'));

        let response = match self
            .client
            .get(&url)
            .header(USER_AGENT, PROBE_USER_AGENT)
            .header("x-sandbox-bypass", "true")
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                // Timeouts cancel the in-flight request and land here too.
                tracing::warn!(role, url = %url, error = %e, "health probe failed");
                return HealthCheck::Unhealthy {
                    reason: e.to_string(),
                };
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(role, url = %url, status = status.as_u16(), "health probe rejected");
            return HealthCheck::Unhealthy {
                reason: format!("health-status-{}", status.as_u16()),
            };
        }

        // A body that fails to parse is not a health failure.
        let payload = response
            .json::<Value>()
            .await
            .unwrap_or_else(|_| Value::Object(Default::default()));

        HealthCheck::Healthy { payload }
    }
}
