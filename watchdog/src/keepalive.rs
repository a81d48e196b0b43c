use reqwest::header::USER_AGENT;
use std::time::Duration;

pub const KEEPALIVE_USER_AGENT: &str = "sandbox-keepalive/1.0";

const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Best-effort `GET {base}/internal/keepalive`. Failures are logged and
/// never affect control flow; a sandbox is never marked unhealthy here.
pub struct KeepalivePinger {
    client: reqwest::Client,
    token: String,
}

impl KeepalivePinger {
    pub fn new(token: &str) -> Self {
        KeepalivePinger {
            client: reqwest::Client::new(),
            token: token.to_string(),
        }
    }

    pub async fn ping(&self, base_url: &str) {
        let url = format!("{}/internal/keepalive", base_url.trim_end_matches('/'));

        match self
            .client
            .get(&url)
            .header("x-keepalive-token", &self.token)
            .header(USER_AGENT, KEEPALIVE_USER_AGENT)
            .timeout(PING_TIMEOUT)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(url = %url, "keepalive acknowledged");
            }
            Ok(response) => {
                tracing::warn!(url = %url, status = response.status().as_u16(), "keepalive rejected");
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "keepalive ping failed");
            }
        }
    }
}
