/// Per-request routing knobs for the gateway, captured once at startup.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Parsed host of `SANDBOX_SELF_URL`, used for self-loop protection.
    pub self_host: SelfHost,
    /// Raw `SANDBOX_SELF_URL` value, reported by the health route.
    pub self_url: Option<String>,
    /// `DISABLE_EDGE_REWRITE == "true"`: bypass every request.
    pub disable_rewrite: bool,
    /// `DEBUG_SANDBOX_ROUTING == "true"`: attach probe headers to rewrites.
    pub debug_routing: bool,
    /// `NEXT_APP_SKIP_MONITORING_ROUTES` truthy: health and watchdog routes
    /// are switched off.
    pub monitoring_routes_disabled: bool,
    /// Shared secret the keepalive route requires.
    pub keepalive_token: Option<String>,
}

/// The gateway's own host identity. A request whose Host matches must never
/// be rewritten, or the gateway would forward traffic to itself.
#[derive(Clone, Debug, PartialEq)]
pub enum SelfHost {
    /// No self URL configured; the rule never matches.
    None,
    Host(String),
    /// Malformed self URL: fail closed and treat any request as self.
    MatchAll,
}

impl SelfHost {
    pub fn parse(value: Option<&str>) -> Self {
        let Some(raw) = value else {
            return SelfHost::None;
        };

        match url::Url::parse(raw) {
            Ok(parsed) => match parsed.host_str() {
                Some(host) => SelfHost::Host(host.to_ascii_lowercase()),
                None => SelfHost::MatchAll,
            },
            Err(e) => {
                tracing::warn!(raw, error = %e, "malformed self URL, bypassing all requests");
                SelfHost::MatchAll
            }
        }
    }

    pub fn matches(&self, request_host: Option<&str>) -> bool {
        match self {
            SelfHost::None => false,
            SelfHost::MatchAll => true,
            SelfHost::Host(own) => request_host
                .map(|h| {
                    let without_port = h.split(':').next().unwrap_or(h);
                    without_port.eq_ignore_ascii_case(own)
                })
                .unwrap_or(false),
        }
    }
}
