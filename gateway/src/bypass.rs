use crate::config::GatewayConfig;
use hyper::Request;
use hyper::header::HOST;

/// Paths served locally instead of being rewritten to the sandbox. Prefix
/// match, per the routing contract.
pub const BYPASS_PATH_PREFIXES: &[&str] = &[
    "/api",
    "/watchdog",
    "/favicon.ico",
    "/robots.txt",
    "/sitemap",
    "/bootstrap.js",
    "/bootstrap.js.map",
];

/// Any one rule short-circuits the request to pass-through.
pub fn should_bypass<B>(req: &Request<B>, config: &GatewayConfig) -> bool {
    let host = req.headers().get(HOST).and_then(|h| h.to_str().ok());
    if config.self_host.matches(host) {
        return true;
    }

    if config.disable_rewrite {
        return true;
    }

    let bypass_header = req
        .headers()
        .get("x-sandbox-bypass")
        .and_then(|v| v.to_str().ok());
    if bypass_header == Some("true") {
        return true;
    }

    let path = req.uri().path();
    BYPASS_PATH_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SelfHost;
    use hyper::Request;

    fn config() -> GatewayConfig {
        GatewayConfig {
            self_host: SelfHost::Host("preview.example.com".into()),
            self_url: Some("https://preview.example.com".into()),
            disable_rewrite: false,
            debug_routing: false,
            monitoring_routes_disabled: false,
            keepalive_token: Some("ka".into()),
        }
    }

    fn request(path: &str) -> Request<()> {
        Request::builder().uri(path).body(()).unwrap()
    }

    #[test]
    fn test_path_prefixes_bypass() {
        let cfg = config();
        for path in [
            "/api/health",
            "/watchdog",
            "/watchdog?force=true",
            "/favicon.ico",
            "/robots.txt",
            "/sitemap.xml",
            "/bootstrap.js",
            "/bootstrap.js.map",
        ] {
            assert!(should_bypass(&request(path), &cfg), "expected bypass: {path}");
        }

        assert!(!should_bypass(&request("/dashboard"), &cfg));
        assert!(!should_bypass(&request("/"), &cfg));
    }

    #[test]
    fn test_self_host_bypasses() {
        let cfg = config();
        let req = Request::builder()
            .uri("/dashboard")
            .header(HOST, "preview.example.com:443")
            .body(())
            .unwrap();
        assert!(should_bypass(&req, &cfg));

        let req = Request::builder()
            .uri("/dashboard")
            .header(HOST, "user-facing.example.com")
            .body(())
            .unwrap();
        assert!(!should_bypass(&req, &cfg));
    }

    #[test]
    fn test_malformed_self_url_bypasses_everything() {
        let mut cfg = config();
        cfg.self_host = SelfHost::MatchAll;
        assert!(should_bypass(&request("/dashboard"), &cfg));
    }

    #[test]
    fn test_kill_switch_and_header_bypass() {
        let mut cfg = config();
        cfg.disable_rewrite = true;
        assert!(should_bypass(&request("/dashboard"), &cfg));

        let cfg = config();
        let req = Request::builder()
            .uri("/dashboard")
            .header("x-sandbox-bypass", "true")
            .body(())
            .unwrap();
        assert!(should_bypass(&req, &cfg));

        // only the literal "true" counts
        let req = Request::builder()
            .uri("/dashboard")
            .header("x-sandbox-bypass", "1")
            .body(())
            .unwrap();
        assert!(!should_bypass(&req, &cfg));
    }
}
