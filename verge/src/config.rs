use gateway::{GatewayConfig, SelfHost};
use provider::BootstrapConfig;
use provider::vercel::Credentials;
use shared::flags::flag_enabled;
use watchdog::WatchdogConfig;

const DEFAULT_API_URL: &str = "https://api.vercel.com";
const DEFAULT_APP_REF: &str = "main";
const DEFAULT_WORKDIR: &str = "/tmp/next-sandbox-app";
const DEFAULT_SANDBOX_PORT: u16 = 3000;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Everything the process reads from the environment, captured and validated
/// once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub store: Option<StoreSettings>,
    pub watchdog: Option<WatchdogSettings>,
    pub gateway: GatewayConfig,
    pub admin: Option<Listener>,
    pub sentry_dsn: Option<String>,
    pub metrics: Option<MetricsSettings>,
}

#[derive(Clone, Debug)]
pub struct StoreSettings {
    pub api_url: String,
    pub config_id: String,
    pub token: String,
}

#[derive(Clone, Debug)]
pub struct WatchdogSettings {
    pub provider_api_url: String,
    pub credentials: Option<Credentials>,
    pub config: WatchdogConfig,
    pub bootstrap: BootstrapConfig,
}

#[derive(Clone, Debug)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct MetricsSettings {
    pub statsd_host: String,
    pub statsd_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source. The monitoring
    /// feature flag relaxes the otherwise-required variables; the gateway
    /// then runs with whatever subset is present.
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());

        let monitoring_routes_disabled =
            flag_enabled(lookup("NEXT_APP_SKIP_MONITORING_ROUTES").as_deref());

        let require = |name: &'static str| -> Result<Option<String>, ConfigError> {
            match get(name) {
                Some(value) => Ok(Some(value)),
                None if monitoring_routes_disabled => Ok(None),
                None => Err(ConfigError::Missing(name)),
            }
        };

        let config_id = require("EDGE_CONFIG_ID")?;
        let store_token = require("EDGE_CONFIG_TOKEN")?;
        let app_repo = require("SANDBOX_APP_REPO")?;
        let keepalive_token = require("KEEPALIVE_TOKEN")?;

        let store = match (config_id, store_token) {
            (Some(config_id), Some(token)) => Some(StoreSettings {
                api_url: get("EDGE_CONFIG_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
                config_id,
                token,
            }),
            _ => None,
        };

        let sandbox_port = match get("SANDBOX_PORT") {
            None => DEFAULT_SANDBOX_PORT,
            Some(raw) => match raw.parse::<u16>() {
                Ok(port) if port > 0 => port,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "SANDBOX_PORT",
                        reason: format!("{raw:?} is not a positive integer port"),
                    });
                }
            },
        };

        let credentials = parse_credentials(&get)?;

        let watchdog = match (&app_repo, &keepalive_token) {
            (Some(repo), Some(keepalive)) => Some(WatchdogSettings {
                provider_api_url: get("SANDBOX_API_URL")
                    .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
                credentials,
                config: WatchdogConfig {
                    sandbox_port,
                    ..Default::default()
                },
                bootstrap: BootstrapConfig {
                    repo: repo.clone(),
                    git_ref: get("SANDBOX_APP_REF").unwrap_or_else(|| DEFAULT_APP_REF.to_string()),
                    workdir: get("SANDBOX_WORKDIR").unwrap_or_else(|| DEFAULT_WORKDIR.to_string()),
                    port: sandbox_port,
                    keepalive_token: keepalive.clone(),
                },
            }),
            _ => None,
        };

        let self_url = get("SANDBOX_SELF_URL");
        let gateway = GatewayConfig {
            self_host: SelfHost::parse(self_url.as_deref()),
            self_url,
            disable_rewrite: get("DISABLE_EDGE_REWRITE").as_deref() == Some("true"),
            debug_routing: get("DEBUG_SANDBOX_ROUTING").as_deref() == Some("true"),
            monitoring_routes_disabled,
            keepalive_token,
        };

        let admin = parse_listener(&get, "ADMIN_HOST", "ADMIN_PORT")?;
        let metrics = match (get("STATSD_HOST"), get("STATSD_PORT")) {
            (Some(statsd_host), Some(raw_port)) => {
                let statsd_port = raw_port.parse::<u16>().map_err(|e| ConfigError::Invalid {
                    name: "STATSD_PORT",
                    reason: e.to_string(),
                })?;
                Some(MetricsSettings {
                    statsd_host,
                    statsd_port,
                })
            }
            _ => None,
        };

        Ok(Config {
            store,
            watchdog,
            gateway,
            admin,
            sentry_dsn: get("SENTRY_DSN"),
            metrics,
        })
    }
}

/// The provider credential triple: token, team id and project id must be
/// present together. Token and team id each have a legacy alias.
fn parse_credentials(
    get: &dyn Fn(&'static str) -> Option<String>,
) -> Result<Option<Credentials>, ConfigError> {
    let token = get("VERCEL_TOKEN").or_else(|| get("VERCEL_API_TOKEN"));
    let team_id = get("VERCEL_TEAM_ID").or_else(|| get("VERCEL_ORG_ID"));
    let project_id = get("VERCEL_PROJECT_ID");

    match (token, team_id, project_id) {
        (Some(token), Some(team_id), Some(project_id)) => Ok(Some(Credentials {
            token,
            team_id,
            project_id,
        })),
        (None, None, None) => Ok(None),
        (token, team_id, project_id) => {
            let missing = if token.is_none() {
                "VERCEL_TOKEN"
            } else if team_id.is_none() {
                "VERCEL_TEAM_ID"
            } else {
                let _ = project_id;
                "VERCEL_PROJECT_ID"
            };
            Err(ConfigError::Missing(missing))
        }
    }
}

fn parse_listener(
    get: &dyn Fn(&'static str) -> Option<String>,
    host_name: &'static str,
    port_name: &'static str,
) -> Result<Option<Listener>, ConfigError> {
    match (get(host_name), get(port_name)) {
        (Some(host), Some(raw_port)) => {
            let port = raw_port.parse::<u16>().map_err(|e| ConfigError::Invalid {
                name: port_name,
                reason: e.to_string(),
            })?;
            Ok(Some(Listener { host, port }))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    fn full_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("EDGE_CONFIG_ID", "ecfg_123"),
            ("EDGE_CONFIG_TOKEN", "store-token"),
            ("SANDBOX_APP_REPO", "https://github.com/acme/next-app.git"),
            ("KEEPALIVE_TOKEN", "ka-secret"),
        ]
    }

    #[test]
    fn test_minimal_config_with_defaults() {
        let vars = full_env();
        let config = Config::from_lookup(&lookup(&vars)).unwrap();

        let store = config.store.unwrap();
        assert_eq!(store.api_url, "https://api.vercel.com");
        assert_eq!(store.config_id, "ecfg_123");

        let watchdog = config.watchdog.unwrap();
        assert_eq!(watchdog.bootstrap.git_ref, "main");
        assert_eq!(watchdog.bootstrap.workdir, "/tmp/next-sandbox-app");
        assert_eq!(watchdog.bootstrap.port, 3000);
        assert_eq!(watchdog.config.sandbox_port, 3000);
        assert!(watchdog.credentials.is_none());

        assert!(!config.gateway.monitoring_routes_disabled);
        assert!(!config.gateway.disable_rewrite);
        assert_eq!(config.gateway.self_host, SelfHost::None);
    }

    #[test]
    fn test_missing_required_names_the_variable() {
        let mut vars = full_env();
        vars.retain(|(name, _)| *name != "KEEPALIVE_TOKEN");

        let err = Config::from_lookup(&lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("KEEPALIVE_TOKEN")));
    }

    #[test]
    fn test_monitoring_disabled_relaxes_requirements() {
        let vars = vec![("NEXT_APP_SKIP_MONITORING_ROUTES", "true")];
        let config = Config::from_lookup(&lookup(&vars)).unwrap();

        assert!(config.store.is_none());
        assert!(config.watchdog.is_none());
        assert!(config.gateway.monitoring_routes_disabled);
    }

    #[test]
    fn test_invalid_sandbox_port() {
        let mut vars = full_env();
        vars.push(("SANDBOX_PORT", "eighty"));

        let err = Config::from_lookup(&lookup(&vars)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "SANDBOX_PORT",
                ..
            }
        ));
    }

    #[test]
    fn test_credential_triple_must_be_complete() {
        let mut vars = full_env();
        vars.push(("VERCEL_TOKEN", "tok"));
        vars.push(("VERCEL_TEAM_ID", "team"));

        let err = Config::from_lookup(&lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("VERCEL_PROJECT_ID")));

        vars.push(("VERCEL_PROJECT_ID", "prj"));
        let config = Config::from_lookup(&lookup(&vars)).unwrap();
        let credentials = config.watchdog.unwrap().credentials.unwrap();
        assert_eq!(credentials.token, "tok");
    }

    #[test]
    fn test_credential_aliases() {
        let mut vars = full_env();
        vars.push(("VERCEL_API_TOKEN", "tok"));
        vars.push(("VERCEL_ORG_ID", "org"));
        vars.push(("VERCEL_PROJECT_ID", "prj"));

        let config = Config::from_lookup(&lookup(&vars)).unwrap();
        let credentials = config.watchdog.unwrap().credentials.unwrap();
        assert_eq!(credentials.team_id, "org");
    }

    #[test]
    fn test_self_url_and_kill_switches() {
        let mut vars = full_env();
        vars.push(("SANDBOX_SELF_URL", "https://preview.example.com"));
        vars.push(("DISABLE_EDGE_REWRITE", "true"));
        vars.push(("DEBUG_SANDBOX_ROUTING", "TRUE"));

        let config = Config::from_lookup(&lookup(&vars)).unwrap();
        assert_eq!(
            config.gateway.self_host,
            SelfHost::Host("preview.example.com".into())
        );
        assert!(config.gateway.disable_rewrite);
        // the debug switch is an exact match, unlike the feature flag
        assert!(!config.gateway.debug_routing);
    }
}
