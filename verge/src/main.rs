use clap::{Args, Parser};

mod config;
use config::{Config, ConfigError, MetricsSettings};

use gateway::GatewayService;
use metrics_exporter_statsd::StatsdBuilder;
use provider::VercelProvider;
use shared::metrics_defs::MetricDef;
use std::future::Future;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use store::{EdgeConfigStore, StateStore};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use watchdog::RotationController;

/// Cadence of the scheduled watchdog tick.
const TICK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// METRICS.md sections, paired with the definitions that feed them.
const METRIC_SECTIONS: [(&str, &[MetricDef]); 2] = [
    ("WATCHDOG_METRICS", watchdog::metrics_defs::ALL_METRICS),
    ("GATEWAY_METRICS", gateway::metrics_defs::ALL_METRICS),
];

#[derive(Parser)]
enum CliCommand {
    /// Run the edge gateway with the embedded watchdog schedule
    Serve(ServeArgs),
    /// Run a single watchdog tick and exit
    Tick(TickArgs),
    /// Print the metric definition tables as markdown
    ShowMetrics,
    /// Rewrite the marked sections of METRICS.md from the definitions in code
    SyncMetrics,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    #[arg(long, default_value_t = 3000)]
    port: u16,
}

#[derive(Args, Debug)]
struct TickArgs {
    /// Provision a replacement even if the active sandbox is healthy
    #[arg(long)]
    force: bool,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to create runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
enum ServeError {
    #[error(transparent)]
    Gateway(#[from] gateway::GatewayError),
    #[error(transparent)]
    Watchdog(#[from] watchdog::WatchdogError),
    #[error("monitoring is disabled or the store is not configured, nothing to tick")]
    TickUnavailable,
}

fn main() {
    init_tracing();

    match cli() {
        Ok(()) => {}
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            process::exit(1);
        }
    }
}

fn cli() -> Result<(), CliError> {
    match &CliCommand::parse() {
        CliCommand::Serve(args) => {
            let config = Config::from_env()?;
            let _sentry_guard = init_sentry(config.sentry_dsn.clone());
            install_statsd("verge", config.metrics.as_ref());

            block_on_service(run_serve(config, args.host.clone(), args.port))?;
            Ok(())
        }
        CliCommand::Tick(args) => {
            let config = Config::from_env()?;
            let _sentry_guard = init_sentry(config.sentry_dsn.clone());
            install_statsd("verge", config.metrics.as_ref());

            block_on_service(run_tick(config, args.force))?;
            Ok(())
        }
        CliCommand::ShowMetrics => {
            for (_, defs) in METRIC_SECTIONS {
                println!("{}\n", render_metrics_table(defs));
            }
            Ok(())
        }
        CliCommand::SyncMetrics => {
            let path = "METRICS.md";
            let source = std::fs::read_to_string(path).expect("Failed to read METRICS.md");

            let synced = METRIC_SECTIONS.into_iter().fold(source, |content, (section, defs)| {
                replace_marked_section(&content, section, &render_metrics_table(defs))
            });

            std::fs::write(path, synced).expect("Failed to write METRICS.md");
            println!("METRICS.md updated");
            Ok(())
        }
    }
}

async fn run_serve(config: Config, host: String, port: u16) -> Result<(), ServeError> {
    let store = build_store(&config);
    let controller = build_controller(&config, store.clone());

    if let Some(controller) = controller.clone() {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = controller.tick(false).await {
                    tracing::error!(error = %e, "scheduled watchdog tick failed");
                }
            }
        });
    }

    let service = GatewayService::new(config.gateway.clone(), store, controller);

    if let Some(admin) = config.admin.clone() {
        let ready = service.ready_flag();
        tokio::spawn(async move {
            if let Err(e) = gateway::admin::serve_admin(&admin.host, admin.port, ready).await {
                tracing::error!(error = %e, "admin listener failed");
            }
        });
    }

    gateway::serve(&host, port, service).await?;
    Ok(())
}

async fn run_tick(config: Config, force: bool) -> Result<(), ServeError> {
    let store = build_store(&config);
    let controller = build_controller(&config, store).ok_or(ServeError::TickUnavailable)?;

    controller.tick(force).await?;
    tracing::info!(force, "watchdog tick complete");
    Ok(())
}

fn build_store(config: &Config) -> Option<Arc<dyn StateStore>> {
    config.store.as_ref().map(|settings| {
        Arc::new(EdgeConfigStore::new(
            &settings.api_url,
            &settings.config_id,
            &settings.token,
        )) as Arc<dyn StateStore>
    })
}

fn build_controller(
    config: &Config,
    store: Option<Arc<dyn StateStore>>,
) -> Option<Arc<RotationController>> {
    if config.gateway.monitoring_routes_disabled {
        return None;
    }
    let store = store?;
    let settings = config.watchdog.as_ref()?;

    let provider = Arc::new(VercelProvider::new(
        &settings.provider_api_url,
        settings.credentials.clone(),
    ));

    Some(Arc::new(RotationController::new(
        store,
        provider,
        settings.config.clone(),
        settings.bootstrap.clone(),
    )))
}

/// Replaces the text between a section's START and END markers, keeping the
/// markers themselves.
fn replace_marked_section(content: &str, name: &str, table: &str) -> String {
    let start_marker = format!("<!-- {name}:START -->");
    let end_marker = format!("<!-- {name}:END -->");

    let (head, rest) = content
        .split_once(&start_marker)
        .unwrap_or_else(|| panic!("Missing {start_marker} marker"));
    let (_, tail) = rest
        .split_once(&end_marker)
        .unwrap_or_else(|| panic!("Missing {end_marker} marker"));

    format!("{head}{start_marker}\n{table}\n{end_marker}{tail}")
}

fn render_metrics_table(metrics: &[MetricDef]) -> String {
    let mut table = String::from("| Metric | Type | Description |\n|--------|------|-------------|");
    for def in metrics {
        table.push_str(&format!(
            "\n| `{}` | {} | {} |",
            def.name,
            def.kind.label(),
            def.help
        ));
    }
    table
}

/// Installs the statsd recorder when configured. A recorder problem is not
/// worth refusing to start the edge over, so failures only warn.
fn install_statsd(prefix: &str, settings: Option<&MetricsSettings>) {
    let Some(settings) = settings else {
        return;
    };

    match StatsdBuilder::from(settings.statsd_host.clone(), settings.statsd_port)
        .build(Some(prefix))
    {
        Ok(recorder) => {
            if let Err(e) = metrics::set_global_recorder(recorder) {
                tracing::warn!(error = %e, "metrics recorder already installed");
            }
        }
        Err(e) => tracing::warn!(error = %e, "could not create statsd recorder"),
    }
}

fn block_on_service(
    fut: impl Future<Output = Result<(), impl std::error::Error>>,
) -> Result<(), CliError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match runtime.block_on(fut) {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::error!(error = %e, "Runtime error");
            process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry::integrations::tracing::layer())
        .init();
}

fn init_sentry(dsn: Option<String>) -> Option<sentry::ClientInitGuard> {
    // The Sentry tracing layer is installed in init_tracing; it starts
    // shipping events once this client exists.
    let dsn = dsn?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
