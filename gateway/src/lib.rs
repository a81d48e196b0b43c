pub mod admin;
pub mod api;
pub mod bypass;
pub mod config;
pub mod forward;
pub mod metrics_defs;
pub mod resolve;
pub mod service;

pub use config::{GatewayConfig, SelfHost};
pub use service::GatewayService;

/// Name this hop advertises in Via headers.
pub const HOP_NAME: &str = "verge";

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Binds the listener and serves the gateway until the process exits.
pub async fn serve(host: &str, port: u16, service: GatewayService) -> Result<(), GatewayError> {
    tracing::info!(host, port, "starting edge gateway");
    shared::http::serve_http(host, port, service).await
}
