pub mod bootstrap;
pub mod vercel;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

pub use bootstrap::{BootstrapConfig, provision};
pub use vercel::VercelProvider;

pub type Result<T, E = ProviderError> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Http(String),

    #[error("provider rejected {operation} with status {status}: {body}")]
    Api {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// Provider 404, distinguished so decommission can treat it as
    /// "already gone".
    #[error("sandbox {id} not found")]
    NotFound { id: String },

    #[error("step {step} exited with code {code}")]
    CommandFailed { step: String, code: i32 },

    #[error("malformed provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound { .. })
    }
}

/// A provisioned instance: stable id plus its externally reachable base URL.
#[derive(Clone, Debug, PartialEq)]
pub struct SandboxHandle {
    pub id: String,
    pub url: String,
}

/// Creation parameters for a new sandbox.
#[derive(Clone, Debug)]
pub struct SandboxSpec {
    /// Port the application inside the sandbox will listen on.
    pub port: u16,
    /// Runtime identifier, e.g. `node22`.
    pub runtime: String,
    /// Max lifetime hint; set to the rotation interval so abandoned
    /// instances expire on their own.
    pub max_lifetime: Duration,
}

/// A shell command to run inside a sandbox.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct Command {
    pub cmd: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    pub sudo: bool,
    pub detached: bool,
}

impl Command {
    pub fn new(cmd: &str, args: &[&str]) -> Self {
        Command {
            cmd: cmd.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn cwd(mut self, cwd: &str) -> Self {
        self.cwd = Some(cwd.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn sudo(mut self) -> Self {
        self.sudo = true;
        self
    }

    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command ran to completion with exit code zero. Non-zero exits
    /// surface as [`ProviderError::CommandFailed`] instead.
    Exited(i32),
    /// Detached command accepted by the sandbox; it outlives this call.
    Running,
}

/// Create, inspect and stop sandbox instances, and run commands inside them.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxHandle>;

    async fn get(&self, id: &str) -> Result<SandboxHandle>;

    /// Terminate the instance. Semantically idempotent; a provider 404 is
    /// reported as [`ProviderError::NotFound`].
    async fn stop(&self, handle: &SandboxHandle) -> Result<()>;

    /// Execute a command inside the sandbox, streaming stdout/stderr
    /// line-by-line to the logger tagged with `step`.
    async fn run_command(
        &self,
        handle: &SandboxHandle,
        step: &str,
        command: Command,
    ) -> Result<CommandOutcome>;
}
