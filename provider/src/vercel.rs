use crate::{
    Command, CommandOutcome, ProviderError, Result, SandboxHandle, SandboxProvider, SandboxSpec,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeout for control operations. Command execution streams for as long as
/// the command runs and is not bounded here.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct Credentials {
    pub token: String,
    pub team_id: String,
    pub project_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
    port: u16,
    runtime: &'a str,
    timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    team_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct SandboxResource {
    id: String,
    url: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CommandEvent {
    Log {
        stream: LogStream,
        line: String,
    },
    Exit {
        #[serde(rename = "exitCode")]
        exit_code: i32,
    },
}

#[derive(Deserialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum LogStream {
    Stdout,
    Stderr,
}

/// Sandbox provider backed by the Vercel sandboxes REST API.
pub struct VercelProvider {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<Credentials>,
}

impl VercelProvider {
    pub fn new(api_url: &str, credentials: Option<Credentials>) -> Self {
        VercelProvider {
            client: reqwest::Client::new(),
            base_url: api_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some(c) => builder.bearer_auth(&c.token),
            None => builder,
        }
    }

    async fn into_api_error(
        operation: &'static str,
        id: Option<&str>,
        response: reqwest::Response,
    ) -> ProviderError {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND
            && let Some(id) = id
        {
            return ProviderError::NotFound { id: id.to_string() };
        }

        let body = response.text().await.unwrap_or_default();
        ProviderError::Api {
            operation,
            status: status.as_u16(),
            body,
        }
    }
}

#[async_trait]
impl SandboxProvider for VercelProvider {
    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxHandle> {
        let body = CreateBody {
            port: spec.port,
            runtime: &spec.runtime,
            timeout_ms: spec.max_lifetime.as_millis() as u64,
            team_id: self.credentials.as_ref().map(|c| c.team_id.as_str()),
            project_id: self.credentials.as_ref().map(|c| c.project_id.as_str()),
        };

        let response = self
            .authed(self.client.post(format!("{}/v1/sandboxes", self.base_url)))
            .timeout(CONTROL_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::into_api_error("create", None, response).await);
        }

        let resource = response
            .json::<SandboxResource>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        tracing::info!(id = %resource.id, url = %resource.url, "created sandbox");
        Ok(SandboxHandle {
            id: resource.id,
            url: resource.url,
        })
    }

    async fn get(&self, id: &str) -> Result<SandboxHandle> {
        let response = self
            .authed(
                self.client
                    .get(format!("{}/v1/sandboxes/{}", self.base_url, id)),
            )
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::into_api_error("get", Some(id), response).await);
        }

        let resource = response
            .json::<SandboxResource>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        Ok(SandboxHandle {
            id: resource.id,
            url: resource.url,
        })
    }

    async fn stop(&self, handle: &SandboxHandle) -> Result<()> {
        let response = self
            .authed(
                self.client
                    .post(format!("{}/v1/sandboxes/{}/stop", self.base_url, handle.id)),
            )
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::into_api_error("stop", Some(&handle.id), response).await);
        }

        tracing::info!(id = %handle.id, "stopped sandbox");
        Ok(())
    }

    async fn run_command(
        &self,
        handle: &SandboxHandle,
        step: &str,
        command: Command,
    ) -> Result<CommandOutcome> {
        let detached = command.detached;
        let response = self
            .authed(self.client.post(format!(
                "{}/v1/sandboxes/{}/commands",
                self.base_url, handle.id
            )))
            .json(&command)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::into_api_error("run_command", Some(&handle.id), response).await);
        }

        if detached {
            tracing::info!(id = %handle.id, step, "detached command accepted");
            return Ok(CommandOutcome::Running);
        }

        // The command endpoint streams NDJSON: log events line-by-line, then
        // a terminal exit event.
        let mut stream = response.bytes_stream();
        let mut buffer = Vec::new();
        let mut exit_code: Option<i32> = None;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ProviderError::Http(e.to_string()))?;
            buffer.extend_from_slice(&chunk);

            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                if let Some(code) = handle_event_line(step, &line)? {
                    exit_code = Some(code);
                }
            }
        }
        if !buffer.is_empty()
            && let Some(code) = handle_event_line(step, &buffer)?
        {
            exit_code = Some(code);
        }

        match exit_code {
            Some(0) => Ok(CommandOutcome::Exited(0)),
            Some(code) => Err(ProviderError::CommandFailed {
                step: step.to_string(),
                code,
            }),
            None => Err(ProviderError::Decode(format!(
                "command stream for step {step} ended without an exit event"
            ))),
        }
    }
}

fn handle_event_line(step: &str, line: &[u8]) -> Result<Option<i32>> {
    let trimmed = line.strip_suffix(b"\n").unwrap_or(line);
    if trimmed.is_empty() {
        return Ok(None);
    }

    let event: CommandEvent = serde_json::from_slice(trimmed)
        .map_err(|e| ProviderError::Decode(format!("bad command event: {e}")))?;

    match event {
        CommandEvent::Log {
            stream: LogStream::Stdout,
            line,
        } => {
            tracing::info!(step, "{line}");
            Ok(None)
        }
        CommandEvent::Log {
            stream: LogStream::Stderr,
            line,
        } => {
            tracing::warn!(step, "{line}");
            Ok(None)
        }
        CommandEvent::Exit { exit_code } => Ok(Some(exit_code)),
    }
}
