use crate::{Command, Result, SandboxHandle, SandboxProvider, SandboxSpec};

/// Inputs for the in-sandbox application bootstrap.
#[derive(Clone, Debug)]
pub struct BootstrapConfig {
    /// Git URL of the application repository.
    pub repo: String,
    /// Branch or tag to check out.
    pub git_ref: String,
    /// Checkout and build directory inside the sandbox.
    pub workdir: String,
    /// Port the application must listen on.
    pub port: u16,
    /// Shared secret the sandbox's keepalive endpoint will require.
    pub keepalive_token: String,
}

/// Creates a sandbox and bootstraps the application inside it. If any
/// bootstrap step fails, the partial sandbox is stopped best-effort and the
/// original error propagates so the caller's retry loop can start over with
/// a fresh instance.
pub async fn provision(
    provider: &dyn SandboxProvider,
    spec: &SandboxSpec,
    bootstrap_cfg: &BootstrapConfig,
) -> Result<SandboxHandle> {
    let handle = provider.create(spec).await?;

    if let Err(e) = bootstrap(provider, &handle, bootstrap_cfg).await {
        if let Err(stop_err) = provider.stop(&handle).await {
            tracing::warn!(
                id = %handle.id,
                error = %stop_err,
                "failed to stop partial sandbox after bootstrap error"
            );
        }
        return Err(e);
    }

    Ok(handle)
}

/// Clones, builds and starts the application inside a freshly created
/// sandbox. The final start step is detached and outlives this call; the
/// instance counts as ready only once its health endpoint answers.
pub async fn bootstrap(
    provider: &dyn SandboxProvider,
    handle: &SandboxHandle,
    cfg: &BootstrapConfig,
) -> Result<()> {
    let workdir = cfg.workdir.as_str();
    let port = cfg.port.to_string();

    run(provider, handle, "clean", Command::new("rm", &["-rf", workdir])).await?;
    run(
        provider,
        handle,
        "workdir",
        Command::new("mkdir", &["-p", workdir]),
    )
    .await?;
    run(
        provider,
        handle,
        "clone",
        Command::new(
            "git",
            &[
                "clone",
                "--branch",
                &cfg.git_ref,
                "--single-branch",
                "--depth",
                "1",
                &cfg.repo,
                workdir,
            ],
        ),
    )
    .await?;
    run(
        provider,
        handle,
        "corepack",
        Command::new("corepack", &["enable"]).sudo(),
    )
    .await?;
    run(
        provider,
        handle,
        "install",
        Command::new("pnpm", &["install", "--no-frozen-lockfile"]).cwd(workdir),
    )
    .await?;
    // The sandboxed application must not run its own monitoring routes, or a
    // rotation inside the rotation would follow.
    run(
        provider,
        handle,
        "build",
        Command::new("pnpm", &["--filter", "next-app", "build"])
            .cwd(workdir)
            .env("NEXT_APP_SKIP_MONITORING_ROUTES", "true"),
    )
    .await?;
    run(
        provider,
        handle,
        "start",
        Command::new("pnpm", &["--filter", "next-app", "start"])
            .cwd(workdir)
            .detached()
            .env("PORT", &port)
            .env("KEEPALIVE_TOKEN", &cfg.keepalive_token)
            .env("SANDBOX_APP_REPO", &cfg.repo)
            .env("SANDBOX_APP_REF", &cfg.git_ref)
            .env("SANDBOX_SELF_URL", &handle.url)
            .env("NEXT_APP_SKIP_MONITORING_ROUTES", "true")
            .env("NODE_ENV", "production"),
    )
    .await?;

    Ok(())
}

async fn run(
    provider: &dyn SandboxProvider,
    handle: &SandboxHandle,
    step: &str,
    command: Command,
) -> Result<()> {
    tracing::info!(id = %handle.id, step, cmd = %command.cmd, "running bootstrap step");
    provider.run_command(handle, step, command).await?;
    Ok(())
}
