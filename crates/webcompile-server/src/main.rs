//! webcompile server entry point.

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use webcompile_core::{AppContext, CommandRegistry, DockerRuntime};
use webcompile_server::{http, ServerConfig, ShutdownCoordinator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("webcompile_server=info".parse()?)
                .add_directive("webcompile_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting webcompile server");

    let config = ServerConfig::from_env();
    tracing::info!(?config, "Configuration loaded");
    config.validate()?;
    config.validate_warn();

    let runtime = DockerRuntime::new(config.docker_binary.clone());
    match runtime.probe().await {
        Ok(version) => tracing::info!(%version, "Docker daemon reachable"),
        Err(e) => tracing::warn!(
            error = %e,
            "Docker daemon not reachable, provisioning will fail until it is"
        ),
    }

    let ctx = AppContext::new(
        Arc::new(runtime),
        config.pool_config(),
        config.executor_config(),
        CommandRegistry::with_defaults(),
    )?;
    ctx.pool().spawn_fill();

    let coordinator = ShutdownCoordinator::new(ctx.pool().clone());
    let signals = coordinator.clone();
    tokio::spawn(async move { signals.wait_for_signal().await });

    // pool drain runs concurrently with the HTTP drain
    let graceful = coordinator.clone();
    coordinator
        .run(http::serve(ctx, &config, async move {
            graceful.triggered().await
        }))
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}
