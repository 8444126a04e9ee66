//! hostgrid dispatch server.
//!
//! Run with:
//!   cargo run -p hostgrid-server
//!
//! Configuration is read from `HOSTGRID_*` environment variables; logging
//! follows `RUST_LOG`.

use anyhow::Context;
use hostgrid_runtime::HostgridConfig;
use hostgrid_server::{build_router, DispatchApiState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,hostgrid_runtime=info,hostgrid_server=info")
            }),
        )
        .init();

    let config = HostgridConfig::from_env().map_err(anyhow::Error::msg)?;
    config
        .startup_health_check()
        .map_err(|e| anyhow::anyhow!("startup health check failed: {}", e))?;

    let state = DispatchApiState::from_config(&config).map_err(anyhow::Error::msg)?;
    let listener = tokio::net::TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server_addr))?;

    tracing::info!(
        addr = %config.server_addr,
        backend = ?config.backend,
        invoke_timeout_ms = config.invoke_timeout.as_millis() as u64,
        "hostgrid server listening"
    );
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
