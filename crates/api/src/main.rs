use anyhow::Context;

use stockflow_api::app::{build_app, services};
use stockflow_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockflow_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let services = services::build_services(&config)
        .await
        .context("failed to build services")?;

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, build_app(services.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shutting down workers");
    tokio::task::spawn_blocking(move || services.shutdown()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
