use axum::Router;
use skiff_core::Config;
use tokio::net::TcpListener;

/// Bind and serve until the process is stopped.
pub async fn start_server(config: &Config, router: Router) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!(
        addr = %addr,
        environment = %config.environment,
        "Skiff API listening"
    );

    axum::serve(listener, router).await?;
    Ok(())
}
