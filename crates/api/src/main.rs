use anyhow::Context;

use shopledger_api::config::ApiConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ApiConfig::from_env().context("invalid configuration")?;
    shopledger_observability::init(config.log_format);
    if config.dev_jwt_secret {
        tracing::warn!("JWT_SECRET not set; using insecure dev default");
    }

    let app = shopledger_api::app::build_app(config.jwt_secret.clone()).context("failed to start background workers")?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
