use anyhow::Context;

use stockledger_api::config::ApiConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ApiConfig::from_env().context("invalid configuration")?;
    stockledger_observability::init(&config.log);

    let services = stockledger_api::app::services::build_services(&config.ledger)
        .await
        .context("failed to wire ledger services")?;
    let app = stockledger_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
