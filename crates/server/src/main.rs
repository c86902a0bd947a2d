use anyhow::Context;
use server::{DeploymentImpl, config::Config};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_LOG_FILTER: &str = "info,server=debug,services=debug,db=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    fmt().with_env_filter(filter).init();

    let config = Config::from_env()?;
    info!(
        database_url = %config.database_url,
        address = %config.bind_address(),
        "Starting server"
    );

    let deployment = DeploymentImpl::new(config.clone())
        .await
        .context("failed to open database")?;

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;

    server::serve(deployment, listener).await?;
    Ok(())
}
