use anyhow::Context;
use shopflow_app::{scenario, AppState};
use shopflow_store::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load config")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log.filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(backend = ?config.storage.backend, "Starting shopflow");

    let state = AppState::from_config(&config).await?;
    let report = scenario::run(&state).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
