// Snapshot service binary.
//
// Reads configuration from the environment, starts the service and
// runs until interrupted. The HTTP surface in front of this (routes,
// auth) lives in the embedding deployment; this binary is the crawl
// core alone.

use anyhow::{Context, Result};
use snapkit::{SiteCronConfig, SnapConfig, SnapKit};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let data_dir = std::env::var("SNAPKIT_DATA_DIR").unwrap_or_else(|_| "./data".to_string());
    let app_url =
        std::env::var("SNAPKIT_APP_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

    let mut builder = SnapConfig::builder().data_dir(&data_dir).app_url(&app_url);

    if let Ok(concurrency) = std::env::var("SNAPKIT_CONCURRENCY") {
        builder = builder.concurrency(
            concurrency
                .parse()
                .context("SNAPKIT_CONCURRENCY must be an integer")?,
        );
    }

    // site cron config ships as a JSON file, same shape as SiteCronConfig
    if let Ok(path) = std::env::var("SNAPKIT_SITES_FILE") {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read sites file {path}"))?;
        let cron: SiteCronConfig =
            serde_json::from_str(&raw).with_context(|| format!("invalid sites file {path}"))?;
        builder = builder.site_cron(cron);
    }

    let config = builder.build()?;
    let service = SnapKit::start(config).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    service.shutdown().await;
    Ok(())
}
