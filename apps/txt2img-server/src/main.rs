use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::info;
use txt2img_server::{Config, Txt2ImgService, make_txt2img_http_server};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("failed to load txt2img server config")?;
    let service = Txt2ImgService::from_config(&config)
        .await
        .context("failed to prepare txt2img service")?;
    info!(
        bind_addr = %config.bind_addr,
        chunk_size = config.chunk_size,
        auth = config.auth_token.is_some(),
        "starting txt2img server"
    );

    let server = make_txt2img_http_server(config.bind_addr, Arc::new(service))
        .await
        .map_err(|error| anyhow!(error))?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down txt2img server");
    server.close().await.map_err(|error| anyhow!(error))
}
