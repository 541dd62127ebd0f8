use anyhow::Context;
use antigravity_gateway_lib::{modules, proxy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = modules::load_app_config().context("failed to load config")?;
    let _log_guard = modules::init_logger(&config.logging);

    tracing::info!("Starting antigravity-gateway v{}", env!("CARGO_PKG_VERSION"));

    proxy::start_server(config)
        .await
        .context("gateway server exited with error")?;
    Ok(())
}
