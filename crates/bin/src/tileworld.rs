//! Tileworld game server binary.

use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Tileworld Server v{}", env!("CARGO_PKG_VERSION"));

    let config = server::Config::load()?;
    info!("Loaded configuration");
    info!("  Port: {}", config.server.port);
    info!(
        "  World: {}x{}x{}",
        config.world.width, config.world.height, config.world.depth
    );
    info!("  Data: {}", config.server.data_dir.display());

    server::run(config).await?;

    Ok(())
}
