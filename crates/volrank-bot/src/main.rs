//! volrank - Binance volume-rank market data client.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use volrank_bot::{AppConfig, Application};
use volrank_rest::Credentials;

/// Follow the top-N Binance pairs by 24h volume
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via VOLRANK_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any WS connection
    volrank_ws::init_crypto();

    let args = Args::parse();

    // Logging comes after config so the configured level applies; load
    // warnings before this point are not shown.
    let config = AppConfig::load(args.config)?;
    volrank_telemetry::init_logging(&config.telemetry.log_level)?;

    info!("Starting volrank v{}", env!("CARGO_PKG_VERSION"));
    info!(
        top_n = config.ranking.top_n,
        account_api = %config.endpoints.account_api_url,
        market_ws = %config.endpoints.market_ws_url,
        "Configuration loaded"
    );

    let credentials = Credentials::from_env(
        &config.credentials.api_key_env,
        &config.credentials.api_secret_env,
    )?;

    let app = Application::new(config, credentials)?;
    app.run().await?;

    Ok(())
}
