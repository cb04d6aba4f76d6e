//! Trade Runner - oracle-driven futures trading loop
//!
//! Each cycle, for every configured instrument:
//! 1. Builds a market snapshot from recent bars
//! 2. Asks the reasoning oracle for a decision
//! 3. Sizes the order from equity and the recommended allocation
//! 4. Reconciles the live position against the decision

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use trade_runner::config::is_truthy;
use trade_runner::{
    AppConfig, ChatCompletionClient, ExchangeGateway, ExchangeMode, FileNewsSource,
    HttpExchangeGateway, PaperExchange, TradeRunner,
};

/// Trade runner entry point
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let level = if std::env::var("TRADER_DEBUG").map(|v| is_truthy(&v)).unwrap_or(false) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    info!("Starting Trade Runner...");

    let config = load_config().context("invalid configuration")?;
    for instrument in &config.instruments {
        info!(
            "Instrument {}: leverage {}x, timeframe {}, quantity {}",
            instrument.symbol,
            instrument.leverage,
            instrument.timeframe,
            instrument
                .fixed_quantity
                .map(|q| q.to_string())
                .unwrap_or_else(|| "dynamic".to_string())
        );
    }

    let gateway: Arc<dyn ExchangeGateway> = match config.exchange.mode {
        ExchangeMode::Live => Arc::new(HttpExchangeGateway::new(
            &config.exchange.gateway_url,
            config.exchange.api_key.clone(),
        )?),
        ExchangeMode::Paper => {
            warn!("Using in-memory paper exchange");
            Arc::new(PaperExchange::new(config.exchange.paper_equity))
        }
    };
    let oracle = Arc::new(ChatCompletionClient::new(&config.llm)?);

    let mut runner = TradeRunner::new(&config, gateway, oracle);
    if let Some(path) = &config.news.file {
        runner = runner.with_news_source(Arc::new(FileNewsSource::new(path)));
    }

    runner
        .prepare()
        .await
        .context("failed to read account equity at startup")?;

    runner.run().await
}

/// Config file when `TRADER_CONFIG` is set or the default file exists,
/// environment variables otherwise
fn load_config() -> anyhow::Result<AppConfig> {
    let path = std::env::var("TRADER_CONFIG").ok().map(PathBuf::from).or_else(|| {
        dirs::config_dir()
            .map(|dir| dir.join("trade-runner").join("config.toml"))
            .filter(|p| p.exists())
    });

    let config = match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            AppConfig::from_file(&path)?
        }
        None => AppConfig::from_env()?,
    };
    Ok(config)
}
