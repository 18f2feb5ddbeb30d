use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use gridbot::broker::SimBroker;
use gridbot::config::BotConfig;
use gridbot::engine::TradingLoop;
use gridbot::ledger::Ledger;

#[derive(Parser, Debug)]
#[command(name = "gridbot", about = "Grid trading bot with bracket orders")]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "gridbot")]
    config: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    verbosity: tracing::Level,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(args.verbosity.into()),
        )
        .with_target(false)
        .init();

    let config = BotConfig::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config))?;

    if !config.paper_trading {
        anyhow::bail!("no live gateway is linked into this build; set paper_trading = true");
    }

    info!(
        symbol = %config.symbol,
        budget = config.strategy_budget,
        port = config.gateway_port,
        "starting in paper mode"
    );

    let ledger = Ledger::open(&config.database_url)
        .await
        .with_context(|| format!("opening ledger at {}", config.database_url))?;

    let broker = SimBroker::new(config.strategy_budget);
    broker.set_quote(config.fallback_price, gridbot::models::PriceSource::Last);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut trading = TradingLoop::new(broker, ledger, config, shutdown_rx);

    if let Err(e) = trading.startup().await {
        error!(error = %e, "startup failed");
        return Err(e).context("broker startup");
    }

    trading.run().await.context("trading loop")?;

    info!("goodbye");
    Ok(())
}
