//! Market-maker binary
//!
//! Quotes a single symbol against MEXC spot: `maker [SYMBOL]`. Credentials
//! come from `MEXC_API_KEY` / `MEXC_API_SECRET` (a `.env` file is honored).

use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use depthflow::config::Config;
use depthflow::rest::{MexcRest, SpotRest};
use depthflow::strategy::{MakerConfig, MarketMaker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let symbol_arg = std::env::args().nth(1);
    let config = Config::load(symbol_arg)?;

    let credentials = Config::credentials();
    if credentials.is_empty() {
        anyhow::bail!("MEXC_API_KEY and MEXC_API_SECRET must be set");
    }

    let rest = MexcRest::new(&config.rest_endpoint, credentials)?;
    let maker_config = MakerConfig::from_env(&config.symbol);
    info!(symbol = %config.symbol, "starting maker");

    let mut maker = MarketMaker::new(rest.clone(), maker_config)?;

    tokio::select! {
        result = maker.run() => {
            result?;
        }
        _ = shutdown_signal() => {
            info!("shutdown requested; cancelling open orders");
            if let Err(e) = rest.cancel_open_orders(&config.symbol).await {
                warn!(error = %e, "failed to cancel open orders on shutdown");
            }
        }
    }

    info!("goodbye");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
