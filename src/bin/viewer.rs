//! Order book viewer binary
//!
//! Renders the live depth replica for a symbol: `viewer [SYMBOL]`. The book
//! updates over the depth WebSocket stream; rendering runs at a 100ms cadence
//! off the observer sink.

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use depthflow::config::Config;
use depthflow::display::BookDisplay;
use depthflow::orderbook::{BookSnapshot, DepthManager};
use depthflow::rest::MexcRest;
use depthflow::websocket::WebSocketManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Keep log noise out of the rendered ladder unless asked for.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let symbol_arg = std::env::args().nth(1);
    let config = Arc::new(Config::load(symbol_arg)?);
    println!("Starting order book viewer for {}", config.symbol);
    println!("Press Ctrl+C to exit\n");

    // Depth and exchange info are public endpoints; credentials are optional
    // here.
    let rest = MexcRest::new(&config.rest_endpoint, Config::credentials())?;

    let depth_manager = Arc::new(DepthManager::new(&config.symbol));

    // The sink forwards snapshots into a watch channel; the render loop below
    // is the observer side and never touches the manager's write path.
    let (snapshot_tx, snapshot_rx) = tokio::sync::watch::channel::<Option<BookSnapshot>>(None);
    depth_manager.set_update_sink(Arc::new(move |snapshot: BookSnapshot| {
        let _ = snapshot_tx.send(Some(snapshot));
    }));

    let mut ws_manager = WebSocketManager::new(depth_manager.clone(), rest, config.clone());
    let transport = tokio::spawn(async move { ws_manager.run().await });

    let display = BookDisplay::new(&config.symbol, 10);
    let mut render_interval = tokio::time::interval(Duration::from_millis(100));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = render_interval.tick() => {
                let latest = snapshot_rx.borrow().clone();
                if let Some(snapshot) = latest {
                    display.render(&snapshot, &depth_manager.latency().stats());
                }
            }
            _ = &mut shutdown => break,
        }
    }

    // Shutdown order matters: clear the sink first so no further observer
    // invocations start, then stop the transport, then drop the manager.
    println!("\n\nDisconnecting...");
    depth_manager.clear_update_sink();
    transport.abort();
    let _ = transport.await;

    println!("Goodbye!");
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
