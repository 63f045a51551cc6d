use anyhow::Context;
use exchange::{Exchange, ExchangeConfig, SERVICE_VERSION};
use market_data::Notification;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ExchangeConfig::load().context("loading configuration")?;
    exchange::logging::init(&config.logging.level).context("initializing logging")?;

    info!(version = SERVICE_VERSION, "starting exchange service");

    let exchange = Exchange::open(config).context("opening exchange")?;
    for seed in &exchange.config().instruments {
        watch_market(&exchange, &seed.symbol)?;
    }
    let handles = exchange.start().context("starting pipelines")?;

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    exchange.shutdown();

    tokio::task::spawn_blocking(move || {
        for handle in handles {
            if handle.join().is_err() {
                warn!("pipeline thread panicked");
            }
        }
    })
    .await
    .context("joining pipeline threads")?;

    info!("exchange service stopped");
    Ok(())
}

/// Log every notification pushed to a symbol's market group
fn watch_market(exchange: &Exchange, symbol: &str) -> anyhow::Result<()> {
    let price = exchange.market_data().current_price(symbol)?;
    let (snapshot, mut receiver) = exchange.hub().join_market(symbol, price);
    debug!(symbol = %snapshot.symbol, price = %snapshot.price, "watching market");

    let cancel = exchange.cancellation().clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = receiver.recv() => match received {
                    Ok(Notification::PriceUpdate(update)) => {
                        info!(symbol = %update.symbol, price = %update.price, "price update");
                    }
                    Ok(Notification::MarketUpdate(update)) => {
                        info!(symbol = %update.symbol, trades = update.trades.len(), "market update");
                    }
                    Ok(Notification::FeedPriceUpdate(update)) => {
                        info!(symbol = %update.symbol, price = %update.price, source = %update.source, "feed price update");
                    }
                    Ok(Notification::CurrentPrice(_)) => {}
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "market watcher lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    });
    Ok(())
}
