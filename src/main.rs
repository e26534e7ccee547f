use anyhow::Context;
use feedwire::{ExchangeFactory, ExchangeType, FeedKind, MarketFeed, StreamConfig, StreamEvent};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Stream one exchange's sample market to stdout.
///
/// Usage: `feedwire [exchange] [feed...]`, e.g. `feedwire kraken ticker trades`.
/// Tuning comes from `FEEDWIRE_*` variables (and `.env` with `env-file`).
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let exchange: ExchangeType = args
        .next()
        .as_deref()
        .unwrap_or("hitbtc")
        .parse()
        .context("first argument must be an exchange name")?;
    let feeds = args
        .map(|arg| parse_feed(&arg))
        .collect::<anyhow::Result<Vec<_>>>()?;

    #[cfg(feature = "env-file")]
    let config = StreamConfig::from_env_file("FEEDWIRE")?;
    #[cfg(not(feature = "env-file"))]
    let config = StreamConfig::from_env("FEEDWIRE")?;

    let (client, mut events) = ExchangeFactory::create_client(exchange, config);
    let market = exchange.sample_market();
    let capabilities = client.capabilities();

    let wanted = if feeds.is_empty() {
        FeedKind::ALL
            .into_iter()
            .filter(|feed| capabilities.supports(*feed))
            .collect()
    } else {
        feeds
    };
    for feed in wanted {
        info!(%exchange, %feed, %market, "Subscribing");
        client.subscribe(feed, &market)?;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                match &event {
                    StreamEvent::Connection { source, signal } => info!(%source, ?signal, "Connection"),
                    StreamEvent::SubscriptionRejected { reason, .. } => warn!(%reason, "Subscription rejected"),
                    other => println!("{}", serde_json::to_string(other)?),
                }
            }
        }
    }

    client.close().await?;
    Ok(())
}

fn parse_feed(name: &str) -> anyhow::Result<FeedKind> {
    FeedKind::ALL
        .into_iter()
        .find(|feed| feed.as_str() == name || format!("{:?}", feed).eq_ignore_ascii_case(name))
        .with_context(|| format!("unknown feed: {}", name))
}
