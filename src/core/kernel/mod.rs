/// `Feedwire` Kernel - exchange-agnostic streaming core
///
/// Everything in here is shared by every exchange. Exchange-specific code
/// lives behind the [`ExchangeAdapter`] trait and never touches sockets,
/// timers or book state directly.
///
/// # Architecture
///
/// ## Transport
/// - `WsSession`: raw frame transport (`TungsteniteWs` in production)
/// - `ResilientWs`: lifecycle state machine with backoff reconnect
/// - `Watchdog`: idle timer that recycles silent connections
/// - `SubscribeThrottle`: permit pool for outbound subscribes
///
/// ## Client core
/// - `SubscriptionRegistry`: per-feed, insertion-ordered subscriptions
/// - `OrderBookSync`: sequence tracking, gap detection and resync state
/// - `ClientHandle`: handle to one connection driver task
/// - `MultiClient`: one driver per market behind one event stream
///
/// ## Message handling
/// - `ExchangeAdapter`: exchange-specific encode/decode and capabilities
///
/// # Example
///
/// ```rust,no_run
/// use feedwire::core::config::StreamConfig;
/// use feedwire::core::kernel::connect_exchange;
/// use feedwire::core::traits::MarketFeed;
/// use feedwire::core::types::Market;
/// use feedwire::exchanges::hitbtc::{HitbtcAdapter, HITBTC_WS_URL};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (client, mut events) =
///     connect_exchange(HitbtcAdapter::new(), HITBTC_WS_URL, StreamConfig::default());
///
/// client.subscribe_level2_updates(&Market::new("BTCUSD", "BTC", "USD"))?;
///
/// while let Some(event) = events.recv().await {
///     println!("{}: {:?}", event.name(), event);
/// }
/// # Ok(())
/// # }
/// ```
pub mod codec;
pub mod driver;
pub mod multi;
pub mod orderbook;
pub mod registry;
pub mod throttle;
pub mod watchdog;
pub mod ws;

// Re-export key types for convenience
pub use codec::{DomainEvent, ExchangeAdapter, Heartbeat};
pub use driver::{connect_exchange, ClientHandle};
pub use multi::{ConnectionFactory, MultiClient, TungsteniteFactory};
pub use orderbook::{BookStatus, OrderBookSync, Sequenced, SyncStats, UpdateOutcome};
pub use registry::SubscriptionRegistry;
pub use throttle::SubscribeThrottle;
pub use watchdog::Watchdog;
pub use ws::{ResilientWs, TungsteniteWs, WsSession};
