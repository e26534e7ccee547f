use crate::core::config::StreamConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::ExchangeAdapter;
use crate::core::kernel::driver::ClientHandle;
use crate::core::kernel::ws::{TungsteniteWs, WsSession};
use crate::core::traits::MarketFeed;
use crate::core::types::{Capabilities, FeedKind, Market, StreamEvent};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Builds the per-market pieces of a [`MultiClient`].
pub trait ConnectionFactory: Send + Sync + 'static {
    type Adapter: ExchangeAdapter;
    type Session: WsSession + 'static;

    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    fn adapter(&self, market: &Market) -> Self::Adapter;

    fn session(&self, market: &Market) -> Self::Session;
}

/// One real WebSocket per market, all to the same endpoint
pub struct TungsteniteFactory<A, F> {
    name: String,
    url: String,
    capabilities: Capabilities,
    connect_timeout: Duration,
    make_adapter: F,
    _adapter: PhantomData<fn() -> A>,
}

impl<A, F> TungsteniteFactory<A, F>
where
    F: Fn(&Market) -> A + Send + Sync + 'static,
    A: ExchangeAdapter,
{
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        capabilities: Capabilities,
        make_adapter: F,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            capabilities,
            connect_timeout: Duration::from_secs(10),
            make_adapter,
            _adapter: PhantomData,
        }
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl<A, F> ConnectionFactory for TungsteniteFactory<A, F>
where
    F: Fn(&Market) -> A + Send + Sync + 'static,
    A: ExchangeAdapter,
{
    type Adapter = A;
    type Session = TungsteniteWs;

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn adapter(&self, market: &Market) -> A {
        (self.make_adapter)(market)
    }

    fn session(&self, market: &Market) -> TungsteniteWs {
        TungsteniteWs::new(self.url.clone(), format!("{}:{}", self.name, market.id))
            .with_connect_timeout(self.connect_timeout)
    }
}

struct Child {
    handle: ClientHandle,
    feeds: HashSet<FeedKind>,
}

/// Fan-out client for exchanges that need one connection per market.
///
/// Each market gets its own driver; all of them publish into one event
/// channel, with lifecycle signals tagged `exchange:market`. A market's
/// driver is shut down as soon as its last feed is unsubscribed.
pub struct MultiClient<F: ConnectionFactory> {
    factory: F,
    config: StreamConfig,
    events: mpsc::Sender<StreamEvent>,
    children: Mutex<HashMap<String, Child>>,
}

impl<F: ConnectionFactory> MultiClient<F> {
    pub fn new(factory: F, config: StreamConfig) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (events, rx) = mpsc::channel(config.event_buffer_size.max(1));
        let client = Self {
            factory,
            config,
            events,
            children: Mutex::new(HashMap::new()),
        };
        (client, rx)
    }

    fn children(&self) -> Result<MutexGuard<'_, HashMap<String, Child>>, ExchangeError> {
        self.children
            .lock()
            .map_err(|_| ExchangeError::Other("connection map poisoned".to_string()))
    }

    fn check_supported(&self, feed: FeedKind) -> Result<(), ExchangeError> {
        if self.factory.capabilities().supports(feed) {
            Ok(())
        } else {
            Err(ExchangeError::not_supported(self.factory.name(), feed))
        }
    }

    fn spawn_child(&self, market: &Market) -> ClientHandle {
        let source = format!("{}:{}", self.factory.name(), market.id);
        info!(%source, "Opening per-market connection");
        ClientHandle::spawn_with_sink(
            self.factory.adapter(market),
            self.factory.session(market),
            self.config.clone(),
            source,
            self.events.clone(),
        )
    }

    /// Number of live per-market connections
    pub fn connection_count(&self) -> usize {
        self.children().map_or(0, |children| children.len())
    }

    /// Handle of the connection serving `market_id`
    pub fn client(&self, market_id: &str) -> Option<ClientHandle> {
        self.children()
            .ok()?
            .get(market_id)
            .map(|child| child.handle.clone())
    }
}

#[async_trait]
impl<F: ConnectionFactory> MarketFeed for MultiClient<F> {
    fn name(&self) -> &str {
        self.factory.name()
    }

    fn capabilities(&self) -> Capabilities {
        self.factory.capabilities()
    }

    fn subscribe(&self, feed: FeedKind, market: &Market) -> Result<(), ExchangeError> {
        self.check_supported(feed)?;
        let mut children = self.children()?;
        if !children.contains_key(&market.id) {
            let handle = self.spawn_child(market);
            children.insert(
                market.id.clone(),
                Child {
                    handle,
                    feeds: HashSet::new(),
                },
            );
        }
        let child = children
            .get_mut(&market.id)
            .ok_or_else(|| ExchangeError::Other("connection vanished".to_string()))?;
        child.handle.subscribe(feed, market)?;
        child.feeds.insert(feed);
        Ok(())
    }

    fn unsubscribe(&self, feed: FeedKind, market: &Market) -> Result<(), ExchangeError> {
        self.check_supported(feed)?;
        let mut children = self.children()?;
        let Some(child) = children.get_mut(&market.id) else {
            return Ok(());
        };
        child.handle.unsubscribe(feed, market)?;
        child.feeds.remove(&feed);
        if child.feeds.is_empty() {
            // Dropping the only handle ends the driver after it has sent
            // the unsubscribe queued above
            debug!(market_id = %market.id, "Last feed removed, closing connection");
            children.remove(&market.id);
        }
        Ok(())
    }

    fn reconnect(&self) -> Result<(), ExchangeError> {
        for child in self.children()?.values() {
            child.handle.reconnect()?;
        }
        Ok(())
    }

    fn request_resync(&self, feed: FeedKind, market: &Market) -> Result<(), ExchangeError> {
        self.check_supported(feed)?;
        match self.children()?.get(&market.id) {
            Some(child) => child.handle.request_resync(feed, market),
            None => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), ExchangeError> {
        let handles: Vec<ClientHandle> = self
            .children()?
            .drain()
            .map(|(_, child)| child.handle)
            .collect();
        for handle in handles {
            // A driver that already stopped has nothing left to close
            match handle.close().await {
                Ok(()) | Err(ExchangeError::ChannelClosed) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
