pub mod codec;
pub mod types;

use crate::core::config::StreamConfig;
use crate::core::kernel::{connect_exchange, ClientHandle};
use crate::core::types::StreamEvent;
use tokio::sync::mpsc;

// Re-export main components
pub use codec::OkxAdapter;
pub use types::{OkxOrderBook, OkxTicker, OkxTrade, OkxWsChannel, OkxWsRequest, OkxWsResponse};

pub const OKX_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";

/// Create an OKX public market data client
///
/// The client keeps the connection alive with a text `ping` every 25 seconds
/// while connected.
pub fn create_okx_client(config: StreamConfig) -> (ClientHandle, mpsc::Receiver<StreamEvent>) {
    connect_exchange(OkxAdapter::new(), OKX_WS_URL, config)
}
