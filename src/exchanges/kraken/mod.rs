pub mod codec;
pub mod types;

use crate::core::config::StreamConfig;
use crate::core::kernel::{connect_exchange, ClientHandle};
use crate::core::types::StreamEvent;
use tokio::sync::mpsc;

pub use codec::KrakenAdapter;

pub const KRAKEN_WS_URL: &str = "wss://ws.kraken.com";

/// Create a Kraken client
///
/// Must be called inside a tokio runtime. Nothing connects until the first
/// subscribe.
pub fn create_kraken_client(config: StreamConfig) -> (ClientHandle, mpsc::Receiver<StreamEvent>) {
    connect_exchange(KrakenAdapter::new(), KRAKEN_WS_URL, config)
}
