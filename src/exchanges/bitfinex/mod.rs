pub mod codec;
pub mod types;

use crate::core::config::StreamConfig;
use crate::core::kernel::{connect_exchange, ClientHandle};
use crate::core::types::StreamEvent;
use tokio::sync::mpsc;

pub use codec::BitfinexAdapter;

pub const BITFINEX_WS_URL: &str = "wss://api.bitfinex.com/ws/2";

/// Create a Bitfinex client. Market ids are trading symbols (`tBTCUSD`).
pub fn create_bitfinex_client(
    config: StreamConfig,
) -> (ClientHandle, mpsc::Receiver<StreamEvent>) {
    connect_exchange(BitfinexAdapter::new(), BITFINEX_WS_URL, config)
}
