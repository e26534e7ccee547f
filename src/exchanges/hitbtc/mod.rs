pub mod codec;
pub mod types;

use crate::core::config::StreamConfig;
use crate::core::kernel::{connect_exchange, ClientHandle};
use crate::core::types::StreamEvent;
use tokio::sync::mpsc;

pub use codec::HitbtcAdapter;

pub const HITBTC_WS_URL: &str = "wss://api.hitbtc.com/api/2/ws";

/// Create a HitBTC client
///
/// Must be called inside a tokio runtime. Nothing connects until the first
/// subscribe.
pub fn create_hitbtc_client(config: StreamConfig) -> (ClientHandle, mpsc::Receiver<StreamEvent>) {
    connect_exchange(HitbtcAdapter::new(), HITBTC_WS_URL, config)
}
