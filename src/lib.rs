pub mod core;
pub mod exchanges;
pub mod utils;

pub use crate::core::{config::StreamConfig, errors::ExchangeError, traits::MarketFeed, types::*};
pub use crate::core::kernel::{ClientHandle, MultiClient};
pub use exchanges::bitfinex::BitfinexAdapter;
pub use exchanges::hitbtc::HitbtcAdapter;
pub use exchanges::kraken::KrakenAdapter;
pub use exchanges::okx::OkxAdapter;
pub use utils::exchange_factory::{ExchangeFactory, ExchangeType};
