pub mod bitfinex;
pub mod hitbtc;
pub mod kraken;
pub mod okx;
