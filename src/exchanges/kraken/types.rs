use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Subscribe / unsubscribe request
#[derive(Debug, Serialize)]
pub struct KrakenSubscriptionRequest<'a> {
    pub event: &'a str,
    pub pair: Vec<&'a str>,
    pub subscription: KrakenSubscription<'a>,
}

#[derive(Debug, Serialize)]
pub struct KrakenSubscription<'a> {
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
}

/// Object frames: `subscriptionStatus`, `heartbeat`, `systemStatus`, errors
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KrakenEvent {
    pub event: Option<String>,
    #[serde(rename = "channelID")]
    pub channel_id: Option<u64>,
    pub channel_name: Option<String>,
    pub pair: Option<String>,
    pub status: Option<String>,
    pub subscription: Option<KrakenSubscriptionName>,
    pub error_message: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct KrakenSubscriptionName {
    pub name: String,
}

/// Ticker payload. Two-element arrays are `[today, last 24 hours]`; lot
/// volumes arrive as bare integers, so entries stay untyped.
#[derive(Debug, Deserialize)]
pub struct KrakenTicker {
    /// Ask `[price, whole lot volume, lot volume]`
    pub a: Vec<Value>,
    /// Bid `[price, whole lot volume, lot volume]`
    pub b: Vec<Value>,
    /// Close `[price, lot volume]`
    pub c: Vec<Value>,
    pub v: Vec<Value>,
    pub l: Vec<Value>,
    pub h: Vec<Value>,
    pub o: Vec<Value>,
}

/// Book entry `[price, volume, timestamp]`, updates may carry a 4th flag
pub type KrakenBookEntry = Vec<String>;

/// Trade entry `[price, volume, time, side, order type, misc]`
pub type KrakenTradeEntry = Vec<String>;

#[derive(Debug, Deserialize)]
pub struct KrakenBookSnapshot {
    #[serde(rename = "as", default)]
    pub asks: Vec<KrakenBookEntry>,
    #[serde(rename = "bs", default)]
    pub bids: Vec<KrakenBookEntry>,
}

/// One update object; a single frame may carry an ask and a bid object
#[derive(Debug, Deserialize)]
pub struct KrakenBookUpdate {
    #[serde(default)]
    pub a: Vec<KrakenBookEntry>,
    #[serde(default)]
    pub b: Vec<KrakenBookEntry>,
}
