use serde::{Deserialize, Serialize};
use serde_json::Value;

/// OKX WebSocket request
#[derive(Debug, Serialize)]
pub struct OkxWsRequest {
    pub op: String,              // Operation: subscribe, unsubscribe
    pub args: Vec<OkxWsChannel>, // Channel arguments
}

/// OKX WebSocket channel
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OkxWsChannel {
    pub channel: String, // Channel name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inst_id: Option<String>, // Instrument ID
}

/// OKX WebSocket push, ack or error
#[derive(Debug, Deserialize)]
pub struct OkxWsResponse<T> {
    pub arg: Option<OkxWsChannel>, // Channel info
    pub data: Option<T>,           // Data payload
    pub action: Option<String>,    // snapshot / update (books channel)
    pub code: Option<String>,      // Error code
    pub msg: Option<String>,       // Error message
    pub event: Option<String>,     // subscribe / unsubscribe / error
}

pub type OkxWsMessage = OkxWsResponse<Vec<Value>>;

/// OKX Ticker data
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OkxTicker {
    pub inst_id: String,        // Instrument ID
    pub last: String,           // Last traded price
    pub last_sz: Option<String>, // Last traded size
    pub ask_px: Option<String>, // Best ask price
    pub ask_sz: Option<String>, // Best ask size
    pub bid_px: Option<String>, // Best bid price
    pub bid_sz: Option<String>, // Best bid size
    pub open_24h: Option<String>, // 24h opening price
    pub high_24h: Option<String>, // 24h highest price
    pub low_24h: Option<String>, // 24h lowest price
    pub vol_ccy_24h: Option<String>, // 24h volume in quote currency
    pub vol_24h: Option<String>, // 24h volume in base currency
    pub ts: String,             // Timestamp (ms)
}

/// OKX Order book data
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OkxOrderBook {
    pub asks: Vec<Vec<String>>, // [price, size, deprecated, order_count]
    pub bids: Vec<Vec<String>>, // [price, size, deprecated, order_count]
    pub ts: String,             // Timestamp (ms)
    pub seq_id: Option<i64>,    // Absent on books5
    pub prev_seq_id: Option<i64>, // -1 on snapshots
}

/// OKX Trade data
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OkxTrade {
    pub inst_id: String,  // Instrument ID
    pub trade_id: String, // Trade ID
    pub px: String,       // Price
    pub sz: String,       // Size
    pub side: String,     // Taker side
    pub ts: String,       // Timestamp (ms)
}
