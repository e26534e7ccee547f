use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC request
#[derive(Debug, Serialize)]
pub struct HitbtcRequest<'a> {
    pub method: &'a str,
    pub params: HitbtcSymbolParams<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct HitbtcSymbolParams<'a> {
    pub symbol: &'a str,
}

/// Any inbound frame: a notification (`method` + `params`) or a reply
/// (`result`/`error` + `id`)
#[derive(Debug, Deserialize)]
pub struct HitbtcEnvelope {
    pub method: Option<String>,
    pub params: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<HitbtcError>,
    pub id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HitbtcError {
    pub code: i64,
    pub message: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitbtcTicker {
    pub symbol: String,
    pub ask: Option<String>,
    pub bid: Option<String>,
    pub last: Option<String>,
    pub open: Option<String>,
    pub low: Option<String>,
    pub high: Option<String>,
    pub volume: Option<String>,
    pub volume_quote: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct HitbtcTrades {
    pub symbol: String,
    pub data: Vec<HitbtcTrade>,
}

#[derive(Debug, Deserialize)]
pub struct HitbtcTrade {
    pub id: u64,
    pub price: String,
    pub quantity: String,
    pub side: String,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct HitbtcBookLevel {
    pub price: String,
    pub size: String,
}

#[derive(Debug, Deserialize)]
pub struct HitbtcOrderbook {
    pub symbol: String,
    pub ask: Vec<HitbtcBookLevel>,
    pub bid: Vec<HitbtcBookLevel>,
    pub sequence: u64,
    pub timestamp: Option<String>,
}
