use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct BitfinexSubscribe<'a> {
    pub event: &'static str,
    pub channel: &'static str,
    pub symbol: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prec: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub len: Option<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BitfinexUnsubscribe {
    pub event: &'static str,
    pub chan_id: u64,
}

/// Object frames: `info`, `subscribed`, `unsubscribed`, `error`, `conf`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitfinexEvent {
    pub event: String,
    pub channel: Option<String>,
    pub chan_id: Option<u64>,
    pub symbol: Option<String>,
    pub pair: Option<String>,
    pub prec: Option<String>,
    pub msg: Option<String>,
    pub code: Option<i64>,
}

/// Channel metadata captured from a `subscribed` event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitfinexChannel {
    pub symbol: String,
    /// Legacy pair name (`BTCUSD` for `tBTCUSD`)
    pub pair: Option<String>,
}
