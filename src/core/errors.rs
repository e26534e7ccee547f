use crate::core::types::FeedKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The adapter does not implement the requested feed kind.
    #[error("{exchange} does not support {feed} feeds")]
    NotSupported { exchange: String, feed: FeedKind },

    /// The driver task behind a handle has stopped.
    #[error("Connection driver is no longer running")]
    ChannelClosed,

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),

    #[error("Other error: {0}")]
    Other(String),
}

impl ExchangeError {
    pub(crate) fn not_supported(exchange: &str, feed: FeedKind) -> Self {
        Self::NotSupported {
            exchange: exchange.to_string(),
            feed,
        }
    }
}
