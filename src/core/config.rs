use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Tuning for one connection driver.
///
/// All values are read once when the driver is spawned and never change
/// afterwards, so a single config can be shared by many drivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Delay before the first reconnect attempt after a drop
    pub reconnect_delay_ms: u64,
    /// Upper bound for the doubling backoff between failed attempts
    pub max_reconnect_delay_ms: u64,
    /// Socket connect timeout
    pub connect_timeout_ms: u64,
    /// Idle window after which the watchdog recycles the connection
    pub watchdog_idle_ms: u64,
    /// Concurrent subscribe permits per connection
    pub subscribe_permits: usize,
    /// How long a subscribe permit is held after sending
    pub subscribe_throttle_ms: u64,
    /// Updates buffered per market while waiting for the first snapshot
    pub pending_buffer_size: usize,
    /// Capacity of the consumer event channel
    pub event_buffer_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 15_000,     // 15 seconds
            max_reconnect_delay_ms: 60_000, // 1 minute
            connect_timeout_ms: 10_000,     // 10 seconds
            watchdog_idle_ms: 90_000,       // 90 seconds
            subscribe_permits: 4,
            subscribe_throttle_ms: 100,
            pending_buffer_size: 1_000,
            event_buffer_size: 1_024,
        }
    }
}

impl StreamConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Recognised variables (all optional, defaults apply when unset):
    /// - `{PREFIX}_RECONNECT_DELAY_MS`
    /// - `{PREFIX}_MAX_RECONNECT_DELAY_MS`
    /// - `{PREFIX}_CONNECT_TIMEOUT_MS`
    /// - `{PREFIX}_WATCHDOG_IDLE_MS`
    /// - `{PREFIX}_SUBSCRIBE_PERMITS`
    /// - `{PREFIX}_SUBSCRIBE_THROTTLE_MS`
    /// - `{PREFIX}_PENDING_BUFFER_SIZE`
    /// - `{PREFIX}_EVENT_BUFFER_SIZE`
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.to_uppercase();
        let defaults = Self::default();

        let config = Self {
            reconnect_delay_ms: read_var(&prefix, "RECONNECT_DELAY_MS")?
                .unwrap_or(defaults.reconnect_delay_ms),
            max_reconnect_delay_ms: read_var(&prefix, "MAX_RECONNECT_DELAY_MS")?
                .unwrap_or(defaults.max_reconnect_delay_ms),
            connect_timeout_ms: read_var(&prefix, "CONNECT_TIMEOUT_MS")?
                .unwrap_or(defaults.connect_timeout_ms),
            watchdog_idle_ms: read_var(&prefix, "WATCHDOG_IDLE_MS")?
                .unwrap_or(defaults.watchdog_idle_ms),
            subscribe_permits: read_var(&prefix, "SUBSCRIBE_PERMITS")?
                .unwrap_or(defaults.subscribe_permits),
            subscribe_throttle_ms: read_var(&prefix, "SUBSCRIBE_THROTTLE_MS")?
                .unwrap_or(defaults.subscribe_throttle_ms),
            pending_buffer_size: read_var(&prefix, "PENDING_BUFFER_SIZE")?
                .unwrap_or(defaults.pending_buffer_size),
            event_buffer_size: read_var(&prefix, "EVENT_BUFFER_SIZE")?
                .unwrap_or(defaults.event_buffer_size),
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from a .env file and environment variables
    ///
    /// A missing .env file is not an error; system environment variables
    /// are used on their own in that case.
    #[cfg(feature = "env-file")]
    pub fn from_env_file(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(prefix, ".env")
    }

    /// Create configuration from a specific .env file path
    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(prefix: &str, env_file_path: &str) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(_) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(prefix)
    }

    /// Reject values that would make the driver spin or never progress
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconnect_delay_ms == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "reconnect_delay_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_reconnect_delay_ms < self.reconnect_delay_ms {
            return Err(ConfigError::InvalidConfiguration(
                "max_reconnect_delay_ms must not be below reconnect_delay_ms".to_string(),
            ));
        }
        if self.watchdog_idle_ms == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "watchdog_idle_ms must be greater than zero".to_string(),
            ));
        }
        if self.subscribe_permits == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "subscribe_permits must be at least 1".to_string(),
            ));
        }
        if self.event_buffer_size == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "event_buffer_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    #[must_use]
    pub const fn with_max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    #[must_use]
    pub const fn with_watchdog_idle(mut self, idle: Duration) -> Self {
        self.watchdog_idle_ms = idle.as_millis() as u64;
        self
    }

    /// Set the subscribe permit pool size and how long each permit is held
    #[must_use]
    pub const fn with_subscribe_throttle(mut self, permits: usize, hold: Duration) -> Self {
        self.subscribe_permits = permits;
        self.subscribe_throttle_ms = hold.as_millis() as u64;
        self
    }

    #[must_use]
    pub const fn with_pending_buffer_size(mut self, size: usize) -> Self {
        self.pending_buffer_size = size;
        self
    }

    #[must_use]
    pub const fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub const fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub const fn watchdog_idle(&self) -> Duration {
        Duration::from_millis(self.watchdog_idle_ms)
    }

    pub const fn subscribe_throttle(&self) -> Duration {
        Duration::from_millis(self.subscribe_throttle_ms)
    }
}

fn read_var<T: FromStr>(prefix: &str, name: &str) -> Result<Option<T>, ConfigError> {
    let key = format!("{}_{}", prefix, name);
    match env::var(&key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        Err(_) => Ok(None),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StreamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reconnect_delay(), Duration::from_secs(15));
        assert_eq!(config.watchdog_idle(), Duration::from_secs(90));
        assert_eq!(config.subscribe_permits, 4);
    }

    #[test]
    fn test_builder_setters() {
        let config = StreamConfig::new()
            .with_reconnect_delay(Duration::from_secs(2))
            .with_max_reconnect_delay(Duration::from_secs(8))
            .with_watchdog_idle(Duration::from_secs(900))
            .with_subscribe_throttle(5, Duration::from_millis(250));

        assert_eq!(config.reconnect_delay_ms, 2_000);
        assert_eq!(config.max_reconnect_delay_ms, 8_000);
        assert_eq!(config.watchdog_idle_ms, 900_000);
        assert_eq!(config.subscribe_permits, 5);
        assert_eq!(config.subscribe_throttle(), Duration::from_millis(250));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let config = StreamConfig::new()
            .with_reconnect_delay(Duration::from_secs(30))
            .with_max_reconnect_delay(Duration::from_secs(10));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_permit_pool() {
        let config = StreamConfig::new().with_subscribe_throttle(0, Duration::from_millis(100));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env_reads_prefixed_values() {
        env::set_var("FEEDWIRE_CFG_TEST_WATCHDOG_IDLE_MS", "1000");
        env::set_var("FEEDWIRE_CFG_TEST_SUBSCRIBE_PERMITS", "5");

        let config = StreamConfig::from_env("feedwire_cfg_test").unwrap();
        assert_eq!(config.watchdog_idle_ms, 1_000);
        assert_eq!(config.subscribe_permits, 5);
        assert_eq!(config.reconnect_delay_ms, 15_000);

        env::remove_var("FEEDWIRE_CFG_TEST_WATCHDOG_IDLE_MS");
        env::remove_var("FEEDWIRE_CFG_TEST_SUBSCRIBE_PERMITS");
    }

    #[test]
    fn test_from_env_rejects_malformed_value() {
        env::set_var("FEEDWIRE_BAD_TEST_RECONNECT_DELAY_MS", "soon");

        let result = StreamConfig::from_env("feedwire_bad_test");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        env::remove_var("FEEDWIRE_BAD_TEST_RECONNECT_DELAY_MS");
    }

    #[test]
    fn test_deserialize_partial_json_uses_defaults() {
        let config: StreamConfig = serde_json::from_str(r#"{"watchdog_idle_ms": 900000}"#).unwrap();
        assert_eq!(config.watchdog_idle_ms, 900_000);
        assert_eq!(config.reconnect_delay_ms, 15_000);
    }
}
