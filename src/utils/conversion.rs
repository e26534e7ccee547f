use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Parse an ISO-8601 / RFC 3339 timestamp into unix milliseconds
pub fn iso_to_millis(timestamp: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Parse fractional unix seconds (`"1534614057.321597"`) into milliseconds
pub fn seconds_to_millis(seconds: &str) -> Option<i64> {
    let seconds = Decimal::from_str(seconds).ok()?;
    (seconds * Decimal::ONE_THOUSAND).trunc().to_i64()
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Absolute and percent change from `open` to `last`, as decimal strings.
///
/// `None` when either side is missing, unparseable, or `open` is zero.
pub fn change_from_open(last: &str, open: &str) -> Option<(String, String)> {
    let last = Decimal::from_str(last).ok()?;
    let open = Decimal::from_str(open).ok()?;
    if open.is_zero() {
        return None;
    }
    let change = last - open;
    let percent = (change / open * Decimal::ONE_HUNDRED).round_dp(8).normalize();
    Some((change.normalize().to_string(), percent.to_string()))
}

/// Numeric or string JSON value as its decimal string
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Absolute value of a signed decimal string, keeping its textual form
pub fn abs_decimal_str(raw: &str) -> String {
    raw.strip_prefix('-').unwrap_or(raw).to_string()
}

/// True when best bid >= best ask. Unparseable prices never count as crossed.
pub fn is_crossed(best_bid: &str, best_ask: &str) -> bool {
    match (Decimal::from_str(best_bid), Decimal::from_str(best_ask)) {
        (Ok(bid), Ok(ask)) => bid >= ask,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_to_millis() {
        assert_eq!(
            iso_to_millis("2017-10-19T15:45:44.941Z"),
            Some(1_508_427_944_941)
        );
        assert_eq!(iso_to_millis("yesterday"), None);
    }

    #[test]
    fn test_seconds_to_millis() {
        assert_eq!(seconds_to_millis("1534614057.321597"), Some(1_534_614_057_321));
        assert_eq!(seconds_to_millis("12"), Some(12_000));
        assert_eq!(seconds_to_millis(""), None);
    }

    #[test]
    fn test_change_from_open_is_exact() {
        let (change, percent) = change_from_open("0.3", "0.1").unwrap();
        assert_eq!(change, "0.2");
        assert_eq!(percent, "200");
        assert!(change_from_open("1", "0").is_none());
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&serde_json::json!(7254.1)), Some("7254.1".to_string()));
        assert_eq!(value_to_string(&serde_json::json!("0.5")), Some("0.5".to_string()));
        assert_eq!(value_to_string(&serde_json::json!(null)), None);
    }

    #[test]
    fn test_abs_and_crossed() {
        assert_eq!(abs_decimal_str("-0.25"), "0.25");
        assert_eq!(abs_decimal_str("3"), "3");
        assert!(is_crossed("101.0", "100.5"));
        assert!(is_crossed("100", "100.0"));
        assert!(!is_crossed("99.9", "100"));
        assert!(!is_crossed("n/a", "100"));
    }
}
