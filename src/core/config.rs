use serde::{Deserialize, Serialize};

use crate::core::currency::CurrencyCode;

/// Engine-wide settlement parameters.
///
/// Every field has a working default, and a config file may set any
/// subset; missing fields fall back to the defaults below.
///
/// # Examples
///
/// ```
/// use settlement_engine::core::config::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert_eq!(config.settlement_cycle_days, 2);
/// assert_eq!(config.max_retry, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Business-day offset from trade date to contractual settlement
    /// date (T+n). Calendar days; holiday adjustment happens upstream.
    pub settlement_cycle_days: u32,
    /// Maximum number of retry attempts per instruction.
    pub max_retry: u32,
    /// Maximum instructions fetched per batch or netting pass.
    pub batch_size: usize,
    /// Currency FX exposure is measured against.
    pub base_currency: CurrencyCode,
    /// Wall-clock budget for one engine operation (a batch run, a
    /// netting pass, a single settlement). `None` disables deadlines.
    pub operation_timeout_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settlement_cycle_days: 2,
            max_retry: 3,
            batch_size: 100,
            base_currency: CurrencyCode::new("USD"),
            operation_timeout_secs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.settlement_cycle_days, 2);
        assert_eq!(config.max_retry, 3);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.base_currency, CurrencyCode::new("USD"));
        assert_eq!(config.operation_timeout_secs, None);
    }

    #[test]
    fn test_partial_config_file_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"max_retry": 5}"#).unwrap();
        assert_eq!(config.max_retry, 5);
        assert_eq!(config.settlement_cycle_days, 2);
        assert_eq!(config.base_currency, CurrencyCode::new("USD"));
    }
}
