//! Exchange connectivity configuration parsed from the environment.

use std::env;

/// Binance Spot WebSocket/REST connection details plus the symbol universe
/// the aggregator (C3) and scheduler (C5) operate over.
#[derive(Debug, Clone)]
pub struct ExchangeEnvConfig {
    pub api_key: String,
    pub api_secret: String,
    pub rest_base_url: String,
    pub ws_base_url: String,
    pub symbols: Vec<String>,
}

impl Default for ExchangeEnvConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            rest_base_url: "https://api.binance.com".to_string(),
            ws_base_url: "wss://stream.binance.com:9443".to_string(),
            symbols: vec!["BTCUSDT".to_string()],
        }
    }
}

impl ExchangeEnvConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: env::var("BINANCE_API_KEY").unwrap_or_default(),
            api_secret: env::var("BINANCE_API_SECRET").unwrap_or_default(),
            rest_base_url: env::var("BINANCE_REST_BASE_URL").unwrap_or(defaults.rest_base_url),
            ws_base_url: env::var("BINANCE_WS_BASE_URL").unwrap_or(defaults.ws_base_url),
            symbols: env::var("SYMBOLS")
                .ok()
                .map(|s| s.split(',').map(|sym| sym.trim().to_uppercase()).collect())
                .unwrap_or(defaults.symbols),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_binance_production_endpoints() {
        let config = ExchangeEnvConfig::default();
        assert!(config.rest_base_url.contains("binance.com"));
        assert_eq!(config.symbols, vec!["BTCUSDT".to_string()]);
    }
}
