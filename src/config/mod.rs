//! Process configuration (§10.3): one sub-config per external concern,
//! composed into a single [`Config`] loaded once at startup.

mod exchange_config;
mod observability_config;
mod oracle_config;
mod store_config;
mod trading_config;

pub use exchange_config::ExchangeEnvConfig;
pub use observability_config::ObservabilityEnvConfig;
pub use oracle_config::OracleEnvConfig;
pub use store_config::StoreEnvConfig;
pub use trading_config::{ExecutionMode, TradingEnvConfig};

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct Config {
    pub exchange: ExchangeEnvConfig,
    pub oracle: OracleEnvConfig,
    pub store: StoreEnvConfig,
    pub trading: TradingEnvConfig,
    pub observability: ObservabilityEnvConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            exchange: ExchangeEnvConfig::from_env(),
            oracle: OracleEnvConfig::from_env(),
            store: StoreEnvConfig::from_env(),
            trading: TradingEnvConfig::from_env()?,
            observability: ObservabilityEnvConfig::from_env(),
        })
    }
}
