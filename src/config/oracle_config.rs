//! AI decision oracle configuration parsed from the environment.

use std::env;

#[derive(Debug, Clone)]
pub struct OracleEnvConfig {
    pub base_url: String,
    pub default_decision_budget: u32,
}

impl Default for OracleEnvConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090".to_string(),
            default_decision_budget: 5,
        }
    }
}

impl OracleEnvConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env::var("ORACLE_BASE_URL").unwrap_or(defaults.base_url),
            default_decision_budget: env::var("ORACLE_DECISION_BUDGET")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_decision_budget),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_decision_budget_is_five() {
        assert_eq!(OracleEnvConfig::default().default_decision_budget, 5);
    }
}
