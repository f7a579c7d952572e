//! Persistence gateway (C9) configuration parsed from the environment.

use std::env;

#[derive(Debug, Clone)]
pub struct StoreEnvConfig {
    pub sqlite_path: String,
}

impl Default for StoreEnvConfig {
    fn default() -> Self {
        Self { sqlite_path: "data/signalgrid.db".to_string() }
    }
}

impl StoreEnvConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self { sqlite_path: env::var("SQLITE_PATH").unwrap_or(defaults.sqlite_path) }
    }
}
