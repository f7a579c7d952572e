pub mod cache;
pub mod config;
pub mod domain;
pub mod engine;
pub mod executor;
pub mod indicators;
pub mod infrastructure;
pub mod lifecycle;
pub mod market_data;
pub mod monitor;
pub mod persistence;
pub mod sandbox;
pub mod scheduler;

pub use config::Config;
pub use engine::Engine;
