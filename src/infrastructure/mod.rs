pub mod circuit_breaker;
pub mod event_bus;
pub mod health;
pub mod http_client;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use event_bus::{CandleCloseBus, PositionEventBus, SignalEventBus};
pub use health::{HealthFlags, Metrics};
pub use http_client::HttpClientFactory;
