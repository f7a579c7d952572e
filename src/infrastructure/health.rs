//! Process endpoints (§4 process endpoints, §10.5): a small `axum` server
//! exposing health, Prometheus metrics, a strategy-reload trigger and a
//! graceful-shutdown trigger. Runs alongside the engine on its own port;
//! unrelated to the exchange WebSocket or REST surfaces.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Engine-wide counters scraped by `/metrics`. Each field mirrors one of
/// the numbers §10.5 asks the health surface to expose.
pub struct Metrics {
    registry: Registry,
    pub candles_processed: IntCounter,
    pub signals_emitted: IntCounter,
    pub decisions_made: IntCounter,
    pub positions_open: IntGauge,
    pub errors_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        let registry = Registry::new();

        let candles_processed = IntCounter::new("signalgrid_candles_processed_total", "Closed candles ingested").unwrap();
        let signals_emitted = IntCounter::new("signalgrid_signals_emitted_total", "Signals created by the scheduler").unwrap();
        let decisions_made = IntCounter::new("signalgrid_decisions_made_total", "Oracle decisions recorded").unwrap();
        let positions_open = IntGauge::new("signalgrid_positions_open", "Currently open positions").unwrap();
        let errors_total = IntCounter::new("signalgrid_errors_total", "Errors across all components").unwrap();

        for collector in [
            Box::new(candles_processed.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(signals_emitted.clone()),
            Box::new(decisions_made.clone()),
            Box::new(positions_open.clone()),
            Box::new(errors_total.clone()),
        ] {
            registry.register(collector).expect("metric names are unique and registered once");
        }

        Arc::new(Self { registry, candles_processed, signals_emitted, decisions_made, positions_open, errors_total })
    }

    fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer).expect("prometheus text encoding cannot fail");
        String::from_utf8(buffer).expect("prometheus text output is always valid utf-8")
    }
}

/// Flipped by the aggregator and persistence gateway as connectivity
/// changes; read by `/health` without touching either subsystem directly.
#[derive(Clone, Default)]
pub struct HealthFlags {
    ws_connected: Arc<AtomicBool>,
    store_reachable: Arc<AtomicBool>,
}

impl HealthFlags {
    pub fn new() -> Self {
        Self {
            ws_connected: Arc::new(AtomicBool::new(false)),
            store_reachable: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_ws_connected(&self, connected: bool) {
        self.ws_connected.store(connected, Ordering::Relaxed);
    }

    pub fn set_store_reachable(&self, reachable: bool) {
        self.store_reachable.store(reachable, Ordering::Relaxed);
    }

    fn is_healthy(&self) -> bool {
        self.ws_connected.load(Ordering::Relaxed) && self.store_reachable.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
struct AppState {
    flags: HealthFlags,
    metrics: Arc<Metrics>,
    reload_tx: mpsc::Sender<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Builds and serves the process endpoints on `bind_address:port` until
/// the shutdown signal fires. `reload_tx` wakes the scheduler's strategy
/// reload; `shutdown_tx` is the same watch channel every long-running
/// task subscribes to for graceful cancellation (§5).
pub async fn serve(
    bind_address: &str,
    port: u16,
    flags: HealthFlags,
    metrics: Arc<Metrics>,
    reload_tx: mpsc::Sender<()>,
    shutdown_tx: watch::Sender<bool>,
) -> anyhow::Result<()> {
    let state = AppState { flags, metrics, reload_tx, shutdown_tx };

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/reload-strategies", post(reload_handler))
        .route("/shutdown", post(shutdown_handler))
        .with_state(state);

    let addr: SocketAddr = format!("{bind_address}:{port}").parse()?;
    info!(%addr, "process endpoints listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.flags.is_healthy() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    }
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, state.metrics.encode())
}

async fn reload_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.reload_tx.send(()).await {
        Ok(()) => (StatusCode::ACCEPTED, "reload triggered"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "scheduler not listening"),
    }
}

async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    let _ = state.shutdown_tx.send(true);
    (StatusCode::ACCEPTED, "shutdown initiated")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_flags_require_both_ws_and_store_to_be_healthy() {
        let flags = HealthFlags::new();
        flags.set_ws_connected(true);
        flags.set_store_reachable(true);
        assert!(flags.is_healthy());

        flags.set_ws_connected(false);
        assert!(!flags.is_healthy());
    }

    #[test]
    fn metrics_encode_without_panicking() {
        let metrics = Metrics::new();
        metrics.candles_processed.inc();
        metrics.positions_open.set(3);
        let body = metrics.encode();
        assert!(body.contains("signalgrid_candles_processed_total"));
        assert!(body.contains("signalgrid_positions_open"));
    }
}
