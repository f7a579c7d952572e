//! HTTP client for the external AI decision oracle (§6): a circuit-breaker
//! wrapped POST with a 30s timeout and a single retry on transport error,
//! whose reply is parsed tolerantly — either as the documented JSON body
//! or, failing that, as free prose with labelled lines.

use crate::domain::errors::LifecycleError;
use crate::domain::{Decision, DecisionKind, SignalLifecycle, TradePlan};
use crate::infrastructure::{CircuitBreaker, CircuitBreakerError, HttpClientFactory};
use crate::indicators::ComputedIndicators;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const ORACLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct OracleRequest<'a> {
    strategy_instructions: &'a str,
    signal: &'a SignalLifecycle,
    candle_history: &'a serde_json::Value,
    indicators: serde_json::Value,
    previous_decisions: &'a [Decision],
    decision_count: u32,
    decision_budget: u32,
}

#[derive(serde::Deserialize)]
struct OracleResponseJson {
    decision: String,
    confidence: Option<f64>,
    reasoning: Option<String>,
    trade_plan: Option<TradePlan>,
}

pub struct OracleClient {
    http: ClientWithMiddleware,
    circuit: CircuitBreaker,
    base_url: String,
}

impl OracleClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: HttpClientFactory::create_client(ORACLE_TIMEOUT),
            circuit: CircuitBreaker::new("ai-oracle", 5, 2, Duration::from_secs(30)),
            base_url: base_url.into(),
        }
    }

    /// Calls the oracle once, retrying a single time on transport error, and
    /// parses the reply into a `Decision`. Never blocks past ~60s total
    /// (two attempts at the 30s timeout) before surfacing
    /// `LifecycleError::OracleUnavailable`.
    pub async fn decide(
        &self,
        signal: &SignalLifecycle,
        strategy_instructions: &str,
        candle_history: &serde_json::Value,
        indicators: &ComputedIndicators,
        previous_decisions: &[Decision],
        candle_time: i64,
    ) -> Result<Decision, LifecycleError> {
        let request = OracleRequest {
            strategy_instructions,
            signal,
            candle_history,
            indicators: indicators.to_json(),
            previous_decisions,
            decision_count: signal.decision_count,
            decision_budget: signal.decision_budget,
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.call_once(&request).await {
                Ok(body) => return Ok(parse_decision(&body, signal.id, candle_time)),
                Err(e) if attempts < 2 => {
                    warn!(signal_id = %signal.id, error = %e, "oracle call failed, retrying once");
                }
                Err(e) => return Err(LifecycleError::OracleUnavailable(e.to_string())),
            }
        }
    }

    async fn call_once(&self, request: &OracleRequest<'_>) -> Result<String, String> {
        let url = format!("{}/decide", self.base_url.trim_end_matches('/'));
        let http = &self.http;
        let result = self
            .circuit
            .call(async {
                let response = http
                    .post(&url)
                    .json(request)
                    .send()
                    .await
                    .map_err(|e| e.to_string())?;
                response.text().await.map_err(|e| e.to_string())
            })
            .await;

        match result {
            Ok(body) => Ok(body),
            Err(CircuitBreakerError::Open(msg)) => Err(msg),
            Err(CircuitBreakerError::Inner(msg)) => Err(msg),
        }
    }
}

/// Tolerant parser for the oracle's reply: tries the documented JSON shape
/// first, then falls back to scanning labelled lines out of free prose.
/// Missing labels default to `continue` at confidence `0.5`, per §4.6.
fn parse_decision(body: &str, signal_id: uuid::Uuid, candle_time: i64) -> Decision {
    if let Ok(json) = serde_json::from_str::<OracleResponseJson>(body) {
        return Decision {
            signal_id,
            timestamp: candle_time,
            candle_time,
            kind: DecisionKind::from_label(&json.decision).unwrap_or(DecisionKind::Continue),
            confidence: json.confidence.unwrap_or(0.5),
            reasoning: json.reasoning.unwrap_or_default(),
            trade_plan: json.trade_plan,
        };
    }

    let mut kind = DecisionKind::Continue;
    let mut confidence = 0.5;
    let mut reasoning = String::new();
    let mut entry = None;
    let mut stop_loss = None;
    let mut take_profit = None;

    for line in body.lines() {
        let Some((label, value)) = line.split_once(':') else { continue };
        let value = value.trim();
        match label.trim().to_ascii_uppercase().as_str() {
            "DECISION" => {
                if let Some(k) = DecisionKind::from_label(value) {
                    kind = k;
                }
            }
            "CONFIDENCE" => {
                if let Ok(v) = value.parse::<f64>() {
                    confidence = v;
                }
            }
            "ENTRY" => entry = Decimal::from_str(value).ok(),
            "STOP_LOSS" => stop_loss = Decimal::from_str(value).ok(),
            "TAKE_PROFIT" => take_profit = Decimal::from_str(value).ok(),
            "REASONING" => reasoning = value.to_string(),
            _ => {}
        }
    }

    let trade_plan = if entry.is_some() || stop_loss.is_some() || take_profit.is_some() {
        Some(TradePlan { entry, stop_loss, take_profit, position_size: None })
    } else {
        None
    };

    Decision {
        signal_id,
        timestamp: candle_time,
        candle_time,
        kind,
        confidence,
        reasoning,
        trade_plan,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_labelled_prose_tolerantly() {
        let body = "Here is my analysis.\nDECISION: ENTER\nCONFIDENCE: 0.8\nENTRY: 50000\nSTOP_LOSS: 49000\nTAKE_PROFIT: 52000\n";
        let decision = parse_decision(body, uuid::Uuid::new_v4(), 1_000);
        assert_eq!(decision.kind, DecisionKind::Enter);
        assert_eq!(decision.confidence, 0.8);
        let plan = decision.trade_plan.unwrap();
        assert_eq!(plan.entry.unwrap().to_string(), "50000");
        assert_eq!(plan.stop_loss.unwrap().to_string(), "49000");
    }

    #[test]
    fn missing_labels_default_to_continue_and_half_confidence() {
        let decision = parse_decision("no labels here", uuid::Uuid::new_v4(), 1_000);
        assert_eq!(decision.kind, DecisionKind::Continue);
        assert_eq!(decision.confidence, 0.5);
    }

    #[test]
    fn parses_strict_json_body() {
        let body = r#"{"decision":"abandon","confidence":0.9,"reasoning":"dead setup"}"#;
        let decision = parse_decision(body, uuid::Uuid::new_v4(), 1_000);
        assert_eq!(decision.kind, DecisionKind::Abandon);
        assert_eq!(decision.reasoning, "dead setup");
    }
}
