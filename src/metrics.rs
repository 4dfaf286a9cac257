//! Prometheus counters for the round lifecycle

use crate::errors::{BingoError, BingoResult};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

pub struct GameMetrics {
    registry: Registry,
    pub rounds_opened: IntCounter,
    pub rounds_finished: IntCounter,
    pub rounds_aborted: IntCounter,
    pub cards_sold: IntCounter,
    pub numbers_drawn: IntCounter,
    pub claims_valid: IntCounter,
    pub claims_invalid: IntCounter,
    /// Individual player refunds credited
    pub refunds_issued: IntCounter,
    pub live_rounds: IntGauge,
    pub connected_sockets: IntGauge,
}

fn counter(registry: &Registry, name: &str, help: &str) -> BingoResult<IntCounter> {
    let counter = IntCounter::new(name, help).map_err(metrics_error)?;
    registry.register(Box::new(counter.clone())).map_err(metrics_error)?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> BingoResult<IntGauge> {
    let gauge = IntGauge::new(name, help).map_err(metrics_error)?;
    registry.register(Box::new(gauge.clone())).map_err(metrics_error)?;
    Ok(gauge)
}

fn metrics_error(e: prometheus::Error) -> BingoError {
    BingoError::Configuration(format!("metrics: {}", e))
}

impl GameMetrics {
    pub fn new() -> BingoResult<Self> {
        let registry = Registry::new_custom(Some("bingo".to_string()), None).map_err(metrics_error)?;
        Ok(Self {
            rounds_opened: counter(&registry, "rounds_opened_total", "Rounds created")?,
            rounds_finished: counter(&registry, "rounds_finished_total", "Rounds that ended normally")?,
            rounds_aborted: counter(&registry, "rounds_aborted_total", "Rounds aborted with refunds")?,
            cards_sold: counter(&registry, "cards_sold_total", "Card purchases committed")?,
            numbers_drawn: counter(&registry, "numbers_drawn_total", "Numbers drawn across all rounds")?,
            claims_valid: counter(&registry, "claims_valid_total", "Accepted bingo claims")?,
            claims_invalid: counter(&registry, "claims_invalid_total", "Rejected bingo claims")?,
            refunds_issued: counter(&registry, "refunds_issued_total", "Player refunds credited")?,
            live_rounds: gauge(&registry, "live_rounds", "Rounds currently pending or active")?,
            connected_sockets: gauge(&registry, "connected_sockets", "Open WebSocket connections")?,
            registry,
        })
    }

    /// Text exposition format for `GET /metrics`
    pub fn render(&self) -> BingoResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| BingoError::Configuration(format!("metrics: {}", e)))
    }
}
