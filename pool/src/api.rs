// HTTP surface: read-only pool state plus the treasury's coinbase webhook.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

use crate::metrics::PrometheusMetrics;
use crate::payout::BalanceLedger;
use crate::service::{CoinbaseEvent, Pool};

pub struct ApiState<B: BalanceLedger + 'static> {
    pub pool: Arc<Pool<B>>,
    pub metrics: Arc<PrometheusMetrics>,
    pub start_time: i64,
}

impl<B: BalanceLedger + 'static> Clone for ApiState<B> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
        }
    }
}

impl<B: BalanceLedger + 'static> ApiState<B> {
    pub fn new(pool: Arc<Pool<B>>, metrics: Arc<PrometheusMetrics>) -> Self {
        Self {
            pool,
            metrics,
            start_time: Utc::now().timestamp(),
        }
    }
}

pub fn router<B: BalanceLedger + 'static>(state: ApiState<B>) -> Router {
    Router::new()
        .route("/health", get(api_health))
        .route("/metrics", get(api_metrics::<B>))
        .route("/miners", get(api_miners::<B>))
        .route("/stats", get(api_stats::<B>))
        .route("/coinbase", post(api_coinbase::<B>))
        .with_state(state)
}

async fn api_health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn api_metrics<B: BalanceLedger + 'static>(State(state): State<ApiState<B>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}

async fn api_miners<B: BalanceLedger + 'static>(State(state): State<ApiState<B>>) -> Json<serde_json::Value> {
    let miners = state.pool.shares().get_miners();
    Json(json!({"count": miners.len(), "miners": miners}))
}

async fn api_stats<B: BalanceLedger + 'static>(State(state): State<ApiState<B>>) -> Json<serde_json::Value> {
    let pool = &state.pool;
    let miners = pool.shares().get_miners();
    let workers: usize = miners.iter().map(|m| m.workers.len()).sum();
    let hashrate = pool.last_hashrate();

    Json(json!({
        "network": pool.settings().network,
        "pool_address": pool.settings().pool_address,
        "uptime_secs": Utc::now().timestamp() - state.start_time,
        "miners": miners.len(),
        "workers": workers,
        "pending_contributions": pool.shares().ledger().len(),
        "pool_hashrate": hashrate.pool,
        "hashrate_updated_at": hashrate.timestamp,
        "last_settlement": pool.last_settlement(),
    }))
}

async fn api_coinbase<B: BalanceLedger + 'static>(
    State(state): State<ApiState<B>>,
    Json(event): Json<CoinbaseEvent>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.pool.submit_coinbase(event).await {
        Ok(()) => {
            tracing::info!(
                "📥 Coinbase queued: reward={} fee={} sompi",
                event.miner_reward,
                event.pool_fee
            );
            (StatusCode::ACCEPTED, Json(json!({"status": "queued"})))
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "error", "message": e.to_string()})),
        ),
    }
}
