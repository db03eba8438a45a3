// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. The desk is single-user and local, so
// there is no authentication layer. Order rejections come back as 422 with
// the same message the console prints.
//
// CORS is configured permissively for development.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::error::TradeError;
use crate::indicators::{moving_average_series, rsi_series};
use crate::market_data::Candle;
use crate::order_engine::PlacedOrder;
use crate::portfolio::Transaction;
use crate::types::OrderKind;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/symbols", get(symbols))
        .route("/api/v1/market/:symbol", get(market))
        .route("/api/v1/market/:symbol/history", get(candle_history))
        .route("/api/v1/portfolio", get(portfolio))
        .route("/api/v1/transactions", get(transactions))
        .route("/api/v1/orders", post(place_order))
        .route("/api/v1/orders/pending/:index", delete(cancel_order))
        .layer(cors)
        .with_state(state)
}

/// 422 body for a refused order.
#[derive(Debug, Serialize, Deserialize)]
struct ErrorBody {
    error: String,
    message: String,
}

fn rejection(err: TradeError) -> Response {
    warn!(code = err.code(), error = %err, "request rejected");
    let body = ErrorBody {
        error: err.code().to_string(),
        message: err.to_string(),
    };
    (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
}

// =============================================================================
// Health
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    state_version: u64,
    server_time: i64,
    uptime_secs: u64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok".into(),
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    };
    Json(resp)
}

// =============================================================================
// Market
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct SymbolInfo {
    symbol: String,
    ready: bool,
    latest_price: Option<f64>,
    ticks: usize,
    candles: usize,
    initial_price: Option<f64>,
    volatility: Option<f64>,
}

async fn symbols(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.runtime_config.read().clone();
    let list: Vec<SymbolInfo> = state
        .market
        .symbols()
        .into_iter()
        .map(|symbol| {
            let params = config.params(&symbol);
            SymbolInfo {
                ready: state.market.is_ready(&symbol),
                latest_price: state.market.latest_price(&symbol),
                ticks: state.market.tick_count(&symbol),
                candles: state.market.candle_count(&symbol),
                initial_price: params.map(|p| p.initial_price),
                volatility: params.map(|p| p.volatility),
                symbol,
            }
        })
        .collect();
    Json(list)
}

#[derive(Debug, Deserialize)]
struct MarketQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MarketResponse {
    symbol: String,
    ready: bool,
    latest_price: Option<f64>,
    ticks: Vec<f64>,
    candles: Vec<Candle>,
    moving_average: Vec<Option<f64>>,
    rsi: Vec<f64>,
}

const DEFAULT_MARKET_LIMIT: usize = 100;

async fn market(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<MarketQuery>,
) -> Response {
    let symbol = symbol.to_uppercase();
    let limit = query.limit.unwrap_or(DEFAULT_MARKET_LIMIT);
    let (ma_period, rsi_period) = {
        let cfg = state.runtime_config.read();
        (cfg.ma_period, cfg.rsi_period)
    };

    // The oldest returned candle still needs `lookback` earlier candles for
    // its MA and RSI, so fetch those too and drop them after computing.
    let lookback = ma_period.saturating_sub(1).max(rsi_period);
    let Some(snap) = state
        .market
        .snapshot_tail(&symbol, limit, limit.saturating_add(lookback))
    else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "UnknownSymbol", "message": format!("unknown symbol {symbol}") })),
        )
            .into_response();
    };

    let ma = moving_average_series(&snap.candles, ma_period);
    let rsi = rsi_series(&snap.candles, rsi_period);
    let candle_start = snap.candles.len().saturating_sub(limit);

    Json(MarketResponse {
        ready: state.market.is_ready(&symbol),
        latest_price: snap
            .ticks
            .last()
            .copied()
            .or_else(|| state.market.latest_price(&symbol)),
        candles: snap.candles[candle_start..].to_vec(),
        moving_average: ma[candle_start..].to_vec(),
        rsi: rsi[candle_start..].to_vec(),
        ticks: snap.ticks,
        symbol,
    })
    .into_response()
}

/// Every candle ever archived for a symbol, across restarts.
async fn candle_history(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Response {
    let symbol = symbol.to_uppercase();
    let Some(history) = state.history.as_ref() else {
        return Json(Vec::<Candle>::new()).into_response();
    };
    match history.read_candle_history(&symbol) {
        Ok(candles) => Json(candles).into_response(),
        Err(e) => rejection(e),
    }
}

// =============================================================================
// Portfolio
// =============================================================================

async fn portfolio(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.dashboard())
}

async fn transactions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.transactions())
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct OrderRequest {
    kind: OrderKind,
    symbol: String,
    amount: f64,
    #[serde(default)]
    limit_price: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum OrderResponse {
    Executed { transaction: Transaction },
    Placed(PlacedOrder),
}

async fn place_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OrderRequest>,
) -> Response {
    let symbol = req.symbol.to_uppercase();
    let side = req.kind.side();
    let result = if req.kind.is_limit() {
        state
            .engine
            .place_limit_order(side, &symbol, req.amount, req.limit_price.unwrap_or(f64::NAN))
            .map(OrderResponse::Placed)
    } else {
        state
            .engine
            .place_market_order(side, &symbol, req.amount)
            .map(|transaction| OrderResponse::Executed { transaction })
    };

    match result {
        Ok(resp) => {
            info!(symbol = %symbol, kind = %req.kind, "order accepted via API");
            state.increment_version();
            Json(resp).into_response()
        }
        Err(e) => rejection(e),
    }
}

async fn cancel_order(State(state): State<Arc<AppState>>, Path(index): Path<usize>) -> Response {
    match state.engine.cancel_pending_order(index) {
        Ok(order) => {
            state.increment_version();
            Json(serde_json::json!({ "status": "cancelled", "index": index, "order": order }))
                .into_response()
        }
        Err(e) => rejection(e),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::market_data::{DiscardSink, MarketDataStore};
    use crate::order_engine::OrderEngine;
    use crate::portfolio::Portfolio;
    use crate::runtime_config::RuntimeConfig;

    fn test_state() -> Arc<AppState> {
        let market = Arc::new(MarketDataStore::new(["RELYCORP", "TECHSOL"], Arc::new(DiscardSink)));
        for i in 0..30 {
            market.record_step(
                "RELYCORP",
                100.0 + i as f64,
                (i % 10 == 9).then(|| Candle::flat(100.0 + i as f64)),
            );
        }
        market.mark_ready("RELYCORP");
        let engine = Arc::new(OrderEngine::new(market.clone(), Portfolio::new(1_000.0)));
        Arc::new(AppState::new(RuntimeConfig::default(), market, engine))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_order(json: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/orders")
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let health: HealthResponse =
            serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(health.status, "ok");
    }

    #[tokio::test]
    async fn symbols_report_readiness() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/api/v1/symbols").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let list: Vec<SymbolInfo> = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(list.len(), 2);
        assert!(list[0].ready);
        assert_eq!(list[0].latest_price, Some(129.0));
        assert_eq!((list[0].ticks, list[0].candles), (30, 3));
        assert!(!list[1].ready);
        assert_eq!(list[1].latest_price, None);
    }

    #[tokio::test]
    async fn market_returns_tail_with_aligned_indicators() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/market/relycorp?limit=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let m: MarketResponse = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(m.ticks, vec![128.0, 129.0]);
        assert_eq!(m.candles.len(), 2);
        assert_eq!(m.moving_average.len(), 2);
        assert_eq!(m.rsi.len(), 2);
    }

    #[tokio::test]
    async fn market_tail_indicators_match_full_history() {
        let market = Arc::new(MarketDataStore::new(["TECHSOL"], Arc::new(DiscardSink)));
        for i in 0..300 {
            let price = 100.0 + ((i * 7) % 13) as f64;
            market.record_step("TECHSOL", price, Some(Candle::flat(price)));
        }
        let engine = Arc::new(OrderEngine::new(market.clone(), Portfolio::new(1_000.0)));
        let state = Arc::new(AppState::new(RuntimeConfig::default(), market.clone(), engine));

        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/market/TECHSOL?limit=3")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let m: MarketResponse = serde_json::from_value(body_json(response).await).unwrap();

        let all = market.closed_candles("TECHSOL");
        let cfg = RuntimeConfig::default();
        let ma = moving_average_series(&all, cfg.ma_period);
        let rsi = rsi_series(&all, cfg.rsi_period);
        assert_eq!(m.ticks.len(), 3);
        assert_eq!(m.candles, all[297..].to_vec());
        assert_eq!(m.moving_average, ma[297..].to_vec());
        assert_eq!(m.rsi, rsi[297..].to_vec());
        assert!(m.moving_average.iter().all(Option::is_some));
    }

    #[tokio::test]
    async fn market_unknown_symbol_is_404() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/api/v1/market/NOPE").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn candle_history_reads_the_archive() {
        use crate::market_data::CandleSink;
        use crate::persistence::HistoryStore;

        let dir = std::env::temp_dir().join(format!("paper-desk-api-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let history = Arc::new(HistoryStore::new(&dir));
        history.append_candle("RELYCORP", &Candle::flat(42.0)).unwrap();

        let base = test_state();
        let state = Arc::new(
            AppState::new(RuntimeConfig::default(), base.market.clone(), base.engine.clone())
                .with_history(history),
        );
        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/market/RELYCORP/history")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let candles: Vec<Candle> = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(candles, vec![Candle::flat(42.0)]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn market_order_executes() {
        let state = test_state();
        let response = router(state.clone())
            .oneshot(post_order(r#"{"kind":"Buy","symbol":"RELYCORP","amount":2}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "executed");
        assert_eq!(body["transaction"]["price"], 129.0);
        assert_eq!(state.engine.transactions().len(), 1);
    }

    #[tokio::test]
    async fn rejected_order_is_422_with_reason() {
        let response = router(test_state())
            .oneshot(post_order(r#"{"kind":"Buy","symbol":"RELYCORP","amount":100}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: ErrorBody = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(body.error, "InsufficientFunds");
        assert!(body.message.contains("RELYCORP"));

        let response = router(test_state())
            .oneshot(post_order(r#"{"kind":"LimitBuy","symbol":"RELYCORP","amount":1}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn limit_order_placed_then_cancelled() {
        let state = test_state();
        let response = router(state.clone())
            .oneshot(post_order(
                r#"{"kind":"LimitBuy","symbol":"RELYCORP","amount":1,"limit_price":120}"#,
            ))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["status"], "placed");
        assert_eq!(body["position"], 1);

        let cancel = |i: usize| {
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/v1/orders/pending/{i}"))
                .body(Body::empty())
                .unwrap()
        };
        let response = router(state.clone()).oneshot(cancel(1)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = router(state.clone()).oneshot(cancel(1)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(state.engine.pending_orders().is_empty());
    }
}
