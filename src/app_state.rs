// =============================================================================
// Central Application State — Paper Desk
// =============================================================================
//
// Ties the market data store, the order engine and the runtime config
// together, and holds the latest `DashboardView` computed by the control
// loop. The HTTP layer and the console only ever read through here.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for the published dashboard and the config.
//   - The store and the engine manage their own interior mutability.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::indicators::{moving_average, rsi, rsi_label};
use crate::market_data::MarketDataStore;
use crate::order_engine::OrderEngine;
use crate::persistence::HistoryStore;
use crate::runtime_config::RuntimeConfig;
use crate::types::OrderKind;

// =============================================================================
// Dashboard view
// =============================================================================

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HoldingView {
    pub symbol: String,
    pub amount: f64,
    pub average_price: f64,
    /// `amount * average_price`.
    pub investment: f64,
    pub latest_price: Option<f64>,
    pub current_value: Option<f64>,
    pub profit_loss: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PendingOrderView {
    /// 1-based, as accepted by cancel.
    pub index: usize,
    pub symbol: String,
    pub kind: OrderKind,
    pub amount: f64,
    pub limit_price: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IndicatorView {
    pub symbol: String,
    pub ready: bool,
    pub latest_price: Option<f64>,
    pub candles: usize,
    pub moving_average: Option<f64>,
    pub rsi: Option<f64>,
    pub rsi_signal: Option<&'static str>,
}

/// Portfolio valuation and per-symbol indicator readings at one instant.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DashboardView {
    pub state_version: u64,
    pub server_time: i64,
    pub cash: f64,
    pub total_investment: f64,
    pub total_current_value: f64,
    pub total_profit_loss: f64,
    pub holdings: Vec<HoldingView>,
    pub pending_orders: Vec<PendingOrderView>,
    pub last_order_price: Option<f64>,
    pub transaction_count: usize,
    pub indicators: Vec<IndicatorView>,
}

// =============================================================================
// AppState
// =============================================================================

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    /// Bumped every time the control loop publishes a new dashboard.
    pub state_version: AtomicU64,

    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub market: Arc<MarketDataStore>,
    pub engine: Arc<OrderEngine>,

    /// Append-only candle archive, when one is configured.
    pub history: Option<Arc<HistoryStore>>,

    /// Last view published by the control loop.
    pub dashboard: RwLock<DashboardView>,

    /// Instant when the desk was started. Used for uptime.
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: RuntimeConfig, market: Arc<MarketDataStore>, engine: Arc<OrderEngine>) -> Self {
        Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            market,
            engine,
            history: None,
            dashboard: RwLock::new(DashboardView::default()),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn with_history(mut self, history: Arc<HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Dashboard ───────────────────────────────────────────────────────

    /// Value the portfolio at the latest prices and read the indicators.
    ///
    /// The portfolio is cloned under its own lock first, then prices are read
    /// from the store, so the two locks are never held together here.
    pub fn build_dashboard(&self) -> DashboardView {
        let (ma_period, rsi_period) = {
            let cfg = self.runtime_config.read();
            (cfg.ma_period, cfg.rsi_period)
        };
        let portfolio = self.engine.portfolio_snapshot();
        let last_order_price = self.engine.last_order_price();

        let mut total_investment = 0.0;
        let mut total_current_value = 0.0;
        let holdings: Vec<HoldingView> = portfolio
            .holdings
            .iter()
            .map(|h| {
                let investment = h.amount * h.average_price;
                let latest_price = self.market.latest_price(&h.symbol);
                let current_value = latest_price.map(|p| h.amount * p);
                if let Some(value) = current_value {
                    total_investment += investment;
                    total_current_value += value;
                }
                HoldingView {
                    symbol: h.symbol.clone(),
                    amount: h.amount,
                    average_price: h.average_price,
                    investment,
                    latest_price,
                    current_value,
                    profit_loss: current_value.map(|v| v - investment),
                }
            })
            .collect();

        let pending_orders = portfolio
            .pending_orders
            .iter()
            .enumerate()
            .map(|(i, o)| PendingOrderView {
                index: i + 1,
                symbol: o.symbol.clone(),
                kind: o.kind,
                amount: o.amount,
                limit_price: o.limit_price,
            })
            .collect();

        let indicators = self
            .market
            .symbols()
            .into_iter()
            .map(|symbol| self.indicator_view(symbol, ma_period, rsi_period))
            .collect();

        DashboardView {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            cash: portfolio.cash,
            total_investment,
            total_current_value,
            total_profit_loss: total_current_value - total_investment,
            holdings,
            pending_orders,
            last_order_price,
            transaction_count: portfolio.transactions.len(),
            indicators,
        }
    }

    fn indicator_view(&self, symbol: String, ma_period: usize, rsi_period: usize) -> IndicatorView {
        let candles = self.market.closed_candles(&symbol);
        let last = candles.len().checked_sub(1);
        let ma = last.and_then(|i| moving_average(&candles, ma_period, i));
        let rsi_value = last.map(|i| rsi(&candles, rsi_period, i));
        IndicatorView {
            ready: self.market.is_ready(&symbol),
            latest_price: self.market.latest_price(&symbol),
            candles: candles.len(),
            moving_average: ma,
            rsi: rsi_value,
            rsi_signal: rsi_value.map(rsi_label),
            symbol,
        }
    }

    /// Replace the published dashboard and bump the version.
    pub fn publish_dashboard(&self, mut view: DashboardView) {
        view.state_version = self.increment_version() + 1;
        *self.dashboard.write() = view;
    }

    pub fn dashboard(&self) -> DashboardView {
        self.dashboard.read().clone()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("state_version", &self.current_state_version())
            .field("market", &self.market)
            .field("engine", &self.engine)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{Candle, DiscardSink};
    use crate::portfolio::Portfolio;
    use crate::types::Side;

    fn state() -> AppState {
        let market = Arc::new(MarketDataStore::new(["X", "Y"], Arc::new(DiscardSink)));
        let engine = Arc::new(OrderEngine::new(market.clone(), Portfolio::new(10_000.0)));
        AppState::new(RuntimeConfig::default(), market, engine)
    }

    #[test]
    fn dashboard_values_holdings_at_latest_price() {
        let s = state();
        s.market.append_tick("X", 100.0);
        s.engine.place_market_order(Side::Buy, "X", 10.0).unwrap();
        s.market.append_tick("X", 110.0);
        s.engine.place_limit_order(Side::Sell, "X", 5.0, 150.0).unwrap();

        let view = s.build_dashboard();
        assert_eq!(view.holdings.len(), 1);
        let h = &view.holdings[0];
        assert_eq!(h.investment, 1_000.0);
        assert_eq!(h.current_value, Some(1_100.0));
        assert_eq!(h.profit_loss, Some(100.0));
        assert_eq!(view.total_profit_loss, 100.0);
        assert_eq!(view.pending_orders[0].index, 1);
        assert_eq!(view.last_order_price, Some(100.0));
        assert_eq!(view.transaction_count, 1);
    }

    #[test]
    fn holdings_without_price_are_left_out_of_totals() {
        let s = state();
        s.market.append_tick("X", 50.0);
        s.engine.place_market_order(Side::Buy, "X", 2.0).unwrap();
        // Y never ticks; inject a holding for it directly.
        let mut p = s.engine.portfolio_snapshot();
        p.apply_buy("Y", 1.0, 10.0, 0.0, OrderKind::Buy);
        let engine = Arc::new(OrderEngine::new(s.market.clone(), p));
        let s = AppState::new(RuntimeConfig::default(), s.market.clone(), engine);

        let view = s.build_dashboard();
        assert_eq!(view.holdings.len(), 2);
        assert_eq!(view.total_investment, 100.0);
        assert_eq!(view.total_current_value, 100.0);
        let y = view.holdings.iter().find(|h| h.symbol == "Y").unwrap();
        assert_eq!(y.current_value, None);
    }

    #[test]
    fn indicators_follow_candle_history() {
        let s = state();
        assert_eq!(s.build_dashboard().indicators[0].rsi, None);
        for i in 0..20 {
            s.market.append_candle("X", Candle::flat(100.0 + i as f64));
        }
        let view = s.build_dashboard();
        let x = view.indicators.iter().find(|v| v.symbol == "X").unwrap();
        assert_eq!(x.candles, 20);
        assert_eq!(x.moving_average, Some(117.0));
        assert_eq!(x.rsi, Some(100.0));
        assert_eq!(x.rsi_signal, Some("OVERBOUGHT"));
    }

    #[test]
    fn publish_bumps_version() {
        let s = state();
        let before = s.current_state_version();
        s.publish_dashboard(s.build_dashboard());
        assert_eq!(s.current_state_version(), before + 1);
        assert_eq!(s.dashboard().state_version, before + 1);
    }
}
