// =============================================================================
// Control loop — once per simulated second
// =============================================================================
//
//   1. Sweep pending limit orders against the latest ticks.
//   2. Rebuild the dashboard view and publish it.
//
// Runs until the stop token fires. A sweep in progress always finishes.
// =============================================================================

use std::sync::Arc;

use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::app_state::AppState;

/// One pass of the loop. Returns the number of limit orders filled.
pub fn control_tick(state: &AppState) -> usize {
    let fills = state.engine.sweep_pending_orders();
    for tx in &fills {
        info!(
            symbol = %tx.symbol,
            kind = %tx.kind,
            amount = tx.amount,
            price = tx.price,
            fee = tx.broker_fee,
            "pending order filled"
        );
    }
    state.publish_dashboard(state.build_dashboard());
    fills.len()
}

pub async fn run_control_loop(state: Arc<AppState>, token: CancellationToken) {
    let tick_millis = state.runtime_config.read().simulation.tick_millis.max(1);
    let mut interval = tokio::time::interval(Duration::from_millis(tick_millis));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(tick_millis, "control loop starting");

    let mut filled_total = 0usize;
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                filled_total += control_tick(&state);
                debug!(version = state.current_state_version(), "dashboard published");
            }
        }
    }

    info!(filled_total, "control loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{DiscardSink, MarketDataStore};
    use crate::order_engine::OrderEngine;
    use crate::portfolio::Portfolio;
    use crate::runtime_config::RuntimeConfig;
    use crate::types::Side;

    fn state() -> Arc<AppState> {
        let market = Arc::new(MarketDataStore::new(["X"], Arc::new(DiscardSink)));
        let engine = Arc::new(OrderEngine::new(market.clone(), Portfolio::new(1_000.0)));
        let mut cfg = RuntimeConfig::default();
        cfg.simulation.tick_millis = 5;
        Arc::new(AppState::new(cfg, market, engine))
    }

    #[test]
    fn tick_fills_crossed_orders_and_publishes() {
        let s = state();
        s.market.append_tick("X", 100.0);
        s.engine.place_limit_order(Side::Buy, "X", 2.0, 90.0).unwrap();

        assert_eq!(control_tick(&s), 0);
        assert_eq!(s.dashboard().pending_orders.len(), 1);

        s.market.append_tick("X", 85.0);
        assert_eq!(control_tick(&s), 1);
        let view = s.dashboard();
        assert!(view.pending_orders.is_empty());
        assert_eq!(view.holdings[0].amount, 2.0);
        assert_eq!(view.last_order_price, Some(85.0));
    }

    #[tokio::test]
    async fn loop_publishes_until_cancelled() {
        let s = state();
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_control_loop(s.clone(), token.clone()));
        tokio::time::sleep(Duration::from_millis(40)).await;
        token.cancel();
        handle.await.unwrap();

        let version = s.current_state_version();
        assert!(version > 2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(s.current_state_version(), version);
    }
}
