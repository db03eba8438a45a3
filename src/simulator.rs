// =============================================================================
// Price Simulator — one geometric random walk per catalog symbol
// =============================================================================
//
// Per simulated second:
//   1. Draw z ~ N(0, 1) from the symbol's own seeded generator.
//   2. change = volatility * sqrt(dt) * z / 100, clamped to ±max_change.
//   3. price  = max(price * exp(change), price_floor).
//   4. Record the tick; every `candle_interval` ticks a candle closes and is
//      recorded (and persisted) together with its closing tick.
//
// Two phases share that step:
//   Warm-up — runs back to back, without waiting, until the symbol holds
//             `warmup_candles` candles. The symbol is then marked ready.
//   Live    — one step per `tick_millis`, until the stop token fires. The
//             token is only observed between steps, so a step in flight is
//             always completed.
//
// The generator is seeded from a stable hash of the symbol name, so a given
// symbol replays the same draw sequence on every run.
// =============================================================================

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::market_data::{Candle, CandleBuilder, MarketDataStore};
use crate::runtime_config::{RuntimeConfig, SimulationParams, SymbolParams};

/// FNV-1a over the symbol bytes. Stable across toolchains and platforms,
/// unlike `DefaultHasher`.
pub fn symbol_seed(symbol: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    symbol
        .bytes()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(b)).wrapping_mul(PRIME))
}

pub struct PriceSimulator {
    symbol: String,
    params: SymbolParams,
    sim: SimulationParams,
    price: f64,
    rng: StdRng,
    builder: CandleBuilder,
    store: Arc<MarketDataStore>,
}

impl PriceSimulator {
    /// Build a simulator for `symbol`. When the store already holds ticks for
    /// it (restored history), the walk resumes from the last one.
    pub fn new(
        symbol: impl Into<String>,
        params: SymbolParams,
        sim: SimulationParams,
        store: Arc<MarketDataStore>,
    ) -> Self {
        let symbol = symbol.into();
        let price = store
            .latest_price(&symbol)
            .unwrap_or(params.initial_price)
            .max(sim.price_floor);
        Self {
            rng: StdRng::seed_from_u64(symbol_seed(&symbol)),
            builder: CandleBuilder::new(sim.candle_interval, price),
            symbol,
            params,
            sim,
            price,
            store,
        }
    }

    /// Price of the most recent step.
    #[cfg(test)]
    pub fn price(&self) -> f64 {
        self.price
    }

    /// Advance the walk by one step without recording anything.
    fn next_price(&mut self) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        let change = (self.params.volatility * self.sim.dt.sqrt() * z / 100.0)
            .clamp(-self.sim.max_change, self.sim.max_change);
        self.price = (self.price * change.exp()).max(self.sim.price_floor);
        self.price
    }

    /// One simulated second. Returns the candle it closed, if any.
    pub fn step(&mut self) -> Option<Candle> {
        let price = self.next_price();
        let closed = self.builder.push(price);
        self.store.record_step(&self.symbol, price, closed);
        closed
    }

    /// Simulated seconds still needed before the symbol holds
    /// `warmup_candles` candles.
    pub fn warmup_steps(&self) -> usize {
        let have = self.store.candle_count(&self.symbol);
        self.sim.warmup_candles.saturating_sub(have) * self.builder.interval()
    }

    /// Run the warm-up phase back to back and return the number of steps taken.
    pub fn warm_up(&mut self) -> usize {
        let steps = self.warmup_steps();
        for _ in 0..steps {
            self.step();
        }
        steps
    }

    /// Warm up, report ready, then step once per simulated second until
    /// `token` is cancelled.
    pub async fn run(mut self, token: CancellationToken, ready: mpsc::Sender<String>) {
        let steps = self.warm_up();
        self.store.mark_ready(&self.symbol);
        info!(
            symbol = %self.symbol,
            warmup_steps = steps,
            price = self.price,
            candles = self.store.candle_count(&self.symbol),
            "price simulator ready"
        );
        if ready.send(self.symbol.clone()).await.is_err() {
            debug!(symbol = %self.symbol, "nobody waiting for readiness");
        }

        let mut ticker = tokio::time::interval(Duration::from_millis(self.sim.tick_millis.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick of an interval completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Some(candle) = self.step() {
                        debug!(symbol = %self.symbol, close = candle.close, "live candle closed");
                    }
                }
            }
        }

        info!(symbol = %self.symbol, last_price = self.price, "price simulator stopped");
    }
}

impl std::fmt::Debug for PriceSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceSimulator")
            .field("symbol", &self.symbol)
            .field("price", &self.price)
            .field("pending_ticks", &self.builder.pending_ticks())
            .finish()
    }
}

/// Spawn one simulator task per catalog symbol. Each gets a child of `token`.
pub fn spawn_simulators(
    config: &RuntimeConfig,
    store: &Arc<MarketDataStore>,
    token: &CancellationToken,
    ready: &mpsc::Sender<String>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(config.catalog.len());
    for (symbol, params) in &config.catalog {
        if params.initial_price <= 0.0 {
            warn!(symbol = %symbol, initial_price = params.initial_price, "non-positive initial price; the price floor applies");
        }
        let sim = PriceSimulator::new(
            symbol.clone(),
            *params,
            config.simulation.clone(),
            store.clone(),
        );
        handles.push(tokio::spawn(sim.run(token.child_token(), ready.clone())));
    }
    info!(count = handles.len(), "price simulators launched");
    handles
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
