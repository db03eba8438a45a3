use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::TradeError;
use crate::market_data::candle::Candle;

// ---------------------------------------------------------------------------
// Persistence boundary
// ---------------------------------------------------------------------------

/// Durable append-only storage for closed candles.
///
/// Called after the data lock has been released. A failure is logged by the
/// store and the in-memory series stays authoritative.
pub trait CandleSink: Send + Sync {
    fn append_candle(&self, symbol: &str, candle: &Candle) -> Result<(), TradeError>;
}

/// Sink that drops every candle. Used when candle history is disabled.
#[derive(Debug, Default)]
pub struct DiscardSink;

impl CandleSink for DiscardSink {
    fn append_candle(&self, _symbol: &str, _candle: &Candle) -> Result<(), TradeError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SymbolSeries {
    ticks: Vec<f64>,
    candles: Vec<Candle>,
    ready: bool,
}

/// Point-in-time copy of one symbol's history, taken in a single critical
/// section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub ticks: Vec<f64>,
    pub candles: Vec<Candle>,
}

// ---------------------------------------------------------------------------
// MarketDataStore
// ---------------------------------------------------------------------------

/// Tick and candle history for every catalog symbol.
///
/// One `parking_lot::Mutex` (the data lock) guards all symbols. Each symbol's
/// price simulator is its only writer; history is append-only and no method
/// removes a tick or a candle.
pub struct MarketDataStore {
    series: Mutex<HashMap<String, SymbolSeries>>,
    sink: Arc<dyn CandleSink>,
}

impl MarketDataStore {
    /// Create empty series for every symbol in `symbols`.
    pub fn new<I, S>(symbols: I, sink: Arc<dyn CandleSink>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let series = symbols
            .into_iter()
            .map(|s| (s.into(), SymbolSeries::default()))
            .collect();
        Self {
            series: Mutex::new(series),
            sink,
        }
    }

    /// Pre-populate a symbol from persisted history. Startup only; anything
    /// already recorded for the symbol is kept and the restored data is put
    /// in front of it.
    pub fn restore(&self, symbol: &str, ticks: Vec<f64>, candles: Vec<Candle>) {
        let (tick_count, candle_count) = (ticks.len(), candles.len());
        let mut map = self.series.lock();
        let entry = map.entry(symbol.to_string()).or_default();
        let mut restored_ticks = ticks;
        restored_ticks.append(&mut entry.ticks);
        entry.ticks = restored_ticks;
        let mut restored_candles = candles;
        restored_candles.append(&mut entry.candles);
        entry.candles = restored_candles;
        drop(map);
        info!(symbol, tick_count, candle_count, "market history restored");
    }

    /// Append one tick. Prices are clamped positive by the simulator, so the
    /// store only checks that in debug builds.
    pub fn append_tick(&self, symbol: &str, price: f64) {
        debug_assert!(price > 0.0, "tick price must be positive");
        self.series
            .lock()
            .entry(symbol.to_string())
            .or_default()
            .ticks
            .push(price);
    }

    /// Append a closed candle and hand it to the candle sink. The simulator
    /// goes through `record_step` instead, which keeps a closing tick and its
    /// candle in one critical section.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn append_candle(&self, symbol: &str, candle: Candle) {
        debug_assert!(candle.is_well_formed(), "malformed candle {candle:?}");
        self.series
            .lock()
            .entry(symbol.to_string())
            .or_default()
            .candles
            .push(candle);
        self.persist_candle(symbol, &candle);
    }

    /// Append a tick and, when it closed one, the candle, inside one critical
    /// section so that no snapshot sees the closing tick without its candle.
    pub fn record_step(&self, symbol: &str, price: f64, closed: Option<Candle>) {
        let Some(candle) = closed else {
            self.append_tick(symbol, price);
            return;
        };
        debug_assert!(price > 0.0, "tick price must be positive");
        debug_assert!(candle.is_well_formed(), "malformed candle {candle:?}");
        {
            let mut map = self.series.lock();
            let entry = map.entry(symbol.to_string()).or_default();
            entry.ticks.push(price);
            entry.candles.push(candle);
        }
        debug!(symbol, close = candle.close, "candle closed");
        self.persist_candle(symbol, &candle);
    }

    fn persist_candle(&self, symbol: &str, candle: &Candle) {
        if let Err(e) = self.sink.append_candle(symbol, candle) {
            error!(symbol, error = %e, "failed to persist candle; keeping in-memory copy");
        }
    }

    /// Last tick for `symbol`, or `None` when no tick exists yet.
    pub fn latest_price(&self, symbol: &str) -> Option<f64> {
        self.series
            .lock()
            .get(symbol)
            .and_then(|s| s.ticks.last().copied())
    }

    /// Consistent copy of a symbol's full history.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn snapshot(&self, symbol: &str) -> Option<MarketSnapshot> {
        self.snapshot_tail(symbol, usize::MAX, usize::MAX)
    }

    /// Consistent copy of the most recent `tick_limit` ticks and
    /// `candle_limit` candles. Only the tail is copied under the lock.
    pub fn snapshot_tail(
        &self,
        symbol: &str,
        tick_limit: usize,
        candle_limit: usize,
    ) -> Option<MarketSnapshot> {
        let map = self.series.lock();
        let s = map.get(symbol)?;
        let tick_start = s.ticks.len().saturating_sub(tick_limit);
        let candle_start = s.candles.len().saturating_sub(candle_limit);
        Some(MarketSnapshot {
            ticks: s.ticks[tick_start..].to_vec(),
            candles: s.candles[candle_start..].to_vec(),
        })
    }

    /// All closed candles for a symbol, oldest first.
    pub fn closed_candles(&self, symbol: &str) -> Vec<Candle> {
        self.series
            .lock()
            .get(symbol)
            .map(|s| s.candles.clone())
            .unwrap_or_default()
    }

    pub fn tick_count(&self, symbol: &str) -> usize {
        self.series.lock().get(symbol).map_or(0, |s| s.ticks.len())
    }

    pub fn candle_count(&self, symbol: &str) -> usize {
        self.series.lock().get(symbol).map_or(0, |s| s.candles.len())
    }

    /// Flag a symbol as tradeable once its warm-up has finished.
    pub fn mark_ready(&self, symbol: &str) {
        if let Some(s) = self.series.lock().get_mut(symbol) {
            s.ready = true;
        }
    }

    pub fn is_ready(&self, symbol: &str) -> bool {
        self.series.lock().get(symbol).is_some_and(|s| s.ready)
    }

    /// Known symbols, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.series.lock().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Copy of every symbol's history, taken under one critical section, for
    /// the shutdown snapshot.
    pub fn export_all(&self) -> HashMap<String, MarketSnapshot> {
        self.series
            .lock()
            .iter()
            .map(|(symbol, s)| {
                (
                    symbol.clone(),
                    MarketSnapshot {
                        ticks: s.ticks.clone(),
                        candles: s.candles.clone(),
                    },
                )
            })
            .collect()
    }
}

impl std::fmt::Debug for MarketDataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbols = self.series.lock().len();
        f.debug_struct("MarketDataStore")
            .field("symbols", &symbols)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
