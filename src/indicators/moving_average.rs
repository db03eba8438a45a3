// =============================================================================
// Simple Moving Average (SMA) of candle closes
// =============================================================================

use crate::market_data::Candle;

/// Arithmetic mean of `close` over the `period` candles ending at `index`.
///
/// Returns `None` ("not yet available") when `period == 0`, when `index` is
/// past the end, or when fewer than `period` candles exist up to `index`.
pub fn moving_average(candles: &[Candle], period: usize, index: usize) -> Option<f64> {
    if period == 0 || index >= candles.len() || index + 1 < period {
        return None;
    }
    let sum: f64 = candles[index + 1 - period..=index]
        .iter()
        .map(|c| c.close)
        .sum();
    Some(sum / period as f64)
}

/// Moving average at every index, matching `candles` one-to-one.
pub fn moving_average_series(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    (0..candles.len())
        .map(|i| moving_average(candles, period, i))
        .collect()
}
