// =============================================================================
// Relative Strength Index (RSI)
// =============================================================================
//
// RSI measures the balance of up-moves against down-moves over a window of
// candle closes.
//
// Step 1 — For the `period` candles ending at `index`, compute each close's
//          change against the close before it.
// Step 2 — Sum the non-negative changes into `gain` and the magnitudes of the
//          negative changes into `loss`.
// Step 3 — RS  = gain / loss
//          RSI = 100 - 100 / (1 + RS)
//
// Neutral 50 is returned when the window reaches before the first candle or
// when the window is perfectly flat.
//
// Thresholds used by the session:  RSI >= 80 => OVERBOUGHT,  RSI <= 20 =>
// OVERSOLD.
// =============================================================================

use crate::market_data::Candle;

/// Value returned whenever RSI cannot be computed.
pub const NEUTRAL_RSI: f64 = 50.0;

pub const OVERBOUGHT: f64 = 80.0;
pub const OVERSOLD: f64 = 20.0;

/// RSI over the `period` close-to-close changes ending at `index`.
///
/// # Edge cases
/// - `period == 0`, `index >= candles.len()` or fewer than `period + 1`
///   candles up to `index` => 50.0
/// - `gain + loss == 0` (flat market) => 50.0
/// - `loss == 0` with some gain => 100.0
pub fn rsi(candles: &[Candle], period: usize, index: usize) -> f64 {
    if period == 0 || index >= candles.len() || index < period {
        return NEUTRAL_RSI;
    }

    let (gain, loss) = candles[index - period..=index]
        .windows(2)
        .map(|w| w[1].close - w[0].close)
        .fold((0.0_f64, 0.0_f64), |(g, l), change| {
            if change >= 0.0 {
                (g + change, l)
            } else {
                (g, l - change)
            }
        });

    if gain + loss == 0.0 {
        return NEUTRAL_RSI;
    }
    if loss == 0.0 {
        return 100.0;
    }

    let rs = gain / loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// RSI at every index, matching `candles` one-to-one.
pub fn rsi_series(candles: &[Candle], period: usize) -> Vec<f64> {
    (0..candles.len()).map(|i| rsi(candles, period, i)).collect()
}

/// Human-readable label for an RSI value.
pub fn rsi_label(value: f64) -> &'static str {
    if value >= OVERBOUGHT {
        "OVERBOUGHT"
    } else if value <= OVERSOLD {
        "OVERSOLD"
    } else {
        "NEUTRAL"
    }
}
