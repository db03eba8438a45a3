use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// One closed OHLC candle aggregated from a fixed number of ticks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    /// A candle whose four prices are all `price`.
    pub fn flat(price: f64) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }

    /// `low <= min(open, close) <= max(open, close) <= high`, all positive.
    pub fn is_well_formed(&self) -> bool {
        self.low > 0.0
            && self.low <= self.open.min(self.close)
            && self.open.max(self.close) <= self.high
    }
}

// ---------------------------------------------------------------------------
// CandleBuilder -- in-progress candle for one symbol
// ---------------------------------------------------------------------------

/// Accumulates ticks into the in-progress candle and hands back a closed
/// candle every `interval` ticks.
///
/// The first tick after a close opens the next candle, so every candle covers
/// exactly `interval` ticks.
#[derive(Debug, Clone)]
pub struct CandleBuilder {
    interval: usize,
    count: usize,
    current: Candle,
}

impl CandleBuilder {
    /// `interval` is clamped to at least one tick per candle.
    pub fn new(interval: usize, seed_price: f64) -> Self {
        Self {
            interval: interval.max(1),
            count: 0,
            current: Candle::flat(seed_price),
        }
    }

    /// Fold one tick in. Returns the candle it closed, if any.
    pub fn push(&mut self, price: f64) -> Option<Candle> {
        if self.count == 0 {
            self.current = Candle::flat(price);
        } else {
            self.current.high = self.current.high.max(price);
            self.current.low = self.current.low.min(price);
            self.current.close = price;
        }
        self.count += 1;

        if self.count >= self.interval {
            let closed = self.current;
            self.current = Candle::flat(price);
            self.count = 0;
            Some(closed)
        } else {
            None
        }
    }

    /// Ticks folded into the in-progress candle so far.
    pub fn pending_ticks(&self) -> usize {
        self.count
    }

    pub fn interval(&self) -> usize {
        self.interval
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closes_after_interval_ticks() {
        let mut b = CandleBuilder::new(3, 100.0);
        assert!(b.push(101.0).is_none());
        assert!(b.push(99.0).is_none());
        let c = b.push(100.5).expect("third tick closes the candle");
        assert_eq!(
            c,
            Candle {
                open: 101.0,
                high: 101.0,
                low: 99.0,
                close: 100.5
            }
        );
        assert_eq!(b.pending_ticks(), 0);
    }

    #[test]
    fn next_candle_opens_on_first_tick_after_close() {
        let mut b = CandleBuilder::new(2, 100.0);
        b.push(100.0);
        b.push(102.0);
        b.push(95.0);
        let c = b.push(96.0).unwrap();
        assert_eq!(c.open, 95.0);
        assert_eq!(c.low, 95.0);
        assert_eq!(c.high, 96.0);
    }

    #[test]
    fn zero_interval_is_clamped() {
        let mut b = CandleBuilder::new(0, 10.0);
        assert_eq!(b.interval(), 1);
        assert_eq!(b.push(11.0), Some(Candle::flat(11.0)));
    }

    #[test]
    fn well_formed_check() {
        assert!(Candle::flat(1.0).is_well_formed());
        let bad = Candle {
            open: 10.0,
            high: 9.0,
            low: 8.0,
            close: 8.5,
        };
        assert!(!bad.is_well_formed());
    }
}
