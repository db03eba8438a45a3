// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free indicators over a candle sequence. Both are indexed:
// they answer "what was the reading at candle `index`", which lets charts
// draw a full series and signals read only the latest value.

pub mod moving_average;
pub mod rsi;

pub use moving_average::{moving_average, moving_average_series};
pub use rsi::{rsi, rsi_label, rsi_series};
