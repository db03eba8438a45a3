pub mod candle;
pub mod store;

// Re-export the core types for convenient access (e.g. `use crate::market_data::Candle`).
pub use candle::{Candle, CandleBuilder};
pub use store::{CandleSink, DiscardSink, MarketDataStore, MarketSnapshot};
