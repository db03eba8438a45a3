// =============================================================================
// Trade errors — every way an order or a persistence call can be refused
// =============================================================================
//
// Order Engine operations never abort the process; they hand one of these
// back to the caller. The `Display` text is what the session prints, so each
// message names the symbol, the attempted action and the reason.
// =============================================================================

use thiserror::Error;

use crate::types::OrderKind;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TradeError {
    #[error("{action} {symbol} rejected: no price data available yet")]
    PriceUnavailable { symbol: String, action: OrderKind },

    #[error("{action} {symbol} rejected: insufficient funds including broker fee (required {required:.2}, available {available:.2})")]
    InsufficientFunds {
        symbol: String,
        action: OrderKind,
        required: f64,
        available: f64,
    },

    #[error("{action} {symbol} rejected: insufficient holdings (requested {requested}, held {held})")]
    InsufficientHoldings {
        symbol: String,
        action: OrderKind,
        requested: f64,
        held: f64,
    },

    #[error("{action} {symbol} rejected: amount must be a positive number (got {amount})")]
    InvalidAmount {
        symbol: String,
        action: OrderKind,
        amount: f64,
    },

    #[error("{action} {symbol} rejected: limit price must be a positive number (got {limit_price})")]
    InvalidLimitPrice {
        symbol: String,
        action: OrderKind,
        limit_price: f64,
    },

    #[error("cancel rejected: no pending order #{index} ({pending} pending)")]
    InvalidIndex { index: usize, pending: usize },

    #[error("persistence unavailable: {what}: {reason}")]
    PersistenceUnavailable { what: String, reason: String },
}

impl TradeError {
    pub fn persistence(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::PersistenceUnavailable {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Short machine-readable code for the HTTP surface.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PriceUnavailable { .. } => "PriceUnavailable",
            Self::InsufficientFunds { .. } => "InsufficientFunds",
            Self::InsufficientHoldings { .. } => "InsufficientHoldings",
            Self::InvalidAmount { .. } => "InvalidAmount",
            Self::InvalidLimitPrice { .. } => "InvalidLimitPrice",
            Self::InvalidIndex { .. } => "InvalidIndex",
            Self::PersistenceUnavailable { .. } => "PersistenceUnavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_symbol_action_and_reason() {
        let err = TradeError::InsufficientFunds {
            symbol: "TECHSOL".into(),
            action: OrderKind::LimitBuy,
            required: 1000.5,
            available: 10.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("TECHSOL"));
        assert!(msg.contains("Limit_Buy"));
        assert!(msg.contains("insufficient funds including broker fee"));
        assert_eq!(err.code(), "InsufficientFunds");
    }

    #[test]
    fn persistence_helper_keeps_reason() {
        let err = TradeError::persistence("write candle", "disk full");
        assert_eq!(
            err.to_string(),
            "persistence unavailable: write candle: disk full"
        );
    }
}
