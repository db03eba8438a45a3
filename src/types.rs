// =============================================================================
// Shared types used across the paper-trading desk
// =============================================================================

use serde::{Deserialize, Serialize};

/// Direction of an order, independent of how it is priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "Buy"),
            Self::Sell => write!(f, "Sell"),
        }
    }
}

/// Every order kind the engine understands. Market orders execute at once,
/// limit orders wait in the pending list until a sweep fills them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Buy,
    Sell,
    LimitBuy,
    LimitSell,
}

impl OrderKind {
    pub fn side(self) -> Side {
        match self {
            Self::Buy | Self::LimitBuy => Side::Buy,
            Self::Sell | Self::LimitSell => Side::Sell,
        }
    }

    pub fn is_limit(self) -> bool {
        matches!(self, Self::LimitBuy | Self::LimitSell)
    }

    /// The limit counterpart of a side.
    pub fn limit(side: Side) -> Self {
        match side {
            Side::Buy => Self::LimitBuy,
            Side::Sell => Self::LimitSell,
        }
    }

    /// The market counterpart of a side.
    pub fn market(side: Side) -> Self {
        match side {
            Side::Buy => Self::Buy,
            Side::Sell => Self::Sell,
        }
    }
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "Buy"),
            Self::Sell => write!(f, "Sell"),
            Self::LimitBuy => write!(f, "Limit_Buy"),
            Self::LimitSell => write!(f, "Limit_Sell"),
        }
    }
}
