// =============================================================================
// Portfolio — cash, holdings, pending limit orders and the transaction log
// =============================================================================
//
// Plain data plus the two primitive mutations (buy fill, sell fill). All
// validation and locking live in the order engine; nothing here checks
// funds or holdings on its own.
//
// Cost basis: a buy that adds to a holding recomputes the weighted average
//   new_avg = (avg * old_amount + price * amount) / (old_amount + amount)
// A sell never touches the average. A holding whose amount reaches <= 0 is
// removed on the spot, so there is at most one holding per symbol.
// =============================================================================

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::OrderKind;

/// Flat broker fee rate (0.05 % of notional).
pub const BROKER_FEE_RATE: f64 = 0.0005;
/// Upper bound of the broker fee per transaction.
pub const BROKER_FEE_CAP: f64 = 20.0;

/// `min(value * 0.0005, 20.0)`.
pub fn broker_fee(transaction_value: f64) -> f64 {
    (transaction_value * BROKER_FEE_RATE).min(BROKER_FEE_CAP)
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    pub amount: f64,
    pub average_price: f64,
}

/// A limit order waiting for the sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub symbol: String,
    pub kind: OrderKind,
    pub amount: f64,
    pub limit_price: f64,
}

/// Immutable record of one executed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub symbol: String,
    pub amount: f64,
    pub price: f64,
    pub kind: OrderKind,
    pub broker_fee: f64,
    /// RFC 3339 execution time.
    pub executed_at: String,
}

// ---------------------------------------------------------------------------
// Portfolio
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub cash: f64,
    #[serde(default)]
    pub holdings: Vec<Holding>,
    #[serde(default)]
    pub pending_orders: Vec<PendingOrder>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Portfolio {
    pub fn new(cash: f64) -> Self {
        Self {
            cash,
            holdings: Vec::new(),
            pending_orders: Vec::new(),
            transactions: Vec::new(),
        }
    }

    pub fn holding(&self, symbol: &str) -> Option<&Holding> {
        self.holdings.iter().find(|h| h.symbol == symbol)
    }

    /// Amount held of `symbol`, zero when there is no holding.
    pub fn held_amount(&self, symbol: &str) -> f64 {
        self.holding(symbol).map_or(0.0, |h| h.amount)
    }

    pub fn has_sufficient_funds(&self, total_cost: f64) -> bool {
        self.cash >= total_cost
    }

    pub fn has_sufficient_holdings(&self, symbol: &str, amount: f64) -> bool {
        self.holding(symbol).is_some_and(|h| h.amount >= amount)
    }

    /// Debit `amount * price + fee`, grow the holding and log the fill.
    pub fn apply_buy(
        &mut self,
        symbol: &str,
        amount: f64,
        price: f64,
        fee: f64,
        kind: OrderKind,
    ) -> Transaction {
        self.cash -= amount * price + fee;

        match self.holdings.iter_mut().find(|h| h.symbol == symbol) {
            Some(h) => {
                h.average_price =
                    (h.average_price * h.amount + price * amount) / (h.amount + amount);
                h.amount += amount;
            }
            None => self.holdings.push(Holding {
                symbol: symbol.to_string(),
                amount,
                average_price: price,
            }),
        }

        self.record(symbol, amount, price, fee, kind)
    }

    /// Credit `amount * price - fee`, shrink the holding and log the fill.
    pub fn apply_sell(
        &mut self,
        symbol: &str,
        amount: f64,
        price: f64,
        fee: f64,
        kind: OrderKind,
    ) -> Transaction {
        self.cash += amount * price - fee;

        if let Some(idx) = self.holdings.iter().position(|h| h.symbol == symbol) {
            self.holdings[idx].amount -= amount;
            if self.holdings[idx].amount <= 0.0 {
                self.holdings.remove(idx);
            }
        }

        self.record(symbol, amount, price, fee, kind)
    }

    fn record(
        &mut self,
        symbol: &str,
        amount: f64,
        price: f64,
        fee: f64,
        kind: OrderKind,
    ) -> Transaction {
        let tx = Transaction {
            symbol: symbol.to_string(),
            amount,
            price,
            kind,
            broker_fee: fee,
            executed_at: Utc::now().to_rfc3339(),
        };
        self.transactions.push(tx.clone());
        tx
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
