// =============================================================================
// Order Engine — market orders, limit orders and the pending-order sweep
// =============================================================================
//
// Every operation runs with the portfolio lock held from validation to the
// last mutation, so a sweep and a user command can never interleave halfway
// through an update. Prices come from the market data store while that lock
// is held.
//
// Lock order: portfolio -> market data. Price simulators only ever take the
// market data lock, so the two never form a cycle.
//
// Limit orders are not escrowed. Funds (buys, priced at the limit) and
// holdings (sells) are checked when the order is placed and checked again
// against the live price when the sweep fires it. A later command may spend
// the same cash or holdings in between; the sweep then leaves the order
// pending and retries it on the next pass.
// =============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::TradeError;
use crate::market_data::MarketDataStore;
use crate::portfolio::{broker_fee, PendingOrder, Portfolio, Transaction};
use crate::types::{OrderKind, Side};

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// A limit order accepted into the pending list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedOrder {
    /// 1-based position in the pending list at placement time.
    pub position: usize,
    pub order: PendingOrder,
}

struct Book {
    portfolio: Portfolio,
    last_order_price: Option<f64>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct OrderEngine {
    market: Arc<MarketDataStore>,
    book: Mutex<Book>,
}

impl OrderEngine {
    pub fn new(market: Arc<MarketDataStore>, portfolio: Portfolio) -> Self {
        Self {
            market,
            book: Mutex::new(Book {
                portfolio,
                last_order_price: None,
            }),
        }
    }

    pub fn market(&self) -> &Arc<MarketDataStore> {
        &self.market
    }

    // -------------------------------------------------------------------------
    // Market orders
    // -------------------------------------------------------------------------

    /// Execute immediately at the latest tick.
    pub fn place_market_order(
        &self,
        side: Side,
        symbol: &str,
        amount: f64,
    ) -> Result<Transaction, TradeError> {
        let kind = OrderKind::market(side);
        validate_amount(symbol, kind, amount)?;

        let mut book = self.book.lock();
        let price = self.price_for(symbol, kind)?;
        let value = amount * price;
        let fee = broker_fee(value);

        let tx = match side {
            Side::Buy => {
                let required = value + fee;
                if !book.portfolio.has_sufficient_funds(required) {
                    return Err(TradeError::InsufficientFunds {
                        symbol: symbol.to_string(),
                        action: kind,
                        required,
                        available: book.portfolio.cash,
                    });
                }
                book.portfolio.apply_buy(symbol, amount, price, fee, kind)
            }
            Side::Sell => {
                check_holdings(&book.portfolio, symbol, kind, amount)?;
                book.portfolio.apply_sell(symbol, amount, price, fee, kind)
            }
        };
        book.last_order_price = Some(price);

        info!(
            symbol,
            kind = %kind,
            amount,
            price,
            fee,
            cash = book.portfolio.cash,
            "market order executed"
        );
        Ok(tx)
    }

    // -------------------------------------------------------------------------
    // Limit orders
    // -------------------------------------------------------------------------

    /// Validate at the limit price and append to the pending list.
    pub fn place_limit_order(
        &self,
        side: Side,
        symbol: &str,
        amount: f64,
        limit_price: f64,
    ) -> Result<PlacedOrder, TradeError> {
        let kind = OrderKind::limit(side);
        validate_amount(symbol, kind, amount)?;
        if !(limit_price.is_finite() && limit_price > 0.0) {
            return Err(TradeError::InvalidLimitPrice {
                symbol: symbol.to_string(),
                action: kind,
                limit_price,
            });
        }

        let mut book = self.book.lock();
        self.price_for(symbol, kind)?;

        match side {
            Side::Buy => {
                let value = amount * limit_price;
                let required = value + broker_fee(value);
                if !book.portfolio.has_sufficient_funds(required) {
                    return Err(TradeError::InsufficientFunds {
                        symbol: symbol.to_string(),
                        action: kind,
                        required,
                        available: book.portfolio.cash,
                    });
                }
            }
            Side::Sell => check_holdings(&book.portfolio, symbol, kind, amount)?,
        }

        let order = PendingOrder {
            symbol: symbol.to_string(),
            kind,
            amount,
            limit_price,
        };
        book.portfolio.pending_orders.push(order.clone());
        let position = book.portfolio.pending_orders.len();

        info!(symbol, kind = %kind, amount, limit_price, position, "limit order placed");
        Ok(PlacedOrder { position, order })
    }

    /// Remove the pending order at 1-based `index`.
    pub fn cancel_pending_order(&self, index: usize) -> Result<PendingOrder, TradeError> {
        let mut book = self.book.lock();
        let pending = book.portfolio.pending_orders.len();
        if index == 0 || index > pending {
            return Err(TradeError::InvalidIndex { index, pending });
        }
        let order = book.portfolio.pending_orders.remove(index - 1);
        info!(index, symbol = %order.symbol, kind = %order.kind, "limit order cancelled");
        Ok(order)
    }

    // -------------------------------------------------------------------------
    // Sweep
    // -------------------------------------------------------------------------

    /// Fire every pending limit order whose condition holds at the latest
    /// price and that still passes re-validation. Returns the fills.
    ///
    /// Orders that cross but fail re-validation stay pending. Fired orders are
    /// removed afterwards by full field equality, erasing the first match
    /// for each fill.
    pub fn sweep_pending_orders(&self) -> Vec<Transaction> {
        let mut book = self.book.lock();
        if book.portfolio.pending_orders.is_empty() {
            return Vec::new();
        }

        let candidates = book.portfolio.pending_orders.clone();
        let mut executed: Vec<PendingOrder> = Vec::new();
        let mut fills = Vec::new();

        for order in candidates {
            let Some(price) = self.market.latest_price(&order.symbol) else {
                continue;
            };
            let value = order.amount * price;
            let fee = broker_fee(value);

            let tx = match order.kind {
                OrderKind::LimitBuy if price <= order.limit_price => {
                    if !book.portfolio.has_sufficient_funds(value + fee) {
                        debug!(symbol = %order.symbol, price, "limit buy crossed but funds are short; retrying later");
                        continue;
                    }
                    book.portfolio
                        .apply_buy(&order.symbol, order.amount, price, fee, order.kind)
                }
                OrderKind::LimitSell if price >= order.limit_price => {
                    if !book.portfolio.has_sufficient_holdings(&order.symbol, order.amount) {
                        debug!(symbol = %order.symbol, price, "limit sell crossed but holdings are short; retrying later");
                        continue;
                    }
                    book.portfolio
                        .apply_sell(&order.symbol, order.amount, price, fee, order.kind)
                }
                OrderKind::LimitBuy | OrderKind::LimitSell => continue,
                OrderKind::Buy | OrderKind::Sell => {
                    warn!(symbol = %order.symbol, kind = %order.kind, "market order found in pending list; skipping");
                    continue;
                }
            };

            book.last_order_price = Some(price);
            info!(
                symbol = %order.symbol,
                kind = %order.kind,
                amount = order.amount,
                limit_price = order.limit_price,
                price,
                fee,
                "limit order executed"
            );
            fills.push(tx);
            executed.push(order);
        }

        for done in &executed {
            if let Some(pos) = book
                .portfolio
                .pending_orders
                .iter()
                .position(|o| o == done)
            {
                book.portfolio.pending_orders.remove(pos);
            }
        }

        fills
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Clone of the whole portfolio taken under the portfolio lock.
    pub fn portfolio_snapshot(&self) -> Portfolio {
        self.book.lock().portfolio.clone()
    }

    pub fn pending_orders(&self) -> Vec<PendingOrder> {
        self.book.lock().portfolio.pending_orders.clone()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.book.lock().portfolio.transactions.clone()
    }

    #[cfg(test)]
    pub fn cash(&self) -> f64 {
        self.book.lock().portfolio.cash
    }

    /// Price of the most recent execution, if any happened this session.
    pub fn last_order_price(&self) -> Option<f64> {
        self.book.lock().last_order_price
    }

    fn price_for(&self, symbol: &str, kind: OrderKind) -> Result<f64, TradeError> {
        self.market
            .latest_price(symbol)
            .ok_or_else(|| TradeError::PriceUnavailable {
                symbol: symbol.to_string(),
                action: kind,
            })
    }
}

impl std::fmt::Debug for OrderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let book = self.book.lock();
        f.debug_struct("OrderEngine")
            .field("cash", &book.portfolio.cash)
            .field("holdings", &book.portfolio.holdings.len())
            .field("pending_orders", &book.portfolio.pending_orders.len())
            .field("transactions", &book.portfolio.transactions.len())
            .finish()
    }
}

fn validate_amount(symbol: &str, kind: OrderKind, amount: f64) -> Result<(), TradeError> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(TradeError::InvalidAmount {
            symbol: symbol.to_string(),
            action: kind,
            amount,
        })
    }
}

fn check_holdings(
    portfolio: &Portfolio,
    symbol: &str,
    kind: OrderKind,
    amount: f64,
) -> Result<(), TradeError> {
    if portfolio.has_sufficient_holdings(symbol, amount) {
        Ok(())
    } else {
        Err(TradeError::InsufficientHoldings {
            symbol: symbol.to_string(),
            action: kind,
            requested: amount,
            held: portfolio.held_amount(symbol),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
