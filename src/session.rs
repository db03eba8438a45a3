// =============================================================================
// Session Controller — the text command surface of the desk
// =============================================================================
//
// A session holds the currently selected symbol and turns one line of input
// into a `Command`, then into a call on the order engine. Verbs are
// case-insensitive; symbols are upper-cased. Trading verbs act on the
// selected symbol.
//
//   select <SYMBOL>                  choose the symbol to trade
//   buy <amount> | sell <amount>     market order
//   limit_buy <amount> <limit>       pending limit buy
//   limit_sell <amount> <limit>      pending limit sell
//   cancel_limit_order [n]           list pending orders / cancel #n
//   transactions                     print the transaction log
//   help | return_main_menu | exit
// =============================================================================

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::TradeError;
use crate::order_engine::OrderEngine;
use crate::types::{OrderKind, Side};

pub const HELP_TEXT: &str = "\
Available commands:
  select <SYMBOL>              - Choose the stock to trade.
  buy <amount>                 - Buy at the current market price.
  sell <amount>                - Sell at the current market price.
  limit_buy <amount> <limit>   - Place a limit buy order.
  limit_sell <amount> <limit>  - Place a limit sell order.
  cancel_limit_order [n]       - List pending limit orders, or cancel order #n.
  transactions                 - Show the transaction log.
  help                         - Display this help message.
  return_main_menu             - Return to the main menu to switch stock.
  exit                         - Exit the trading simulator.
Tip: RSI >= 80 reads OVERBOUGHT (consider selling), RSI <= 20 reads OVERSOLD (consider buying).";

// =============================================================================
// Command
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Select(String),
    Market { side: Side, amount: f64 },
    Limit { side: Side, amount: f64, limit_price: f64 },
    CancelLimitOrder(Option<usize>),
    Transactions,
    Help,
    ReturnToMenu,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}'; type 'help' for the list")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error(transparent)]
    Trade(#[from] TradeError),
}

/// Parse a strictly positive, finite number. Anything else is `None`.
fn positive(token: &str) -> Option<f64> {
    token
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
}

fn amount_arg(token: Option<&str>, symbol: &str, kind: OrderKind, usage: &'static str) -> Result<f64, ParseError> {
    let token = token.ok_or(ParseError::Usage(usage))?;
    positive(token).ok_or_else(|| {
        ParseError::Trade(TradeError::InvalidAmount {
            symbol: symbol.to_string(),
            action: kind,
            amount: token.parse().unwrap_or(f64::NAN),
        })
    })
}

fn limit_arg(token: Option<&str>, symbol: &str, kind: OrderKind, usage: &'static str) -> Result<f64, ParseError> {
    let token = token.ok_or(ParseError::Usage(usage))?;
    positive(token).ok_or_else(|| {
        ParseError::Trade(TradeError::InvalidLimitPrice {
            symbol: symbol.to_string(),
            action: kind,
            limit_price: token.parse().unwrap_or(f64::NAN),
        })
    })
}

impl Command {
    /// Parse one input line. `symbol` names the selected symbol in errors.
    pub fn parse(line: &str, symbol: &str) -> Result<Self, ParseError> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or(ParseError::Empty)?.to_lowercase();

        let cmd = match verb.as_str() {
            "select" => Self::Select(
                parts
                    .next()
                    .ok_or(ParseError::Usage("select <SYMBOL>"))?
                    .to_uppercase(),
            ),
            "buy" | "sell" => {
                let side = if verb == "buy" { Side::Buy } else { Side::Sell };
                let usage = if verb == "buy" { "buy <amount>" } else { "sell <amount>" };
                let amount = amount_arg(parts.next(), symbol, OrderKind::market(side), usage)?;
                Self::Market { side, amount }
            }
            "limit_buy" | "limit_sell" => {
                let side = if verb == "limit_buy" { Side::Buy } else { Side::Sell };
                let usage = if verb == "limit_buy" {
                    "limit_buy <amount> <limit>"
                } else {
                    "limit_sell <amount> <limit>"
                };
                let kind = OrderKind::limit(side);
                let amount = amount_arg(parts.next(), symbol, kind, usage)?;
                let limit_price = limit_arg(parts.next(), symbol, kind, usage)?;
                Self::Limit {
                    side,
                    amount,
                    limit_price,
                }
            }
            "cancel_limit_order" => match parts.next() {
                None => Self::CancelLimitOrder(None),
                Some(n) => Self::CancelLimitOrder(Some(
                    n.parse()
                        .map_err(|_| ParseError::Usage("cancel_limit_order [n]"))?,
                )),
            },
            "transactions" => Self::Transactions,
            "help" => Self::Help,
            "return_main_menu" => Self::ReturnToMenu,
            "exit" => Self::Exit,
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(cmd)
    }
}

// =============================================================================
// Outcome
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Executed(String),
    Info(String),
    Rejected(String),
    ReturnToMenu,
    Exit,
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Executed(msg) | Self::Info(msg) => write!(f, "{msg}"),
            Self::Rejected(msg) => write!(f, "Rejected: {msg}"),
            Self::ReturnToMenu => write!(f, "Returning to main menu."),
            Self::Exit => write!(f, "Exiting the trading simulator."),
        }
    }
}

// =============================================================================
// Session
// =============================================================================

pub struct Session {
    engine: Arc<OrderEngine>,
    selected: Option<String>,
}

impl Session {
    pub fn new(engine: Arc<OrderEngine>) -> Self {
        Self {
            engine,
            selected: None,
        }
    }

    #[cfg(test)]
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Parse and run one line.
    pub fn handle_line(&mut self, line: &str) -> CommandOutcome {
        let symbol = self.selected.as_deref().unwrap_or("-");
        match Command::parse(line, symbol) {
            Ok(cmd) => self.dispatch(cmd),
            Err(e) => CommandOutcome::Rejected(e.to_string()),
        }
    }

    pub fn dispatch(&mut self, cmd: Command) -> CommandOutcome {
        match cmd {
            Command::Select(symbol) => self.select(symbol),
            Command::Market { side, amount } => {
                let Some(symbol) = self.selected.clone() else {
                    return no_selection();
                };
                match self.engine.place_market_order(side, &symbol, amount) {
                    Ok(tx) => CommandOutcome::Executed(format!(
                        "{} order executed for {} of {} at {:.2}. Broker fee: {:.2}.",
                        tx.kind, tx.amount, tx.symbol, tx.price, tx.broker_fee
                    )),
                    Err(e) => CommandOutcome::Rejected(e.to_string()),
                }
            }
            Command::Limit {
                side,
                amount,
                limit_price,
            } => {
                let Some(symbol) = self.selected.clone() else {
                    return no_selection();
                };
                match self
                    .engine
                    .place_limit_order(side, &symbol, amount, limit_price)
                {
                    Ok(placed) => CommandOutcome::Executed(format!(
                        "{} order #{} placed for {} of {} at limit {:.2}.",
                        placed.order.kind, placed.position, amount, symbol, limit_price
                    )),
                    Err(e) => CommandOutcome::Rejected(e.to_string()),
                }
            }
            Command::CancelLimitOrder(None) => self.list_pending(),
            Command::CancelLimitOrder(Some(index)) => match self.engine.cancel_pending_order(index) {
                Ok(order) => CommandOutcome::Executed(format!(
                    "Limit order #{index} ({} {} of {} at {:.2}) has been cancelled.",
                    order.kind, order.amount, order.symbol, order.limit_price
                )),
                Err(e) => CommandOutcome::Rejected(e.to_string()),
            },
            Command::Transactions => self.list_transactions(),
            Command::Help => CommandOutcome::Info(HELP_TEXT.to_string()),
            Command::ReturnToMenu => {
                self.selected = None;
                CommandOutcome::ReturnToMenu
            }
            Command::Exit => CommandOutcome::Exit,
        }
    }

    fn select(&mut self, symbol: String) -> CommandOutcome {
        let market = self.engine.market();
        if !market.symbols().contains(&symbol) {
            return CommandOutcome::Rejected(format!(
                "unknown symbol {symbol}; choose one of {}",
                market.symbols().join(", ")
            ));
        }
        let msg = match market.latest_price(&symbol) {
            Some(price) => format!("Trading {symbol}, last price {price:.2}."),
            None => format!("Trading {symbol}. No price data available yet."),
        };
        self.selected = Some(symbol);
        CommandOutcome::Info(msg)
    }

    fn list_pending(&self) -> CommandOutcome {
        let pending = self.engine.pending_orders();
        if pending.is_empty() {
            return CommandOutcome::Info("No pending limit orders to cancel.".into());
        }
        let mut out = String::from("Your pending limit orders:");
        for (i, o) in pending.iter().enumerate() {
            out.push_str(&format!(
                "\n  {}. {} - {} - Amount: {}, Limit Price: {:.2}",
                i + 1,
                o.symbol,
                o.kind,
                o.amount,
                o.limit_price
            ));
        }
        out.push_str("\nUse 'cancel_limit_order <n>' to cancel one.");
        CommandOutcome::Info(out)
    }

    fn list_transactions(&self) -> CommandOutcome {
        let txs = self.engine.transactions();
        if txs.is_empty() {
            return CommandOutcome::Info("No transactions yet.".into());
        }
        let mut out = String::from("Transactions:");
        for (i, t) in txs.iter().enumerate() {
            out.push_str(&format!(
                "\n  {}. {} {} {} x {} @ {:.2} (fee {:.2})",
                i + 1,
                t.executed_at,
                t.kind,
                t.symbol,
                t.amount,
                t.price,
                t.broker_fee
            ));
        }
        CommandOutcome::Info(out)
    }
}

fn no_selection() -> CommandOutcome {
    CommandOutcome::Rejected("no symbol selected; use 'select <SYMBOL>' first".into())
}

fn main_menu(engine: &OrderEngine) -> String {
    format!(
        "Main menu. Available stocks: {}\nType 'select <SYMBOL>' to start trading, 'help' for commands.",
        engine.market().symbols().join(", ")
    )
}

// =============================================================================
// Console
// =============================================================================

/// Forward stdin lines from a dedicated OS thread.
///
/// A blocking stdin read cannot be cancelled, so it stays off the runtime: the
/// thread is detached and dies with the process. It ends on end of input or
/// once the receiver is dropped.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    let spawned = std::thread::Builder::new()
        .name("console-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "console read failed");
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "could not start console reader; console disabled");
    }
    rx
}

/// Run commands from `lines` until `exit`, end of input, or cancellation.
/// `exit` cancels `token`, which stops the whole desk.
pub async fn run_console(
    mut session: Session,
    mut lines: mpsc::Receiver<String>,
    token: CancellationToken,
) {
    println!("{}", main_menu(&session.engine));

    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            info!("console input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let outcome = session.handle_line(&line);
        println!("{outcome}");
        match outcome {
            CommandOutcome::ReturnToMenu => println!("{}", main_menu(&session.engine)),
            CommandOutcome::Exit => {
                info!("exit requested from console");
                token.cancel();
                break;
            }
            _ => {}
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{DiscardSink, MarketDataStore};
    use crate::portfolio::Portfolio;

    fn session(cash: f64) -> Session {
        let market = Arc::new(MarketDataStore::new(["X", "Y"], Arc::new(DiscardSink)));
        market.append_tick("X", 100.0);
        Session::new(Arc::new(OrderEngine::new(market, Portfolio::new(cash))))
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(Command::parse("HELP", "X"), Ok(Command::Help));
        assert_eq!(Command::parse("select techsol", "X"), Ok(Command::Select("TECHSOL".into())));
        assert_eq!(
            Command::parse("Limit_Buy 2 90.5", "X"),
            Ok(Command::Limit {
                side: Side::Buy,
                amount: 2.0,
                limit_price: 90.5
            })
        );
        assert_eq!(Command::parse("cancel_limit_order", "X"), Ok(Command::CancelLimitOrder(None)));
        assert_eq!(Command::parse("cancel_limit_order 3", "X"), Ok(Command::CancelLimitOrder(Some(3))));
    }

    #[test]
    fn parse_rejects_bad_numbers() {
        assert!(matches!(
            Command::parse("buy abc", "X"),
            Err(ParseError::Trade(TradeError::InvalidAmount { action: OrderKind::Buy, .. }))
        ));
        assert!(matches!(
            Command::parse("sell -3", "X"),
            Err(ParseError::Trade(TradeError::InvalidAmount { amount, .. })) if amount == -3.0
        ));
        assert!(matches!(
            Command::parse("limit_sell 1 0", "X"),
            Err(ParseError::Trade(TradeError::InvalidLimitPrice { action: OrderKind::LimitSell, .. }))
        ));
        assert_eq!(Command::parse("buy", "X"), Err(ParseError::Usage("buy <amount>")));
        assert_eq!(Command::parse("   ", "X"), Err(ParseError::Empty));
        assert!(matches!(Command::parse("moon 5", "X"), Err(ParseError::Unknown(v)) if v == "moon"));
    }

    #[test]
    fn trading_requires_a_selection() {
        let mut s = session(1000.0);
        assert!(matches!(s.handle_line("buy 1"), CommandOutcome::Rejected(_)));
        assert!(matches!(s.handle_line("select nope"), CommandOutcome::Rejected(_)));
        assert!(matches!(s.handle_line("select x"), CommandOutcome::Info(_)));
        assert_eq!(s.selected(), Some("X"));
    }

    #[test]
    fn buy_then_list_transactions() {
        let mut s = session(1000.0);
        s.handle_line("select X");
        let outcome = s.handle_line("buy 5");
        match &outcome {
            CommandOutcome::Executed(msg) => {
                assert!(msg.contains("Buy"));
                assert!(msg.contains("X"));
                assert!(msg.contains("0.25"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        match s.handle_line("transactions") {
            CommandOutcome::Info(msg) => assert!(msg.contains("1. ")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn rejection_names_symbol_action_and_reason() {
        let mut s = session(10.0);
        s.handle_line("select X");
        match s.handle_line("buy 1") {
            CommandOutcome::Rejected(msg) => {
                assert!(msg.contains("X"));
                assert!(msg.contains("Buy"));
                assert!(msg.contains("insufficient funds including broker fee"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        s.handle_line("select Y");
        match s.handle_line("sell 1") {
            CommandOutcome::Rejected(msg) => assert!(msg.contains("no price data")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn limit_orders_list_and_cancel() {
        let mut s = session(1000.0);
        s.handle_line("select X");
        assert!(matches!(s.handle_line("limit_buy 1 90"), CommandOutcome::Executed(_)));
        match s.handle_line("cancel_limit_order") {
            CommandOutcome::Info(msg) => assert!(msg.contains("1. X - Limit_Buy")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(matches!(s.handle_line("cancel_limit_order 1"), CommandOutcome::Executed(_)));
        assert!(matches!(s.handle_line("cancel_limit_order 1"), CommandOutcome::Rejected(_)));
    }

    #[test]
    fn menu_and_exit() {
        let mut s = session(1000.0);
        s.handle_line("select X");
        assert_eq!(s.handle_line("return_main_menu"), CommandOutcome::ReturnToMenu);
        assert_eq!(s.selected(), None);
        assert_eq!(s.handle_line("EXIT"), CommandOutcome::Exit);
    }

    #[tokio::test]
    async fn console_runs_scripted_lines_until_exit() {
        let s = session(1000.0);
        let engine = s.engine.clone();
        let (tx, rx) = mpsc::channel(8);
        for line in ["select x", "", "buy 2", "exit", "buy 1"] {
            tx.send(line.to_string()).await.unwrap();
        }
        let token = CancellationToken::new();
        run_console(s, rx, token.clone()).await;

        assert!(token.is_cancelled());
        // Lines after `exit` are never run.
        assert_eq!(engine.transactions().len(), 1);
    }

    #[tokio::test]
    async fn console_stops_on_closed_input_without_cancelling() {
        let (tx, rx) = mpsc::channel::<String>(1);
        drop(tx);
        let token = CancellationToken::new();
        run_console(session(1000.0), rx, token.clone()).await;
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancelled_console_lets_the_runtime_shut_down() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        // Input stays open for the whole test, like an idle terminal.
        let (_tx, rx) = mpsc::channel::<String>(1);
        let token = CancellationToken::new();
        let handle = rt.spawn(run_console(session(1000.0), rx, token.clone()));

        let started = std::time::Instant::now();
        token.cancel();
        rt.block_on(async {
            tokio::time::timeout(std::time::Duration::from_secs(2), handle)
                .await
                .expect("console did not stop on cancel")
                .unwrap();
        });
        drop(rt);
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }
}
