// =============================================================================
// Persistence — market history and account records on disk
// =============================================================================
//
// Layout under `data_dir`:
//
//   stock_data/<SYM>_ticks.dat             full tick snapshot (shutdown)
//   stock_data/<SYM>_candles.dat           full candle snapshot (shutdown)
//   stock_data/<SYM>/candles_history.dat   append-only, one candle per record
//   users/<username>.dat                   account record
//
// Everything is bincode. Whole-file writes go through tmp + rename so a crash
// mid-write leaves the previous file intact. Every failure surfaces as
// `TradeError::PersistenceUnavailable`; callers decide whether it is fatal.
// =============================================================================

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::TradeError;
use crate::market_data::{Candle, CandleSink, MarketSnapshot};
use crate::portfolio::Portfolio;

// =============================================================================
// File helpers
// =============================================================================

/// Serialise `value` and replace `path` atomically.
fn write_atomic<T: Serialize + ?Sized>(path: &Path, value: &T, what: &str) -> Result<(), TradeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| TradeError::persistence(what, e))?;
    }
    let bytes = bincode::serialize(value).map_err(|e| TradeError::persistence(what, e))?;
    let tmp_path = path.with_extension("dat.tmp");
    fs::write(&tmp_path, &bytes).map_err(|e| TradeError::persistence(what, e))?;
    fs::rename(&tmp_path, path).map_err(|e| TradeError::persistence(what, e))?;
    Ok(())
}

/// Read and decode `path`. A missing file is `Ok(None)`.
fn read_optional<T: DeserializeOwned>(path: &Path, what: &str) -> Result<Option<T>, TradeError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(TradeError::persistence(what, e)),
    };
    bincode::deserialize(&bytes)
        .map(Some)
        .map_err(|e| TradeError::persistence(what, e))
}

// =============================================================================
// HistoryStore
// =============================================================================

/// Tick and candle history files for every symbol.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    root: PathBuf,
}

impl HistoryStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            root: data_dir.as_ref().join("stock_data"),
        }
    }

    fn ticks_path(&self, symbol: &str) -> PathBuf {
        self.root.join(format!("{symbol}_ticks.dat"))
    }

    fn candles_path(&self, symbol: &str) -> PathBuf {
        self.root.join(format!("{symbol}_candles.dat"))
    }

    fn history_path(&self, symbol: &str) -> PathBuf {
        self.root.join(symbol).join("candles_history.dat")
    }

    /// Load the shutdown snapshot of one symbol. Missing files give empty
    /// sequences.
    pub fn load(&self, symbol: &str) -> Result<MarketSnapshot, TradeError> {
        let ticks: Vec<f64> =
            read_optional(&self.ticks_path(symbol), "load ticks")?.unwrap_or_default();
        let candles: Vec<Candle> =
            read_optional(&self.candles_path(symbol), "load candles")?.unwrap_or_default();
        Ok(MarketSnapshot { ticks, candles })
    }

    /// Load every symbol in `symbols`. A symbol whose files cannot be decoded
    /// is logged and starts empty.
    pub fn load_all<'a>(
        &self,
        symbols: impl IntoIterator<Item = &'a String>,
    ) -> HashMap<String, MarketSnapshot> {
        let mut out = HashMap::new();
        for symbol in symbols {
            match self.load(symbol) {
                Ok(snap) if snap.ticks.is_empty() && snap.candles.is_empty() => {
                    debug!(symbol = %symbol, "no stored history");
                }
                Ok(snap) => {
                    out.insert(symbol.clone(), snap);
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "stored history unreadable; starting fresh"),
            }
        }
        info!(symbols = out.len(), dir = %self.root.display(), "market history loaded");
        out
    }

    /// Write the full snapshot of every symbol. Keeps going past a failing
    /// symbol and reports the first error.
    pub fn save_all(&self, snapshots: &HashMap<String, MarketSnapshot>) -> Result<(), TradeError> {
        let mut first_err = None;
        for (symbol, snap) in snapshots {
            let result = write_atomic(&self.ticks_path(symbol), &snap.ticks, "save ticks")
                .and_then(|_| write_atomic(&self.candles_path(symbol), &snap.candles, "save candles"));
            if let Err(e) = result {
                warn!(symbol = %symbol, error = %e, "failed to save market history");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => {
                info!(symbols = snapshots.len(), "market history saved");
                Ok(())
            }
        }
    }

    /// Every candle ever appended for `symbol`, oldest first. A truncated
    /// trailing record is ignored.
    pub fn read_candle_history(&self, symbol: &str) -> Result<Vec<Candle>, TradeError> {
        let file = match File::open(self.history_path(symbol)) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TradeError::persistence("read candle history", e)),
        };
        let mut reader = BufReader::new(file);
        let mut candles = Vec::new();
        loop {
            match bincode::deserialize_from::<_, Candle>(&mut reader) {
                Ok(c) => candles.push(c),
                Err(e) => {
                    if let bincode::ErrorKind::Io(io) = e.as_ref() {
                        if io.kind() == ErrorKind::UnexpectedEof {
                            break;
                        }
                    }
                    return Err(TradeError::persistence("read candle history", e));
                }
            }
        }
        Ok(candles)
    }
}

impl CandleSink for HistoryStore {
    fn append_candle(&self, symbol: &str, candle: &Candle) -> Result<(), TradeError> {
        let path = self.history_path(symbol);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| TradeError::persistence("append candle", e))?;
        }
        let bytes =
            bincode::serialize(candle).map_err(|e| TradeError::persistence("append candle", e))?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(&bytes))
            .map_err(|e| TradeError::persistence("append candle", e))
    }
}

// =============================================================================
// AccountStore
// =============================================================================

/// Everything that survives a restart for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub initial_cash: f64,
    pub portfolio: Portfolio,
}

impl Account {
    pub fn fresh(username: impl Into<String>, cash: f64) -> Self {
        Self {
            username: username.into(),
            initial_cash: cash,
            portfolio: Portfolio::new(cash),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccountStore {
    root: PathBuf,
}

impl AccountStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            root: data_dir.as_ref().join("users"),
        }
    }

    fn path(&self, username: &str) -> PathBuf {
        self.root.join(format!("{username}.dat"))
    }

    /// `Ok(None)` when the user has no record yet.
    pub fn load(&self, username: &str) -> Result<Option<Account>, TradeError> {
        read_optional(&self.path(username), "load account")
    }

    /// Load the account or start a fresh one with `starting_cash`.
    pub fn load_or_create(&self, username: &str, starting_cash: f64) -> Result<Account, TradeError> {
        match self.load(username)? {
            Some(account) => {
                info!(
                    username,
                    cash = account.portfolio.cash,
                    holdings = account.portfolio.holdings.len(),
                    pending = account.portfolio.pending_orders.len(),
                    "account loaded"
                );
                Ok(account)
            }
            None => {
                info!(username, starting_cash, "no account on disk; opening a fresh one");
                Ok(Account::fresh(username, starting_cash))
            }
        }
    }

    pub fn save(&self, account: &Account) -> Result<(), TradeError> {
        write_atomic(&self.path(&account.username), account, "save account")?;
        info!(username = %account.username, cash = account.portfolio.cash, "account saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::PendingOrder;
    use crate::types::OrderKind;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("paper-desk-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn account_roundtrip_is_exact() {
        let dir = temp_dir("account");
        let store = AccountStore::new(&dir);
        assert_eq!(store.load("alice").unwrap(), None);

        let mut account = Account::fresh("alice", 1_000.0);
        account
            .portfolio
            .apply_buy("X", 3.0, 101.337, 0.152, OrderKind::Buy);
        account.portfolio.pending_orders.push(PendingOrder {
            symbol: "X".into(),
            kind: OrderKind::LimitSell,
            amount: 1.5,
            limit_price: 120.1,
        });
        store.save(&account).unwrap();

        let loaded = store.load("alice").unwrap().unwrap();
        assert_eq!(loaded, account);
        assert!(!dir.join("users").join("alice.dat.tmp").exists());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_account_starts_fresh() {
        let dir = temp_dir("fresh");
        let account = AccountStore::new(&dir).load_or_create("bob", 5_000.0).unwrap();
        assert_eq!(account.portfolio, Portfolio::new(5_000.0));
        assert_eq!(account.initial_cash, 5_000.0);
    }

    #[test]
    fn corrupt_account_is_persistence_error() {
        let dir = temp_dir("corrupt");
        fs::create_dir_all(dir.join("users")).unwrap();
        fs::write(dir.join("users").join("eve.dat"), b"\x01").unwrap();
        let err = AccountStore::new(&dir).load("eve").unwrap_err();
        assert_eq!(err.code(), "PersistenceUnavailable");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn history_snapshot_roundtrip() {
        let dir = temp_dir("history");
        let store = HistoryStore::new(&dir);
        let mut map = HashMap::new();
        map.insert(
            "AAA".to_string(),
            MarketSnapshot {
                ticks: vec![1.0, 2.5, 3.25],
                candles: vec![Candle::flat(2.0)],
            },
        );
        store.save_all(&map).unwrap();

        let symbols = vec!["AAA".to_string(), "BBB".to_string()];
        let loaded = store.load_all(&symbols);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["AAA"], map["AAA"]);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn appended_candles_read_back_in_order() {
        let dir = temp_dir("append");
        let store = HistoryStore::new(&dir);
        assert!(store.read_candle_history("AAA").unwrap().is_empty());

        let a = Candle {
            open: 1.0,
            high: 3.0,
            low: 0.5,
            close: 2.0,
        };
        store.append_candle("AAA", &a).unwrap();
        store.append_candle("AAA", &Candle::flat(7.0)).unwrap();
        assert_eq!(
            store.read_candle_history("AAA").unwrap(),
            vec![a, Candle::flat(7.0)]
        );
        fs::remove_dir_all(&dir).ok();
    }
}
