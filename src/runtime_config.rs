// =============================================================================
// Runtime Configuration — simulator, catalog and account settings
// =============================================================================
//
// Every tunable of the desk lives here: the symbol catalog with each
// symbol's starting price and volatility, the simulated clock, indicator
// periods, where history and account files go, and the HTTP bind address.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_catalog() -> BTreeMap<String, SymbolParams> {
    [
        ("RELYCORP", 2600.00, 1.00),
        ("TECHSOL", 4200.00, 1.50),
        ("INFOWAVE", 1800.00, 1.00),
        ("NDFBANK", 1600.00, 0.50),
        ("FMCGUNION", 2800.00, 0.80),
        ("METALWORKS", 160.00, 1.20),
        ("SAFEBANK", 770.00, 0.60),
    ]
    .into_iter()
    .map(|(symbol, initial_price, volatility)| {
        (
            symbol.to_string(),
            SymbolParams {
                initial_price,
                volatility,
            },
        )
    })
    .collect()
}

fn default_tick_millis() -> u64 {
    1000
}

fn default_candle_interval() -> usize {
    10
}

fn default_warmup_candles() -> usize {
    50
}

fn default_dt() -> f64 {
    1.0 / 60.0
}

fn default_max_change() -> f64 {
    0.10
}

fn default_price_floor() -> f64 {
    0.01
}

fn default_ma_period() -> usize {
    5
}

fn default_rsi_period() -> usize {
    14
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_username() -> String {
    "demo".to_string()
}

fn default_starting_cash() -> f64 {
    100_000.0
}

fn default_bind_addr() -> String {
    "127.0.0.1:3001".to_string()
}

fn default_true() -> bool {
    true
}

// =============================================================================
// SymbolParams
// =============================================================================

/// Immutable simulation parameters of one catalog symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolParams {
    /// Price of the first simulated tick when no history is restored.
    pub initial_price: f64,
    /// Volatility per step, in percent.
    pub volatility: f64,
}

// =============================================================================
// SimulationParams
// =============================================================================

/// Tunables of the price simulators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Wall-clock length of one simulated second, in milliseconds.
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,

    /// Ticks aggregated into one candle.
    #[serde(default = "default_candle_interval")]
    pub candle_interval: usize,

    /// Candles produced before a symbol is considered ready.
    #[serde(default = "default_warmup_candles")]
    pub warmup_candles: usize,

    /// Time step used to scale volatility (60 steps per minute).
    #[serde(default = "default_dt")]
    pub dt: f64,

    /// Largest absolute log-change allowed in one step.
    #[serde(default = "default_max_change")]
    pub max_change: f64,

    /// Prices never fall below this floor.
    #[serde(default = "default_price_floor")]
    pub price_floor: f64,

    /// Append every closed candle to the per-symbol history file.
    #[serde(default = "default_true")]
    pub persist_candles: bool,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            tick_millis: default_tick_millis(),
            candle_interval: default_candle_interval(),
            warmup_candles: default_warmup_candles(),
            dt: default_dt(),
            max_change: default_max_change(),
            price_floor: default_price_floor(),
            persist_candles: true,
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Market -------------------------------------------------------------

    /// Symbol catalog: symbol -> (initial price, volatility).
    #[serde(default = "default_catalog")]
    pub catalog: BTreeMap<String, SymbolParams>,

    #[serde(default)]
    pub simulation: SimulationParams,

    // --- Indicators ---------------------------------------------------------

    #[serde(default = "default_ma_period")]
    pub ma_period: usize,

    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,

    // --- Account & storage --------------------------------------------------

    /// Root directory for history and account files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Account record loaded at startup and saved at shutdown.
    #[serde(default = "default_username")]
    pub username: String,

    /// Cash given to an account that has no record yet.
    #[serde(default = "default_starting_cash")]
    pub starting_cash: f64,

    // --- Surfaces -----------------------------------------------------------

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Read commands from stdin.
    #[serde(default = "default_true")]
    pub enable_console: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            catalog: default_catalog(),
            simulation: SimulationParams::default(),
            ma_period: default_ma_period(),
            rsi_period: default_rsi_period(),
            data_dir: default_data_dir(),
            username: default_username(),
            starting_cash: default_starting_cash(),
            bind_addr: default_bind_addr(),
            enable_console: true,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols(),
            username = %config.username,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply `PAPER_*` environment overrides.
    ///
    /// Overrides only shape the running desk; the copy persisted at shutdown
    /// is the one read from disk.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `PAPER_*` overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(user) = lookup("PAPER_USER") {
            let user = user.trim();
            if !user.is_empty() {
                self.username = user.to_string();
            }
        }
        if let Some(dir) = lookup("PAPER_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(addr) = lookup("PAPER_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(syms) = lookup("PAPER_SYMBOLS") {
            self.restrict_catalog(&syms);
        }
    }

    /// Keep only the comma-separated symbols in `list` that exist in the
    /// catalog. An empty or fully unknown list leaves the catalog untouched.
    pub fn restrict_catalog(&mut self, list: &str) {
        let wanted: Vec<String> = list
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        let known: Vec<&String> = wanted
            .iter()
            .filter(|s| self.catalog.contains_key(*s))
            .collect();
        if known.is_empty() {
            warn!(requested = %list, "no requested symbol is in the catalog; keeping full catalog");
            return;
        }
        self.catalog.retain(|symbol, _| wanted.contains(symbol));
    }

    /// Catalog symbols, sorted.
    pub fn symbols(&self) -> Vec<String> {
        self.catalog.keys().cloned().collect()
    }

    pub fn params(&self, symbol: &str) -> Option<SymbolParams> {
        self.catalog.get(symbol).copied()
    }

    /// Number of simulated seconds a fresh symbol spends warming up.
    pub fn warmup_seconds(&self) -> usize {
        self.simulation.warmup_candles * self.simulation.candle_interval
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.catalog.len(), 7);
        let relycorp = cfg.params("RELYCORP").unwrap();
        assert_eq!(relycorp.initial_price, 2600.0);
        assert_eq!(relycorp.volatility, 1.0);
        assert_eq!(cfg.simulation.candle_interval, 10);
        assert_eq!(cfg.simulation.warmup_candles, 50);
        assert_eq!(cfg.warmup_seconds(), 500);
        assert!((cfg.simulation.dt - 1.0 / 60.0).abs() < f64::EPSILON);
        assert_eq!(cfg.ma_period, 5);
        assert_eq!(cfg.rsi_period, 14);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.catalog.len(), 7);
        assert_eq!(cfg.username, "demo");
        assert!(cfg.simulation.persist_candles);
        assert!(cfg.enable_console);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{
            "catalog": { "XYZ": { "initial_price": 100.0, "volatility": 0.0 } },
            "simulation": { "tick_millis": 50 }
        }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbols(), vec!["XYZ"]);
        assert_eq!(cfg.simulation.tick_millis, 50);
        assert_eq!(cfg.simulation.candle_interval, 10);
        assert_eq!(cfg.starting_cash, 100_000.0);
    }

    #[test]
    fn restrict_catalog_keeps_known_symbols_only() {
        let mut cfg = RuntimeConfig::default();
        cfg.restrict_catalog("techsol, nope ,SAFEBANK");
        assert_eq!(cfg.symbols(), vec!["SAFEBANK", "TECHSOL"]);

        let mut cfg = RuntimeConfig::default();
        cfg.restrict_catalog("nope");
        assert_eq!(cfg.catalog.len(), 7);
    }

    #[test]
    fn roundtrip_through_file() {
        let dir = std::env::temp_dir().join(format!("paper-desk-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime_config.json");

        let mut cfg = RuntimeConfig::default();
        cfg.username = "alice".into();
        cfg.save(&path).unwrap();
        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.username, "alice");
        assert_eq!(loaded.catalog, cfg.catalog);
        assert!(!path.with_extension("json.tmp").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn overrides_do_not_leak_into_saved_config() {
        let dir = std::env::temp_dir().join(format!("paper-desk-cfg-env-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime_config.json");
        RuntimeConfig::default().save(&path).unwrap();

        // First run: overridden to one symbol and another user.
        let on_disk = RuntimeConfig::load(&path).unwrap();
        let mut effective = on_disk.clone();
        effective.apply_overrides(|key| match key {
            "PAPER_SYMBOLS" => Some("TECHSOL".into()),
            "PAPER_USER" => Some("bob".into()),
            _ => None,
        });
        assert_eq!(effective.symbols(), vec!["TECHSOL"]);
        assert_eq!(effective.username, "bob");
        on_disk.save(&path).unwrap();

        // Second run without overrides sees the full catalog again.
        let reloaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(reloaded.catalog.len(), 7);
        assert_eq!(reloaded.username, "demo");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn blank_user_override_is_ignored() {
        let mut cfg = RuntimeConfig::default();
        cfg.apply_overrides(|key| (key == "PAPER_USER").then(|| "   ".to_string()));
        assert_eq!(cfg.username, "demo");
    }
}
