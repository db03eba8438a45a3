// =============================================================================
// Paper Desk — Main Entry Point
// =============================================================================
//
// Startup: config -> history restore -> account -> simulators (warm-up) ->
// control loop, console and HTTP API. Nothing trades until every simulator
// has reported ready.
//
// Shutdown (Ctrl+C or `exit` on the console): stop every task, then save the
// account, the market history and the config, in that order. The config is
// written back as it was read; `PAPER_*` overrides apply to this run only.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod control;
mod error;
mod indicators;
mod market_data;
mod order_engine;
mod persistence;
mod portfolio;
mod runtime_config;
mod session;
mod simulator;
mod types;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::market_data::{CandleSink, DiscardSink, MarketDataStore};
use crate::order_engine::OrderEngine;
use crate::persistence::{Account, AccountStore, HistoryStore};
use crate::runtime_config::RuntimeConfig;
use crate::session::Session;

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║              Paper Desk — Starting Up                    ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let file_config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    let mut config = file_config.clone();
    config.apply_env();

    let symbols = config.symbols();
    info!(
        symbols = ?symbols,
        username = %config.username,
        data_dir = %config.data_dir.display(),
        warmup_seconds = config.warmup_seconds(),
        "Configured desk"
    );

    // ── 2. Market history ────────────────────────────────────────────────
    let history = Arc::new(HistoryStore::new(&config.data_dir));
    let sink: Arc<dyn CandleSink> = if config.simulation.persist_candles {
        history.clone() as Arc<dyn CandleSink>
    } else {
        Arc::new(DiscardSink)
    };
    let market = Arc::new(MarketDataStore::new(symbols.iter().cloned(), sink));
    for (symbol, snap) in history.load_all(&symbols) {
        market.restore(&symbol, snap.ticks, snap.candles);
    }

    // ── 3. Account ───────────────────────────────────────────────────────
    let accounts = AccountStore::new(&config.data_dir);
    let account = accounts
        .load_or_create(&config.username, config.starting_cash)
        .unwrap_or_else(|e| {
            error!(error = %e, "Account record unreadable; starting a fresh account");
            Account::fresh(config.username.clone(), config.starting_cash)
        });
    let username = account.username.clone();
    let initial_cash = account.initial_cash;
    let engine = Arc::new(OrderEngine::new(market.clone(), account.portfolio));

    let enable_console = config.enable_console;
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config, market.clone(), engine.clone()).with_history(history.clone()));

    // ── 4. Price simulators (warm-up) ────────────────────────────────────
    let root = CancellationToken::new();
    let (ready_tx, mut ready_rx) = mpsc::channel::<String>(symbols.len().max(1));
    let sim_handles = {
        let cfg = state.runtime_config.read().clone();
        simulator::spawn_simulators(&cfg, &market, &root, &ready_tx)
    };
    drop(ready_tx);

    let mut ready = 0usize;
    while ready < sim_handles.len() {
        tokio::select! {
            msg = ready_rx.recv() => match msg {
                Some(symbol) => {
                    ready += 1;
                    info!(symbol = %symbol, ready, total = sim_handles.len(), "Symbol ready");
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Shutdown requested during warm-up");
                root.cancel();
                break;
            }
        }
    }

    // ── 5. Control loop, console, API ────────────────────────────────────
    let mut task_handles = Vec::new();
    if !root.is_cancelled() {
        task_handles.push(tokio::spawn(control::run_control_loop(
            state.clone(),
            root.child_token(),
        )));

        if enable_console {
            // `exit` on the console stops the whole desk.
            let session = Session::new(engine.clone());
            let lines = session::spawn_stdin_reader();
            task_handles.push(tokio::spawn(session::run_console(session, lines, root.clone())));
        }

        match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => {
                info!(addr = %bind_addr, "API server listening");
                let app = api::rest::router(state.clone());
                let api_token = root.child_token();
                task_handles.push(tokio::spawn(async move {
                    if let Err(e) = axum::serve(listener, app)
                        .with_graceful_shutdown(async move { api_token.cancelled().await })
                        .await
                    {
                        error!(error = %e, "API server failed");
                    }
                }));
            }
            Err(e) => error!(addr = %bind_addr, error = %e, "Failed to bind API server; continuing without it"),
        }

        info!("All subsystems running. Press Ctrl+C or type 'exit' to stop.");

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
                warn!("Shutdown signal received — stopping gracefully");
            }
            _ = root.cancelled() => warn!("Exit requested — stopping gracefully"),
        }
    }

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    root.cancel();
    for handle in sim_handles.into_iter().chain(task_handles) {
        if let Err(e) = handle.await {
            error!(error = %e, "Task ended abnormally");
        }
    }

    let account = Account {
        username,
        initial_cash,
        portfolio: engine.portfolio_snapshot(),
    };
    if let Err(e) = accounts.save(&account) {
        error!(error = %e, "Failed to save account on shutdown");
    }

    if let Err(e) = history.save_all(&market.export_all()) {
        error!(error = %e, "Failed to save market history on shutdown");
    }

    if let Err(e) = file_config.save(CONFIG_PATH) {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("Paper Desk shut down complete.");
    Ok(())
}
