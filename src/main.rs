// ─────────────────────────────────────────────────────────────────────────────
// grid-mm-engine: single-instrument grid market-making core
// ─────────────────────────────────────────────────────────────────────────────
mod audit;
mod breakout;
mod config;
mod errors;
mod gateway;
mod grid;
mod http_gateway;
mod indicators;
mod instrument;
mod signing;
mod state_store;
mod trend;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use breakout::BreakoutDetector;
use gateway::{ExchangeGateway, GatewayEvent, RemoteOrderStatus, SimGateway};
use grid::GridCore;
use state_store::StateStore;
use trend::TrendAnalyzer;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();
    log::info!("grid-mm-engine starting");

    let symbol = std::env::var("SYMBOL").unwrap_or_else(|_| "BTC-PERP".to_string());
    let dry_run = std::env::var("MM_SHADOW_MODE")
        .map(|v| v != "false" && v != "0")
        .unwrap_or(true);
    log::info!("  symbol: {}  shadow_mode: {}", symbol, dry_run);

    let grid_config = config::load_grid_config();
    let trend_config = config::load_trend_config();
    let breakout_config = config::load_breakout_config();

    let gateway: Arc<dyn ExchangeGateway> = if dry_run {
        let instrument = instrument::Instrument {
            symbol: symbol.clone(),
            tick_size: std::env::var("INSTRUMENT_TICK_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(0.5),
            lot_size: std::env::var("INSTRUMENT_LOT_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(0.001),
            base_currency: std::env::var("INSTRUMENT_BASE").unwrap_or_else(|_| "BTC".to_string()),
            quote_currency: std::env::var("INSTRUMENT_QUOTE").unwrap_or_else(|_| "USD".to_string()),
            maker_fee_rate: grid_config.fee_rate,
            multiplier: 1.0,
            inverse: false,
        };
        Arc::new(SimGateway::new(instrument))
    } else {
        let base_url = std::env::var("GATEWAY_BASE_URL").context("GATEWAY_BASE_URL must be set in live mode")?;
        let api_key = std::env::var("GATEWAY_API_KEY").context("GATEWAY_API_KEY must be set in live mode")?;
        let api_secret = std::env::var("GATEWAY_API_SECRET").context("GATEWAY_API_SECRET must be set in live mode")?;
        Arc::new(http_gateway::HttpGateway::new(base_url, api_key, api_secret))
    };

    let instrument = gateway
        .get_instrument(&symbol)
        .await
        .context("missing instrument metadata on startup")?;

    let store = StateStore::new(std::path::PathBuf::from(
        std::env::var("STATE_DIR").unwrap_or_else(|_| "data/state".to_string()),
    ));

    let trend_analyzer = TrendAnalyzer::new(
        trend_config.fast_ema_period,
        trend_config.slow_ema_period,
        trend_config.rsi_period,
        trend_config.max_asymmetry,
    );
    let breakout_detector = BreakoutDetector::new(breakout::BreakoutDetectorConfig {
        theta_atr: breakout_config.theta_atr,
        theta_body: breakout_config.theta_body,
        theta_vol: breakout_config.theta_vol,
        cooldown_minutes: breakout_config.cooldown_minutes,
    });

    let core = Arc::new(AsyncMutex::new(GridCore::new(
        symbol.clone(),
        instrument,
        grid_config.clone(),
        gateway.clone(),
        store,
        trend_analyzer,
        breakout_detector,
    )));

    let shutting_down = Arc::new(AtomicBool::new(false));
    let (event_tx, mut event_rx) = mpsc::channel::<GatewayEvent>(1024);

    // Reconciliation timer (4.5.4).
    {
        let core = core.clone();
        let shutting_down = shutting_down.clone();
        let interval = grid_config.order_sync_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                let current_price = core.lock().await.state.reference_price;
                if current_price > 0.0 {
                    core.lock().await.reconcile(current_price).await;
                }
            }
        });
    }

    // Spacing recalculation timer (4.5.8).
    {
        let core = core.clone();
        let shutting_down = shutting_down.clone();
        let interval = grid_config.atr_recalculation_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                core.lock().await.recalculate_spacing().await;
            }
        });
    }

    // Infinity-grid shift-check timer (4.5.7).
    {
        let core = core.clone();
        let shutting_down = shutting_down.clone();
        let interval = grid_config.grid_auto_shift_check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                let reference = core.lock().await.state.reference_price;
                if reference > 0.0 {
                    core.lock().await.maybe_shift(reference).await;
                }
            }
        });
    }

    // Periodic metrics snapshot.
    {
        let core = core.clone();
        let shutting_down = shutting_down.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                ticker.tick().await;
                if shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                let locked = core.lock().await;
                log::info!(
                    "[METRICS] {} pnl={:.4} trades={} active_orders={}",
                    locked.symbol,
                    locked.state.cumulative_pnl,
                    locked.state.total_trades,
                    locked.state.active_orders.len(),
                );
                log::info!("[LATENCY] {} {}", locked.symbol, locked.latency.report());
            }
        });
    }

    // Market-data ingestion (external connectivity layer; dry-run drives
    // itself from the sim gateway's own trade prints for local testing).
    if dry_run {
        let sim_gateway = gateway.clone();
        let symbol = symbol.clone();
        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            if let Ok(trades) = sim_gateway.get_historical_trades(&symbol, 60, 1).await {
                if let Some(last) = trades.last() {
                    let _ = event_tx
                        .send(GatewayEvent::MarketTrade(gateway::TradeEvent {
                            symbol: symbol.clone(),
                            price: last.price,
                            qty: last.qty,
                            ts_ms: last.ts_ms,
                        }))
                        .await;
                }
            }
        });
    }

    // Dispatch loop (4.7): market trade / execution / order-status events.
    let dispatch_core = core.clone();
    let dispatch_shutdown = shutting_down.clone();
    let dispatch_handle = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if dispatch_shutdown.load(Ordering::SeqCst) {
                break;
            }
            match event {
                GatewayEvent::MarketTrade(trade) => {
                    dispatch_core.lock().await.process_trade(trade.price).await;
                }
                GatewayEvent::Execution(exec) => {
                    dispatch_core.lock().await.handle_fill(&exec.remote_id, exec.price).await;
                }
                GatewayEvent::OrderStatus(status) => match status.status {
                    RemoteOrderStatus::Filled => {
                        let price = status.price.unwrap_or(0.0);
                        dispatch_core.lock().await.handle_fill(&status.remote_id, price).await;
                    }
                    RemoteOrderStatus::Cancelled => {
                        dispatch_core.lock().await.mark_cancelled(&status.remote_id);
                    }
                    RemoteOrderStatus::Open => {}
                },
            }
        }
    });

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    log::info!("shutdown signal received, draining in-flight work");
    shutting_down.store(true, Ordering::SeqCst);
    drop(event_tx);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), dispatch_handle).await;

    {
        let mut locked = core.lock().await;
        locked.reconcile(locked.state.reference_price.max(1.0)).await;
    }
    log::info!("state flushed, exiting");
    Ok(())
}
