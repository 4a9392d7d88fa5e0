//! Environment-variable configuration, mirroring the recognized options
//! table: loaded once at startup via dotenvy, mapped into `GridConfig`.

use std::time::Duration;

use crate::grid::GridConfig;

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

pub fn load_grid_config() -> GridConfig {
    GridConfig {
        order_count: env_usize("ORDER_COUNT", 3),
        order_distance: env_f64("ORDER_DISTANCE", 70.0),
        order_size: env_f64("ORDER_SIZE", 0.01),
        max_position_size_base: env_f64("MAX_POSITION_SIZE_BASE", 1.0),
        max_open_orders: env_usize("MAX_OPEN_ORDERS", 50),
        atr_period: env_usize("ATR_PERIOD", 14),
        atr_multiplier: env_f64("ATR_MULTIPLIER", 1.0),
        atr_min_grid_distance: env_f64("ATR_MIN_GRID_DISTANCE", 10.0),
        atr_max_grid_distance: env_f64("ATR_MAX_GRID_DISTANCE", 1000.0),
        atr_recalculation_interval: Duration::from_secs(env_u64("ATR_RECALCULATION_INTERVAL", 900)),
        atr_historical_trades_lookback_minutes: env_usize("ATR_HISTORICAL_TRADES_LOOKBACK", 60) as u32,
        gap_detection_tolerance: env_f64("GAP_DETECTION_TOLERANCE", 1.5),
        infinity_grid_enabled: env_bool("INFINITY_GRID_ENABLED", true),
        grid_shift_threshold: env_f64("GRID_SHIFT_THRESHOLD", 0.2),
        grid_shift_overlap: env_f64("GRID_SHIFT_OVERLAP", 0.5),
        grid_auto_shift_check_interval: Duration::from_secs(env_u64("GRID_AUTO_SHIFT_CHECK_INTERVAL", 15)),
        variable_order_size_enabled: env_bool("VARIABLE_ORDER_SIZE_ENABLED", false),
        min_order_size_multiplier: env_f64("MIN_ORDER_SIZE_MULTIPLIER", 0.5),
        max_order_size_multiplier: env_f64("MAX_ORDER_SIZE_MULTIPLIER", 1.5),
        fee_rate: env_f64("FEE_RATE", 0.0002),
        order_sync_interval: Duration::from_secs(env_u64("ORDER_SYNC_INTERVAL", 60)),
        init_throttle: Duration::from_secs(env_u64("GRID_INIT_THROTTLE_SECS", 5)),
        shift_min_interval: Duration::from_secs(env_u64("GRID_SHIFT_MIN_INTERVAL_SECS", 10)),
        dry_run: env_bool("MM_SHADOW_MODE", true),
        trade_log_enabled: env_bool("TRADE_LOG_ENABLED", false),
    }
}

pub struct TrendConfig {
    pub fast_ema_period: usize,
    pub slow_ema_period: usize,
    pub rsi_period: usize,
    pub max_asymmetry: f64,
}

pub fn load_trend_config() -> TrendConfig {
    TrendConfig {
        fast_ema_period: env_usize("TREND_FAST_EMA_PERIOD", 8),
        slow_ema_period: env_usize("TREND_SLOW_EMA_PERIOD", 21),
        rsi_period: env_usize("TREND_RSI_PERIOD", 14),
        max_asymmetry: env_f64("TREND_MAX_ASYMMETRY", 1.5),
    }
}

pub struct BreakoutConfig {
    pub theta_atr: f64,
    pub theta_body: f64,
    pub theta_vol: f64,
    pub cooldown_minutes: i64,
}

pub fn load_breakout_config() -> BreakoutConfig {
    BreakoutConfig {
        theta_atr: env_f64("BREAKOUT_THETA_ATR", 1.8),
        theta_body: env_f64("BREAKOUT_THETA_BODY", 0.7),
        theta_vol: env_f64("BREAKOUT_THETA_VOL", 1.5),
        cooldown_minutes: env_u64("BREAKOUT_COOLDOWN_MINUTES", 15) as i64,
    }
}
