//! C6 — Order manager / grid core. Grid construction, fill handling, gap
//! filling, infinity-grid shift, reconciliation. Owns the active-order
//! collection exclusively; the state store holds a durable mirror.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::audit::LatencyAuditor;
use crate::breakout::BreakoutDetector;
use crate::errors::OrderError;
use crate::gateway::{ExchangeGateway, PlaceOrderOptions, RemoteOrderStatus, Side, Trade};
use crate::indicators::{bucket_trades_into_candles, Atr};
use crate::instrument::Instrument;
use crate::state_store::{EngineState, StateStore};
use crate::trend::{TrendAnalysis, TrendAnalyzer, TrendDirection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    PendingSubmit,
    Open,
    Filled,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub local_id: u64,
    pub remote_id: Option<String>,
    pub side: Side,
    pub price: f64,
    pub base_qty: f64,
    pub contract_qty: f64,
    pub fee_estimate: f64,
    pub state: OrderState,
    pub entry_reference_price: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridBounds {
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedTrade {
    pub entry: Order,
    pub exit: Order,
    pub net_profit: f64,
    pub combined_fees: f64,
    pub closed_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSizingConfig {
    pub current_distance: f64,
    pub last_atr_value: Option<f64>,
    pub last_recalculation: Option<chrono::DateTime<chrono::Utc>>,
    pub trend_direction: TrendDirection,
    pub trend_strength: f64,
    pub asymmetry_factor: f64,
    pub upward_grid_spacing: f64,
    pub downward_grid_spacing: f64,
}

impl GridSizingConfig {
    pub fn flat(base_distance: f64) -> Self {
        Self {
            current_distance: base_distance,
            last_atr_value: None,
            last_recalculation: None,
            trend_direction: TrendDirection::Neutral,
            trend_strength: 0.0,
            asymmetry_factor: 1.0,
            upward_grid_spacing: base_distance,
            downward_grid_spacing: base_distance,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GridConfig {
    pub order_count: usize,
    pub order_distance: f64,
    pub order_size: f64,
    pub max_position_size_base: f64,
    pub max_open_orders: usize,
    pub atr_period: usize,
    pub atr_multiplier: f64,
    pub atr_min_grid_distance: f64,
    pub atr_max_grid_distance: f64,
    pub atr_recalculation_interval: Duration,
    pub atr_historical_trades_lookback_minutes: u32,
    pub gap_detection_tolerance: f64,
    pub infinity_grid_enabled: bool,
    pub grid_shift_threshold: f64,
    pub grid_shift_overlap: f64,
    pub grid_auto_shift_check_interval: Duration,
    pub variable_order_size_enabled: bool,
    pub min_order_size_multiplier: f64,
    pub max_order_size_multiplier: f64,
    pub fee_rate: f64,
    pub order_sync_interval: Duration,
    pub init_throttle: Duration,
    pub shift_min_interval: Duration,
    pub dry_run: bool,
    pub trade_log_enabled: bool,
}

pub enum ShiftDirection {
    Up,
    Down,
}

pub struct GridCore {
    pub symbol: String,
    pub instrument: Instrument,
    pub config: GridConfig,
    pub gateway: Arc<dyn ExchangeGateway>,
    pub store: StateStore,
    pub state: EngineState,
    processed_fills: HashSet<String>,
    historical_entries: Vec<Order>,
    next_local_id: u64,
    constructing: bool,
    last_construction: Option<Instant>,
    last_shift: Option<Instant>,
    pub trend_analyzer: TrendAnalyzer,
    pub atr: Atr,
    pub breakout: BreakoutDetector,
    pub bounds: Option<GridBounds>,
    pub latency: LatencyAuditor,
}

impl GridCore {
    pub fn new(
        symbol: String,
        instrument: Instrument,
        config: GridConfig,
        gateway: Arc<dyn ExchangeGateway>,
        store: StateStore,
        trend_analyzer: TrendAnalyzer,
        breakout: BreakoutDetector,
    ) -> Self {
        let state = store.load(&symbol).unwrap_or_else(|_| EngineState::new_session());
        let bounds = if state.active_orders.is_empty() {
            None
        } else {
            let prices: Vec<f64> = state.active_orders.iter().map(|o| o.price).collect();
            Some(GridBounds {
                lower: prices.iter().cloned().fold(f64::MAX, f64::min),
                upper: prices.iter().cloned().fold(f64::MIN, f64::max),
            })
        };
        Self {
            symbol,
            instrument,
            trend_analyzer,
            atr: Atr::new(config.atr_period),
            breakout,
            config,
            gateway,
            store,
            processed_fills: HashSet::new(),
            historical_entries: Vec::new(),
            next_local_id: 1,
            constructing: false,
            last_construction: None,
            last_shift: None,
            bounds,
            state,
            latency: LatencyAuditor::default(),
        }
    }

    /// Times a gateway round-trip and feeds the result to `self.latency`.
    async fn timed_gateway_call<T, E, F>(&mut self, fut: F) -> Result<T, E>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let result = fut.await;
        self.latency.record(0, started.elapsed().as_micros() as u64);
        result
    }

    fn alloc_local_id(&mut self) -> u64 {
        let id = self.next_local_id;
        self.next_local_id += 1;
        id
    }

    fn persist(&mut self) {
        self.state.last_updated = chrono::Utc::now();
        if let Err(e) = self.store.save(&self.symbol, &self.state) {
            log::warn!("[GRID] state persist failed for {}: {}", self.symbol, e);
        }
    }

    /// Current asymmetric spacing applied to the side a fill opens on the
    /// opposite side. `upward` moves price away from reference for a sell,
    /// `downward` for a buy (4.5.3 step 6).
    fn asymmetric_spacing(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.state.grid_sizing.downward_grid_spacing,
            Side::Sell => self.state.grid_sizing.upward_grid_spacing,
        }
    }

    /// Piecewise-linear multiplier: 1.0 at zero distance, ramping to max_mult
    /// at +30% favorable distance and min_mult at -30%.
    fn size_scale(&self, favorable_distance_ratio: f64) -> f64 {
        let t = favorable_distance_ratio.clamp(-1.0, 1.0);
        if t >= 0.0 {
            1.0 + t * (self.config.max_order_size_multiplier - 1.0)
        } else {
            1.0 + t * (1.0 - self.config.min_order_size_multiplier)
        }
    }

    /// Variable order sizing: scale base size by price distance from
    /// reference, clamped to [min_mult, max_mult] over a ±30% price band.
    /// Buys grow as price falls below reference, sells shrink as price rises.
    fn sized_for_price(&self, price: f64) -> f64 {
        if !self.config.variable_order_size_enabled {
            return self.config.order_size;
        }
        let reference = self.state.reference_price;
        if reference <= 0.0 {
            return self.config.order_size;
        }
        let distance_ratio = (reference - price) / reference / 0.30;
        self.config.order_size * self.size_scale(distance_ratio)
    }

    /// Position-limit check (4.5.6). On gateway failure, refuse conservatively.
    async fn check_position_limit(&self, side: Side, incremental_base: f64) -> bool {
        let position = match self.gateway.get_position(&self.symbol).await {
            Ok(p) => p,
            Err(e) => {
                log::warn!("[GRID] position query failed, refusing order: {}", e);
                return false;
            }
        };
        let signed_current_base = match position {
            Some(p) if self.instrument.inverse => {
                let reference = if self.state.reference_price > 0.0 {
                    self.state.reference_price
                } else {
                    1.0
                };
                p.net_qty / reference
            }
            Some(p) => p.net_qty,
            None => 0.0,
        };

        let is_additive = match side {
            Side::Buy => signed_current_base >= 0.0,
            Side::Sell => signed_current_base <= 0.0,
        };
        if !is_additive {
            return true;
        }
        let projected = match side {
            Side::Buy => signed_current_base + incremental_base,
            Side::Sell => signed_current_base - incremental_base,
        };
        projected.abs() <= self.config.max_position_size_base
    }

    /// Order submission (4.5.2).
    pub async fn submit_new_order(&mut self, side: Side, price: f64) -> Result<Order, OrderError> {
        if price <= 0.0 {
            return Err(OrderError::InvalidPrice(price));
        }
        let rounded_price = self
            .instrument
            .round_price_to_tick(price)
            .map_err(|_| OrderError::InvalidPrice(price))?;

        let half_tick = self.instrument.tick_size / 2.0;
        let duplicate = self.state.active_orders.iter().any(|o| {
            o.side == side
                && o.state != OrderState::Filled
                && o.state != OrderState::Cancelled
                && (o.price - rounded_price).abs() < half_tick
        });
        if duplicate {
            return Err(OrderError::DuplicatePricePoint(rounded_price));
        }

        if self.state.active_orders.len() >= self.config.max_open_orders {
            return Err(OrderError::OrderLimitExceeded(self.state.active_orders.len()));
        }

        let base_qty = self.sized_for_price(rounded_price);
        if !self.check_position_limit(side, base_qty).await {
            return Err(OrderError::PositionLimitExceeded);
        }

        let contract_qty = self
            .instrument
            .base_to_contracts(base_qty, rounded_price)
            .map_err(|_| OrderError::InvalidPrice(rounded_price))?;

        let gateway = self.gateway.clone();
        let symbol = self.symbol.clone();
        let remote = self
            .timed_gateway_call(async move {
                gateway
                    .place_limit_order(&symbol, side, rounded_price, contract_qty, PlaceOrderOptions::default())
                    .await
            })
            .await?;

        let order = Order {
            local_id: self.alloc_local_id(),
            remote_id: Some(remote.remote_id),
            side,
            price: rounded_price,
            base_qty,
            contract_qty,
            fee_estimate: contract_qty * rounded_price * self.config.fee_rate,
            state: OrderState::Open,
            entry_reference_price: None,
        };
        self.state.active_orders.push(order.clone());
        self.persist();
        Ok(order)
    }

    /// Grid construction (4.5.1).
    pub async fn construct_grid(&mut self, mid_price: f64) -> Result<(), OrderError> {
        if self.constructing {
            log::info!("[GRID] construction already in progress for {}, dropping", self.symbol);
            return Ok(());
        }
        if let Some(last) = self.last_construction {
            if last.elapsed() < self.config.init_throttle {
                log::info!("[GRID] construction throttled for {}", self.symbol);
                return Ok(());
            }
        }
        self.constructing = true;
        let result = self.construct_grid_inner(mid_price).await;
        self.constructing = false;
        self.last_construction = Some(Instant::now());
        result
    }

    async fn construct_grid_inner(&mut self, mid_price: f64) -> Result<(), OrderError> {
        let reference = self
            .instrument
            .round_price_to_tick(mid_price)
            .map_err(|_| OrderError::InvalidPrice(mid_price))?;

        self.gateway.cancel_all_orders(&self.symbol).await.ok();
        self.state.active_orders.clear();

        let n = self.config.order_count;
        let upward = self.state.grid_sizing.upward_grid_spacing;
        let downward = self.state.grid_sizing.downward_grid_spacing;

        for i in 1..=n {
            let buy_price = reference - i as f64 * downward;
            if buy_price > 0.0 {
                if let Err(e) = self.submit_new_order(Side::Buy, buy_price).await {
                    log::warn!("[GRID] buy leg {} failed during construction: {}", i, e);
                }
            }
            let sell_price = reference + i as f64 * upward;
            match self.submit_new_order(Side::Sell, sell_price).await {
                Ok(_) => {
                    if let Some(order) = self.state.active_orders.last_mut() {
                        order.entry_reference_price = Some(reference);
                    }
                }
                Err(e) => log::warn!("[GRID] sell leg {} failed during construction: {}", i, e),
            }
        }

        self.bounds = Some(GridBounds {
            lower: (reference - n as f64 * downward).max(1.0),
            upper: reference + n as f64 * upward,
        });
        self.state.reference_price = reference;
        self.persist();

        if self.config.dry_run {
            self.simulate_crossed_fills(mid_price).await;
        }

        log::info!(
            "[GRID] constructed {} with reference={} bounds={:?}",
            self.symbol, reference, self.bounds
        );
        Ok(())
    }

    /// Dry-run only: immediately fill any resting order the current price
    /// has already crossed, as if a trade print arrived the instant after
    /// construction.
    async fn simulate_crossed_fills(&mut self, current_price: f64) {
        let crossed: Vec<(String, f64)> = self
            .state
            .active_orders
            .iter()
            .filter(|o| match o.side {
                Side::Buy => current_price <= o.price,
                Side::Sell => current_price >= o.price,
            })
            .filter_map(|o| o.remote_id.clone().map(|id| (id, o.price)))
            .collect();
        for (remote_id, price) in crossed {
            self.handle_fill(&remote_id, price).await;
        }
    }

    /// Fill handling (4.5.3).
    pub async fn handle_fill(&mut self, remote_id: &str, execution_price: f64) {
        if self.processed_fills.contains(remote_id) {
            return;
        }
        let idx = match self
            .state
            .active_orders
            .iter()
            .position(|o| o.remote_id.as_deref() == Some(remote_id))
        {
            Some(i) => i,
            None => return,
        };

        self.processed_fills.insert(remote_id.to_string());

        let execution_price = self
            .instrument
            .round_price_to_tick(execution_price)
            .unwrap_or(execution_price);

        let mut filled = self.state.active_orders.remove(idx);
        filled.state = OrderState::Filled;
        filled.price = execution_price;
        self.persist();

        let new_side = filled.side.opposite();
        let spacing = self.asymmetric_spacing(new_side);
        let opposing_price = match new_side {
            Side::Sell => execution_price + spacing,
            Side::Buy => execution_price - spacing,
        };

        match self.submit_new_order(new_side, opposing_price).await {
            Ok(_) => {
                if let Some(order) = self.state.active_orders.last_mut() {
                    order.entry_reference_price = Some(execution_price);
                }
            }
            Err(e) => log::warn!("[FILL] opposing order failed for {}: {}", remote_id, e),
        }

        if let Some(entry_reference_price) = filled.entry_reference_price {
            if let Some(pos) = self
                .historical_entries
                .iter()
                .position(|e| (e.price - entry_reference_price).abs() <= 0.01)
            {
                let entry = self.historical_entries.remove(pos);
                let (gross, combined_fees) = match entry.side {
                    Side::Buy => (
                        (filled.price - entry.price) * entry.base_qty,
                        entry.fee_estimate + filled.fee_estimate,
                    ),
                    Side::Sell => (
                        (entry.price - filled.price) * entry.base_qty,
                        entry.fee_estimate + filled.fee_estimate,
                    ),
                };
                let net_profit = gross - combined_fees;
                self.state.cumulative_pnl += net_profit;
                self.state.total_trades += 1;
                if net_profit >= 0.0 {
                    self.state.winning_trades += 1;
                } else {
                    self.state.losing_trades += 1;
                }
                self.state.cumulative_fees += combined_fees;
                self.state.cumulative_volume += entry.base_qty;
                let completed = CompletedTrade {
                    entry,
                    exit: filled.clone(),
                    net_profit,
                    combined_fees,
                    closed_at: chrono::Utc::now(),
                };
                if self.config.trade_log_enabled {
                    crate::audit::log_completed_trade(&self.symbol, &completed);
                }
                self.state.completed_trades.push(completed);
                self.persist();
                log::info!("[FILL] cycle closed, net_profit={:.6}", net_profit);
            }
        }

        self.historical_entries.push(filled);
    }

    /// Order status Cancelled dispatch (4.7): drop the local record, no
    /// further bookkeeping — a cancel never produces a CompletedTrade.
    pub fn mark_cancelled(&mut self, remote_id: &str) {
        let before = self.state.active_orders.len();
        self.state
            .active_orders
            .retain(|o| o.remote_id.as_deref() != Some(remote_id));
        if self.state.active_orders.len() != before {
            self.persist();
        }
    }

    /// Exchange reconciliation (4.5.4).
    pub async fn reconcile(&mut self, current_price: f64) {
        let gateway = self.gateway.clone();
        let symbol = self.symbol.clone();
        let open = match self
            .timed_gateway_call(async move { gateway.get_open_orders(&symbol).await })
            .await
        {
            Ok(o) => o,
            Err(e) => {
                log::warn!("[RECONCILE] get_open_orders failed: {}", e);
                return;
            }
        };
        let filled = match self.gateway.get_recent_filled_orders(&self.symbol).await {
            Ok(f) => f,
            Err(e) => {
                log::warn!("[RECONCILE] get_recent_filled_orders failed: {}", e);
                Vec::new()
            }
        };

        for remote in &filled {
            let known_active = self
                .state
                .active_orders
                .iter()
                .any(|o| o.remote_id.as_deref() == Some(remote.remote_id.as_str()));
            if known_active {
                self.handle_fill(&remote.remote_id, remote.price).await;
            }
        }

        if self.state.active_orders.is_empty() && !open.is_empty() {
            for remote in &open {
                self.rebuild_local_order(remote);
            }
            log::info!("[RECONCILE] rebuilt {} orders from remote", open.len());
        } else {
            let open_ids: HashSet<&str> = open.iter().map(|o| o.remote_id.as_str()).collect();
            self.state
                .active_orders
                .retain(|o| o.remote_id.as_deref().map(|id| open_ids.contains(id)).unwrap_or(true));
            for local in self.state.active_orders.iter_mut() {
                if let Some(remote) = open
                    .iter()
                    .find(|r| Some(r.remote_id.as_str()) == local.remote_id.as_deref())
                {
                    if (remote.qty - local.contract_qty).abs() > f64::EPSILON {
                        local.contract_qty = remote.qty;
                    }
                }
            }
        }

        self.persist();
        self.gap_fill(current_price).await;
    }

    fn rebuild_local_order(&mut self, remote: &crate::gateway::RemoteOrder) {
        let base_qty = if self.instrument.inverse && remote.price > 0.0 {
            remote.qty / remote.price
        } else {
            remote.qty
        };
        let order = Order {
            local_id: self.alloc_local_id(),
            remote_id: Some(remote.remote_id.clone()),
            side: remote.side,
            price: remote.price,
            base_qty,
            contract_qty: remote.qty,
            fee_estimate: remote.qty * remote.price * self.config.fee_rate,
            state: match remote.status {
                RemoteOrderStatus::Open => OrderState::Open,
                RemoteOrderStatus::Filled => OrderState::Filled,
                RemoteOrderStatus::Cancelled => OrderState::Cancelled,
            },
            entry_reference_price: None,
        };
        self.state.active_orders.push(order);
    }

    /// Gap filling (4.5.5).
    async fn gap_fill(&mut self, current_price: f64) {
        let upward = self.state.grid_sizing.upward_grid_spacing;
        let downward = self.state.grid_sizing.downward_grid_spacing;
        let mean_spacing = (upward + downward) / 2.0;

        let mut buys: Vec<f64> = self
            .state
            .active_orders
            .iter()
            .filter(|o| o.side == Side::Buy)
            .map(|o| o.price)
            .collect();
        buys.sort_by(|a, b| b.partial_cmp(a).unwrap());
        let mut sells: Vec<f64> = self
            .state
            .active_orders
            .iter()
            .filter(|o| o.side == Side::Sell)
            .map(|o| o.price)
            .collect();
        sells.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let mut fillers: Vec<(Side, f64)> = Vec::new();

        if let (Some(&highest_buy), Some(&lowest_sell)) = (buys.first(), sells.first()) {
            let gap = lowest_sell - highest_buy;
            if gap > self.config.gap_detection_tolerance * mean_spacing && mean_spacing > 0.0 {
                let count = ((gap / mean_spacing) - 1.0).floor().max(0.0) as usize;
                for k in 1..=count {
                    let price = highest_buy + (gap / (count + 1) as f64) * k as f64;
                    let side = if price < self.state.reference_price {
                        Side::Buy
                    } else {
                        Side::Sell
                    };
                    fillers.push((side, price));
                }
            }
        }

        for window in buys.windows(2) {
            let (hi, lo) = (window[0], window[1]);
            let gap = hi - lo;
            if downward > 0.0 && gap > self.config.gap_detection_tolerance * downward {
                let count = ((gap / downward) - 1.0).floor().max(0.0) as usize;
                for k in 1..=count {
                    fillers.push((Side::Buy, lo + downward * k as f64));
                }
            }
        }
        for window in sells.windows(2) {
            let (lo, hi) = (window[0], window[1]);
            let gap = hi - lo;
            if upward > 0.0 && gap > self.config.gap_detection_tolerance * upward {
                let count = ((gap / upward) - 1.0).floor().max(0.0) as usize;
                for k in 1..=count {
                    fillers.push((Side::Sell, lo + upward * k as f64));
                }
            }
        }

        for (side, price) in fillers {
            let crosses_market = match side {
                Side::Buy => price >= current_price,
                Side::Sell => price <= current_price,
            };
            if crosses_market {
                continue;
            }
            let rounded = match self.instrument.round_price_to_tick(price) {
                Ok(p) => p,
                Err(_) => continue,
            };
            let half_tick = self.instrument.tick_size / 2.0;
            if self
                .state
                .active_orders
                .iter()
                .any(|o| (o.price - rounded).abs() < half_tick)
            {
                continue;
            }
            if let Err(e) = self.submit_new_order(side, rounded).await {
                log::warn!("[GRID] gap-fill order failed at {}: {}", rounded, e);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Infinity grid shift (4.5.7). Effective bounds expressed as a fraction
    /// of the reference-to-bound range, per the ranges the shift actually
    /// operates over (not a naive multiplicative scaling of the raw bound).
    pub async fn maybe_shift(&mut self, current_price: f64) {
        if !self.config.infinity_grid_enabled {
            return;
        }
        if let Some(last) = self.last_shift {
            if last.elapsed() < self.config.shift_min_interval {
                return;
            }
        }
        let bounds = match self.bounds {
            Some(b) => b,
            None => return,
        };
        let reference = self.state.reference_price;
        let theta = self.config.grid_shift_threshold;
        let effective_upper = reference + (1.0 - theta) * (bounds.upper - reference);
        let effective_lower = reference - (1.0 - theta) * (reference - bounds.lower);

        let direction = if current_price > effective_upper {
            ShiftDirection::Up
        } else if current_price < effective_lower {
            ShiftDirection::Down
        } else {
            return;
        };

        let overlap = self.config.grid_shift_overlap;
        let n = self.config.order_count;
        let retreat_count = ((1.0 - overlap) * n as f64).ceil() as usize;

        let new_reference = match direction {
            ShiftDirection::Down => {
                let shift_amount = (reference - bounds.lower) * (1.0 - overlap);
                reference - shift_amount
            }
            ShiftDirection::Up => {
                let shift_amount = (bounds.upper - reference) * (1.0 - overlap);
                reference + shift_amount
            }
        };
        let new_reference = self
            .instrument
            .round_price_to_tick(new_reference)
            .unwrap_or(new_reference);

        match direction {
            ShiftDirection::Down => {
                let mut sells: Vec<(u64, String)> = self
                    .state
                    .active_orders
                    .iter()
                    .filter(|o| o.side == Side::Sell)
                    .filter_map(|o| o.remote_id.clone().map(|id| (o.local_id, id)))
                    .collect();
                sells.sort_by(|a, b| b.0.cmp(&a.0));
                for (_, remote_id) in sells.into_iter().take(retreat_count) {
                    self.cancel_local_order(&remote_id).await;
                }
            }
            ShiftDirection::Up => {
                let mut buys: Vec<(u64, String)> = self
                    .state
                    .active_orders
                    .iter()
                    .filter(|o| o.side == Side::Buy)
                    .filter_map(|o| o.remote_id.clone().map(|id| (o.local_id, id)))
                    .collect();
                buys.sort_by(|a, b| a.0.cmp(&b.0));
                for (_, remote_id) in buys.into_iter().take(retreat_count) {
                    self.cancel_local_order(&remote_id).await;
                }
            }
        }

        let upward = self.state.grid_sizing.upward_grid_spacing;
        let downward = self.state.grid_sizing.downward_grid_spacing;
        match direction {
            ShiftDirection::Up => {
                for i in 1..=retreat_count {
                    let price = new_reference + i as f64 * upward;
                    if price > bounds.upper {
                        if let Err(e) = self.submit_new_order(Side::Sell, price).await {
                            log::warn!("[SHIFT] extend sell failed at {}: {}", price, e);
                        }
                    }
                }
            }
            ShiftDirection::Down => {
                for i in 1..=retreat_count {
                    let price = new_reference - i as f64 * downward;
                    if price < bounds.lower && price > 0.0 {
                        if let Err(e) = self.submit_new_order(Side::Buy, price).await {
                            log::warn!("[SHIFT] extend buy failed at {}: {}", price, e);
                        }
                    }
                }
            }
        }

        self.bounds = Some(GridBounds {
            lower: (new_reference - n as f64 * downward).max(1.0),
            upper: new_reference + n as f64 * upward,
        });
        self.state.reference_price = new_reference;
        self.last_shift = Some(Instant::now());
        self.persist();
        log::info!("[SHIFT] {:?} reference {} -> {}",
            match direction { ShiftDirection::Up => "up", ShiftDirection::Down => "down" },
            reference, new_reference);
    }

    async fn cancel_local_order(&mut self, remote_id: &str) {
        let gateway = self.gateway.clone();
        let symbol = self.symbol.clone();
        let remote_id_owned = remote_id.to_string();
        let result = self
            .timed_gateway_call(async move { gateway.cancel_order(&symbol, &remote_id_owned).await })
            .await;
        if let Err(e) = result {
            log::warn!("[SHIFT] cancel failed for {}: {}", remote_id, e);
        }
        self.state
            .active_orders
            .retain(|o| o.remote_id.as_deref() != Some(remote_id));
    }

    /// Spacing recalculation (4.5.8).
    pub async fn recalculate_spacing(&mut self) {
        let trades: Vec<Trade> = match self
            .gateway
            .get_historical_trades(
                &self.symbol,
                self.config.atr_historical_trades_lookback_minutes,
                5000,
            )
            .await
        {
            Ok(t) => t,
            Err(e) => {
                log::warn!("[SPACING] historical trades fetch failed: {}", e);
                return;
            }
        };
        let candles = bucket_trades_into_candles(&trades, 60_000);

        self.atr.reset();
        self.trend_analyzer.reset();
        for candle in &candles {
            self.atr.add_final_sample(candle);
            self.trend_analyzer.on_candle_close(candle);
        }

        let atr_value = self.atr.value();
        let analysis: TrendAnalysis = self.trend_analyzer.analyze();

        let base = match atr_value {
            Some(atr) => (atr * self.config.atr_multiplier)
                .round()
                .clamp(self.config.atr_min_grid_distance, self.config.atr_max_grid_distance),
            None => self.config.order_distance,
        };

        let factor = analysis.asymmetry_factor;
        let (upward, downward) = match analysis.direction {
            TrendDirection::Neutral => (base, base),
            _ => ((base * factor).round(), (base / factor).round()),
        };

        self.state.grid_sizing = GridSizingConfig {
            current_distance: base,
            last_atr_value: atr_value,
            last_recalculation: Some(chrono::Utc::now()),
            trend_direction: analysis.direction,
            trend_strength: analysis.strength,
            asymmetry_factor: factor,
            upward_grid_spacing: upward,
            downward_grid_spacing: downward,
        };
        self.persist();
        log::info!(
            "[SPACING] base={} up={} down={} direction={:?}",
            base, upward, downward, analysis.direction
        );
    }

    /// Entry point for an inbound market trade print (C8 dispatch).
    pub async fn process_trade(&mut self, price: f64) {
        if self.bounds.is_none() {
            self.construct_grid(price).await.ok();
            return;
        }
        let n = self.config.order_count as f64;
        let base_spacing = self.state.grid_sizing.current_distance;
        let reference = self.state.reference_price;
        if base_spacing > 0.0 && (price - reference).abs() > n * base_spacing {
            self.construct_grid(price).await.ok();
            return;
        }
        self.maybe_shift(price).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SimGateway;
    use crate::state_store::StateStore;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn scratch_dir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("grid-mm-test-{}-{}", std::process::id(), uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&p).unwrap();
        p
    }

    fn test_instrument() -> Instrument {
        Instrument {
            symbol: "BTC-PERP".to_string(),
            tick_size: 1.0,
            lot_size: 0.001,
            base_currency: "BTC".to_string(),
            quote_currency: "USD".to_string(),
            maker_fee_rate: 0.0002,
            multiplier: 1.0,
            inverse: false,
        }
    }

    fn test_config() -> GridConfig {
        GridConfig {
            order_count: 3,
            order_distance: 70.0,
            order_size: 0.01,
            max_position_size_base: 10.0,
            max_open_orders: 50,
            atr_period: 14,
            atr_multiplier: 1.0,
            atr_min_grid_distance: 10.0,
            atr_max_grid_distance: 1000.0,
            atr_recalculation_interval: Duration::from_secs(900),
            atr_historical_trades_lookback_minutes: 60,
            gap_detection_tolerance: 1.5,
            infinity_grid_enabled: true,
            grid_shift_threshold: 0.2,
            grid_shift_overlap: 0.5,
            grid_auto_shift_check_interval: Duration::from_secs(15),
            variable_order_size_enabled: false,
            min_order_size_multiplier: 0.5,
            max_order_size_multiplier: 1.5,
            fee_rate: 0.0002,
            order_sync_interval: Duration::from_secs(60),
            init_throttle: Duration::from_secs(0),
            shift_min_interval: Duration::from_secs(0),
            dry_run: false,
            trade_log_enabled: false,
        }
    }

    async fn test_core() -> GridCore {
        let dir = scratch_dir();
        let instrument = test_instrument();
        let gateway = Arc::new(SimGateway::new(instrument.clone()));
        let store = StateStore::new(dir);
        let trend_analyzer = TrendAnalyzer::new(8, 21, 14, 1.5);
        let breakout = BreakoutDetector::new(crate::breakout::BreakoutDetectorConfig::default());
        let mut core = GridCore::new(
            "BTC-PERP".to_string(),
            instrument,
            test_config(),
            gateway,
            store,
            trend_analyzer,
            breakout,
        );
        core.state.grid_sizing = GridSizingConfig::flat(70.0);
        core
    }

    #[tokio::test]
    async fn construct_grid_places_n_orders_each_side_at_expected_prices() {
        let mut core = test_core().await;
        core.construct_grid(30000.0).await.unwrap();

        let mut buys: Vec<f64> = core
            .state
            .active_orders
            .iter()
            .filter(|o| o.side == Side::Buy)
            .map(|o| o.price)
            .collect();
        buys.sort_by(|a, b| b.partial_cmp(a).unwrap());
        assert_eq!(buys, vec![29930.0, 29860.0, 29790.0]);

        let mut sells: Vec<f64> = core
            .state
            .active_orders
            .iter()
            .filter(|o| o.side == Side::Sell)
            .map(|o| o.price)
            .collect();
        sells.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(sells, vec![30070.0, 30140.0, 30210.0]);

        let bounds = core.bounds.unwrap();
        assert_eq!(bounds.lower, 29790.0);
        assert_eq!(bounds.upper, 30210.0);
    }

    #[tokio::test]
    async fn symmetric_fill_cycle_records_completed_trade() {
        let mut core = test_core().await;
        core.construct_grid(30000.0).await.unwrap();

        let sell_id = core
            .state
            .active_orders
            .iter()
            .find(|o| o.price == 30070.0)
            .unwrap()
            .remote_id
            .clone()
            .unwrap();
        core.handle_fill(&sell_id, 30070.0).await;

        let buy_id = core
            .state
            .active_orders
            .iter()
            .find(|o| o.price == 30000.0 && o.side == Side::Buy)
            .unwrap()
            .remote_id
            .clone()
            .unwrap();
        core.handle_fill(&buy_id, 30000.0).await;

        assert_eq!(core.state.completed_trades.len(), 1);
        let trade = &core.state.completed_trades[0];
        assert_eq!(trade.net_profit, 70.0 * core.config.order_size - trade.combined_fees);
        assert!(core
            .state
            .active_orders
            .iter()
            .any(|o| o.side == Side::Sell && (o.price - 30070.0).abs() < 0.5));
    }

    #[tokio::test]
    async fn duplicate_fill_event_is_idempotent() {
        let mut core = test_core().await;
        core.construct_grid(30000.0).await.unwrap();
        let sell_id = core
            .state
            .active_orders
            .iter()
            .find(|o| o.price == 30070.0)
            .unwrap()
            .remote_id
            .clone()
            .unwrap();

        core.handle_fill(&sell_id, 30070.0).await;
        let count_after_first = core.state.active_orders.len();
        core.handle_fill(&sell_id, 30070.0).await;
        assert_eq!(core.state.active_orders.len(), count_after_first);
    }

    #[tokio::test]
    async fn asymmetric_spacing_matches_bullish_scenario() {
        let mut core = test_core().await;
        core.state.grid_sizing = GridSizingConfig {
            current_distance: 70.0,
            last_atr_value: None,
            last_recalculation: None,
            trend_direction: TrendDirection::Bullish,
            trend_strength: 1.0,
            asymmetry_factor: 1.4,
            upward_grid_spacing: 98.0,
            downward_grid_spacing: 50.0,
        };
        core.construct_grid(30000.0).await.unwrap();

        let mut buys: Vec<f64> = core
            .state
            .active_orders
            .iter()
            .filter(|o| o.side == Side::Buy)
            .map(|o| o.price)
            .collect();
        buys.sort_by(|a, b| b.partial_cmp(a).unwrap());
        assert_eq!(buys, vec![29950.0, 29900.0, 29850.0]);

        let mut sells: Vec<f64> = core
            .state
            .active_orders
            .iter()
            .filter(|o| o.side == Side::Sell)
            .map(|o| o.price)
            .collect();
        sells.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(sells, vec![30098.0, 30196.0, 30294.0]);
    }

    #[tokio::test]
    async fn reconciliation_removes_order_absent_remotely() {
        let mut core = test_core().await;
        core.construct_grid(30000.0).await.unwrap();
        let phantom = Order {
            local_id: core.alloc_local_id(),
            remote_id: Some("phantom-id".to_string()),
            side: Side::Buy,
            price: 29000.0,
            base_qty: 0.01,
            contract_qty: 0.01,
            fee_estimate: 0.0,
            state: OrderState::Open,
            entry_reference_price: None,
        };
        core.state.active_orders.push(phantom);

        core.reconcile(30000.0).await;

        assert!(!core
            .state
            .active_orders
            .iter()
            .any(|o| o.remote_id.as_deref() == Some("phantom-id")));
    }
}
