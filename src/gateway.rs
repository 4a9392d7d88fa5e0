//! C5 — Exchange gateway (interface only). The venue connectivity layer
//! itself is an external collaborator; this module specifies the contract
//! the core consumes and ships one concrete in-memory implementation
//! (`SimGateway`) for dry-run mode and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;
use crate::instrument::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteOrderStatus {
    Open,
    Filled,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteOrder {
    pub remote_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub qty: f64,
    pub status: RemoteOrderStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Trade {
    pub price: f64,
    pub qty: f64,
    pub ts_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    /// Signed contract quantity: positive = net long, negative = net short.
    pub net_qty: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct PlaceOrderOptions {
    pub participate_do_not_initiate: bool,
}

impl Default for PlaceOrderOptions {
    fn default() -> Self {
        Self { participate_do_not_initiate: true }
    }
}

/// Tagged streaming payloads delivered to the session supervisor (spec §9's
/// redesign note: parse once at the transport boundary, validate required
/// fields, never hand the core an untyped blob).
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    MarketTrade(TradeEvent),
    Execution(ExecutionEvent),
    OrderStatus(OrderStatusEvent),
}

#[derive(Debug, Clone)]
pub struct TradeEvent {
    pub symbol: String,
    pub price: f64,
    pub qty: f64,
    pub ts_ms: i64,
}

#[derive(Debug, Clone)]
pub struct ExecutionEvent {
    pub symbol: String,
    pub remote_id: String,
    pub price: f64,
    pub qty: f64,
    pub ts_ms: i64,
}

#[derive(Debug, Clone)]
pub struct OrderStatusEvent {
    pub symbol: String,
    pub remote_id: String,
    pub status: RemoteOrderStatus,
    pub price: Option<f64>,
}

#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn get_instrument(&self, symbol: &str) -> Result<Instrument, GatewayError>;
    async fn get_active_instruments(&self) -> Result<Vec<Instrument>, GatewayError>;
    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<RemoteOrder>, GatewayError>;
    async fn get_recent_filled_orders(&self, symbol: &str) -> Result<Vec<RemoteOrder>, GatewayError>;
    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        price: f64,
        qty: f64,
        options: PlaceOrderOptions,
    ) -> Result<RemoteOrder, GatewayError>;
    async fn cancel_order(&self, symbol: &str, remote_id: &str) -> Result<RemoteOrder, GatewayError>;
    async fn cancel_all_orders(&self, symbol: &str) -> Result<Vec<RemoteOrder>, GatewayError>;
    async fn get_position(&self, symbol: &str) -> Result<Option<PositionSnapshot>, GatewayError>;
    async fn get_historical_trades(
        &self,
        symbol: &str,
        lookback_minutes: u32,
        limit: usize,
    ) -> Result<Vec<Trade>, GatewayError>;
}

/// In-memory gateway for dry-run mode and tests. Orders sit "open" until the
/// caller (or a test) marks them filled/cancelled; there is no live matching.
pub struct SimGateway {
    instrument: Instrument,
    next_id: AtomicU64,
    orders: Mutex<HashMap<String, RemoteOrder>>,
    filled: Mutex<Vec<RemoteOrder>>,
    position: Mutex<PositionSnapshot>,
    trade_history: Mutex<Vec<Trade>>,
}

impl SimGateway {
    pub fn new(instrument: Instrument) -> Self {
        let symbol = instrument.symbol.clone();
        Self {
            instrument,
            next_id: AtomicU64::new(1),
            orders: Mutex::new(HashMap::new()),
            filled: Mutex::new(Vec::new()),
            position: Mutex::new(PositionSnapshot { symbol, net_qty: 0.0 }),
            trade_history: Mutex::new(Vec::new()),
        }
    }

    pub fn push_trade_history(&self, trades: Vec<Trade>) {
        self.trade_history.lock().unwrap().extend(trades);
    }

    /// Test/dry-run hook: mark a resting order filled and move it to the
    /// recently-filled bucket that `get_recent_filled_orders` surfaces.
    pub fn simulate_fill(&self, remote_id: &str) -> Option<RemoteOrder> {
        let mut orders = self.orders.lock().unwrap();
        if let Some(mut order) = orders.remove(remote_id) {
            order.status = RemoteOrderStatus::Filled;
            self.filled.lock().unwrap().push(order.clone());
            let mut position = self.position.lock().unwrap();
            let delta = match order.side {
                Side::Buy => order.qty,
                Side::Sell => -order.qty,
            };
            position.net_qty += delta;
            Some(order)
        } else {
            None
        }
    }
}

#[async_trait]
impl ExchangeGateway for SimGateway {
    async fn get_instrument(&self, _symbol: &str) -> Result<Instrument, GatewayError> {
        Ok(self.instrument.clone())
    }

    async fn get_active_instruments(&self) -> Result<Vec<Instrument>, GatewayError> {
        Ok(vec![self.instrument.clone()])
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<RemoteOrder>, GatewayError> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .filter(|o| o.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn get_recent_filled_orders(&self, symbol: &str) -> Result<Vec<RemoteOrder>, GatewayError> {
        Ok(self
            .filled
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        price: f64,
        qty: f64,
        _options: PlaceOrderOptions,
    ) -> Result<RemoteOrder, GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let remote_id = format!("sim-{}", id);
        let order = RemoteOrder {
            remote_id: remote_id.clone(),
            symbol: symbol.to_string(),
            side,
            price,
            qty,
            status: RemoteOrderStatus::Open,
        };
        self.orders.lock().unwrap().insert(remote_id, order.clone());
        Ok(order)
    }

    async fn cancel_order(&self, _symbol: &str, remote_id: &str) -> Result<RemoteOrder, GatewayError> {
        let mut order = self
            .orders
            .lock()
            .unwrap()
            .remove(remote_id)
            .ok_or_else(|| GatewayError::Validation(format!("unknown order {}", remote_id)))?;
        order.status = RemoteOrderStatus::Cancelled;
        Ok(order)
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<Vec<RemoteOrder>, GatewayError> {
        let mut orders = self.orders.lock().unwrap();
        let ids: Vec<String> = orders
            .values()
            .filter(|o| o.symbol == symbol)
            .map(|o| o.remote_id.clone())
            .collect();
        let mut cancelled = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(mut order) = orders.remove(&id) {
                order.status = RemoteOrderStatus::Cancelled;
                cancelled.push(order);
            }
        }
        Ok(cancelled)
    }

    async fn get_position(&self, _symbol: &str) -> Result<Option<PositionSnapshot>, GatewayError> {
        Ok(Some(self.position.lock().unwrap().clone()))
    }

    async fn get_historical_trades(
        &self,
        _symbol: &str,
        _lookback_minutes: u32,
        limit: usize,
    ) -> Result<Vec<Trade>, GatewayError> {
        let history = self.trade_history.lock().unwrap();
        let start = history.len().saturating_sub(limit);
        Ok(history[start..].to_vec())
    }
}
