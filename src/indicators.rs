//! C2 — Streaming indicator engine. ATR(14), RSI(14), EMA(fast/slow) as pure
//! streaming state machines: each sample folds into running state, nothing
//! ever rescans history.

use serde::{Deserialize, Serialize};

use crate::gateway::Trade;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub open_time_ms: i64,
}

/// Exponential moving average over candle closes.
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
    provisional: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            alpha: 2.0 / (period as f64 + 1.0),
            value: None,
            provisional: None,
        }
    }

    pub fn reset(&mut self) {
        self.value = None;
        self.provisional = None;
    }

    pub fn add_final_sample(&mut self, close: f64) {
        self.value = Some(match self.value {
            Some(prev) => prev + self.alpha * (close - prev),
            None => close,
        });
        self.provisional = None;
    }

    pub fn update_in_progress(&mut self, close: f64) {
        self.provisional = Some(match self.value {
            Some(prev) => prev + self.alpha * (close - prev),
            None => close,
        });
    }

    /// Last finalized reading.
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// Finalized reading, or the in-progress candle's provisional value if newer.
    pub fn current(&self) -> Option<f64> {
        self.provisional.or(self.value)
    }
}

/// Wilder-smoothed relative strength index.
pub struct Rsi {
    period: usize,
    avg_gain: Option<f64>,
    avg_loss: Option<f64>,
    prev_close: Option<f64>,
    value: Option<f64>,
    samples: usize,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            avg_gain: None,
            avg_loss: None,
            prev_close: None,
            value: None,
            samples: 0,
        }
    }

    pub fn reset(&mut self) {
        let period = self.period;
        *self = Self::new(period);
    }

    pub fn add_final_sample(&mut self, close: f64) {
        if let Some(prev) = self.prev_close {
            let change = close - prev;
            let gain = change.max(0.0);
            let loss = (-change).max(0.0);
            let n = self.period as f64;
            self.avg_gain = Some(match self.avg_gain {
                Some(ag) => (ag * (n - 1.0) + gain) / n,
                None => gain,
            });
            self.avg_loss = Some(match self.avg_loss {
                Some(al) => (al * (n - 1.0) + loss) / n,
                None => loss,
            });
            self.samples += 1;
            if self.samples >= self.period {
                let ag = self.avg_gain.unwrap();
                let al = self.avg_loss.unwrap();
                self.value = Some(if al == 0.0 {
                    100.0
                } else {
                    let rs = ag / al;
                    100.0 - 100.0 / (1.0 + rs)
                });
            }
        }
        self.prev_close = Some(close);
    }

    pub fn update_in_progress(&mut self, _close: f64) {
        // RSI has no meaningful provisional reading cheaper than a full
        // recompute; callers rely on value() alone mid-candle.
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Wilder-smoothed average true range over completed candles.
pub struct Atr {
    period: usize,
    prev_close: Option<f64>,
    avg: Option<f64>,
    samples: usize,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            avg: None,
            samples: 0,
        }
    }

    pub fn reset(&mut self) {
        let period = self.period;
        *self = Self::new(period);
    }

    pub fn add_final_sample(&mut self, candle: &Candle) {
        let true_range = match self.prev_close {
            Some(pc) => (candle.high - candle.low)
                .max((candle.high - pc).abs())
                .max((candle.low - pc).abs()),
            None => candle.high - candle.low,
        };
        let n = self.period as f64;
        self.avg = Some(match self.avg {
            Some(prev) => (prev * (n - 1.0) + true_range) / n,
            None => true_range,
        });
        self.samples += 1;
        self.prev_close = Some(candle.close);
    }

    pub fn update_in_progress(&mut self, _candle: &Candle) {}

    pub fn value(&self) -> Option<f64> {
        if self.samples >= self.period {
            self.avg
        } else {
            None
        }
    }
}

/// Buckets raw trade prints into 1-minute candles, oldest first.
pub fn bucket_trades_into_candles(trades: &[Trade], bucket_ms: i64) -> Vec<Candle> {
    if trades.is_empty() {
        return Vec::new();
    }
    let mut sorted = trades.to_vec();
    sorted.sort_by_key(|t| t.ts_ms);

    let mut candles: Vec<Candle> = Vec::new();
    let mut bucket_start = sorted[0].ts_ms - (sorted[0].ts_ms % bucket_ms);
    let mut open = sorted[0].price;
    let mut high = sorted[0].price;
    let mut low = sorted[0].price;
    let mut close = sorted[0].price;
    let mut volume = 0.0;

    for t in &sorted {
        let this_bucket = t.ts_ms - (t.ts_ms % bucket_ms);
        if this_bucket != bucket_start {
            candles.push(Candle {
                open,
                high,
                low,
                close,
                volume,
                open_time_ms: bucket_start,
            });
            bucket_start = this_bucket;
            open = t.price;
            high = t.price;
            low = t.price;
            volume = 0.0;
        }
        high = high.max(t.price);
        low = low.min(t.price);
        close = t.price;
        volume += t.qty;
    }
    candles.push(Candle {
        open,
        high,
        low,
        close,
        volume,
        open_time_ms: bucket_start,
    });
    candles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_seeds_on_first_sample_then_smooths() {
        let mut ema = Ema::new(3);
        ema.add_final_sample(10.0);
        assert_eq!(ema.value(), Some(10.0));
        ema.add_final_sample(20.0);
        assert_eq!(ema.value(), Some(15.0)); // alpha = 0.5
    }

    #[test]
    fn rsi_is_undefined_before_warmup() {
        let mut rsi = Rsi::new(14);
        for i in 0..13 {
            rsi.add_final_sample(100.0 + i as f64);
        }
        assert_eq!(rsi.value(), None);
        rsi.add_final_sample(114.0);
        assert!(rsi.value().is_some());
    }

    #[test]
    fn rsi_is_100_on_pure_uptrend() {
        let mut rsi = Rsi::new(14);
        for i in 0..20 {
            rsi.add_final_sample(100.0 + i as f64);
        }
        assert_eq!(rsi.value(), Some(100.0));
    }

    #[test]
    fn atr_undefined_before_warmup() {
        let mut atr = Atr::new(14);
        for _ in 0..13 {
            atr.add_final_sample(&Candle {
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume: 1.0,
                open_time_ms: 0,
            });
        }
        assert_eq!(atr.value(), None);
    }

    #[test]
    fn bucket_trades_groups_by_minute() {
        let trades = vec![
            Trade { price: 100.0, qty: 1.0, ts_ms: 0 },
            Trade { price: 101.0, qty: 1.0, ts_ms: 30_000 },
            Trade { price: 99.0, qty: 1.0, ts_ms: 61_000 },
        ];
        let candles = bucket_trades_into_candles(&trades, 60_000);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].high, 101.0);
        assert_eq!(candles[1].open, 99.0);
    }
}
