//! C7 — Breakout detector. Advisory only: a positive classification tells the
//! grid core to suspend new grid placement for a cooldown, nothing more.
//! Directional breakout trading is a deliberate non-goal of the core.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakoutDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakoutReading {
    pub is_breakout: bool,
    pub strength: f64,
    pub direction: BreakoutDirection,
}

pub struct BreakoutDetectorConfig {
    pub theta_atr: f64,
    pub theta_body: f64,
    pub theta_vol: f64,
    pub cooldown_minutes: i64,
}

impl Default for BreakoutDetectorConfig {
    fn default() -> Self {
        Self {
            theta_atr: 1.8,
            theta_body: 0.7,
            theta_vol: 1.5,
            cooldown_minutes: 15,
        }
    }
}

pub struct BreakoutDetector {
    candles: VecDeque<crate::indicators::Candle>,
    config: BreakoutDetectorConfig,
    cooldown_until_ms: Option<i64>,
}

const WINDOW: usize = 6;

impl BreakoutDetector {
    pub fn new(config: BreakoutDetectorConfig) -> Self {
        Self {
            candles: VecDeque::with_capacity(WINDOW),
            config,
            cooldown_until_ms: None,
        }
    }

    pub fn is_cooldown_active(&self, now_ms: i64) -> bool {
        self.cooldown_until_ms.map(|until| now_ms < until).unwrap_or(false)
    }

    /// Feed a newly closed candle; `last_atr` is C2's latest ATR reading.
    pub fn on_candle_close(
        &mut self,
        candle: crate::indicators::Candle,
        last_atr: Option<f64>,
        now_ms: i64,
    ) -> Option<BreakoutReading> {
        self.candles.push_back(candle);
        if self.candles.len() > WINDOW {
            self.candles.pop_front();
        }
        if self.candles.len() < WINDOW {
            return None;
        }
        let last_atr = last_atr?;

        let current = *self.candles.back().unwrap();
        let body = (current.close - current.open).abs();
        let wick = (current.high - current.low) - body;
        let body_to_wick = if wick > 0.0 { body / wick } else { body };
        let direction = if current.close > current.open {
            BreakoutDirection::Up
        } else {
            BreakoutDirection::Down
        };

        let preceding: Vec<_> = self.candles.iter().rev().skip(1).take(5).collect();
        let prev_high = preceding.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let prev_low = preceding.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let breaking_through = match direction {
            BreakoutDirection::Up => current.close > prev_high,
            BreakoutDirection::Down => current.close < prev_low,
        };

        let avg_volume: f64 =
            preceding.iter().map(|c| c.volume).sum::<f64>() / preceding.len() as f64;
        let volume_ratio = if avg_volume > 0.0 {
            current.volume / avg_volume
        } else {
            0.0
        };
        let candle_size_to_atr = if last_atr > 0.0 { body / last_atr } else { 0.0 };

        let strength = candle_size_to_atr
            * body_to_wick
            * volume_ratio
            * if breaking_through { 1.5 } else { 0.8 };

        let is_breakout = candle_size_to_atr >= self.config.theta_atr
            && body_to_wick >= self.config.theta_body
            && volume_ratio >= self.config.theta_vol
            && breaking_through;

        if is_breakout {
            self.cooldown_until_ms = Some(now_ms + self.config.cooldown_minutes * 60_000);
            log::info!(
                "[BREAKOUT] {:?} breakout detected (strength={:.2}), suspending grid placement for {}m",
                direction, strength, self.config.cooldown_minutes
            );
        }

        Some(BreakoutReading {
            is_breakout,
            strength,
            direction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::Candle;

    fn candle(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle { open, high, low, close, volume, open_time_ms: 0 }
    }

    #[test]
    fn needs_full_window_before_classifying() {
        let mut detector = BreakoutDetector::new(BreakoutDetectorConfig::default());
        for _ in 0..4 {
            assert!(detector.on_candle_close(candle(100.0, 101.0, 99.0, 100.5, 10.0), Some(1.0), 0).is_none());
        }
    }

    #[test]
    fn strong_breakout_above_prior_highs_trips_cooldown() {
        let mut detector = BreakoutDetector::new(BreakoutDetectorConfig::default());
        for _ in 0..5 {
            detector.on_candle_close(candle(100.0, 101.0, 99.0, 100.2, 10.0), Some(1.0), 0);
        }
        let reading = detector
            .on_candle_close(candle(101.0, 110.0, 100.8, 109.5, 50.0), Some(1.0), 0)
            .unwrap();
        assert!(reading.is_breakout);
        assert!(detector.is_cooldown_active(1));
        assert!(!detector.is_cooldown_active(20 * 60_000));
    }
}
