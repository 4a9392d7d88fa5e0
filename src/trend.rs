//! C3 — Trend analyzer. Combines fast/slow EMA and RSI into a direction,
//! strength, and the asymmetry factor the grid core applies to spacing.

use serde::{Deserialize, Serialize};

use crate::indicators::{Candle, Ema, Rsi};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub direction: TrendDirection,
    pub strength: f64,
    pub asymmetry_factor: f64,
}

impl TrendAnalysis {
    pub fn flat() -> Self {
        Self {
            direction: TrendDirection::Neutral,
            strength: 0.0,
            asymmetry_factor: 1.0,
        }
    }
}

pub struct TrendAnalyzer {
    pub fast_ema: Ema,
    pub slow_ema: Ema,
    pub rsi: Rsi,
    pub max_asymmetry: f64,
}

impl TrendAnalyzer {
    pub fn new(fast_period: usize, slow_period: usize, rsi_period: usize, max_asymmetry: f64) -> Self {
        Self {
            fast_ema: Ema::new(fast_period),
            slow_ema: Ema::new(slow_period),
            rsi: Rsi::new(rsi_period),
            max_asymmetry,
        }
    }

    pub fn reset(&mut self) {
        self.fast_ema.reset();
        self.slow_ema.reset();
        self.rsi.reset();
    }

    pub fn on_candle_close(&mut self, candle: &Candle) {
        self.fast_ema.add_final_sample(candle.close);
        self.slow_ema.add_final_sample(candle.close);
        self.rsi.add_final_sample(candle.close);
    }

    pub fn analyze(&self) -> TrendAnalysis {
        let (fast, slow, rsi) = match (self.fast_ema.value(), self.slow_ema.value(), self.rsi.value()) {
            (Some(f), Some(s), Some(r)) => (f, s, r),
            _ => return TrendAnalysis::flat(),
        };

        let mut direction = if fast > slow {
            TrendDirection::Bullish
        } else if fast < slow {
            TrendDirection::Bearish
        } else {
            TrendDirection::Neutral
        };

        if rsi >= 70.0 {
            direction = match direction {
                TrendDirection::Bullish => TrendDirection::Neutral,
                TrendDirection::Neutral => TrendDirection::Bearish,
                other => other,
            };
        } else if rsi <= 30.0 {
            direction = match direction {
                TrendDirection::Bearish => TrendDirection::Neutral,
                TrendDirection::Neutral => TrendDirection::Bullish,
                other => other,
            };
        }

        let ema_strength = if fast + slow != 0.0 {
            (((fast - slow).abs()) / ((fast + slow) / 2.0) * 10.0).min(1.0)
        } else {
            0.0
        };
        let rsi_strength = if rsi >= 70.0 {
            ((rsi - 70.0) / 30.0).min(1.0)
        } else if rsi <= 30.0 {
            ((30.0 - rsi) / 30.0).min(1.0)
        } else {
            0.0
        };
        let strength = (0.7 * ema_strength + 0.3 * rsi_strength).clamp(0.0, 1.0);

        let asymmetry_factor = match direction {
            TrendDirection::Neutral => 1.0,
            TrendDirection::Bullish => self.scaled_factor(strength),
            TrendDirection::Bearish => 1.0 / self.scaled_factor(strength),
        };

        TrendAnalysis {
            direction,
            strength,
            asymmetry_factor,
        }
    }

    fn scaled_factor(&self, strength: f64) -> f64 {
        if strength >= 0.7 {
            self.max_asymmetry
        } else {
            1.0 + (strength / 0.7) * (self.max_asymmetry - 1.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warm(analyzer: &mut TrendAnalyzer, closes: &[f64]) {
        for &c in closes {
            analyzer.on_candle_close(&Candle {
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1.0,
                open_time_ms: 0,
            });
        }
    }

    #[test]
    fn flat_series_is_neutral_with_zero_strength() {
        let mut analyzer = TrendAnalyzer::new(8, 21, 14, 1.5);
        warm(&mut analyzer, &[100.0; 25]);
        let analysis = analyzer.analyze();
        assert_eq!(analysis.direction, TrendDirection::Neutral);
        assert_eq!(analysis.strength, 0.0);
        assert_eq!(analysis.asymmetry_factor, 1.0);
    }

    #[test]
    fn not_warmed_up_returns_flat() {
        let mut analyzer = TrendAnalyzer::new(8, 21, 14, 1.5);
        warm(&mut analyzer, &[100.0; 5]);
        assert_eq!(analyzer.analyze().direction, TrendDirection::Neutral);
    }

    #[test]
    fn sustained_uptrend_is_bullish_with_factor_above_one() {
        let mut analyzer = TrendAnalyzer::new(8, 21, 14, 1.5);
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 * 2.0).collect();
        warm(&mut analyzer, &closes);
        let analysis = analyzer.analyze();
        assert_eq!(analysis.direction, TrendDirection::Bullish);
        assert!(analysis.asymmetry_factor > 1.0);
    }
}
