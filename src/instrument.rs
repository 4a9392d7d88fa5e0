//! C1 — Instrument model. Tick/lot rounding and contract<->base conversion.
//! Every outbound price and quantity must flow through these helpers; that is
//! the one invariant the rest of the engine leans on without re-checking it.

use serde::{Deserialize, Serialize};

use crate::errors::InstrumentError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub tick_size: f64,
    pub lot_size: f64,
    pub base_currency: String,
    pub quote_currency: String,
    pub maker_fee_rate: f64,
    pub multiplier: f64,
    pub inverse: bool,
}

impl Instrument {
    /// Nearest multiple of tick size.
    pub fn round_price_to_tick(&self, price: f64) -> Result<f64, InstrumentError> {
        if self.tick_size <= 0.0 {
            return Err(InstrumentError::NonPositiveTick(self.tick_size));
        }
        Ok((price / self.tick_size).round() * self.tick_size)
    }

    /// Floor to lot multiple; substitutes one lot as the minimum rather than
    /// returning zero for a strictly-positive order.
    pub fn round_qty_to_lot(&self, qty: f64) -> Result<f64, InstrumentError> {
        if self.lot_size <= 0.0 {
            return Err(InstrumentError::NonPositiveLot(self.lot_size));
        }
        let floored = (qty / self.lot_size).floor() * self.lot_size;
        Ok(if floored <= 0.0 { self.lot_size } else { floored })
    }

    /// base -> contract quantity. Inverse-USD contracts settle in base but are
    /// sized in quote notional; linear contracts pass through unchanged.
    pub fn base_to_contracts(&self, base: f64, price: f64) -> Result<f64, InstrumentError> {
        if !self.inverse {
            return Ok(base);
        }
        if self.lot_size <= 0.0 {
            return Err(InstrumentError::NonPositiveLot(self.lot_size));
        }
        let notional = base * price;
        Ok((notional / self.lot_size).round() * self.lot_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc_perp() -> Instrument {
        Instrument {
            symbol: "BTC-PERP".to_string(),
            tick_size: 0.5,
            lot_size: 0.001,
            base_currency: "BTC".to_string(),
            quote_currency: "USD".to_string(),
            maker_fee_rate: 0.0002,
            multiplier: 1.0,
            inverse: false,
        }
    }

    #[test]
    fn rounds_price_to_nearest_tick() {
        let inst = btc_perp();
        assert_eq!(inst.round_price_to_tick(30000.26).unwrap(), 30000.5);
        assert_eq!(inst.round_price_to_tick(30000.1).unwrap(), 30000.0);
    }

    #[test]
    fn floors_qty_and_substitutes_lot_minimum() {
        let inst = btc_perp();
        assert_eq!(inst.round_qty_to_lot(0.0034).unwrap(), 0.003);
        assert_eq!(inst.round_qty_to_lot(0.0001).unwrap(), 0.001);
    }

    #[test]
    fn rejects_non_positive_quanta() {
        let mut inst = btc_perp();
        inst.tick_size = 0.0;
        assert!(inst.round_price_to_tick(100.0).is_err());
        inst.tick_size = 0.5;
        inst.lot_size = -1.0;
        assert!(inst.round_qty_to_lot(1.0).is_err());
    }

    #[test]
    fn inverse_contract_converts_base_to_quote_notional_lots() {
        let mut inst = btc_perp();
        inst.inverse = true;
        inst.lot_size = 1.0;
        // 0.01 BTC @ 30000 = 300 contracts (USD notional, 1-lot granularity)
        assert_eq!(inst.base_to_contracts(0.01, 30000.0).unwrap(), 300.0);
    }

    #[test]
    fn linear_contract_passes_base_through() {
        let inst = btc_perp();
        assert_eq!(inst.base_to_contracts(0.01, 30000.0).unwrap(), 0.01);
    }
}
