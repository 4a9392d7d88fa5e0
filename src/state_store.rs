//! C4 — State store. One JSON document per symbol, whole-file atomic
//! replace on every write (write-tmp-then-rename) so a crash leaves either
//! the old or the new document, never a partial one. Knows nothing of the
//! order manager that calls it; dependency runs one way.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::StateStoreError;
use crate::grid::{CompletedTrade, GridSizingConfig, Order};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub active_orders: Vec<Order>,
    pub completed_trades: Vec<CompletedTrade>,
    pub reference_price: f64,
    pub cumulative_pnl: f64,
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub cumulative_fees: f64,
    pub cumulative_volume: f64,
    pub last_updated: chrono::DateTime<chrono::Utc>,
    pub session_start_time: chrono::DateTime<chrono::Utc>,
    pub grid_sizing: GridSizingConfig,
}

impl EngineState {
    pub fn new_session() -> Self {
        let now = chrono::Utc::now();
        Self {
            active_orders: Vec::new(),
            completed_trades: Vec::new(),
            reference_price: 0.0,
            cumulative_pnl: 0.0,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            cumulative_fees: 0.0,
            cumulative_volume: 0.0,
            last_updated: now,
            session_start_time: now,
            grid_sizing: GridSizingConfig::flat(0.0),
        }
    }
}

pub struct StateStore {
    base_dir: PathBuf,
}

impl StateStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn path_for(&self, symbol: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", symbol))
    }

    /// Loads the document for `symbol`, defaulting to an empty session if the
    /// file is missing or empty. `session_start_time` is refreshed on every
    /// load; everything else carries over unchanged.
    pub fn load(&self, symbol: &str) -> Result<EngineState, StateStoreError> {
        let path = self.path_for(symbol);
        if !path.exists() {
            return Ok(EngineState::new_session());
        }
        let raw = std::fs::read_to_string(&path)?;
        if raw.trim().is_empty() {
            return Ok(EngineState::new_session());
        }
        let mut state: EngineState = serde_json::from_str(&raw)?;
        state.session_start_time = chrono::Utc::now();
        Ok(state)
    }

    /// Whole-document atomic replace: write to a sibling temp file, then
    /// rename over the target. Rename is atomic on the same filesystem.
    pub fn save(&self, symbol: &str, state: &EngineState) -> Result<(), StateStoreError> {
        std::fs::create_dir_all(&self.base_dir)?;
        let path = self.path_for(symbol);
        let tmp_path = self.tmp_path(&path);
        let content = serde_json::to_string_pretty(state)?;
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn tmp_path(&self, path: &Path) -> PathBuf {
        let mut tmp = path.to_path_buf();
        tmp.set_extension("json.tmp");
        tmp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("grid-mm-store-test-{}-{}", std::process::id(), uuid::Uuid::new_v4()));
        p
    }

    #[test]
    fn missing_file_defaults_to_empty_session() {
        let store = StateStore::new(scratch_dir());
        let state = store.load("BTC-PERP").unwrap();
        assert!(state.active_orders.is_empty());
        assert_eq!(state.cumulative_pnl, 0.0);
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = scratch_dir();
        let store = StateStore::new(dir);
        let mut state = EngineState::new_session();
        state.reference_price = 30000.0;
        state.cumulative_pnl = 12.5;
        store.save("BTC-PERP", &state).unwrap();

        let reloaded = store.load("BTC-PERP").unwrap();
        assert_eq!(reloaded.reference_price, 30000.0);
        assert_eq!(reloaded.cumulative_pnl, 12.5);
    }

    #[test]
    fn empty_file_is_treated_as_missing() {
        let dir = scratch_dir();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("BTC-PERP.json"), "").unwrap();
        let store = StateStore::new(dir);
        let state = store.load("BTC-PERP").unwrap();
        assert!(state.active_orders.is_empty());
    }
}
