//! Reference Price Board
//! Mission: Cosmetic per-instrument prices for the trading surface
//!
//! Floats are fine here: the board feeds market simulation on the client,
//! never the ledger.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Base price assigned to instruments traded before any seed or nudge.
const DEFAULT_BASE_PRICE: f64 = 100.0;

const SEED_INSTRUMENTS: &[(&str, f64)] = &[
    ("BTCUSDT", 64_250.0),
    ("ETHUSDT", 3_150.0),
    ("SOLUSDT", 142.5),
    ("EURUSD", 1.085),
    ("XAUUSD", 2_405.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NudgeDirection {
    Up,
    Down,
}

#[derive(Clone)]
pub struct PriceBoard {
    prices: Arc<RwLock<HashMap<String, f64>>>,
    nudge_pct: f64,
}

impl PriceBoard {
    pub fn new(nudge_pct: f64) -> Self {
        let mut prices = HashMap::with_capacity(SEED_INSTRUMENTS.len());
        for (symbol, price) in SEED_INSTRUMENTS {
            prices.insert((*symbol).to_string(), *price);
        }

        Self {
            prices: Arc::new(RwLock::new(prices)),
            nudge_pct,
        }
    }

    /// Current reference price, seeding unknown symbols on first touch.
    pub fn price(&self, symbol: &str) -> f64 {
        let mut prices = self.prices.write();
        *prices
            .entry(symbol.to_string())
            .or_insert(DEFAULT_BASE_PRICE)
    }

    /// Shift the reference price by the configured percentage and return the
    /// new value. Called on admin overrides so the chart agrees with the
    /// forced outcome.
    pub fn nudge(&self, symbol: &str, direction: NudgeDirection) -> f64 {
        let factor = match direction {
            NudgeDirection::Up => 1.0 + self.nudge_pct / 100.0,
            NudgeDirection::Down => 1.0 - self.nudge_pct / 100.0,
        };

        let mut prices = self.prices.write();
        let entry = prices
            .entry(symbol.to_string())
            .or_insert(DEFAULT_BASE_PRICE);
        *entry *= factor;

        debug!(symbol, price = *entry, "reference price nudged");
        *entry
    }
}
