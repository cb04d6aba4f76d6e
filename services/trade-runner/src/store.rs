//! Per-symbol history and position display cache

use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::types::{Decision, MarketSnapshot, PositionRecord};

/// Snapshots kept per symbol
pub const SNAPSHOT_CAPACITY: usize = 20;

/// Decisions kept per symbol
pub const DECISION_CAPACITY: usize = 30;

#[derive(Debug, Default)]
struct SymbolEntry {
    snapshots: VecDeque<MarketSnapshot>,
    decisions: VecDeque<Decision>,
    position: Option<PositionRecord>,
}

/// Owns every per-symbol piece of mutable state the runner keeps between cycles.
///
/// History only enriches prompts. The cached position is for display; decisions
/// and reconciliation always re-read positions from the exchange.
#[derive(Debug)]
pub struct Store {
    entries: HashMap<String, SymbolEntry>,
    snapshot_capacity: usize,
    decision_capacity: usize,
}

impl Store {
    pub fn new() -> Self {
        Self::with_capacity(SNAPSHOT_CAPACITY, DECISION_CAPACITY)
    }

    pub fn with_capacity(snapshot_capacity: usize, decision_capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            snapshot_capacity: snapshot_capacity.max(1),
            decision_capacity: decision_capacity.max(1),
        }
    }

    fn entry(&mut self, symbol: &str) -> &mut SymbolEntry {
        self.entries.entry(symbol.to_string()).or_default()
    }

    /// Append a snapshot, evicting the oldest past capacity
    pub fn push_snapshot(&mut self, snapshot: MarketSnapshot) {
        let cap = self.snapshot_capacity;
        let entry = self.entry(&snapshot.symbol);
        entry.snapshots.push_back(snapshot);
        while entry.snapshots.len() > cap {
            entry.snapshots.pop_front();
        }
    }

    /// Append a decision, evicting the oldest past capacity
    pub fn push_decision(&mut self, symbol: &str, decision: Decision) {
        let cap = self.decision_capacity;
        let entry = self.entry(symbol);
        entry.decisions.push_back(decision);
        while entry.decisions.len() > cap {
            entry.decisions.pop_front();
        }
    }

    /// Snapshots for a symbol, oldest first
    pub fn snapshots(&self, symbol: &str) -> impl Iterator<Item = &MarketSnapshot> {
        self.entries
            .get(symbol)
            .into_iter()
            .flat_map(|e| e.snapshots.iter())
    }

    pub fn snapshot_count(&self, symbol: &str) -> usize {
        self.entries.get(symbol).map_or(0, |e| e.snapshots.len())
    }

    pub fn decision_count(&self, symbol: &str) -> usize {
        self.entries.get(symbol).map_or(0, |e| e.decisions.len())
    }

    pub fn last_decision(&self, symbol: &str) -> Option<&Decision> {
        self.entries.get(symbol).and_then(|e| e.decisions.back())
    }

    /// Closing prices of the last `n` snapshots (fewer if history is short)
    pub fn recent_prices(&self, symbol: &str, n: usize) -> Vec<rust_decimal::Decimal> {
        let Some(entry) = self.entries.get(symbol) else {
            return Vec::new();
        };
        let skip = entry.snapshots.len().saturating_sub(n);
        entry.snapshots.iter().skip(skip).map(|s| s.price).collect()
    }

    /// Replace the display cache with a fresh exchange read
    pub fn record_position(&mut self, symbol: &str, position: Option<PositionRecord>) {
        debug!(
            "Position cache {}: {}",
            symbol,
            crate::types::describe_position(position.as_ref())
        );
        self.entry(symbol).position = position;
    }

    pub fn cached_position(&self, symbol: &str) -> Option<&PositionRecord> {
        self.entries.get(symbol).and_then(|e| e.position.as_ref())
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timeframe;
    use crate::types::{Confidence, Signal};
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn snapshot(symbol: &str, price: i64) -> MarketSnapshot {
        MarketSnapshot {
            symbol: symbol.to_string(),
            timeframe: Timeframe::Minute15,
            price: Decimal::from(price),
            high: Decimal::from(price),
            low: Decimal::from(price),
            volume: Decimal::ONE,
            price_change_pct: Decimal::ZERO,
            timestamp: Utc::now(),
            recent_bars: vec![],
        }
    }

    fn decision(signal: Signal) -> Decision {
        Decision {
            signal,
            reason: "test".to_string(),
            stop_loss: None,
            take_profit: None,
            confidence: Confidence::Low,
            risk_assessment: None,
            position_percentage: None,
            reasoning: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_snapshot_eviction_keeps_insertion_order() {
        let mut store = Store::new();
        for price in 1..=21 {
            store.push_snapshot(snapshot("BTC/USDT", price));
        }

        assert_eq!(store.snapshot_count("BTC/USDT"), 20);
        let prices: Vec<Decimal> = store.snapshots("BTC/USDT").map(|s| s.price).collect();
        let expected: Vec<Decimal> = (2..=21).map(Decimal::from).collect();
        assert_eq!(prices, expected);
    }

    #[test]
    fn test_decision_capacity() {
        let mut store = Store::new();
        for _ in 0..35 {
            store.push_decision("ETH/USDT", decision(Signal::Hold));
        }
        store.push_decision("ETH/USDT", decision(Signal::Buy));

        assert_eq!(store.decision_count("ETH/USDT"), DECISION_CAPACITY);
        assert_eq!(store.last_decision("ETH/USDT").unwrap().signal, Signal::Buy);
        assert_eq!(store.decision_count("BTC/USDT"), 0);
        assert!(store.last_decision("BTC/USDT").is_none());
    }

    #[test]
    fn test_recent_prices_and_isolation() {
        let mut store = Store::new();
        for price in 1..=7 {
            store.push_snapshot(snapshot("BTC/USDT", price));
        }
        store.push_snapshot(snapshot("SOL/USDT", 50));

        assert_eq!(
            store.recent_prices("BTC/USDT", 5),
            (3..=7).map(Decimal::from).collect::<Vec<_>>()
        );
        assert_eq!(store.recent_prices("SOL/USDT", 5), vec![Decimal::from(50)]);
        assert!(store.recent_prices("XRP/USDT", 5).is_empty());
    }

    #[test]
    fn test_position_cache() {
        let mut store = Store::new();
        let pos = PositionRecord::from_signed_amount(
            "BTC/USDT",
            Decimal::ONE,
            Decimal::from(100),
            Decimal::ZERO,
        );
        store.record_position("BTC/USDT", pos.clone());
        assert_eq!(store.cached_position("BTC/USDT"), pos.as_ref());

        store.record_position("BTC/USDT", None);
        assert!(store.cached_position("BTC/USDT").is_none());
    }
}
