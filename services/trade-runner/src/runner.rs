//! Trade Runner - Main orchestration loop
//!
//! One cycle walks every instrument in order: snapshot, decision, reconciliation.
//! Instruments never overlap, so a close/open pair on one symbol is never
//! interleaved with position reads for another. Any per-instrument failure is
//! logged and the cycle moves on.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{AppConfig, InstrumentConfig, RiskPolicy};
use crate::decision::DecisionPipeline;
use crate::error::{CycleError, GatewayError};
use crate::gateway::ExchangeGateway;
use crate::news::{NewsBoard, NewsSource};
use crate::oracle::ReasoningOracle;
use crate::reconciler::{PositionReconciler, ReconcileOutcome};
use crate::snapshot::SnapshotBuilder;
use crate::store::Store;
use crate::types::Decision;

/// What one instrument's pass produced
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentOutcome {
    pub symbol: String,
    pub decision: Decision,
    pub reconcile: ReconcileOutcome,
}

/// Summary of one pass over every instrument
#[derive(Debug)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// In configuration order
    pub outcomes: Vec<Result<InstrumentOutcome, CycleError>>,
}

impl CycleReport {
    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.completed()
    }

    /// Outcome for a symbol, if it was part of the cycle
    pub fn outcome(&self, symbol: &str) -> Option<&Result<InstrumentOutcome, CycleError>> {
        self.outcomes.iter().find(|o| match o {
            Ok(outcome) => outcome.symbol == symbol,
            Err(err) => err.symbol() == symbol,
        })
    }
}

/// Main runner that drives the decision loop
pub struct TradeRunner {
    instruments: Vec<InstrumentConfig>,
    risk: Option<RiskPolicy>,
    gateway: Arc<dyn ExchangeGateway>,
    snapshots: SnapshotBuilder,
    pipeline: DecisionPipeline,
    reconciler: PositionReconciler,
    store: Store,
    news: NewsBoard,
    news_source: Option<Arc<dyn NewsSource>>,
    cycle_interval: Duration,
    news_interval: Duration,
}

impl TradeRunner {
    /// Create new trade runner
    pub fn new(
        config: &AppConfig,
        gateway: Arc<dyn ExchangeGateway>,
        oracle: Arc<dyn ReasoningOracle>,
    ) -> Self {
        Self {
            instruments: config.instruments.clone(),
            risk: config.risk,
            snapshots: SnapshotBuilder::new(gateway.clone(), &config.execution),
            pipeline: DecisionPipeline::new(oracle, config.risk),
            reconciler: PositionReconciler::new(gateway.clone(), config.execution),
            gateway,
            store: Store::new(),
            news: NewsBoard::new(),
            news_source: None,
            cycle_interval: config.cycle_interval(),
            news_interval: Duration::from_secs(config.news.refresh_minutes.max(1) * 60),
        }
    }

    pub fn with_news_source(mut self, source: Arc<dyn NewsSource>) -> Self {
        self.news_source = Some(source);
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn news_mut(&mut self) -> &mut NewsBoard {
        &mut self.news
    }

    /// Startup checks: log equity, warn on low balance, set leverage.
    ///
    /// An equity read failure is returned; leverage failures are only logged.
    pub async fn prepare(&self) -> Result<Decimal, GatewayError> {
        let equity = self.gateway.fetch_equity().await?;
        info!("Account equity: {} USDT ({} gateway)", equity, self.gateway.name());

        if let Some(risk) = &self.risk {
            if equity < risk.balance_warning_level {
                warn!(
                    "⚠️ Equity {} USDT is below the warning level {} USDT",
                    equity, risk.balance_warning_level
                );
            }
        }

        for instrument in &self.instruments {
            match self
                .gateway
                .set_leverage(&instrument.symbol, instrument.leverage)
                .await
            {
                Ok(()) => info!("[{}] Leverage set to {}x", instrument.symbol, instrument.leverage),
                Err(e) => warn!("[{}] Failed to set leverage: {}", instrument.symbol, e),
            }
            if instrument.simulation {
                info!("📝 [{}] Running in SIMULATION mode", instrument.symbol);
            } else {
                warn!("💰 [{}] Running in LIVE mode - orders will be submitted", instrument.symbol);
            }
        }

        Ok(equity)
    }

    /// Pull fresh news; failures keep the previous text
    pub async fn refresh_news(&mut self) {
        let Some(source) = self.news_source.clone() else {
            return;
        };
        if let Err(e) = self.news.refresh(source.as_ref()).await {
            warn!("News refresh failed, keeping previous text: {}", e);
        }
    }

    /// One pass over every instrument, sequentially
    pub async fn run_cycle(&mut self) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!("Cycle {} starting ({} instruments)", cycle_id, self.instruments.len());

        let instruments = self.instruments.clone();
        let mut outcomes = Vec::with_capacity(instruments.len());
        for instrument in &instruments {
            let result = self.run_instrument(instrument).await;
            if let Err(err) = &result {
                error!(
                    "[{}] Skipped at {}: {}",
                    err.symbol(),
                    err.stage(),
                    err
                );
            }
            outcomes.push(result);
        }

        let report = CycleReport {
            cycle_id,
            started_at,
            outcomes,
        };
        info!(
            "Cycle {} finished: {} completed, {} skipped",
            cycle_id,
            report.completed(),
            report.skipped()
        );
        report
    }

    /// Full pass for one instrument
    pub async fn run_instrument(
        &mut self,
        instrument: &InstrumentConfig,
    ) -> Result<InstrumentOutcome, CycleError> {
        let symbol = instrument.symbol.as_str();
        debug!("[{}] Pass starting", symbol);

        let snapshot = self.snapshots.build(instrument).await?;

        let positions = self
            .gateway
            .fetch_all_positions()
            .await
            .map_err(|e| CycleError::data(symbol, "positions", e))?;
        let position = positions.get(symbol).cloned();
        self.store.record_position(symbol, position.clone());

        let decision = self
            .pipeline
            .decide(&mut self.store, &snapshot, position.as_ref(), self.news.text())
            .await?;

        let reconcile = self
            .reconciler
            .reconcile(&mut self.store, instrument, &decision, &snapshot)
            .await?;

        Ok(InstrumentOutcome {
            symbol: symbol.to_string(),
            decision,
            reconcile,
        })
    }

    /// Run until Ctrl-C. The first cycle starts immediately.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(
            "Trade runner starting main loop: cycle every {:?}, news every {:?}",
            self.cycle_interval, self.news_interval
        );

        let mut news_interval = interval(self.news_interval);
        let mut cycle_interval = interval(self.cycle_interval);
        cycle_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                result = &mut shutdown => {
                    if let Err(e) = result {
                        error!("Failed to listen for shutdown signal: {}", e);
                    }
                    info!("Shutdown signal received, stopping trade runner");
                    break;
                }
                _ = news_interval.tick() => {
                    self.refresh_news().await;
                }
                _ = cycle_interval.tick() => {
                    self.run_cycle().await;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExecutionConfig, LlmConfig, Timeframe};
    use crate::error::OracleError;
    use crate::paper::PaperExchange;
    use crate::types::Bar;
    use async_trait::async_trait;

    struct FixedReply(&'static str);

    #[async_trait]
    impl ReasoningOracle for FixedReply {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, OracleError> {
            Ok(self.0.to_string())
        }
    }

    fn config(symbols: &[&str]) -> AppConfig {
        AppConfig {
            instruments: symbols
                .iter()
                .map(|s| InstrumentConfig {
                    symbol: s.to_string(),
                    leverage: 3,
                    timeframe: Timeframe::Minute15,
                    simulation: false,
                    fixed_quantity: None,
                })
                .collect(),
            risk: Some(RiskPolicy::default()),
            execution: ExecutionConfig::immediate(),
            llm: LlmConfig {
                api_key: "sk-test".to_string(),
                base_url: "http://localhost".to_string(),
                model: "test".to_string(),
            },
            exchange: Default::default(),
            news: Default::default(),
        }
    }

    fn bar(close: i64) -> Bar {
        Bar {
            timestamp: Utc::now(),
            open: Decimal::from(close),
            high: Decimal::from(close),
            low: Decimal::from(close),
            close: Decimal::from(close),
            volume: Decimal::ONE,
        }
    }

    #[tokio::test]
    async fn test_prepare_sets_leverage_and_reports_equity() {
        let exchange = Arc::new(PaperExchange::new(Decimal::from(50)));
        let runner = TradeRunner::new(
            &config(&["BTC/USDT", "ETH/USDT"]),
            exchange.clone(),
            Arc::new(FixedReply("")),
        );

        assert_eq!(runner.prepare().await.unwrap(), Decimal::from(50));
        assert_eq!(exchange.leverage("BTC/USDT"), Some(3));
        assert_eq!(exchange.leverage("ETH/USDT"), Some(3));

        exchange.fail_equity(true);
        assert!(runner.prepare().await.is_err());
    }

    #[tokio::test]
    async fn test_cycle_skips_failed_instrument_and_continues() {
        let exchange = Arc::new(PaperExchange::new(Decimal::from(1000)));
        exchange.fail_bars_for("BTC/USDT");
        exchange.set_bars("ETH/USDT", vec![bar(99), bar(100)]);
        let mut runner = TradeRunner::new(
            &config(&["BTC/USDT", "ETH/USDT"]),
            exchange.clone(),
            Arc::new(FixedReply(r#"{"signal": "BUY", "confidence": "HIGH", "position_percentage": 5}"#)),
        );

        let report = runner.run_cycle().await;

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.completed(), 1);
        assert_eq!(report.skipped(), 1);
        let btc = report.outcome("BTC/USDT").unwrap().as_ref().unwrap_err();
        assert_eq!(btc.stage(), "snapshot");
        assert!(report.outcome("ETH/USDT").unwrap().is_ok());
        // 1000 * 5% / 100
        assert_eq!(exchange.orders()[0].quantity, Decimal::new(5, 1));
        assert_eq!(runner.store().decision_count("BTC/USDT"), 0);
        assert_eq!(runner.store().decision_count("ETH/USDT"), 1);
    }
}
