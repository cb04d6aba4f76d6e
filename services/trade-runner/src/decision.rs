//! Decision pipeline
//!
//! snapshot -> history -> features -> prompt -> oracle -> parse -> validate -> history

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RiskPolicy;
use crate::error::CycleError;
use crate::oracle::ReasoningOracle;
use crate::parser::LayeredParser;
use crate::prompt::{render_user_prompt, synthesize_features, system_prompt, PromptContext, SMA_PERIOD};
use crate::store::Store;
use crate::types::{Decision, MarketSnapshot, PositionRecord};

pub struct DecisionPipeline {
    oracle: Arc<dyn ReasoningOracle>,
    parser: LayeredParser,
    risk: Option<RiskPolicy>,
}

impl DecisionPipeline {
    pub fn new(oracle: Arc<dyn ReasoningOracle>, risk: Option<RiskPolicy>) -> Self {
        Self {
            oracle,
            parser: LayeredParser::new(),
            risk,
        }
    }

    /// Produce a validated decision for one snapshot.
    ///
    /// The snapshot always lands in history. The decision is appended only on
    /// success, so a failed call leaves the decision history untouched.
    pub async fn decide(
        &self,
        store: &mut Store,
        snapshot: &MarketSnapshot,
        position: Option<&PositionRecord>,
        news: &str,
    ) -> Result<Decision, CycleError> {
        let symbol = snapshot.symbol.as_str();
        store.push_snapshot(snapshot.clone());

        let recent = store.recent_prices(symbol, SMA_PERIOD);
        let indicators = synthesize_features(&recent, snapshot.price);
        let prompt = render_user_prompt(&PromptContext {
            snapshot,
            indicators,
            previous: store.last_decision(symbol),
            news,
            position,
            risk: self.risk.as_ref(),
        });
        debug!("[{}] Prompt:\n{}", symbol, prompt);

        let reply = self
            .oracle
            .complete(&system_prompt(snapshot.timeframe), &prompt)
            .await
            .map_err(|e| CycleError::OracleUnavailable {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            })?;
        debug!("[{}] Raw oracle reply:\n{}", symbol, reply);

        let decision = match self.parser.decode(symbol, &reply, snapshot.timestamp) {
            Ok(decision) => decision,
            Err(err) => {
                warn!("[{}] Unusable oracle reply: {}\n{}", symbol, err, reply);
                return Err(err);
            }
        };

        if let Some(reasoning) = &decision.reasoning {
            info!("[{}] Oracle reasoning:\n{}", symbol, reasoning);
        }
        info!(
            "[{}] Decision: {} ({}) - {}",
            symbol, decision.signal, decision.confidence, decision.reason
        );

        store.push_decision(symbol, decision.clone());
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timeframe;
    use crate::error::OracleError;
    use crate::prompt::SIGNAL_SEPARATOR;
    use crate::types::{Confidence, Signal};
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Scripted {
        replies: Mutex<VecDeque<Result<String, OracleError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn push(&self, reply: Result<String, OracleError>) {
            self.replies.lock().unwrap().push_back(reply);
        }
    }

    #[async_trait]
    impl ReasoningOracle for Scripted {
        async fn complete(&self, _system: &str, user: &str) -> Result<String, OracleError> {
            self.prompts.lock().unwrap().push(user.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(OracleError::EmptyReply))
        }
    }

    fn snapshot(price: i64) -> MarketSnapshot {
        MarketSnapshot {
            symbol: "ETH/USDT".to_string(),
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

    #[tokio::test]
    async fn test_decision_is_stamped_and_recorded() {
        let oracle = Arc::new(Scripted::default());
        oracle.push(Ok(format!(
            "Momentum fading.\n{}\n{{\"signal\": \"SELL\", \"reason\": \"lower highs\", \"confidence\": \"MEDIUM\"}}",
            SIGNAL_SEPARATOR
        )));
        let pipeline = DecisionPipeline::new(oracle.clone(), None);
        let mut store = Store::new();
        let snap = snapshot(2000);

        let decision = pipeline.decide(&mut store, &snap, None, "news").await.unwrap();

        assert_eq!(decision.signal, Signal::Sell);
        assert_eq!(decision.confidence, Confidence::Medium);
        assert_eq!(decision.timestamp, snap.timestamp);
        assert_eq!(decision.reasoning.as_deref(), Some("Momentum fading."));
        assert_eq!(store.decision_count("ETH/USDT"), 1);
        assert_eq!(store.snapshot_count("ETH/USDT"), 1);
    }

    #[tokio::test]
    async fn test_indicators_appear_after_five_snapshots() {
        let oracle = Arc::new(Scripted::default());
        for _ in 0..5 {
            oracle.push(Ok(r#"{"signal": "HOLD", "confidence": "LOW"}"#.to_string()));
        }
        let pipeline = DecisionPipeline::new(oracle.clone(), None);
        let mut store = Store::new();

        for price in [100, 101, 102, 103, 104] {
            pipeline.decide(&mut store, &snapshot(price), None, "news").await.unwrap();
        }

        let prompts = oracle.prompts.lock().unwrap();
        assert!(prompts[3].contains("Insufficient data to compute indicators"));
        assert!(prompts[4].contains("5-period average price: 102.00"));
        assert!(prompts[4].contains("Signal: HOLD"));
        assert!(!prompts[0].contains("[Previous signal]"));
    }

    #[tokio::test]
    async fn test_failures_leave_decisions_untouched() {
        let oracle = Arc::new(Scripted::default());
        oracle.push(Err(OracleError::Transport("connection reset".to_string())));
        oracle.push(Ok("No structured answer today.".to_string()));
        let pipeline = DecisionPipeline::new(oracle.clone(), None);
        let mut store = Store::new();

        let err = pipeline.decide(&mut store, &snapshot(1), None, "").await.unwrap_err();
        assert!(matches!(err, CycleError::OracleUnavailable { .. }));

        let err = pipeline.decide(&mut store, &snapshot(1), None, "").await.unwrap_err();
        assert!(matches!(err, CycleError::DecisionParseFailure { .. }));

        assert_eq!(store.decision_count("ETH/USDT"), 0);
        assert_eq!(store.snapshot_count("ETH/USDT"), 2);
    }
}
