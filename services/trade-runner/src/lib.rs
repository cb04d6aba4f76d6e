//! Trade Runner Library
//!
//! Decision and execution engine for oracle-driven futures trading across
//! several instruments.

pub mod config;
pub mod decision;
pub mod error;
pub mod gateway;
pub mod news;
pub mod oracle;
pub mod paper;
pub mod parser;
pub mod prompt;
pub mod reconciler;
pub mod rest;
pub mod runner;
pub mod sizing;
pub mod snapshot;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use crate::config::{
    AppConfig, ExchangeConfig, ExchangeMode, ExecutionConfig, InstrumentConfig, LlmConfig,
    NewsConfig, RiskPolicy, Timeframe,
};
pub use decision::DecisionPipeline;
pub use error::{ConfigError, CycleError, GatewayError, OracleError};
pub use gateway::{ExchangeGateway, OrderAck, OrderSide};
pub use news::{FileNewsSource, NewsBoard, NewsSource};
pub use oracle::{ChatCompletionClient, ReasoningOracle};
pub use paper::PaperExchange;
pub use parser::{LayeredParser, ParseStrategy};
pub use reconciler::{OrderAction, PositionReconciler, ReconcileOutcome, Transition};
pub use rest::HttpExchangeGateway;
pub use runner::{CycleReport, InstrumentOutcome, TradeRunner};
pub use sizing::{size_order, SizingOutcome};
pub use snapshot::SnapshotBuilder;
pub use store::Store;
pub use types::{Bar, Confidence, Decision, MarketSnapshot, PositionRecord, PositionSide, Signal};
