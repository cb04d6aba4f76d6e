//! Runner Configuration
//!
//! Loaded once at startup, read-only afterwards.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default LLM endpoint (OpenAI-compatible)
const DEFAULT_LLM_BASE_URL: &str = "https://api.deepseek.com";

/// Default LLM model
const DEFAULT_LLM_MODEL: &str = "deepseek-chat";

/// Default exchange gateway URL
const DEFAULT_GATEWAY_URL: &str = "http://localhost:8070";

/// Supported bar granularities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    Minute1,
    #[serde(rename = "5m")]
    Minute5,
    #[default]
    #[serde(rename = "15m")]
    Minute15,
    #[serde(rename = "30m")]
    Minute30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "1d")]
    Day1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Minute1 => "1m",
            Timeframe::Minute5 => "5m",
            Timeframe::Minute15 => "15m",
            Timeframe::Minute30 => "30m",
            Timeframe::Hour1 => "1h",
            Timeframe::Hour4 => "4h",
            Timeframe::Day1 => "1d",
        }
    }

    pub fn to_seconds(&self) -> u64 {
        match self {
            Timeframe::Minute1 => 60,
            Timeframe::Minute5 => 300,
            Timeframe::Minute15 => 900,
            Timeframe::Minute30 => 1800,
            Timeframe::Hour1 => 3600,
            Timeframe::Hour4 => 14400,
            Timeframe::Day1 => 86400,
        }
    }

    /// Interval between decision cycles for this granularity
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.to_seconds())
    }
}

impl FromStr for Timeframe {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1m" => Ok(Timeframe::Minute1),
            "5m" => Ok(Timeframe::Minute5),
            "15m" => Ok(Timeframe::Minute15),
            "30m" => Ok(Timeframe::Minute30),
            "1h" => Ok(Timeframe::Hour1),
            "4h" => Ok(Timeframe::Hour4),
            "1d" => Ok(Timeframe::Day1),
            other => Err(ConfigError::Invalid {
                key: "TIMEFRAME".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked instrument
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InstrumentConfig {
    /// Unique symbol key (e.g. "BTC/USDT")
    pub symbol: String,
    /// Leverage multiplier (>= 1)
    pub leverage: u32,
    #[serde(default)]
    pub timeframe: Timeframe,
    /// Run every step except order submission
    #[serde(default)]
    pub simulation: bool,
    /// Fixed order quantity; bypasses dynamic sizing when set
    #[serde(default)]
    pub fixed_quantity: Option<Decimal>,
}

/// Process-wide risk thresholds rendered into the oracle prompt
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct RiskPolicy {
    /// Max fraction of equity at risk per trade (0.02 = 2%)
    #[serde(default = "default_max_risk_per_trade")]
    pub max_risk_per_trade: Decimal,
    /// Max aggregate open risk fraction
    #[serde(default = "default_max_total_risk")]
    pub max_total_risk: Decimal,
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
    #[serde(default = "default_stop_loss_multiplier")]
    pub stop_loss_multiplier: Decimal,
    #[serde(default = "default_take_profit_multiplier")]
    pub take_profit_multiplier: Decimal,
    #[serde(default = "default_max_positions")]
    pub max_positions: u32,
    /// Equity (USDT) below which the oracle is told to be extremely conservative
    #[serde(default = "default_balance_warning_level")]
    pub balance_warning_level: Decimal,
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: Decimal,
}

impl RiskPolicy {
    /// Minimum reward/risk ratio implied by the multipliers
    pub fn reward_risk_ratio(&self) -> Decimal {
        if self.stop_loss_multiplier.is_zero() {
            return Decimal::ZERO;
        }
        self.take_profit_multiplier / self.stop_loss_multiplier
    }
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            max_risk_per_trade: default_max_risk_per_trade(),
            max_total_risk: default_max_total_risk(),
            max_consecutive_losses: default_max_consecutive_losses(),
            stop_loss_multiplier: default_stop_loss_multiplier(),
            take_profit_multiplier: default_take_profit_multiplier(),
            max_positions: default_max_positions(),
            balance_warning_level: default_balance_warning_level(),
            max_drawdown: default_max_drawdown(),
        }
    }
}

fn default_max_risk_per_trade() -> Decimal { Decimal::new(2, 2) }
fn default_max_total_risk() -> Decimal { Decimal::new(1, 1) }
fn default_max_consecutive_losses() -> u32 { 3 }
fn default_stop_loss_multiplier() -> Decimal { Decimal::new(15, 1) }
fn default_take_profit_multiplier() -> Decimal { Decimal::new(2, 0) }
fn default_max_positions() -> u32 { 5 }
fn default_balance_warning_level() -> Decimal { Decimal::new(100, 0) }
fn default_max_drawdown() -> Decimal { Decimal::new(2, 1) }

/// Execution timing and data window
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Delay between the closing and opening leg of a flip
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Delay before re-reading positions after an executed action
    #[serde(default = "default_refresh_delay_ms")]
    pub refresh_delay_ms: u64,
    /// Bars requested per snapshot
    #[serde(default = "default_bar_limit")]
    pub bar_limit: usize,
    /// Bars kept on the snapshot for the prompt
    #[serde(default = "default_bar_window")]
    pub bar_window: usize,
}

impl ExecutionConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }

    /// Zero delays, for tests and dry runs
    pub fn immediate() -> Self {
        Self {
            settle_delay_ms: 0,
            refresh_delay_ms: 0,
            ..Self::default()
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            refresh_delay_ms: default_refresh_delay_ms(),
            bar_limit: default_bar_limit(),
            bar_window: default_bar_window(),
        }
    }
}

fn default_settle_delay_ms() -> u64 { 1000 }
fn default_refresh_delay_ms() -> u64 { 3000 }
fn default_bar_limit() -> usize { 10 }
fn default_bar_window() -> usize { 5 }

/// Reasoning oracle connection
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LlmConfig {
    pub api_key: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
}

fn default_llm_base_url() -> String { DEFAULT_LLM_BASE_URL.to_string() }
fn default_llm_model() -> String { DEFAULT_LLM_MODEL.to_string() }

/// Which exchange gateway the binary wires in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeMode {
    #[default]
    Live,
    Paper,
}

/// Exchange gateway connection
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExchangeConfig {
    #[serde(default)]
    pub mode: ExchangeMode,
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Starting equity for the paper exchange
    #[serde(default = "default_paper_equity")]
    pub paper_equity: Decimal,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            mode: ExchangeMode::default(),
            gateway_url: default_gateway_url(),
            api_key: None,
            paper_equity: default_paper_equity(),
        }
    }
}

fn default_gateway_url() -> String { DEFAULT_GATEWAY_URL.to_string() }
fn default_paper_equity() -> Decimal { Decimal::new(10_000, 0) }

/// News blob source
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NewsConfig {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_news_refresh_minutes")]
    pub refresh_minutes: u64,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            file: None,
            refresh_minutes: default_news_refresh_minutes(),
        }
    }
}

fn default_news_refresh_minutes() -> u64 { 5 }

/// Complete runner configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    pub instruments: Vec<InstrumentConfig>,
    /// `None` disables the risk directives in the prompt
    #[serde(default = "default_risk")]
    pub risk: Option<RiskPolicy>,
    #[serde(default)]
    pub execution: ExecutionConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub news: NewsConfig,
}

fn default_risk() -> Option<RiskPolicy> {
    Some(RiskPolicy::default())
}

impl AppConfig {
    /// Load from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key lookup (environment, test map, ...)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let symbols: Vec<String> = get("TRADE_SYMBOLS")
            .ok_or_else(|| ConfigError::Missing("TRADE_SYMBOLS".to_string()))?
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();
        let leverages: Vec<String> = get("TRADE_LEVERAGES")
            .ok_or_else(|| ConfigError::Missing("TRADE_LEVERAGES".to_string()))?
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();
        let amounts: Option<Vec<String>> = get("TRADE_AMOUNTS")
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect());

        if symbols.len() != leverages.len() {
            return Err(ConfigError::LengthMismatch {
                left: "TRADE_SYMBOLS".to_string(),
                right: "TRADE_LEVERAGES".to_string(),
            });
        }
        if let Some(amounts) = &amounts {
            if amounts.len() != symbols.len() {
                return Err(ConfigError::LengthMismatch {
                    left: "TRADE_SYMBOLS".to_string(),
                    right: "TRADE_AMOUNTS".to_string(),
                });
            }
        }

        let timeframe = match get("TIMEFRAME") {
            Some(raw) => raw.parse()?,
            None => Timeframe::default(),
        };
        let simulation = get("TEST_MODE").map(|v| is_truthy(&v)).unwrap_or(false);

        let mut instruments = Vec::with_capacity(symbols.len());
        for (i, symbol) in symbols.iter().enumerate() {
            if symbol.is_empty() {
                continue;
            }
            let leverage = parse_value::<u32>("TRADE_LEVERAGES", &leverages[i])?;
            let fixed_quantity = match &amounts {
                Some(amounts) => Some(parse_value::<Decimal>("TRADE_AMOUNTS", &amounts[i])?),
                None => None,
            };
            instruments.push(InstrumentConfig {
                symbol: symbol.clone(),
                leverage,
                timeframe,
                simulation,
                fixed_quantity,
            });
        }

        let risk = if get("RISK_RULES_IN_PROMPT").map(|v| is_truthy(&v)).unwrap_or(true) {
            let defaults = RiskPolicy::default();
            Some(RiskPolicy {
                max_risk_per_trade: parse_or(&get, "MAX_RISK_PER_TRADE", defaults.max_risk_per_trade)?,
                max_total_risk: parse_or(&get, "MAX_TOTAL_RISK", defaults.max_total_risk)?,
                max_consecutive_losses: parse_or(&get, "MAX_CONSECUTIVE_LOSSES", defaults.max_consecutive_losses)?,
                stop_loss_multiplier: parse_or(&get, "STOP_LOSS_MULTIPLIER", defaults.stop_loss_multiplier)?,
                take_profit_multiplier: parse_or(&get, "TAKE_PROFIT_MULTIPLIER", defaults.take_profit_multiplier)?,
                max_positions: parse_or(&get, "MAX_POSITIONS", defaults.max_positions)?,
                balance_warning_level: parse_or(&get, "BALANCE_WARNING_LEVEL", defaults.balance_warning_level)?,
                max_drawdown: parse_or(&get, "MAX_DRAWDOWN", defaults.max_drawdown)?,
            })
        } else {
            None
        };

        let exec_defaults = ExecutionConfig::default();
        let execution = ExecutionConfig {
            settle_delay_ms: parse_or(&get, "SETTLE_DELAY_MS", exec_defaults.settle_delay_ms)?,
            refresh_delay_ms: parse_or(&get, "REFRESH_DELAY_MS", exec_defaults.refresh_delay_ms)?,
            ..exec_defaults
        };

        let llm = LlmConfig {
            api_key: get("LLM_API_KEY").ok_or_else(|| ConfigError::Missing("LLM_API_KEY".to_string()))?,
            base_url: get("LLM_BASE_URL").unwrap_or_else(default_llm_base_url),
            model: get("LLM_MODEL_NAME").unwrap_or_else(default_llm_model),
        };

        let exchange = ExchangeConfig {
            mode: match get("EXCHANGE_MODE").as_deref() {
                None | Some("live") => ExchangeMode::Live,
                Some("paper") => ExchangeMode::Paper,
                Some(other) => {
                    return Err(ConfigError::Invalid {
                        key: "EXCHANGE_MODE".to_string(),
                        value: other.to_string(),
                    })
                }
            },
            gateway_url: get("EXCHANGE_GATEWAY_URL").unwrap_or_else(default_gateway_url),
            api_key: get("EXCHANGE_API_KEY"),
            paper_equity: parse_or(&get, "PAPER_EQUITY", default_paper_equity())?,
        };

        let news = NewsConfig {
            file: get("NEWS_FILE"),
            refresh_minutes: parse_or(&get, "NEWS_REFRESH_MINUTES", default_news_refresh_minutes())?,
        };

        let config = Self {
            instruments,
            risk,
            execution,
            llm,
            exchange,
            news,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML/YAML/JSON file, with `TRADER__*` environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(::config::Environment::with_prefix("TRADER").separator("__"))
            .build()
            .map_err(|e| ConfigError::File(format!("{}: {}", path.display(), e)))?;

        let config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| ConfigError::File(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup invariants: non-empty, unique symbols, sane leverage, API key present
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instruments.is_empty() {
            return Err(ConfigError::Missing("instruments".to_string()));
        }
        let mut seen = HashSet::new();
        for instrument in &self.instruments {
            if !seen.insert(instrument.symbol.as_str()) {
                return Err(ConfigError::DuplicateSymbol(instrument.symbol.clone()));
            }
            if instrument.leverage == 0 {
                return Err(ConfigError::Invalid {
                    key: format!("leverage[{}]", instrument.symbol),
                    value: "0".to_string(),
                });
            }
            if let Some(qty) = instrument.fixed_quantity {
                if qty <= Decimal::ZERO {
                    return Err(ConfigError::Invalid {
                        key: format!("fixed_quantity[{}]", instrument.symbol),
                        value: qty.to_string(),
                    });
                }
            }
        }
        if self.llm.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("LLM_API_KEY".to_string()));
        }
        Ok(())
    }

    /// Cycle interval, driven by the first instrument's timeframe
    pub fn cycle_interval(&self) -> Duration {
        self.instruments
            .first()
            .map(|i| i.timeframe.cycle_interval())
            .unwrap_or_else(|| Timeframe::default().cycle_interval())
    }
}

/// `true`, `1`, `yes` or `on`, any case
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}
