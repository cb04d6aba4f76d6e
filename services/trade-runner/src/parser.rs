//! Oracle reply parsing
//!
//! The reply is split at [`SIGNAL_SEPARATOR`] into reasoning and payload, then
//! the payload runs through an ordered chain of strategies until one yields a
//! JSON object:
//!
//! 1. `strict` - serde_json
//! 2. `lenient` - JSON5 (trailing commas, comments, single quotes, bare keys)
//! 3. `quote-repair` - rewrite mismatched or single quotes around keys and
//!    simple string values, then strict again
//!
//! The first object found is validated into a [`Decision`].

use chrono::{DateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::error::CycleError;
use crate::prompt::SIGNAL_SEPARATOR;
use crate::types::{Confidence, Decision, Signal};

/// Reply split into its two sections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeparatedReply {
    /// Text before the separator (trimmed), if the separator was present
    pub reasoning: Option<String>,
    /// Outermost `{...}` span of the structured section
    pub payload: Option<String>,
}

/// Split reasoning from the structured section.
///
/// Without the separator the whole reply is scanned for the first `{` and the
/// last `}`.
pub fn separate_reply(reply: &str) -> SeparatedReply {
    match reply.find(SIGNAL_SEPARATOR) {
        Some(idx) => {
            let reasoning = reply[..idx].trim();
            let rest = &reply[idx + SIGNAL_SEPARATOR.len()..];
            SeparatedReply {
                reasoning: (!reasoning.is_empty()).then(|| reasoning.to_string()),
                payload: outer_braces(rest).map(str::to_string),
            }
        }
        None => SeparatedReply {
            reasoning: None,
            payload: outer_braces(reply).map(str::to_string),
        },
    }
}

fn outer_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// One way of turning payload text into a JSON value
pub trait ParseStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` when this strategy cannot recover an object
    fn attempt(&self, text: &str) -> Option<Value>;
}

pub struct StrictJson;

impl ParseStrategy for StrictJson {
    fn name(&self) -> &'static str {
        "strict"
    }

    fn attempt(&self, text: &str) -> Option<Value> {
        serde_json::from_str::<Value>(text).ok().filter(Value::is_object)
    }
}

pub struct LenientJson;

impl ParseStrategy for LenientJson {
    fn name(&self) -> &'static str {
        "lenient"
    }

    fn attempt(&self, text: &str) -> Option<Value> {
        json5::from_str::<Value>(text).ok().filter(Value::is_object)
    }
}

pub struct QuoteRepair;

impl QuoteRepair {
    /// Quoted key with any mix of `'` / `"`: `'signal":` -> `"signal":`
    fn key_pattern() -> Option<&'static Regex> {
        static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
        PATTERN
            .get_or_init(|| Regex::new(r#"(['"])(\w+)(['"])(\s*:)"#).ok())
            .as_ref()
    }

    /// Simple string values opened with `'`. Values opened with `"` are left
    /// alone so apostrophes inside them survive.
    fn value_pattern() -> Option<&'static Regex> {
        static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
        PATTERN
            .get_or_init(|| Regex::new(r#":\s*'([^'"]*)['"]"#).ok())
            .as_ref()
    }

    pub fn repair(text: &str) -> String {
        let mut repaired = match Self::key_pattern() {
            Some(re) => re.replace_all(text, "\"${2}\"${4}").into_owned(),
            None => text.to_string(),
        };
        if let Some(re) = Self::value_pattern() {
            repaired = re.replace_all(&repaired, ": \"${1}\"").into_owned();
        }
        repaired
    }
}

impl ParseStrategy for QuoteRepair {
    fn name(&self) -> &'static str {
        "quote-repair"
    }

    fn attempt(&self, text: &str) -> Option<Value> {
        let repaired = Self::repair(text);
        serde_json::from_str::<Value>(&repaired)
            .ok()
            .filter(Value::is_object)
    }
}

/// Object recovered by a strategy
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPayload {
    /// Name of the strategy that succeeded
    pub layer: &'static str,
    pub value: Value,
}

/// Ordered strategy chain; first success wins
pub struct LayeredParser {
    strategies: Vec<Box<dyn ParseStrategy>>,
}

impl LayeredParser {
    pub fn new() -> Self {
        Self::with_strategies(vec![
            Box::new(StrictJson),
            Box::new(LenientJson),
            Box::new(QuoteRepair),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ParseStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn parse(&self, payload: &str) -> Option<ParsedPayload> {
        self.strategies.iter().find_map(|s| {
            s.attempt(payload).map(|value| ParsedPayload {
                layer: s.name(),
                value,
            })
        })
    }

    /// Separate, parse and validate a raw oracle reply
    pub fn decode(
        &self,
        symbol: &str,
        reply: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Decision, CycleError> {
        let separated = separate_reply(reply);
        if !reply.contains(SIGNAL_SEPARATOR) {
            warn!("[{}] Reply has no {} marker, scanning for braces", symbol, SIGNAL_SEPARATOR);
        }

        let payload = separated.payload.ok_or_else(|| CycleError::DecisionParseFailure {
            symbol: symbol.to_string(),
            reason: "no JSON object in reply".to_string(),
            raw_reply: reply.to_string(),
        })?;

        let parsed = self
            .parse(&payload)
            .ok_or_else(|| CycleError::DecisionParseFailure {
                symbol: symbol.to_string(),
                reason: format!("all {} parse strategies failed", self.strategies.len()),
                raw_reply: reply.to_string(),
            })?;
        debug!("[{}] Decision payload parsed by {} layer", symbol, parsed.layer);

        validate(&parsed.value, separated.reasoning, timestamp).map_err(|reason| {
            CycleError::InvalidDecisionFields {
                symbol: symbol.to_string(),
                reason,
            }
        })
    }
}

impl Default for LayeredParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Check field domains and build the decision
pub fn validate(
    value: &Value,
    reasoning: Option<String>,
    timestamp: DateTime<Utc>,
) -> Result<Decision, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| "payload is not an object".to_string())?;

    let signal_raw = required_str(obj, "signal")?;
    let signal =
        Signal::parse(signal_raw).ok_or_else(|| format!("unknown signal '{}'", signal_raw))?;

    let confidence_raw = required_str(obj, "confidence")?;
    let confidence = Confidence::parse(confidence_raw)
        .ok_or_else(|| format!("unknown confidence '{}'", confidence_raw))?;

    let stop_loss = positive_price(obj, "stop_loss")?;
    let take_profit = positive_price(obj, "take_profit")?;

    Ok(Decision {
        signal,
        reason: optional_str(obj, "reason").unwrap_or_default(),
        stop_loss,
        take_profit,
        confidence,
        risk_assessment: optional_str(obj, "risk_assessment"),
        // Out-of-range values are clamped at sizing
        position_percentage: obj.get("position_percentage").and_then(to_decimal),
        reasoning,
        timestamp,
    })
}

fn required_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Result<&'a str, String> {
    match obj.get(key) {
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(other) => Err(format!("{} must be a string, got {}", key, other)),
        None => Err(format!("missing field {}", key)),
    }
}

fn optional_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn positive_price(obj: &Map<String, Value>, key: &str) -> Result<Option<Decimal>, String> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(raw) => match to_decimal(raw) {
            Some(d) if d > Decimal::ZERO => Ok(Some(d)),
            _ => Err(format!("{} must be a positive number, got {}", key, raw)),
        },
    }
}

/// Numbers and numeric strings ("3.2", "3.2%", "$95,000")
fn to_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s
            .trim()
            .trim_start_matches('$')
            .trim_end_matches('%')
            .replace(',', ""),
        _ => return None,
    };
    let text = text.trim();
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}
