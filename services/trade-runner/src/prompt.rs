//! Feature synthesis and oracle prompt assembly
//!
//! Output is a pure function of its inputs: the same snapshot, history, news and
//! position always render the same prompt text.

use rust_decimal::Decimal;

use crate::config::{RiskPolicy, Timeframe};
use crate::types::{describe_position, Decision, MarketSnapshot, PositionRecord};

/// Marker separating free-form reasoning from the JSON decision
pub const SIGNAL_SEPARATOR: &str = "---SIGNAL_JSON---";

/// Prices needed for the short moving average
pub const SMA_PERIOD: usize = 5;

const INSUFFICIENT_DATA: &str = "Insufficient data to compute indicators";

/// Short moving-average comparison
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Indicators {
    pub sma: Decimal,
    /// Current price vs. the average, in percent
    pub price_vs_sma_pct: Decimal,
}

/// Compute the SMA over the last [`SMA_PERIOD`] prices, or `None` with fewer
pub fn synthesize_features(recent_prices: &[Decimal], current_price: Decimal) -> Option<Indicators> {
    if recent_prices.len() < SMA_PERIOD {
        return None;
    }
    let window = &recent_prices[recent_prices.len() - SMA_PERIOD..];
    let sum: Decimal = window.iter().copied().sum();
    let sma = sum / Decimal::from(SMA_PERIOD as u64);
    let price_vs_sma_pct = if sma.is_zero() {
        Decimal::ZERO
    } else {
        (current_price - sma) / sma * Decimal::ONE_HUNDRED
    };
    Some(Indicators {
        sma,
        price_vs_sma_pct,
    })
}

/// Everything the user prompt is rendered from
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub snapshot: &'a MarketSnapshot,
    pub indicators: Option<Indicators>,
    pub previous: Option<&'a Decision>,
    pub news: &'a str,
    pub position: Option<&'a PositionRecord>,
    pub risk: Option<&'a RiskPolicy>,
}

pub fn system_prompt(timeframe: Timeframe) -> String {
    format!(
        "You are a disciplined crypto futures trader working the {} timeframe. \
         Capital preservation comes first and profit second. Combine candlestick \
         structure, indicators and news into the safest decision you can defend, \
         and never propose a position that breaks the stated risk rules.",
        timeframe
    )
}

pub fn render_user_prompt(ctx: &PromptContext<'_>) -> String {
    let snap = ctx.snapshot;
    let tf = snap.timeframe;
    let mut lines: Vec<String> = Vec::new();

    lines.push(format!(
        "You are a professional, risk-averse crypto futures analyst. Analyse the following {} {} data.",
        snap.symbol, tf
    ));
    lines.push(String::new());

    lines.push(format!("[Last {} {} bars]", snap.recent_bars.len(), tf));
    for (i, bar) in snap.recent_bars.iter().enumerate() {
        lines.push(format!(
            "Bar {}: {} open: {:.2} close: {:.2} change: {}%",
            i + 1,
            if bar.is_bullish() { "bullish" } else { "bearish" },
            bar.open,
            bar.close,
            signed(bar.change_pct())
        ));
    }
    lines.push(String::new());

    lines.push("[Technical indicators]".to_string());
    match ctx.indicators {
        Some(ind) => {
            lines.push(format!("{}-period average price: {:.2}", SMA_PERIOD, ind.sma));
            lines.push(format!("Price vs. average: {}%", signed(ind.price_vs_sma_pct)));
        }
        None => lines.push(INSUFFICIENT_DATA.to_string()),
    }

    if let Some(prev) = ctx.previous {
        lines.push(String::new());
        lines.push("[Previous signal]".to_string());
        lines.push(format!("Signal: {}", prev.signal));
        lines.push(format!("Confidence: {}", prev.confidence));
    }

    lines.push(String::new());
    lines.push(ctx.news.trim_end().to_string());
    lines.push(String::new());

    lines.push("[Current market]".to_string());
    lines.push(format!("- Price: ${:.2}", snap.price));
    lines.push(format!("- Time: {}", snap.timestamp.format("%Y-%m-%d %H:%M:%S")));
    lines.push(format!("- Bar high: ${:.2}", snap.high));
    lines.push(format!("- Bar low: ${:.2}", snap.low));
    lines.push(format!("- Bar volume: {:.2} {}", snap.volume, snap.base_asset()));
    lines.push(format!("- Price change: {}%", signed(snap.price_change_pct)));
    lines.push(format!("- Current position: {}", describe_position(ctx.position)));

    if let Some(risk) = ctx.risk {
        lines.push(String::new());
        lines.extend(risk_directives(risk));
    }

    lines.push(String::new());
    lines.extend(response_format(ctx.risk.is_some()));

    lines.join("\n")
}

fn risk_directives(risk: &RiskPolicy) -> Vec<String> {
    let pct = |v: Decimal| (v * Decimal::ONE_HUNDRED).round_dp(2);
    vec![
        "[Mandatory risk rules]".to_string(),
        format!(
            "1. Max risk per trade: a stop-out must not lose more than {:.2}% of total equity.",
            pct(risk.max_risk_per_trade)
        ),
        "2. Stop loss: always set one, sized from recent volatility and never loose.".to_string(),
        format!(
            "3. Take profit: realistic targets with a reward/risk of at least {:.2}:1.",
            risk.reward_risk_ratio()
        ),
        "4. Position size: scale with confidence and stop distance; a size that breaks these rules is a fatal error.".to_string(),
        format!(
            "5. Total risk: stay below {:.2}% aggregate loss and {} consecutive losing trades; max drawdown {:.2}%.",
            pct(risk.max_total_risk),
            risk.max_consecutive_losses,
            pct(risk.max_drawdown)
        ),
        format!(
            "6. Position limit: no more than {} instruments open at once.",
            risk.max_positions
        ),
        format!(
            "7. Balance alert: below {:.2} USDT of equity, be extremely conservative.",
            risk.balance_warning_level
        ),
    ]
}

fn response_format(with_risk: bool) -> Vec<String> {
    let mut lines = vec![
        "[Analysis requirements]".to_string(),
        "1. Assess the concrete risk of this trade before giving any signal.".to_string(),
        "2. Signal: BUY / SELL / HOLD.".to_string(),
        "3. Reason: trend, indicators and news, naming the risk points.".to_string(),
        "4. Stop-loss price and take-profit price from the technical picture.".to_string(),
        "5. Confidence: HIGH / MEDIUM / LOW.".to_string(),
    ];
    if with_risk {
        lines.push(
            "6. Position size: percent of total equity to commit (e.g. 3.2 means 3.2%), within the rules above."
                .to_string(),
        );
    }
    lines.push(String::new());
    lines.push(format!(
        "Write your reasoning first. Then output a line containing exactly {} followed by one JSON object:",
        SIGNAL_SEPARATOR
    ));
    lines.push("{".to_string());
    lines.push("    \"signal\": \"BUY|SELL|HOLD\",".to_string());
    lines.push("    \"reason\": \"analysis summary\",".to_string());
    lines.push("    \"stop_loss\": <price>,".to_string());
    lines.push("    \"take_profit\": <price>,".to_string());
    if with_risk {
        lines.push("    \"confidence\": \"HIGH|MEDIUM|LOW\",".to_string());
        lines.push("    \"risk_assessment\": \"loss in % of equity if the stop is hit\",".to_string());
        lines.push("    \"position_percentage\": <percent of equity>".to_string());
    } else {
        lines.push("    \"confidence\": \"HIGH|MEDIUM|LOW\"".to_string());
    }
    lines.push("}".to_string());
    lines
}

fn signed(value: Decimal) -> String {
    if value.is_sign_negative() && !value.is_zero() {
        format!("{:.2}", value)
    } else {
        format!("+{:.2}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bar, Confidence, Signal};
    use chrono::{TimeZone, Utc};

    fn snapshot() -> MarketSnapshot {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        MarketSnapshot {
            symbol: "BTC/USDT".to_string(),
            timeframe: Timeframe::Minute15,
            price: Decimal::from(101),
            high: Decimal::from(102),
            low: Decimal::from(99),
            volume: Decimal::from(12),
            price_change_pct: Decimal::ONE,
            timestamp: ts,
            recent_bars: vec![
                Bar {
                    timestamp: ts,
                    open: Decimal::from(100),
                    high: Decimal::from(101),
                    low: Decimal::from(99),
                    close: Decimal::from(101),
                    volume: Decimal::ONE,
                },
                Bar {
                    timestamp: ts,
                    open: Decimal::from(102),
                    high: Decimal::from(102),
                    low: Decimal::from(100),
                    close: Decimal::from(101),
                    volume: Decimal::ONE,
                },
            ],
        }
    }

    #[test]
    fn test_sma_needs_five_prices() {
        let four: Vec<Decimal> = (1..=4).map(Decimal::from).collect();
        assert!(synthesize_features(&four, Decimal::from(4)).is_none());

        let six: Vec<Decimal> = (1..=6).map(Decimal::from).collect();
        let ind = synthesize_features(&six, Decimal::from(6)).unwrap();
        assert_eq!(ind.sma, Decimal::from(4));
        assert_eq!(ind.price_vs_sma_pct, Decimal::from(50));
    }

    #[test]
    fn test_prompt_marks_insufficient_data() {
        let snap = snapshot();
        let prompt = render_user_prompt(&PromptContext {
            snapshot: &snap,
            indicators: None,
            previous: None,
            news: "[Latest market news]\nNo recent news.\n",
            position: None,
            risk: None,
        });

        assert!(prompt.contains(INSUFFICIENT_DATA));
        assert!(prompt.contains("Bar 1: bullish open: 100.00 close: 101.00 change: +1.00%"));
        assert!(prompt.contains("Bar 2: bearish"));
        assert!(prompt.contains("- Current position: No position"));
        assert!(prompt.contains(SIGNAL_SEPARATOR));
        assert!(!prompt.contains("[Previous signal]"));
        assert!(!prompt.contains("Mandatory risk rules"));
        assert!(!prompt.contains("position_percentage"));
    }

    #[test]
    fn test_prompt_is_deterministic_and_renders_risk() {
        let snap = snapshot();
        let previous = Decision {
            signal: Signal::Sell,
            reason: "r".to_string(),
            stop_loss: None,
            take_profit: None,
            confidence: Confidence::Medium,
            risk_assessment: None,
            position_percentage: None,
            reasoning: None,
            timestamp: snap.timestamp,
        };
        let position = PositionRecord::from_signed_amount(
            "BTC/USDT",
            Decimal::from_str_exact("0.5").unwrap(),
            Decimal::from(95),
            Decimal::from(3),
        );
        let risk = RiskPolicy::default();
        let ctx = PromptContext {
            snapshot: &snap,
            indicators: synthesize_features(&[Decimal::from(100); 5], Decimal::from(101)),
            previous: Some(&previous),
            news: "[Latest market news]\nETF inflows continue.",
            position: position.as_ref(),
            risk: Some(&risk),
        };

        let first = render_user_prompt(&ctx);
        assert_eq!(first, render_user_prompt(&ctx));
        assert!(first.contains("Price vs. average: +1.00%"));
        assert!(first.contains("Signal: SELL"));
        assert!(first.contains("Confidence: MEDIUM"));
        assert!(first.contains("ETF inflows continue."));
        assert!(first.contains("Long position, size: 0.5"));
        assert!(first.contains("more than 2.00% of total equity"));
        assert!(first.contains("at least 1.33:1"));
        assert!(first.contains("\"position_percentage\""));
    }
}
