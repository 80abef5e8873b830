//! Mean-reversion strategy (auxiliary).
//!
//! Fades extremes in ranging/weak markets: deep RSI levels, Bollinger band
//! touches and breaks, and large deviations from MA20. Disabled in strong
//! trends where fading is a losing game.
//!
//! Requires: per-fund NAV history (>= 30 points) and category regimes.

use serde_json::json;

use crate::analysis::indicators::{self, BollingerSignal, TechnicalSummary};
use crate::models::{FundBook, MarketData, Regime, Signal, SignalType};

use super::Strategy;

pub struct MeanReversion;

impl Strategy for MeanReversion {
    fn name(&self) -> &'static str {
        "mean_reversion"
    }

    fn default_weight(&self) -> f64 {
        0.30
    }

    fn generate(&self, market: &MarketData, funds: &FundBook) -> Vec<Signal> {
        let mut signals = Vec::new();

        for (fund_code, data) in funds {
            let regime = market.regime_for(data.category);
            if matches!(regime, Regime::BullStrong | Regime::BearStrong) {
                continue;
            }
            if data.nav_history.len() < 30 {
                continue;
            }
            let navs = data.navs();
            let Some(tech) = indicators::technical_summary(&navs) else {
                continue;
            };

            let (signal_type, confidence, reasons) = evaluate(&tech);
            if signal_type == SignalType::Hold {
                continue;
            }

            signals.push(
                Signal::new(fund_code.clone(), signal_type, confidence, reasons.join("; "), self.name())
                    .with_meta("regime", json!(regime.as_str())),
            );
        }

        signals
    }
}

fn evaluate(tech: &TechnicalSummary) -> (SignalType, f64, Vec<String>) {
    let mut buy_score: i32 = 0;
    let mut sell_score: i32 = 0;
    let mut reasons = Vec::new();

    // 1. RSI extremes (deep levels score higher).
    let rsi = tech.rsi.unwrap_or(50.0);
    if rsi < 25.0 {
        buy_score += 3;
        reasons.push(format!("RSI deeply oversold ({rsi:.0})"));
    } else if rsi < 35.0 {
        buy_score += 1;
        reasons.push(format!("RSI oversold ({rsi:.0})"));
    } else if rsi > 75.0 {
        sell_score += 3;
        reasons.push(format!("RSI deeply overbought ({rsi:.0})"));
    } else if rsi > 65.0 {
        sell_score += 1;
        reasons.push(format!("RSI overbought ({rsi:.0})"));
    }

    // 2. Bollinger position.
    if let Some(bb) = &tech.bollinger {
        match bb.signal {
            BollingerSignal::BreakLower => {
                buy_score += 2;
                reasons.push("broke below lower Bollinger band".to_string());
            }
            BollingerSignal::BreakUpper => {
                sell_score += 2;
                reasons.push("broke above upper Bollinger band".to_string());
            }
            BollingerSignal::InChannel => {
                if let Some(pos) = bb.position {
                    if pos < 0.2 {
                        buy_score += 1;
                        reasons.push(format!("near lower band (position {:.0}%)", pos * 100.0));
                    } else if pos > 0.8 {
                        sell_score += 1;
                        reasons.push(format!("near upper band (position {:.0}%)", pos * 100.0));
                    }
                }
            }
        }
    }

    // 3. Deviation from MA20.
    if let Some(ma20) = tech.ma.ma20.filter(|m| *m > 0.0) {
        let deviation = (tech.current_price - ma20) / ma20;
        if deviation < -0.05 {
            buy_score += 2;
            reasons.push(format!("{:.1}% below MA20", deviation * 100.0));
        } else if deviation > 0.05 {
            sell_score += 2;
            reasons.push(format!("{:+.1}% above MA20", deviation * 100.0));
        }
    }

    let net_score = buy_score - sell_score;
    let max_possible = (buy_score + sell_score).max(1);
    let confidence = net_score.unsigned_abs() as f64 / max_possible as f64 * 0.7;

    if net_score >= 4 {
        (SignalType::StrongBuy, confidence.min(0.8), reasons)
    } else if net_score >= 2 {
        (SignalType::Buy, confidence.min(0.6), reasons)
    } else if net_score <= -4 {
        (SignalType::StrongSell, confidence.min(0.8), reasons)
    } else if net_score <= -2 {
        (SignalType::Sell, confidence.min(0.6), reasons)
    } else {
        (SignalType::Hold, 0.0, reasons)
    }
}
