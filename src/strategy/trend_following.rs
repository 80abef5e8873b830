//! Trend-following strategy (primary).
//!
//! Buys when the price stands above a bullish MA stack, sells when the stack
//! turns bearish, with MACD and RSI as secondary confirmation. A weekly
//! aggregate (every 5th NAV) confirms or weakens the daily call.
//!
//! Requires: per-fund NAV history (>= 60 points) and category regimes.

use serde_json::json;

use crate::analysis::indicators::{
    self, MaAlignment, MacdSignal, TechnicalSummary,
};
use crate::models::{FundBook, MarketData, Regime, Signal, SignalType};

use super::Strategy;

pub struct TrendFollowing;

impl Strategy for TrendFollowing {
    fn name(&self) -> &'static str {
        "trend_following"
    }

    fn default_weight(&self) -> f64 {
        0.30
    }

    fn generate(&self, market: &MarketData, funds: &FundBook) -> Vec<Signal> {
        let mut signals = Vec::new();

        for (fund_code, data) in funds {
            if data.nav_history.len() < 60 {
                continue;
            }
            let navs = data.navs();
            let Some(tech) = indicators::technical_summary(&navs) else {
                continue;
            };

            let regime = market.regime_for(data.category);
            let (signal_type, mut confidence, mut reasons) = evaluate(&tech, regime);
            if signal_type == SignalType::Hold {
                continue;
            }

            // Multi-timeframe check: weekly trend must not contradict.
            let weekly = weekly_confirmation(&navs);
            if signal_type.is_buy() {
                if weekly > 0 {
                    confidence = (confidence * 1.2).min(0.95);
                    reasons.push("weekly trend confirms".to_string());
                } else if weekly < 0 {
                    confidence *= 0.6;
                    reasons.push("weekly trend disagrees".to_string());
                }
            } else if signal_type.is_sell() {
                if weekly < 0 {
                    confidence = (confidence * 1.2).min(0.95);
                    reasons.push("weekly trend confirms".to_string());
                } else if weekly > 0 {
                    confidence *= 0.6;
                    reasons.push("weekly trend disagrees".to_string());
                }
            }

            signals.push(
                Signal::new(
                    fund_code.clone(),
                    signal_type,
                    (confidence * 100.0).round() / 100.0,
                    reasons.join("; "),
                    self.name(),
                )
                .with_meta("weekly_factor", json!(weekly))
                .with_meta("regime", json!(regime.as_str())),
            );
        }

        signals
    }
}

/// Weekly trend check over every 5th NAV: +1 bullish, -1 bearish, 0 neutral.
fn weekly_confirmation(navs: &[f64]) -> i32 {
    if navs.len() < 40 {
        return 0;
    }
    let weekly: Vec<f64> = navs.iter().step_by(5).copied().collect();
    if weekly.len() < 8 {
        return 0;
    }
    let ma4 = indicators::sma(&weekly, 4);
    let ma8 = indicators::sma(&weekly, 8);
    let (Some(&m4), Some(&m8)) = (ma4.last(), ma8.last()) else {
        return 0;
    };
    if !m4.is_finite() || !m8.is_finite() || m4 == 0.0 || m8 == 0.0 {
        return 0;
    }
    let current = *weekly.last().unwrap();
    if current > m4 && m4 > m8 {
        1
    } else if current < m4 && m4 < m8 {
        -1
    } else {
        0
    }
}

/// Score the daily technical picture for one fund.
fn evaluate(tech: &TechnicalSummary, regime: Regime) -> (SignalType, f64, Vec<String>) {
    let mut buy_score: i32 = 0;
    let mut sell_score: i32 = 0;
    let mut reasons = Vec::new();

    // 1. MA stacking.
    let alignment = tech.ma_alignment;
    match alignment {
        Some(MaAlignment::Bullish) => {
            buy_score += 3;
            reasons.push("bullish MA stack".to_string());
        }
        Some(MaAlignment::Bearish) => {
            sell_score += 3;
            reasons.push("bearish MA stack".to_string());
        }
        _ => {}
    }

    // 2. MACD.
    let macd_signal = tech.macd.as_ref().map(|m| m.signal);
    match macd_signal {
        Some(MacdSignal::GoldenCross) => {
            buy_score += 2;
            reasons.push("MACD golden cross".to_string());
        }
        Some(MacdSignal::DeadCross) => {
            sell_score += 2;
            reasons.push("MACD dead cross".to_string());
        }
        Some(MacdSignal::Bullish) => buy_score += 1,
        Some(MacdSignal::Bearish) => sell_score += 1,
        None => {}
    }

    // 3. RSI extremes.
    let rsi = tech.rsi.unwrap_or(50.0);
    if rsi < 30.0 {
        buy_score += 1;
        reasons.push(format!("RSI oversold ({rsi:.0})"));
    } else if rsi > 70.0 {
        sell_score += 1;
        reasons.push(format!("RSI overbought ({rsi:.0})"));
    }

    // 4. Price vs MA20 / MA60.
    let current = tech.current_price;
    if let Some(ma20) = tech.ma.ma20 {
        if current > ma20 {
            buy_score += 1;
        } else {
            sell_score += 1;
        }
    }
    if let Some(ma60) = tech.ma.ma60 {
        if current > ma60 {
            buy_score += 1;
        } else {
            sell_score += 1;
        }
    }

    // 5. Regime modifier.
    if regime.is_bear() {
        sell_score += 1;
        buy_score = (buy_score - 1).max(0);
    } else if regime.is_bull() {
        buy_score += 1;
        sell_score = (sell_score - 1).max(0);
    }

    let net_score = buy_score - sell_score;
    let max_possible = (buy_score + sell_score).max(1);
    let confidence = net_score.unsigned_abs() as f64 / max_possible as f64 * 0.8;

    // Entries demand the MA stack plus at least one secondary confirmation.
    let has_ma_confirm = matches!(alignment, Some(MaAlignment::Bullish | MaAlignment::Bearish));
    let has_secondary = matches!(macd_signal, Some(MacdSignal::GoldenCross | MacdSignal::DeadCross))
        || rsi < 30.0
        || rsi > 70.0;

    if net_score >= 6 && has_ma_confirm {
        (SignalType::StrongBuy, confidence.min(0.9), reasons)
    } else if net_score >= 4 && has_ma_confirm && has_secondary {
        (SignalType::Buy, confidence.min(0.7), reasons)
    } else if net_score <= -6 && has_ma_confirm {
        (SignalType::StrongSell, confidence.min(0.9), reasons)
    } else if net_score <= -4 && has_ma_confirm && has_secondary {
        (SignalType::Sell, confidence.min(0.7), reasons)
    } else {
        (SignalType::Hold, 0.0, reasons)
    }
}

// ── backtest ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BacktestTrade {
    pub fund_code: String,
    pub date: String,
    pub action: &'static str,
    pub nav: f64,
    pub pnl_pct: Option<f64>,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub total_return_pct: f64,
    pub annualized_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub win_rate_pct: f64,
    pub total_trades: usize,
    pub profit_trades: usize,
    pub trades: Vec<BacktestTrade>,
}

/// Per-fund walk through history with volatility-scaled stop-loss and
/// trailing exit; funds are backtested independently and averaged.
pub fn backtest(funds: &FundBook, initial_capital: f64) -> BacktestResult {
    let mut all_trades: Vec<BacktestTrade> = Vec::new();
    let mut fund_results: Vec<(f64, f64)> = Vec::new(); // (return, max_dd)
    let mut all_dates: Vec<String> = Vec::new();

    for (fund_code, data) in funds {
        if data.nav_history.len() < 120 {
            continue;
        }
        let navs = data.navs();
        all_dates.push(data.nav_history[0].nav_date.clone());
        all_dates.push(data.nav_history.last().unwrap().nav_date.clone());

        let mut capital = initial_capital;
        let mut position = 0.0;
        let mut cost_basis = 0.0;
        let mut nav_peak: f64 = 0.0;
        let mut peak = initial_capital;
        let mut fund_max_dd = 0.0f64;
        let mut buy_index = 0usize;

        for i in 60..navs.len() {
            let window = &navs[..=i];
            let Some(tech) = indicators::technical_summary(window) else {
                continue;
            };
            let (signal_type, _, _) = evaluate(&tech, Regime::Ranging);
            let current_nav = navs[i];
            let vol = tech.volatility.unwrap_or(0.01);

            let stop_loss_pct = (vol * 15.0).clamp(0.03, 0.15);
            let trailing_stop_pct = stop_loss_pct * 1.5;

            if position > 0.0 {
                nav_peak = nav_peak.max(current_nav);
                let loss_from_cost = (current_nav - cost_basis) / cost_basis;
                let loss_from_peak = (current_nav - nav_peak) / nav_peak;

                let stop_reason = if loss_from_cost <= -stop_loss_pct {
                    Some(format!("stop loss ({:.1}%)", loss_from_cost * 100.0))
                } else if nav_peak > cost_basis && loss_from_peak <= -trailing_stop_pct {
                    Some(format!("trailing stop ({:.1}%)", loss_from_peak * 100.0))
                } else {
                    None
                };

                if let Some(reason) = stop_reason {
                    let holding_days = i - buy_index;
                    let fee_rate = if holding_days < 5 { 0.015 } else { 0.0 };
                    capital += position * current_nav * (1.0 - fee_rate);
                    all_trades.push(BacktestTrade {
                        fund_code: fund_code.clone(),
                        date: data.nav_history[i].nav_date.clone(),
                        action: "sell",
                        nav: current_nav,
                        pnl_pct: Some((current_nav - cost_basis) / cost_basis * 100.0),
                        reason,
                    });
                    position = 0.0;
                    cost_basis = 0.0;
                    nav_peak = 0.0;
                    peak = peak.max(capital);
                    fund_max_dd = fund_max_dd.min((capital - peak) / peak);
                    continue;
                }
            }

            if signal_type.is_buy() && position == 0.0 && capital > 0.0 {
                let cost = capital * 0.8;
                position = cost / current_nav;
                capital -= cost;
                cost_basis = current_nav;
                nav_peak = current_nav;
                buy_index = i;
                all_trades.push(BacktestTrade {
                    fund_code: fund_code.clone(),
                    date: data.nav_history[i].nav_date.clone(),
                    action: "buy",
                    nav: current_nav,
                    pnl_pct: None,
                    reason: String::new(),
                });
            } else if signal_type.is_sell() && position > 0.0 {
                let holding_days = i - buy_index;
                let fee_rate = if holding_days < 5 { 0.015 } else { 0.0 };
                capital += position * current_nav * (1.0 - fee_rate);
                all_trades.push(BacktestTrade {
                    fund_code: fund_code.clone(),
                    date: data.nav_history[i].nav_date.clone(),
                    action: "sell",
                    nav: current_nav,
                    pnl_pct: Some((current_nav - cost_basis) / cost_basis * 100.0),
                    reason: "exit signal".to_string(),
                });
                position = 0.0;
                cost_basis = 0.0;
                nav_peak = 0.0;
            }

            let total_value = capital + position * current_nav;
            peak = peak.max(total_value);
            fund_max_dd = fund_max_dd.min((total_value - peak) / peak);
        }

        if position > 0.0 {
            capital += position * *navs.last().unwrap();
        }
        fund_results.push(((capital - initial_capital) / initial_capital, fund_max_dd));
    }

    let (avg_return, worst_dd) = if fund_results.is_empty() {
        (0.0, 0.0)
    } else {
        let avg: f64 = fund_results.iter().map(|r| r.0).sum::<f64>() / fund_results.len() as f64;
        let worst = fund_results.iter().map(|r| r.1).fold(0.0f64, f64::min);
        (avg, worst)
    };

    let annualized = annualize(avg_return, &all_dates);

    let sells: Vec<&BacktestTrade> = all_trades.iter().filter(|t| t.action == "sell").collect();
    let profit_trades = sells.iter().filter(|t| t.pnl_pct.unwrap_or(0.0) > 0.0).count();

    BacktestResult {
        total_return_pct: (avg_return * 10_000.0).round() / 100.0,
        annualized_return_pct: (annualized * 10_000.0).round() / 100.0,
        max_drawdown_pct: (worst_dd * 10_000.0).round() / 100.0,
        win_rate_pct: profit_trades as f64 / sells.len().max(1) as f64 * 100.0,
        total_trades: all_trades.len(),
        profit_trades,
        trades: all_trades,
    }
}

fn annualize(total_return: f64, dates: &[String]) -> f64 {
    use chrono::NaiveDate;
    if total_return <= -1.0 || dates.is_empty() {
        return total_return;
    }
    let parsed: Vec<NaiveDate> = dates
        .iter()
        .filter_map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .collect();
    let (Some(min), Some(max)) = (parsed.iter().min(), parsed.iter().max()) else {
        return total_return;
    };
    let days = (*max - *min).num_days();
    if days <= 0 {
        return total_return;
    }
    (1.0 + total_return).powf(365.0 / days as f64) - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FundCategory, FundHistory, FundNav};

    fn book_with(navs: Vec<f64>) -> FundBook {
        let history = navs
            .iter()
            .enumerate()
            .map(|(i, &nav)| FundNav {
                nav_date: format!("2025-{:02}-{:02}", 1 + i / 28, 1 + i % 28),
                nav,
                acc_nav: None,
                daily_return: None,
            })
            .collect();
        let mut book = FundBook::new();
        book.insert(
            "110011".to_string(),
            FundHistory {
                category: FundCategory::Equity,
                nav_history: history,
            },
        );
        book
    }

    fn uptrend(n: usize) -> Vec<f64> {
        (0..n).map(|i| 1.0 * 1.003f64.powi(i as i32)).collect()
    }

    #[test]
    fn uptrend_with_bull_regime_emits_buy() {
        let strategy = TrendFollowing;
        let mut market = MarketData::default();
        market.global_regime = Some(crate::models::Regime::BullStrong);
        let book = book_with(uptrend(120));
        let signals = strategy.generate(&market, &book);
        assert_eq!(signals.len(), 1);
        assert!(signals[0].is_buy());
        assert!(signals[0].confidence > 0.0);
    }

    #[test]
    fn short_history_is_skipped() {
        let strategy = TrendFollowing;
        let market = MarketData::default();
        let book = book_with(uptrend(59));
        assert!(strategy.generate(&market, &book).is_empty());
    }

    #[test]
    fn weekly_confirmation_sign() {
        assert_eq!(weekly_confirmation(&uptrend(120)), 1);
        let down: Vec<f64> = uptrend(120).into_iter().rev().collect();
        assert_eq!(weekly_confirmation(&down), -1);
        assert_eq!(weekly_confirmation(&uptrend(30)), 0);
    }

    #[test]
    fn backtest_trades_and_accounts() {
        let mut navs = uptrend(200);
        // A late slump forces at least one exit.
        let last = *navs.last().unwrap();
        for i in 0..60 {
            navs.push(last * (1.0 - 0.003 * i as f64));
        }
        let book = book_with(navs);
        let result = backtest(&book, 10_000.0);
        assert!(result.total_trades > 0);
        assert!(result.max_drawdown_pct <= 0.0);
    }
}
