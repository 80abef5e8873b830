//! Cross-sectional momentum strategy (auxiliary).
//!
//! Ranks funds on a composite of risk-adjusted momentum, raw momentum over
//! days [-60, -5] (dropping the most recent week of reversal noise), path
//! quality, and an acceleration bonus. Top ranks become buys, bottom ranks
//! sells. Disabled in strong bear markets.
//!
//! Requires: per-fund NAV history (>= lookback) and the global regime.

use serde_json::json;
use statrs::statistics::Statistics;

use crate::models::{FundBook, MarketData, Regime, Signal, SignalType};

use super::Strategy;

pub struct Momentum {
    pub lookback_days: usize,
    pub top_n: usize,
}

impl Default for Momentum {
    fn default() -> Self {
        Self {
            lookback_days: 60,
            top_n: 3,
        }
    }
}

#[derive(Debug, Clone)]
struct MomentumScore {
    fund_code: String,
    raw_momentum: f64,
    sharpe_momentum: f64,
    path_quality: f64,
    trend_accel: bool,
    composite_score: f64,
}

impl Strategy for Momentum {
    fn name(&self) -> &'static str {
        "momentum"
    }

    fn default_weight(&self) -> f64 {
        0.20
    }

    fn generate(&self, market: &MarketData, funds: &FundBook) -> Vec<Signal> {
        let mut signals = Vec::new();

        if market.global_regime() == Regime::BearStrong {
            return signals;
        }

        let mut ranked: Vec<MomentumScore> = funds
            .iter()
            .filter(|(_, data)| data.nav_history.len() >= self.lookback_days)
            .filter_map(|(code, data)| self.compute_score(code, &data.navs()))
            .collect();

        if ranked.len() < 2 {
            return signals;
        }

        ranked.sort_by(|a, b| {
            b.composite_score
                .partial_cmp(&a.composite_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.fund_code.cmp(&b.fund_code))
        });

        // Strongest composites become buys.
        for item in ranked.iter().take(self.top_n) {
            if item.composite_score > 5.0 {
                let confidence = (item.composite_score / 50.0).min(0.7);
                let mut reasons = vec![
                    format!("risk-adjusted momentum {:.2}", item.sharpe_momentum),
                    format!("path quality {:.0}%", item.path_quality * 100.0),
                ];
                if item.trend_accel {
                    reasons.push("momentum accelerating".to_string());
                }
                signals.push(
                    Signal::new(
                        item.fund_code.clone(),
                        SignalType::Buy,
                        (confidence * 100.0).round() / 100.0,
                        reasons.join(", "),
                        self.name(),
                    )
                    .with_meta("composite_score", json!(item.composite_score))
                    .with_meta("sharpe_momentum", json!(item.sharpe_momentum)),
                );
            }
        }

        // Weakest composites become sells.
        for item in ranked.iter().rev().take(self.top_n) {
            if item.composite_score < -10.0 {
                let confidence = (item.composite_score.abs() / 50.0).min(0.7);
                signals.push(
                    Signal::new(
                        item.fund_code.clone(),
                        SignalType::Sell,
                        (confidence * 100.0).round() / 100.0,
                        format!("bottom of momentum ranks, composite {:.1}", item.composite_score),
                        self.name(),
                    )
                    .with_meta("composite_score", json!(item.composite_score)),
                );
            }
        }

        signals
    }
}

impl Momentum {
    fn compute_score(&self, fund_code: &str, navs: &[f64]) -> Option<MomentumScore> {
        if navs.len() < self.lookback_days {
            return None;
        }
        let n = navs.len();

        // 1. Raw momentum over [-60, -5], skipping the last week.
        let t5 = if n >= 6 { navs[n - 6] } else { navs[n - 1] };
        let t60 = navs[n - self.lookback_days];
        if t60 <= 0.0 {
            return None;
        }
        let raw_momentum = (t5 - t60) / t60 * 100.0;

        // 2. Risk-adjusted (Sharpe-style) momentum over the same window.
        let window_end = if n > 5 { n - 5 } else { n };
        let window = &navs[n - self.lookback_days..window_end];
        let daily: Vec<f64> = window
            .windows(2)
            .filter(|w| w[0] > 0.0)
            .map(|w| (w[1] - w[0]) / w[0])
            .collect();
        let sharpe_momentum = if daily.len() < 10 {
            raw_momentum / 10.0
        } else {
            let std = daily.iter().copied().std_dev();
            if std == 0.0 || !std.is_finite() {
                raw_momentum / 10.0
            } else {
                daily.iter().copied().mean() / std * 250.0f64.sqrt()
            }
        };

        // 3. Path quality: share of up days, penalized by losing streaks.
        let path_quality = if daily.is_empty() {
            0.5
        } else {
            let positive_ratio =
                daily.iter().filter(|r| **r > 0.0).count() as f64 / daily.len() as f64;
            let mut neg_streak = 0usize;
            let mut max_neg_streak = 0usize;
            for r in &daily {
                if *r < 0.0 {
                    neg_streak += 1;
                    max_neg_streak = max_neg_streak.max(neg_streak);
                } else {
                    neg_streak = 0;
                }
            }
            let streak_penalty = (1.0 - max_neg_streak as f64 / 10.0).max(0.0);
            positive_ratio * 0.7 + streak_penalty * 0.3
        };

        // 4. Acceleration: short-window momentum beating half the long run.
        let trend_accel = if n >= 25 {
            let t20 = if n >= 21 { navs[n - 21] } else { navs[0] };
            let short_mom = if t20 > 0.0 { (t5 - t20) / t20 * 100.0 } else { 0.0 };
            short_mom > raw_momentum * 0.5 && short_mom > 2.0
        } else {
            false
        };

        let composite_score = sharpe_momentum * 10.0
            + raw_momentum * 0.3
            + path_quality * 10.0
            + if trend_accel { 5.0 } else { 0.0 };

        Some(MomentumScore {
            fund_code: fund_code.to_string(),
            raw_momentum,
            sharpe_momentum,
            path_quality,
            trend_accel,
            composite_score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FundCategory, FundHistory, FundNav};

    fn history(navs: Vec<f64>) -> FundHistory {
        FundHistory {
            category: FundCategory::Equity,
            nav_history: navs
                .iter()
                .enumerate()
                .map(|(i, &nav)| FundNav {
                    nav_date: format!("2025-{:02}-{:02}", 1 + i / 28, 1 + i % 28),
                    nav,
                    acc_nav: None,
                    daily_return: None,
                })
                .collect(),
        }
    }

    fn geometric(n: usize, daily: f64) -> Vec<f64> {
        (0..n).map(|i| (1.0 + daily).powi(i as i32)).collect()
    }

    fn two_fund_book() -> FundBook {
        let mut book = FundBook::new();
        book.insert("110011".to_string(), history(geometric(90, 0.004)));
        book.insert("320007".to_string(), history(geometric(90, -0.006)));
        book
    }

    #[test]
    fn winner_bought_loser_sold() {
        let strategy = Momentum::default();
        let market = MarketData::default();
        let signals = strategy.generate(&market, &two_fund_book());
        let buys: Vec<_> = signals.iter().filter(|s| s.is_buy()).collect();
        let sells: Vec<_> = signals.iter().filter(|s| s.is_sell()).collect();
        assert_eq!(buys.len(), 1);
        assert_eq!(buys[0].fund_code, "110011");
        assert_eq!(sells.len(), 1);
        assert_eq!(sells[0].fund_code, "320007");
        assert!(buys[0].confidence <= 0.7);
    }

    #[test]
    fn disabled_in_bear_strong() {
        let strategy = Momentum::default();
        let mut market = MarketData::default();
        market.global_regime = Some(Regime::BearStrong);
        assert!(strategy.generate(&market, &two_fund_book()).is_empty());
    }

    #[test]
    fn single_fund_universe_is_not_ranked() {
        let strategy = Momentum::default();
        let market = MarketData::default();
        let mut book = FundBook::new();
        book.insert("110011".to_string(), history(geometric(90, 0.004)));
        assert!(strategy.generate(&market, &book).is_empty());
    }
}
