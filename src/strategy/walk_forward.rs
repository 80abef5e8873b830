//! Walk-forward validation: split history into windows, form the signal at
//! the head of each test window from in-sample data only, and score it
//! against the window's realized return. Keeps the backtest honest about
//! what was knowable at the time.

use statrs::statistics::Statistics;

use crate::analysis::indicators::{self, MaAlignment};
use crate::models::FundBook;

#[derive(Debug, Clone)]
pub struct WindowResult {
    pub fund_code: String,
    pub window: usize,
    pub test_period: String,
    pub predicted: &'static str,
    pub actual_return_pct: f64,
    pub is_correct: bool,
}

#[derive(Debug, Clone)]
pub struct WalkForwardResult {
    pub strategy_name: &'static str,
    pub n_windows: usize,
    pub avg_return_pct: f64,
    pub worst_return_pct: f64,
    pub best_return_pct: f64,
    pub win_rate_pct: f64,
    pub total_trades: usize,
    pub robustness_score: f64,
    pub windows: Vec<WindowResult>,
}

pub fn run_walk_forward(funds: &FundBook, n_windows: usize) -> WalkForwardResult {
    let mut windows = Vec::new();

    for (fund_code, data) in funds {
        if data.nav_history.len() < 200 {
            continue;
        }
        let navs = data.navs();
        let total_len = navs.len();
        let window_size = total_len / n_windows;
        if window_size < 60 {
            continue;
        }

        for i in 0..(n_windows - 1) {
            let train_end = (i + 1) * window_size;
            let test_start = train_end;
            let test_end = (test_start + window_size).min(total_len);
            if test_end - test_start < 20 {
                continue;
            }

            // Signal is formed from data available shortly into the window.
            let visible = &navs[..(test_start + 30).min(total_len)];
            let Some(tech) = indicators::technical_summary(visible) else {
                continue;
            };

            let start_nav = navs[test_start];
            let end_nav = navs[test_end - 1];
            if start_nav <= 0.0 {
                continue;
            }
            let period_return = (end_nav - start_nav) / start_nav * 100.0;

            let rsi = tech.rsi.unwrap_or(50.0);
            let predicted = match tech.ma_alignment {
                Some(MaAlignment::Bullish) if rsi < 70.0 => "buy",
                Some(MaAlignment::Bearish) if rsi > 30.0 => "sell",
                _ => "hold",
            };

            let is_correct = match predicted {
                "buy" => period_return > 0.0,
                "sell" => period_return < 0.0,
                _ => true,
            };

            windows.push(WindowResult {
                fund_code: fund_code.clone(),
                window: i,
                test_period: format!(
                    "{} ~ {}",
                    data.nav_history[test_start].nav_date,
                    data.nav_history[test_end - 1].nav_date
                ),
                predicted,
                actual_return_pct: (period_return * 100.0).round() / 100.0,
                is_correct,
            });
        }
    }

    summarize(windows, n_windows)
}

fn summarize(windows: Vec<WindowResult>, n_windows: usize) -> WalkForwardResult {
    let active: Vec<&WindowResult> = windows.iter().filter(|w| w.predicted != "hold").collect();
    let returns: Vec<f64> = active.iter().map(|w| w.actual_return_pct).collect();
    let correct = active.iter().filter(|w| w.is_correct).count();

    let (avg, worst, best) = if returns.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        (
            returns.iter().copied().mean(),
            returns.iter().copied().fold(f64::INFINITY, f64::min),
            returns.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        )
    };
    let win_rate = if active.is_empty() {
        0.0
    } else {
        correct as f64 / active.len() as f64 * 100.0
    };

    // Robustness: win rate, worst-window damage, cross-window consistency.
    let mut robustness = 0.0;
    if win_rate > 60.0 {
        robustness += 30.0;
    } else if win_rate > 50.0 {
        robustness += 15.0;
    }
    if !returns.is_empty() {
        if worst > -10.0 {
            robustness += 30.0;
        } else if worst > -15.0 {
            robustness += 15.0;
        }
    }
    if returns.len() > 3 {
        let std = returns.iter().copied().std_dev();
        if std < 5.0 {
            robustness += 40.0;
        } else if std < 10.0 {
            robustness += 20.0;
        }
    }

    WalkForwardResult {
        strategy_name: "trend_following",
        n_windows,
        avg_return_pct: (avg * 100.0).round() / 100.0,
        worst_return_pct: if returns.is_empty() { 0.0 } else { (worst * 100.0).round() / 100.0 },
        best_return_pct: if returns.is_empty() { 0.0 } else { (best * 100.0).round() / 100.0 },
        win_rate_pct: (win_rate * 10.0).round() / 10.0,
        total_trades: active.len(),
        robustness_score: robustness,
        windows,
    }
}
