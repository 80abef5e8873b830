//! Monte-Carlo trade-order simulation: how much of a backtest's outcome is
//! sequencing luck? Shuffle the realized trade P&Ls many times, replay the
//! equity curve, and look at the distribution.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use statrs::statistics::Statistics;
use tracing::info;

use crate::models::FundBook;

use super::trend_following;

#[derive(Debug, Clone)]
pub struct SimOutcome {
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
}

#[derive(Debug, Clone)]
pub struct MonteCarloResult {
    pub n_simulations: usize,
    pub n_trades: usize,
    pub median_return_pct: f64,
    pub mean_return_pct: f64,
    pub percentile_5_pct: f64,
    pub percentile_95_pct: f64,
    pub worst_return_pct: f64,
    pub best_return_pct: f64,
    pub median_max_drawdown_pct: f64,
    pub worst_max_drawdown_pct: f64,
    pub probability_of_profit_pct: f64,
    pub robustness_score: f64,
}

/// Replay one shuffled P&L sequence, committing 80% of capital per trade.
pub fn simulate_equity_curve(trade_pnls_pct: &[f64], initial_capital: f64) -> SimOutcome {
    let mut capital = initial_capital;
    let mut peak = capital;
    let mut max_dd = 0.0f64;

    for pnl in trade_pnls_pct {
        let position = capital * 0.8;
        capital += position * (pnl / 100.0);
        peak = peak.max(capital);
        max_dd = max_dd.min((capital - peak) / peak);
        if capital <= 0.0 {
            break;
        }
    }

    SimOutcome {
        total_return_pct: (capital - initial_capital) / initial_capital * 100.0,
        max_drawdown_pct: max_dd * 100.0,
    }
}

/// Run `n_simulations` shuffles (seeded, reproducible) in parallel.
pub fn run_monte_carlo(
    trade_pnls_pct: &[f64],
    n_simulations: usize,
    initial_capital: f64,
    seed: u64,
) -> MonteCarloResult {
    if trade_pnls_pct.len() < 3 {
        return MonteCarloResult {
            n_simulations: 0,
            n_trades: trade_pnls_pct.len(),
            median_return_pct: 0.0,
            mean_return_pct: 0.0,
            percentile_5_pct: 0.0,
            percentile_95_pct: 0.0,
            worst_return_pct: 0.0,
            best_return_pct: 0.0,
            median_max_drawdown_pct: 0.0,
            worst_max_drawdown_pct: 0.0,
            probability_of_profit_pct: 0.0,
            robustness_score: 0.0,
        };
    }

    let outcomes: Vec<SimOutcome> = (0..n_simulations)
        .into_par_iter()
        .map(|i| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(i as u64));
            let mut shuffled = trade_pnls_pct.to_vec();
            shuffled.shuffle(&mut rng);
            simulate_equity_curve(&shuffled, initial_capital)
        })
        .collect();

    let mut returns: Vec<f64> = outcomes.iter().map(|o| o.total_return_pct).collect();
    let mut drawdowns: Vec<f64> = outcomes.iter().map(|o| o.max_drawdown_pct).collect();
    returns.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    drawdowns.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let percentile = |sorted: &[f64], p: f64| -> f64 {
        let idx = ((p / 100.0) * sorted.len() as f64) as usize;
        sorted[idx.min(sorted.len() - 1)]
    };
    let median = |sorted: &[f64]| percentile(sorted, 50.0);

    let prob_profit = returns.iter().filter(|r| **r > 0.0).count() as f64 / returns.len() as f64 * 100.0;
    let p5 = percentile(&returns, 5.0);
    let median_dd = median(&drawdowns);

    let mut robustness: f64 = 0.0;
    if prob_profit > 80.0 {
        robustness += 30.0;
    } else if prob_profit > 60.0 {
        robustness += 15.0;
    }
    if p5 > 0.0 {
        robustness += 30.0; // still profitable in the 5% worst case
    } else if p5 > -5.0 {
        robustness += 15.0;
    }
    if median_dd.abs() < 10.0 {
        robustness += 20.0;
    } else if median_dd.abs() < 15.0 {
        robustness += 10.0;
    }
    let std = returns.iter().copied().std_dev();
    if std < 5.0 {
        robustness += 20.0;
    } else if std < 10.0 {
        robustness += 10.0;
    }

    MonteCarloResult {
        n_simulations,
        n_trades: trade_pnls_pct.len(),
        median_return_pct: (median(&returns) * 100.0).round() / 100.0,
        mean_return_pct: (returns.iter().copied().mean() * 100.0).round() / 100.0,
        percentile_5_pct: (p5 * 100.0).round() / 100.0,
        percentile_95_pct: (percentile(&returns, 95.0) * 100.0).round() / 100.0,
        worst_return_pct: (returns[0] * 100.0).round() / 100.0,
        best_return_pct: (returns[returns.len() - 1] * 100.0).round() / 100.0,
        median_max_drawdown_pct: (median_dd * 100.0).round() / 100.0,
        worst_max_drawdown_pct: (drawdowns[0] * 100.0).round() / 100.0,
        probability_of_profit_pct: (prob_profit * 10.0).round() / 10.0,
        robustness_score: robustness.min(100.0),
    }
}

/// Extract trade P&Ls from a trend-following backtest and run the shuffle.
pub fn run_from_backtest(funds: &FundBook, seed: u64) -> Option<MonteCarloResult> {
    let backtest = trend_following::backtest(funds, 10_000.0);
    let trade_pnls: Vec<f64> = backtest
        .trades
        .iter()
        .filter(|t| t.action == "sell")
        .filter_map(|t| t.pnl_pct)
        .collect();

    if trade_pnls.len() < 3 {
        info!("not enough closed trades ({}) for a Monte-Carlo pass", trade_pnls.len());
        return None;
    }

    info!("running 1000 shuffles over {} trades", trade_pnls.len());
    Some(run_monte_carlo(&trade_pnls, 1000, 10_000.0, seed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equity_curve_accounting() {
        // +10% then -10% on 80% positions: 1.08 * (1 - 0.08) of capital.
        let outcome = simulate_equity_curve(&[10.0, -10.0], 10_000.0);
        let expected = (10_000.0 * 1.08 * 0.92 - 10_000.0) / 10_000.0 * 100.0;
        assert!((outcome.total_return_pct - expected).abs() < 1e-9);
        assert!(outcome.max_drawdown_pct < 0.0);
    }

    #[test]
    fn too_few_trades_yields_null_result() {
        let result = run_monte_carlo(&[1.0, -2.0], 100, 10_000.0, 42);
        assert_eq!(result.n_simulations, 0);
    }

    #[test]
    fn same_seed_same_distribution() {
        let pnls = [3.0, -2.0, 5.0, -1.0, 2.5, -4.0, 6.0];
        let a = run_monte_carlo(&pnls, 200, 10_000.0, 7);
        let b = run_monte_carlo(&pnls, 200, 10_000.0, 7);
        assert_eq!(a.median_return_pct, b.median_return_pct);
        assert_eq!(a.worst_return_pct, b.worst_return_pct);
        assert_eq!(a.probability_of_profit_pct, b.probability_of_profit_pct);
    }

    #[test]
    fn mostly_winning_trades_score_robust() {
        let pnls = [2.0, 3.0, 1.5, 2.5, -1.0, 4.0, 2.0, 1.0];
        let result = run_monte_carlo(&pnls, 500, 10_000.0, 42);
        assert!(result.probability_of_profit_pct > 90.0);
        assert!(result.robustness_score >= 60.0);
    }
}
