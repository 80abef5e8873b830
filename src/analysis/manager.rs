//! Manager quality evaluation from the fund's own NAV track record.
//!
//! Proxy metrics only: data span, annualized return, drawdown control,
//! Sharpe, and style stability. Grades feed the manager_alpha strategy.

use crate::analysis::indicators::{daily_returns, max_drawdown, sharpe_ratio};
use crate::models::{ManagerEvaluation, ManagerGrade};
use statrs::statistics::Statistics;

const TRADING_DAYS: f64 = 250.0;
const RISK_FREE_RATE: f64 = 0.02;

/// Evaluate a fund's manager; None below 120 NAV observations.
pub fn evaluate(fund_code: &str, navs: &[f64]) -> Option<ManagerEvaluation> {
    if navs.len() < 120 {
        return None;
    }

    let returns = daily_returns(navs);
    let mut score: f64 = 50.0;
    let mut reasons = Vec::new();

    // 1. Data span as a tenure proxy.
    let years = navs.len() as f64 / TRADING_DAYS;
    if years >= 5.0 {
        score += 15.0;
        reasons.push(format!("{years:.1}y of data spanning multiple cycles"));
    } else if years >= 3.0 {
        score += 10.0;
        reasons.push(format!("{years:.1}y of data"));
    } else if years >= 1.0 {
        score += 5.0;
    }

    // 2. Annualized return.
    let total_return = navs.last()? / navs.first()? - 1.0;
    let annualized = (1.0 + total_return).powf(1.0 / years.max(0.5)) - 1.0;
    if annualized > 0.15 {
        score += 15.0;
        reasons.push(format!("annualized {:.1}%, excellent", annualized * 100.0));
    } else if annualized > 0.08 {
        score += 10.0;
        reasons.push(format!("annualized {:.1}%, good", annualized * 100.0));
    } else if annualized > 0.0 {
        score += 5.0;
    }

    // 3. Drawdown control.
    let (max_dd, _, _) = max_drawdown(navs);
    if max_dd > -0.20 {
        score += 10.0;
        reasons.push(format!("max drawdown {:.1}%, well contained", max_dd * 100.0));
    } else if max_dd > -0.30 {
        score += 5.0;
    } else {
        score -= 5.0;
        reasons.push(format!("max drawdown {:.1}%, heavy", max_dd * 100.0));
    }

    // 4. Sharpe.
    let sharpe = sharpe_ratio(&returns, RISK_FREE_RATE);
    if sharpe > 1.5 {
        score += 10.0;
        reasons.push(format!("Sharpe {sharpe:.2}, strong risk-adjusted returns"));
    } else if sharpe > 0.8 {
        score += 5.0;
    }

    // 5. Style stability: volatility of rolling volatility.
    if returns.len() >= 60 {
        let rolling_vols: Vec<f64> = returns
            .windows(20)
            .map(|w| w.iter().copied().std_dev())
            .collect();
        let mean_vol = rolling_vols.iter().copied().mean();
        if mean_vol > 0.0 {
            let vol_of_vol = rolling_vols.iter().copied().std_dev() / mean_vol;
            if vol_of_vol < 0.3 {
                score += 5.0;
                reasons.push("consistent volatility profile".to_string());
            }
        }
    }

    let score = score.clamp(0.0, 100.0);
    let grade = if score >= 80.0 {
        ManagerGrade::A
    } else if score >= 65.0 {
        ManagerGrade::B
    } else if score >= 50.0 {
        ManagerGrade::C
    } else {
        ManagerGrade::D
    };

    Some(ManagerEvaluation {
        fund_code: fund_code.to_string(),
        score,
        grade,
        annualized_return: Some(annualized * 100.0),
        max_drawdown: Some(max_dd * 100.0),
        sharpe_ratio: Some(sharpe),
        reasons,
    })
}
