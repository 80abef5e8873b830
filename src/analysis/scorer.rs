//! Composite fund scoring against per-category benchmarks.
//!
//! Four dimensions: return (40), risk (30), stability (20), fees (10).
//! Benchmarks come from `scoring_targets.<category>` in the config.

use anyhow::Result;

use crate::analysis::indicators::{daily_returns, max_drawdown, sharpe_ratio, volatility};
use crate::config::{Config, ScoringTarget};
use crate::models::FundCategory;
use crate::store::Database;

const RISK_FREE_RATE: f64 = 0.02;

#[derive(Debug, Clone)]
pub struct FundScore {
    pub fund_code: String,
    pub fund_name: String,
    pub category: FundCategory,
    pub latest_nav: f64,
    pub return_1m: Option<f64>,
    pub return_3m: Option<f64>,
    pub return_6m: Option<f64>,
    pub return_1y: Option<f64>,
    pub max_drawdown: f64,
    pub volatility: Option<f64>,
    pub sharpe_ratio: f64,
    pub return_score: f64,
    pub risk_score: f64,
    pub stability_score: f64,
    pub fee_score: f64,
    pub total_score: f64,
}

fn trailing_return(navs: &[f64], days: usize) -> Option<f64> {
    let days = days.min(navs.len().saturating_sub(1));
    if days == 0 {
        return None;
    }
    let current = *navs.last()?;
    let past = navs[navs.len() - 1 - days];
    if past > 0.0 {
        Some((current - past) / past * 100.0)
    } else {
        None
    }
}

/// Score one fund; None below 60 NAV observations.
pub fn score_fund(
    fund_code: &str,
    fund_name: &str,
    category: FundCategory,
    navs: &[f64],
    target: ScoringTarget,
    subscription_fee_rate: Option<f64>,
) -> Option<FundScore> {
    if navs.len() < 60 {
        return None;
    }
    let returns = daily_returns(navs);
    let latest_nav = *navs.last()?;

    let return_1m = trailing_return(navs, 22);
    let return_3m = trailing_return(navs, 66);
    let return_6m = trailing_return(navs, 132);
    let return_1y = trailing_return(navs, 250);

    // Return dimension (40): each period annualized and mapped so that the
    // category target earns full marks and zero earns half.
    let target_pct = target.return_target * 100.0;
    let mut return_score = 0.0;
    for (ret, annualize, weight) in [
        (return_1m, 12.0, 0.15),
        (return_3m, 4.0, 0.25),
        (return_6m, 2.0, 0.30),
        (return_1y, 1.0, 0.30),
    ] {
        let annualized = ret.unwrap_or(0.0) * annualize;
        let period_score = ((annualized + target_pct) / (target_pct * 2.0) * 40.0).clamp(0.0, 40.0);
        return_score += period_score * weight;
    }

    // Risk dimension (30): drawdown and volatility penalties, Sharpe bonus.
    let mut risk_score = 30.0;
    let (max_dd, _, _) = max_drawdown(navs);
    risk_score -= (max_dd.abs() / target.dd_cap * 15.0).clamp(0.0, 30.0);

    let current_vol = volatility(navs, 20).last().copied().filter(|v| v.is_finite());
    if let Some(vol) = current_vol {
        let vol_floor = target.vol_cap * 0.25;
        if target.vol_cap > vol_floor {
            risk_score -= ((vol - vol_floor) / (target.vol_cap - vol_floor) * 10.0).clamp(0.0, 10.0);
        }
    }

    let sharpe = sharpe_ratio(&returns, RISK_FREE_RATE);
    risk_score += ((sharpe - 0.5) / 1.5 * 5.0).clamp(-5.0, 5.0);
    let risk_score = risk_score.max(0.0);

    // Stability dimension (20): share of positive ~monthly buckets mapped
    // from 30% -> 0 up to 70% -> 20.
    let mut stability_score = 20.0;
    let step = 22;
    let monthly: Vec<f64> = (step..navs.len())
        .step_by(step)
        .filter(|&i| navs[i - step] > 0.0)
        .map(|i| (navs[i] - navs[i - step]) / navs[i - step])
        .collect();
    if !monthly.is_empty() {
        let win_rate = monthly.iter().filter(|r| **r > 0.0).count() as f64 / monthly.len() as f64;
        stability_score = ((win_rate - 0.30) / 0.40 * 20.0).clamp(0.0, 20.0);
    }

    // Fee dimension (10): lower subscription fee scores higher; unknown = 7.
    let fee_score = match subscription_fee_rate {
        Some(rate) => ((2.0 - rate) / 2.0 * 10.0).clamp(0.0, 10.0),
        None => 7.0,
    };

    let total_score = return_score + risk_score + stability_score + fee_score;

    Some(FundScore {
        fund_code: fund_code.to_string(),
        fund_name: fund_name.to_string(),
        category,
        latest_nav,
        return_1m,
        return_3m,
        return_6m,
        return_1y,
        max_drawdown: max_dd * 100.0,
        volatility: current_vol,
        sharpe_ratio: sharpe,
        return_score,
        risk_score,
        stability_score,
        fee_score,
        total_score,
    })
}

/// Score every stored fund with enough history, best first.
pub fn screen_and_score(db: &Database, config: &Config) -> Result<Vec<FundScore>> {
    let mut scored = Vec::new();
    for code in db.fund_codes_with_history(60)? {
        let history = db.fund_nav_history(&code)?;
        let navs: Vec<f64> = history.iter().map(|r| r.nav).collect();
        let category = db.classify_fund(&code);
        let name = db.fund_name(&code).unwrap_or_else(|| format!("fund {code}"));
        let target = config.scoring_target(category.as_str());
        if let Some(score) = score_fund(&code, &name, category, &navs, target, None) {
            scored.push(score);
        }
    }
    scored.sort_by(|a, b| {
        b.total_score
            .partial_cmp(&a.total_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.fund_code.cmp(&b.fund_code))
    });
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> ScoringTarget {
        ScoringTarget { return_target: 0.20, vol_cap: 0.40, dd_cap: 0.30 }
    }

    #[test]
    fn requires_sixty_points() {
        let navs = vec![1.0; 59];
        assert!(score_fund("x", "x", FundCategory::Equity, &navs, target(), None).is_none());
    }

    #[test]
    fn rising_fund_outscores_falling_fund() {
        let up: Vec<f64> = (0..300).map(|i| 1.0 * 1.001f64.powi(i)).collect();
        let down: Vec<f64> = (0..300).map(|i| 2.0 * 0.999f64.powi(i)).collect();
        let s_up = score_fund("a", "a", FundCategory::Equity, &up, target(), None).unwrap();
        let s_down = score_fund("b", "b", FundCategory::Equity, &down, target(), None).unwrap();
        assert!(s_up.total_score > s_down.total_score);
        assert!(s_up.total_score <= 100.0);
        assert!(s_down.total_score >= 0.0);
    }

    #[test]
    fn fee_rate_moves_fee_score() {
        let navs: Vec<f64> = (0..120).map(|i| 1.0 + i as f64 * 0.0005).collect();
        let cheap = score_fund("a", "a", FundCategory::Equity, &navs, target(), Some(0.1)).unwrap();
        let dear = score_fund("b", "b", FundCategory::Equity, &navs, target(), Some(1.8)).unwrap();
        assert!(cheap.fee_score > dear.fee_score);
    }
}
