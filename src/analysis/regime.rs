//! Market regime detection and regime-conditioned allocation tables.
//!
//! Each asset category is classified off a representative series: a broad
//! index for equity/index, a proxy fund NAV for bond/gold/qdii. The trend
//! score is bounded to [-100, 100] from three price-structure components.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::analysis::indicators::{sma, volatility};
use crate::models::{FundCategory, Regime};
use crate::store::Database;

/// Default broad-market reference index.
pub const DEFAULT_INDEX: &str = "000300";

/// Minimum history needed to classify a series.
const MIN_POINTS: usize = 120;

/// Proxy series for categories without a stored index.
fn proxy_fund(category: FundCategory) -> Option<&'static str> {
    match category {
        FundCategory::Bond => Some("217022"),
        FundCategory::Gold => Some("000307"),
        FundCategory::Qdii => Some("270042"),
        FundCategory::Equity | FundCategory::Index => None,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegimeReading {
    pub regime: Regime,
    pub trend_score: f64,
    pub volatility: f64,
    pub current_price: f64,
    pub latest_date: String,
}

/// Classify a close/NAV series. Pure; returns None below `MIN_POINTS`.
pub fn detect_regime_from_series(closes: &[f64], latest_date: &str) -> Option<RegimeReading> {
    if closes.len() < MIN_POINTS {
        return None;
    }
    let current = *closes.last()?;

    let ma5 = sma(closes, 5);
    let ma10 = sma(closes, 10);
    let ma20 = sma(closes, 20);
    let ma60 = sma(closes, 60);
    let ma120 = sma(closes, 120);

    let last = |series: &[f64]| series.last().copied().filter(|v| v.is_finite());

    let mut trend_score = 0.0;

    // 1. Price vs moving averages (up to +/-40).
    for (series, weight) in [(&ma20, 10.0), (&ma60, 15.0), (&ma120, 15.0)] {
        if let Some(ma) = last(series) {
            if ma > 0.0 {
                let pct_above = (current - ma) / ma;
                trend_score += (pct_above * 100.0).clamp(-weight, weight);
            }
        }
    }

    // 2. MA slope over the last 10 observations (up to +/-30).
    for (series, weight) in [(&ma20, 10.0), (&ma60, 10.0), (&ma120, 10.0)] {
        let finite: Vec<f64> = series.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.len() >= 10 {
            let old = finite[finite.len() - 10];
            if old != 0.0 {
                let slope = (finite[finite.len() - 1] - old) / old;
                trend_score += (slope * 500.0).clamp(-weight, weight);
            }
        }
    }

    // 3. MA stacking (up to +/-30).
    if let (Some(m5), Some(m10), Some(m20), Some(m60)) =
        (last(&ma5), last(&ma10), last(&ma20), last(&ma60))
    {
        let vals = [m5, m10, m20, m60];
        if vals.windows(2).all(|w| w[0] > w[1]) {
            trend_score += 30.0;
        } else if vals.windows(2).all(|w| w[0] < w[1]) {
            trend_score -= 30.0;
        } else {
            let mut correct_pairs = 0;
            let mut total_pairs = 0;
            for i in 0..vals.len() {
                for j in (i + 1)..vals.len() {
                    total_pairs += 1;
                    if vals[i] > vals[j] {
                        correct_pairs += 1;
                    }
                }
            }
            trend_score += (correct_pairs as f64 / total_pairs as f64 * 2.0 - 1.0) * 15.0;
        }
    }

    let current_vol = volatility(closes, 20)
        .last()
        .copied()
        .filter(|v| v.is_finite())
        .unwrap_or(0.2);

    let mut regime = if trend_score > 40.0 {
        Regime::BullStrong
    } else if trend_score > 15.0 {
        Regime::BullWeak
    } else if trend_score > -15.0 {
        Regime::Ranging
    } else if trend_score > -40.0 {
        Regime::BearWeak
    } else {
        Regime::BearStrong
    };

    // Elevated volatility in a weak trend often marks a transition.
    if current_vol > 0.30 && matches!(regime, Regime::BullWeak | Regime::BearWeak) {
        regime = Regime::Ranging;
    }

    Some(RegimeReading {
        regime,
        trend_score,
        volatility: current_vol,
        current_price: current,
        latest_date: latest_date.to_string(),
    })
}

/// Classify one asset category from the store.
pub fn detect_category_regime(db: &Database, category: FundCategory) -> Option<RegimeReading> {
    let reading = if let Some(proxy) = proxy_fund(category) {
        let history = db.fund_nav_history(proxy).ok()?;
        if history.is_empty() {
            return None;
        }
        let closes: Vec<f64> = history.iter().map(|r| r.nav).collect();
        let latest = history.last().map(|r| r.nav_date.clone())?;
        detect_regime_from_series(&closes, &latest)
    } else {
        let history = db.index_history(DEFAULT_INDEX).ok()?;
        if history.is_empty() {
            return None;
        }
        let closes: Vec<f64> = history.iter().map(|r| r.close).collect();
        let latest = history.last().map(|r| r.trade_date.clone())?;
        detect_regime_from_series(&closes, &latest)
    };

    if reading.is_none() {
        debug!("insufficient history to classify {} regime", category.as_str());
    }
    reading
}

/// Detect all category regimes; missing categories default to ranging.
pub fn detect_all_regimes(db: &Database) -> BTreeMap<FundCategory, Regime> {
    let mut map = BTreeMap::new();
    for category in FundCategory::ALL {
        let regime = detect_category_regime(db, category)
            .map(|r| r.regime)
            .unwrap_or(Regime::Ranging);
        map.insert(category, regime);
    }
    map
}

/// Regime-conditioned targets: asset mix plus baseline strategy weights.
#[derive(Debug, Clone)]
pub struct RegimeAllocation {
    pub equity_pct: f64,
    pub bond_pct: f64,
    pub cash_pct: f64,
    pub strategy_weights: BTreeMap<&'static str, f64>,
}

pub fn regime_allocation(regime: Regime) -> RegimeAllocation {
    let (equity_pct, bond_pct, cash_pct, weights): (f64, f64, f64, [(&str, f64); 6]) = match regime
    {
        Regime::BullStrong => (
            0.60,
            0.15,
            0.25,
            [
                ("trend_following", 0.30),
                ("momentum", 0.25),
                ("mean_reversion", 0.10),
                ("valuation", 0.15),
                ("macro_cycle", 0.10),
                ("manager_alpha", 0.10),
            ],
        ),
        Regime::BullWeak => (
            0.55,
            0.20,
            0.25,
            [
                ("trend_following", 0.25),
                ("momentum", 0.20),
                ("mean_reversion", 0.20),
                ("valuation", 0.15),
                ("macro_cycle", 0.10),
                ("manager_alpha", 0.10),
            ],
        ),
        Regime::Ranging => (
            0.45,
            0.25,
            0.30,
            [
                ("trend_following", 0.15),
                ("momentum", 0.15),
                ("mean_reversion", 0.30),
                ("valuation", 0.20),
                ("macro_cycle", 0.10),
                ("manager_alpha", 0.10),
            ],
        ),
        Regime::BearWeak => (
            0.35,
            0.30,
            0.35,
            [
                ("trend_following", 0.15),
                ("momentum", 0.10),
                ("mean_reversion", 0.25),
                ("valuation", 0.25),
                ("macro_cycle", 0.15),
                ("manager_alpha", 0.10),
            ],
        ),
        Regime::BearStrong => (
            0.25,
            0.35,
            0.40,
            [
                ("trend_following", 0.15),
                ("momentum", 0.05),
                ("mean_reversion", 0.25),
                ("valuation", 0.30),
                ("macro_cycle", 0.15),
                ("manager_alpha", 0.10),
            ],
        ),
    };

    RegimeAllocation {
        equity_pct,
        bond_pct,
        cash_pct,
        strategy_weights: weights.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trend(n: usize, start: f64, daily: f64) -> Vec<f64> {
        (0..n).map(|i| start * (1.0 + daily).powi(i as i32)).collect()
    }

    #[test]
    fn needs_120_points() {
        assert!(detect_regime_from_series(&trend(119, 100.0, 0.001), "2026-07-01").is_none());
    }

    #[test]
    fn strong_uptrend_is_bull_strong() {
        let reading = detect_regime_from_series(&trend(200, 100.0, 0.004), "2026-07-01").unwrap();
        assert_eq!(reading.regime, Regime::BullStrong);
        assert!(reading.trend_score > 40.0);
    }

    #[test]
    fn strong_downtrend_is_bear_strong() {
        let reading = detect_regime_from_series(&trend(200, 100.0, -0.004), "2026-07-01").unwrap();
        assert_eq!(reading.regime, Regime::BearStrong);
    }

    #[test]
    fn flat_series_is_ranging() {
        let closes: Vec<f64> = (0..200)
            .map(|i| 100.0 + if i % 2 == 0 { 0.1 } else { -0.1 })
            .collect();
        let reading = detect_regime_from_series(&closes, "2026-07-01").unwrap();
        assert_eq!(reading.regime, Regime::Ranging);
    }

    #[test]
    fn allocation_weights_sum_to_one() {
        for regime in Regime::ALL {
            let alloc = regime_allocation(regime);
            let sum: f64 = alloc.strategy_weights.values().sum();
            assert!((sum - 1.0).abs() < 1e-9, "{:?} weights sum {}", regime, sum);
            assert!((alloc.equity_pct + alloc.bond_pct + alloc.cash_pct - 1.0).abs() < 1e-9);
        }
    }
}
