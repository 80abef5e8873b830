//! Holding-correlation control: real diversification, not fund-count
//! diversification. A candidate highly correlated with what we already hold
//! is effectively the same position and gets sized down.

use anyhow::Result;

use crate::store::Database;

/// Trailing window of daily returns used for correlation.
pub const LOOKBACK_DAYS: usize = 120;

/// Minimum overlapping observations for a usable estimate.
const MIN_OVERLAP: usize = 30;

/// Pearson correlation of two equal-length slices.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}

/// Map an average correlation to a position multiplier.
pub fn penalty_from_correlation(avg_corr: f64) -> f64 {
    if avg_corr > 0.8 {
        0.3
    } else if avg_corr > 0.5 {
        ((1.0 - avg_corr * 0.7) * 100.0).round() / 100.0
    } else {
        1.0
    }
}

/// Position multiplier for buying `fund_code` against current holdings,
/// from date-aligned 120-day return correlations. Insufficient overlap
/// means no penalty.
pub fn correlation_penalty(db: &Database, fund_code: &str, holdings: &[String]) -> Result<f64> {
    if holdings.is_empty() {
        return Ok(1.0);
    }

    let mut codes: Vec<String> = holdings.to_vec();
    codes.push(fund_code.to_string());
    let returns = db.aligned_returns(&codes, LOOKBACK_DAYS)?;

    let Some(candidate) = returns.get(fund_code) else {
        return Ok(1.0);
    };

    let mut correlations = Vec::new();
    for holding in holdings {
        let Some(other) = returns.get(holding) else {
            continue;
        };
        // Intersect on shared dates.
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for (date, x) in candidate {
            if let Some(y) = other.get(date) {
                xs.push(*x);
                ys.push(*y);
            }
        }
        if xs.len() >= MIN_OVERLAP {
            if let Some(corr) = pearson(&xs, &ys) {
                correlations.push(corr);
            }
        }
    }

    if correlations.is_empty() {
        return Ok(1.0);
    }
    let avg = correlations.iter().sum::<f64>() / correlations.len() as f64;
    Ok(penalty_from_correlation(avg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FundNav;
    use crate::store::testutil::temp_db;

    #[test]
    fn pearson_sanity() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [2.0, 4.0, 6.0, 8.0];
        assert!((pearson(&a, &b).unwrap() - 1.0).abs() < 1e-12);
        let c = [4.0, 3.0, 2.0, 1.0];
        assert!((pearson(&a, &c).unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn penalty_bands() {
        assert_eq!(penalty_from_correlation(0.9), 0.3);
        assert_eq!(penalty_from_correlation(0.6), 1.0 - 0.6 * 0.7);
        assert_eq!(penalty_from_correlation(0.2), 1.0);
    }

    fn seed_series(db: &crate::store::Database, code: &str, f: impl Fn(usize) -> f64) {
        let rows: Vec<FundNav> = (0..140)
            .map(|i| FundNav {
                nav_date: format!("2026-{:02}-{:02}", 1 + i / 28, 1 + i % 28),
                nav: f(i),
                acc_nav: None,
                daily_return: None,
            })
            .collect();
        db.upsert_fund_nav(code, &rows).unwrap();
    }

    #[test]
    fn near_identical_series_earns_heavy_penalty() {
        let (_dir, db) = temp_db();
        let wave = |i: usize| 1.0 + 0.01 * ((i as f64) * 0.7).sin() + 0.0005 * i as f64;
        seed_series(&db, "110011", wave);
        seed_series(&db, "005827", |i| wave(i) * 1.01);

        let penalty = correlation_penalty(&db, "005827", &["110011".to_string()]).unwrap();
        assert_eq!(penalty, 0.3);
    }

    #[test]
    fn unrelated_series_is_unpenalized() {
        let (_dir, db) = temp_db();
        seed_series(&db, "110011", |i| 1.0 + 0.01 * ((i as f64) * 0.7).sin());
        seed_series(&db, "217022", |i| 1.0 + 0.01 * ((i as f64) * 0.7 + 1.57).cos() * if i % 2 == 0 { 1.0 } else { -1.0 });

        let penalty = correlation_penalty(&db, "217022", &["110011".to_string()]).unwrap();
        assert!(penalty > 0.3);
    }

    #[test]
    fn no_holdings_no_penalty() {
        let (_dir, db) = temp_db();
        assert_eq!(correlation_penalty(&db, "110011", &[]).unwrap(), 1.0);
    }
}
