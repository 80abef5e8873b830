//! Learning loop: validate past signals against realized NAVs, aggregate
//! per-strategy performance by regime, and derive learned strategy weights.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use tracing::{debug, info};

use crate::store::validation::{Horizon, PerformanceRow};
use crate::store::Database;

/// Aggregation window for strategy performance.
const PERFORMANCE_WINDOW_DAYS: i64 = 90;

/// Minimum validated signals before a performance row feeds learned weights.
const MIN_SIGNALS_FOR_WEIGHT: i64 = 5;

fn date_str(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Direction check: BUY-family signals must clear the horizon hurdle, SELL-
/// family signals need a negative return. Flat outcomes count as wrong.
pub fn direction_correct(signal_type: &str, return_pct: f64, horizon: Horizon) -> bool {
    if matches!(signal_type, "strong_buy" | "buy") {
        return_pct > horizon.buy_hurdle_pct()
    } else if matches!(signal_type, "strong_sell" | "sell") {
        return_pct < 0.0
    } else {
        false
    }
}

/// Validate every row whose horizon has elapsed. Returns validated count.
pub fn validate_pending(db: &Database, today: NaiveDate) -> Result<usize> {
    let mut validated = 0;

    for horizon in [Horizon::Days7, Horizon::Days30] {
        let cutoff = date_str(today - Duration::days(horizon.days()));
        for pending in db.pending_validations(horizon, &cutoff)? {
            let Some(nav_at) = pending.nav_at_signal.filter(|v| *v > 0.0) else {
                continue;
            };
            let signal_date = match NaiveDate::parse_from_str(&pending.signal_date, "%Y-%m-%d") {
                Ok(d) => d,
                Err(_) => continue,
            };
            let target = date_str(signal_date + Duration::days(horizon.days()));
            let Some((_, nav_after)) = db.nav_on_or_after(&pending.fund_code, &target)? else {
                continue; // no later NAV yet; stays pending
            };

            let return_pct = (nav_after - nav_at) / nav_at * 100.0;
            let correct = direction_correct(&pending.signal_type, return_pct, horizon);
            db.apply_validation(
                pending.id,
                horizon,
                nav_after,
                (return_pct * 10_000.0).round() / 10_000.0,
                correct,
                &date_str(today),
            )?;
            validated += 1;
        }
    }

    if validated > 0 {
        info!("validated {} historical signals", validated);
    }
    Ok(validated)
}

/// Rebuild the strategy_performance table from the trailing window.
pub fn update_strategy_performance(db: &Database, today: NaiveDate) -> Result<usize> {
    let cutoff = date_str(today - Duration::days(PERFORMANCE_WINDOW_DAYS));
    let period_end = date_str(today);

    let stats = db.validated_stats(&cutoff)?;
    for s in &stats {
        let win_rate = if s.total > 0 {
            s.correct as f64 / s.total as f64
        } else {
            0.0
        };

        let high = db
            .win_rate_in_confidence_band(&s.strategy_name, &s.regime, &cutoff, true)?
            .unwrap_or(0.0);
        let low = db
            .win_rate_in_confidence_band(&s.strategy_name, &s.regime, &cutoff, false)?
            .unwrap_or(0.0);
        let confidence_accuracy = high - low;

        // Higher win rate earns more weight, floored at 0.1; loss-making
        // strategies are halved.
        let mut recommended_weight = (win_rate * 1.5).clamp(0.1, 1.0);
        if s.avg_return < -2.0 {
            recommended_weight *= 0.5;
        }

        db.upsert_strategy_performance(
            &cutoff,
            &period_end,
            &s.strategy_name,
            &s.regime,
            s.total,
            s.correct,
            (win_rate * 10_000.0).round() / 10_000.0,
            (s.avg_return * 10_000.0).round() / 10_000.0,
            (s.avg_confidence * 10_000.0).round() / 10_000.0,
            (confidence_accuracy * 10_000.0).round() / 10_000.0,
            (recommended_weight * 10_000.0).round() / 10_000.0,
        )?;
    }

    if !stats.is_empty() {
        info!("updated {} strategy performance rows", stats.len());
    }
    Ok(stats.len())
}

/// Learned strategy weights for one regime, normalized to sum 1.
///
/// Requires at least two strategies with >= 5 validated signals; otherwise
/// None and callers fall back to regime-allocation defaults. Strategies with
/// no performance row receive a small floor weight before renormalization.
pub fn learned_weights(
    db: &Database,
    regime: &str,
    known_strategies: &[&str],
) -> Result<Option<BTreeMap<String, f64>>> {
    let rows = db.performance_rows_for_regime(regime, MIN_SIGNALS_FOR_WEIGHT)?;
    if rows.is_empty() {
        return Ok(None);
    }

    let mut weights: BTreeMap<String, f64> = BTreeMap::new();
    for row in &rows {
        if known_strategies.iter().any(|k| *k == row.strategy_name)
            && !weights.contains_key(&row.strategy_name)
        {
            weights.insert(row.strategy_name.clone(), row.recommended_weight);
        }
    }

    if weights.len() < 2 {
        debug!("learned weights for {} need >= 2 strategies, have {}", regime, weights.len());
        return Ok(None);
    }

    let total: f64 = weights.values().sum();
    if total <= 0.0 {
        return Ok(None);
    }
    for value in weights.values_mut() {
        *value /= total;
    }

    // Backfill strategies the window never validated.
    for name in known_strategies {
        if !weights.contains_key(*name) {
            let floor = if matches!(*name, "macro_cycle" | "manager_alpha") {
                0.05
            } else {
                0.20
            };
            weights.insert((*name).to_string(), floor);
        }
    }

    let total: f64 = weights.values().sum();
    for value in weights.values_mut() {
        *value /= total;
    }

    Ok(Some(weights))
}

/// One full learning cycle: validate, then re-aggregate.
pub fn run_learning_cycle(db: &Database, today: NaiveDate) -> Result<()> {
    validate_pending(db, today)?;
    update_strategy_performance(db, today)?;
    Ok(())
}

/// Snapshot for the `learn` CLI verb.
#[derive(Debug)]
pub struct LearningReport {
    pub total_signals: i64,
    pub validated_signals: i64,
    pub performance: Vec<PerformanceRow>,
    pub learned: BTreeMap<String, BTreeMap<String, f64>>,
}

pub fn learning_report(db: &Database, known_strategies: &[&str]) -> Result<LearningReport> {
    let (total_signals, validated_signals) = db.validation_counts()?;
    let performance = db.all_performance_rows()?;
    let mut learned = BTreeMap::new();
    for regime in crate::models::Regime::ALL {
        if let Some(weights) = learned_weights(db, regime.as_str(), known_strategies)? {
            learned.insert(regime.as_str().to_string(), weights);
        }
    }
    Ok(LearningReport {
        total_signals,
        validated_signals,
        performance,
        learned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FundNav, Regime, SignalType};
    use crate::store::testutil::temp_db;
    use crate::store::validation::SignalRecord;

    fn nav(date: &str, value: f64) -> FundNav {
        FundNav {
            nav_date: date.to_string(),
            nav: value,
            acc_nav: None,
            daily_return: None,
        }
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn direction_hurdles() {
        assert!(direction_correct("buy", 2.0, Horizon::Days7));
        assert!(!direction_correct("buy", 1.0, Horizon::Days7)); // below 1.65 hurdle
        assert!(direction_correct("buy", 0.5, Horizon::Days30));
        assert!(direction_correct("sell", -0.1, Horizon::Days30));
        assert!(!direction_correct("sell", 0.0, Horizon::Days30)); // flat is wrong
        assert!(!direction_correct("hold", 3.0, Horizon::Days30));
    }

    #[test]
    fn validation_uses_first_nav_on_or_after_target() {
        let (_dir, db) = temp_db();
        db.record_signal(&SignalRecord {
            signal_date: "2026-06-01",
            fund_code: "110011",
            strategy_name: "composite",
            signal_type: SignalType::Buy,
            confidence: 0.7,
            regime: Regime::Ranging,
            nav_at_signal: 1.0,
        })
        .unwrap();
        // Target 2026-06-08; the 06-07 row must be skipped, 06-09 row used.
        db.upsert_fund_nav("110011", &[nav("2026-06-07", 1.01), nav("2026-06-09", 1.05)])
            .unwrap();

        let n = validate_pending(&db, day("2026-06-20")).unwrap();
        assert_eq!(n, 1);

        let guard = db.guard_records("110011", "2026-01-01", 10).unwrap();
        assert_eq!(guard.len(), 1);
        // 5% beats the 1.65% hurdle; 30d horizon still pending (no row >= 07-01).
        assert!(guard[0].is_correct_30d.is_none());
    }

    #[test]
    fn aggregation_and_learned_weights() {
        let (_dir, db) = temp_db();
        let today = day("2026-07-01");

        // Two strategies, ranging regime: momentum 4/5 correct,
        // mean_reversion 1/5 correct.
        for (strategy, correct_count) in [("momentum", 4), ("mean_reversion", 1)] {
            for i in 0..5 {
                let date = format!("2026-05-0{}", i + 1);
                db.record_signal(&SignalRecord {
                    signal_date: &date,
                    fund_code: if strategy == "momentum" { "110011" } else { "161725" },
                    strategy_name: strategy,
                    signal_type: SignalType::Buy,
                    confidence: if i % 2 == 0 { 0.7 } else { 0.4 },
                    regime: Regime::Ranging,
                    nav_at_signal: 1.0,
                })
                .unwrap();
            }
            let pending = db.pending_validations(Horizon::Days30, "2026-12-31").unwrap();
            for (i, p) in pending.iter().enumerate() {
                let correct = i < correct_count;
                db.apply_validation(
                    p.id,
                    Horizon::Days30,
                    if correct { 1.05 } else { 0.95 },
                    if correct { 5.0 } else { -5.0 },
                    correct,
                    "2026-06-30",
                )
                .unwrap();
            }
        }

        update_strategy_performance(&db, today).unwrap();
        let rows = db.all_performance_rows().unwrap();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert!(row.recommended_weight >= 0.1 && row.recommended_weight <= 1.0);
        }

        let known = [
            "trend_following",
            "mean_reversion",
            "momentum",
            "valuation",
            "macro_cycle",
            "manager_alpha",
        ];
        let weights = learned_weights(&db, "ranging", &known).unwrap().unwrap();
        // Every known strategy is present and the vector is normalized.
        assert_eq!(weights.len(), known.len());
        let sum: f64 = weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-6, "sum = {sum}");
        assert!(weights["momentum"] > weights["mean_reversion"]);

        // A regime with no data yields no learned weights.
        assert!(learned_weights(&db, "bull_strong", &known).unwrap().is_none());
    }
}
