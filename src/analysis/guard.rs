//! Signal guard: suppress or degrade signals for funds whose recent history
//! shows a known anti-pattern.
//!
//! Three patterns over the last 10 composite validations in 90 days, checked
//! in order (first hit wins):
//! 1. >= 3 consecutive wrong calls in the same direction (>= 5 suppresses)
//! 2. ping-pong: >= 70% of adjacent pairs alternate direction and >= 60% wrong
//! 3. inflated confidence: >= 3 high-confidence calls with < 40% win rate

use chrono::{Duration, NaiveDate};
use tracing::{debug, warn};

use crate::models::Signal;
use crate::store::{validation::GuardRecord, Database};

const LOOKBACK_DAYS: i64 = 90;
const WINDOW: i64 = 10;
const HIGH_CONFIDENCE: f64 = 0.6;

#[derive(Debug, Clone, PartialEq)]
pub struct SignalHealth {
    pub fund_code: String,
    /// Multiplied into signal confidence; 1.0 = healthy.
    pub penalty_factor: f64,
    pub suppressed: bool,
    pub reason: String,
}

impl SignalHealth {
    fn healthy(fund_code: &str) -> Self {
        Self {
            fund_code: fund_code.to_string(),
            penalty_factor: 1.0,
            suppressed: false,
            reason: String::new(),
        }
    }
}

fn direction(signal_type: &str) -> &'static str {
    if matches!(signal_type, "strong_buy" | "buy") {
        "buy"
    } else {
        "sell"
    }
}

/// Evaluate the anti-patterns over a pre-fetched record window (newest first).
pub fn evaluate_records(fund_code: &str, records: &[GuardRecord]) -> SignalHealth {
    if records.len() < 3 {
        return SignalHealth::healthy(fund_code);
    }

    // Pattern 1: consecutive wrong calls in one direction, newest backwards.
    let mut consecutive_wrong = 0;
    let mut last_direction: Option<&str> = None;
    for r in records {
        let dir = direction(&r.signal_type);
        if r.is_correct_30d == Some(false) && last_direction.map_or(true, |d| d == dir) {
            consecutive_wrong += 1;
            last_direction = Some(dir);
        } else {
            break;
        }
    }
    if consecutive_wrong >= 3 {
        return SignalHealth {
            fund_code: fund_code.to_string(),
            penalty_factor: 0.3,
            suppressed: consecutive_wrong >= 5,
            reason: format!("{consecutive_wrong} consecutive wrong calls in one direction"),
        };
    }

    // Pattern 2: ping-pong.
    let validated: Vec<&GuardRecord> = records.iter().filter(|r| r.is_correct_30d.is_some()).collect();
    if validated.len() >= 4 {
        let directions: Vec<&str> = validated.iter().map(|r| direction(&r.signal_type)).collect();
        let alternating = directions.windows(2).filter(|w| w[0] != w[1]).count();
        let wrong = validated.iter().filter(|r| r.is_correct_30d == Some(false)).count();
        if alternating as f64 >= directions.len() as f64 * 0.7
            && wrong as f64 >= validated.len() as f64 * 0.6
        {
            return SignalHealth {
                fund_code: fund_code.to_string(),
                penalty_factor: 0.5,
                suppressed: false,
                reason: format!(
                    "ping-pong pattern ({alternating}/{} alternations, {wrong}/{} wrong)",
                    directions.len(),
                    validated.len()
                ),
            };
        }
    }

    // Pattern 3: inflated confidence.
    let high_conf: Vec<&&GuardRecord> = validated
        .iter()
        .filter(|r| r.confidence >= HIGH_CONFIDENCE)
        .collect();
    if high_conf.len() >= 3 {
        let correct = high_conf.iter().filter(|r| r.is_correct_30d == Some(true)).count();
        let win_rate = correct as f64 / high_conf.len() as f64;
        if win_rate < 0.4 {
            return SignalHealth {
                fund_code: fund_code.to_string(),
                penalty_factor: 0.6,
                suppressed: false,
                reason: format!(
                    "high-confidence win rate only {:.0}% ({correct}/{})",
                    win_rate * 100.0,
                    high_conf.len()
                ),
            };
        }
    }

    SignalHealth::healthy(fund_code)
}

/// Fetch the guard window from the store and evaluate.
pub fn check_signal_health(db: &Database, fund_code: &str, today: NaiveDate) -> SignalHealth {
    let cutoff = (today - Duration::days(LOOKBACK_DAYS)).format("%Y-%m-%d").to_string();
    match db.guard_records(fund_code, &cutoff, WINDOW) {
        Ok(records) => evaluate_records(fund_code, &records),
        Err(e) => {
            debug!("signal guard lookup failed for {}: {}", fund_code, e);
            SignalHealth::healthy(fund_code)
        }
    }
}

/// Apply the guard to a batch of composite signals: degrade or remove.
pub fn apply_signal_guard(db: &Database, signals: Vec<Signal>, today: NaiveDate) -> Vec<Signal> {
    if signals.is_empty() {
        return signals;
    }

    let mut guarded = Vec::with_capacity(signals.len());
    for mut sig in signals {
        let health = check_signal_health(db, &sig.fund_code, today);

        if health.suppressed {
            warn!(fund = %sig.fund_code, reason = %health.reason, "signal suppressed");
            continue;
        }

        if health.penalty_factor < 1.0 {
            let original = sig.confidence;
            sig.confidence = (sig.confidence * health.penalty_factor * 100.0).round() / 100.0;
            sig.reason.push_str(&format!(
                "\n[signal_guard] confidence degraded {original:.2} -> {:.2} ({})",
                sig.confidence, health.reason
            ));
            debug!(
                fund = %sig.fund_code,
                factor = health.penalty_factor,
                reason = %health.reason,
                "signal degraded"
            );
        }

        guarded.push(sig);
    }

    guarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Regime, SignalType};
    use crate::store::testutil::temp_db;
    use crate::store::validation::SignalRecord;

    fn rec(signal_type: &str, correct: Option<bool>, confidence: f64) -> GuardRecord {
        GuardRecord {
            signal_type: signal_type.to_string(),
            is_correct_30d: correct,
            confidence,
        }
    }

    #[test]
    fn three_consecutive_wrong_same_direction_penalizes() {
        let records = vec![
            rec("buy", Some(false), 0.5),
            rec("buy", Some(false), 0.5),
            rec("strong_buy", Some(false), 0.5),
        ];
        let health = evaluate_records("110011", &records);
        assert_eq!(health.penalty_factor, 0.3);
        assert!(!health.suppressed);
    }

    #[test]
    fn five_consecutive_wrong_suppresses() {
        let records = vec![rec("buy", Some(false), 0.5); 5];
        let health = evaluate_records("110011", &records);
        assert!(health.suppressed);
    }

    #[test]
    fn unvalidated_row_breaks_the_streak() {
        let records = vec![
            rec("buy", None, 0.5),
            rec("buy", Some(false), 0.5),
            rec("buy", Some(false), 0.5),
            rec("buy", Some(false), 0.5),
        ];
        let health = evaluate_records("110011", &records);
        assert_eq!(health.penalty_factor, 1.0);
    }

    #[test]
    fn ping_pong_pattern_detected() {
        let records = vec![
            rec("buy", Some(false), 0.5),
            rec("sell", Some(false), 0.5),
            rec("buy", Some(false), 0.5),
            rec("sell", Some(true), 0.5),
        ];
        let health = evaluate_records("110011", &records);
        assert_eq!(health.penalty_factor, 0.5);
    }

    #[test]
    fn inflated_confidence_detected() {
        // Mixed directions so patterns 1 and 2 do not fire first.
        let records = vec![
            rec("buy", Some(true), 0.7),
            rec("buy", Some(false), 0.8),
            rec("buy", Some(false), 0.3),
            rec("sell", Some(false), 0.9),
            rec("buy", Some(true), 0.2),
            rec("buy", Some(false), 0.75),
        ];
        let health = evaluate_records("110011", &records);
        assert_eq!(health.penalty_factor, 0.6);
    }

    /// Five consecutive wrong BUY validations must remove a fresh BUY signal.
    #[test]
    fn streak_suppression_removes_signal_end_to_end() {
        let (_dir, db) = temp_db();
        for day in 1..=5 {
            let date = format!("2026-05-0{day}");
            db.record_signal(&SignalRecord {
                signal_date: &date,
                fund_code: "320007",
                strategy_name: "composite",
                signal_type: SignalType::Buy,
                confidence: 0.7,
                regime: Regime::Ranging,
                nav_at_signal: 1.0,
            })
            .unwrap();
        }
        // Mark all five wrong at the 30-day horizon.
        let pending = db
            .pending_validations(crate::store::validation::Horizon::Days30, "2026-12-31")
            .unwrap();
        for p in pending {
            db.apply_validation(
                p.id,
                crate::store::validation::Horizon::Days30,
                0.9,
                -10.0,
                false,
                "2026-06-30",
            )
            .unwrap();
        }

        let today = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let fresh = vec![Signal::new("320007", SignalType::Buy, 0.7, "ma stack", "composite")];
        let out = apply_signal_guard(&db, fresh, today);
        assert!(out.is_empty());
    }
}
