//! Signal validation log and strategy performance table.

use anyhow::Result;
use rusqlite::params;

use crate::models::{Regime, SignalType};

use super::Database;

/// Validation horizon in calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Horizon {
    Days7,
    Days30,
}

impl Horizon {
    pub fn days(&self) -> i64 {
        match self {
            Horizon::Days7 => 7,
            Horizon::Days30 => 30,
        }
    }

    /// Minimum return a BUY-family signal must clear to count as correct.
    pub fn buy_hurdle_pct(&self) -> f64 {
        match self {
            Horizon::Days7 => 1.65,
            Horizon::Days30 => 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignalRecord<'a> {
    pub signal_date: &'a str,
    pub fund_code: &'a str,
    pub strategy_name: &'a str,
    pub signal_type: SignalType,
    pub confidence: f64,
    pub regime: Regime,
    pub nav_at_signal: f64,
}

#[derive(Debug, Clone)]
pub struct PendingValidation {
    pub id: i64,
    pub fund_code: String,
    pub signal_type: String,
    pub nav_at_signal: Option<f64>,
    pub signal_date: String,
}

/// Recent validation outcome used by the signal guard.
#[derive(Debug, Clone)]
pub struct GuardRecord {
    pub signal_type: String,
    pub is_correct_30d: Option<bool>,
    pub confidence: f64,
}

/// Raw aggregation row over the last-90-day window.
#[derive(Debug, Clone)]
pub struct StrategyRegimeStats {
    pub strategy_name: String,
    pub regime: String,
    pub total: i64,
    pub correct: i64,
    pub avg_return: f64,
    pub avg_confidence: f64,
}

#[derive(Debug, Clone)]
pub struct PerformanceRow {
    pub strategy_name: String,
    pub regime: String,
    pub total_signals: i64,
    pub win_rate: f64,
    pub avg_return: f64,
    pub recommended_weight: f64,
    pub confidence_accuracy: f64,
}

impl Database {
    /// Register a signal for later validation. Returns false if the
    /// (signal_date, fund_code, strategy_name) triple was already present —
    /// re-running a day is idempotent.
    pub fn record_signal(&self, rec: &SignalRecord<'_>) -> Result<bool> {
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO signal_validation \
             (signal_date, fund_code, strategy_name, signal_type, confidence, regime, nav_at_signal) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                rec.signal_date,
                rec.fund_code,
                rec.strategy_name,
                rec.signal_type.as_str(),
                rec.confidence,
                rec.regime.as_str(),
                rec.nav_at_signal
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Rows whose horizon has elapsed and whose outcome is still null.
    pub fn pending_validations(&self, horizon: Horizon, cutoff_date: &str) -> Result<Vec<PendingValidation>> {
        let sql = match horizon {
            Horizon::Days7 => {
                "SELECT id, fund_code, signal_type, nav_at_signal, signal_date \
                 FROM signal_validation WHERE nav_after_7d IS NULL AND signal_date <= ?1"
            }
            Horizon::Days30 => {
                "SELECT id, fund_code, signal_type, nav_at_signal, signal_date \
                 FROM signal_validation WHERE nav_after_30d IS NULL AND signal_date <= ?1"
            }
        };
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map([cutoff_date], |row| {
                Ok(PendingValidation {
                    id: row.get(0)?,
                    fund_code: row.get(1)?,
                    signal_type: row.get(2)?,
                    nav_at_signal: row.get(3)?,
                    signal_date: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Fill one horizon of a validation row. Outcomes only move null -> value.
    pub fn apply_validation(
        &self,
        id: i64,
        horizon: Horizon,
        nav_after: f64,
        return_pct: f64,
        is_correct: bool,
        validated_at: &str,
    ) -> Result<()> {
        let sql = match horizon {
            Horizon::Days7 => {
                "UPDATE signal_validation \
                 SET nav_after_7d = ?1, return_7d = ?2, is_correct_7d = ?3, validated_at = ?4 \
                 WHERE id = ?5 AND nav_after_7d IS NULL"
            }
            Horizon::Days30 => {
                "UPDATE signal_validation \
                 SET nav_after_30d = ?1, return_30d = ?2, is_correct_30d = ?3, validated_at = ?4 \
                 WHERE id = ?5 AND nav_after_30d IS NULL"
            }
        };
        let conn = self.conn();
        conn.execute(sql, params![nav_after, return_pct, is_correct as i64, validated_at, id])?;
        Ok(())
    }

    /// Last `limit` composite validation records for a fund since `cutoff`,
    /// newest first (signal-guard window).
    pub fn guard_records(&self, fund_code: &str, cutoff: &str, limit: i64) -> Result<Vec<GuardRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT signal_type, is_correct_30d, confidence FROM signal_validation \
             WHERE fund_code = ?1 AND strategy_name = 'composite' AND signal_date >= ?2 \
             ORDER BY signal_date DESC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![fund_code, cutoff, limit], |row| {
                let correct: Option<i64> = row.get(1)?;
                let confidence: Option<f64> = row.get(2)?;
                Ok(GuardRecord {
                    signal_type: row.get(0)?,
                    is_correct_30d: correct.map(|v| v != 0),
                    confidence: confidence.unwrap_or(0.0),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Per (strategy, regime) aggregates over validated 30-day rows since
    /// `cutoff`.
    pub fn validated_stats(&self, cutoff: &str) -> Result<Vec<StrategyRegimeStats>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT strategy_name, regime, COUNT(*), \
                    SUM(CASE WHEN is_correct_30d = 1 THEN 1 ELSE 0 END), \
                    AVG(return_30d), AVG(confidence) \
             FROM signal_validation \
             WHERE signal_date >= ?1 AND is_correct_30d IS NOT NULL \
             GROUP BY strategy_name, regime \
             ORDER BY strategy_name, regime",
        )?;
        let rows = stmt
            .query_map([cutoff], |row| {
                let avg_return: Option<f64> = row.get(4)?;
                let avg_confidence: Option<f64> = row.get(5)?;
                Ok(StrategyRegimeStats {
                    strategy_name: row.get(0)?,
                    regime: row.get(1)?,
                    total: row.get(2)?,
                    correct: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                    avg_return: avg_return.unwrap_or(0.0),
                    avg_confidence: avg_confidence.unwrap_or(0.0),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Win rate of a strategy/regime bucket restricted to one confidence band.
    pub fn win_rate_in_confidence_band(
        &self,
        strategy_name: &str,
        regime: &str,
        cutoff: &str,
        high_band: bool,
    ) -> Result<Option<f64>> {
        let sql = if high_band {
            "SELECT AVG(CASE WHEN is_correct_30d = 1 THEN 1.0 ELSE 0.0 END) \
             FROM signal_validation \
             WHERE strategy_name = ?1 AND regime = ?2 AND confidence >= 0.6 \
               AND signal_date >= ?3 AND is_correct_30d IS NOT NULL"
        } else {
            "SELECT AVG(CASE WHEN is_correct_30d = 1 THEN 1.0 ELSE 0.0 END) \
             FROM signal_validation \
             WHERE strategy_name = ?1 AND regime = ?2 AND confidence < 0.6 \
               AND signal_date >= ?3 AND is_correct_30d IS NOT NULL"
        };
        let conn = self.conn();
        let rate: Option<f64> = conn.query_row(sql, params![strategy_name, regime, cutoff], |row| row.get(0))?;
        Ok(rate)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn upsert_strategy_performance(
        &self,
        period_start: &str,
        period_end: &str,
        strategy_name: &str,
        regime: &str,
        total_signals: i64,
        correct_signals: i64,
        win_rate: f64,
        avg_return: f64,
        avg_confidence: f64,
        confidence_accuracy: f64,
        recommended_weight: f64,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO strategy_performance \
             (period_start, period_end, strategy_name, regime, total_signals, correct_signals, \
              win_rate, avg_return, avg_confidence, confidence_accuracy, recommended_weight, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, CURRENT_TIMESTAMP) \
             ON CONFLICT(period_end, strategy_name, regime) DO UPDATE SET \
              period_start = excluded.period_start, \
              total_signals = excluded.total_signals, \
              correct_signals = excluded.correct_signals, \
              win_rate = excluded.win_rate, \
              avg_return = excluded.avg_return, \
              avg_confidence = excluded.avg_confidence, \
              confidence_accuracy = excluded.confidence_accuracy, \
              recommended_weight = excluded.recommended_weight, \
              updated_at = CURRENT_TIMESTAMP",
            params![
                period_start,
                period_end,
                strategy_name,
                regime,
                total_signals,
                correct_signals,
                win_rate,
                avg_return,
                avg_confidence,
                confidence_accuracy,
                recommended_weight
            ],
        )?;
        Ok(())
    }

    /// Latest performance rows for a regime with at least `min_signals`
    /// validated signals, newest first.
    pub fn performance_rows_for_regime(&self, regime: &str, min_signals: i64) -> Result<Vec<PerformanceRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT strategy_name, regime, total_signals, win_rate, avg_return, \
                    recommended_weight, confidence_accuracy \
             FROM strategy_performance \
             WHERE regime = ?1 AND total_signals >= ?2 \
             ORDER BY updated_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map(params![regime, min_signals], Self::row_to_performance)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn all_performance_rows(&self) -> Result<Vec<PerformanceRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT strategy_name, regime, total_signals, win_rate, avg_return, \
                    recommended_weight, confidence_accuracy \
             FROM strategy_performance ORDER BY strategy_name, regime",
        )?;
        let rows = stmt
            .query_map([], Self::row_to_performance)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn row_to_performance(row: &rusqlite::Row<'_>) -> rusqlite::Result<PerformanceRow> {
        Ok(PerformanceRow {
            strategy_name: row.get(0)?,
            regime: row.get(1)?,
            total_signals: row.get(2)?,
            win_rate: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
            avg_return: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
            recommended_weight: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
            confidence_accuracy: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
        })
    }

    /// (total rows, rows with a 30-day verdict).
    pub fn validation_counts(&self) -> Result<(i64, i64)> {
        let conn = self.conn();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM signal_validation", [], |row| row.get(0))?;
        let validated: i64 = conn.query_row(
            "SELECT COUNT(*) FROM signal_validation WHERE is_correct_30d IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok((total, validated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testutil::temp_db;

    fn record<'a>(date: &'a str, fund: &'a str, strategy: &'a str) -> SignalRecord<'a> {
        SignalRecord {
            signal_date: date,
            fund_code: fund,
            strategy_name: strategy,
            signal_type: SignalType::Buy,
            confidence: 0.7,
            regime: Regime::Ranging,
            nav_at_signal: 1.0,
        }
    }

    #[test]
    fn duplicate_registration_creates_one_row() {
        let (_dir, db) = temp_db();
        assert!(db.record_signal(&record("2026-06-01", "110011", "composite")).unwrap());
        assert!(!db.record_signal(&record("2026-06-01", "110011", "composite")).unwrap());
        let (total, _) = db.validation_counts().unwrap();
        assert_eq!(total, 1);
    }

    #[test]
    fn validation_only_fills_null_horizons() {
        let (_dir, db) = temp_db();
        db.record_signal(&record("2026-06-01", "110011", "composite")).unwrap();
        let pending = db.pending_validations(Horizon::Days7, "2026-06-10").unwrap();
        assert_eq!(pending.len(), 1);
        let id = pending[0].id;

        db.apply_validation(id, Horizon::Days7, 1.05, 5.0, true, "2026-06-10").unwrap();
        // Second pass must not flip an existing verdict.
        db.apply_validation(id, Horizon::Days7, 0.90, -10.0, false, "2026-06-11").unwrap();

        let pending = db.pending_validations(Horizon::Days7, "2026-06-30").unwrap();
        assert!(pending.is_empty());
        let guard = db.guard_records("110011", "2026-01-01", 10).unwrap();
        assert_eq!(guard.len(), 1);
        // 30d verdict still null.
        assert!(guard[0].is_correct_30d.is_none());
    }

    #[test]
    fn performance_upsert_is_keyed_by_period_strategy_regime() {
        let (_dir, db) = temp_db();
        db.upsert_strategy_performance(
            "2026-03-01", "2026-06-01", "momentum", "ranging", 10, 6, 0.6, 1.2, 0.55, 0.1, 0.9,
        )
        .unwrap();
        db.upsert_strategy_performance(
            "2026-03-02", "2026-06-01", "momentum", "ranging", 12, 7, 0.58, 1.0, 0.56, 0.2, 0.87,
        )
        .unwrap();
        let rows = db.all_performance_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_signals, 12);
    }
}
