//! Portfolio drawdown monitoring and the progressive response ladder.
//!
//! Drawdown response is graded, not binary: warn first, trim in steps,
//! liquidate only past the hard threshold.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::store::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct DrawdownState {
    /// Current drawdown from the running peak (<= 0).
    pub current_drawdown: f64,
    /// Deepest historical drawdown (<= 0).
    pub max_drawdown: f64,
    pub peak_value: f64,
    pub current_value: f64,
    pub alert_level: AlertLevel,
}

/// Read the snapshot history and compute drawdown state.
pub fn portfolio_drawdown(db: &Database, config: &Config) -> Result<DrawdownState> {
    let values = db.snapshot_values(250)?;
    if values.is_empty() {
        return Ok(DrawdownState {
            current_drawdown: 0.0,
            max_drawdown: 0.0,
            peak_value: config.initial_capital,
            current_value: config.initial_capital,
            alert_level: AlertLevel::Normal,
        });
    }

    let current_value = *values.last().unwrap();
    let peak_value = values.iter().copied().fold(f64::MIN, f64::max);
    let current_dd = if peak_value > 0.0 {
        (current_value - peak_value) / peak_value
    } else {
        0.0
    };

    let mut running_max = 0.0f64;
    let mut max_dd = 0.0f64;
    for v in &values {
        running_max = running_max.max(*v);
        if running_max > 0.0 {
            max_dd = max_dd.min((v - running_max) / running_max);
        }
    }

    let alert_level = if current_dd.abs() >= config.max_drawdown_hard {
        AlertLevel::Critical
    } else if current_dd.abs() >= config.max_drawdown_soft {
        AlertLevel::Warning
    } else {
        AlertLevel::Normal
    };

    Ok(DrawdownState {
        current_drawdown: (current_dd * 10_000.0).round() / 10_000.0,
        max_drawdown: (max_dd * 10_000.0).round() / 10_000.0,
        peak_value: (peak_value * 100.0).round() / 100.0,
        current_value: (current_value * 100.0).round() / 100.0,
        alert_level,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseLevel {
    Normal,
    Caution,
    Warning,
    Danger,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct DrawdownResponse {
    pub level: ResponseLevel,
    /// Share of equity exposure to trim, in percent (100 = liquidate).
    pub reduce_pct: u8,
    /// New buys are blocked from Caution upward.
    pub block_new_buys: bool,
    pub narrative: String,
}

/// Graded response to the current portfolio drawdown (pass the absolute or
/// signed fraction; only magnitude matters).
pub fn progressive_response(current_drawdown: f64) -> DrawdownResponse {
    let dd = current_drawdown.abs();

    if dd < 0.03 {
        DrawdownResponse {
            level: ResponseLevel::Normal,
            reduce_pct: 0,
            block_new_buys: false,
            narrative: format!("drawdown {:.1}%, portfolio healthy", dd * 100.0),
        }
    } else if dd < 0.05 {
        DrawdownResponse {
            level: ResponseLevel::Caution,
            reduce_pct: 0,
            block_new_buys: true,
            narrative: format!("drawdown {:.1}%, alert zone, pausing new buys", dd * 100.0),
        }
    } else if dd < 0.08 {
        DrawdownResponse {
            level: ResponseLevel::Warning,
            reduce_pct: 20,
            block_new_buys: true,
            narrative: format!("drawdown {:.1}%, first-stage trim of 20%", dd * 100.0),
        }
    } else if dd < 0.10 {
        DrawdownResponse {
            level: ResponseLevel::Danger,
            reduce_pct: 50,
            block_new_buys: true,
            narrative: format!("drawdown {:.1}%, second-stage trim to half", dd * 100.0),
        }
    } else {
        DrawdownResponse {
            level: ResponseLevel::Critical,
            reduce_pct: 100,
            block_new_buys: true,
            narrative: format!("drawdown {:.1}%, hard stop hit, liquidating to protect capital", dd * 100.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccountSnapshot;
    use crate::store::testutil::temp_db;

    #[test]
    fn ladder_thresholds() {
        assert_eq!(progressive_response(0.01).level, ResponseLevel::Normal);
        assert_eq!(progressive_response(-0.04).level, ResponseLevel::Caution);
        assert!(progressive_response(-0.04).block_new_buys);
        assert_eq!(progressive_response(0.06).reduce_pct, 20);
        assert_eq!(progressive_response(0.09).reduce_pct, 50);
        assert_eq!(progressive_response(0.12).reduce_pct, 100);
    }

    #[test]
    fn drawdown_from_snapshots() {
        let (_dir, db) = temp_db();
        let cfg = Config::default();
        for (date, value) in [
            ("2026-06-01", 10_000.0),
            ("2026-06-02", 10_500.0),
            ("2026-06-03", 9_870.0), // -6% from the 10500 peak
        ] {
            db.upsert_snapshot(&AccountSnapshot {
                snapshot_date: date.to_string(),
                total_value: value,
                cash: value,
                invested: 0.0,
                total_pnl: 0.0,
                total_return_pct: 0.0,
                max_drawdown_pct: 0.0,
                holdings_json: "[]".to_string(),
            })
            .unwrap();
        }
        let state = portfolio_drawdown(&db, &cfg).unwrap();
        assert!((state.current_drawdown - (-0.06)).abs() < 1e-9);
        assert_eq!(state.alert_level, AlertLevel::Warning);
        assert_eq!(state.peak_value, 10_500.0);
    }

    #[test]
    fn empty_history_is_normal() {
        let (_dir, db) = temp_db();
        let state = portfolio_drawdown(&db, &Config::default()).unwrap();
        assert_eq!(state.alert_level, AlertLevel::Normal);
        assert_eq!(state.current_drawdown, 0.0);
    }
}
