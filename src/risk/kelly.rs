//! Kelly Criterion position sizing.
//!
//! Formula: f* = (bp - q) / b with b = avg_win / avg_loss, p = win rate.
//! Fractional Kelly (half Kelly by default) tames the variance.
//!
//! Exposed as a utility: the advisory sizing path uses the regime/confidence
//! formula in `risk::sizing`; this helper serves ad-hoc analysis and keeps
//! the `kelly_fraction` config key meaningful.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KellyParams {
    /// Fractional Kelly multiplier (0.5 = half Kelly).
    pub fraction: f64,
    /// Cap on the resulting position fraction.
    pub max_position_pct: f64,
}

impl Default for KellyParams {
    fn default() -> Self {
        Self {
            fraction: 0.5,
            max_position_pct: 0.30,
        }
    }
}

impl KellyParams {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            fraction: config.kelly_fraction.clamp(0.1, 1.0),
            max_position_pct: config.max_single_position_pct,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KellyResult {
    /// Recommended fraction of capital, after fractional scaling and caps.
    pub position_fraction: f64,
    /// Raw Kelly fraction before scaling.
    pub full_kelly_fraction: f64,
    pub should_trade: bool,
    pub skip_reason: Option<String>,
}

/// Kelly fraction from historical win rate and average win/loss magnitudes.
pub fn kelly_fraction(win_rate: f64, avg_win: f64, avg_loss: f64, params: &KellyParams) -> KellyResult {
    if !(0.0..=1.0).contains(&win_rate) || avg_win <= 0.0 || avg_loss <= 0.0 {
        return KellyResult {
            position_fraction: 0.0,
            full_kelly_fraction: 0.0,
            should_trade: false,
            skip_reason: Some("invalid win rate or payoff inputs".to_string()),
        };
    }

    let b = avg_win / avg_loss;
    let p = win_rate;
    let q = 1.0 - p;
    let full_kelly = ((b * p - q) / b).clamp(0.0, 1.0);

    if full_kelly == 0.0 {
        return KellyResult {
            position_fraction: 0.0,
            full_kelly_fraction: 0.0,
            should_trade: false,
            skip_reason: Some(format!(
                "no edge: win rate {:.0}% at payoff ratio {:.2}",
                p * 100.0,
                b
            )),
        };
    }

    let position_fraction = (full_kelly * params.fraction).min(params.max_position_pct);

    KellyResult {
        position_fraction,
        full_kelly_fraction: full_kelly,
        should_trade: position_fraction > 0.0,
        skip_reason: None,
    }
}
