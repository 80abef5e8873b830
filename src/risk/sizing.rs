//! Position sizing for advisory buys.
//!
//! Regime multiplier x signal confidence, decayed by position count, scaled
//! by valuation and correlation multipliers, capped by the single-position
//! limit and the asset-allocation equity headroom. Sub-100 RMB amounts are
//! rounded away (platform trade minimum).

use crate::config::Config;
use crate::models::Regime;

/// Everything the sizing formula needs, resolved by the caller.
#[derive(Debug, Clone)]
pub struct SizingInput {
    pub total_capital: f64,
    pub current_cash: f64,
    pub confidence: f64,
    pub regime: Regime,
    pub existing_positions: usize,
    /// Multiplier from broad-market valuation (1.0 when unknown).
    pub valuation_multiplier: f64,
    /// Multiplier from holding correlation (1.0 when unknown).
    pub correlation_penalty: f64,
    /// Remaining headroom under the equity allocation ceiling, if computed.
    pub max_equity_amount: Option<f64>,
}

fn regime_multiplier(regime: Regime) -> f64 {
    match regime {
        Regime::BullStrong => 0.90,
        Regime::BullWeak => 0.70,
        Regime::Ranging => 0.50,
        Regime::BearWeak => 0.35,
        Regime::BearStrong => 0.20,
    }
}

/// Recommended buy amount in RMB; 0 means stand aside.
pub fn position_size(config: &Config, input: &SizingInput) -> f64 {
    let min_cash = input.total_capital * config.min_cash_reserve_pct;
    let available = (input.current_cash - min_cash).max(0.0);
    if available <= 0.0 {
        return 0.0;
    }

    let mut position_pct = regime_multiplier(input.regime) * input.confidence.clamp(0.0, 1.0);

    // More open positions, smaller increments.
    if input.existing_positions >= 3 {
        position_pct *= 0.5;
    } else if input.existing_positions >= 2 {
        position_pct *= 0.7;
    }

    position_pct *= input.valuation_multiplier;
    position_pct *= input.correlation_penalty;

    let mut max_single = input.total_capital * config.max_single_position_pct;
    if let Some(max_equity) = input.max_equity_amount {
        max_single = max_single.min(max_equity);
    }

    let amount = (available * position_pct).min(max_single);
    if amount < 100.0 {
        return 0.0;
    }
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(confidence: f64, regime: Regime) -> SizingInput {
        SizingInput {
            total_capital: 10_000.0,
            current_cash: 10_000.0,
            confidence,
            regime,
            existing_positions: 0,
            valuation_multiplier: 1.0,
            correlation_penalty: 1.0,
            max_equity_amount: None,
        }
    }

    #[test]
    fn baseline_ranging_size() {
        let cfg = Config::default();
        // available = 9000; pct = 0.5 * 0.6 = 0.3 -> 2700, under the 3000 cap
        assert_eq!(position_size(&cfg, &input(0.6, Regime::Ranging)), 2_700.0);
    }

    /// Spec scenario: ranging market, confidence 0.6, heavy correlation with
    /// the only holding (rho = 0.9 -> x0.3) gives 810 RMB.
    #[test]
    fn correlated_candidate_is_cut_to_810() {
        let cfg = Config::default();
        let mut i = input(0.6, Regime::Ranging);
        i.correlation_penalty = 0.3;
        assert_eq!(position_size(&cfg, &i), 810.0);
    }

    #[test]
    fn single_position_cap_binds() {
        let cfg = Config::default();
        // bull_strong 0.9 * 0.95 = 0.855 of 9000 = 7695, capped at 3000
        assert_eq!(position_size(&cfg, &input(0.95, Regime::BullStrong)), 3_000.0);
    }

    #[test]
    fn equity_headroom_caps_below_single_limit() {
        let cfg = Config::default();
        let mut i = input(0.95, Regime::BullStrong);
        i.max_equity_amount = Some(1_200.0);
        assert_eq!(position_size(&cfg, &i), 1_200.0);
    }

    #[test]
    fn position_count_decay() {
        let cfg = Config::default();
        let mut i = input(0.6, Regime::Ranging);
        i.existing_positions = 2;
        assert_eq!(position_size(&cfg, &i), 2_700.0 * 0.7);
        i.existing_positions = 3;
        assert_eq!(position_size(&cfg, &i), 2_700.0 * 0.5);
    }

    #[test]
    fn no_free_cash_no_trade() {
        let cfg = Config::default();
        let mut i = input(0.9, Regime::BullStrong);
        i.current_cash = 900.0; // all reserved
        assert_eq!(position_size(&cfg, &i), 0.0);
    }

    #[test]
    fn dust_amounts_round_to_zero() {
        let cfg = Config::default();
        let mut i = input(0.05, Regime::BearStrong);
        i.valuation_multiplier = 0.3;
        assert_eq!(position_size(&cfg, &i), 0.0);
    }

    #[test]
    fn buys_never_exceed_available_cash_pool() {
        let cfg = Config::default();
        for conf in [0.2, 0.5, 0.8, 1.0] {
            for regime in Regime::ALL {
                let amount = position_size(&cfg, &input(conf, regime));
                assert!(amount <= 10_000.0 * (1.0 - cfg.min_cash_reserve_pct));
                assert!(amount <= 10_000.0 * cfg.max_single_position_pct);
            }
        }
    }
}
