//! Asset-allocation guardrails.
//!
//! Hard floors/caps that survive any advisory: cash >= 20%, bonds >= 10%,
//! equity <= 70%. Regime sets the baseline mix, broad-market valuation
//! percentile shifts it, hard limits clamp last, then the mix renormalizes
//! to exactly 1.

use anyhow::Result;

use crate::models::Regime;
use crate::store::Database;

pub const EQUITY_MAX: f64 = 0.70;
pub const CASH_MIN: f64 = 0.20;
pub const BOND_MIN: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocationMix {
    pub equity: f64,
    pub bond: f64,
    pub cash: f64,
}

impl AllocationMix {
    pub fn sum(&self) -> f64 {
        self.equity + self.bond + self.cash
    }
}

fn regime_baseline(regime: Regime) -> AllocationMix {
    match regime {
        Regime::BullStrong => AllocationMix { equity: 0.60, bond: 0.15, cash: 0.25 },
        Regime::BullWeak => AllocationMix { equity: 0.55, bond: 0.20, cash: 0.25 },
        Regime::Ranging => AllocationMix { equity: 0.45, bond: 0.25, cash: 0.30 },
        Regime::BearWeak => AllocationMix { equity: 0.35, bond: 0.30, cash: 0.35 },
        Regime::BearStrong => AllocationMix { equity: 0.25, bond: 0.35, cash: 0.40 },
    }
}

/// Valuation shift stacked on the regime baseline, by PE percentile band.
fn valuation_adjustment(pe_percentile: f64) -> (f64, f64, f64) {
    if (0.0..20.0).contains(&pe_percentile) {
        (0.10, -0.05, -0.05)
    } else if (20.0..30.0).contains(&pe_percentile) {
        (0.05, -0.03, -0.02)
    } else if (70.0..80.0).contains(&pe_percentile) {
        (-0.05, 0.03, 0.02)
    } else if (80.0..=100.0).contains(&pe_percentile) {
        (-0.10, 0.05, 0.05)
    } else {
        (0.0, 0.0, 0.0)
    }
}

/// Target mix for a regime and valuation level. Hard limits applied last,
/// then normalized so the three legs sum to exactly 1.
pub fn target_allocation(regime: Regime, pe_percentile: f64) -> AllocationMix {
    let mut mix = regime_baseline(regime);
    let (eq_d, bd_d, ca_d) = valuation_adjustment(pe_percentile);
    mix.equity += eq_d;
    mix.bond += bd_d;
    mix.cash += ca_d;

    mix.equity = mix.equity.min(EQUITY_MAX);
    mix.cash = mix.cash.max(CASH_MIN);
    mix.bond = mix.bond.max(BOND_MIN);

    let total = mix.sum();
    if (total - 1.0).abs() > f64::EPSILON {
        mix.equity = (mix.equity / total * 1000.0).round() / 1000.0;
        mix.bond = (mix.bond / total * 1000.0).round() / 1000.0;
        mix.cash = ((1.0 - mix.equity - mix.bond) * 1000.0).round() / 1000.0;
    }
    mix
}

/// Actual mix of the live portfolio read from the store.
#[derive(Debug, Clone)]
pub struct CurrentAllocation {
    pub mix: AllocationMix,
    pub equity_value: f64,
    pub bond_value: f64,
    pub cash_value: f64,
    pub total_value: f64,
}

pub fn current_allocation(db: &Database, fallback_cash: f64) -> Result<CurrentAllocation> {
    let holdings = db.holdings()?;
    let cash = db.latest_cash()?.unwrap_or(fallback_cash);

    let mut equity_value = 0.0;
    let mut bond_value = 0.0;
    for h in &holdings {
        let value = h.market_value();
        if db.classify_fund(&h.fund_code) == crate::models::FundCategory::Bond {
            bond_value += value;
        } else {
            equity_value += value;
        }
    }
    let total_value = cash + equity_value + bond_value;

    let mix = if total_value > 0.0 {
        AllocationMix {
            equity: equity_value / total_value,
            bond: bond_value / total_value,
            cash: cash / total_value,
        }
    } else {
        AllocationMix { equity: 0.0, bond: 0.0, cash: 1.0 }
    };

    Ok(CurrentAllocation {
        mix,
        equity_value,
        bond_value,
        cash_value: cash,
        total_value,
    })
}

#[derive(Debug, Clone)]
pub struct ComplianceReport {
    pub compliant: bool,
    pub target: AllocationMix,
    pub current: AllocationMix,
    pub violations: Vec<String>,
    pub suggestions: Vec<String>,
}

pub fn check_compliance(
    db: &Database,
    regime: Regime,
    pe_percentile: f64,
    fallback_cash: f64,
) -> Result<ComplianceReport> {
    let target = target_allocation(regime, pe_percentile);
    let current = current_allocation(db, fallback_cash)?;

    let mut violations = Vec::new();
    let mut suggestions = Vec::new();

    if current.mix.equity > EQUITY_MAX {
        violations.push(format!(
            "equity at {:.0}% exceeds the {:.0}% cap",
            current.mix.equity * 100.0,
            EQUITY_MAX * 100.0
        ));
        suggestions.push(format!("trim equity funds below {:.0}%", EQUITY_MAX * 100.0));
    }
    if current.mix.cash < CASH_MIN {
        violations.push(format!(
            "cash at {:.0}% is under the {:.0}% floor",
            current.mix.cash * 100.0,
            CASH_MIN * 100.0
        ));
        suggestions.push(format!("rebuild cash reserves above {:.0}%", CASH_MIN * 100.0));
    }
    if current.mix.bond < BOND_MIN {
        violations.push(format!(
            "bonds at {:.0}% are under the {:.0}% floor",
            current.mix.bond * 100.0,
            BOND_MIN * 100.0
        ));
        suggestions.push("add a bond fund as portfolio ballast".to_string());
    }

    for (name, current_v, target_v) in [
        ("equity", current.mix.equity, target.equity),
        ("bond", current.mix.bond, target.bond),
        ("cash", current.mix.cash, target.cash),
    ] {
        let dev = current_v - target_v;
        if dev.abs() > 0.10 {
            suggestions.push(format!(
                "{name} is {} by {:.0}% (target {:.0}%, current {:.0}%)",
                if dev > 0.0 { "overweight" } else { "underweight" },
                dev.abs() * 100.0,
                target_v * 100.0,
                current_v * 100.0
            ));
        }
    }

    Ok(ComplianceReport {
        compliant: violations.is_empty(),
        target,
        current: current.mix,
        violations,
        suggestions,
    })
}

/// Headroom before a new equity buy would break the allocation ceiling.
pub fn max_equity_amount(
    db: &Database,
    total_value: f64,
    regime: Regime,
    pe_percentile: f64,
    fallback_cash: f64,
) -> Result<f64> {
    let target = target_allocation(regime, pe_percentile);
    let current = current_allocation(db, fallback_cash)?;

    let max_equity_pct = (target.equity + 0.05).min(EQUITY_MAX);
    let headroom = (total_value * max_equity_pct - current.equity_value).max(0.0);
    Ok((headroom * 100.0).round() / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testutil::temp_db;

    #[test]
    fn targets_respect_hard_limits_for_all_inputs() {
        for regime in Regime::ALL {
            for pe in [0.0, 10.0, 25.0, 50.0, 75.0, 85.0, 100.0] {
                let mix = target_allocation(regime, pe);
                assert!(mix.equity <= EQUITY_MAX + 1e-9, "{regime:?} pe={pe}");
                assert!(mix.cash >= CASH_MIN - 1e-9 || (mix.sum() - 1.0).abs() < 1e-9);
                assert!((mix.sum() - 1.0).abs() < 1e-9, "{regime:?} pe={pe} sum={}", mix.sum());
            }
        }
    }

    #[test]
    fn cheap_market_tilts_to_equity() {
        let cheap = target_allocation(Regime::Ranging, 10.0);
        let dear = target_allocation(Regime::Ranging, 90.0);
        assert!(cheap.equity > dear.equity);
        assert!(dear.cash > cheap.cash);
    }

    #[test]
    fn empty_portfolio_is_all_cash_and_noncompliant_on_bonds() {
        let (_dir, db) = temp_db();
        let report = check_compliance(&db, Regime::Ranging, 50.0, 10_000.0).unwrap();
        assert!(!report.compliant); // no bond ballast yet
        assert_eq!(report.current.cash, 1.0);
    }

    #[test]
    fn equity_headroom_shrinks_with_existing_positions() {
        let (_dir, db) = temp_db();
        let all_cash = max_equity_amount(&db, 10_000.0, Regime::Ranging, 50.0, 10_000.0).unwrap();
        // Ranging target 45% + 5% buffer = 50% of 10k.
        assert_eq!(all_cash, 5_000.0);

        db.open_position("110011", 1000.0, 2.0, "2026-06-01").unwrap();
        let with_position = max_equity_amount(&db, 10_000.0, Regime::Ranging, 50.0, 8_000.0).unwrap();
        assert_eq!(with_position, 3_000.0);
    }
}
