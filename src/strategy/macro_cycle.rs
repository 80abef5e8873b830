//! Macro credit-cycle strategy (slow, directional).
//!
//! The credit cycle (PMI direction x M2 trend) sets the broad tilt: buy
//! equities in expansion/recovery, sell in contraction, stand aside at the
//! peak. Monthly-frequency signal, equity/index funds only.
//!
//! Requires: `market.macro_snapshot` (credit_cycle + narrative).

use serde_json::json;

use crate::models::{CreditCycle, FundBook, MarketData, Signal, SignalType};

use super::Strategy;

pub struct MacroCycle;

impl Strategy for MacroCycle {
    fn name(&self) -> &'static str {
        "macro_cycle"
    }

    fn default_weight(&self) -> f64 {
        0.10
    }

    fn generate(&self, market: &MarketData, funds: &FundBook) -> Vec<Signal> {
        let Some(snapshot) = &market.macro_snapshot else {
            return Vec::new();
        };
        let narrative = &snapshot.narrative;

        let call = match snapshot.credit_cycle {
            CreditCycle::Expansion => Some((
                SignalType::Buy,
                0.65,
                format!("credit expansion favours equities. {narrative}"),
            )),
            CreditCycle::Recovery => Some((
                SignalType::Buy,
                0.55,
                format!("policy-bottom recovery, early positioning. {narrative}"),
            )),
            CreditCycle::Contraction => Some((
                SignalType::Sell,
                0.60,
                format!("credit contraction, trim equity exposure. {narrative}"),
            )),
            // At the peak the right move is to hold what you have.
            CreditCycle::Peak | CreditCycle::Unknown => None,
        };

        let Some((signal_type, confidence, reason)) = call else {
            return Vec::new();
        };

        funds
            .iter()
            .filter(|(_, data)| data.category.is_equity_like())
            .map(|(fund_code, _)| {
                Signal::new(fund_code.clone(), signal_type, confidence, reason.clone(), self.name())
                    .with_priority(50)
                    .with_meta("credit_cycle", json!(snapshot.credit_cycle.as_str()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FundCategory, FundHistory, MacroSnapshot};

    fn equity_book() -> FundBook {
        let mut book = FundBook::new();
        book.insert(
            "005827".to_string(),
            FundHistory {
                category: FundCategory::Equity,
                nav_history: Vec::new(),
            },
        );
        book
    }

    fn market_in(cycle: CreditCycle) -> MarketData {
        let mut snapshot = MacroSnapshot::neutral();
        snapshot.credit_cycle = cycle;
        let mut market = MarketData::default();
        market.macro_snapshot = Some(snapshot);
        market
    }

    #[test]
    fn expansion_buys() {
        let signals = MacroCycle.generate(&market_in(CreditCycle::Expansion), &equity_book());
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal_type, SignalType::Buy);
        assert_eq!(signals[0].confidence, 0.65);
    }

    #[test]
    fn recovery_buys_with_lower_conviction() {
        let signals = MacroCycle.generate(&market_in(CreditCycle::Recovery), &equity_book());
        assert_eq!(signals[0].confidence, 0.55);
    }

    #[test]
    fn contraction_sells() {
        let signals = MacroCycle.generate(&market_in(CreditCycle::Contraction), &equity_book());
        assert_eq!(signals[0].signal_type, SignalType::Sell);
    }

    #[test]
    fn peak_and_unknown_are_silent() {
        assert!(MacroCycle.generate(&market_in(CreditCycle::Peak), &equity_book()).is_empty());
        assert!(MacroCycle.generate(&market_in(CreditCycle::Unknown), &equity_book()).is_empty());
    }
}
