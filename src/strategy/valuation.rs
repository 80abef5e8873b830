//! Valuation-driven timing (the single most effective slow signal here).
//!
//! Fires off broad-market PE percentile tiers; signal changes on a monthly
//! cadence, not daily. Only equity/index funds respond — PE percentiles say
//! nothing about bond, gold or overseas funds.
//!
//! Requires: `market.valuation` (pe_percentile + narrative).

use serde_json::json;

use crate::models::{FundBook, MarketData, Signal, SignalType};

use super::Strategy;

pub struct ValuationTiming;

impl Strategy for ValuationTiming {
    fn name(&self) -> &'static str {
        "valuation"
    }

    fn default_weight(&self) -> f64 {
        0.25
    }

    fn generate(&self, market: &MarketData, funds: &FundBook) -> Vec<Signal> {
        let Some(valuation) = &market.valuation else {
            return Vec::new();
        };
        let pe_pct = valuation.pe_percentile;
        let narrative = &valuation.narrative;

        let tier = if pe_pct < 20.0 {
            Some((SignalType::StrongBuy, 0.85, 90, format!("extreme undervaluation (PE pct {pe_pct:.0}%), historic bottom zone. {narrative}")))
        } else if pe_pct < 30.0 {
            Some((SignalType::Buy, 0.70, 70, format!("undervalued (PE pct {pe_pct:.0}%). {narrative}")))
        } else if pe_pct > 85.0 {
            Some((SignalType::StrongSell, 0.80, 85, format!("extreme overvaluation (PE pct {pe_pct:.0}%), scale out. {narrative}")))
        } else if pe_pct > 75.0 {
            Some((SignalType::Sell, 0.60, 60, format!("expensive (PE pct {pe_pct:.0}%). {narrative}")))
        } else {
            None // mid-range: let other strategies drive
        };

        let Some((signal_type, confidence, priority, reason)) = tier else {
            return Vec::new();
        };

        funds
            .iter()
            .filter(|(_, data)| data.category.is_equity_like())
            .map(|(fund_code, data)| {
                Signal::new(fund_code.clone(), signal_type, confidence, reason.clone(), self.name())
                    .with_priority(priority)
                    .with_meta("pe_percentile", json!(pe_pct))
                    .with_meta("category", json!(data.category.as_str()))
            })
            .collect()
    }
}
