//! Fund trading cost estimation.
//!
//! Subscription fees are discounted (platform rate, typically 10% of list);
//! redemption fees step down with holding time, with a punitive rate under
//! seven days.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct FeeBreakdown {
    pub fee: f64,
    pub net_amount: f64,
    pub fee_rate: f64,
}

/// Subscription fee at `fee_rate` x `discount`.
pub fn subscription_fee(amount: f64, fee_rate: f64, discount: f64) -> FeeBreakdown {
    let actual_rate = fee_rate * discount;
    let fee = amount * actual_rate;
    FeeBreakdown {
        fee: (fee * 100.0).round() / 100.0,
        net_amount: ((amount - fee) * 100.0).round() / 100.0,
        fee_rate: actual_rate,
    }
}

/// Redemption fee by holding period.
pub fn redemption_fee(amount: f64, holding_days: u32) -> FeeBreakdown {
    let fee_rate = if holding_days < 7 {
        0.015
    } else if holding_days < 30 {
        0.0075
    } else if holding_days < 365 {
        0.005
    } else if holding_days < 730 {
        0.0025
    } else {
        0.0
    };
    let fee = amount * fee_rate;
    FeeBreakdown {
        fee: (fee * 100.0).round() / 100.0,
        net_amount: ((amount - fee) * 100.0).round() / 100.0,
        fee_rate,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundTripCost {
    pub subscription_fee: f64,
    pub redemption_fee: f64,
    pub total_fee: f64,
    pub total_fee_pct: f64,
    /// Return needed just to cover fees.
    pub breakeven_return_pct: f64,
}

/// Estimate the full cost of buying and later selling `amount`.
pub fn round_trip_cost(
    amount: f64,
    holding_days: u32,
    subscription_rate: f64,
    discount: f64,
) -> RoundTripCost {
    let buy = subscription_fee(amount, subscription_rate, discount);
    let sell = redemption_fee(amount, holding_days);
    let total_fee = buy.fee + sell.fee;
    let total_fee_pct = if amount > 0.0 {
        total_fee / amount * 100.0
    } else {
        0.0
    };
    RoundTripCost {
        subscription_fee: buy.fee,
        redemption_fee: sell.fee,
        total_fee: (total_fee * 100.0).round() / 100.0,
        total_fee_pct: (total_fee_pct * 1000.0).round() / 1000.0,
        breakeven_return_pct: (total_fee_pct * 1000.0).round() / 1000.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discounted_subscription() {
        let fee = subscription_fee(10_000.0, 0.015, 0.1);
        assert_eq!(fee.fee, 15.0);
        assert_eq!(fee.net_amount, 9_985.0);
    }

    #[test]
    fn redemption_steps_down_with_tenure() {
        assert_eq!(redemption_fee(10_000.0, 3).fee_rate, 0.015);
        assert_eq!(redemption_fee(10_000.0, 20).fee_rate, 0.0075);
        assert_eq!(redemption_fee(10_000.0, 200).fee_rate, 0.005);
        assert_eq!(redemption_fee(10_000.0, 500).fee_rate, 0.0025);
        assert_eq!(redemption_fee(10_000.0, 1000).fee_rate, 0.0);
    }

    #[test]
    fn round_trip_breakeven() {
        let cost = round_trip_cost(10_000.0, 30, 0.015, 0.1);
        // 15 subscription + 50 redemption = 65 = 0.65%
        assert_eq!(cost.total_fee, 65.0);
        assert_eq!(cost.breakeven_return_pct, 0.65);
    }
}
