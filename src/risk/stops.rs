//! ATR-based dynamic stops.
//!
//! Stop distance scales with the fund's own volatility, so choppy growth
//! funds get room to breathe while bond funds run tight stops. Clamps keep
//! the stop inside [-15%, -3%] from cost and the trailing exit inside
//! [-20%, -5%] from the peak. Funds without enough history fall back to the
//! fixed configured stop.

use serde::Serialize;

use crate::analysis::indicators::atr;

const ATR_PERIOD: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMethod {
    AtrDynamic,
    FixedFallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopLoss {
    pub stop_price: f64,
    pub stop_pct: f64,
    pub atr: f64,
    pub method: StopMethod,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrailingStop {
    pub stop_price: f64,
    pub stop_pct: f64,
}

/// Stop-loss at cost - 2 x ATR20, clamped to [-15%, -3%].
pub fn dynamic_stop_loss(navs: &[f64], cost_price: f64, fallback_stop_pct: f64) -> StopLoss {
    let fixed = StopLoss {
        stop_price: cost_price * (1.0 - fallback_stop_pct),
        stop_pct: -fallback_stop_pct * 100.0,
        atr: 0.0,
        method: StopMethod::FixedFallback,
    };

    if navs.len() < ATR_PERIOD + 5 || cost_price <= 0.0 {
        return fixed;
    }
    let atr_value = atr(navs, ATR_PERIOD);
    if atr_value <= 0.0 {
        return fixed;
    }

    let mut stop_pct = -(atr_value * 2.0) / cost_price * 100.0;
    stop_pct = stop_pct.clamp(-15.0, -3.0);

    StopLoss {
        stop_price: ((cost_price * (1.0 + stop_pct / 100.0)) * 10_000.0).round() / 10_000.0,
        stop_pct: (stop_pct * 100.0).round() / 100.0,
        atr: (atr_value * 10_000.0).round() / 10_000.0,
        method: StopMethod::AtrDynamic,
    }
}

/// Trailing exit at peak - 2.5 x ATR20, clamped to [-20%, -5%].
pub fn trailing_stop(navs: &[f64], peak_nav: f64) -> TrailingStop {
    let fallback = TrailingStop {
        stop_price: peak_nav * 0.90,
        stop_pct: -10.0,
    };
    if navs.len() < ATR_PERIOD + 5 || peak_nav <= 0.0 {
        return fallback;
    }
    let atr_value = atr(navs, ATR_PERIOD);
    if atr_value <= 0.0 {
        return fallback;
    }

    let mut stop_pct = -(atr_value * 2.5) / peak_nav * 100.0;
    stop_pct = stop_pct.clamp(-20.0, -5.0);

    TrailingStop {
        stop_price: ((peak_nav * (1.0 + stop_pct / 100.0)) * 10_000.0).round() / 10_000.0,
        stop_pct: (stop_pct * 100.0).round() / 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choppy(n: usize, amplitude: f64) -> Vec<f64> {
        (0..n)
            .map(|i| 1.0 + amplitude * if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect()
    }

    #[test]
    fn short_history_falls_back_to_fixed_stop() {
        let stop = dynamic_stop_loss(&[1.0; 10], 1.0, 0.08);
        assert_eq!(stop.method, StopMethod::FixedFallback);
        assert_eq!(stop.stop_pct, -8.0);
        assert!((stop.stop_price - 0.92).abs() < 1e-9);
    }

    /// Spec scenario: ATR so large that 2xATR would put the stop at -25%;
    /// the clamp holds it at -15% (0.85x cost).
    #[test]
    fn oversized_atr_clamps_to_minus_15() {
        // Alternating +/-0.125 around 1.0 -> ATR20 = 0.25 -> raw stop -50%.
        let navs = choppy(40, 0.125);
        let stop = dynamic_stop_loss(&navs, 1.0, 0.08);
        assert_eq!(stop.method, StopMethod::AtrDynamic);
        assert_eq!(stop.stop_pct, -15.0);
        assert!((stop.stop_price - 0.85).abs() < 1e-9);
    }

    #[test]
    fn tiny_atr_clamps_to_minus_3() {
        let navs = choppy(40, 0.0005);
        let stop = dynamic_stop_loss(&navs, 1.0, 0.08);
        assert_eq!(stop.stop_pct, -3.0);
    }

    #[test]
    fn trailing_stop_clamps_both_ways() {
        let wide = trailing_stop(&choppy(40, 0.2), 1.0);
        assert_eq!(wide.stop_pct, -20.0);
        let tight = trailing_stop(&choppy(40, 0.0005), 1.0);
        assert_eq!(tight.stop_pct, -5.0);
        assert!((tight.stop_price - 0.95).abs() < 1e-9);
    }
}
