//! Technical indicator kernels.
//!
//! Pure functions over NAV/close slices. Series-returning functions pad the
//! warm-up window with NaN so indices line up with the input.

use serde::Serialize;
use statrs::statistics::Statistics;

/// Annualization factor for A-share trading days.
const TRADING_DAYS: f64 = 250.0;

/// Simple moving average; NaN until `window` observations are available.
pub fn sma(series: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; series.len()];
    if window == 0 || series.len() < window {
        return out;
    }
    let mut sum: f64 = series[..window].iter().sum();
    out[window - 1] = sum / window as f64;
    for i in window..series.len() {
        sum += series[i] - series[i - window];
        out[i] = sum / window as f64;
    }
    out
}

/// Exponential moving average with span semantics (alpha = 2/(span+1)),
/// seeded from the first observation.
pub fn ema(series: &[f64], span: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; series.len()];
    if series.is_empty() || span == 0 {
        return out;
    }
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut value = series[0];
    out[0] = value;
    for i in 1..series.len() {
        value = alpha * series[i] + (1.0 - alpha) * value;
        out[i] = value;
    }
    out
}

/// Wilder RSI (smoothing alpha = 1/period); NaN for the first `period` rows.
pub fn rsi(series: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; series.len()];
    if series.len() <= period || period == 0 {
        return out;
    }
    let alpha = 1.0 / period as f64;
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..series.len() {
        let delta = series[i] - series[i - 1];
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        if i == 1 {
            avg_gain = gain;
            avg_loss = loss;
        } else {
            avg_gain = (1.0 - alpha) * avg_gain + alpha * gain;
            avg_loss = (1.0 - alpha) * avg_loss + alpha * loss;
        }
        if i >= period {
            out[i] = if avg_loss == 0.0 {
                100.0
            } else {
                100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
            };
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct MacdSeries {
    pub dif: Vec<f64>,
    pub dea: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// MACD (12/26/9 by default): DIF, DEA (signal) and 2x histogram.
pub fn macd(series: &[f64], fast: usize, slow: usize, signal: usize) -> MacdSeries {
    let ema_fast = ema(series, fast);
    let ema_slow = ema(series, slow);
    let dif: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| f - s)
        .collect();
    let dea = ema(&dif, signal);
    let histogram: Vec<f64> = dif.iter().zip(&dea).map(|(d, e)| 2.0 * (d - e)).collect();
    MacdSeries { dif, dea, histogram }
}

#[derive(Debug, Clone)]
pub struct BollingerBands {
    pub middle: Vec<f64>,
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
    pub width: Vec<f64>,
}

/// Bollinger bands over a rolling window with `k` standard deviations.
pub fn bollinger(series: &[f64], window: usize, k: f64) -> BollingerBands {
    let n = series.len();
    let middle = sma(series, window);
    let mut upper = vec![f64::NAN; n];
    let mut lower = vec![f64::NAN; n];
    let mut width = vec![f64::NAN; n];
    if n >= window && window >= 2 {
        for i in (window - 1)..n {
            let slice = &series[i + 1 - window..=i];
            let std = slice.iter().copied().std_dev();
            upper[i] = middle[i] + k * std;
            lower[i] = middle[i] - k * std;
            if middle[i] != 0.0 {
                width[i] = (upper[i] - lower[i]) / middle[i];
            }
        }
    }
    BollingerBands { middle, upper, lower, width }
}

/// Rolling annualized volatility of log returns.
pub fn volatility(series: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; series.len()];
    if series.len() < 2 || window < 2 {
        return out;
    }
    let mut log_returns = vec![f64::NAN; series.len()];
    for i in 1..series.len() {
        if series[i] > 0.0 && series[i - 1] > 0.0 {
            log_returns[i] = (series[i] / series[i - 1]).ln();
        }
    }
    for i in window..series.len() {
        let slice = &log_returns[i + 1 - window..=i];
        if slice.iter().all(|v| v.is_finite()) {
            out[i] = slice.iter().copied().std_dev() * TRADING_DAYS.sqrt();
        }
    }
    out
}

/// Daily simple returns (length = input length - 1).
pub fn daily_returns(series: &[f64]) -> Vec<f64> {
    series
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

/// Annualized Sharpe ratio over daily returns.
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let std = returns.iter().copied().std_dev();
    if std == 0.0 || !std.is_finite() {
        return 0.0;
    }
    let excess_mean = returns.iter().copied().mean() - risk_free_rate / TRADING_DAYS;
    excess_mean / std * TRADING_DAYS.sqrt()
}

/// Annualized Sortino ratio (downside deviation only).
pub fn sortino_ratio(returns: &[f64], risk_free_rate: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let excess_mean = returns.iter().copied().mean() - risk_free_rate / TRADING_DAYS;
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.len() < 2 {
        return if excess_mean > 0.0 { f64::INFINITY } else { 0.0 };
    }
    let downside_std = downside.iter().copied().std_dev();
    if downside_std == 0.0 {
        return if excess_mean > 0.0 { f64::INFINITY } else { 0.0 };
    }
    excess_mean / downside_std * TRADING_DAYS.sqrt()
}

/// Maximum drawdown and its (peak, trough) indices.
pub fn max_drawdown(series: &[f64]) -> (f64, usize, usize) {
    if series.is_empty() {
        return (0.0, 0, 0);
    }
    let mut peak = series[0];
    let mut peak_idx = 0;
    let mut max_dd = 0.0;
    let mut dd_start = 0;
    let mut dd_end = 0;
    for (i, &v) in series.iter().enumerate() {
        if v > peak {
            peak = v;
            peak_idx = i;
        }
        if peak > 0.0 {
            let dd = (v - peak) / peak;
            if dd < max_dd {
                max_dd = dd;
                dd_start = peak_idx;
                dd_end = i;
            }
        }
    }
    (max_dd, dd_start, dd_end)
}

/// Funds publish close-only NAVs, so the true range degrades to the mean
/// absolute daily change over the trailing `period` observations.
pub fn atr(series: &[f64], period: usize) -> f64 {
    if series.len() < period + 1 || period == 0 {
        return 0.0;
    }
    let diffs: Vec<f64> = series
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .collect();
    let tail = &diffs[diffs.len() - period..];
    tail.iter().sum::<f64>() / period as f64
}

// ── technical summary ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MacdSignal {
    GoldenCross,
    DeadCross,
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaAlignment {
    Bullish,
    Bearish,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BollingerSignal {
    BreakUpper,
    BreakLower,
    InChannel,
}

#[derive(Debug, Clone, Serialize)]
pub struct MacdSnapshot {
    pub dif: f64,
    pub dea: f64,
    pub histogram: f64,
    pub signal: MacdSignal,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MaSnapshot {
    pub ma5: Option<f64>,
    pub ma10: Option<f64>,
    pub ma20: Option<f64>,
    pub ma60: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BollingerSnapshot {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub signal: BollingerSignal,
    /// Position inside the channel, 0 = lower band, 1 = upper band.
    pub position: Option<f64>,
}

/// Latest values of the standard indicator set for one fund.
#[derive(Debug, Clone, Serialize)]
pub struct TechnicalSummary {
    pub current_price: f64,
    pub rsi: Option<f64>,
    pub macd: Option<MacdSnapshot>,
    pub ma: MaSnapshot,
    pub ma_alignment: Option<MaAlignment>,
    pub bollinger: Option<BollingerSnapshot>,
    pub volatility: Option<f64>,
}

fn last_finite(series: &[f64]) -> Option<f64> {
    series.last().copied().filter(|v| v.is_finite())
}

/// Aggregate the indicator set; None below 30 observations.
pub fn technical_summary(prices: &[f64]) -> Option<TechnicalSummary> {
    if prices.len() < 30 {
        return None;
    }
    let current_price = *prices.last()?;

    let rsi_series = rsi(prices, 14);
    let rsi_now = last_finite(&rsi_series);

    let macd_series = macd(prices, 12, 26, 9);
    let macd_now = match (
        last_finite(&macd_series.dif),
        last_finite(&macd_series.dea),
        last_finite(&macd_series.histogram),
    ) {
        (Some(dif), Some(dea), Some(histogram)) => {
            let n = macd_series.dif.len();
            let prev_dif = if n > 1 { macd_series.dif[n - 2] } else { dif };
            let prev_dea = if n > 1 { macd_series.dea[n - 2] } else { dea };
            let signal = if dif > dea {
                if prev_dif <= prev_dea {
                    MacdSignal::GoldenCross
                } else {
                    MacdSignal::Bullish
                }
            } else if prev_dif >= prev_dea {
                MacdSignal::DeadCross
            } else {
                MacdSignal::Bearish
            };
            Some(MacdSnapshot { dif, dea, histogram, signal })
        }
        _ => None,
    };

    let ma = MaSnapshot {
        ma5: last_finite(&sma(prices, 5)),
        ma10: last_finite(&sma(prices, 10)),
        ma20: last_finite(&sma(prices, 20)),
        ma60: last_finite(&sma(prices, 60)),
    };

    let ma_alignment = match (ma.ma5, ma.ma10, ma.ma20, ma.ma60) {
        (Some(m5), Some(m10), Some(m20), Some(m60)) => {
            if m5 > m10 && m10 > m20 && m20 > m60 {
                Some(MaAlignment::Bullish)
            } else if m5 < m10 && m10 < m20 && m20 < m60 {
                Some(MaAlignment::Bearish)
            } else {
                Some(MaAlignment::Mixed)
            }
        }
        _ => None,
    };

    let bands = bollinger(prices, 20, 2.0);
    let bollinger_now = match (
        last_finite(&bands.upper),
        last_finite(&bands.middle),
        last_finite(&bands.lower),
    ) {
        (Some(upper), Some(middle), Some(lower)) => {
            let (signal, position) = if current_price > upper {
                (BollingerSignal::BreakUpper, None)
            } else if current_price < lower {
                (BollingerSignal::BreakLower, None)
            } else {
                let pct = if upper != lower {
                    (current_price - lower) / (upper - lower)
                } else {
                    0.5
                };
                (BollingerSignal::InChannel, Some(pct))
            };
            Some(BollingerSnapshot { upper, middle, lower, signal, position })
        }
        _ => None,
    };

    let vol_now = last_finite(&volatility(prices, 20));

    Some(TechnicalSummary {
        current_price,
        rsi: rsi_now,
        macd: macd_now,
        ma,
        ma_alignment,
        bollinger: bollinger_now,
        volatility: vol_now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear(n: usize, start: f64, step: f64) -> Vec<f64> {
        (0..n).map(|i| start + step * i as f64).collect()
    }

    #[test]
    fn sma_matches_hand_calc() {
        let s = sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert!(s[1].is_nan());
        assert_eq!(s[2], 2.0);
        assert_eq!(s[4], 4.0);
    }

    #[test]
    fn rsi_saturates_on_monotonic_series() {
        let up = linear(40, 1.0, 0.01);
        let r = rsi(&up, 14);
        assert!(r[13].is_nan());
        assert!((r[39] - 100.0).abs() < 1e-9);

        let down: Vec<f64> = up.iter().rev().copied().collect();
        let r = rsi(&down, 14);
        assert!(r[39] < 1.0);
    }

    #[test]
    fn macd_turns_positive_in_uptrend() {
        let mut series = vec![1.0; 40];
        series.extend(linear(40, 1.0, 0.02));
        let m = macd(&series, 12, 26, 9);
        let dif = *m.dif.last().unwrap();
        let dea = *m.dea.last().unwrap();
        assert!(dif > 0.0 && dif > dea);
    }

    #[test]
    fn max_drawdown_finds_peak_to_trough() {
        let series = [1.0, 1.2, 0.9, 1.1, 0.8];
        let (dd, start, end) = max_drawdown(&series);
        assert!((dd - (0.8 - 1.2) / 1.2).abs() < 1e-12);
        assert_eq!(start, 1);
        assert_eq!(end, 4);
    }

    #[test]
    fn atr_is_mean_abs_change() {
        let series = [1.0, 1.1, 1.0, 1.2, 1.1];
        // diffs: .1 .1 .2 .1 -> last 4 mean = 0.125
        assert!((atr(&series, 4) - 0.125).abs() < 1e-12);
        assert_eq!(atr(&series, 10), 0.0);
    }

    #[test]
    fn summary_requires_30_points() {
        assert!(technical_summary(&linear(29, 1.0, 0.01)).is_none());
        let s = technical_summary(&linear(80, 1.0, 0.01)).unwrap();
        assert_eq!(s.ma_alignment, Some(MaAlignment::Bullish));
        assert!(s.rsi.unwrap() > 70.0);
        assert!(s.ma.ma60.is_some());
    }

    #[test]
    fn bollinger_position_inside_channel() {
        // Alternating series stays inside the bands.
        let series: Vec<f64> = (0..60)
            .map(|i| if i % 2 == 0 { 1.00 } else { 1.02 })
            .collect();
        let s = technical_summary(&series).unwrap();
        let bb = s.bollinger.unwrap();
        assert_eq!(bb.signal, BollingerSignal::InChannel);
        let pos = bb.position.unwrap();
        assert!((0.0..=1.0).contains(&pos));
    }

    #[test]
    fn sharpe_positive_for_steady_gains() {
        let returns = vec![0.001; 100];
        assert!(sharpe_ratio(&returns, 0.02) == 0.0); // zero variance
        let mut noisy = returns.clone();
        noisy[50] = 0.002;
        assert!(sharpe_ratio(&noisy, 0.02) > 0.0);
    }
}
