//! Core domain types shared across the advisor pipeline.
//!
//! Signals reference funds by code only; decisions and reflections reference
//! each other by integer row id. `MarketData` is the sealed record handed to
//! strategies — every enrichment field is optional and each strategy documents
//! which fields it requires.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::fallback::DataQuality;

/// Signal direction emitted by strategies and the composite fuser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::StrongBuy => "strong_buy",
            SignalType::Buy => "buy",
            SignalType::Hold => "hold",
            SignalType::Sell => "sell",
            SignalType::StrongSell => "strong_sell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "strong_buy" => Some(Self::StrongBuy),
            "buy" => Some(Self::Buy),
            "hold" => Some(Self::Hold),
            "sell" => Some(Self::Sell),
            "strong_sell" => Some(Self::StrongSell),
            _ => None,
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, SignalType::StrongBuy | SignalType::Buy)
    }

    pub fn is_sell(&self) -> bool {
        matches!(self, SignalType::StrongSell | SignalType::Sell)
    }
}

/// A trading signal. Stateless; identity is (fund_code, strategy_name, date
/// of generation) and the generation date is assigned at registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub fund_code: String,
    pub signal_type: SignalType,
    /// Clamped to [0, 1] at construction.
    pub confidence: f64,
    pub reason: String,
    pub strategy_name: String,
    pub target_amount: f64,
    pub priority: i64,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Signal {
    pub fn new(
        fund_code: impl Into<String>,
        signal_type: SignalType,
        confidence: f64,
        reason: impl Into<String>,
        strategy_name: &str,
    ) -> Self {
        Self {
            fund_code: fund_code.into(),
            signal_type,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
            strategy_name: strategy_name.to_string(),
            target_amount: 0.0,
            priority: 0,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_meta(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn is_buy(&self) -> bool {
        self.signal_type.is_buy()
    }

    pub fn is_sell(&self) -> bool {
        self.signal_type.is_sell()
    }
}

/// Discrete market state over a short horizon for one asset category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    BullStrong,
    BullWeak,
    Ranging,
    BearWeak,
    BearStrong,
}

impl Regime {
    pub const ALL: [Regime; 5] = [
        Regime::BullStrong,
        Regime::BullWeak,
        Regime::Ranging,
        Regime::BearWeak,
        Regime::BearStrong,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::BullStrong => "bull_strong",
            Regime::BullWeak => "bull_weak",
            Regime::Ranging => "ranging",
            Regime::BearWeak => "bear_weak",
            Regime::BearStrong => "bear_strong",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bull_strong" => Some(Self::BullStrong),
            "bull_weak" => Some(Self::BullWeak),
            "ranging" => Some(Self::Ranging),
            "bear_weak" => Some(Self::BearWeak),
            "bear_strong" => Some(Self::BearStrong),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Regime::BullStrong => "strong uptrend - moving averages stacked bullish",
            Regime::BullWeak => "weak uptrend - short MAs above long MAs but momentum fading",
            Regime::Ranging => "range-bound - no clear direction, MAs interleaved",
            Regime::BearWeak => "weak downtrend - short MAs crossing below long MAs",
            Regime::BearStrong => "strong downtrend - moving averages stacked bearish",
        }
    }

    pub fn is_bear(&self) -> bool {
        matches!(self, Regime::BearWeak | Regime::BearStrong)
    }

    pub fn is_bull(&self) -> bool {
        matches!(self, Regime::BullStrong | Regime::BullWeak)
    }
}

/// Asset category of a fund. Drives proxy selection for regime detection,
/// scoring benchmarks and which strategies apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundCategory {
    Equity,
    Bond,
    Gold,
    Qdii,
    Index,
}

impl FundCategory {
    pub const ALL: [FundCategory; 5] = [
        FundCategory::Equity,
        FundCategory::Bond,
        FundCategory::Gold,
        FundCategory::Qdii,
        FundCategory::Index,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FundCategory::Equity => "equity",
            FundCategory::Bond => "bond",
            FundCategory::Gold => "gold",
            FundCategory::Qdii => "qdii",
            FundCategory::Index => "index",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "equity" => Some(Self::Equity),
            "bond" => Some(Self::Bond),
            "gold" => Some(Self::Gold),
            "qdii" => Some(Self::Qdii),
            "index" => Some(Self::Index),
            _ => None,
        }
    }

    /// Categories where valuation / macro timing on the broad A-share market
    /// makes sense.
    pub fn is_equity_like(&self) -> bool {
        matches!(self, FundCategory::Equity | FundCategory::Index)
    }
}

/// One daily NAV observation. Density is not guaranteed (non-trading days
/// are absent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundNav {
    pub nav_date: String,
    pub nav: f64,
    pub acc_nav: Option<f64>,
    pub daily_return: Option<f64>,
}

/// One daily OHLCV bar of a market index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexBar {
    pub trade_date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
    pub amount: Option<f64>,
}

/// NAV history plus classification for one fund, as seen by strategies.
#[derive(Debug, Clone)]
pub struct FundHistory {
    pub category: FundCategory,
    pub nav_history: Vec<FundNav>,
}

impl FundHistory {
    pub fn navs(&self) -> Vec<f64> {
        self.nav_history.iter().map(|r| r.nav).collect()
    }
}

/// Immutable per-run snapshot of fund data, keyed by fund code. Ordered so
/// that composite output is stable across identical runs.
pub type FundBook = BTreeMap<String, FundHistory>;

/// Credit-cycle phase derived from PMI direction and M2 growth trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditCycle {
    Expansion,
    Recovery,
    Peak,
    Contraction,
    Unknown,
}

impl CreditCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditCycle::Expansion => "expansion",
            CreditCycle::Recovery => "recovery",
            CreditCycle::Peak => "peak",
            CreditCycle::Contraction => "contraction",
            CreditCycle::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "expansion" => Self::Expansion,
            "recovery" => Self::Recovery,
            "peak" => Self::Peak,
            "contraction" => Self::Contraction,
            _ => Self::Unknown,
        }
    }
}

/// Broad-market valuation signal (CSI 300 PE percentile anchored).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationSignal {
    pub pe_percentile: f64,
    pub regime_modifier: i32,
    pub position_multiplier: f64,
    pub narrative: String,
}

impl ValuationSignal {
    pub fn neutral() -> Self {
        Self {
            pe_percentile: 50.0,
            regime_modifier: 0,
            position_multiplier: 1.0,
            narrative: "valuation data unavailable".to_string(),
        }
    }

    /// Map a PE percentile to the full signal shape.
    pub fn from_pe_percentile(pe_pct: f64) -> Self {
        let (regime_modifier, position_multiplier, narrative) = if pe_pct < 20.0 {
            (2, 1.5, format!("CSI300 PE percentile {pe_pct:.0}% - historic lows, prime accumulation zone"))
        } else if pe_pct < 30.0 {
            (1, 1.3, format!("CSI300 PE percentile {pe_pct:.0}% - undervalued, scale in"))
        } else if pe_pct < 70.0 {
            (0, 1.0, format!("CSI300 PE percentile {pe_pct:.0}% - valuation neutral"))
        } else if pe_pct < 80.0 {
            (-1, 0.6, format!("CSI300 PE percentile {pe_pct:.0}% - expensive, reduce inflows"))
        } else {
            (-2, 0.3, format!("CSI300 PE percentile {pe_pct:.0}% - extreme overvaluation, scale out"))
        };
        Self {
            pe_percentile: pe_pct,
            regime_modifier,
            position_multiplier,
            narrative,
        }
    }
}

/// Latest macro readings and the derived credit-cycle label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroSnapshot {
    pub pmi: f64,
    pub m2_yoy: f64,
    pub cpi_yoy: Option<f64>,
    pub credit_cycle: CreditCycle,
    pub cycle_signal: String,
    pub narrative: String,
}

impl MacroSnapshot {
    pub fn neutral() -> Self {
        Self {
            pmi: 50.0,
            m2_yoy: 8.0,
            cpi_yoy: None,
            credit_cycle: CreditCycle::Unknown,
            cycle_signal: "balanced".to_string(),
            narrative: "macro data unavailable".to_string(),
        }
    }
}

/// Margin-balance based sentiment reading. Extremes are contrarian.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentSnapshot {
    pub score: f64,
    pub level: String,
    pub percentile: f64,
    pub trend: String,
    pub narrative: String,
}

impl SentimentSnapshot {
    pub fn neutral() -> Self {
        Self {
            score: 50.0,
            level: "neutral".to_string(),
            percentile: 50.0,
            trend: "flat".to_string(),
            narrative: "sentiment data unavailable".to_string(),
        }
    }
}

/// Manager quality grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagerGrade {
    A,
    B,
    C,
    D,
}

impl ManagerGrade {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagerGrade::A => "A",
            ManagerGrade::B => "B",
            ManagerGrade::C => "C",
            ManagerGrade::D => "D",
        }
    }
}

/// Manager evaluation derived from the fund's own NAV track record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerEvaluation {
    pub fund_code: String,
    pub score: f64,
    pub grade: ManagerGrade,
    pub annualized_return: Option<f64>,
    pub max_drawdown: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    pub reasons: Vec<String>,
}

/// Sealed per-run market snapshot handed to every strategy. Strategies read
/// only the fields they document; missing enrichments degrade to no signal.
#[derive(Debug, Clone, Default)]
pub struct MarketData {
    pub global_regime: Option<Regime>,
    pub category_regimes: BTreeMap<FundCategory, Regime>,
    pub valuation: Option<ValuationSignal>,
    pub macro_snapshot: Option<MacroSnapshot>,
    pub sentiment: Option<SentimentSnapshot>,
    pub manager_scores: BTreeMap<String, ManagerEvaluation>,
    pub data_quality: BTreeMap<String, DataQuality>,
}

impl MarketData {
    pub fn global_regime(&self) -> Regime {
        self.global_regime.unwrap_or(Regime::Ranging)
    }

    /// Funds inherit the regime of their category; fall back to the global
    /// (equity) regime when the category was not detected.
    pub fn regime_for(&self, category: FundCategory) -> Regime {
        self.category_regimes
            .get(&category)
            .copied()
            .unwrap_or_else(|| self.global_regime())
    }
}

/// An open position read from the portfolio table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub id: i64,
    pub fund_code: String,
    pub shares: f64,
    pub cost_price: f64,
    pub current_nav: Option<f64>,
    pub buy_date: String,
}

impl Holding {
    pub fn market_value(&self) -> f64 {
        self.current_nav.unwrap_or(self.cost_price) * self.shares
    }
}

/// Daily account snapshot written by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub snapshot_date: String,
    pub total_value: f64,
    pub cash: f64,
    pub invested: f64,
    pub total_pnl: f64,
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub holdings_json: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_type_round_trip() {
        for st in [
            SignalType::StrongBuy,
            SignalType::Buy,
            SignalType::Hold,
            SignalType::Sell,
            SignalType::StrongSell,
        ] {
            assert_eq!(SignalType::parse(st.as_str()), Some(st));
        }
        assert_eq!(SignalType::parse("nonsense"), None);
    }

    #[test]
    fn signal_confidence_clamped() {
        let s = Signal::new("110011", SignalType::Buy, 1.4, "x", "trend_following");
        assert_eq!(s.confidence, 1.0);
        let s = Signal::new("110011", SignalType::Sell, -0.2, "x", "momentum");
        assert_eq!(s.confidence, 0.0);
    }

    #[test]
    fn regime_fallback_to_global() {
        let mut md = MarketData::default();
        md.global_regime = Some(Regime::BullWeak);
        md.category_regimes.insert(FundCategory::Bond, Regime::Ranging);
        assert_eq!(md.regime_for(FundCategory::Bond), Regime::Ranging);
        assert_eq!(md.regime_for(FundCategory::Gold), Regime::BullWeak);
    }

    #[test]
    fn valuation_tiers() {
        assert_eq!(ValuationSignal::from_pe_percentile(10.0).position_multiplier, 1.5);
        assert_eq!(ValuationSignal::from_pe_percentile(85.0).position_multiplier, 0.3);
        assert_eq!(ValuationSignal::from_pe_percentile(50.0).regime_modifier, 0);
    }
}
