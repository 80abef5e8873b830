//! Application configuration.
//!
//! Defaults mirror a conservative single-user account; a `fundbot.toml` next
//! to the working directory overrides them, and a handful of environment
//! variables (`FUNDBOT_DB`, `LLM_PROVIDER`, provider API keys) override both.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRef {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundRef {
    pub code: String,
    pub name: String,
}

/// Per-category scoring benchmark: annualized return target, volatility cap,
/// drawdown cap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringTarget {
    pub return_target: f64,
    pub vol_cap: f64,
    pub dd_cap: f64,
}

/// Model tiers for one LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderModels {
    pub analysis_model: String,
    pub decision_model: String,
    pub critical_model: String,
    pub thinking_budget: u32,
    pub critical_thinking_budget: u32,
}

impl Default for ProviderModels {
    fn default() -> Self {
        Self {
            analysis_model: String::new(),
            decision_model: String::new(),
            critical_model: String::new(),
            thinking_budget: 3000,
            critical_thinking_budget: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "gemini" or "anthropic"; `LLM_PROVIDER` env wins at runtime.
    pub provider: String,
    pub max_tokens: u32,
    pub max_retries: u32,
    pub retry_backoff_base: f64,
    pub retry_backoff_max: f64,
    pub enable_provider_fallback: bool,
    pub enable_thinking: bool,
    pub reflection_periods: Vec<u32>,
    pub gemini: ProviderModels,
    pub anthropic: ProviderModels,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_base: 2.0,
            retry_backoff_max: 8.0,
            enable_provider_fallback: true,
            enable_thinking: true,
            reflection_periods: vec![7, 30],
            gemini: ProviderModels {
                analysis_model: "gemini-2.0-flash".to_string(),
                decision_model: "gemini-2.5-pro".to_string(),
                critical_model: "gemini-2.5-pro".to_string(),
                thinking_budget: 4096,
                critical_thinking_budget: 8192,
            },
            anthropic: ProviderModels {
                analysis_model: "claude-haiku-4-5-20251001".to_string(),
                decision_model: "claude-sonnet-4-6".to_string(),
                critical_model: "claude-opus-4-6".to_string(),
                thinking_budget: 3000,
                critical_thinking_budget: 5000,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Account bootstrap
    pub initial_capital: f64,
    pub current_cash: f64,

    // Risk parameters
    pub max_single_position_pct: f64,
    pub max_total_position_pct: f64,
    pub min_cash_reserve_pct: f64,
    pub max_drawdown_soft: f64,
    pub max_drawdown_hard: f64,
    /// Fixed single-fund stop used when ATR data is unavailable.
    pub single_fund_stop_loss: f64,
    pub kelly_fraction: f64,

    // Trading costs
    pub subscription_fee_discount: f64,
    pub short_term_penalty_days: u32,
    pub short_term_penalty_rate: f64,

    pub db_path: String,

    pub benchmark_indices: Vec<IndexRef>,

    pub llm: LlmConfig,

    pub scoring_targets: BTreeMap<String, ScoringTarget>,

    /// Seed watchlist per category.
    pub fund_universe: BTreeMap<String, Vec<FundRef>>,
}

impl Default for Config {
    fn default() -> Self {
        let mut scoring_targets = BTreeMap::new();
        scoring_targets.insert("equity".to_string(), ScoringTarget { return_target: 0.20, vol_cap: 0.40, dd_cap: 0.30 });
        scoring_targets.insert("bond".to_string(), ScoringTarget { return_target: 0.05, vol_cap: 0.08, dd_cap: 0.05 });
        scoring_targets.insert("index".to_string(), ScoringTarget { return_target: 0.15, vol_cap: 0.35, dd_cap: 0.25 });
        scoring_targets.insert("gold".to_string(), ScoringTarget { return_target: 0.10, vol_cap: 0.25, dd_cap: 0.20 });
        scoring_targets.insert("qdii".to_string(), ScoringTarget { return_target: 0.15, vol_cap: 0.35, dd_cap: 0.25 });

        let mut fund_universe = BTreeMap::new();
        fund_universe.insert("equity".to_string(), Vec::new());
        fund_universe.insert(
            "bond".to_string(),
            vec![
                FundRef { code: "217022".into(), name: "CMF Industrial Bond A".into() },
                FundRef { code: "110017".into(), name: "E Fund Enhanced Return Bond A".into() },
                FundRef { code: "003376".into(), name: "GF 7-10y CDB Bond Index A".into() },
            ],
        );
        fund_universe.insert(
            "index".to_string(),
            vec![
                FundRef { code: "110020".into(), name: "E Fund CSI300 ETF Feeder A".into() },
                FundRef { code: "000962".into(), name: "Tianhong CSI500 ETF Feeder A".into() },
            ],
        );
        fund_universe.insert(
            "gold".to_string(),
            vec![FundRef { code: "000307".into(), name: "E Fund Gold ETF Feeder A".into() }],
        );
        fund_universe.insert(
            "qdii".to_string(),
            vec![
                FundRef { code: "270042".into(), name: "GF Nasdaq-100 ETF Feeder A".into() },
                FundRef { code: "050025".into(), name: "Bosera S&P500 ETF Feeder A".into() },
            ],
        );

        Self {
            initial_capital: 10_000.0,
            current_cash: 10_000.0,
            max_single_position_pct: 0.30,
            max_total_position_pct: 0.90,
            min_cash_reserve_pct: 0.10,
            max_drawdown_soft: 0.05,
            max_drawdown_hard: 0.10,
            single_fund_stop_loss: 0.08,
            kelly_fraction: 0.5,
            subscription_fee_discount: 0.1,
            short_term_penalty_days: 7,
            short_term_penalty_rate: 0.015,
            db_path: "./fundbot.db".to_string(),
            benchmark_indices: vec![
                IndexRef { code: "000001".into(), name: "SSE Composite".into() },
                IndexRef { code: "399001".into(), name: "SZSE Component".into() },
                IndexRef { code: "399006".into(), name: "ChiNext".into() },
                IndexRef { code: "000300".into(), name: "CSI 300".into() },
                IndexRef { code: "000905".into(), name: "CSI 500".into() },
            ],
            llm: LlmConfig::default(),
            scoring_targets,
            fund_universe,
        }
    }
}

impl Config {
    /// Load config: defaults <- fundbot.toml (if present) <- env overrides.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut cfg = if Path::new("fundbot.toml").exists() {
            let raw = std::fs::read_to_string("fundbot.toml").context("read fundbot.toml")?;
            toml::from_str(&raw).context("parse fundbot.toml")?
        } else {
            Config::default()
        };

        if let Ok(db) = std::env::var("FUNDBOT_DB") {
            if !db.trim().is_empty() {
                cfg.db_path = db;
            }
        }
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            if matches!(provider.as_str(), "gemini" | "anthropic") {
                cfg.llm.provider = provider;
            }
        }

        Ok(cfg)
    }

    pub fn scoring_target(&self, category: &str) -> ScoringTarget {
        self.scoring_targets
            .get(category)
            .copied()
            .unwrap_or(ScoringTarget { return_target: 0.20, vol_cap: 0.40, dd_cap: 0.30 })
    }

    pub fn provider_models(&self, provider: &str) -> &ProviderModels {
        match provider {
            "anthropic" => &self.llm.anthropic,
            _ => &self.llm.gemini,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.max_single_position_pct, 0.30);
        assert_eq!(cfg.llm.reflection_periods, vec![7, 30]);
        assert!(cfg.scoring_targets.contains_key("bond"));
    }

    #[test]
    fn toml_round_trip() {
        let cfg = Config::default();
        let raw = toml::to_string(&cfg).unwrap();
        let back: Config = toml::from_str(&raw).unwrap();
        assert_eq!(back.initial_capital, cfg.initial_capital);
        assert_eq!(back.llm.anthropic.critical_model, cfg.llm.anthropic.critical_model);
    }
}
