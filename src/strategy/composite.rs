//! Composite signal fuser.
//!
//! Runs every registered strategy on its own worker, merges per-fund signals
//! under a regime-conditioned weight vector, dampens conflicting calls, runs
//! the result through the signal guard and emits a priority-ordered list.
//! Output is byte-identical across runs with identical inputs.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use futures_util::future::join_all;
use serde_json::json;
use tracing::{info, warn};

use crate::analysis::guard::apply_signal_guard;
use crate::analysis::learner::learned_weights;
use crate::analysis::regime::regime_allocation;
use crate::models::{FundBook, FundCategory, MarketData, Regime, Signal, SignalType};
use crate::store::Database;

use super::StrategyRegistry;

/// Buckets below this combined weighted score carry no information.
const MIN_TOTAL_SCORE: f64 = 0.1;

/// Resolve the strategy weight vector for this run.
///
/// Learned weights (keyed off the equity regime) win when the learner has
/// enough validated data; otherwise the regime-allocation baseline, with
/// registry defaults for any strategy the table does not cover.
pub fn resolve_weights(
    db: &Database,
    registry: &StrategyRegistry,
    equity_regime: Regime,
) -> BTreeMap<String, f64> {
    let names = registry.names();

    match learned_weights(db, equity_regime.as_str(), &names) {
        Ok(Some(learned)) => {
            info!("using learned strategy weights for {}", equity_regime.as_str());
            return learned;
        }
        Ok(None) => {}
        Err(e) => warn!("learned weight lookup failed: {}", e),
    }

    let allocation = regime_allocation(equity_regime);
    registry
        .iter()
        .map(|s| {
            let weight = allocation
                .strategy_weights
                .get(s.name())
                .copied()
                .unwrap_or_else(|| s.default_weight());
            (s.name().to_string(), weight)
        })
        .collect()
}

/// Run all strategies in parallel (one worker each). A failing strategy is
/// logged and contributes nothing; it never aborts the run.
pub async fn run_strategies(
    registry: &StrategyRegistry,
    market: &MarketData,
    funds: &FundBook,
    weights: &BTreeMap<String, f64>,
) -> Vec<(Signal, f64)> {
    let market = Arc::new(market.clone());
    let funds = Arc::new(funds.clone());

    let tasks: Vec<_> = registry
        .iter()
        .map(|strategy| {
            let strategy = Arc::clone(strategy);
            let market = Arc::clone(&market);
            let funds = Arc::clone(&funds);
            let weight = weights.get(strategy.name()).copied().unwrap_or(0.0);
            tokio::task::spawn_blocking(move || {
                let name = strategy.name();
                (name, strategy.generate(&market, &funds), weight)
            })
        })
        .collect();

    let mut weighted = Vec::new();
    for result in join_all(tasks).await {
        match result {
            Ok((name, signals, weight)) => {
                if !signals.is_empty() {
                    info!("strategy {} emitted {} signals", name, signals.len());
                }
                weighted.extend(signals.into_iter().map(|s| (s, weight)));
            }
            Err(e) => warn!("strategy worker failed: {}", e),
        }
    }
    weighted
}

/// Merge weighted per-strategy signals into composite signals. Pure.
pub fn fuse(
    weighted: Vec<(Signal, f64)>,
    market: &MarketData,
    categories: &BTreeMap<String, FundCategory>,
) -> Vec<Signal> {
    let mut buckets: BTreeMap<String, Vec<(Signal, f64)>> = BTreeMap::new();
    for (signal, weight) in weighted {
        buckets.entry(signal.fund_code.clone()).or_default().push((signal, weight));
    }

    let mut composite = Vec::new();
    for (fund_code, entries) in buckets {
        let mut buy_score = 0.0;
        let mut sell_score = 0.0;
        let mut buy_strategies: Vec<String> = Vec::new();
        let mut sell_strategies: Vec<String> = Vec::new();
        let mut reasons: Vec<String> = Vec::new();

        for (sig, weight) in &entries {
            if sig.is_buy() {
                buy_score += sig.confidence * weight;
                buy_strategies.push(sig.strategy_name.clone());
                reasons.push(format!("[{}] {}", sig.strategy_name, sig.reason));
            } else if sig.is_sell() {
                sell_score += sig.confidence * weight;
                sell_strategies.push(sig.strategy_name.clone());
                reasons.push(format!("[{}] {}", sig.strategy_name, sig.reason));
            }
        }

        let net = buy_score - sell_score;
        let total = buy_score + sell_score;
        if total < MIN_TOTAL_SCORE {
            continue;
        }

        let mut confidence = net.abs() / total.max(0.01);

        // Conflicting strategies cut conviction by up to half.
        let has_conflict = !buy_strategies.is_empty() && !sell_strategies.is_empty();
        if has_conflict {
            let conflict_ratio = buy_score.min(sell_score) / total.max(0.01);
            confidence *= 1.0 - conflict_ratio * 0.5;
            reasons.push(format!(
                "[conflict] strategies disagree (buy: {} vs sell: {})",
                buy_strategies.join(","),
                sell_strategies.join(",")
            ));
        }

        let signal_type = if net > 0.2 {
            if net > 0.5 {
                SignalType::StrongBuy
            } else {
                SignalType::Buy
            }
        } else if net < -0.2 {
            if net < -0.5 {
                SignalType::StrongSell
            } else {
                SignalType::Sell
            }
        } else {
            SignalType::Hold
        };

        if signal_type == SignalType::Hold {
            continue;
        }

        let category = categories.get(&fund_code).copied().unwrap_or(FundCategory::Equity);
        let regime = market.regime_for(category);

        composite.push(
            Signal::new(
                fund_code,
                signal_type,
                ((confidence.min(0.95)) * 100.0).round() / 100.0,
                reasons.join("\n"),
                "composite",
            )
            .with_priority((net.abs() * 100.0) as i64)
            .with_meta("buy_score", json!((buy_score * 1000.0).round() / 1000.0))
            .with_meta("sell_score", json!((sell_score * 1000.0).round() / 1000.0))
            .with_meta("regime", json!(regime.as_str()))
            .with_meta("has_conflict", json!(has_conflict))
            .with_meta("category", json!(category.as_str())),
        );
    }

    // Total order: priority descending, then fund code.
    composite.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.fund_code.cmp(&b.fund_code)));
    composite
}

/// Full composition pipeline against the store.
pub async fn compose(
    db: &Database,
    registry: &StrategyRegistry,
    market: &MarketData,
    funds: &FundBook,
    today: NaiveDate,
) -> Result<Vec<Signal>> {
    let weights = resolve_weights(db, registry, market.global_regime());
    let weighted = run_strategies(registry, market, funds, &weights).await;

    let categories: BTreeMap<String, FundCategory> = funds
        .iter()
        .map(|(code, data)| (code.clone(), data.category))
        .collect();

    let fused = fuse(weighted, market, &categories);
    Ok(apply_signal_guard(db, fused, today))
}
