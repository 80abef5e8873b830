//! Decision orchestrator.
//!
//! Turns stored market data into a final advisory list: resolve regimes,
//! fuse strategy signals, enrich, consult the LLM (or degrade to pure
//! quantitative advice), size every buy, persist the decision and pending
//! trades, and register signals for later validation. Any step may fail and
//! the pipeline continues with degraded data; only a completely empty NAV
//! store short-circuits into a synthetic HOLD.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::agent::brain::{
    analyze_market, make_decision, DecisionContext, MarketAnalysisInput,
};
use crate::agent::llm::{HttpBackend, LlmBackend, LlmGateway, ModelRole};
use crate::agent::schemas::FundRecommendation;
use crate::analysis::regime::{detect_category_regime, detect_all_regimes, RegimeReading};
use crate::analysis::seasonal::seasonal_modifier;
use crate::config::Config;
use crate::data::fallback::DataQuality;
use crate::data::provider::{EnrichmentService, MarketDataProvider, OfflineProvider};
use crate::models::{AccountSnapshot, FundCategory, Holding, MarketData, Regime, Signal};
use crate::risk::allocation::{current_allocation, max_equity_amount, target_allocation};
use crate::risk::correlation::correlation_penalty;
use crate::risk::costs::{round_trip_cost, RoundTripCost};
use crate::risk::drawdown::{portfolio_drawdown, progressive_response};
use crate::risk::sizing::{position_size, SizingInput};
use crate::store::validation::SignalRecord;
use crate::store::Database;
use crate::strategy::composite;
use crate::strategy::StrategyRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdviceAction {
    Buy,
    Sell,
    Hold,
    Watch,
}

impl AdviceAction {
    pub fn label(&self) -> &'static str {
        match self {
            AdviceAction::Buy => "buy",
            AdviceAction::Sell => "sell",
            AdviceAction::Hold => "hold",
            AdviceAction::Watch => "watch",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Advice {
    pub fund_code: String,
    pub fund_name: String,
    pub action: AdviceAction,
    pub amount: f64,
    pub confidence: f64,
    pub reason: String,
    pub round_trip_cost: Option<RoundTripCost>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmNarrative {
    pub sentiment: String,
    pub market_narrative: String,
    pub initial_judgment: String,
    pub challenge: String,
    pub final_conclusion: String,
    pub portfolio_advice: String,
    pub confidence_summary: String,
    pub tokens_used: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryMode {
    LlmEnhanced,
    QuantOnly,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountView {
    pub total_value: f64,
    pub cash: f64,
    pub invested: f64,
    pub drawdown: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdvisoryReport {
    pub date: String,
    pub regime: Regime,
    pub trend_score: f64,
    pub volatility: f64,
    pub mode: AdvisoryMode,
    pub advices: Vec<Advice>,
    pub account: AccountView,
    pub data_quality: BTreeMap<String, String>,
    pub notices: Vec<String>,
    pub llm: Option<LlmNarrative>,
}

pub struct Advisor {
    pub db: Database,
    pub config: Config,
    registry: StrategyRegistry,
    enrichment: EnrichmentService,
    gateway: Option<LlmGateway>,
}

impl Advisor {
    /// Standard construction: offline market provider (data arrives via the
    /// store), HTTP LLM backend when any provider credential is present.
    pub fn new(db: Database, config: Config) -> Result<Self> {
        let backend = HttpBackend::new();
        let gateway = if backend.has_credentials("gemini") || backend.has_credentials("anthropic") {
            Some(LlmGateway::new(config.llm.clone(), Arc::new(backend)))
        } else {
            None
        };
        Self::with_parts(db, config, Arc::new(OfflineProvider), gateway)
    }

    pub fn with_parts(
        db: Database,
        config: Config,
        provider: Arc<dyn MarketDataProvider>,
        gateway: Option<LlmGateway>,
    ) -> Result<Self> {
        let registry = StrategyRegistry::discover()?;
        let enrichment = EnrichmentService::new(provider, db.clone());
        Ok(Self {
            db,
            config,
            registry,
            enrichment,
            gateway,
        })
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Full advisory pipeline for `today`.
    pub async fn generate(&self, today: NaiveDate) -> Result<AdvisoryReport> {
        let date = today.format("%Y-%m-%d").to_string();
        let mut notices = Vec::new();

        // 1. Fund universe. An empty store is the only fatal condition.
        let book = self.db.build_fund_book()?;
        if book.is_empty() {
            warn!("no fund NAV history in the store");
            return Ok(self.hold_report(date, "no fund NAV history available"));
        }

        // 2. Regimes per category.
        let category_regimes = detect_all_regimes(&self.db);
        let equity_reading = detect_category_regime(&self.db, FundCategory::Equity);
        let regime = category_regimes
            .get(&FundCategory::Equity)
            .copied()
            .unwrap_or(Regime::Ranging);

        // 3. Enrichment (bounded fan-out, quality-tagged).
        let enrichment = self.enrichment.fetch_all(today, &book).await;
        for (name, quality) in enrichment.quality_map() {
            match quality {
                DataQuality::Cached | DataQuality::Stale => notices.push(format!("{name} (cached)")),
                DataQuality::Default => notices.push(format!("{name} (default)")),
                DataQuality::Realtime => {}
            }
        }

        let market = MarketData {
            global_regime: Some(regime),
            category_regimes: category_regimes.clone(),
            valuation: Some(enrichment.valuation.data.clone()),
            macro_snapshot: Some(enrichment.macro_snapshot.data.clone()),
            sentiment: Some(enrichment.sentiment.data.clone()),
            manager_scores: enrichment.manager_scores.clone(),
            data_quality: enrichment.quality_map(),
        };

        // 4. Composite signals, seasonally adjusted.
        let mut signals = composite::compose(&self.db, &self.registry, &market, &book, today).await?;
        let (seasonal, seasonal_reason) = seasonal_modifier(today);
        if seasonal != 0.0 {
            for sig in &mut signals {
                let category = book
                    .get(&sig.fund_code)
                    .map(|d| d.category)
                    .unwrap_or(FundCategory::Equity);
                if !category.is_equity_like() {
                    continue;
                }
                if sig.is_buy() {
                    sig.confidence = ((sig.confidence + seasonal).clamp(0.1, 0.95) * 100.0).round() / 100.0;
                } else if sig.is_sell() {
                    sig.confidence = ((sig.confidence - seasonal).clamp(0.1, 0.95) * 100.0).round() / 100.0;
                }
            }
            notices.push(format!("seasonal adjustment {seasonal:+.2}: {seasonal_reason}"));
        }

        // 5. Account state.
        let holdings = self.db.holdings()?;
        let cash = self.db.latest_cash()?.unwrap_or(self.config.current_cash);
        let invested: f64 = holdings.iter().map(Holding::market_value).sum();
        let total_value = cash + invested;
        let drawdown = portfolio_drawdown(&self.db, &self.config)?;
        let response = progressive_response(drawdown.current_drawdown);
        if response.block_new_buys {
            notices.push(response.narrative.clone());
        }

        let account = AccountView {
            total_value,
            cash,
            invested,
            drawdown: drawdown.current_drawdown,
        };

        // 6-7. LLM decision, or pure quantitative fallback.
        let mut mode = AdvisoryMode::QuantOnly;
        let mut llm_narrative = None;
        let mut llm_recommendations: Vec<FundRecommendation> = Vec::new();

        if let Some(gateway) = &self.gateway {
            match self
                .llm_decision(gateway, &signals, &holdings, &account, &market, equity_reading.as_ref(), regime, &date)
                .await
            {
                Ok((narrative, recommendations)) => {
                    mode = AdvisoryMode::LlmEnhanced;
                    llm_narrative = Some(narrative);
                    llm_recommendations = recommendations;
                }
                Err(e) => {
                    warn!("LLM decision unavailable: {}", e);
                    notices.push(format!("LLM unavailable - quantitative-only ({})", e));
                }
            }
        } else {
            notices.push("LLM unavailable - quantitative-only (no credentials)".to_string());
        }

        // Build the advisory list.
        let advices = if !llm_recommendations.is_empty() {
            self.advices_from_llm(&llm_recommendations, &holdings, &account, &market, regime, response.block_new_buys)?
        } else {
            self.advices_from_signals(&signals, &holdings, &account, &market, regime, response.block_new_buys)?
        };

        // 8. Persist actionable advisories as pending trades.
        for advice in &advices {
            if advice.amount > 0.0 && matches!(advice.action, AdviceAction::Buy | AdviceAction::Sell) {
                let nav = self
                    .db
                    .latest_nav(&advice.fund_code)
                    .ok()
                    .flatten()
                    .map(|r| r.nav)
                    .unwrap_or(0.0);
                if let Err(e) = self.db.insert_trade(&crate::store::account::TradeInsert {
                    trade_date: &date,
                    fund_code: &advice.fund_code,
                    action: advice.action.label(),
                    amount: advice.amount,
                    nav,
                    shares: None,
                    reason: &advice.reason.chars().take(500).collect::<String>(),
                    confidence: Some(advice.confidence),
                    status: "pending",
                }) {
                    warn!("failed to persist pending trade for {}: {}", advice.fund_code, e);
                }
            }
        }

        // 9. Register composite + contributing strategy signals.
        if let Err(e) = self.register_signals(&signals, &date, regime) {
            warn!("signal registration failed: {}", e);
        }

        // 10. Account snapshot.
        let snapshot = AccountSnapshot {
            snapshot_date: date.clone(),
            total_value,
            cash,
            invested,
            total_pnl: total_value - self.config.initial_capital,
            total_return_pct: if self.config.initial_capital > 0.0 {
                (total_value / self.config.initial_capital - 1.0) * 100.0
            } else {
                0.0
            },
            max_drawdown_pct: drawdown.max_drawdown * 100.0,
            holdings_json: serde_json::to_string(&holdings)?,
        };
        if let Err(e) = self.db.upsert_snapshot(&snapshot) {
            warn!("snapshot write failed: {}", e);
        }

        let (trend_score, volatility) = equity_reading
            .map(|r| (r.trend_score, r.volatility))
            .unwrap_or((0.0, 0.0));

        let advices = if advices.is_empty() {
            notices.push("no strategy produced an actionable signal".to_string());
            vec![hold_advice("strategies are not aligned; keep current positions")]
        } else {
            advices
        };

        Ok(AdvisoryReport {
            date,
            regime,
            trend_score,
            volatility,
            mode,
            advices,
            account,
            data_quality: enrichment
                .quality_map()
                .into_iter()
                .map(|(k, v)| (k, v.as_str().to_string()))
                .collect(),
            notices,
            llm: llm_narrative,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn llm_decision(
        &self,
        gateway: &LlmGateway,
        signals: &[Signal],
        holdings: &[Holding],
        account: &AccountView,
        market: &MarketData,
        equity_reading: Option<&RegimeReading>,
        regime: Regime,
        date: &str,
    ) -> std::result::Result<(LlmNarrative, Vec<FundRecommendation>), crate::agent::errors::LlmError>
    {
        // Market analysis with the cheap tier.
        let indices_text = self
            .db
            .latest_index_snapshot(
                &self
                    .config
                    .benchmark_indices
                    .iter()
                    .map(|i| (i.code.clone(), i.name.clone()))
                    .collect::<Vec<_>>(),
            )
            .unwrap_or_default()
            .iter()
            .map(|s| {
                let change = s
                    .change_pct
                    .map(|c| format!("{c:+.2}%"))
                    .unwrap_or_else(|| "-".to_string());
                format!("- {}: {:.2} ({change})", s.name, s.close)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let hotspot_text = self
            .db
            .active_hotspots(5)
            .unwrap_or_default()
            .iter()
            .map(|h| format!("- {}: {} (heat {:.0})", h.sector_name, h.hotspot_type, h.score))
            .collect::<Vec<_>>()
            .join("\n");

        let analysis_input = MarketAnalysisInput {
            regime: regime.as_str().to_string(),
            regime_description: regime.description().to_string(),
            trend_score: equity_reading.map(|r| r.trend_score).unwrap_or(0.0),
            volatility: equity_reading.map(|r| r.volatility).unwrap_or(0.0),
            indices_text,
            hotspot_text,
            valuation_text: market
                .valuation
                .as_ref()
                .map(|v| v.narrative.clone())
                .unwrap_or_default(),
            macro_text: market
                .macro_snapshot
                .as_ref()
                .map(|m| m.narrative.clone())
                .unwrap_or_default(),
            sentiment_text: market
                .sentiment
                .as_ref()
                .map(|s| s.narrative.clone())
                .unwrap_or_default(),
        };

        let mut tokens_total = 0u32;
        let (assessment, market_summary) = match analyze_market(gateway, &analysis_input).await {
            Ok((assessment, tokens)) => {
                tokens_total += tokens;
                let summary = if assessment.narrative.is_empty() {
                    format!("market regime: {}", regime.as_str())
                } else {
                    assessment.narrative.clone()
                };
                (Some(assessment), summary)
            }
            Err(e) => {
                warn!("market analysis failed, using regime label: {}", e);
                (None, format!("market regime: {}", regime.as_str()))
            }
        };

        // Quantitative signal lines with data-quality note.
        let mut quant_lines: Vec<String> = signals
            .iter()
            .take(10)
            .map(|sig| {
                let name = self
                    .db
                    .fund_name(&sig.fund_code)
                    .unwrap_or_else(|| format!("fund {}", sig.fund_code));
                let category = sig
                    .metadata
                    .get("category")
                    .and_then(|v| v.as_str())
                    .unwrap_or("equity");
                format!(
                    "- [{category}] {name} ({}): {} | confidence {:.0}% | {}",
                    sig.fund_code,
                    sig.signal_type.as_str(),
                    sig.confidence * 100.0,
                    sig.reason.replace('\n', " / ")
                )
            })
            .collect();
        if quant_lines.is_empty() {
            quant_lines.push("no active trade signals".to_string());
        }
        let quality_note: Vec<String> = market
            .data_quality
            .iter()
            .map(|(k, v)| format!("{k}: {}", v.as_str()))
            .collect();
        let mut quant_signals_text = quant_lines.join("\n");
        if !quality_note.is_empty() {
            quant_signals_text.push_str(&format!("\n\ndata reliability: {}", quality_note.join(", ")));
        }

        // Allocation context.
        let current = current_allocation(&self.db, self.config.current_cash)
            .map(|c| c.mix)
            .unwrap_or(crate::risk::allocation::AllocationMix { equity: 0.0, bond: 0.0, cash: 1.0 });
        let pe_pct = market
            .valuation
            .as_ref()
            .map(|v| v.pe_percentile)
            .unwrap_or(50.0);
        let target = target_allocation(regime, pe_pct);
        quant_signals_text.push_str(&format!(
            "\n\n## Asset allocation\ncurrent: equity {:.0}% | bond {:.0}% | cash {:.0}%\n\
             target: equity {:.0}% | bond {:.0}% | cash {:.0}%\n\
             Rebalancing toward the target takes precedence over new ideas.",
            current.equity * 100.0,
            current.bond * 100.0,
            current.cash * 100.0,
            target.equity * 100.0,
            target.bond * 100.0,
            target.cash * 100.0,
        ));

        let account_text = format!(
            "- total value: {:.2} RMB\n- cash: {:.2} RMB\n- invested: {:.2} RMB\n- current drawdown: {:.2}%",
            account.total_value,
            account.cash,
            account.invested,
            account.drawdown * 100.0
        );

        let holdings_text = if holdings.is_empty() {
            "currently all cash".to_string()
        } else {
            holdings
                .iter()
                .map(|h| {
                    let name = self
                        .db
                        .fund_name(&h.fund_code)
                        .unwrap_or_else(|| h.fund_code.clone());
                    format!(
                        "- {name} ({}): cost {:.4}, nav {:.4}, shares {:.2}",
                        h.fund_code,
                        h.cost_price,
                        h.current_nav.unwrap_or(h.cost_price),
                        h.shares
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let enrichment_text = [
            market.valuation.as_ref().map(|v| format!("valuation: {}", v.narrative)),
            market.macro_snapshot.as_ref().map(|m| format!("macro: {}", m.narrative)),
            market.sentiment.as_ref().map(|s| format!("sentiment: {}", s.narrative)),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("\n");

        let intel_text = self.db.latest_intel().unwrap_or(None).unwrap_or_default();

        let lessons = self
            .db
            .relevant_knowledge(regime.as_str(), 10)
            .unwrap_or_default();
        let lessons_text = if lessons.is_empty() {
            String::new()
        } else {
            lessons.iter().map(|l| format!("- {l}")).collect::<Vec<_>>().join("\n")
        };

        let context = DecisionContext {
            market_summary: market_summary.clone(),
            quant_signals: quant_signals_text,
            account_state: account_text,
            holdings: holdings_text,
            enrichment: enrichment_text,
            market_intel: intel_text,
            lessons: lessons_text,
        };

        let (outcome, tokens) = make_decision(gateway, &context).await?;
        tokens_total += tokens;

        // Persist the decision for the reflection loop.
        let quant_json = serde_json::to_string(
            &signals
                .iter()
                .take(10)
                .map(|s| {
                    json!({
                        "fund_code": s.fund_code,
                        "signal_type": s.signal_type.as_str(),
                        "confidence": s.confidence,
                        "strategy_name": s.strategy_name,
                    })
                })
                .collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".to_string());
        let provider = gateway.provider();
        let model_used = format!("{provider}:{}", gateway.model_for(&provider, ModelRole::Critical));
        if let Err(e) = self.db.insert_decision(&crate::store::decisions::DecisionInsert {
            decision_date: date,
            market_context: &market_summary,
            quant_signals: &quant_json,
            llm_analysis: &serde_json::to_string(&assessment).unwrap_or_default(),
            llm_decision: &serde_json::to_string(&outcome.recommendations).unwrap_or_default(),
            confidence: outcome.avg_confidence(),
            reasoning: &outcome.thinking.final_conclusion,
            challenge: &outcome.thinking.challenge,
            model_used: &model_used,
            tokens_used: tokens_total as i64,
        }) {
            warn!("decision persistence failed: {}", e);
        }

        let narrative = LlmNarrative {
            sentiment: assessment
                .as_ref()
                .map(|a| a.sentiment.clone())
                .unwrap_or_else(|| "neutral".to_string()),
            market_narrative: market_summary,
            initial_judgment: outcome.thinking.initial_judgment.clone(),
            challenge: outcome.thinking.challenge.clone(),
            final_conclusion: outcome.thinking.final_conclusion.clone(),
            portfolio_advice: outcome.portfolio_advice.clone(),
            confidence_summary: outcome.confidence_summary.clone(),
            tokens_used: tokens_total,
        };

        Ok((narrative, outcome.recommendations))
    }

    /// Size one buy against the live cash pool and risk rails.
    #[allow(clippy::too_many_arguments)]
    fn sized_amount(
        &self,
        fund_code: &str,
        confidence: f64,
        regime: Regime,
        market: &MarketData,
        remaining_cash: f64,
        total_value: f64,
        batch_positions: usize,
        batch_holdings: &[String],
    ) -> f64 {
        let penalty = correlation_penalty(&self.db, fund_code, batch_holdings).unwrap_or(1.0);
        let valuation_multiplier = market
            .valuation
            .as_ref()
            .map(|v| v.position_multiplier)
            .unwrap_or(1.0);
        let pe_pct = market
            .valuation
            .as_ref()
            .map(|v| v.pe_percentile)
            .unwrap_or(50.0);
        let headroom =
            max_equity_amount(&self.db, total_value, regime, pe_pct, self.config.current_cash).ok();

        position_size(
            &self.config,
            &SizingInput {
                total_capital: total_value,
                current_cash: remaining_cash,
                confidence,
                regime,
                existing_positions: batch_positions,
                valuation_multiplier,
                correlation_penalty: penalty,
                max_equity_amount: headroom,
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn advices_from_llm(
        &self,
        recommendations: &[FundRecommendation],
        holdings: &[Holding],
        account: &AccountView,
        market: &MarketData,
        regime: Regime,
        block_new_buys: bool,
    ) -> Result<Vec<Advice>> {
        let mut remaining_cash = account.cash;
        let mut batch_positions = holdings.len();
        let mut batch_holdings: Vec<String> = holdings.iter().map(|h| h.fund_code.clone()).collect();
        let mut advices = Vec::new();

        for rec in recommendations {
            let fund_name = rec
                .fund_name
                .clone()
                .or_else(|| self.db.fund_name(&rec.fund_code))
                .unwrap_or_else(|| format!("fund {}", rec.fund_code));

            match rec.action.as_str() {
                "buy" => {
                    let mut amount = rec.amount;
                    if amount <= 0.0 {
                        amount = self.sized_amount(
                            &rec.fund_code,
                            rec.confidence,
                            regime,
                            market,
                            remaining_cash,
                            account.total_value,
                            batch_positions,
                            &batch_holdings,
                        );
                    }
                    // Never exceed the live cash pool, whatever the model said.
                    amount = amount.min(remaining_cash * 0.9);
                    if block_new_buys {
                        amount = 0.0;
                    }
                    let cost = (amount > 0.0).then(|| {
                        round_trip_cost(amount, 30, 0.015, self.config.subscription_fee_discount)
                    });
                    if amount > 0.0 {
                        remaining_cash -= amount;
                        batch_positions += 1;
                        batch_holdings.push(rec.fund_code.clone());
                    }
                    advices.push(Advice {
                        fund_code: rec.fund_code.clone(),
                        fund_name,
                        action: AdviceAction::Buy,
                        amount,
                        confidence: rec.confidence,
                        reason: rec.reasoning.clone(),
                        round_trip_cost: cost,
                    });
                }
                "sell" => {
                    let held = holdings.iter().find(|h| h.fund_code == rec.fund_code);
                    match held {
                        Some(h) => advices.push(Advice {
                            fund_code: rec.fund_code.clone(),
                            fund_name,
                            action: AdviceAction::Sell,
                            amount: h.market_value(),
                            confidence: rec.confidence,
                            reason: rec.reasoning.clone(),
                            round_trip_cost: None,
                        }),
                        None => advices.push(Advice {
                            fund_code: rec.fund_code.clone(),
                            fund_name,
                            action: AdviceAction::Watch,
                            amount: 0.0,
                            confidence: rec.confidence,
                            reason: format!("{} (not currently held)", rec.reasoning),
                            round_trip_cost: None,
                        }),
                    }
                }
                "watch" => advices.push(Advice {
                    fund_code: rec.fund_code.clone(),
                    fund_name,
                    action: AdviceAction::Watch,
                    amount: 0.0,
                    confidence: rec.confidence,
                    reason: rec.reasoning.clone(),
                    round_trip_cost: None,
                }),
                _ => advices.push(Advice {
                    fund_code: rec.fund_code.clone(),
                    fund_name,
                    action: AdviceAction::Hold,
                    amount: 0.0,
                    confidence: rec.confidence,
                    reason: rec.reasoning.clone(),
                    round_trip_cost: None,
                }),
            }
        }

        Ok(advices)
    }

    fn advices_from_signals(
        &self,
        signals: &[Signal],
        holdings: &[Holding],
        account: &AccountView,
        market: &MarketData,
        regime: Regime,
        block_new_buys: bool,
    ) -> Result<Vec<Advice>> {
        let mut remaining_cash = account.cash;
        let mut batch_positions = holdings.len();
        let mut batch_holdings: Vec<String> = holdings.iter().map(|h| h.fund_code.clone()).collect();
        let mut advices = Vec::new();

        for sig in signals.iter().take(5) {
            let fund_name = self
                .db
                .fund_name(&sig.fund_code)
                .unwrap_or_else(|| format!("fund {}", sig.fund_code));

            if sig.is_buy() {
                let mut amount = self.sized_amount(
                    &sig.fund_code,
                    sig.confidence,
                    regime,
                    market,
                    remaining_cash,
                    account.total_value,
                    batch_positions,
                    &batch_holdings,
                );
                amount = amount.min(remaining_cash * 0.9);
                if block_new_buys {
                    amount = 0.0;
                }
                if amount <= 0.0 {
                    continue; // an unsized buy is no advice at all
                }
                remaining_cash -= amount;
                batch_positions += 1;
                batch_holdings.push(sig.fund_code.clone());
                advices.push(Advice {
                    fund_code: sig.fund_code.clone(),
                    fund_name,
                    action: AdviceAction::Buy,
                    amount,
                    confidence: sig.confidence,
                    reason: sig.reason.clone(),
                    round_trip_cost: Some(round_trip_cost(
                        amount,
                        30,
                        0.015,
                        self.config.subscription_fee_discount,
                    )),
                });
            } else if sig.is_sell() {
                let Some(h) = holdings.iter().find(|h| h.fund_code == sig.fund_code) else {
                    continue;
                };
                advices.push(Advice {
                    fund_code: sig.fund_code.clone(),
                    fund_name,
                    action: AdviceAction::Sell,
                    amount: h.market_value(),
                    confidence: sig.confidence,
                    reason: sig.reason.clone(),
                    round_trip_cost: None,
                });
            }
        }

        Ok(advices)
    }

    /// Register composite signals (and the strategies behind them, parsed
    /// from `[name]`-prefixed reason lines) into the validation log.
    pub fn register_signals(&self, signals: &[Signal], date: &str, global_regime: Regime) -> Result<usize> {
        let known: Vec<&'static str> = self.registry.names();
        let mut registered = 0usize;

        for sig in signals {
            let nav = self
                .db
                .latest_nav(&sig.fund_code)?
                .map(|r| r.nav)
                .unwrap_or(0.0);
            let regime = sig
                .metadata
                .get("regime")
                .and_then(|v| v.as_str())
                .and_then(Regime::parse)
                .unwrap_or(global_regime);

            if self.db.record_signal(&SignalRecord {
                signal_date: date,
                fund_code: &sig.fund_code,
                strategy_name: "composite",
                signal_type: sig.signal_type,
                confidence: sig.confidence,
                regime,
                nav_at_signal: nav,
            })? {
                registered += 1;
            }

            // Attribute the same outcome to each contributing strategy.
            for line in sig.reason.lines() {
                let Some(rest) = line.strip_prefix('[') else {
                    continue;
                };
                let Some(end) = rest.find(']') else {
                    continue;
                };
                let strategy_name = &rest[..end];
                if !known.iter().any(|k| *k == strategy_name) {
                    continue;
                }
                if self.db.record_signal(&SignalRecord {
                    signal_date: date,
                    fund_code: &sig.fund_code,
                    strategy_name,
                    signal_type: sig.signal_type,
                    confidence: sig.confidence,
                    regime,
                    nav_at_signal: nav,
                })? {
                    registered += 1;
                }
            }
        }

        if registered > 0 {
            info!("registered {} signals for validation", registered);
        }
        Ok(registered)
    }

    fn hold_report(&self, date: String, reason: &str) -> AdvisoryReport {
        AdvisoryReport {
            date,
            regime: Regime::Ranging,
            trend_score: 0.0,
            volatility: 0.0,
            mode: AdvisoryMode::QuantOnly,
            advices: vec![hold_advice(reason)],
            account: AccountView {
                total_value: self.config.initial_capital,
                cash: self.config.current_cash,
                invested: 0.0,
                drawdown: 0.0,
            },
            data_quality: BTreeMap::new(),
            notices: vec![reason.to_string()],
            llm: None,
        }
    }
}

fn hold_advice(reason: &str) -> Advice {
    Advice {
        fund_code: "-".to_string(),
        fund_name: "-".to_string(),
        action: AdviceAction::Hold,
        amount: 0.0,
        confidence: 0.0,
        reason: reason.to_string(),
        round_trip_cost: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FundNav;
    use crate::store::testutil::temp_db;

    fn advisor(db: Database) -> Advisor {
        Advisor::with_parts(db, Config::default(), Arc::new(OfflineProvider), None).unwrap()
    }

    /// Drifting series with two-day alternation so RSI stays off the rails
    /// and the trend/momentum strategies agree on direction.
    fn seed_drifting_fund(db: &Database, code: &str, up: bool) {
        let mut nav = 1.0;
        let rows: Vec<FundNav> = (0..150)
            .map(|i| {
                let factor = match (up, i % 2 == 0) {
                    (true, true) => 1.005,
                    (true, false) => 0.9965,
                    (false, true) => 0.995,
                    (false, false) => 1.0035,
                };
                nav *= factor;
                FundNav {
                    nav_date: format!("2026-{:02}-{:02}", 1 + i / 28, 1 + i % 28),
                    nav,
                    acc_nav: None,
                    daily_return: None,
                }
            })
            .collect();
        db.upsert_fund_nav(code, &rows).unwrap();
    }

    #[tokio::test]
    async fn empty_store_emits_synthetic_hold() {
        let (_dir, db) = temp_db();
        let advisor = advisor(db);
        let report = advisor
            .generate(NaiveDate::from_ymd_opt(2026, 7, 15).unwrap())
            .await
            .unwrap();
        assert_eq!(report.advices.len(), 1);
        assert_eq!(report.advices[0].action, AdviceAction::Hold);
        assert!(!report.notices.is_empty());
    }

    #[tokio::test]
    async fn quant_only_pipeline_produces_sized_buys_and_registers_signals() {
        let (_dir, db) = temp_db();
        seed_drifting_fund(&db, "110011", true);
        seed_drifting_fund(&db, "005827", false);
        let advisor = advisor(db.clone());

        let report = advisor
            .generate(NaiveDate::from_ymd_opt(2026, 7, 15).unwrap())
            .await
            .unwrap();

        assert_eq!(report.mode, AdvisoryMode::QuantOnly);
        // Enrichment was offline: default quality notices present.
        assert!(report.data_quality.values().any(|q| q == "DEFAULT"));

        let buy_total: f64 = report
            .advices
            .iter()
            .filter(|a| a.action == AdviceAction::Buy)
            .map(|a| a.amount)
            .sum();
        let cap = report.account.cash - report.account.total_value * 0.10;
        assert!(buy_total <= cap + 1e-6, "buys {buy_total} exceed cap {cap}");
        for advice in &report.advices {
            if advice.action == AdviceAction::Buy {
                assert!(advice.amount <= report.account.total_value * 0.30 + 1e-6);
                assert!(advice.round_trip_cost.is_some());
            }
        }

        // Signals were registered; re-running does not duplicate them.
        let (total, _) = db.validation_counts().unwrap();
        assert!(total > 0);
        let report2 = advisor
            .generate(NaiveDate::from_ymd_opt(2026, 7, 15).unwrap())
            .await
            .unwrap();
        let (total2, _) = db.validation_counts().unwrap();
        assert_eq!(total, total2);
        assert_eq!(report.advices.len(), report2.advices.len());

        // The snapshot landed.
        assert!(db.latest_cash().unwrap().is_some());
    }
}
