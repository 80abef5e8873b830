//! Agent business logic: market analysis, decision reasoning, reflection.
//!
//! Transport, retry and fallback live in `llm.rs`; this module only shapes
//! prompts and validates responses. Every function returns a result the
//! orchestrator can pattern-match to degrade gracefully.

use serde_json::Value;
use tracing::{info, warn};

use crate::store::decisions::DecisionRecord;

use super::budget::{build_prompt, PromptSection};
use super::errors::LlmError;
use super::llm::{extract_json, LlmGateway, ModelRole};
use super::prompts;
use super::schemas::{FundRecommendation, MarketAssessment, ReflectionResult, ThinkingProcess};

/// Decision-prompt budget in estimated tokens.
const DECISION_PROMPT_BUDGET: usize = 8000;

/// Inputs for the lightweight market-analysis call.
#[derive(Debug, Clone, Default)]
pub struct MarketAnalysisInput {
    pub regime: String,
    pub regime_description: String,
    pub trend_score: f64,
    pub volatility: f64,
    pub indices_text: String,
    pub hotspot_text: String,
    pub valuation_text: String,
    pub macro_text: String,
    pub sentiment_text: String,
}

/// Summarize the market environment with the analysis-tier model.
pub async fn analyze_market(
    gateway: &LlmGateway,
    input: &MarketAnalysisInput,
) -> Result<(MarketAssessment, u32), LlmError> {
    let user = prompts::market_analyst_message(
        &input.regime,
        &input.regime_description,
        input.trend_score,
        input.volatility,
        &input.indices_text,
        &input.hotspot_text,
        &input.valuation_text,
        &input.macro_text,
        &input.sentiment_text,
    );

    let response = gateway
        .call(ModelRole::Analysis, prompts::MARKET_ANALYST_SYSTEM, &user, Some(1500))
        .await?;
    let provider = gateway.provider();
    let model = gateway.model_for(&provider, ModelRole::Analysis);
    let json = extract_json(&response.text, &provider, &model)?;

    let assessment: MarketAssessment = serde_json::from_value(json).map_err(|e| {
        LlmError::new(
            super::errors::ErrorCategory::Format,
            &provider,
            &model,
            format!("market assessment schema: {e}"),
        )
    })?;

    Ok((assessment.normalize(), response.tokens_used))
}

/// Pre-formatted prompt sections for the decision call, in report order.
#[derive(Debug, Clone, Default)]
pub struct DecisionContext {
    pub market_summary: String,
    pub quant_signals: String,
    pub account_state: String,
    pub holdings: String,
    pub enrichment: String,
    pub market_intel: String,
    pub lessons: String,
}

/// Validated decision output plus the raw JSON for the audit log.
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub raw: Value,
    pub thinking: ThinkingProcess,
    pub recommendations: Vec<FundRecommendation>,
    pub portfolio_advice: String,
    pub confidence_summary: String,
}

impl DecisionOutcome {
    pub fn avg_confidence(&self) -> f64 {
        if self.recommendations.is_empty() {
            return 0.0;
        }
        self.recommendations.iter().map(|r| r.confidence).sum::<f64>()
            / self.recommendations.len() as f64
    }
}

/// Run the three-step decision with the critical-tier model under a budgeted
/// prompt.
pub async fn make_decision(
    gateway: &LlmGateway,
    context: &DecisionContext,
) -> Result<(DecisionOutcome, u32), LlmError> {
    let sections = [
        PromptSection::new("market summary", format!("## Market summary\n{}", context.market_summary), 1),
        PromptSection::new("quant signals", format!("## Quantitative signals\n{}", context.quant_signals), 1),
        PromptSection::new("account state", format!("## Account state\n{}", context.account_state), 1),
        PromptSection::new("holdings", format!("## Current holdings\n{}", context.holdings), 2),
        PromptSection::new("enrichment", format!("## Market enrichment\n{}", context.enrichment), 2),
        PromptSection::new("market intel", format!("## Market intelligence\n{}", context.market_intel), 2),
        PromptSection::new("lessons", format!("## Lessons from past decisions\n{}", context.lessons), 3),
    ];
    // Sections with no payload beyond the header are dropped up front.
    let sections: Vec<PromptSection> = sections
        .into_iter()
        .filter(|s| s.content.lines().nth(1).map_or(false, |l| !l.trim().is_empty()))
        .collect();

    let mut user = build_prompt(&sections, DECISION_PROMPT_BUDGET);
    user.push_str("\n\nFollow the three-step decision process and give your recommendations.");

    let response = gateway
        .call(ModelRole::Critical, prompts::DECISION_ENGINE_SYSTEM, &user, None)
        .await?;
    let provider = gateway.provider();
    let model = gateway.model_for(&provider, ModelRole::Critical);
    let raw = extract_json(&response.text, &provider, &model)?;

    let thinking: ThinkingProcess = raw
        .get("thinking_process")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    // Validate each recommendation; a malformed entry is kept best-effort
    // (fund code only) rather than discarding the whole decision.
    let mut recommendations = Vec::new();
    if let Some(Value::Array(items)) = raw.get("recommendations") {
        for item in items {
            match serde_json::from_value::<FundRecommendation>(item.clone()) {
                Ok(rec) => recommendations.push(rec.normalize()),
                Err(e) => {
                    warn!("recommendation failed validation ({}), keeping raw entry", e);
                    if let Some(code) = item.get("fund_code").and_then(|v| v.as_str()) {
                        recommendations.push(
                            FundRecommendation {
                                fund_code: code.to_string(),
                                fund_name: None,
                                action: "hold".to_string(),
                                confidence: 0.0,
                                amount: 0.0,
                                reasoning: item.to_string(),
                                key_factors: Vec::new(),
                                risks: Vec::new(),
                                stop_loss_trigger: String::new(),
                            }
                            .normalize(),
                        );
                    }
                }
            }
        }
    }

    info!(
        recommendations = recommendations.len(),
        tokens = response.tokens_used,
        "decision complete"
    );

    Ok((
        DecisionOutcome {
            thinking,
            recommendations,
            portfolio_advice: raw
                .get("portfolio_advice")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            confidence_summary: raw
                .get("confidence_summary")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            raw,
        },
        response.tokens_used,
    ))
}

/// Review one past decision against its realized outcome.
pub async fn reflect_on_decision(
    gateway: &LlmGateway,
    decision: &DecisionRecord,
    actual_outcome: &str,
    period: &str,
) -> Result<(ReflectionResult, u32), LlmError> {
    let user = prompts::reflection_message(
        &decision.decision_date,
        &decision.market_context,
        &decision.llm_analysis,
        &decision.llm_decision,
        decision.confidence,
        &decision.quant_signals,
        period,
        actual_outcome,
    );

    let response = gateway
        .call(ModelRole::Decision, prompts::REFLECTION_SYSTEM, &user, None)
        .await?;
    let provider = gateway.provider();
    let model = gateway.model_for(&provider, ModelRole::Decision);
    let json = extract_json(&response.text, &provider, &model)?;

    let result: ReflectionResult = serde_json::from_value(json).map_err(|e| {
        LlmError::new(
            super::errors::ErrorCategory::Format,
            &provider,
            &model,
            format!("reflection schema: {e}"),
        )
    })?;

    Ok((result, response.tokens_used))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::{LlmBackend, LlmRequest, LlmResponse};
    use crate::config::LlmConfig;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct CannedBackend(String);

    #[async_trait]
    impl LlmBackend for CannedBackend {
        async fn complete(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            Ok(LlmResponse {
                text: self.0.clone(),
                tokens_used: 42,
            })
        }

        fn has_credentials(&self, _provider: &str) -> bool {
            true
        }
    }

    fn gateway_with(text: &str) -> LlmGateway {
        LlmGateway::new(LlmConfig::default(), Arc::new(CannedBackend(text.to_string())))
    }

    #[tokio::test]
    async fn decision_parses_and_validates_recommendations() {
        let reply = r#"```json
{
    "thinking_process": {"initial_judgment": "i", "challenge": "c", "final_conclusion": "f"},
    "recommendations": [
        {"fund_code": "110011", "action": "buy", "confidence": 0.7, "amount": 1000},
        {"fund_code": "320007", "action": "moon", "confidence": 3.0},
        {"not_a_rec": true}
    ],
    "portfolio_advice": "stay balanced"
}
```"#;
        let gateway = gateway_with(reply);
        let (outcome, tokens) = make_decision(&gateway, &DecisionContext {
            market_summary: "calm".into(),
            quant_signals: "1 buy".into(),
            account_state: "cash 10000".into(),
            ..Default::default()
        })
        .await
        .unwrap();

        assert_eq!(tokens, 42);
        assert_eq!(outcome.thinking.final_conclusion, "f");
        // Entry without a fund code is dropped entirely.
        assert_eq!(outcome.recommendations.len(), 2);
        assert_eq!(outcome.recommendations[0].action, "buy");
        // Out-of-vocabulary action coerced, confidence clamped.
        assert_eq!(outcome.recommendations[1].action, "hold");
        assert_eq!(outcome.recommendations[1].confidence, 1.0);
        assert_eq!(outcome.portfolio_advice, "stay balanced");
        assert!((outcome.avg_confidence() - 0.85).abs() < 1e-9);
    }

    #[tokio::test]
    async fn analyze_market_normalizes_sentiment() {
        let gateway = gateway_with(r#"{"sentiment": "panicking", "narrative": "rough"}"#);
        let (assessment, _) = analyze_market(&gateway, &MarketAnalysisInput::default())
            .await
            .unwrap();
        assert_eq!(assessment.sentiment, "neutral");
        assert_eq!(assessment.narrative, "rough");
    }

    #[tokio::test]
    async fn malformed_reply_is_a_format_error() {
        let gateway = gateway_with("I think you should buy everything!");
        let err = analyze_market(&gateway, &MarketAnalysisInput::default())
            .await
            .unwrap_err();
        assert_eq!(err.category, crate::agent::errors::ErrorCategory::Format);
    }
}
