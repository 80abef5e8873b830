//! Structured LLM output types.
//!
//! Deserialization is forgiving: unknown enum-ish strings coerce to safe
//! defaults instead of failing the whole response, since model output drifts.

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_sentiment() -> String {
    "neutral".to_string()
}

fn default_action() -> String {
    "hold".to_string()
}

fn default_confidence() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketAssessment {
    #[serde(default = "default_true")]
    pub regime_agreement: bool,
    #[serde(default)]
    pub regime_override: Option<String>,
    #[serde(default)]
    pub key_risks: Vec<String>,
    #[serde(default)]
    pub key_opportunities: Vec<String>,
    #[serde(default = "default_sentiment")]
    pub sentiment: String,
    #[serde(default)]
    pub narrative: String,
}

impl MarketAssessment {
    /// Coerce out-of-vocabulary values to defaults.
    pub fn normalize(mut self) -> Self {
        if !matches!(self.sentiment.as_str(), "bullish" | "bearish" | "cautious" | "neutral") {
            self.sentiment = default_sentiment();
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundRecommendation {
    pub fund_code: String,
    #[serde(default)]
    pub fund_name: Option<String>,
    #[serde(default = "default_action")]
    pub action: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub key_factors: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub stop_loss_trigger: String,
}

impl FundRecommendation {
    pub fn normalize(mut self) -> Self {
        if !matches!(self.action.as_str(), "buy" | "sell" | "hold" | "watch") {
            self.action = default_action();
        }
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self.amount = self.amount.max(0.0);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThinkingProcess {
    #[serde(default)]
    pub initial_judgment: String,
    #[serde(default)]
    pub challenge: String,
    #[serde(default)]
    pub final_conclusion: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionResult {
    #[serde(default)]
    pub was_correct: bool,
    #[serde(default)]
    pub accuracy_analysis: String,
    #[serde(default)]
    pub missed_factors: Vec<String>,
    #[serde(default)]
    pub overweighted_factors: Vec<String>,
    #[serde(default)]
    pub lessons: Vec<String>,
    #[serde(default)]
    pub strategy_suggestions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assessment_coerces_bad_sentiment() {
        let parsed: MarketAssessment =
            serde_json::from_str(r#"{"sentiment": "euphoric", "narrative": "x"}"#).unwrap();
        let normalized = parsed.normalize();
        assert_eq!(normalized.sentiment, "neutral");
        assert!(normalized.regime_agreement);
    }

    #[test]
    fn recommendation_coerces_action_and_clamps() {
        let parsed: FundRecommendation = serde_json::from_str(
            r#"{"fund_code": "110011", "action": "yolo", "confidence": 1.8, "amount": -50}"#,
        )
        .unwrap();
        let normalized = parsed.normalize();
        assert_eq!(normalized.action, "hold");
        assert_eq!(normalized.confidence, 1.0);
        assert_eq!(normalized.amount, 0.0);
    }

    #[test]
    fn recommendation_requires_fund_code() {
        let parsed: Result<FundRecommendation, _> = serde_json::from_str(r#"{"action": "buy"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn reflection_defaults_are_empty() {
        let parsed: ReflectionResult = serde_json::from_str("{}").unwrap();
        assert!(!parsed.was_correct);
        assert!(parsed.lessons.is_empty());
    }
}
