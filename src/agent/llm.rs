//! Unified LLM gateway: provider chain, classified retry with exponential
//! backoff, cross-provider fallback, and JSON extraction.
//!
//! All model calls go through `LlmGateway::call` — business code never talks
//! to a provider SDK directly. The transport sits behind `LlmBackend` so the
//! retry/fallback machinery is testable without a network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::LlmConfig;

use super::errors::{ErrorCategory, LlmError};

/// Which model tier a call should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    /// Cheap summarization (market analyst).
    Analysis,
    /// Standard reasoning (reflection, scenarios).
    Decision,
    /// Core investment decisions.
    Critical,
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub provider: String,
    pub model: String,
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub thinking_budget: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub tokens_used: u32,
}

/// Transport seam. The production implementation speaks HTTPS to both
/// providers; tests script it.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;
    fn has_credentials(&self, provider: &str) -> bool;
}

pub struct LlmGateway {
    config: LlmConfig,
    backend: Arc<dyn LlmBackend>,
}

impl LlmGateway {
    pub fn new(config: LlmConfig, backend: Arc<dyn LlmBackend>) -> Self {
        Self { config, backend }
    }

    /// Active primary provider; `LLM_PROVIDER` overrides the config.
    pub fn provider(&self) -> String {
        std::env::var("LLM_PROVIDER")
            .ok()
            .filter(|p| matches!(p.as_str(), "gemini" | "anthropic"))
            .unwrap_or_else(|| self.config.provider.clone())
    }

    fn fallback_provider(&self, primary: &str) -> Option<String> {
        let fallback = if primary == "gemini" { "anthropic" } else { "gemini" };
        self.backend
            .has_credentials(fallback)
            .then(|| fallback.to_string())
    }

    fn provider_chain(&self) -> Vec<String> {
        let primary = self.provider();
        let mut chain = vec![primary.clone()];
        if self.config.enable_provider_fallback {
            if let Some(fallback) = self.fallback_provider(&primary) {
                chain.push(fallback);
            }
        }
        chain
    }

    /// Resolve the model for a role on a provider; an unset tier falls back
    /// to that provider's decision model.
    pub fn model_for(&self, provider: &str, role: ModelRole) -> String {
        let models = match provider {
            "anthropic" => &self.config.anthropic,
            _ => &self.config.gemini,
        };
        let name = match role {
            ModelRole::Analysis => &models.analysis_model,
            ModelRole::Decision => &models.decision_model,
            ModelRole::Critical => &models.critical_model,
        };
        if name.is_empty() {
            models.decision_model.clone()
        } else {
            name.clone()
        }
    }

    fn thinking_budget(&self, provider: &str, role: ModelRole) -> Option<u32> {
        if !self.config.enable_thinking {
            return None;
        }
        let models = match provider {
            "anthropic" => &self.config.anthropic,
            _ => &self.config.gemini,
        };
        Some(match role {
            ModelRole::Critical => models.critical_thinking_budget,
            _ => models.thinking_budget,
        })
    }

    /// Call the role's model with retry and provider fallback.
    ///
    /// Per provider: up to `max_retries` attempts with exponential backoff
    /// `min(base^attempt, cap)`. Rate limits skip straight to the next
    /// provider; auth/billing failures surface immediately. When everything
    /// is exhausted the returned error is exactly the last attempt's.
    pub async fn call(
        &self,
        role: ModelRole,
        system: &str,
        user: &str,
        max_tokens: Option<u32>,
    ) -> Result<LlmResponse, LlmError> {
        let max_tokens = max_tokens.unwrap_or(self.config.max_tokens);
        let chain = self.provider_chain();
        let mut last_error: Option<LlmError> = None;

        for provider in &chain {
            let model = self.model_for(provider, role);
            let request = LlmRequest {
                provider: provider.clone(),
                model: model.clone(),
                system: system.to_string(),
                user: user.to_string(),
                max_tokens,
                thinking_budget: self.thinking_budget(provider, role),
            };

            for attempt in 0..self.config.max_retries {
                match self.backend.complete(&request).await {
                    Ok(response) => return Ok(response),
                    Err(error) => {
                        if !error.is_retryable() {
                            warn!("terminal LLM error: {}", error);
                            return Err(error);
                        }
                        let is_rate_limit = error.category == ErrorCategory::RateLimit;
                        warn!(
                            provider = %provider,
                            model = %model,
                            attempt = attempt + 1,
                            "LLM call failed: {}",
                            error
                        );
                        last_error = Some(error);
                        if is_rate_limit {
                            break; // jump to the next provider
                        }
                        let delay = self
                            .config
                            .retry_backoff_base
                            .powi(attempt as i32)
                            .min(self.config.retry_backoff_max);
                        if delay > 0.0 {
                            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                        }
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            LlmError::new(
                ErrorCategory::Unknown,
                &self.provider(),
                &self.model_for(&self.provider(), role),
                "no LLM provider available",
            )
        }))
    }
}

/// Extract a JSON object from an LLM reply: strip Markdown fences, take the
/// outermost `{...}` and parse. Failure is a FORMAT error.
pub fn extract_json(text: &str, provider: &str, model: &str) -> Result<serde_json::Value, LlmError> {
    let mut text = text.trim();

    // Fenced block?
    let stripped;
    if text.starts_with("```") {
        let mut lines: Vec<&str> = text.lines().collect();
        lines.remove(0);
        if lines.last().map(|l| l.trim()) == Some("```") {
            lines.pop();
        }
        stripped = lines.join("\n");
        text = stripped.trim();
    }

    let slice = if text.starts_with('{') {
        text.to_string()
    } else {
        match (text.find('{'), text.rfind('}')) {
            (Some(start), Some(end)) if end > start => text[start..=end].to_string(),
            _ => text.to_string(),
        }
    };

    serde_json::from_str(&slice).map_err(|e| {
        LlmError::new(
            ErrorCategory::Format,
            provider,
            model,
            format!("JSON parse failed: {e}; head: {}", slice.chars().take(200).collect::<String>()),
        )
    })
}

// ── HTTP transport ───────────────────────────────────────────────────────

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Production backend over `reqwest`, speaking both provider wire formats.
pub struct HttpBackend {
    http: reqwest::Client,
}

impl HttpBackend {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    fn api_key(provider: &str) -> Option<String> {
        let var = if provider == "anthropic" {
            "ANTHROPIC_API_KEY"
        } else {
            "GEMINI_API_KEY"
        };
        std::env::var(var).ok().filter(|k| !k.trim().is_empty())
    }

    async fn call_gemini(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let key = Self::api_key("gemini").ok_or_else(|| {
            LlmError::new(
                ErrorCategory::Auth,
                &request.provider,
                &request.model,
                "GEMINI_API_KEY not set",
            )
        })?;

        let mut generation_config = serde_json::json!({
            "maxOutputTokens": request.max_tokens,
            "temperature": 0.7,
        });
        // Thinking is only meaningful on the 2.5 family.
        if let Some(budget) = request.thinking_budget {
            if request.model.contains("2.5") {
                generation_config["thinkingConfig"] = serde_json::json!({ "thinkingBudget": budget });
            }
        }

        let body = serde_json::json!({
            "system_instruction": { "parts": [{ "text": request.system }] },
            "contents": [{ "role": "user", "parts": [{ "text": request.user }] }],
            "generationConfig": generation_config,
        });

        let url = format!("{}/{}:generateContent?key={}", GEMINI_ENDPOINT, request.model, key);
        let response = self
            .http
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::classify(None, &e.to_string(), &request.provider, &request.model))?;

        let status = response.status().as_u16();
        let raw = response.text().await.unwrap_or_default();
        if !(200..300).contains(&status) {
            return Err(LlmError::classify(Some(status), &raw, &request.provider, &request.model));
        }

        let parsed: GeminiResponse = serde_json::from_str(&raw).map_err(|e| {
            LlmError::new(
                ErrorCategory::Format,
                &request.provider,
                &request.model,
                format!("gemini json parse: {e}"),
            )
        })?;

        let text = parsed
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.clone())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        let tokens_used = parsed
            .usage_metadata
            .map(|u| u.total_token_count)
            .unwrap_or(0);

        Ok(LlmResponse { text, tokens_used })
    }

    async fn call_anthropic(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let key = Self::api_key("anthropic").ok_or_else(|| {
            LlmError::new(
                ErrorCategory::Auth,
                &request.provider,
                &request.model,
                "ANTHROPIC_API_KEY not set",
            )
        })?;

        let mut max_tokens = request.max_tokens;
        let mut body = serde_json::json!({
            "model": request.model,
            "system": request.system,
            "messages": [{ "role": "user", "content": request.user }],
        });
        if let Some(budget) = request.thinking_budget {
            if request.model.contains("sonnet") || request.model.contains("opus") {
                body["thinking"] = serde_json::json!({ "type": "enabled", "budget_tokens": budget });
                max_tokens += budget;
            }
        }
        body["max_tokens"] = serde_json::json!(max_tokens);

        let response = self
            .http
            .post(ANTHROPIC_ENDPOINT)
            .timeout(REQUEST_TIMEOUT)
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::classify(None, &e.to_string(), &request.provider, &request.model))?;

        let status = response.status().as_u16();
        let raw = response.text().await.unwrap_or_default();
        if !(200..300).contains(&status) {
            return Err(LlmError::classify(Some(status), &raw, &request.provider, &request.model));
        }

        let parsed: AnthropicResponse = serde_json::from_str(&raw).map_err(|e| {
            LlmError::new(
                ErrorCategory::Format,
                &request.provider,
                &request.model,
                format!("anthropic json parse: {e}"),
            )
        })?;

        let text = parsed
            .content
            .iter()
            .find(|block| block.block_type == "text")
            .and_then(|block| block.text.clone())
            .unwrap_or_default();
        let tokens_used = parsed
            .usage
            .map(|u| u.input_tokens + u.output_tokens)
            .unwrap_or(0);

        Ok(LlmResponse { text, tokens_used })
    }
}

impl Default for HttpBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmBackend for HttpBackend {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        if request.provider == "anthropic" {
            self.call_anthropic(request).await
        } else {
            self.call_gemini(request).await
        }
    }

    fn has_credentials(&self, provider: &str) -> bool {
        Self::api_key(provider).is_some()
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Default, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Scripted backend: pops one result per call and records the request.
    struct ScriptedBackend {
        script: Mutex<Vec<Result<LlmResponse, LlmError>>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<LlmResponse, LlmError>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            self.calls
                .lock()
                .push((request.provider.clone(), request.model.clone()));
            let mut script = self.script.lock();
            if script.is_empty() {
                return Err(LlmError::new(
                    ErrorCategory::Unknown,
                    &request.provider,
                    &request.model,
                    "script exhausted",
                ));
            }
            script.remove(0)
        }

        fn has_credentials(&self, _provider: &str) -> bool {
            true
        }
    }

    fn fast_config() -> LlmConfig {
        let mut config = LlmConfig::default();
        config.retry_backoff_base = 0.0;
        config.retry_backoff_max = 0.0;
        config
    }

    fn ok(text: &str) -> Result<LlmResponse, LlmError> {
        Ok(LlmResponse {
            text: text.to_string(),
            tokens_used: 10,
        })
    }

    /// Spec scenario: a 429 on attempt 1 skips the remaining retries of the
    /// primary and re-resolves the role against the fallback. Two attempts
    /// total, with the model mapped to the fallback's tier.
    #[tokio::test]
    async fn rate_limit_jumps_to_next_provider() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(LlmError::classify(Some(429), "slow down", "gemini", "gemini-2.5-pro")),
            ok("fine"),
        ]));
        let gateway = LlmGateway::new(fast_config(), backend.clone());

        let response = gateway.call(ModelRole::Critical, "s", "u", None).await.unwrap();
        assert_eq!(response.text, "fine");

        let calls = backend.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "gemini");
        assert_eq!(calls[0].1, "gemini-2.5-pro");
        assert_eq!(calls[1].0, "anthropic");
        assert_eq!(calls[1].1, "claude-opus-4-6");
    }

    #[tokio::test]
    async fn retryable_errors_retry_then_fall_back() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(LlmError::classify(Some(500), "boom", "gemini", "m")),
            Err(LlmError::classify(None, "connection reset", "gemini", "m")),
            Err(LlmError::classify(None, "timeout", "gemini", "m")),
            ok("recovered"),
        ]));
        let gateway = LlmGateway::new(fast_config(), backend.clone());

        let response = gateway.call(ModelRole::Decision, "s", "u", None).await.unwrap();
        assert_eq!(response.text, "recovered");
        // 3 retries on gemini, then anthropic succeeds.
        assert_eq!(backend.calls.lock().len(), 4);
    }

    #[tokio::test]
    async fn auth_error_surfaces_immediately() {
        let backend = Arc::new(ScriptedBackend::new(vec![Err(LlmError::classify(
            Some(401),
            "bad key",
            "gemini",
            "gemini-2.0-flash",
        ))]));
        let gateway = LlmGateway::new(fast_config(), backend.clone());

        let err = gateway.call(ModelRole::Analysis, "s", "u", None).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Auth);
        assert_eq!(backend.calls.lock().len(), 1);
    }

    /// When everything fails, the surfaced error is exactly the last attempt's.
    #[tokio::test]
    async fn exhausted_chain_returns_last_attempts_error() {
        let errors: Vec<Result<LlmResponse, LlmError>> = (0..6)
            .map(|i| {
                let provider = if i < 3 { "gemini" } else { "anthropic" };
                let model = if i < 3 { "gemini-2.5-pro" } else { "claude-opus-4-6" };
                Err(LlmError::classify(Some(500), &format!("boom {i}"), provider, model))
            })
            .collect();
        let backend = Arc::new(ScriptedBackend::new(errors));
        let gateway = LlmGateway::new(fast_config(), backend);

        let err = gateway.call(ModelRole::Critical, "s", "u", None).await.unwrap_err();
        assert_eq!(err.provider, "anthropic");
        assert_eq!(err.model, "claude-opus-4-6");
        assert_eq!(err.category, ErrorCategory::Network);
        assert_eq!(err.message, "boom 5");
    }

    #[test]
    fn json_extraction_handles_fences_and_prose() {
        let fenced = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json(fenced, "p", "m").unwrap()["a"], 1);

        let wrapped = "Here you go:\n{\"ok\": true}\nHope that helps!";
        assert_eq!(extract_json(wrapped, "p", "m").unwrap()["ok"], true);

        let err = extract_json("no json at all", "p", "m").unwrap_err();
        assert_eq!(err.category, ErrorCategory::Format);
    }
}
