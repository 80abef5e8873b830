//! LLM error taxonomy: retryable vs terminal, and what drives provider
//! fallback.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 429 or quota exhaustion. Retryable; triggers a provider switch.
    RateLimit,
    /// 401/403 or key problems. Terminal.
    Auth,
    /// 402 / insufficient balance. Terminal.
    Billing,
    /// Request deadline exceeded. Retryable.
    Timeout,
    /// Response failed JSON expectations. Retryable (LLM output is noisy).
    Format,
    /// Prompt too long for the model. Retryable after compression.
    ContextOverflow,
    /// Transport-level failure or 5xx. Retryable.
    Network,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Billing => "billing",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Format => "format",
            ErrorCategory::ContextOverflow => "context_overflow",
            ErrorCategory::Network => "network",
            ErrorCategory::Unknown => "unknown",
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorCategory::Auth | ErrorCategory::Billing)
    }
}

/// Structured LLM failure carrying where it happened.
#[derive(Debug, Clone, Error)]
#[error("[{provider}/{model}] {}{}: {message}", .category.as_str(), .status.map(|s| format!(" [{s}]")).unwrap_or_default())]
pub struct LlmError {
    pub category: ErrorCategory,
    pub provider: String,
    pub model: String,
    pub message: String,
    pub status: Option<u16>,
}

impl LlmError {
    pub fn new(
        category: ErrorCategory,
        provider: &str,
        model: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            provider: provider.to_string(),
            model: model.to_string(),
            message: message.into(),
            status: None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }

    /// Infer a category from HTTP status and message heuristics.
    pub fn classify(status: Option<u16>, message: &str, provider: &str, model: &str) -> Self {
        let category = categorize(status, message);
        Self {
            category,
            provider: provider.to_string(),
            model: model.to_string(),
            message: message.chars().take(500).collect(),
            status,
        }
    }
}

fn categorize(status: Option<u16>, message: &str) -> ErrorCategory {
    match status {
        Some(429) => return ErrorCategory::RateLimit,
        Some(401) | Some(403) => return ErrorCategory::Auth,
        Some(402) => return ErrorCategory::Billing,
        _ => {}
    }

    let msg = message.to_lowercase();

    if msg.contains("timeout") || msg.contains("timed out") {
        return ErrorCategory::Timeout;
    }
    if msg.contains("json") {
        return ErrorCategory::Format;
    }
    if (msg.contains("rate") && msg.contains("limit"))
        || msg.contains("quota")
        || msg.contains("resource_exhausted")
    {
        return ErrorCategory::RateLimit;
    }
    if msg.contains("api key") || msg.contains("permission") || msg.contains("unauthorized") {
        return ErrorCategory::Auth;
    }
    if msg.contains("context")
        && (msg.contains("length") || msg.contains("overflow") || msg.contains("too long"))
    {
        return ErrorCategory::ContextOverflow;
    }
    if ["connection", "network", "dns", "refused", "reset"]
        .iter()
        .any(|kw| msg.contains(kw))
    {
        return ErrorCategory::Network;
    }
    if let Some(code) = status {
        if (500..600).contains(&code) {
            return ErrorCategory::Network;
        }
    }
    ErrorCategory::Unknown
}
