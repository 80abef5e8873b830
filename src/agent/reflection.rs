//! Reflection cycle: replay matured decisions against realized NAVs, ask the
//! model what it got right or wrong, and distill the lessons into the
//! knowledge base.

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::Config;
use crate::store::decisions::{DecisionRecord, ReflectionInsert};
use crate::store::Database;

use super::brain::reflect_on_decision;
use super::llm::LlmGateway;
use super::schemas::ReflectionResult;

fn date_str(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Describe what actually happened to each recommended fund over the period.
pub fn build_actual_outcome(db: &Database, decision: &DecisionRecord, period_days: i64) -> String {
    let target_date = NaiveDate::parse_from_str(&decision.decision_date, "%Y-%m-%d")
        .map(|d| date_str(d + Duration::days(period_days)))
        .unwrap_or_else(|_| decision.decision_date.clone());

    let recs: Vec<Value> = serde_json::from_str(&decision.llm_decision).unwrap_or_default();

    let mut lines = Vec::new();
    for rec in &recs {
        let Some(fund_code) = rec.get("fund_code").and_then(|v| v.as_str()) else {
            continue;
        };
        if fund_code.is_empty() || fund_code == "-" {
            continue;
        }
        let action = rec.get("action").and_then(|v| v.as_str()).unwrap_or("hold");

        // NAV at decision: latest row on or before the decision date is not
        // directly queryable, so use the first row at/after each boundary.
        let nav_before = db.nav_on_or_after(fund_code, &decision.decision_date).ok().flatten();
        let nav_after = db.nav_on_or_after(fund_code, &target_date).ok().flatten();

        if let (Some((_, before)), Some((_, after))) = (nav_before, nav_after) {
            if before <= 0.0 {
                continue;
            }
            let change_pct = (after - before) / before * 100.0;
            let was_correct = match action {
                "buy" | "watch" => change_pct > 0.0,
                "sell" => change_pct < 0.0,
                _ => true,
            };
            let name = db.fund_name(fund_code).unwrap_or_else(|| fund_code.to_string());
            lines.push(format!(
                "- {name} ({fund_code}): advised {action}, moved {change_pct:+.2}% over {period_days}d \
                 (NAV {before:.4} -> {after:.4}) - {}",
                if was_correct { "correct" } else { "wrong" }
            ));
        }
    }

    if lines.is_empty() {
        format!(
            "Not enough NAV data to evaluate the decision of {} after {period_days} days.",
            decision.decision_date
        )
    } else {
        lines.join("\n")
    }
}

/// Store lessons from one reflection into the knowledge base.
fn distill_knowledge(db: &Database, result: &ReflectionResult, reflection_id: i64) -> Result<()> {
    for lesson in &result.lessons {
        if lesson.trim().is_empty() {
            continue;
        }
        db.upsert_lesson("strategy_lesson", lesson, Some(reflection_id))?;
    }
    // Suggestions enter once; repeats do not count as validation.
    for suggestion in &result.strategy_suggestions {
        if suggestion.trim().is_empty() || db.has_active_lesson(suggestion)? {
            continue;
        }
        db.upsert_lesson("risk_insight", suggestion, Some(reflection_id))?;
    }
    Ok(())
}

/// Run all due reflections. Returns (reflections completed, tokens used).
pub async fn run_reflection_cycle(
    db: &Database,
    gateway: &LlmGateway,
    config: &Config,
    today: NaiveDate,
) -> Result<(usize, u32)> {
    let mut completed = 0usize;
    let mut total_tokens = 0u32;

    for period_days in &config.llm.reflection_periods {
        let period_days = *period_days as i64;
        let period_label = format!("{period_days}d");
        let cutoff = date_str(today - Duration::days(period_days));

        let pending = db.pending_reflections(&period_label, &cutoff)?;
        if pending.is_empty() {
            continue;
        }
        info!("{} decisions due for {} reflection", pending.len(), period_label);

        for decision in pending {
            let actual_outcome = build_actual_outcome(db, &decision, period_days);

            match reflect_on_decision(gateway, &decision, &actual_outcome, &period_label).await {
                Ok((result, tokens)) => {
                    total_tokens += tokens;
                    let original_signal: String =
                        decision.quant_signals.chars().take(2000).collect();
                    let reflection_id = db.insert_reflection(&ReflectionInsert {
                        reflection_date: &date_str(today),
                        decision_id: decision.id,
                        period: &period_label,
                        original_signal: &original_signal,
                        actual_outcome: &actual_outcome,
                        was_correct: result.was_correct,
                        reflection_text: &result.accuracy_analysis,
                        lessons_json: &serde_json::to_string(&result.lessons)?,
                        cognitive_update_json: &serde_json::to_string(&result.strategy_suggestions)?,
                    })?;
                    distill_knowledge(db, &result, reflection_id)?;
                    completed += 1;
                }
                Err(e) => {
                    warn!("reflection for decision {} failed: {}", decision.id, e);
                }
            }
        }
    }

    if completed > 0 {
        info!("completed {} reflections ({} tokens)", completed, total_tokens);
    }
    Ok((completed, total_tokens))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::{LlmBackend, LlmRequest, LlmResponse};
    use crate::config::LlmConfig;
    use crate::models::FundNav;
    use crate::store::decisions::DecisionInsert;
    use crate::store::testutil::temp_db;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct CannedBackend(String);

    #[async_trait]
    impl LlmBackend for CannedBackend {
        async fn complete(&self, _request: &LlmRequest) -> Result<LlmResponse, crate::agent::errors::LlmError> {
            Ok(LlmResponse {
                text: self.0.clone(),
                tokens_used: 99,
            })
        }

        fn has_credentials(&self, _provider: &str) -> bool {
            true
        }
    }

    fn seed_navs(db: &Database, code: &str, rows: &[(&str, f64)]) {
        let rows: Vec<FundNav> = rows
            .iter()
            .map(|(date, nav)| FundNav {
                nav_date: date.to_string(),
                nav: *nav,
                acc_nav: None,
                daily_return: None,
            })
            .collect();
        db.upsert_fund_nav(code, &rows).unwrap();
    }

    #[test]
    fn actual_outcome_reports_direction() {
        let (_dir, db) = temp_db();
        seed_navs(&db, "110011", &[("2026-06-01", 1.0), ("2026-06-09", 1.05)]);
        let decision = DecisionRecord {
            id: 1,
            decision_date: "2026-06-01".to_string(),
            market_context: String::new(),
            quant_signals: String::new(),
            llm_analysis: String::new(),
            llm_decision: r#"[{"fund_code": "110011", "action": "buy"}]"#.to_string(),
            confidence: 0.7,
        };
        let outcome = build_actual_outcome(&db, &decision, 7);
        assert!(outcome.contains("+5.00%"));
        assert!(outcome.contains("correct"));
    }

    #[tokio::test]
    async fn reflection_cycle_persists_and_distills() {
        let (_dir, db) = temp_db();
        seed_navs(&db, "110011", &[("2026-06-01", 1.0), ("2026-06-09", 0.96)]);
        db.insert_decision(&DecisionInsert {
            decision_date: "2026-06-01",
            market_context: "ranging",
            quant_signals: "[]",
            llm_analysis: "{}",
            llm_decision: r#"[{"fund_code": "110011", "action": "buy"}]"#,
            confidence: 0.7,
            reasoning: "",
            challenge: "",
            model_used: "gemini:x",
            tokens_used: 0,
        })
        .unwrap();

        let reply = r#"{
            "was_correct": false,
            "accuracy_analysis": "bought into weakness without confirmation",
            "lessons": ["wait for a second up-day before adding"],
            "strategy_suggestions": ["cap adds during drawdowns"]
        }"#;
        let gateway = LlmGateway::new(LlmConfig::default(), Arc::new(CannedBackend(reply.into())));
        let config = Config::default();
        let today = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();

        let (completed, tokens) = run_reflection_cycle(&db, &gateway, &config, today).await.unwrap();
        // One decision, both 7d and 30d periods are due.
        assert_eq!(completed, 2);
        assert_eq!(tokens, 198);

        let knowledge = db.active_knowledge().unwrap();
        assert_eq!(knowledge.len(), 2);
        // The repeated lesson from the second period bumped the counter.
        let lesson = knowledge
            .iter()
            .find(|k| k.category == "strategy_lesson")
            .unwrap();
        assert_eq!(lesson.times_validated, 1);
        // The repeated suggestion did not.
        let insight = knowledge.iter().find(|k| k.category == "risk_insight").unwrap();
        assert_eq!(insight.times_validated, 0);

        // Re-running finds nothing pending.
        let (completed, _) = run_reflection_cycle(&db, &gateway, &config, today).await.unwrap();
        assert_eq!(completed, 0);
    }
}
