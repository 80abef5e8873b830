//! LLM decision log, reflections, and read-only intel lookups.

use anyhow::Result;
use rusqlite::params;

use super::Database;

#[derive(Debug, Clone)]
pub struct DecisionInsert<'a> {
    pub decision_date: &'a str,
    pub market_context: &'a str,
    pub quant_signals: &'a str,
    pub llm_analysis: &'a str,
    pub llm_decision: &'a str,
    pub confidence: f64,
    pub reasoning: &'a str,
    pub challenge: &'a str,
    pub model_used: &'a str,
    pub tokens_used: i64,
}

#[derive(Debug, Clone)]
pub struct DecisionRecord {
    pub id: i64,
    pub decision_date: String,
    pub market_context: String,
    pub quant_signals: String,
    pub llm_analysis: String,
    pub llm_decision: String,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct ReflectionInsert<'a> {
    pub reflection_date: &'a str,
    pub decision_id: i64,
    pub period: &'a str,
    pub original_signal: &'a str,
    pub actual_outcome: &'a str,
    pub was_correct: bool,
    pub reflection_text: &'a str,
    pub lessons_json: &'a str,
    pub cognitive_update_json: &'a str,
}

#[derive(Debug, Clone)]
pub struct ReflectionRow {
    pub id: i64,
    pub reflection_date: String,
    pub decision_date: Option<String>,
    pub period: String,
    pub was_correct: bool,
    pub reflection_text: String,
    pub lessons_json: String,
}

#[derive(Debug, Clone)]
pub struct HotspotRow {
    pub sector_name: String,
    pub hotspot_type: String,
    pub score: f64,
}

impl Database {
    pub fn insert_decision(&self, rec: &DecisionInsert<'_>) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO agent_decisions \
             (decision_date, market_context, quant_signals, llm_analysis, llm_decision, \
              confidence, reasoning, challenge, model_used, tokens_used) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                rec.decision_date,
                rec.market_context,
                rec.quant_signals,
                rec.llm_analysis,
                rec.llm_decision,
                rec.confidence,
                rec.reasoning,
                rec.challenge,
                rec.model_used,
                rec.tokens_used
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Decisions older than `cutoff_date` without a reflection for `period`.
    pub fn pending_reflections(&self, period: &str, cutoff_date: &str) -> Result<Vec<DecisionRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT ad.id, ad.decision_date, ad.market_context, ad.quant_signals, \
                    ad.llm_analysis, ad.llm_decision, ad.confidence \
             FROM agent_decisions ad \
             WHERE ad.decision_date <= ?1 \
               AND ad.id NOT IN (SELECT COALESCE(decision_id, 0) FROM reflections WHERE period = ?2) \
             ORDER BY ad.decision_date",
        )?;
        let rows = stmt
            .query_map(params![cutoff_date, period], |row| {
                Ok(DecisionRecord {
                    id: row.get(0)?,
                    decision_date: row.get(1)?,
                    market_context: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    quant_signals: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    llm_analysis: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    llm_decision: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                    confidence: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn insert_reflection(&self, rec: &ReflectionInsert<'_>) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO reflections \
             (reflection_date, decision_id, period, original_signal, actual_outcome, \
              was_correct, reflection_text, lessons_learned, cognitive_update) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                rec.reflection_date,
                rec.decision_id,
                rec.period,
                rec.original_signal,
                rec.actual_outcome,
                rec.was_correct as i64,
                rec.reflection_text,
                rec.lessons_json,
                rec.cognitive_update_json
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn recent_reflections(&self, limit: i64) -> Result<Vec<ReflectionRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT r.id, r.reflection_date, ad.decision_date, r.period, r.was_correct, \
                    r.reflection_text, r.lessons_learned \
             FROM reflections r \
             LEFT JOIN agent_decisions ad ON r.decision_id = ad.id \
             ORDER BY r.created_at DESC, r.id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit], |row| {
                Ok(ReflectionRow {
                    id: row.get(0)?,
                    reflection_date: row.get(1)?,
                    decision_date: row.get(2)?,
                    period: row.get(3)?,
                    was_correct: row.get::<_, Option<i64>>(4)?.unwrap_or(0) != 0,
                    reflection_text: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                    lessons_json: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn active_hotspots(&self, limit: i64) -> Result<Vec<HotspotRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT sector_name, hotspot_type, score FROM hotspots \
             WHERE status = 'active' ORDER BY score DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit], |row| {
                Ok(HotspotRow {
                    sector_name: row.get(0)?,
                    hotspot_type: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    score: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Latest stored intel narrative, if any analysis has been persisted.
    pub fn latest_intel(&self) -> Result<Option<String>> {
        let conn = self.conn();
        let narrative: Option<String> = conn
            .query_row(
                "SELECT narrative FROM scenario_analysis ORDER BY created_at DESC, id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .ok()
            .flatten();
        Ok(narrative.filter(|s| !s.trim().is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testutil::temp_db;

    fn decision<'a>(date: &'a str) -> DecisionInsert<'a> {
        DecisionInsert {
            decision_date: date,
            market_context: "ranging market",
            quant_signals: "[]",
            llm_analysis: "{}",
            llm_decision: "[]",
            confidence: 0.6,
            reasoning: "hold",
            challenge: "",
            model_used: "gemini:gemini-2.5-pro",
            tokens_used: 1200,
        }
    }

    #[test]
    fn reflection_resolves_pending_decision() {
        let (_dir, db) = temp_db();
        let id = db.insert_decision(&decision("2026-06-01")).unwrap();

        let pending = db.pending_reflections("7d", "2026-06-20").unwrap();
        assert_eq!(pending.len(), 1);

        db.insert_reflection(&ReflectionInsert {
            reflection_date: "2026-06-20",
            decision_id: id,
            period: "7d",
            original_signal: "[]",
            actual_outcome: "fund rose 2%",
            was_correct: true,
            reflection_text: "call was right for the wrong reason",
            lessons_json: "[]",
            cognitive_update_json: "[]",
        })
        .unwrap();

        assert!(db.pending_reflections("7d", "2026-06-20").unwrap().is_empty());
        // The 30d reflection is still due.
        assert_eq!(db.pending_reflections("30d", "2026-07-10").unwrap().len(), 1);
    }
}
