//! Knowledge base: append-only lessons with a full-text mirror.
//!
//! The FTS row (rowid = knowledge_base.id) exists iff the base row is active;
//! inserts and soft-deletes maintain both sides inside one transaction.

use anyhow::{Context, Result};
use rusqlite::params;
use tracing::{debug, warn};

use super::Database;

/// What happened when a lesson was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LessonOutcome {
    /// Fresh content: inserted with this id.
    Inserted(i64),
    /// Content already active: times_validated bumped on this id.
    Revalidated(i64),
}

#[derive(Debug, Clone)]
pub struct KnowledgeEntry {
    pub id: i64,
    pub category: String,
    pub content: String,
    pub times_validated: i64,
    pub created_at: String,
}

impl Database {
    /// Insert a lesson, or bump `times_validated` when identical active
    /// content already exists (content is unique among active rows).
    pub fn upsert_lesson(
        &self,
        category: &str,
        content: &str,
        source_reflection_id: Option<i64>,
    ) -> Result<LessonOutcome> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM knowledge_base WHERE content = ?1 AND is_active = 1",
                [content],
                |row| row.get(0),
            )
            .ok();

        let outcome = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE knowledge_base SET times_validated = times_validated + 1 WHERE id = ?1",
                    [id],
                )?;
                LessonOutcome::Revalidated(id)
            }
            None => {
                tx.execute(
                    "INSERT INTO knowledge_base (category, content, source_reflection_id) \
                     VALUES (?1, ?2, ?3)",
                    params![category, content, source_reflection_id],
                )?;
                let id = tx.last_insert_rowid();
                tx.execute(
                    "INSERT INTO knowledge_fts (rowid, content, category) VALUES (?1, ?2, ?3)",
                    params![id, content, category],
                )?;
                LessonOutcome::Inserted(id)
            }
        };

        tx.commit().context("commit lesson")?;
        Ok(outcome)
    }

    /// Whether identical content is already active.
    pub fn has_active_lesson(&self, content: &str) -> Result<bool> {
        let conn = self.conn();
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM knowledge_base WHERE content = ?1 AND is_active = 1",
                [content],
                |row| row.get(0),
            )
            .ok();
        Ok(id.is_some())
    }

    /// Soft-delete a lesson and drop its full-text row in the same transaction.
    pub fn deactivate_lesson(&self, id: i64) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("UPDATE knowledge_base SET is_active = 0 WHERE id = ?1", [id])?;
        tx.execute("DELETE FROM knowledge_fts WHERE rowid = ?1", [id])?;
        tx.commit()?;
        Ok(())
    }

    /// Retrieve lessons relevant to `query` (typically the current regime).
    ///
    /// Primary path ranks FTS matches by -0.4*rank + 0.3*min(validated, 10)
    /// + 0.3 * 50/(1 + days since creation). Any FTS failure degrades to a
    /// plain query sorted by validation count and recency.
    pub fn relevant_knowledge(&self, query: &str, limit: i64) -> Result<Vec<String>> {
        {
            let conn = self.conn();
            let fts = conn
                .prepare(
                    "SELECT kb.content FROM knowledge_base kb \
                     JOIN knowledge_fts fts ON kb.id = fts.rowid \
                     WHERE knowledge_fts MATCH ?1 AND kb.is_active = 1 \
                     ORDER BY rank * -0.4 \
                         + MIN(kb.times_validated, 10) * 0.3 \
                         + (50.0 / (1.0 + julianday('now') - julianday(kb.created_at))) * 0.3 \
                     DESC LIMIT ?2",
                )
                .and_then(|mut stmt| {
                    stmt.query_map(params![query, limit], |row| row.get::<_, String>(0))?
                        .collect::<Result<Vec<_>, _>>()
                });

            match fts {
                Ok(rows) if !rows.is_empty() => return Ok(rows),
                Ok(_) => debug!("knowledge FTS returned no match for '{}'", query),
                Err(e) => warn!("knowledge FTS failed ({}), degrading to plain query", e),
            }
        }

        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT content FROM knowledge_base WHERE is_active = 1 \
             ORDER BY times_validated DESC, created_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(rows)
    }

    pub fn active_knowledge(&self) -> Result<Vec<KnowledgeEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, category, content, times_validated, created_at FROM knowledge_base \
             WHERE is_active = 1 ORDER BY times_validated DESC, created_at DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(KnowledgeEntry {
                    id: row.get(0)?,
                    category: row.get(1)?,
                    content: row.get(2)?,
                    times_validated: row.get(3)?,
                    created_at: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    #[cfg(test)]
    pub fn times_validated(&self, id: i64) -> i64 {
        let conn = self.conn();
        conn.query_row(
            "SELECT times_validated FROM knowledge_base WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }

    #[cfg(test)]
    pub fn drop_fts_table(&self) {
        let conn = self.conn();
        conn.execute_batch("DROP TABLE knowledge_fts").unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testutil::temp_db;

    #[test]
    fn duplicate_active_lesson_increments_validation_counter() {
        let (_dir, db) = temp_db();
        let first = db
            .upsert_lesson("strategy_lesson", "momentum fades in ranging markets", None)
            .unwrap();
        let LessonOutcome::Inserted(id) = first else {
            panic!("expected insert");
        };
        assert_eq!(db.times_validated(id), 0);

        let second = db
            .upsert_lesson("strategy_lesson", "momentum fades in ranging markets", None)
            .unwrap();
        assert_eq!(second, LessonOutcome::Revalidated(id));
        assert_eq!(db.times_validated(id), 1);
    }

    #[test]
    fn deactivated_lesson_leaves_fts() {
        let (_dir, db) = temp_db();
        let LessonOutcome::Inserted(id) = db
            .upsert_lesson("risk_insight", "ranging regime rewards patience", None)
            .unwrap()
        else {
            panic!("expected insert");
        };
        assert!(!db.relevant_knowledge("ranging", 10).unwrap().is_empty());
        db.deactivate_lesson(id).unwrap();
        assert!(db.relevant_knowledge("ranging", 10).unwrap().is_empty());
        assert!(db.active_knowledge().unwrap().is_empty());
    }

    #[test]
    fn fts_failure_degrades_to_recency_query() {
        let (_dir, db) = temp_db();
        db.upsert_lesson("strategy_lesson", "do not chase strength after a long streak", None)
            .unwrap();
        db.upsert_lesson("risk_insight", "keep the cash floor intact in drawdowns", None)
            .unwrap();

        db.drop_fts_table();

        let rows = db.relevant_knowledge("ranging", 10).unwrap();
        assert_eq!(rows.len(), 2);
    }
}
