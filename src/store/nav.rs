//! Fund / index market data queries.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use rusqlite::params;

use crate::models::{FundBook, FundCategory, FundHistory, FundNav, IndexBar};

use super::Database;

/// Latest close of a benchmark index plus day-over-day change.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    pub index_code: String,
    pub name: String,
    pub close: f64,
    pub change_pct: Option<f64>,
    pub trade_date: String,
}

#[derive(Debug, Clone)]
pub struct WatchlistEntry {
    pub fund_code: String,
    pub category: FundCategory,
    pub added_date: String,
    pub reason: Option<String>,
}

impl Database {
    /// Upsert a batch of NAV rows inside one transaction. Rows are immutable
    /// once written; re-sent rows simply overwrite with identical values.
    pub fn upsert_fund_nav(&self, fund_code: &str, rows: &[FundNav]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO fund_nav (fund_code, nav_date, nav, acc_nav, daily_return) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for r in rows {
                stmt.execute(params![fund_code, r.nav_date, r.nav, r.acc_nav, r.daily_return])?;
            }
        }
        tx.commit().context("commit nav batch")?;
        Ok(rows.len())
    }

    /// Full NAV history, date ascending.
    pub fn fund_nav_history(&self, fund_code: &str) -> Result<Vec<FundNav>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT nav_date, nav, acc_nav, daily_return FROM fund_nav \
             WHERE fund_code = ?1 ORDER BY nav_date ASC",
        )?;
        let rows = stmt
            .query_map([fund_code], |row| {
                Ok(FundNav {
                    nav_date: row.get(0)?,
                    nav: row.get(1)?,
                    acc_nav: row.get(2)?,
                    daily_return: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn latest_nav(&self, fund_code: &str) -> Result<Option<FundNav>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT nav_date, nav, acc_nav, daily_return FROM fund_nav \
             WHERE fund_code = ?1 ORDER BY nav_date DESC LIMIT 1",
        )?;
        let mut rows = stmt.query([fund_code])?;
        match rows.next()? {
            Some(row) => Ok(Some(FundNav {
                nav_date: row.get(0)?,
                nav: row.get(1)?,
                acc_nav: row.get(2)?,
                daily_return: row.get(3)?,
            })),
            None => Ok(None),
        }
    }

    /// First NAV on or after `date` (validation-horizon lookup).
    pub fn nav_on_or_after(&self, fund_code: &str, date: &str) -> Result<Option<(String, f64)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT nav_date, nav FROM fund_nav \
             WHERE fund_code = ?1 AND nav_date >= ?2 ORDER BY nav_date ASC LIMIT 1",
        )?;
        let mut rows = stmt.query(params![fund_code, date])?;
        match rows.next()? {
            Some(row) => Ok(Some((row.get(0)?, row.get(1)?))),
            None => Ok(None),
        }
    }

    pub fn upsert_index_bars(&self, index_code: &str, bars: &[IndexBar]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO market_indices \
                 (index_code, trade_date, open, high, low, close, volume, amount) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for b in bars {
                stmt.execute(params![
                    index_code, b.trade_date, b.open, b.high, b.low, b.close, b.volume, b.amount
                ])?;
            }
        }
        tx.commit()?;
        Ok(bars.len())
    }

    /// Index close history, date ascending.
    pub fn index_history(&self, index_code: &str) -> Result<Vec<IndexBar>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT trade_date, open, high, low, close, volume, amount FROM market_indices \
             WHERE index_code = ?1 ORDER BY trade_date ASC",
        )?;
        let rows = stmt
            .query_map([index_code], |row| {
                Ok(IndexBar {
                    trade_date: row.get(0)?,
                    open: row.get(1)?,
                    high: row.get(2)?,
                    low: row.get(3)?,
                    close: row.get(4)?,
                    volume: row.get(5)?,
                    amount: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Latest close and day change for each benchmark index that has data.
    pub fn latest_index_snapshot(&self, indices: &[(String, String)]) -> Result<Vec<IndexSnapshot>> {
        let conn = self.conn();
        let mut out = Vec::new();
        let mut stmt = conn.prepare_cached(
            "SELECT trade_date, close FROM market_indices \
             WHERE index_code = ?1 ORDER BY trade_date DESC LIMIT 2",
        )?;
        for (code, name) in indices {
            let rows: Vec<(String, f64)> = stmt
                .query_map([code.as_str()], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            if let Some((date, close)) = rows.first().cloned() {
                let change_pct = rows
                    .get(1)
                    .filter(|(_, prev)| *prev > 0.0)
                    .map(|(_, prev)| (close - prev) / prev * 100.0);
                out.push(IndexSnapshot {
                    index_code: code.clone(),
                    name: name.clone(),
                    close,
                    change_pct,
                    trade_date: date,
                });
            }
        }
        Ok(out)
    }

    pub fn watchlist(&self) -> Result<Vec<WatchlistEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT fund_code, category, added_date, reason FROM watchlist ORDER BY fund_code",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let category: Option<String> = row.get(1)?;
                Ok(WatchlistEntry {
                    fund_code: row.get(0)?,
                    category: category
                        .as_deref()
                        .and_then(FundCategory::parse)
                        .unwrap_or(FundCategory::Equity),
                    added_date: row.get(2)?,
                    reason: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn add_to_watchlist(
        &self,
        fund_code: &str,
        category: FundCategory,
        added_date: &str,
        reason: &str,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO watchlist (fund_code, added_date, reason, target_action, category) \
             VALUES (?1, ?2, ?3, 'watch', ?4)",
            params![fund_code, added_date, reason, category.as_str()],
        )?;
        Ok(())
    }

    /// Category of a fund, from the watch pool; unknown funds count as equity.
    pub fn classify_fund(&self, fund_code: &str) -> FundCategory {
        let conn = self.conn();
        let category: Option<String> = conn
            .query_row(
                "SELECT category FROM watchlist WHERE fund_code = ?1",
                [fund_code],
                |row| row.get(0),
            )
            .ok();
        category
            .as_deref()
            .and_then(FundCategory::parse)
            .unwrap_or(FundCategory::Equity)
    }

    pub fn fund_name(&self, fund_code: &str) -> Option<String> {
        let conn = self.conn();
        conn.query_row(
            "SELECT fund_name FROM funds WHERE fund_code = ?1",
            [fund_code],
            |row| row.get(0),
        )
        .ok()
    }

    pub fn upsert_fund_info(&self, fund_code: &str, fund_name: &str, fund_type: Option<&str>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO funds (fund_code, fund_name, fund_type) VALUES (?1, ?2, ?3) \
             ON CONFLICT(fund_code) DO UPDATE SET fund_name = excluded.fund_name, \
             fund_type = COALESCE(excluded.fund_type, funds.fund_type), \
             updated_at = CURRENT_TIMESTAMP",
            params![fund_code, fund_name, fund_type],
        )?;
        Ok(())
    }

    /// Fund codes with at least `min_rows` NAV observations.
    pub fn fund_codes_with_history(&self, min_rows: i64) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT fund_code FROM fund_nav GROUP BY fund_code \
             HAVING COUNT(*) >= ?1 ORDER BY fund_code",
        )?;
        let rows = stmt
            .query_map([min_rows], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(rows)
    }

    /// Snapshot of analyzable funds: >= 60 NAV rows, plus watch-pool funds
    /// with at least 30 rows. Ordered by fund code for deterministic runs.
    pub fn build_fund_book(&self) -> Result<FundBook> {
        let mut book = FundBook::new();

        for code in self.fund_codes_with_history(60)? {
            let nav_history = self.fund_nav_history(&code)?;
            if !nav_history.is_empty() {
                let category = self.classify_fund(&code);
                book.insert(code, FundHistory { category, nav_history });
            }
        }

        for entry in self.watchlist()? {
            if book.contains_key(&entry.fund_code) {
                continue;
            }
            let nav_history = self.fund_nav_history(&entry.fund_code)?;
            if nav_history.len() >= 30 {
                book.insert(
                    entry.fund_code,
                    FundHistory {
                        category: entry.category,
                        nav_history,
                    },
                );
            }
        }

        Ok(book)
    }

    /// Date-aligned daily returns for the given funds over the trailing
    /// `lookback` observations (correlation input).
    pub fn aligned_returns(
        &self,
        fund_codes: &[String],
        lookback: usize,
    ) -> Result<BTreeMap<String, BTreeMap<String, f64>>> {
        let mut out = BTreeMap::new();
        for code in fund_codes {
            let history = self.fund_nav_history(code)?;
            if history.len() < 2 {
                continue;
            }
            let tail_start = history.len().saturating_sub(lookback);
            let tail = &history[tail_start..];
            let mut returns = BTreeMap::new();
            for pair in tail.windows(2) {
                if pair[0].nav > 0.0 {
                    returns.insert(
                        pair[1].nav_date.clone(),
                        (pair[1].nav - pair[0].nav) / pair[0].nav,
                    );
                }
            }
            if !returns.is_empty() {
                out.insert(code.clone(), returns);
            }
        }
        Ok(out)
    }
}
