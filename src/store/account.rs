//! Portfolio, trades, account snapshots and enrichment caches.

use anyhow::Result;
use rusqlite::params;

use crate::models::{AccountSnapshot, Holding, MacroSnapshot, SentimentSnapshot, ValuationSignal};

use super::Database;

#[derive(Debug, Clone)]
pub struct TradeInsert<'a> {
    pub trade_date: &'a str,
    pub fund_code: &'a str,
    pub action: &'a str,
    pub amount: f64,
    pub nav: f64,
    pub shares: Option<f64>,
    pub reason: &'a str,
    pub confidence: Option<f64>,
    pub status: &'a str,
}

#[derive(Debug, Clone)]
pub struct TradeRow {
    pub trade_date: String,
    pub fund_code: String,
    pub action: String,
    pub amount: f64,
    pub nav: f64,
    pub status: String,
}

impl Database {
    pub fn holdings(&self) -> Result<Vec<Holding>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, fund_code, shares, cost_price, current_nav, buy_date FROM portfolio \
             WHERE status = 'holding' ORDER BY buy_date, id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Holding {
                    id: row.get(0)?,
                    fund_code: row.get(1)?,
                    shares: row.get(2)?,
                    cost_price: row.get(3)?,
                    current_nav: row.get(4)?,
                    buy_date: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn open_position(&self, fund_code: &str, shares: f64, nav: f64, buy_date: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO portfolio (fund_code, shares, cost_price, current_nav, buy_date, status) \
             VALUES (?1, ?2, ?3, ?4, ?5, 'holding')",
            params![fund_code, shares, nav, nav, buy_date],
        )?;
        Ok(())
    }

    pub fn update_holding_nav(&self, fund_code: &str, nav: f64) -> Result<usize> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE portfolio SET current_nav = ?1 WHERE fund_code = ?2 AND status = 'holding'",
            params![nav, fund_code],
        )?;
        Ok(n)
    }

    pub fn insert_trade(&self, rec: &TradeInsert<'_>) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO trades (trade_date, fund_code, action, amount, nav, shares, reason, confidence, status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                rec.trade_date,
                rec.fund_code,
                rec.action,
                rec.amount,
                rec.nav,
                rec.shares,
                rec.reason,
                rec.confidence,
                rec.status
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn recent_trades(&self, limit: i64) -> Result<Vec<TradeRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT trade_date, fund_code, action, amount, nav, status FROM trades \
             ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit], |row| {
                Ok(TradeRow {
                    trade_date: row.get(0)?,
                    fund_code: row.get(1)?,
                    action: row.get(2)?,
                    amount: row.get(3)?,
                    nav: row.get(4)?,
                    status: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn upsert_snapshot(&self, snap: &AccountSnapshot) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO account_snapshots \
             (snapshot_date, total_value, cash, invested, total_profit_loss, total_return_pct, \
              max_drawdown_pct, holdings_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(snapshot_date) DO UPDATE SET \
              total_value = excluded.total_value, cash = excluded.cash, \
              invested = excluded.invested, total_profit_loss = excluded.total_profit_loss, \
              total_return_pct = excluded.total_return_pct, \
              max_drawdown_pct = excluded.max_drawdown_pct, holdings_json = excluded.holdings_json",
            params![
                snap.snapshot_date,
                snap.total_value,
                snap.cash,
                snap.invested,
                snap.total_pnl,
                snap.total_return_pct,
                snap.max_drawdown_pct,
                snap.holdings_json
            ],
        )?;
        Ok(())
    }

    /// Cash from the most recent snapshot, if any.
    pub fn latest_cash(&self) -> Result<Option<f64>> {
        let conn = self.conn();
        let cash: Option<f64> = conn
            .query_row(
                "SELECT cash FROM account_snapshots ORDER BY snapshot_date DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .ok();
        Ok(cash)
    }

    /// Total-value series (oldest first) over the trailing `limit` snapshots.
    pub fn snapshot_values(&self, limit: i64) -> Result<Vec<f64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT total_value FROM ( \
                SELECT snapshot_date, total_value FROM account_snapshots \
                ORDER BY snapshot_date DESC LIMIT ?1 \
             ) ORDER BY snapshot_date ASC",
        )?;
        let rows = stmt
            .query_map([limit], |row| row.get(0))?
            .collect::<Result<Vec<f64>, _>>()?;
        Ok(rows)
    }

    // ── enrichment caches ────────────────────────────────────────────────

    pub fn save_valuation(&self, index_code: &str, trade_date: &str, signal: &ValuationSignal) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO index_valuation (index_code, trade_date, pe_percentile) \
             VALUES (?1, ?2, ?3)",
            params![index_code, trade_date, signal.pe_percentile],
        )?;
        Ok(())
    }

    /// Cached CSI300 valuation signal with its trade date.
    pub fn cached_valuation(&self) -> Result<Option<(ValuationSignal, String)>> {
        let conn = self.conn();
        let row: Option<(Option<f64>, String)> = conn
            .query_row(
                "SELECT pe_percentile, trade_date FROM index_valuation \
                 WHERE index_code = '000300' ORDER BY trade_date DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok();
        Ok(row.map(|(pe_pct, date)| {
            let mut signal = ValuationSignal::from_pe_percentile(pe_pct.unwrap_or(50.0));
            signal.narrative = format!("(cached) {}", signal.narrative);
            (signal, date)
        }))
    }

    pub fn save_macro_indicator(&self, indicator: &str, report_date: &str, value: f64) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO macro_indicators (indicator_name, report_date, value) \
             VALUES (?1, ?2, ?3)",
            params![indicator, report_date, value],
        )?;
        Ok(())
    }

    /// Cached macro snapshot rebuilt from the latest stored indicators.
    pub fn cached_macro(&self) -> Result<Option<(MacroSnapshot, String)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT indicator_name, value, report_date FROM macro_indicators \
             ORDER BY report_date DESC LIMIT 10",
        )?;
        let rows: Vec<(String, f64, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut snapshot = MacroSnapshot::neutral();
        snapshot.narrative = "(cached) macro readings from store".to_string();
        let latest_date = rows[0].2.clone();
        for (name, value, _) in &rows {
            match name.as_str() {
                "pmi" => snapshot.pmi = *value,
                "m2_yoy" => snapshot.m2_yoy = *value,
                "cpi_yoy" => snapshot.cpi_yoy = Some(*value),
                _ => {}
            }
        }
        Ok(Some((snapshot, latest_date)))
    }

    pub fn save_sentiment(&self, trade_date: &str, snapshot: &SentimentSnapshot) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO sentiment_indicators (indicator_name, trade_date, value, percentile) \
             VALUES ('margin_balance', ?1, ?2, ?3)",
            params![trade_date, snapshot.score, snapshot.percentile],
        )?;
        Ok(())
    }

    pub fn cached_sentiment(&self) -> Result<Option<(SentimentSnapshot, String)>> {
        let conn = self.conn();
        let row: Option<(Option<f64>, String)> = conn
            .query_row(
                "SELECT percentile, trade_date FROM sentiment_indicators \
                 WHERE indicator_name = 'margin_balance' ORDER BY trade_date DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok();
        Ok(row.map(|(pct, date)| {
            let pct = pct.unwrap_or(50.0);
            let mut snap = SentimentSnapshot::neutral();
            snap.score = pct;
            snap.percentile = pct;
            snap.narrative = format!("(cached) margin balance percentile {pct:.0}%");
            (snap, date)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testutil::temp_db;

    #[test]
    fn snapshot_upsert_is_date_unique() {
        let (_dir, db) = temp_db();
        let mut snap = AccountSnapshot {
            snapshot_date: "2026-07-01".to_string(),
            total_value: 10_000.0,
            cash: 8_000.0,
            invested: 2_000.0,
            total_pnl: 0.0,
            total_return_pct: 0.0,
            max_drawdown_pct: 0.0,
            holdings_json: "[]".to_string(),
        };
        db.upsert_snapshot(&snap).unwrap();
        snap.cash = 7_500.0;
        db.upsert_snapshot(&snap).unwrap();
        assert_eq!(db.latest_cash().unwrap(), Some(7_500.0));
        assert_eq!(db.snapshot_values(10).unwrap().len(), 1);
    }

    #[test]
    fn cached_valuation_tags_narrative() {
        let (_dir, db) = temp_db();
        assert!(db.cached_valuation().unwrap().is_none());
        db.save_valuation("000300", "2026-07-01", &ValuationSignal::from_pe_percentile(25.0))
            .unwrap();
        let (signal, date) = db.cached_valuation().unwrap().unwrap();
        assert_eq!(date, "2026-07-01");
        assert!(signal.narrative.starts_with("(cached)"));
        assert_eq!(signal.position_multiplier, 1.3);
    }
}
