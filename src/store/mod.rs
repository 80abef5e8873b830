//! SQLite persistence store.
//!
//! Single shared database for the long-lived bot process and short CLI
//! invocations. WAL mode keeps readers lock-free while writers append.
//! The knowledge-base full-text mirror is maintained manually inside the
//! same transaction as the base row so the two can never diverge.

pub mod account;
pub mod decisions;
pub mod knowledge;
pub mod nav;
pub mod validation;

use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

-- Fund master data
CREATE TABLE IF NOT EXISTS funds (
    fund_code TEXT PRIMARY KEY,
    fund_name TEXT NOT NULL,
    fund_type TEXT,
    management_company TEXT,
    establishment_date TEXT,
    benchmark TEXT,
    subscription_fee_rate REAL,
    redemption_fee_rate TEXT,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- Daily NAV history
CREATE TABLE IF NOT EXISTS fund_nav (
    fund_code TEXT NOT NULL,
    nav_date TEXT NOT NULL,
    nav REAL NOT NULL,
    acc_nav REAL,
    daily_return REAL,
    PRIMARY KEY (fund_code, nav_date)
);

-- Index OHLCV history
CREATE TABLE IF NOT EXISTS market_indices (
    index_code TEXT NOT NULL,
    trade_date TEXT NOT NULL,
    open REAL,
    high REAL,
    low REAL,
    close REAL,
    volume REAL,
    amount REAL,
    PRIMARY KEY (index_code, trade_date)
);

-- Open and closed positions
CREATE TABLE IF NOT EXISTS portfolio (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fund_code TEXT NOT NULL,
    shares REAL NOT NULL,
    cost_price REAL NOT NULL,
    current_nav REAL,
    buy_date TEXT NOT NULL,
    status TEXT DEFAULT 'holding',
    sell_date TEXT,
    sell_nav REAL,
    profit_loss REAL,
    profit_loss_pct REAL,
    notes TEXT
);

-- Advisory and executed trades
CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trade_date TEXT NOT NULL,
    fund_code TEXT NOT NULL,
    action TEXT NOT NULL,
    amount REAL NOT NULL,
    nav REAL NOT NULL,
    shares REAL,
    fee REAL DEFAULT 0,
    reason TEXT,
    confidence REAL,
    status TEXT DEFAULT 'pending',
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- Daily account snapshots (date-unique)
CREATE TABLE IF NOT EXISTS account_snapshots (
    snapshot_date TEXT PRIMARY KEY,
    total_value REAL NOT NULL,
    cash REAL NOT NULL,
    invested REAL NOT NULL,
    total_profit_loss REAL,
    total_return_pct REAL,
    max_drawdown_pct REAL,
    holdings_json TEXT
);

-- Watch pool
CREATE TABLE IF NOT EXISTS watchlist (
    fund_code TEXT PRIMARY KEY,
    added_date TEXT NOT NULL,
    reason TEXT,
    target_action TEXT,
    notes TEXT,
    category TEXT DEFAULT 'equity'
);

-- Signal outcome log. A (signal_date, fund_code, strategy_name) triple is
-- inserted at most once; horizon columns are filled by the validator.
CREATE TABLE IF NOT EXISTS signal_validation (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    signal_date TEXT NOT NULL,
    fund_code TEXT NOT NULL,
    strategy_name TEXT NOT NULL,
    signal_type TEXT NOT NULL,
    confidence REAL,
    regime TEXT,
    nav_at_signal REAL,
    nav_after_7d REAL,
    return_7d REAL,
    is_correct_7d INTEGER,
    nav_after_30d REAL,
    return_30d REAL,
    is_correct_30d INTEGER,
    validated_at TEXT,
    UNIQUE (signal_date, fund_code, strategy_name)
);

CREATE INDEX IF NOT EXISTS idx_signal_validation_pending_7d
    ON signal_validation(signal_date) WHERE nav_after_7d IS NULL;
CREATE INDEX IF NOT EXISTS idx_signal_validation_pending_30d
    ON signal_validation(signal_date) WHERE nav_after_30d IS NULL;
CREATE INDEX IF NOT EXISTS idx_signal_validation_fund
    ON signal_validation(fund_code, strategy_name, signal_date DESC);

-- Rolling per-strategy x regime performance, rewritten by each learning cycle
CREATE TABLE IF NOT EXISTS strategy_performance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    period_start TEXT NOT NULL,
    period_end TEXT NOT NULL,
    strategy_name TEXT NOT NULL,
    regime TEXT NOT NULL,
    total_signals INTEGER NOT NULL,
    correct_signals INTEGER NOT NULL,
    win_rate REAL,
    avg_return REAL,
    avg_confidence REAL,
    confidence_accuracy REAL,
    recommended_weight REAL,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (period_end, strategy_name, regime)
);

-- Append-only lesson store with soft delete
CREATE TABLE IF NOT EXISTS knowledge_base (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category TEXT NOT NULL,
    content TEXT NOT NULL,
    source_reflection_id INTEGER,
    times_validated INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_knowledge_active
    ON knowledge_base(is_active, times_validated DESC, created_at DESC);

-- Full-text mirror of active knowledge rows (rowid = knowledge_base.id)
CREATE VIRTUAL TABLE IF NOT EXISTS knowledge_fts USING fts5(
    content,
    category,
    tokenize='unicode61 remove_diacritics 2'
);

-- LLM decision log
CREATE TABLE IF NOT EXISTS agent_decisions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    decision_date TEXT NOT NULL,
    market_context TEXT,
    quant_signals TEXT,
    llm_analysis TEXT,
    llm_decision TEXT,
    confidence REAL,
    reasoning TEXT,
    challenge TEXT,
    model_used TEXT,
    tokens_used INTEGER,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_agent_decisions_date
    ON agent_decisions(decision_date);

-- Post-hoc reflections on decisions
CREATE TABLE IF NOT EXISTS reflections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    reflection_date TEXT NOT NULL,
    decision_id INTEGER,
    period TEXT NOT NULL,
    original_signal TEXT,
    actual_outcome TEXT,
    was_correct INTEGER,
    reflection_text TEXT,
    lessons_learned TEXT,
    cognitive_update TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_reflections_decision
    ON reflections(decision_id, period);

-- Enrichment caches (tier-2 of the data fallback)
CREATE TABLE IF NOT EXISTS index_valuation (
    index_code TEXT NOT NULL,
    trade_date TEXT NOT NULL,
    pe REAL,
    pb REAL,
    pe_percentile REAL,
    pb_percentile REAL,
    PRIMARY KEY (index_code, trade_date)
);

CREATE TABLE IF NOT EXISTS macro_indicators (
    indicator_name TEXT NOT NULL,
    report_date TEXT NOT NULL,
    value REAL,
    PRIMARY KEY (indicator_name, report_date)
);

CREATE TABLE IF NOT EXISTS sentiment_indicators (
    indicator_name TEXT NOT NULL,
    trade_date TEXT NOT NULL,
    value REAL,
    percentile REAL,
    PRIMARY KEY (indicator_name, trade_date)
);

CREATE TABLE IF NOT EXISTS sector_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_date TEXT NOT NULL,
    sector_name TEXT NOT NULL,
    change_pct REAL,
    score REAL
);

CREATE TABLE IF NOT EXISTS hotspots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sector_name TEXT NOT NULL,
    hotspot_type TEXT,
    score REAL,
    status TEXT DEFAULT 'active',
    detected_date TEXT
);

CREATE TABLE IF NOT EXISTS fund_managers (
    manager_id TEXT PRIMARY KEY,
    manager_name TEXT,
    company TEXT,
    annual_return REAL,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- Stored intel / scenario narratives (read-only for the decision prompt)
CREATE TABLE IF NOT EXISTS scenario_analysis (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    analysis_date TEXT NOT NULL,
    analysis_type TEXT NOT NULL,
    content_json TEXT,
    narrative TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
"#;

/// Shared database handle. Cloning is cheap; all writers serialize on the
/// inner mutex while WAL keeps readers concurrent.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        info!("database ready at {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn conn(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::Database;

    /// Fresh database in a temp dir; the dir guard must outlive the handle.
    pub fn temp_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fundbot-test.db");
        let db = Database::open(path.to_str().unwrap()).expect("open temp db");
        (dir, db)
    }
}
