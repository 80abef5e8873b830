//! Market-data collaborator seam and the enrichment fan-out.
//!
//! The provider trait wraps whatever upstream feeds the store; callers must
//! tolerate transient network errors, rate limits and empty results, which is
//! why every enrichment read goes through the three-tier fallback.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::info;

use crate::analysis::manager;
use crate::models::{
    FundBook, FundNav, IndexBar, MacroSnapshot, ManagerEvaluation, SentimentSnapshot,
    ValuationSignal,
};
use crate::store::Database;

use super::fallback::{fetch_with_fallback, DataQuality, DataResult};

/// Per-task deadline for enrichment fetches.
const ENRICH_TIMEOUT: Duration = Duration::from_secs(60);

/// Upstream market-data source. Implementations wrap third-party APIs; the
/// advisor core only sees this contract.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fund_nav(&self, fund_code: &str, start: &str, end: &str) -> Result<Vec<FundNav>>;
    async fn index_daily(&self, index_code: &str, start: &str, end: &str) -> Result<Vec<IndexBar>>;
    async fn valuation_signal(&self) -> Result<ValuationSignal>;
    async fn macro_snapshot(&self) -> Result<MacroSnapshot>;
    async fn sentiment_snapshot(&self) -> Result<SentimentSnapshot>;
}

/// Offline provider: every live fetch fails, forcing the cached/default tiers.
/// Used when no upstream feed is configured.
pub struct OfflineProvider;

#[async_trait]
impl MarketDataProvider for OfflineProvider {
    async fn fund_nav(&self, _fund_code: &str, _start: &str, _end: &str) -> Result<Vec<FundNav>> {
        Err(anyhow!("no market data provider configured"))
    }

    async fn index_daily(&self, _index_code: &str, _start: &str, _end: &str) -> Result<Vec<IndexBar>> {
        Err(anyhow!("no market data provider configured"))
    }

    async fn valuation_signal(&self) -> Result<ValuationSignal> {
        Err(anyhow!("no market data provider configured"))
    }

    async fn macro_snapshot(&self) -> Result<MacroSnapshot> {
        Err(anyhow!("no market data provider configured"))
    }

    async fn sentiment_snapshot(&self) -> Result<SentimentSnapshot> {
        Err(anyhow!("no market data provider configured"))
    }
}

/// Bundle of enrichment values with their quality tags.
#[derive(Debug, Clone)]
pub struct Enrichment {
    pub valuation: DataResult<ValuationSignal>,
    pub macro_snapshot: DataResult<MacroSnapshot>,
    pub sentiment: DataResult<SentimentSnapshot>,
    pub manager_scores: BTreeMap<String, ManagerEvaluation>,
}

impl Enrichment {
    pub fn quality_map(&self) -> BTreeMap<String, DataQuality> {
        let mut map = BTreeMap::new();
        map.insert("valuation".to_string(), self.valuation.quality);
        map.insert("macro".to_string(), self.macro_snapshot.quality);
        map.insert("sentiment".to_string(), self.sentiment.quality);
        map
    }
}

/// Fetches valuation / macro / sentiment concurrently (one task each, 60 s
/// deadline) through the fallback chain, and evaluates managers off the NAV
/// book on a blocking worker. Realtime results are written back to the cache
/// tables so the next degraded run has a tier 2 to land on.
pub struct EnrichmentService {
    provider: Arc<dyn MarketDataProvider>,
    db: Database,
}

impl EnrichmentService {
    pub fn new(provider: Arc<dyn MarketDataProvider>, db: Database) -> Self {
        Self { provider, db }
    }

    pub async fn fetch_all(&self, today: NaiveDate, book: &FundBook) -> Enrichment {
        let today_str = today.format("%Y-%m-%d").to_string();

        let valuation_fut = {
            let provider = self.provider.clone();
            let db = self.db.clone();
            fetch_with_fallback(
                "valuation",
                today,
                async move {
                    tokio::time::timeout(ENRICH_TIMEOUT, provider.valuation_signal())
                        .await
                        .map_err(|_| anyhow!("valuation fetch timed out"))?
                },
                move || db.cached_valuation(),
                ValuationSignal::neutral,
                24,
            )
        };

        let macro_fut = {
            let provider = self.provider.clone();
            let db = self.db.clone();
            fetch_with_fallback(
                "macro",
                today,
                async move {
                    tokio::time::timeout(ENRICH_TIMEOUT, provider.macro_snapshot())
                        .await
                        .map_err(|_| anyhow!("macro fetch timed out"))?
                },
                move || db.cached_macro(),
                MacroSnapshot::neutral,
                72,
            )
        };

        let sentiment_fut = {
            let provider = self.provider.clone();
            let db = self.db.clone();
            fetch_with_fallback(
                "sentiment",
                today,
                async move {
                    tokio::time::timeout(ENRICH_TIMEOUT, provider.sentiment_snapshot())
                        .await
                        .map_err(|_| anyhow!("sentiment fetch timed out"))?
                },
                move || db.cached_sentiment(),
                SentimentSnapshot::neutral,
                24,
            )
        };

        let manager_task = {
            // Top slice of the book only; evaluation is CPU-bound and pure.
            let slice: Vec<(String, Vec<f64>)> = book
                .iter()
                .take(10)
                .map(|(code, hist)| (code.clone(), hist.navs()))
                .collect();
            tokio::task::spawn_blocking(move || {
                let mut scores = BTreeMap::new();
                for (code, navs) in slice {
                    if let Some(eval) = manager::evaluate(&code, &navs) {
                        scores.insert(code, eval);
                    }
                }
                scores
            })
        };

        let (valuation, macro_snapshot, sentiment) =
            tokio::join!(valuation_fut, macro_fut, sentiment_fut);
        let manager_scores = manager_task.await.unwrap_or_default();

        if valuation.quality == DataQuality::Realtime {
            let _ = self.db.save_valuation("000300", &today_str, &valuation.data);
        }
        if macro_snapshot.quality == DataQuality::Realtime {
            let m = &macro_snapshot.data;
            let _ = self.db.save_macro_indicator("pmi", &today_str, m.pmi);
            let _ = self.db.save_macro_indicator("m2_yoy", &today_str, m.m2_yoy);
            if let Some(cpi) = m.cpi_yoy {
                let _ = self.db.save_macro_indicator("cpi_yoy", &today_str, cpi);
            }
        }
        if sentiment.quality == DataQuality::Realtime {
            let _ = self.db.save_sentiment(&today_str, &sentiment.data);
        }

        info!(
            valuation = valuation.quality.as_str(),
            macro_q = macro_snapshot.quality.as_str(),
            sentiment = sentiment.quality.as_str(),
            managers = manager_scores.len(),
            "enrichment fetched"
        );

        Enrichment {
            valuation,
            macro_snapshot,
            sentiment,
            manager_scores,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testutil::temp_db;

    #[tokio::test]
    async fn offline_provider_degrades_to_defaults() {
        let (_dir, db) = temp_db();
        let service = EnrichmentService::new(Arc::new(OfflineProvider), db);
        let book = FundBook::new();
        let enrichment = service
            .fetch_all(NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(), &book)
            .await;
        assert_eq!(enrichment.valuation.quality, DataQuality::Default);
        assert_eq!(enrichment.macro_snapshot.quality, DataQuality::Default);
        assert_eq!(enrichment.valuation.data.pe_percentile, 50.0);
    }

    #[tokio::test]
    async fn cached_valuation_is_used_when_live_fails() {
        let (_dir, db) = temp_db();
        db.save_valuation("000300", "2026-07-01", &ValuationSignal::from_pe_percentile(15.0))
            .unwrap();
        let service = EnrichmentService::new(Arc::new(OfflineProvider), db);
        let enrichment = service
            .fetch_all(NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(), &FundBook::new())
            .await;
        assert_eq!(enrichment.valuation.quality, DataQuality::Cached);
        assert_eq!(enrichment.valuation.data.position_multiplier, 1.5);
    }
}
