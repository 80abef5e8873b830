//! Three-tier data degradation: live -> cached -> neutral default.
//!
//! Every enrichment value carries a quality tag so downstream consumers can
//! reason about how much to trust it. Fetch failures never abort a run.

use std::future::Future;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Quality of a fetched value, ordered worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataQuality {
    Default,
    Stale,
    Cached,
    Realtime,
}

impl DataQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataQuality::Default => "DEFAULT",
            DataQuality::Stale => "STALE",
            DataQuality::Cached => "CACHED",
            DataQuality::Realtime => "REALTIME",
        }
    }
}

/// A value plus where it came from.
#[derive(Debug, Clone)]
pub struct DataResult<T> {
    pub data: T,
    pub quality: DataQuality,
    pub source: &'static str,
}

/// Fetch with progressive degradation.
///
/// `live` is tried first; on error or `None` the cache lookup runs, with its
/// quality decided by `ttl_hours` against the cached row's date; the neutral
/// default is the last resort and always succeeds.
pub async fn fetch_with_fallback<T, Fut, C, D>(
    name: &str,
    today: NaiveDate,
    live: Fut,
    cached: C,
    default: D,
    ttl_hours: i64,
) -> DataResult<T>
where
    Fut: Future<Output = anyhow::Result<T>>,
    C: FnOnce() -> anyhow::Result<Option<(T, String)>>,
    D: FnOnce() -> T,
{
    match live.await {
        Ok(data) => {
            return DataResult {
                data,
                quality: DataQuality::Realtime,
                source: "api",
            }
        }
        Err(e) => debug!("{} live fetch failed: {}", name, e),
    }

    match cached() {
        Ok(Some((data, updated_at))) => {
            let quality = match NaiveDate::parse_from_str(&updated_at, "%Y-%m-%d") {
                Ok(date) => {
                    let age_hours = (today - date).num_hours();
                    if age_hours < ttl_hours {
                        DataQuality::Cached
                    } else {
                        DataQuality::Stale
                    }
                }
                Err(_) => DataQuality::Stale,
            };
            return DataResult {
                data,
                quality,
                source: "db",
            };
        }
        Ok(None) => {}
        Err(e) => debug!("{} cache lookup failed: {}", name, e),
    }

    DataResult {
        data: default(),
        quality: DataQuality::Default,
        source: "default",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn live_wins_when_available() {
        let r = fetch_with_fallback(
            "valuation",
            day("2026-07-01"),
            async { Ok(42) },
            || Ok(Some((1, "2026-06-30".to_string()))),
            || 0,
            24,
        )
        .await;
        assert_eq!(r.data, 42);
        assert_eq!(r.quality, DataQuality::Realtime);
        assert_eq!(r.source, "api");
    }

    #[tokio::test]
    async fn fresh_cache_is_cached_stale_cache_is_stale() {
        let r = fetch_with_fallback(
            "macro",
            day("2026-07-01"),
            async { Err(anyhow!("rate limited")) },
            || Ok(Some((7, "2026-07-01".to_string()))),
            || 0,
            24,
        )
        .await;
        assert_eq!(r.quality, DataQuality::Cached);

        let r = fetch_with_fallback(
            "macro",
            day("2026-07-10"),
            async { Err(anyhow!("rate limited")) },
            || Ok(Some((7, "2026-07-01".to_string()))),
            || 0,
            24,
        )
        .await;
        assert_eq!(r.quality, DataQuality::Stale);
        assert_eq!(r.source, "db");
    }

    #[tokio::test]
    async fn default_is_last_resort() {
        let r = fetch_with_fallback(
            "sentiment",
            day("2026-07-01"),
            async { Err(anyhow!("network down")) },
            || Ok(None::<(i32, String)>),
            || -1,
            24,
        )
        .await;
        assert_eq!(r.data, -1);
        assert_eq!(r.quality, DataQuality::Default);
        assert_eq!(r.source, "default");
    }
}
