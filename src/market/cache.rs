use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{PriceSource, fetch_returns};
use crate::core::{ReturnTable, Ticker};

/// Read-through cache of return tables keyed by the requested ticker set.
///
/// Entries expire after `ttl`. Empty tables are never stored, so a failed
/// fetch is retried on the next request.
#[derive(Debug)]
pub struct ReturnsCache {
    ttl: Duration,
    entries: Mutex<HashMap<Vec<Ticker>, Entry>>,
}

#[derive(Debug, Clone)]
struct Entry {
    fetched_at: Instant,
    table: Arc<ReturnTable>,
}

impl ReturnsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_or_fetch<S: PriceSource + ?Sized>(
        &self,
        source: &S,
        tickers: &[Ticker],
    ) -> Arc<ReturnTable> {
        let key = cache_key(tickers);
        if let Some(table) = self.lookup(&key, Instant::now()) {
            tracing::debug!(tickers = ?key, "returns cache hit");
            return table;
        }

        let table = Arc::new(fetch_returns(source, &key).await);
        if table.is_empty() {
            return table;
        }

        tracing::info!(tickers = ?key, periods = table.len(), "cached historical returns");
        self.lock().insert(
            key,
            Entry {
                fetched_at: Instant::now(),
                table: Arc::clone(&table),
            },
        );
        table
    }

    fn lookup(&self, key: &[Ticker], now: Instant) -> Option<Arc<ReturnTable>> {
        let mut entries = self.lock();
        let entry = entries.get(key)?;
        if now.duration_since(entry.fetched_at) < self.ttl {
            return Some(Arc::clone(&entry.table));
        }
        entries.remove(key);
        None
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Vec<Ticker>, Entry>> {
        // entries are plain data; a panic elsewhere cannot leave them half-written
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn cache_key(tickers: &[Ticker]) -> Vec<Ticker> {
    let mut key = tickers.to_vec();
    key.sort();
    key.dedup();
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MarketDataError;
    use crate::market::PriceSeries;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSource {
        calls: AtomicUsize,
        fail: bool,
    }

    impl PriceSource for CountingSource {
        async fn monthly_prices(&self, ticker: Ticker) -> Result<PriceSeries, MarketDataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(MarketDataError::Empty {
                    symbol: ticker.symbol().to_string(),
                });
            }
            Ok(PriceSeries {
                ticker,
                points: [("2024-01", 10.0), ("2024-02", 11.0), ("2024-03", 12.1)]
                    .into_iter()
                    .map(|(m, p)| (m.to_string(), p))
                    .collect(),
            })
        }
    }

    #[tokio::test]
    async fn second_request_within_ttl_is_served_from_cache() {
        let cache = ReturnsCache::new(Duration::from_secs(3_600));
        let source = CountingSource::default();

        let first = cache.get_or_fetch(&source, &Ticker::ALL).await;
        let second = cache.get_or_fetch(&source, &Ticker::ALL).await;

        assert_eq!(first.len(), 2);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.calls.load(Ordering::SeqCst), Ticker::COUNT);
    }

    #[tokio::test]
    async fn ticker_order_does_not_change_the_key() {
        let cache = ReturnsCache::new(Duration::from_secs(3_600));
        let source = CountingSource::default();

        cache.get_or_fetch(&source, &[Ticker::Vt, Ticker::Bnd]).await;
        cache.get_or_fetch(&source, &[Ticker::Bnd, Ticker::Vt]).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_entries_are_refetched() {
        let cache = ReturnsCache::new(Duration::ZERO);
        let source = CountingSource::default();

        cache.get_or_fetch(&source, &[Ticker::Vt]).await;
        cache.get_or_fetch(&source, &[Ticker::Vt]).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_fetches_are_not_cached() {
        let cache = ReturnsCache::new(Duration::from_secs(3_600));
        let source = CountingSource {
            fail: true,
            ..CountingSource::default()
        };

        assert!(cache.get_or_fetch(&source, &[Ticker::Vt]).await.is_empty());
        assert!(cache.get_or_fetch(&source, &[Ticker::Vt]).await.is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
