//! Historical monthly returns for the fixed ETF set.

mod cache;
mod yahoo;

use std::collections::BTreeMap;
use std::future::Future;

pub use cache::ReturnsCache;
pub use yahoo::{YAHOO_BASE_URL, YahooClient, parse_chart};

use crate::core::{ReturnTable, Ticker};
use crate::error::MarketDataError;

/// Month-end prices of one ticker, keyed `YYYY-MM`.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    pub ticker: Ticker,
    pub points: BTreeMap<String, f64>,
}

pub trait PriceSource {
    fn monthly_prices(
        &self,
        ticker: Ticker,
    ) -> impl Future<Output = Result<PriceSeries, MarketDataError>> + Send;
}

// first failure aborts with an empty table
pub async fn fetch_returns<S: PriceSource + ?Sized>(source: &S, tickers: &[Ticker]) -> ReturnTable {
    let mut series = Vec::with_capacity(tickers.len());
    for &ticker in tickers {
        match source.monthly_prices(ticker).await {
            Ok(s) => series.push(s),
            Err(e) => {
                tracing::warn!(error = %e, %ticker, "historical data unavailable");
                return ReturnTable::default();
            }
        }
    }
    returns_from_prices(&series)
}

/// Percentage changes over the months where every series has a price.
/// Tickers without a series get a zero return column.
pub fn returns_from_prices(series: &[PriceSeries]) -> ReturnTable {
    if series.is_empty() {
        return ReturnTable::default();
    }

    let mut aligned: BTreeMap<&str, [Option<f64>; Ticker::COUNT]> = BTreeMap::new();
    for s in series {
        for (month, price) in &s.points {
            if price.is_finite() && *price > 0.0 {
                aligned.entry(month.as_str()).or_default()[s.ticker.index()] = Some(*price);
            }
        }
    }

    let present: Vec<Ticker> = series.iter().map(|s| s.ticker).collect();
    let complete: Vec<(&str, [f64; Ticker::COUNT])> = aligned
        .into_iter()
        .filter_map(|(month, prices)| {
            let mut row = [0.0; Ticker::COUNT];
            for ticker in &present {
                row[ticker.index()] = prices[ticker.index()]?;
            }
            Some((month, row))
        })
        .collect();

    let mut periods = Vec::with_capacity(complete.len().saturating_sub(1));
    let mut rows = Vec::with_capacity(complete.len().saturating_sub(1));
    for pair in complete.windows(2) {
        let (_, previous) = pair[0];
        let (month, current) = pair[1];
        let mut row = [0.0; Ticker::COUNT];
        for ticker in &present {
            let i = ticker.index();
            row[i] = current[i] / previous[i] - 1.0;
        }
        periods.push(month.to_string());
        rows.push(row);
    }

    ReturnTable::new(periods, rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(ticker: Ticker, points: &[(&str, f64)]) -> PriceSeries {
        PriceSeries {
            ticker,
            points: points.iter().map(|(m, p)| (m.to_string(), *p)).collect(),
        }
    }

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn returns_are_computed_on_months_common_to_all_tickers() {
        let table = returns_from_prices(&[
            series(
                Ticker::Vt,
                &[("2024-01", 100.0), ("2024-02", 110.0), ("2024-03", 99.0)],
            ),
            // 2024-01 missing for BND, so the first usable month is 2024-02
            series(Ticker::Bnd, &[("2024-02", 50.0), ("2024-03", 51.0)]),
        ]);

        assert_eq!(table.periods, vec!["2024-03".to_string()]);
        assert_approx(table.rows[0][Ticker::Vt.index()], -0.1);
        assert_approx(table.rows[0][Ticker::Bnd.index()], 0.02);
        assert_eq!(table.rows[0][Ticker::Tw50.index()], 0.0);
    }

    #[test]
    fn non_positive_prices_are_treated_as_missing() {
        let table = returns_from_prices(&[series(
            Ticker::Tw50,
            &[("2024-01", 10.0), ("2024-02", 0.0), ("2024-03", 12.0)],
        )]);
        assert_eq!(table.periods, vec!["2024-03".to_string()]);
        assert_approx(table.rows[0][Ticker::Tw50.index()], 0.2);
    }

    #[test]
    fn no_series_means_empty_table() {
        assert!(returns_from_prices(&[]).is_empty());
        assert!(returns_from_prices(&[series(Ticker::Vt, &[("2024-01", 1.0)])]).is_empty());
    }

    struct FailingOn(Ticker);

    impl PriceSource for FailingOn {
        async fn monthly_prices(&self, ticker: Ticker) -> Result<PriceSeries, MarketDataError> {
            if ticker == self.0 {
                return Err(MarketDataError::Empty {
                    symbol: ticker.symbol().to_string(),
                });
            }
            Ok(series(ticker, &[("2024-01", 1.0), ("2024-02", 1.1)]))
        }
    }

    #[tokio::test]
    async fn one_failed_ticker_yields_empty_table() {
        let table = fetch_returns(&FailingOn(Ticker::Bnd), &Ticker::ALL).await;
        assert!(table.is_empty());

        let table = fetch_returns(&FailingOn(Ticker::Bnd), &[Ticker::Vt]).await;
        assert_eq!(table.len(), 1);
    }
}
